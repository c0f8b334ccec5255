use std::io::Write;

use crate::{
    account::AccountId,
    allocator::{BillCount, Denomination},
    command::RequestKind,
};
use csv::Writer;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    Error,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub line: u64,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub account: Option<AccountId>,
    pub status: Status,
    pub balance: Option<u64>,
    pub bills: String,
    pub message: String,
}

/// Formats bills as `200x1 50x1 20x1`, skipping empty stacks unless `keep_empty` is set.
pub fn format_bills(
    bills: impl IntoIterator<Item = (Denomination, BillCount)>,
    keep_empty: bool,
) -> String {
    bills
        .into_iter()
        .filter(|(_, count)| keep_empty || *count > 0)
        .map(|(denomination, count)| format!("{denomination}x{count}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn print_responses<W>(
    output: &mut W,
    responses: impl Iterator<Item = Response>,
) -> anyhow::Result<()>
where
    W: Write,
{
    let mut writer = Writer::from_writer(output);
    for response in responses {
        if let Err(err) = writer.serialize(response) {
            anyhow::bail!("Failed to write to CSV: {err}")
        }
    }
    // Ensure all data is flushed to the output
    if let Err(err) = writer.flush() {
        anyhow::bail!("Failed to flush CSV writer: {err}")
    }
    Ok(())
}
