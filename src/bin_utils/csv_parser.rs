use std::io::Read;

use crate::{
    account::{Account, AccountId},
    command::RequestKind,
};
use csv::{StringRecord, Trim};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub account: Option<AccountId>,
    pub amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AccountRow {
    id: AccountId,
    client_name: String,
    balance: u64,
}

fn reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(source)
}

/// Reads the `id,client_name,balance` account list.
pub fn read_accounts<R>(source: R) -> Result<Vec<Account>, csv::Error>
where
    R: Read,
{
    reader(source)
        .into_deserialize::<AccountRow>()
        .map(|row| row.map(|row| Account::new(row.id, row.client_name, row.balance)))
        .collect()
}

/// Parses request list in CSV format, yielding every row with its line number
pub struct CsvRequestParser<R> {
    reader: csv::Reader<R>,
    headers: StringRecord,
    record: StringRecord,
}

impl<R> CsvRequestParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Result<Self, csv::Error> {
        let mut reader = reader(source);
        let headers = reader.headers()?.clone();
        Ok(Self {
            reader,
            headers,
            record: StringRecord::new(),
        })
    }
}

impl<R> Iterator for CsvRequestParser<R>
where
    R: Read,
{
    type Item = (u64, Result<Request, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                let line = self.record.position().map_or(0, |p| p.line());
                Some((line, self.record.deserialize(Some(&self.headers))))
            }
            Ok(false) => None,
            Err(err) => {
                let line = err.position().map_or(0, |p| p.line());
                Some((line, Err(err)))
            }
        }
    }
}
