use std::io::Read;

use csv::{StringRecord, Trim};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    allocator::{BillCount, Denomination},
    inventory::{Inventory, MachineId},
};

pub const DEFAULT_MACHINE_ID: MachineId = MachineId(1);
pub const DEFAULT_DENOMINATIONS: [Denomination; 4] = [200, 100, 50, 20];
pub const DEFAULT_BILL_COUNT: BillCount = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid bill configuration at line {line}: {source}")]
    Csv { line: u64, source: csv::Error },
    #[error("Denomination at line {line} must be positive")]
    ZeroDenomination { line: u64 },
    #[error("Bill configuration contains no denominations")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct BillRow {
    denomination: Denomination,
    count: BillCount,
}

/// Bills a machine starts out with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub machine_id: MachineId,
    pub bills: Vec<(Denomination, BillCount)>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            machine_id: DEFAULT_MACHINE_ID,
            bills: DEFAULT_DENOMINATIONS
                .iter()
                .map(|&d| (d, DEFAULT_BILL_COUNT))
                .collect(),
        }
    }
}

impl MachineConfig {
    /// Reads `denomination,count` rows.
    pub fn from_csv<R>(machine_id: MachineId, source: R) -> Result<Self, ConfigError>
    where
        R: Read,
    {
        let mut reader = csv::ReaderBuilder::new().trim(Trim::All).from_reader(source);
        let headers = reader.headers().map_err(csv_error)?.clone();
        let mut record = StringRecord::new();
        let mut bills = Vec::new();
        while reader.read_record(&mut record).map_err(csv_error)? {
            // blank lines are skipped by the reader but still counted here
            let line = record.position().map_or(0, |p| p.line());
            let row: BillRow = record
                .deserialize(Some(&headers))
                .map_err(|source| ConfigError::Csv { line, source })?;
            if row.denomination == 0 {
                return Err(ConfigError::ZeroDenomination { line });
            }
            bills.push((row.denomination, row.count));
        }
        if bills.is_empty() {
            return Err(ConfigError::Empty);
        }
        Ok(Self { machine_id, bills })
    }

    pub fn into_inventory(self) -> Inventory {
        Inventory::new(self.machine_id, self.bills)
    }
}

fn csv_error(source: csv::Error) -> ConfigError {
    ConfigError::Csv {
        line: source.position().map_or(0, |p| p.line()),
        source,
    }
}
