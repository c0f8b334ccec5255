use std::{env, fs::File};

use anyhow::{Context, Result};
use cash_machine::{
    bin_utils::{Service, logging},
    config::{DEFAULT_MACHINE_ID, MachineConfig},
    journal::{CsvTransactionLog, InMemoryTransactionLog, TransactionLog},
};

const CONFIG_VAR: &str = "CASH_MACHINE_CONFIG";
const JOURNAL_VAR: &str = "CASH_MACHINE_JOURNAL";

fn main() -> Result<()> {
    logging::set_up();

    let mut args = env::args().skip(1);
    let accounts_path = args
        .next()
        .context("Expected the accounts file name as the first argument")?;
    let requests_path = args
        .next()
        .context("Expected the requests file name as the second argument")?;

    let accounts = File::open(&accounts_path)
        .with_context(|| format!("Failed to open `{accounts_path}`"))?;
    let requests = File::open(&requests_path)
        .with_context(|| format!("Failed to open `{requests_path}`"))?;

    let machine = match env::var_os(CONFIG_VAR) {
        Some(path) => {
            let file = File::open(&path)
                .with_context(|| format!("Failed to open `{}`", path.to_string_lossy()))?;
            MachineConfig::from_csv(DEFAULT_MACHINE_ID, file)?
        }
        None => MachineConfig::default(),
    };

    let journal: Box<dyn TransactionLog> = match env::var_os(JOURNAL_VAR) {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create `{}`", path.to_string_lossy()))?;
            Box::new(CsvTransactionLog::new(file))
        }
        None => Box::new(InMemoryTransactionLog::default()),
    };

    let service = Service {
        accounts,
        requests,
        output: &mut std::io::stdout(),
        machine,
        journal,
        error_printer: Box::new(|line, err| eprintln!("Error at line {line}: {err:#}")),
    };
    service.run()
}
