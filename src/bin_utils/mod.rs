//! CSV front end for the processor. It lives in the library rather than the binary so the
//! integration tests can drive it exactly the way `cash-machine` does.

use std::io::{Read, Write};

use crate::{
    command::AtmCommand,
    config::MachineConfig,
    inventory::MachineId,
    journal::TransactionLog,
    processor::{
        Response as ProcessorResponse, TransactionProcessError, TransactionProcessor,
        atm_processor::AtmProcessor,
    },
    store::InMemoryAccountStore,
};
use anyhow::{Context, Result};
use csv_parser::{CsvRequestParser, Request, read_accounts};
use csv_printer::{Response, Status, format_bills, print_responses};
pub mod csv_parser;
pub mod csv_printer;
pub mod logging;

pub struct Service<'w, A, R, W: 'w, J> {
    pub accounts: A,
    pub requests: R,
    pub output: &'w mut W,
    pub machine: MachineConfig,
    pub journal: J,
    pub error_printer: Box<dyn FnMut(u64, anyhow::Error)>,
}

impl<'w, A, R, W, J> Service<'w, A, R, W, J>
where
    A: Read,
    R: Read,
    W: Write + 'w,
    J: TransactionLog,
{
    pub fn run(mut self) -> Result<()> {
        let accounts = read_accounts(self.accounts).context("Failed to read accounts")?;
        let parser = CsvRequestParser::new(self.requests).context("Failed to read requests")?;

        let machine_id = self.machine.machine_id;
        let processor = AtmProcessor::new(InMemoryAccountStore::new(accounts), self.journal)
            .with_machine(self.machine.into_inventory());

        let mut responses = Vec::new();
        for (line, row) in parser {
            match row {
                Ok(request) => responses.push(respond(&processor, machine_id, line, request)),
                Err(err) => (self.error_printer)(line, err.into()),
            }
        }

        print_responses(self.output, responses.into_iter())
    }
}

fn respond(
    processor: &impl TransactionProcessor,
    machine: MachineId,
    line: u64,
    request: Request,
) -> Response {
    let mut response = Response {
        line,
        kind: request.kind,
        account: request.account,
        status: Status::Ok,
        balance: None,
        bills: String::new(),
        message: String::new(),
    };

    let command = match AtmCommand::parse_command(request.kind, request.account, request.amount) {
        Ok(command) => command,
        Err(err) => {
            response.status = Status::BadRequest;
            response.message = err.to_string();
            return response;
        }
    };

    match processor.execute(machine, command) {
        Ok(ProcessorResponse::Balance(balance)) => response.balance = Some(balance),
        Ok(ProcessorResponse::Withdrawal(receipt)) => {
            response.balance = Some(receipt.balance);
            response.bills = format_bills(receipt.allocation.dispensed(), false);
        }
        Ok(ProcessorResponse::MachineState(state)) => {
            response.bills = format_bills(state.bills, true);
        }
        Err(err) => {
            response.status = status_of(&err);
            response.message = err.to_string();
        }
    }
    response
}

fn status_of(err: &TransactionProcessError) -> Status {
    if err.is_not_found() {
        Status::NotFound
    } else if err.is_rejection() {
        Status::BadRequest
    } else {
        Status::Error
    }
}
