/// Fewest-bills dispensing under a limited supply of every denomination.
pub mod allocator;

/// Customer account balance, changed through validated events.
pub mod account;

/// Account storage interface, plus "in memory" implementation.
pub mod store;

/// Per-account serialized balance mutations on top of [`store`].
pub mod ledger;

/// Bill counts of a single machine.
pub mod inventory;

/// Append-only journal of committed transactions.
pub mod journal;

/// Validation of raw requests before they reach [`processor`].
pub mod command;

/// Transaction processor interface, plus the implementation that keeps
/// balances, bills and the journal in step.
pub mod processor;

/// Initial machine set-up.
pub mod config;

/// CSV front end used by the binary and the integration tests.
pub mod bin_utils;
