pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod storage;

pub use error::LedgerError;
pub use ledger::{Ledger, StreamId};
