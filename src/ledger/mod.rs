pub mod client;
pub mod error;
pub mod types;

pub use client::{LedgerClient, RpcLedgerClient};
pub use error::LedgerError;
pub use types::{MintReceipt, MintRequest};
