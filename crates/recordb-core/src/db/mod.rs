//! Storage seam, search conditions and transactions.

pub mod search;
pub mod store;
pub mod transaction;

pub use transaction::{Database, Transaction, TxState};
