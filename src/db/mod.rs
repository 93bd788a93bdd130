//! sqlx adapter for the transaction executor.
//!
//! This module provides:
//! - [`DbPool`]: database-specific pools that begin transactions and run
//!   context-aware statements
//! - [`DbTransaction`]: a transaction on a dedicated pooled connection
//! - Parameter binding and row-to-JSON decoding shared by both

mod macros;
mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use pool::DbPool;
pub use transaction::DbTransaction;
