//! sqlx-transactor
//!
//! Runs a unit of work inside a database transaction: begin, commit on
//! success, roll back on failure or panic, and always release the
//! connection. The active transaction travels to nested data-access code in
//! a [`Context`], where [`carrier::extract`] finds it.
//!
//! ```ignore
//! let pool = DbPool::connect_url("postgres://app@localhost/app").await?;
//! let transactor = Transactor::new(Some(pool.clone()))?;
//!
//! transactor
//!     .run(&Context::background(), |ctx| async move {
//!         pool.execute(&ctx, "UPDATE accounts SET balance = balance - 10 WHERE id = $1", &[1i64.into()]).await?;
//!         pool.execute(&ctx, "UPDATE accounts SET balance = balance + 10 WHERE id = $1", &[2i64.into()]).await?;
//!         Ok::<_, DbError>(())
//!     })
//!     .await?;
//! ```

pub mod carrier;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod handle;
pub mod logging;
pub mod models;
pub mod transactor;

pub use config::{CommitFailurePolicy, PoolOptions, TransactorConfig};
pub use context::Context;
pub use db::{DbPool, DbTransaction};
pub use error::{DbError, DbResult};
pub use handle::{Transaction, TransactionSource, TxHandle};
pub use models::{ConnectionConfig, DatabaseType, JsonRow, QueryParam};
pub use transactor::{Transactor, TxState};
