//! Transaction capabilities and the shared handle placed in a [`Context`].
//!
//! The executor never talks to a concrete driver. It needs two capabilities:
//! - [`TransactionSource`]: something that can begin a transaction (a pool).
//! - [`Transaction`]: the in-progress transaction itself.
//!
//! The `db` module implements both on top of sqlx; tests implement them with
//! counting fakes.

use crate::context::Context;
use crate::error::{DbError, DbResult};
use crate::models::{JsonRow, QueryParam};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// An in-progress database transaction.
///
/// Every method receives the caller's context so implementations can honour
/// its deadline. `rollback` and `close` are the exceptions: undoing the
/// writes and releasing the underlying connection must always be attempted.
#[async_trait]
pub trait Transaction: Send + 'static {
    /// Execute a statement and return the number of affected rows.
    async fn execute(
        &mut self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64>;

    /// Run a query and return all rows.
    async fn query(
        &mut self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>>;

    async fn commit(&mut self, ctx: &Context) -> DbResult<()>;

    async fn rollback(&mut self, ctx: &Context) -> DbResult<()>;

    /// Release the underlying connection.
    async fn close(self, ctx: &Context) -> DbResult<()>;
}

/// A source of new transactions, typically a connection pool.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    type Tx: Transaction;

    async fn begin(&self, ctx: &Context) -> DbResult<Self::Tx>;
}

#[async_trait]
impl<P: TransactionSource> TransactionSource for Arc<P> {
    type Tx = P::Tx;

    async fn begin(&self, ctx: &Context) -> DbResult<Self::Tx> {
        (**self).begin(ctx).await
    }
}

struct Shared<T> {
    id: String,
    started_at: DateTime<Utc>,
    tx: Mutex<Option<T>>,
}

/// Shared handle to one active transaction.
///
/// Clones refer to the same transaction. Data-access code uses a clone to run
/// statements; only the [`TxOwner`] created with it can finish it.
/// Once finished, statements through any clone fail with
/// [`DbError::Transaction`].
pub struct TxHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Transaction> TxHandle<T> {
    pub(crate) fn new(tx: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: generate_transaction_id(),
                started_at: Utc::now(),
                tx: Mutex::new(Some(tx)),
            }),
        }
    }

    /// Unique transaction identifier, also used as the tracing field.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    /// True until the executor commits or rolls back.
    pub async fn is_active(&self) -> bool {
        self.shared.tx.lock().await.is_some()
    }

    /// Execute a statement inside this transaction.
    pub async fn execute(&self, ctx: &Context, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let mut guard = self.shared.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(|| self.inactive())?;
        tx.execute(ctx, sql, params).await
    }

    /// Run a query inside this transaction.
    pub async fn query(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>> {
        let mut guard = self.shared.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(|| self.inactive())?;
        tx.query(ctx, sql, params).await
    }

    fn inactive(&self) -> DbError {
        DbError::transaction("Transaction is no longer active", self.id())
    }
}

/// The executor's side of a [`TxHandle`].
///
/// Created together with the handle, not `Clone`, and consumed by
/// [`TxOwner::finish`]: the transaction is taken out exactly once.
pub(crate) struct TxOwner<T> {
    handle: TxHandle<T>,
}

impl<T: Transaction> TxOwner<T> {
    pub(crate) fn new(tx: T) -> Self {
        Self {
            handle: TxHandle::new(tx),
        }
    }

    pub(crate) fn handle(&self) -> &TxHandle<T> {
        &self.handle
    }

    /// Take the transaction out so it can be committed or rolled back.
    ///
    /// Waits for any statement still running through a clone. Afterwards
    /// every clone reports the transaction as inactive.
    pub(crate) async fn finish(self) -> DbResult<T> {
        let taken = self.handle.shared.tx.lock().await.take();
        taken.ok_or_else(|| {
            DbError::internal(format!(
                "Transaction {} has no connection left to finish",
                self.handle.id()
            ))
        })
    }
}

impl<T> Clone for TxHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Handles are equal when they refer to the same transaction.
impl<T> PartialEq for TxHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T> Eq for TxHandle<T> {}

impl<T> fmt::Debug for TxHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("id", &self.shared.id)
            .field("started_at", &self.shared.started_at)
            .finish()
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
