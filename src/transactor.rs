//! Transaction executor.
//!
//! [`Transactor::run`] executes a unit of work inside a database transaction:
//!
//! 1. begin a transaction on the pool
//! 2. inject its handle into a child context
//! 3. invoke the work exactly once with that context
//! 4. commit on `Ok`, roll back on `Err` or panic
//! 5. release the connection, whatever happened before
//!
//! Only the work's own error, a begin failure, or (when configured) a commit
//! failure reach the caller. Rollback and release failures are logged.

use crate::carrier;
use crate::config::{CommitFailurePolicy, TransactorConfig};
use crate::context::Context;
use crate::error::{DbError, DbResult};
use crate::handle::{Transaction, TransactionSource, TxOwner};
use futures_util::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Lifecycle of a single `run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Begun,
    Committing,
    RollingBack,
    Released,
    Terminal,
}

impl TxState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: TxState) -> bool {
        use TxState::*;
        matches!(
            (self, next),
            (Idle, Begun)
                | (Begun, Committing)
                | (Begun, RollingBack)
                | (Committing, Released)
                | (RollingBack, Released)
                | (Released, Terminal)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Begun => "begun",
            Self::Committing => "committing",
            Self::RollingBack => "rolling_back",
            Self::Released => "released",
            Self::Terminal => "terminal",
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Lifecycle<'a> {
    transaction_id: &'a str,
    state: TxState,
}

impl<'a> Lifecycle<'a> {
    fn new(transaction_id: &'a str) -> Self {
        Self {
            transaction_id,
            state: TxState::Idle,
        }
    }

    fn advance(&mut self, next: TxState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transaction state change {} -> {}",
            self.state,
            next
        );
        debug!(
            transaction_id = %self.transaction_id,
            from = %self.state,
            to = %next,
            "Transaction state changed"
        );
        self.state = next;
    }
}

/// Runs units of work inside transactions begun on `P`.
///
/// Holds no per-call state, so one instance can serve concurrent callers;
/// each `run` begins its own transaction.
#[derive(Debug, Clone)]
pub struct Transactor<P> {
    pool: P,
    config: TransactorConfig,
}

impl<P: TransactionSource> Transactor<P> {
    /// Create a transactor with the default configuration.
    ///
    /// Fails with [`DbError::InvalidConfiguration`] when no pool is given.
    pub fn new(pool: Option<P>) -> DbResult<Self> {
        Self::with_config(pool, TransactorConfig::default())
    }

    pub fn with_config(pool: Option<P>, config: TransactorConfig) -> DbResult<Self> {
        let pool = pool.ok_or_else(|| {
            DbError::invalid_configuration("a database connection pool must be provided")
        })?;
        Ok(Self { pool, config })
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn config(&self) -> &TransactorConfig {
        &self.config
    }

    /// Run `work` inside a new transaction.
    ///
    /// `work` receives a child of `ctx` from which [`carrier::extract`]
    /// returns the transaction. Its error is returned unchanged after a
    /// rollback. A panic in `work` rolls back, releases the connection, and
    /// then resumes unwinding.
    ///
    /// Fails without invoking `work` if the transaction cannot begin, or if
    /// `ctx` already carries a transaction.
    pub async fn run<F, Fut, T, E>(&self, ctx: &Context, work: F) -> Result<T, E>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError> + fmt::Display,
    {
        if carrier::is_active(ctx) {
            return Err(DbError::invalid_input(
                "Nested transactions are not supported: the context already carries an active transaction",
            )
            .into());
        }

        let tx = match self.pool.begin(ctx).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(stage = "begin", error = %e, "Failed to begin transaction");
                return Err(DbError::transaction_begin(e).into());
            }
        };

        let owner = TxOwner::new(tx);
        let handle = owner.handle().clone();
        let mut lifecycle = Lifecycle::new(handle.id());
        lifecycle.advance(TxState::Begun);
        info!(transaction_id = %handle.id(), "Transaction started");

        let span = info_span!("transaction", transaction_id = %handle.id());
        let tx_ctx = carrier::inject(ctx, handle.clone());
        let outcome = AssertUnwindSafe(async move { work(tx_ctx).await })
            .catch_unwind()
            .instrument(span)
            .await;

        // Only `owner` can take the transaction out, so this fails only if
        // the handle's slot was emptied some other way.
        let mut tx = match owner.finish().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(
                    transaction_id = %handle.id(),
                    state = %lifecycle.state,
                    error = %e,
                    "Transaction could not be finished, nothing to commit or release"
                );
                return match outcome {
                    Ok(Ok(_)) => Err(e.into()),
                    Ok(Err(err)) => Err(err),
                    Err(payload) => panic::resume_unwind(payload),
                };
            }
        };

        match outcome {
            Ok(Ok(value)) => {
                let committed = self.commit(&mut tx, ctx, &mut lifecycle).await;
                self.release(tx, ctx, &mut lifecycle).await;
                match committed {
                    Err(e) if self.config.commit_failure == CommitFailurePolicy::Propagate => {
                        Err(DbError::transaction_commit(handle.id(), e).into())
                    }
                    _ => Ok(value),
                }
            }
            Ok(Err(err)) => {
                debug!(
                    transaction_id = %handle.id(),
                    error = %err,
                    "Unit of work failed"
                );
                self.roll_back(&mut tx, ctx, &mut lifecycle).await;
                self.release(tx, ctx, &mut lifecycle).await;
                Err(err)
            }
            Err(payload) => {
                warn!(transaction_id = %handle.id(), "Unit of work panicked");
                self.roll_back(&mut tx, ctx, &mut lifecycle).await;
                self.release(tx, ctx, &mut lifecycle).await;
                panic::resume_unwind(payload)
            }
        }
    }

    async fn commit(
        &self,
        tx: &mut P::Tx,
        ctx: &Context,
        lifecycle: &mut Lifecycle<'_>,
    ) -> DbResult<()> {
        lifecycle.advance(TxState::Committing);
        match tx.commit(ctx).await {
            Ok(()) => {
                info!(transaction_id = %lifecycle.transaction_id, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                warn!(
                    transaction_id = %lifecycle.transaction_id,
                    stage = "commit",
                    policy = %self.config.commit_failure,
                    error = %e,
                    "Failed to commit transaction"
                );
                Err(e)
            }
        }
    }

    async fn roll_back(&self, tx: &mut P::Tx, ctx: &Context, lifecycle: &mut Lifecycle<'_>) {
        lifecycle.advance(TxState::RollingBack);
        match tx.rollback(ctx).await {
            Ok(()) => info!(transaction_id = %lifecycle.transaction_id, "Transaction rolled back"),
            Err(e) => warn!(
                transaction_id = %lifecycle.transaction_id,
                stage = "rollback",
                error = %e,
                "Failed to roll back transaction"
            ),
        }
    }

    async fn release(&self, tx: P::Tx, ctx: &Context, lifecycle: &mut Lifecycle<'_>) {
        if let Err(e) = tx.close(ctx).await {
            warn!(
                transaction_id = %lifecycle.transaction_id,
                stage = "release",
                error = %e,
                "Failed to release transaction connection"
            );
        }
        lifecycle.advance(TxState::Released);
        lifecycle.advance(TxState::Terminal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JsonRow, QueryParam};
    use async_trait::async_trait;

    struct NeverPool;

    struct NeverTx;

    #[async_trait]
    impl Transaction for NeverTx {
        async fn execute(&mut self, _: &Context, _: &str, _: &[QueryParam]) -> DbResult<u64> {
            unreachable!()
        }

        async fn query(&mut self, _: &Context, _: &str, _: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
            unreachable!()
        }

        async fn commit(&mut self, _: &Context) -> DbResult<()> {
            unreachable!()
        }

        async fn rollback(&mut self, _: &Context) -> DbResult<()> {
            unreachable!()
        }

        async fn close(self, _: &Context) -> DbResult<()> {
            unreachable!()
        }
    }

    #[async_trait]
    impl TransactionSource for NeverPool {
        type Tx = NeverTx;

        async fn begin(&self, _: &Context) -> DbResult<NeverTx> {
            Err(DbError::connection("refused", "start the database"))
        }
    }

    #[test]
    fn test_missing_pool_is_invalid_configuration() {
        let result = Transactor::<NeverPool>::new(None);
        assert!(matches!(result, Err(DbError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_with_config_keeps_policy() {
        let transactor = Transactor::with_config(
            Some(NeverPool),
            TransactorConfig::default().propagate_commit_failures(),
        )
        .unwrap();
        assert_eq!(
            transactor.config().commit_failure,
            CommitFailurePolicy::Propagate
        );
    }

    #[tokio::test]
    async fn test_begin_failure_skips_work() {
        let transactor = Transactor::new(Some(NeverPool)).unwrap();
        let mut invoked = false;

        let result: Result<(), DbError> = transactor
            .run(&Context::background(), |_ctx| {
                invoked = true;
                async { Ok(()) }
            })
            .await;

        assert!(!invoked);
        let err = result.unwrap_err();
        assert!(err.is_begin_failure());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_state_transitions() {
        use TxState::*;
        assert!(Idle.can_advance_to(Begun));
        assert!(Begun.can_advance_to(Committing));
        assert!(Begun.can_advance_to(RollingBack));
        assert!(Committing.can_advance_to(Released));
        assert!(RollingBack.can_advance_to(Released));
        assert!(Released.can_advance_to(Terminal));

        assert!(!Committing.can_advance_to(RollingBack));
        assert!(!RollingBack.can_advance_to(Committing));
        assert!(!Terminal.can_advance_to(Begun));
        assert!(!Idle.can_advance_to(Committing));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TxState::RollingBack.to_string(), "rolling_back");
        assert_eq!(TxState::Terminal.to_string(), "terminal");
    }
}
