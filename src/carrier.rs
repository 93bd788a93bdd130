//! Carries the active transaction through a [`Context`].
//!
//! Data-access code deep in a call tree can discover the transaction a
//! `Transactor::run` began without having it threaded through every signature:
//!
//! ```ignore
//! async fn rename_user(ctx: &Context, pool: &DbPool, id: i64, name: &str) -> DbResult<u64> {
//!     match carrier::extract::<DbTransaction>(ctx) {
//!         Some(tx) => tx.execute(ctx, "UPDATE users SET name = ? WHERE id = ?", &[name.into(), id.into()]).await,
//!         None => pool.execute(ctx, "UPDATE users SET name = ? WHERE id = ?", &[name.into(), id.into()]).await,
//!     }
//! }
//! ```

use crate::context::Context;
use crate::handle::{Transaction, TxHandle};

/// Private key for the transaction slot. No other module can name it.
struct TxKey;

/// Return a child of `ctx` carrying `handle`. `ctx` itself is unchanged.
pub fn inject<T: Transaction>(ctx: &Context, handle: TxHandle<T>) -> Context {
    ctx.with_value::<TxKey, TxHandle<T>>(handle)
}

/// The transaction carried by `ctx`, if any.
///
/// `None` is an ordinary outcome: data-access code may run outside a transaction.
pub fn extract<T: Transaction>(ctx: &Context) -> Option<TxHandle<T>> {
    ctx.value::<TxKey, TxHandle<T>>().cloned()
}

/// True if `ctx` carries a transaction of any type.
pub fn is_active(ctx: &Context) -> bool {
    ctx.contains::<TxKey>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbResult;
    use crate::models::{JsonRow, QueryParam};
    use async_trait::async_trait;

    struct FakeTx;

    #[async_trait]
    impl Transaction for FakeTx {
        async fn execute(&mut self, _: &Context, _: &str, _: &[QueryParam]) -> DbResult<u64> {
            Ok(0)
        }

        async fn query(&mut self, _: &Context, _: &str, _: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
            Ok(Vec::new())
        }

        async fn commit(&mut self, _: &Context) -> DbResult<()> {
            Ok(())
        }

        async fn rollback(&mut self, _: &Context) -> DbResult<()> {
            Ok(())
        }

        async fn close(self, _: &Context) -> DbResult<()> {
            Ok(())
        }
    }

    struct OtherTx;

    #[async_trait]
    impl Transaction for OtherTx {
        async fn execute(&mut self, _: &Context, _: &str, _: &[QueryParam]) -> DbResult<u64> {
            Ok(0)
        }

        async fn query(&mut self, _: &Context, _: &str, _: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
            Ok(Vec::new())
        }

        async fn commit(&mut self, _: &Context) -> DbResult<()> {
            Ok(())
        }

        async fn rollback(&mut self, _: &Context) -> DbResult<()> {
            Ok(())
        }

        async fn close(self, _: &Context) -> DbResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_extract_returns_injected_handle() {
        let ctx = Context::background();
        let handle = TxHandle::new(FakeTx);

        let tx_ctx = inject(&ctx, handle.clone());

        assert_eq!(extract::<FakeTx>(&tx_ctx), Some(handle));
        assert!(is_active(&tx_ctx));
    }

    #[test]
    fn test_extract_without_inject_is_absent() {
        let ctx = Context::background().with_value::<u8, u8>(1);
        assert!(extract::<FakeTx>(&ctx).is_none());
        assert!(!is_active(&ctx));
    }

    #[test]
    fn test_inject_leaves_parent_untouched() {
        let ctx = Context::background();
        let _tx_ctx = inject(&ctx, TxHandle::new(FakeTx));
        assert!(extract::<FakeTx>(&ctx).is_none());
    }

    #[test]
    fn test_extract_with_other_transaction_type_is_absent() {
        let tx_ctx = inject(&Context::background(), TxHandle::new(FakeTx));
        assert!(extract::<OtherTx>(&tx_ctx).is_none());
        assert!(is_active(&tx_ctx));
    }

    #[test]
    fn test_unrelated_layers_keep_handle_visible() {
        struct RequestId;
        let handle = TxHandle::new(FakeTx);
        let tx_ctx = inject(&Context::background(), handle.clone())
            .with_value::<RequestId, String>("req-1".to_string());

        assert_eq!(extract::<FakeTx>(&tx_ctx), Some(handle));
    }
}
