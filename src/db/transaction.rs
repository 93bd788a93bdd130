//! sqlx-backed transactions.
//!
//! A [`DbTransaction`] owns one pooled connection on which it has issued
//! `BEGIN`. Owning the connection (rather than an `sqlx::Transaction`) makes
//! releasing it an explicit step: a connection whose transaction was resolved
//! goes back to the pool, one whose state is unknown is closed.
//!
//! `BEGIN`, statements and `COMMIT` are bounded by the context deadline.
//! `ROLLBACK` and release are not: an expired context must still undo its
//! writes. A statement cut off by the deadline leaves the connection in an
//! unknown state, so the transaction refuses further use and its connection
//! is closed on release.
//!
//! Dropping a `DbTransaction` that is still open detaches its connection from
//! the pool, so an unresolved transaction is never handed to another caller.

use crate::context::Context;
use crate::db::macros::bind_params;
use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::handle::Transaction;
use crate::models::{DatabaseType, JsonRow, QueryParam};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::pool::PoolConnection;
use sqlx::{MySql, Postgres, Sqlite};
use std::future::Future;
use std::time::Instant;
use tracing::{debug, warn};

/// A pooled connection of one of the supported backends.
pub(crate) enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl DbConnection {
    pub(crate) fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Run a parameterless control statement such as `BEGIN`.
    async fn control(&mut self, sql: &'static str) -> DbResult<()> {
        use sqlx::Executor;
        match self {
            DbConnection::MySql(conn) => Executor::execute(&mut **conn, sql).await.map(|_| ()),
            DbConnection::Postgres(conn) => Executor::execute(&mut **conn, sql).await.map(|_| ()),
            DbConnection::SQLite(conn) => Executor::execute(&mut **conn, sql).await.map(|_| ()),
        }
        .map_err(DbError::from)
    }

    pub(crate) async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let result = match self {
            DbConnection::MySql(conn) => {
                bind_params!(sql, params, bind_mysql_param)
                    .execute(&mut **conn)
                    .await
                    .map(|r| r.rows_affected())
            }
            DbConnection::Postgres(conn) => {
                bind_params!(sql, params, bind_postgres_param)
                    .execute(&mut **conn)
                    .await
                    .map(|r| r.rows_affected())
            }
            DbConnection::SQLite(conn) => {
                bind_params!(sql, params, bind_sqlite_param)
                    .execute(&mut **conn)
                    .await
                    .map(|r| r.rows_affected())
            }
        };
        result.map_err(DbError::from)
    }

    pub(crate) async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        let rows = match self {
            DbConnection::MySql(conn) => {
                let rows: Vec<sqlx::mysql::MySqlRow> = bind_params!(sql, params, bind_mysql_param)
                    .fetch(&mut **conn)
                    .try_collect()
                    .await?;
                rows.iter().map(|r| r.to_json_map()).collect()
            }
            DbConnection::Postgres(conn) => {
                let rows: Vec<sqlx::postgres::PgRow> =
                    bind_params!(sql, params, bind_postgres_param)
                        .fetch(&mut **conn)
                        .try_collect()
                        .await?;
                rows.iter().map(|r| r.to_json_map()).collect()
            }
            DbConnection::SQLite(conn) => {
                let rows: Vec<sqlx::sqlite::SqliteRow> =
                    bind_params!(sql, params, bind_sqlite_param)
                        .fetch(&mut **conn)
                        .try_collect()
                        .await?;
                rows.iter().map(|r| r.to_json_map()).collect()
            }
        };
        Ok(rows)
    }

    /// Close the connection instead of returning it to the pool.
    async fn close(self) -> DbResult<()> {
        match self {
            DbConnection::MySql(conn) => conn.close().await,
            DbConnection::Postgres(conn) => conn.close().await,
            DbConnection::SQLite(conn) => conn.close().await,
        }
        .map_err(DbError::from)
    }

    /// Remove the connection from the pool; dropping the result closes it.
    fn detach(self) {
        match self {
            DbConnection::MySql(conn) => drop(conn.detach()),
            DbConnection::Postgres(conn) => drop(conn.detach()),
            DbConnection::SQLite(conn) => drop(conn.detach()),
        }
    }
}

/// Bound `fut` by the context deadline, if there is one.
pub(crate) async fn with_deadline<T, F>(ctx: &Context, operation: &str, fut: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    let Some(deadline) = ctx.deadline() else {
        return fut.await;
    };
    let start = Instant::now();
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(DbError::timeout(
            operation,
            start.elapsed().as_millis() as u64,
        )),
    }
}

/// Where the transaction on the owned connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Resolved,
    /// A statement was interrupted; the connection state is unknown.
    Broken,
}

/// A transaction on a dedicated pooled connection.
pub struct DbTransaction {
    conn: Option<DbConnection>,
    status: Status,
}

impl DbTransaction {
    /// Issue `BEGIN` on `conn`.
    pub(crate) async fn begin(ctx: &Context, conn: DbConnection) -> DbResult<Self> {
        let mut tx = Self {
            conn: Some(conn),
            status: Status::Open,
        };
        // A failed BEGIN leaves `tx` unresolved, so dropping it detaches the connection.
        tx.control(ctx, "BEGIN").await?;
        Ok(tx)
    }

    pub fn db_type(&self) -> Option<DatabaseType> {
        self.conn.as_ref().map(DbConnection::db_type)
    }

    fn conn(&mut self) -> DbResult<&mut DbConnection> {
        if self.status == Status::Broken {
            return Err(DbError::connection(
                "A previous statement timed out and left the connection in an unknown state",
                "Roll back and retry the unit of work",
            ));
        }
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::internal("Transaction connection already released"))
    }

    fn note_interrupt<T>(&mut self, result: &DbResult<T>) {
        if matches!(result, Err(DbError::Timeout { .. })) {
            self.status = Status::Broken;
        }
    }

    async fn control(&mut self, ctx: &Context, sql: &'static str) -> DbResult<()> {
        let conn = self.conn()?;
        let result = with_deadline(ctx, sql, conn.control(sql)).await;
        self.note_interrupt(&result);
        result
    }
}

#[async_trait]
impl Transaction for DbTransaction {
    async fn execute(
        &mut self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let conn = self.conn()?;
        let result = with_deadline(ctx, "execute in transaction", conn.execute(sql, params)).await;
        self.note_interrupt(&result);
        let rows_affected = result?;

        debug!(sql = %sql, rows_affected = rows_affected, "Executed in transaction");
        Ok(rows_affected)
    }

    async fn query(
        &mut self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>> {
        let conn = self.conn()?;
        let result = with_deadline(ctx, "query in transaction", conn.query(sql, params)).await;
        self.note_interrupt(&result);
        let rows = result?;

        debug!(sql = %sql, row_count = rows.len(), "Queried in transaction");
        Ok(rows)
    }

    async fn commit(&mut self, ctx: &Context) -> DbResult<()> {
        self.control(ctx, "COMMIT").await?;
        self.status = Status::Resolved;
        Ok(())
    }

    async fn rollback(&mut self, _ctx: &Context) -> DbResult<()> {
        self.conn()?.control("ROLLBACK").await?;
        self.status = Status::Resolved;
        Ok(())
    }

    async fn close(mut self, _ctx: &Context) -> DbResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if self.status == Status::Resolved {
            // Dropping a pooled connection hands it back to the pool.
            drop(conn);
            Ok(())
        } else {
            debug!(db_type = %conn.db_type(), "Closing connection with unresolved transaction");
            conn.close().await
        }
    }
}

impl Drop for DbTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.status != Status::Resolved {
                warn!(
                    db_type = %conn.db_type(),
                    "Transaction dropped while open, detaching its connection"
                );
                conn.detach();
            }
        }
    }
}
