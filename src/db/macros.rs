//! Database dispatch macros for reducing code duplication.
//!
//! The sqlx adapter has one code path per backend that differs only in the
//! binder used for parameters. These macros keep those paths short while
//! leaving the per-backend `match` visible at the call site.

/// Build a `sqlx::query` for `$sql` with every parameter bound through `$bind`.
///
/// # Example
///
/// ```ignore
/// let query = bind_params!(sql, params, bind_sqlite_param);
/// query.execute(&mut *conn).await?;
/// ```
macro_rules! bind_params {
    ($sql:expr, $params:expr, $bind:path) => {{
        let mut query = sqlx::query($sql);
        for param in $params {
            query = $bind(query, param);
        }
        query
    }};
}

pub(crate) use bind_params;
