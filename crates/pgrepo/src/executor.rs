//! The executor boundary: one `execute(statement, parameters)` operation.
//!
//! Everything above this module speaks named placeholders and field maps; the
//! implementations here rewrite placeholders to PostgreSQL's positional form,
//! bind values through [`SqlValue`], and decode rows with [`row_to_field_map`].

use crate::builder::Statement;
use crate::config::RepoConfig;
use crate::error::{OrmError, OrmResult};
use crate::params::{Params, bind_positional};
use crate::value::{FieldMap, SqlValue, row_to_field_map};
use futures_util::{TryStreamExt, pin_mut};

/// Rows returned by a statement plus the number of rows it touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<FieldMap>,
    pub affected_rows: u64,
}

impl QueryOutput {
    pub fn new(rows: Vec<FieldMap>, affected_rows: u64) -> Self {
        Self {
            rows,
            affected_rows,
        }
    }

    /// Output of a statement that returned its rows (`affected_rows == rows.len()`).
    pub fn from_rows(rows: Vec<FieldMap>) -> Self {
        let affected_rows = rows.len() as u64;
        Self::new(rows, affected_rows)
    }

    /// First row, if any.
    pub fn first(self) -> Option<FieldMap> {
        self.rows.into_iter().next()
    }
}

/// A database handle that can run one statement at a time.
///
/// Implemented for plain connections and transactions alike, so manager methods can
/// be composed with or without a surrounding transaction.
pub trait Executor: Send + Sync {
    /// Execute `sql` with its named parameters.
    fn execute(
        &self,
        sql: &str,
        params: &Params,
    ) -> impl std::future::Future<Output = OrmResult<QueryOutput>> + Send;
}

impl<E: Executor> Executor for &E {
    fn execute(
        &self,
        sql: &str,
        params: &Params,
    ) -> impl std::future::Future<Output = OrmResult<QueryOutput>> + Send {
        (*self).execute(sql, params)
    }
}

async fn execute_postgres<C>(client: &C, sql: &str, params: &Params) -> OrmResult<QueryOutput>
where
    C: tokio_postgres::GenericClient + Sync,
{
    let (positional, values) = bind_positional(sql, params)?;
    let binds: Vec<SqlValue<'_>> = values.into_iter().map(SqlValue).collect();

    let stream = client
        .query_raw(positional.as_str(), binds.iter())
        .await
        .map_err(OrmError::from_db_error)?;
    pin_mut!(stream);

    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await.map_err(OrmError::from_db_error)? {
        rows.push(row_to_field_map(&row)?);
    }
    let affected_rows = stream.rows_affected().unwrap_or(rows.len() as u64);

    Ok(QueryOutput::new(rows, affected_rows))
}

impl Executor for tokio_postgres::Client {
    async fn execute(&self, sql: &str, params: &Params) -> OrmResult<QueryOutput> {
        execute_postgres(self, sql, params).await
    }
}

impl Executor for tokio_postgres::Transaction<'_> {
    async fn execute(&self, sql: &str, params: &Params) -> OrmResult<QueryOutput> {
        execute_postgres(self, sql, params).await
    }
}

// ===== deadpool-postgres support =====

#[cfg(feature = "pool")]
impl Executor for deadpool_postgres::Client {
    async fn execute(&self, sql: &str, params: &Params) -> OrmResult<QueryOutput> {
        // Delegate to the deref target (ClientWrapper -> tokio_postgres::Client).
        let client: &tokio_postgres::Client = self;
        execute_postgres(client, sql, params).await
    }
}

#[cfg(feature = "pool")]
impl Executor for deadpool_postgres::Transaction<'_> {
    async fn execute(&self, sql: &str, params: &Params) -> OrmResult<QueryOutput> {
        let tx: &tokio_postgres::Transaction<'_> = self;
        execute_postgres(tx, sql, params).await
    }
}

/// Leading keyword of a statement, for log fields.
pub(crate) fn statement_kind(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("")
}

fn truncate_sql(sql: &str, max: Option<usize>) -> String {
    match max {
        Some(max) if sql.len() > max => {
            let mut end = max;
            while !sql.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &sql[..end])
        }
        _ => sql.to_string(),
    }
}

/// Log and execute a built statement. Parameter values are never logged.
pub(crate) async fn run<C: Executor>(
    conn: &C,
    stmt: &Statement,
    config: &RepoConfig,
) -> OrmResult<QueryOutput> {
    let logged = truncate_sql(stmt.sql(), config.max_logged_sql_length);
    #[cfg(feature = "tracing")]
    tracing::debug!(
        target: "pgrepo.sql",
        kind = statement_kind(stmt.sql()),
        param_count = stmt.params().len(),
        sql = %logged,
    );
    #[cfg(not(feature = "tracing"))]
    let _ = logged;

    conn.execute(stmt.sql(), stmt.params()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_sql("SELECT 1", Some(100)), "SELECT 1");
        assert_eq!(truncate_sql("SELECT 1", None), "SELECT 1");
        assert_eq!(truncate_sql("SELECT ü", Some(8)), "SELECT ...");
    }

    #[test]
    fn statement_kind_is_first_keyword() {
        assert_eq!(statement_kind("  UPDATE t SET a = 1"), "UPDATE");
        assert_eq!(statement_kind(""), "");
    }

    #[test]
    fn output_from_rows_counts_rows() {
        let out = QueryOutput::from_rows(vec![FieldMap::new(), FieldMap::new()]);
        assert_eq!(out.affected_rows, 2);
        assert!(out.first().is_some());
    }
}
