//! Postgres executor.
//!
//! Scopes are rendered through [`ScopeSql`]. Every round trip runs in its
//! own read-only transaction with `SET LOCAL statement_timeout`, so the
//! timeout resets when the transaction ends.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::{QueryExecutor, Record, RecordRequest};
use crate::error::ExecutionError;
use crate::scope::sql::ScopeSql;
use crate::scope::{FieldExpr, Scope};

/// Plain lower-case SQL identifiers only.
///
/// # Panics
///
/// Panics if the regex literal is invalid, which cannot happen.
#[allow(clippy::expect_used)]
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid regex literal"));

/// Executor backed by a Postgres pool.
#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl PgExecutor {
    pub fn new(pool: PgPool, statement_timeout_ms: u64) -> Self {
        Self {
            pool,
            statement_timeout_ms,
        }
    }

    async fn read_tx(&self) -> Result<Transaction<'static, Postgres>, ExecutionError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;
        Ok(tx)
    }

    async fn rows_where_in(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        table: &str,
        column: &str,
        keys: &[i64],
    ) -> Result<Vec<serde_json::Value>, ExecutionError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = rows_sql(table, column)?;
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&sql)
            .bind(keys)
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows)
    }
}

/// `SELECT row_to_json(t) FROM table t WHERE t.column = ANY($1)`.
fn rows_sql(table: &str, column: &str) -> Result<String, ExecutionError> {
    for name in [table, column] {
        if !IDENTIFIER.is_match(name) {
            return Err(ExecutionError::Unsupported(format!("invalid identifier '{name}'")));
        }
    }
    Ok(format!(
        "SELECT row_to_json(t) FROM \"{table}\" t WHERE t.\"{column}\" = ANY($1)"
    ))
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn select_ids(&self, scope: &Scope) -> Result<Vec<i64>, ExecutionError> {
        let sql = ScopeSql::new(scope).ids();
        debug!(kind = %scope.kind(), sql = %sql, "selecting ids");

        let mut tx = self.read_tx().await?;
        let ids: Vec<i64> = sqlx::query_scalar(&sql).fetch_all(&mut *tx).await?;
        tx.commit().await?;
        Ok(ids)
    }

    async fn select_letter_projection(
        &self,
        scope: &Scope,
        title: &FieldExpr,
    ) -> Result<Vec<(i64, Option<String>)>, ExecutionError> {
        let sql = ScopeSql::new(scope).letters(title);
        debug!(kind = %scope.kind(), sql = %sql, "selecting letter projection");

        let mut tx = self.read_tx().await?;
        let pairs: Vec<(i64, Option<String>)> = sqlx::query_as(&sql).fetch_all(&mut *tx).await?;
        tx.commit().await?;
        Ok(pairs)
    }

    async fn select_records(&self, request: &RecordRequest) -> Result<Vec<Record>, ExecutionError> {
        let mut tx = self.read_tx().await?;
        let rows = self
            .rows_where_in(&mut tx, &request.table, "id", &request.ids)
            .await?;
        let mut records = rows
            .into_iter()
            .map(Record::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        // One query per association, matched back to parents in memory.
        for include in &request.includes {
            let (column, keys) = include.lookup(&records);
            let children = self
                .rows_where_in(&mut tx, include.table, column, &keys)
                .await?
                .into_iter()
                .filter_map(|row| match row {
                    serde_json::Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            include.attach(&mut records, children);
        }
        tx.commit().await?;

        debug!(
            table = %request.table,
            requested = request.ids.len(),
            loaded = records.len(),
            "records loaded"
        );
        Ok(records)
    }

    async fn count(&self, scope: &Scope) -> Result<u64, ExecutionError> {
        let sql = ScopeSql::new(scope).count();
        let mut tx = self.read_tx().await?;
        let total: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(u64::try_from(total).unwrap_or_default())
    }
}
