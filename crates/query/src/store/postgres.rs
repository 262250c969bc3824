use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{QueryRecord, QueryStore};
use crate::descriptor::QueryDescriptor;
use crate::error::{ExecutionError, QueryResult};
use crate::kinds::EntityKind;

/// Row shape of `query_records`.
#[derive(Debug, Clone, sqlx::FromRow)]
struct QueryRecordRow {
    id: Uuid,
    kind: String,
    description: String,
    descriptor: serde_json::Value,
    access_count: i64,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

impl TryFrom<QueryRecordRow> for QueryRecord {
    type Error = ExecutionError;

    fn try_from(row: QueryRecordRow) -> Result<Self, Self::Error> {
        let kind: EntityKind = row
            .kind
            .parse()
            .map_err(|e| ExecutionError::Corrupt(format!("query record {}: {e}", row.id)))?;
        let descriptor: QueryDescriptor = serde_json::from_value(row.descriptor).map_err(|e| {
            ExecutionError::Corrupt(format!("query record {} descriptor: {e}", row.id))
        })?;
        Ok(Self {
            id: row.id,
            kind,
            description: row.description,
            descriptor,
            access_count: row.access_count,
            created_at: row.created_at,
            last_used: row.last_used,
        })
    }
}

fn decode(row: Option<QueryRecordRow>) -> QueryResult<Option<QueryRecord>> {
    Ok(row.map(QueryRecord::try_from).transpose()?)
}

/// Store backed by the `query_records` table.
#[derive(Clone)]
pub struct PgQueryStore {
    pool: PgPool,
}

impl PgQueryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryStore for PgQueryStore {
    async fn find(&self, id: Uuid) -> QueryResult<Option<QueryRecord>> {
        let row = sqlx::query_as::<_, QueryRecordRow>("SELECT * FROM query_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        decode(row)
    }

    async fn find_by_description(&self, description: &str) -> QueryResult<Option<QueryRecord>> {
        let row = sqlx::query_as::<_, QueryRecordRow>(
            "SELECT * FROM query_records WHERE description = $1",
        )
        .bind(description)
        .fetch_optional(&self.pool)
        .await?;
        decode(row)
    }

    async fn insert(&self, descriptor: &QueryDescriptor) -> QueryResult<QueryRecord> {
        let record = QueryRecord::new(descriptor)?;
        let json = serde_json::to_value(&record.descriptor)?;

        // A concurrent insert of the same description wins; its row is
        // returned unchanged.
        let row = sqlx::query_as::<_, QueryRecordRow>(
            r#"
            INSERT INTO query_records (id, kind, description, descriptor, access_count, created_at, last_used)
            VALUES ($1, $2, $3, $4, 0, $5, $5)
            ON CONFLICT (description) DO UPDATE SET description = EXCLUDED.description
            RETURNING *
            "#,
        )
        .bind(record.id)
        .bind(record.kind.as_str())
        .bind(&record.description)
        .bind(&json)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;

        let stored = QueryRecord::try_from(row)?;
        debug!(
            id = %stored.id,
            kind = %stored.kind,
            reused = stored.id != record.id,
            "query record stored"
        );
        Ok(stored)
    }

    async fn touch(&self, id: Uuid) -> QueryResult<Option<QueryRecord>> {
        let row = sqlx::query_as::<_, QueryRecordRow>(
            r#"
            UPDATE query_records
            SET access_count = access_count + 1, last_used = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        decode(row)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> QueryResult<u64> {
        let result = sqlx::query("DELETE FROM query_records WHERE last_used < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::ValidatedParams;

    fn row(kind: &str, descriptor: serde_json::Value) -> QueryRecordRow {
        QueryRecordRow {
            id: Uuid::now_v7(),
            kind: kind.to_string(),
            description: descriptor.to_string(),
            descriptor,
            access_count: 3,
            created_at: Utc::now(),
            last_used: Utc::now(),
        }
    }

    #[test]
    fn rows_decode_into_records() {
        let descriptor = QueryDescriptor::new(EntityKind::Name, ValidatedParams::default());
        let json = serde_json::to_value(&descriptor).unwrap();
        let record = QueryRecord::try_from(row("Name", json)).unwrap();
        assert_eq!(record.kind, EntityKind::Name);
        assert_eq!(record.descriptor, descriptor);
        assert_eq!(record.access_count, 3);
    }

    #[test]
    fn undecodable_rows_are_corrupt() {
        let err = QueryRecord::try_from(row("Mushroom", serde_json::json!({}))).unwrap_err();
        assert!(matches!(err, ExecutionError::Corrupt(_)));

        let err = QueryRecord::try_from(row("Name", serde_json::json!({"kind": 4}))).unwrap_err();
        assert!(matches!(err, ExecutionError::Corrupt(_)));
    }
}
