//! Persisted queries.
//!
//! A stored query is its descriptor plus bookkeeping. Result ids and loaded
//! records are never stored; they are rebuilt when a query is resumed.
//!
//! Bookkeeping updates (`touch`) are last-write-wins. Losing an increment
//! of `access_count` under concurrent requests is acceptable.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub use memory::MemoryQueryStore;
pub use postgres::PgQueryStore;

use crate::descriptor::QueryDescriptor;
use crate::error::QueryResult;
use crate::kinds::EntityKind;

/// A persisted query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    pub id: Uuid,
    pub kind: EntityKind,
    /// Canonical descriptor JSON; unique per store.
    pub description: String,
    pub descriptor: QueryDescriptor,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl QueryRecord {
    pub(crate) fn new(descriptor: &QueryDescriptor) -> QueryResult<Self> {
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(),
            kind: descriptor.kind,
            description: descriptor.description()?,
            descriptor: descriptor.clone(),
            access_count: 0,
            created_at: now,
            last_used: now,
        })
    }
}

/// Storage for persisted queries.
#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn find(&self, id: Uuid) -> QueryResult<Option<QueryRecord>>;

    /// Look up a record by its canonical description.
    async fn find_by_description(&self, description: &str) -> QueryResult<Option<QueryRecord>>;

    /// Store `descriptor`. If an identical descriptor is already stored,
    /// that record is returned instead of a new one.
    async fn insert(&self, descriptor: &QueryDescriptor) -> QueryResult<QueryRecord>;

    /// Bump `access_count` and `last_used`. `None` if the record is gone.
    async fn touch(&self, id: Uuid) -> QueryResult<Option<QueryRecord>>;

    /// Delete records not used since `older_than`; returns how many.
    async fn cleanup(&self, older_than: DateTime<Utc>) -> QueryResult<u64>;
}
