use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::{QueryRecord, QueryStore};
use crate::descriptor::QueryDescriptor;
use crate::error::QueryResult;

/// In-process store keyed by id, with a description index.
#[derive(Debug, Default)]
pub struct MemoryQueryStore {
    records: DashMap<Uuid, QueryRecord>,
    by_description: DashMap<String, Uuid>,
}

impl MemoryQueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Overwrite `last_used`, for exercising cleanup.
    pub fn backdate(&self, id: Uuid, last_used: DateTime<Utc>) {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.last_used = last_used;
        }
    }
}

#[async_trait]
impl QueryStore for MemoryQueryStore {
    async fn find(&self, id: Uuid) -> QueryResult<Option<QueryRecord>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn find_by_description(&self, description: &str) -> QueryResult<Option<QueryRecord>> {
        let Some(id) = self.by_description.get(description).map(|id| *id) else {
            return Ok(None);
        };
        self.find(id).await
    }

    async fn insert(&self, descriptor: &QueryDescriptor) -> QueryResult<QueryRecord> {
        let record = QueryRecord::new(descriptor)?;
        match self.by_description.entry(record.description.clone()) {
            Entry::Occupied(mut existing) => {
                if let Some(found) = self.records.get(existing.get()) {
                    return Ok(found.clone());
                }
                // Index entry left behind by cleanup; replace it.
                existing.insert(record.id);
            }
            Entry::Vacant(slot) => {
                slot.insert(record.id);
            }
        }
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn touch(&self, id: Uuid) -> QueryResult<Option<QueryRecord>> {
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(None);
        };
        record.access_count += 1;
        record.last_used = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> QueryResult<u64> {
        let before = self.records.len();
        self.records.retain(|_, record| record.last_used >= older_than);
        self.by_description
            .retain(|_, id| self.records.contains_key(id));
        Ok((before - self.records.len()) as u64)
    }
}
