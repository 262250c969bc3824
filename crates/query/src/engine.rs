//! Entry points: validate, build, persist and resume queries.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::coerce::{self, Coercion};
use crate::config::EngineLimits;
use crate::descriptor::QueryDescriptor;
use crate::error::{QueryError, QueryResult};
use crate::executor::QueryExecutor;
use crate::filters::ContentFilterPrefs;
use crate::instance::QueryInstance;
use crate::kinds::EntityKind;
use crate::schema::{RawParams, ValidatedParams};
use crate::store::{QueryRecord, QueryStore};

/// The query engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct QueryEngine {
    catalog: Arc<Catalog>,
    executor: Arc<dyn QueryExecutor>,
    store: Arc<dyn QueryStore>,
    limits: EngineLimits,
}

impl QueryEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        executor: Arc<dyn QueryExecutor>,
        store: Arc<dyn QueryStore>,
        limits: EngineLimits,
    ) -> Self {
        Self {
            catalog,
            executor,
            store,
            limits,
        }
    }

    /// An engine over the built-in catalog.
    pub fn standard(
        executor: Arc<dyn QueryExecutor>,
        store: Arc<dyn QueryStore>,
        limits: EngineLimits,
    ) -> QueryResult<Self> {
        let catalog = Catalog::standard()?;
        Ok(Self::new(Arc::new(catalog), executor, store, limits))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    /// Validate raw parameters against the kind's schema.
    pub fn validate(&self, kind: EntityKind, raw: &RawParams) -> QueryResult<ValidatedParams> {
        let schema = self.catalog.schema(kind)?;
        Ok(schema.validate(raw, self.catalog.as_ref(), &self.limits)?)
    }

    /// An unbuilt instance for `descriptor`.
    pub fn instance(&self, descriptor: QueryDescriptor) -> QueryInstance {
        QueryInstance::new(
            descriptor,
            Arc::clone(&self.catalog),
            Arc::clone(&self.executor),
            self.limits,
        )
    }

    /// Validate and build a query without persisting it.
    pub fn build(
        &self,
        kind: EntityKind,
        raw: &RawParams,
        prefs: &ContentFilterPrefs,
    ) -> QueryResult<QueryInstance> {
        let params = self.validate(kind, raw)?;
        let mut instance = self.instance(QueryDescriptor::new(kind, params).with_filters(prefs));
        instance.build()?;
        Ok(instance)
    }

    /// Validate and build a query, then reuse the persisted record for an
    /// identical query or store a new one.
    pub async fn create_or_lookup(
        &self,
        kind: EntityKind,
        raw: &RawParams,
        prefs: &ContentFilterPrefs,
    ) -> QueryResult<QueryInstance> {
        let mut instance = self.build(kind, raw, prefs)?;
        let record = self.persist(instance.descriptor()).await?;
        instance.set_record_id(record.id);
        Ok(instance)
    }

    async fn persist(&self, descriptor: &QueryDescriptor) -> QueryResult<QueryRecord> {
        let description = descriptor.description()?;
        let record = match self.store.find_by_description(&description).await? {
            Some(existing) => {
                debug!(id = %existing.id, kind = %existing.kind, "reusing persisted query");
                existing
            }
            None => {
                let created = self.store.insert(descriptor).await?;
                debug!(id = %created.id, kind = %created.kind, "persisted query created");
                created
            }
        };
        Ok(self.store.touch(record.id).await?.unwrap_or(record))
    }

    /// Resume a persisted query. Its results are rebuilt on demand.
    pub async fn find_persisted(&self, id: Uuid) -> QueryResult<QueryInstance> {
        let record = self
            .store
            .touch(id)
            .await?
            .ok_or(QueryError::NotFound(id))?;
        debug!(id = %id, kind = %record.kind, access_count = record.access_count, "persisted query touched");
        Ok(self.instance(record.descriptor).with_record_id(id))
    }

    /// Resume `id` as a `kind` query, or fall back to a fresh default query
    /// when it is gone or cannot be turned into a `kind` query.
    pub async fn find_or_default(&self, id: Option<Uuid>, kind: EntityKind) -> QueryResult<QueryInstance> {
        if let Some(id) = id {
            match self.find_persisted(id).await {
                Ok(found) if found.kind() == kind => return Ok(found),
                Ok(found) => {
                    if let Coercion::Coerced(mut coerced) = self.coerce(&found, kind)? {
                        self.save(&mut coerced).await?;
                        return Ok(coerced);
                    }
                }
                Err(QueryError::NotFound(_)) => {
                    debug!(id = %id, kind = %kind, "persisted query gone, using default");
                }
                Err(e) => return Err(e),
            }
        }
        self.create_or_lookup(kind, &RawParams::new(), &ContentFilterPrefs::default())
            .await
    }

    /// Persist an instance that has no record yet; returns its record id.
    pub async fn save(&self, instance: &mut QueryInstance) -> QueryResult<Uuid> {
        if let Some(id) = instance.record_id() {
            return Ok(id);
        }
        let record = self.persist(instance.descriptor()).await?;
        instance.set_record_id(record.id);
        Ok(record.id)
    }

    /// The same query expressed as a `to` query, unsaved.
    pub fn coerce(&self, instance: &QueryInstance, to: EntityKind) -> QueryResult<Coercion<QueryInstance>> {
        match coerce::coerce_descriptor(instance.descriptor(), to) {
            Coercion::Coerced(descriptor) => {
                let mut coerced = self.instance(descriptor);
                coerced.build()?;
                debug!(from = %instance.kind(), to = %to, "query coerced");
                Ok(Coercion::Coerced(coerced))
            }
            Coercion::NotCoercible { from, to } => {
                debug!(%from, %to, "query not coercible");
                Ok(Coercion::NotCoercible { from, to })
            }
        }
    }

    /// Delete persisted queries unused for `max_age_days`.
    pub async fn cleanup(&self, max_age_days: i64) -> QueryResult<u64> {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let removed = self.store.cleanup(cutoff).await?;
        info!(removed, max_age_days, "culled stale persisted queries");
        Ok(removed)
    }
}
