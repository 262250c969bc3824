//! A query instance: one descriptor, its lazily built scope and the
//! memoized results.
//!
//! Instances are request-scoped. Every method that touches the cache takes
//! `&mut self`; an instance is never shared between concurrent requests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::builder::{BuiltScope, ScopeBuilder};
use crate::catalog::Catalog;
use crate::config::EngineLimits;
use crate::descriptor::QueryDescriptor;
use crate::error::{DeclarationError, QueryResult};
use crate::executor::{QueryExecutor, Record, RecordRequest};
use crate::kinds::EntityKind;
use crate::results::{LetterFilter, Page, PageRequest, ResultCache};
use crate::scope::{FieldExpr, Scope, TitleHint};

/// Lifecycle of an instance. Moves forward only, except that asking for
/// ids not yet loaded moves `FullyInstantiated` back to
/// `PartiallyInstantiated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstanceState {
    Unbuilt,
    Built,
    Executed,
    PartiallyInstantiated,
    FullyInstantiated,
}

pub struct QueryInstance {
    descriptor: QueryDescriptor,
    record_id: Option<Uuid>,
    built: Option<BuiltScope>,
    use_letters: bool,
    cache: ResultCache,
    catalog: Arc<Catalog>,
    executor: Arc<dyn QueryExecutor>,
    limits: EngineLimits,
}

impl std::fmt::Debug for QueryInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryInstance")
            .field("kind", &self.descriptor.kind)
            .field("record_id", &self.record_id)
            .field("state", &self.state())
            .field("use_letters", &self.use_letters)
            .finish_non_exhaustive()
    }
}

impl QueryInstance {
    pub(crate) fn new(
        descriptor: QueryDescriptor,
        catalog: Arc<Catalog>,
        executor: Arc<dyn QueryExecutor>,
        limits: EngineLimits,
    ) -> Self {
        Self {
            descriptor,
            record_id: None,
            built: None,
            use_letters: false,
            cache: ResultCache::default(),
            catalog,
            executor,
            limits,
        }
    }

    pub(crate) fn with_record_id(mut self, id: Uuid) -> Self {
        self.record_id = Some(id);
        self
    }

    pub(crate) fn set_record_id(&mut self, id: Uuid) {
        self.record_id = Some(id);
    }

    pub fn kind(&self) -> EntityKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    /// Id of the persisted record, once saved.
    pub fn record_id(&self) -> Option<Uuid> {
        self.record_id
    }

    pub fn uses_letters(&self) -> bool {
        self.use_letters
    }

    pub fn state(&self) -> InstanceState {
        // Cached ids decide the state whether or not a scope was composed.
        let Some(ids) = &self.cache.ids else {
            return if self.built.is_some() {
                InstanceState::Built
            } else {
                InstanceState::Unbuilt
            };
        };
        if self.cache.records.is_empty() {
            return InstanceState::Executed;
        }
        let complete = ids
            .iter()
            .all(|id| self.cache.records.contains_key(id) || self.cache.missing.contains(id));
        if complete {
            InstanceState::FullyInstantiated
        } else {
            InstanceState::PartiallyInstantiated
        }
    }

    /// Compose the scope if it has not been composed yet.
    pub fn build(&mut self) -> QueryResult<&BuiltScope> {
        let built = match self.built.take() {
            Some(built) => built,
            None => ScopeBuilder::new(&self.catalog).build_descriptor(&self.descriptor)?,
        };
        Ok(&*self.built.insert(built))
    }

    pub fn scope(&mut self) -> QueryResult<&Scope> {
        Ok(&self.build()?.scope)
    }

    /// Names of the content filters that took effect.
    pub fn applied_filters(&mut self) -> QueryResult<&[String]> {
        Ok(&self.build()?.applied_filters)
    }

    pub fn title(&mut self) -> QueryResult<Option<&TitleHint>> {
        Ok(self.build()?.scope.title())
    }

    /// Switch letter pagination. Changing the mode clears the cache.
    pub fn set_use_letters(&mut self, on: bool) -> QueryResult<()> {
        if on {
            self.letter_field()?;
        }
        if on != self.use_letters {
            self.use_letters = on;
            self.clear_cache();
        }
        Ok(())
    }

    fn letter_field(&self) -> QueryResult<FieldExpr> {
        let strategy = self.catalog.strategy(self.kind())?;
        strategy
            .letter_field
            .clone()
            .ok_or_else(|| DeclarationError::LettersUnsupported(self.kind()).into())
    }

    /// Reset ids, letter index and loaded records together.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Use `ids` as the result list instead of executing the scope.
    /// Duplicates are dropped; loaded records are discarded.
    pub fn set_result_ids(&mut self, ids: Vec<i64>) {
        self.cache.clear();
        self.cache.ids = Some(dedup(ids));
    }

    /// Use already loaded `records` as the results, in the given order.
    pub fn set_results(&mut self, records: Vec<Record>) {
        self.cache.clear();
        let ids = dedup(records.iter().map(|r| r.id).collect());
        self.cache.records = records.into_iter().map(|r| (r.id, r)).collect();
        self.cache.ids = Some(ids);
    }

    /// Ordered result ids, executed once and memoized.
    pub async fn result_ids(&mut self) -> QueryResult<&[i64]> {
        self.load_ids().await?;
        Ok(self.cache.ids.as_deref().unwrap_or_default())
    }

    async fn load_ids(&mut self) -> QueryResult<()> {
        if self.cache.ids.is_some() {
            if self.use_letters && self.cache.letters.is_none() {
                self.index_supplied_letters().await?;
            }
            return Ok(());
        }

        let title = if self.use_letters {
            Some(self.letter_field()?)
        } else {
            None
        };
        let scope = self.build()?.scope.clone();
        let executor = Arc::clone(&self.executor);

        // A scope with passes is executed once per pass; the union is then
        // ordered in a final round trip over the collected ids.
        let mut round_trips = 0usize;
        let ordered_scope = if scope.passes().is_empty() {
            scope
        } else {
            let mut union = Vec::new();
            for flat in scope.flatten_passes() {
                union.extend(executor.select_ids(&flat).await?);
                round_trips += 1;
            }
            scope.restricted_to_ids(&dedup(union))
        };

        match title {
            Some(title) => {
                let pairs = executor
                    .select_letter_projection(&ordered_scope, &title)
                    .await?;
                let (ids, letters) = letter_index(pairs);
                self.cache.ids = Some(ids);
                self.cache.letters = Some(letters);
            }
            None => {
                let ids = executor.select_ids(&ordered_scope).await?;
                self.cache.ids = Some(dedup(ids));
            }
        }
        round_trips += 1;

        debug!(
            kind = %self.kind(),
            ids = self.cache.ids.as_ref().map_or(0, Vec::len),
            round_trips,
            letters = self.use_letters,
            "result ids executed"
        );
        Ok(())
    }

    /// Supplied ids keep their order; only the letter index is fetched.
    async fn index_supplied_letters(&mut self) -> QueryResult<()> {
        let title = self.letter_field()?;
        let ids = self.cache.ids.clone().unwrap_or_default();
        let scope = self.build()?.scope.restricted_to_ids(&ids);
        let pairs = self
            .executor
            .select_letter_projection(&scope, &title)
            .await?;
        let (_, mut letters) = letter_index(pairs);
        for id in &ids {
            letters.entry(*id).or_insert(LetterFilter::Other);
        }
        self.cache.letters = Some(letters);
        Ok(())
    }

    /// Number of results: the memoized list when present, else a count.
    pub async fn num_results(&mut self) -> QueryResult<u64> {
        if let Some(ids) = &self.cache.ids {
            return Ok(ids.len() as u64);
        }
        let scope = self.build()?.scope.clone();
        Ok(self.executor.count(&scope).await?)
    }

    /// One page of ids. A letter request switches letter pagination on.
    pub async fn paginate(&mut self, request: PageRequest) -> QueryResult<Page> {
        if request.letter.is_some() && !self.use_letters {
            self.set_use_letters(true)?;
        }
        if let Some(requested) = request.per_page
            && requested > self.limits.max_per_page
        {
            warn!(
                requested,
                max = self.limits.max_per_page,
                "per_page exceeds maximum, capping"
            );
        }
        let per_page = self.limits.per_page(request.per_page);

        self.load_ids().await?;
        let all = self.cache.ids.as_deref().unwrap_or_default();

        let mut page = match (request.letter, &self.cache.letters) {
            (Some(letter), Some(letters)) => {
                let subset: Vec<i64> = all
                    .iter()
                    .copied()
                    .filter(|id| letters.get(id) == Some(&letter))
                    .collect();
                Page::slice(&subset, request.page, per_page)
            }
            _ => Page::slice(all, request.page, per_page),
        };
        page.used_letters = self.cache.used_letters();
        page.letter = request.letter;

        debug!(
            kind = %self.kind(),
            page = page.page,
            per_page,
            total = page.total,
            letter = ?page.letter,
            "page sliced"
        );
        Ok(page)
    }

    /// Records for `ids` in the order given, loading only those not cached.
    ///
    /// Ids that do not exist are skipped and not asked for again. Records
    /// already loaded are reused as they are, even if `includes` differs
    /// from the request that loaded them.
    pub async fn instantiate(&mut self, ids: &[i64], includes: &[&str]) -> QueryResult<Vec<Record>> {
        let kind = self.kind();
        let strategy = self.catalog.strategy(kind)?;
        let specs = includes
            .iter()
            .map(|name| {
                strategy
                    .includes
                    .iter()
                    .find(|spec| spec.name == *name)
                    .copied()
                    .ok_or_else(|| DeclarationError::UnknownInclude {
                        kind,
                        name: (*name).to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        let wanted: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| !self.cache.records.contains_key(id) && !self.cache.missing.contains(id))
            .filter(|id| seen.insert(*id))
            .collect();

        let mut loaded = 0usize;
        for chunk in wanted.chunks(self.limits.max_array.max(1)) {
            let request = RecordRequest {
                table: kind.table().to_string(),
                ids: chunk.to_vec(),
                includes: specs.clone(),
            };
            let records = self.executor.select_records(&request).await?;
            loaded += records.len();
            for record in records {
                self.cache.records.insert(record.id, record);
            }
            for id in chunk {
                if !self.cache.records.contains_key(id) {
                    self.cache.missing.insert(*id);
                }
            }
        }

        debug!(
            kind = %kind,
            requested = ids.len(),
            loaded,
            cached = self.cache.record_count(),
            "records instantiated"
        );
        Ok(ids
            .iter()
            .filter_map(|id| self.cache.records.get(id).cloned())
            .collect())
    }

    /// A page of ids together with its records.
    pub async fn page_records(
        &mut self,
        request: PageRequest,
        includes: &[&str],
    ) -> QueryResult<(Page, Vec<Record>)> {
        let page = self.paginate(request).await?;
        let records = self.instantiate(&page.ids, includes).await?;
        Ok((page, records))
    }

    // ---------------------------------------------------------------------
    // Sequence browsing
    // ---------------------------------------------------------------------

    /// Position of `id` in the result list.
    pub async fn index_of(&mut self, id: i64) -> QueryResult<Option<usize>> {
        Ok(self.result_ids().await?.iter().position(|x| *x == id))
    }

    pub async fn next_id(&mut self, id: i64) -> QueryResult<Option<i64>> {
        let ids = self.result_ids().await?;
        Ok(ids
            .iter()
            .position(|x| *x == id)
            .and_then(|i| ids.get(i + 1))
            .copied())
    }

    pub async fn prev_id(&mut self, id: i64) -> QueryResult<Option<i64>> {
        let ids = self.result_ids().await?;
        Ok(ids
            .iter()
            .position(|x| *x == id)
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| ids.get(i))
            .copied())
    }

    pub async fn first_id(&mut self) -> QueryResult<Option<i64>> {
        Ok(self.result_ids().await?.first().copied())
    }

    pub async fn last_id(&mut self) -> QueryResult<Option<i64>> {
        Ok(self.result_ids().await?.last().copied())
    }
}

fn dedup(ids: Vec<i64>) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

fn letter_index(pairs: Vec<(i64, Option<String>)>) -> (Vec<i64>, HashMap<i64, LetterFilter>) {
    let mut ids = Vec::with_capacity(pairs.len());
    let mut letters = HashMap::with_capacity(pairs.len());
    for (id, prefix) in pairs {
        if letters
            .insert(id, LetterFilter::of(prefix.as_deref()))
            .is_none()
        {
            ids.push(id);
        }
    }
    (ids, letters)
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::executor::{MemoryExecutor, Row};
    use crate::schema::ValidatedParams;
    use crate::scope::Literal;

    fn location(id: i64, name: &str) -> Row {
        Row::from([
            ("id".to_string(), Literal::Int(id)),
            ("name".to_string(), Literal::Text(name.to_string())),
            ("user_id".to_string(), Literal::Int(1)),
        ])
    }

    fn instance(executor: Arc<MemoryExecutor>) -> QueryInstance {
        QueryInstance::new(
            QueryDescriptor::new(EntityKind::Location, ValidatedParams::default()),
            Arc::new(Catalog::standard().unwrap()),
            executor,
            EngineLimits {
                max_array: 2,
                ..EngineLimits::default()
            },
        )
    }

    fn locations() -> Arc<MemoryExecutor> {
        let executor = MemoryExecutor::new();
        executor.extend(
            "locations",
            vec![
                location(1, "Burbank"),
                location(2, "albany"),
                location(3, "Çatalhöyük"),
                location(4, "Berkeley"),
                location(5, "Zurich"),
            ],
        );
        Arc::new(executor)
    }

    #[tokio::test]
    async fn state_moves_forward() {
        let executor = locations();
        let mut query = instance(executor);
        assert_eq!(query.state(), InstanceState::Unbuilt);
        query.build().unwrap();
        assert_eq!(query.state(), InstanceState::Built);
        let ids = query.result_ids().await.unwrap().to_vec();
        assert_eq!(query.state(), InstanceState::Executed);
        query.instantiate(&ids[..2], &[]).await.unwrap();
        assert_eq!(query.state(), InstanceState::PartiallyInstantiated);
        query.instantiate(&ids, &[]).await.unwrap();
        assert_eq!(query.state(), InstanceState::FullyInstantiated);
        query.clear_cache();
        assert_eq!(query.state(), InstanceState::Built);
    }

    #[tokio::test]
    async fn result_ids_are_memoized() {
        let executor = locations();
        let mut query = instance(Arc::clone(&executor));
        let first = query.result_ids().await.unwrap().to_vec();
        let second = query.result_ids().await.unwrap().to_vec();
        assert_eq!(first, second);
        assert_eq!(executor.round_trips(), 1);
    }

    #[tokio::test]
    async fn instantiate_keeps_request_order_and_skips_unknown_ids() {
        let executor = locations();
        let mut query = instance(Arc::clone(&executor));
        let records = query.instantiate(&[5, 99, 1, 5], &[]).await.unwrap();
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 1, 5]);

        // Two chunks of two; nothing is asked for twice.
        assert_eq!(executor.record_requests(), vec![vec![5, 99], vec![1]]);
        query.instantiate(&[99, 1, 2], &[]).await.unwrap();
        assert_eq!(executor.record_requests().last().unwrap(), &vec![2]);
    }

    #[tokio::test]
    async fn unknown_includes_are_declaration_errors() {
        let mut query = instance(locations());
        let err = query.instantiate(&[1], &["sequences"]).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::QueryError::Declaration(DeclarationError::UnknownInclude { .. })
        ));
    }

    #[tokio::test]
    async fn letter_pages_partition_the_results() {
        let mut query = instance(locations());
        let page = query
            .paginate(PageRequest::page(1).letter(LetterFilter::Letter('B')))
            .await
            .unwrap();
        assert!(query.uses_letters());
        assert_eq!(page.ids, vec![4, 1]);
        assert_eq!(
            page.used_letters,
            vec![
                LetterFilter::Letter('A'),
                LetterFilter::Letter('B'),
                LetterFilter::Letter('Z'),
                LetterFilter::Other
            ]
        );

        let mut union = Vec::new();
        for letter in page.used_letters.clone() {
            let part = query
                .paginate(PageRequest::page(1).letter(letter))
                .await
                .unwrap();
            union.extend(part.ids);
        }
        union.sort_unstable();
        assert_eq!(union, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn supplied_ids_bypass_execution() {
        let executor = locations();
        let mut query = instance(Arc::clone(&executor));
        assert_eq!(query.state(), InstanceState::Unbuilt);
        query.set_result_ids(vec![3, 1, 3]);
        assert_eq!(query.state(), InstanceState::Executed);
        assert_eq!(query.result_ids().await.unwrap(), &[3, 1]);
        assert_eq!(query.num_results().await.unwrap(), 2);
        assert_eq!(executor.round_trips(), 0);

        let records = query.instantiate(&[1], &[]).await.unwrap();
        assert_eq!(query.state(), InstanceState::PartiallyInstantiated);
        query.set_results(records);
        assert_eq!(query.result_ids().await.unwrap(), &[1]);
        assert_eq!(query.state(), InstanceState::FullyInstantiated);
    }

    #[tokio::test]
    async fn supplied_ids_report_progress_without_a_scope() {
        let mut query = instance(locations());
        query.set_result_ids(vec![1, 2]);
        assert_eq!(query.state(), InstanceState::Executed);
        query.result_ids().await.unwrap();
        assert_eq!(query.state(), InstanceState::Executed);

        let records = query.instantiate(&[1, 2], &[]).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(query.state(), InstanceState::FullyInstantiated);
    }

    #[tokio::test]
    async fn sequence_browsing_walks_the_list() {
        let mut query = instance(locations());
        query.set_result_ids(vec![4, 2, 9]);
        assert_eq!(query.index_of(2).await.unwrap(), Some(1));
        assert_eq!(query.next_id(2).await.unwrap(), Some(9));
        assert_eq!(query.next_id(9).await.unwrap(), None);
        assert_eq!(query.prev_id(4).await.unwrap(), None);
        assert_eq!(query.prev_id(9).await.unwrap(), Some(2));
        assert_eq!(query.first_id().await.unwrap(), Some(4));
        assert_eq!(query.last_id().await.unwrap(), Some(9));
        assert_eq!(query.index_of(7).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_pages_are_capped() {
        let mut query = instance(locations());
        let page = query
            .paginate(PageRequest::page(1).per_page(10_000))
            .await
            .unwrap();
        assert_eq!(page.per_page, EngineLimits::default().max_per_page);
        assert_eq!(page.total, 5);
        assert!(!page.has_next);
    }
}
