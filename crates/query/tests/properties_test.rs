#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Engine-wide properties.
//!
//! Grammar shape, validation, join deduplication, paging stability, letter
//! partitions, coercion round trips and range bounds, checked end to end.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use sporeprint_query::grammar::SearchPattern;
use sporeprint_query::{
    Catalog, ContentFilterPrefs, EngineLimits, EntityKind, LetterFilter, MemoryExecutor,
    MemoryQueryStore, PageRequest, QueryEngine, QueryError, RawParams, ValidationError,
};
use sporeprint_test_utils::{load, observation, standard_dataset, standard_fixtures};

fn engine_with(executor: MemoryExecutor) -> QueryEngine {
    QueryEngine::standard(
        Arc::new(executor),
        Arc::new(MemoryQueryStore::new()),
        EngineLimits::default(),
    )
    .unwrap()
}

fn words(groups: &[Vec<String>]) -> Vec<&str> {
    groups.iter().flatten().map(String::as_str).collect()
}

// -------------------------------------------------------------------------
// Grammar
// -------------------------------------------------------------------------

#[test]
fn test_simple_words_round_trip() {
    let pattern = SearchPattern::parse("  agaricus   campestris  bisporus ").unwrap();
    assert_eq!(words(&pattern.goods), vec!["agaricus", "campestris", "bisporus"]);
    assert!(pattern.bads.is_empty());

    let pattern = SearchPattern::parse("agaricus OR amanita -amanitarita").unwrap();
    assert_eq!(pattern.goods, vec![vec!["agaricus".to_string(), "amanita".to_string()]]);
    assert_eq!(pattern.bads, vec!["amanitarita".to_string()]);
}

#[test]
fn test_or_binds_neighbours_greedily() {
    let pattern = SearchPattern::parse("word1 word2 OR word3 word4").unwrap();
    assert_eq!(
        pattern.goods,
        vec![
            vec!["word1".to_string()],
            vec!["word2".to_string(), "word3".to_string()],
            vec!["word4".to_string()],
        ]
    );
}

// -------------------------------------------------------------------------
// Validation
// -------------------------------------------------------------------------

#[test]
fn test_unknown_keys_are_rejected_by_name() {
    let engine = engine_with(MemoryExecutor::new());
    let err = engine
        .validate(EntityKind::Observation, &RawParams::new().with("bogus_param", 1))
        .unwrap_err();
    assert_eq!(err.param(), Some("bogus_param"));
    assert!(matches!(
        err,
        QueryError::Validation(ValidationError::UnknownParameter { .. })
    ));
}

// -------------------------------------------------------------------------
// Scope composition
// -------------------------------------------------------------------------

#[test]
fn test_shared_join_appears_once() {
    let engine = engine_with(MemoryExecutor::new());
    let raw = RawParams::new()
        .with("pattern", "amanita")
        .with("lichen", "no")
        .with("has_name", true);
    let mut query = engine
        .build(EntityKind::Observation, &raw, &ContentFilterPrefs::default())
        .unwrap();
    let scope = query.scope().unwrap();
    let aliases: Vec<&str> = scope.joins().iter().map(|j| j.alias.as_str()).collect();
    assert_eq!(aliases, vec!["names"]);
}

#[test]
fn test_range_bounds_add_one_predicate_each() {
    let engine = engine_with(MemoryExecutor::new());
    let count = |value: serde_json::Value| {
        let mut query = engine
            .build(
                EntityKind::Observation,
                &RawParams::new().with("confidence", value),
                &ContentFilterPrefs::default(),
            )
            .unwrap();
        query.scope().unwrap().predicates().len()
    };
    assert_eq!(count(json!({"min": 1})), 1);
    assert_eq!(count(json!({"max": 2.5})), 1);
    assert_eq!(count(json!([1, 2.5])), 2);
    assert_eq!(count(json!({"min": null, "max": ""})), 0);
}

// -------------------------------------------------------------------------
// Paging
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_pagination_is_stable() {
    let executor = standard_dataset();
    // Twenty-five more observations, all on the same day, ordered by id.
    load(
        &executor,
        (100..125).map(|id| observation(id).named(10).at(20).on(2020, 1, 1)),
    );
    let engine = engine_with(executor);

    let mut query = engine
        .build(EntityKind::Observation, &RawParams::new(), &ContentFilterPrefs::default())
        .unwrap();
    let first = query.result_ids().await.unwrap().to_vec();
    let second = query.result_ids().await.unwrap().to_vec();
    assert_eq!(first, second);
    assert_eq!(first.len(), 31);

    let page = query
        .paginate(PageRequest::page(2).per_page(10))
        .await
        .unwrap();
    assert_eq!(page.ids, first[10..20].to_vec());

    // A fresh instance over the same data agrees.
    let mut again = engine
        .build(EntityKind::Observation, &RawParams::new(), &ContentFilterPrefs::default())
        .unwrap();
    assert_eq!(again.result_ids().await.unwrap(), first.as_slice());
}

#[tokio::test]
async fn test_letters_partition_the_results() {
    for kind in [EntityKind::Name, EntityKind::Location] {
        let engine = engine_with(standard_dataset());
        let mut query = engine
            .build(kind, &RawParams::new(), &ContentFilterPrefs::default())
            .unwrap();
        query.set_use_letters(true).unwrap();
        let all = query.result_ids().await.unwrap().to_vec();

        let first = query
            .paginate(PageRequest::default().per_page(100))
            .await
            .unwrap();
        let mut seen = Vec::new();
        for letter in &first.used_letters {
            let page = query
                .paginate(PageRequest::default().per_page(100).letter(*letter))
                .await
                .unwrap();
            seen.extend(page.ids);
        }

        let unique: BTreeSet<i64> = seen.iter().copied().collect();
        let expected: BTreeSet<i64> = all.iter().copied().collect();
        assert_eq!(unique.len(), seen.len(), "{kind}: an id landed in two buckets");
        assert_eq!(unique, expected, "{kind}: buckets miss ids");
    }
}

#[tokio::test]
async fn test_untitled_rows_land_in_other() {
    let executor = MemoryExecutor::new();
    load(&executor, standard_fixtures());
    // A name without a sort name.
    executor.insert("names", sporeprint_test_utils::Fixture::new("names", 17).row);
    let engine = engine_with(executor);

    let mut names = engine
        .build(EntityKind::Name, &RawParams::new(), &ContentFilterPrefs::default())
        .unwrap();
    let page = names
        .paginate(PageRequest::default().letter(LetterFilter::Other))
        .await
        .unwrap();
    assert_eq!(page.ids, vec![17]);
}

// -------------------------------------------------------------------------
// Coercion
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_coercion_round_trip_keeps_every_row() {
    let engine = engine_with(standard_dataset());
    for (a, b) in [
        (EntityKind::Observation, EntityKind::Image),
        (EntityKind::Image, EntityKind::Observation),
    ] {
        let mut original = engine
            .build(a, &RawParams::new(), &ContentFilterPrefs::default())
            .unwrap();
        let there = engine.coerce(&original, b).unwrap().coerced().unwrap();
        let mut back = engine.coerce(&there, a).unwrap().coerced().unwrap();

        let before: BTreeSet<i64> = original.result_ids().await.unwrap().iter().copied().collect();
        let after: BTreeSet<i64> = back.result_ids().await.unwrap().iter().copied().collect();
        assert!(after.is_superset(&before), "{a} -> {b} -> {a} lost rows");
    }
}

#[test]
fn test_catalog_validates_at_startup() {
    assert!(Catalog::standard().is_ok());
}
