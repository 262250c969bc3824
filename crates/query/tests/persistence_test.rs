#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Persisted query tests.
//!
//! Queries are stored by their canonical description, resumed by id and
//! rebuilt lazily from the stored descriptor.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use sporeprint_query::{
    ContentFilterPrefs, EngineLimits, EntityKind, InstanceState, MemoryQueryStore, QueryEngine,
    QueryError, QueryStore, RawParams,
};
use sporeprint_test_utils::standard_dataset;
use uuid::Uuid;

fn setup() -> (QueryEngine, Arc<MemoryQueryStore>) {
    let store = Arc::new(MemoryQueryStore::new());
    let engine = QueryEngine::standard(
        Arc::new(standard_dataset()),
        store.clone(),
        EngineLimits::default(),
    )
    .unwrap();
    (engine, store)
}

#[tokio::test]
async fn test_equivalent_parameters_share_a_record() {
    let (engine, store) = setup();
    let prefs = ContentFilterPrefs::default();

    // Same meaning, different spelling.
    let first = engine
        .create_or_lookup(
            EntityKind::Observation,
            &RawParams::new().with("users", "3,1").with("has_images", "yes"),
            &prefs,
        )
        .await
        .unwrap();
    let second = engine
        .create_or_lookup(
            EntityKind::Observation,
            &RawParams::new()
                .with("has_images", true)
                .with("users", json!([3, 1]))
                .with("notes_has", ""),
            &prefs,
        )
        .await
        .unwrap();

    assert_eq!(first.record_id(), second.record_id());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_filters_are_part_of_the_identity() {
    let (engine, store) = setup();
    let plain = engine
        .create_or_lookup(EntityKind::Name, &RawParams::new(), &ContentFilterPrefs::default())
        .await
        .unwrap();
    let filtered = engine
        .create_or_lookup(
            EntityKind::Name,
            &RawParams::new(),
            &ContentFilterPrefs {
                lichen: Some("yes".to_string()),
                ..ContentFilterPrefs::default()
            },
        )
        .await
        .unwrap();
    assert_ne!(plain.record_id(), filtered.record_id());
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_resumed_query_rebuilds_the_same_results() {
    let (engine, store) = setup();
    let prefs = ContentFilterPrefs {
        lichen: Some("no".to_string()),
        ..ContentFilterPrefs::default()
    };
    let mut original = engine
        .create_or_lookup(EntityKind::Observation, &RawParams::new().with("by", "name"), &prefs)
        .await
        .unwrap();
    let expected = original.result_ids().await.unwrap().to_vec();
    assert_eq!(expected, vec![4, 6, 1, 3]);

    let id = original.record_id().unwrap();
    let mut resumed = engine.find_persisted(id).await.unwrap();
    assert_eq!(resumed.state(), InstanceState::Unbuilt);
    assert_eq!(resumed.descriptor(), original.descriptor());
    assert_eq!(resumed.result_ids().await.unwrap(), expected.as_slice());

    let record = store.find(id).await.unwrap().unwrap();
    assert_eq!(record.access_count, 2);
    assert_eq!(record.kind, EntityKind::Observation);
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let (engine, _) = setup();
    let id = Uuid::now_v7();
    let err = engine.find_persisted(id).await.unwrap_err();
    assert!(matches!(err, QueryError::NotFound(missing) if missing == id));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_coerced_queries_persist_with_their_source() {
    let (engine, store) = setup();
    let observations = engine
        .create_or_lookup(
            EntityKind::Observation,
            &RawParams::new().with("has_specimen", true),
            &ContentFilterPrefs::default(),
        )
        .await
        .unwrap();

    let mut locations = engine
        .find_or_default(observations.record_id(), EntityKind::Location)
        .await
        .unwrap();
    assert_eq!(locations.descriptor().depth(), 1);
    assert_eq!(store.len(), 2);

    let resumed_id = locations.record_id().unwrap();
    let mut resumed = engine.find_persisted(resumed_id).await.unwrap();
    assert_eq!(resumed.kind(), EntityKind::Location);
    assert_eq!(
        resumed.result_ids().await.unwrap(),
        locations.result_ids().await.unwrap().to_vec().as_slice()
    );
}

#[tokio::test]
async fn test_cleanup_removes_idle_records() {
    let (engine, store) = setup();
    let idle = engine
        .create_or_lookup(EntityKind::Comment, &RawParams::new(), &ContentFilterPrefs::default())
        .await
        .unwrap();
    let busy = engine
        .create_or_lookup(EntityKind::Image, &RawParams::new(), &ContentFilterPrefs::default())
        .await
        .unwrap();
    store.backdate(idle.record_id().unwrap(), Utc::now() - Duration::days(45));

    assert_eq!(engine.cleanup(30).await.unwrap(), 1);
    assert!(engine.find_persisted(busy.record_id().unwrap()).await.is_ok());
    assert!(matches!(
        engine.find_persisted(idle.record_id().unwrap()).await,
        Err(QueryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_descriptor_survives_serialization() {
    let (engine, _) = setup();
    let query = engine
        .build(
            EntityKind::Observation,
            &RawParams::new()
                .with("date", json!(["11-15", "02-01"]))
                .with("confidence", json!({"max": 2}))
                .with("pattern", "\"fly agaric\" -muscaria"),
            &ContentFilterPrefs::default(),
        )
        .unwrap();
    let json = query.descriptor().description().unwrap();
    let decoded: sporeprint_query::QueryDescriptor = serde_json::from_str(&json).unwrap();
    assert_eq!(&decoded, query.descriptor());
    assert_eq!(decoded.description().unwrap(), json);
}
