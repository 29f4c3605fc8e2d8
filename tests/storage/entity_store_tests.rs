//! EntityStore interface tests.
//!
//! These tests verify the contract of the EntityStore trait.
//! Each storage implementation should run these tests. Every test works in
//! its own fresh partition, so a shared table needs no cleanup between runs.

use futures::TryStreamExt;
use serde_json::{json, Value};
use uuid::Uuid;

use research_store::storage::schema::{INDEX_RESEARCH_ID, INDEX_RESEARCH_PARTICIPANT};
use research_store::storage::{
    query_all, query_stream, EntityStore, Item, QueryOptions, QuerySource, StorageError,
    WriteCondition,
};

/// A fresh partition value.
pub fn partition() -> String {
    format!("test-{}", Uuid::new_v4())
}

/// Build an item from a JSON object literal.
pub fn item(value: Value) -> Item {
    value.as_object().cloned().expect("item must be a JSON object")
}

fn sk_of(item: &Item) -> &str {
    item.get("sk").and_then(Value::as_str).unwrap_or_default()
}

// =============================================================================
// put / get_one / delete
// =============================================================================

pub async fn test_put_then_get<S: EntityStore>(store: &S) {
    let id = partition();
    let written = item(json!({
        "id": id,
        "sk": "WELCOME_SCREEN",
        "EntityType": "WELCOME_SCREEN",
        "config": {"title": "Hola", "enabled": true, "order": [3, 1, 2]},
    }));

    store.put(written.clone()).await.expect("put should succeed");

    let read = store
        .get_one(&id, "WELCOME_SCREEN")
        .await
        .expect("get should succeed");
    assert_eq!(read, Some(written), "stored item should read back unchanged");
}

pub async fn test_get_absent_is_none<S: EntityStore>(store: &S) {
    let read = store
        .get_one(&partition(), "NOPE")
        .await
        .expect("get should succeed");
    assert!(read.is_none(), "absent item should be None");
}

pub async fn test_put_overwrites<S: EntityStore>(store: &S) {
    let id = partition();
    store
        .put(item(json!({"id": id, "sk": "A", "n": 1, "extra": "x"})))
        .await
        .unwrap();
    store
        .put(item(json!({"id": id, "sk": "A", "n": 2})))
        .await
        .unwrap();

    let read = store.get_one(&id, "A").await.unwrap().unwrap();
    assert_eq!(read.get("n"), Some(&json!(2)));
    assert!(read.get("extra").is_none(), "put replaces the whole item");
}

pub async fn test_put_rejects_missing_sort_key<S: EntityStore>(store: &S) {
    let result = store.put(item(json!({"id": partition()}))).await;
    assert!(matches!(result, Err(StorageError::MissingKey("sk"))));
}

pub async fn test_delete<S: EntityStore>(store: &S) {
    let id = partition();
    store.put(item(json!({"id": id, "sk": "A"}))).await.unwrap();

    store.delete(&id, "A").await.expect("delete should succeed");
    assert!(store.get_one(&id, "A").await.unwrap().is_none());

    store
        .delete(&id, "A")
        .await
        .expect("deleting an absent item should succeed");
}

// =============================================================================
// Conditional writes
// =============================================================================

pub async fn test_must_not_exist<S: EntityStore>(store: &S) {
    let id = partition();
    let row = item(json!({"id": id, "sk": "RESEARCH#x", "version": 1}));

    store
        .put_conditional(row.clone(), WriteCondition::MustNotExist)
        .await
        .expect("first create should succeed");

    let second = store
        .put_conditional(row, WriteCondition::MustNotExist)
        .await;
    assert!(
        matches!(second, Err(StorageError::ConditionFailed { ref key }) if key.id == id),
        "second create should fail the condition, got {second:?}"
    );
}

pub async fn test_version_equals<S: EntityStore>(store: &S) {
    let id = partition();
    store
        .put(item(json!({"id": id, "sk": "A", "version": 1})))
        .await
        .unwrap();

    store
        .put_conditional(
            item(json!({"id": id, "sk": "A", "version": 2})),
            WriteCondition::VersionEquals(1),
        )
        .await
        .expect("matching version should succeed");

    let stale = store
        .put_conditional(
            item(json!({"id": id, "sk": "A", "version": 2})),
            WriteCondition::VersionEquals(1),
        )
        .await;
    assert!(matches!(stale, Err(StorageError::ConditionFailed { .. })));

    let read = store.get_one(&id, "A").await.unwrap().unwrap();
    assert_eq!(read.get("version"), Some(&json!(2)));
}

pub async fn test_version_equals_requires_existing_row<S: EntityStore>(store: &S) {
    let result = store
        .put_conditional(
            item(json!({"id": partition(), "sk": "A", "version": 1})),
            WriteCondition::VersionEquals(0),
        )
        .await;
    assert!(matches!(result, Err(StorageError::ConditionFailed { .. })));
}

pub async fn test_version_zero_matches_unversioned_row<S: EntityStore>(store: &S) {
    let id = partition();
    store
        .put(item(json!({"id": id, "sk": "LEGACY"})))
        .await
        .unwrap();

    store
        .put_conditional(
            item(json!({"id": id, "sk": "LEGACY", "version": 1})),
            WriteCondition::VersionEquals(0),
        )
        .await
        .expect("row without a version should count as version 0");
}

// =============================================================================
// Queries
// =============================================================================

pub async fn test_table_query_prefix_and_order<S: EntityStore>(store: &S) {
    let id = partition();
    for sk in ["RESPONSE#p2#nps", "RESPONSE#p1#csat", "SESSION#p1", "RESPONSE#p1#nps"] {
        store.put(item(json!({"id": id, "sk": sk}))).await.unwrap();
    }

    let items = query_all(
        store,
        QuerySource::Table,
        &id,
        QueryOptions::default().with_prefix("RESPONSE#p1#"),
    )
    .await
    .expect("query should succeed");

    let sks: Vec<_> = items.iter().map(sk_of).collect();
    assert_eq!(sks, vec!["RESPONSE#p1#csat", "RESPONSE#p1#nps"]);
}

pub async fn test_query_empty_partition<S: EntityStore>(store: &S) {
    let page = store
        .query_page(QuerySource::Table, &partition(), &QueryOptions::default())
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert!(page.next.is_none());
}

pub async fn test_query_pagination<S: EntityStore>(store: &S) {
    let id = partition();
    for i in 0..5 {
        store
            .put(item(json!({"id": id, "sk": format!("ITEM#{i}")})))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut options = QueryOptions::default().with_limit(2);
    loop {
        let page = store
            .query_page(QuerySource::Table, &id, &options)
            .await
            .unwrap();
        assert!(page.items.len() <= 2);
        seen.extend(page.items.iter().map(|i| sk_of(i).to_string()));
        match page.next {
            Some(token) => options = QueryOptions::default().with_limit(2).starting_after(token),
            None => break,
        }
    }

    let expected: Vec<_> = (0..5).map(|i| format!("ITEM#{i}")).collect();
    assert_eq!(seen, expected, "pages should cover every item once, in order");
}

pub async fn test_query_stream_limit_spans_pages<S: EntityStore>(store: &S) {
    let id = partition();
    for i in 0..6 {
        store
            .put(item(json!({"id": id, "sk": format!("ITEM#{i}")})))
            .await
            .unwrap();
    }

    let items: Vec<Item> = query_stream(
        store,
        QuerySource::Table,
        &id,
        QueryOptions::default().with_limit(4),
    )
    .try_collect()
    .await
    .unwrap();
    assert_eq!(items.len(), 4);
    assert_eq!(sk_of(&items[3]), "ITEM#3");
}

pub async fn test_index_query<S: EntityStore>(store: &S) {
    let research = partition();
    for (participant, step) in [("p2", "nps"), ("p1", "nps"), ("p1", "csat")] {
        store
            .put(item(json!({
                "id": research,
                "sk": format!("RESPONSE#{participant}#{step}"),
                "researchId": research,
                "participantId": participant,
            })))
            .await
            .unwrap();
    }
    store
        .put(item(json!({"id": research, "sk": "WELCOME_SCREEN", "researchId": research})))
        .await
        .unwrap();

    let responses = query_all(
        store,
        QuerySource::Index(INDEX_RESEARCH_ID),
        &research,
        QueryOptions::default().with_prefix("RESPONSE#"),
    )
    .await
    .unwrap();
    let sks: Vec<_> = responses.iter().map(sk_of).collect();
    assert_eq!(
        sks,
        vec!["RESPONSE#p1#csat", "RESPONSE#p1#nps", "RESPONSE#p2#nps"]
    );

    // Indexes project every attribute of the base item.
    for projected in &responses {
        let base = store
            .get_one(&research, sk_of(projected))
            .await
            .unwrap()
            .expect("indexed item should exist in the base table");
        assert_eq!(&base, projected);
    }
}

pub async fn test_sparse_index_skips_items_without_key<S: EntityStore>(store: &S) {
    let research = partition();
    store
        .put(item(json!({
            "id": research,
            "sk": "RESPONSE#p1#nps",
            "researchId": research,
            "participantId": "p1",
        })))
        .await
        .unwrap();
    store
        .put(item(json!({"id": research, "sk": "THANK_YOU_SCREEN", "researchId": research})))
        .await
        .unwrap();

    let items = query_all(
        store,
        QuerySource::Index(INDEX_RESEARCH_PARTICIPANT),
        &research,
        QueryOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(items.len(), 1, "rows without participantId are not indexed");
    assert_eq!(sk_of(&items[0]), "RESPONSE#p1#nps");
}

pub async fn test_unknown_index<S: EntityStore>(store: &S) {
    let result = store
        .query_page(
            QuerySource::Index("ResearchIndex"),
            &partition(),
            &QueryOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(StorageError::UnknownIndex(name)) if name == "ResearchIndex"));
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all EntityStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_entity_store_tests {
    ($store:expr) => {
        use $crate::storage::entity_store_tests::*;

        // put / get / delete
        test_put_then_get($store).await;
        println!("  test_put_then_get: PASSED");

        test_get_absent_is_none($store).await;
        println!("  test_get_absent_is_none: PASSED");

        test_put_overwrites($store).await;
        println!("  test_put_overwrites: PASSED");

        test_put_rejects_missing_sort_key($store).await;
        println!("  test_put_rejects_missing_sort_key: PASSED");

        test_delete($store).await;
        println!("  test_delete: PASSED");

        // conditional writes
        test_must_not_exist($store).await;
        println!("  test_must_not_exist: PASSED");

        test_version_equals($store).await;
        println!("  test_version_equals: PASSED");

        test_version_equals_requires_existing_row($store).await;
        println!("  test_version_equals_requires_existing_row: PASSED");

        test_version_zero_matches_unversioned_row($store).await;
        println!("  test_version_zero_matches_unversioned_row: PASSED");

        // queries
        test_table_query_prefix_and_order($store).await;
        println!("  test_table_query_prefix_and_order: PASSED");

        test_query_empty_partition($store).await;
        println!("  test_query_empty_partition: PASSED");

        test_query_pagination($store).await;
        println!("  test_query_pagination: PASSED");

        test_query_stream_limit_spans_pages($store).await;
        println!("  test_query_stream_limit_spans_pages: PASSED");

        test_index_query($store).await;
        println!("  test_index_query: PASSED");

        test_sparse_index_skips_items_without_key($store).await;
        println!("  test_sparse_index_skips_items_without_key: PASSED");

        test_unknown_index($store).await;
        println!("  test_unknown_index: PASSED");
    };
}
