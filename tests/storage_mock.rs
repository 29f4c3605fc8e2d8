//! In-memory storage contract tests.
//!
//! Run with: cargo test --test storage_mock
//!
//! No external dependencies required.

mod storage;

use research_store::storage::MockEntityStore;

#[tokio::test]
async fn test_mock_entity_store() {
    println!("=== Mock EntityStore Tests ===");

    let store = MockEntityStore::new();
    run_entity_store_tests!(&store);

    println!("=== All Mock EntityStore tests PASSED ===");
}
