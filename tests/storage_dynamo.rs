//! DynamoDB storage integration tests.
//!
//! Run with: cargo test --test storage_dynamo -- --ignored --nocapture
//!
//! Requires: DynamoDB Local (or LocalStack) at DYNAMODB_ENDPOINT, default
//! http://localhost:8000. The test table is provisioned on first run and
//! reused; every test writes to its own fresh partition.

mod storage;

use research_store::config::Config;
use research_store::provisioning::BootstrapOutcome;
use research_store::storage::DynamoEntityStore;
use research_store::StorageContext;

fn dynamo_endpoint() -> String {
    std::env::var("DYNAMODB_ENDPOINT").unwrap_or_else(|_| "http://localhost:8000".to_string())
}

fn test_config() -> Config {
    let mut config = Config::for_test();
    config.storage.table_name = "research-store-contract-test".to_string();
    config.storage.endpoint_url = Some(dynamo_endpoint());
    config.storage.region = Some("us-east-1".to_string());
    config.provisioning.poll_min_delay_ms = 200;
    config.provisioning.poll_max_delay_ms = 1000;
    config
}

#[tokio::test]
#[ignore = "requires DynamoDB Local"]
async fn test_dynamo_entity_store() {
    println!("=== DynamoDB EntityStore Tests ===");
    println!("Connecting to: {}", dynamo_endpoint());

    let config = test_config();
    let context = StorageContext::connect(&config).await;
    let outcome = context.initialize().await;
    assert!(
        matches!(outcome, BootstrapOutcome::Ready(_)),
        "table should be provisioned, got {outcome:?}"
    );

    let client = research_store::storage::dynamo::connect(&config.storage).await;
    let store = DynamoEntityStore::new(client, config.storage.table_name.clone());
    run_entity_store_tests!(&store);

    let health = context.health_check().await;
    assert!(health.overall);
    assert!(health.missing_indexes.is_empty());

    println!("=== All DynamoDB EntityStore tests PASSED ===");
}
