//! DynamoDB storage implementations.

mod conversions;
mod entity_store;
mod table_admin;

use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::Client;
use tracing::info;

use crate::config::StorageConfig;

pub use entity_store::DynamoEntityStore;
pub use table_admin::DynamoTableAdmin;

/// Build a client from the SDK's default provider chain plus overrides.
pub async fn connect(config: &StorageConfig) -> Client {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    client_from_sdk_config(&sdk_config, config)
}

/// Build a client inheriting an existing SDK configuration.
pub fn client_from_sdk_config(sdk_config: &SdkConfig, config: &StorageConfig) -> Client {
    let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);

    if let Some(region) = &config.region {
        builder = builder.region(Region::new(region.clone()));
    }
    if let Some(endpoint) = &config.endpoint_url {
        info!(%endpoint, "Using DynamoDB endpoint override");
        builder = builder.endpoint_url(endpoint);
    }
    builder = builder.timeout_config(
        TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.operation_timeout_secs))
            .build(),
    );

    Client::from_conf(builder.build())
}
