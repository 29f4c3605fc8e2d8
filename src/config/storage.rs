//! Storage configuration types.

use serde::Deserialize;

use crate::storage::schema::DEFAULT_TABLE_NAME;

/// Capacity mode for the table and its indexes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    #[default]
    Provisioned,
    PayPerRequest,
}

/// Read/write capacity units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Capacity {
    pub read: i64,
    pub write: i64,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Shared table name. Overridden by `DYNAMODB_TABLE`.
    pub table_name: String,
    /// AWS region. Overridden by `AWS_REGION` / `AWS_DEFAULT_REGION`;
    /// when unset the SDK's default provider chain decides.
    pub region: Option<String>,
    /// Endpoint override, e.g. `http://localhost:8000` for DynamoDB Local.
    pub endpoint_url: Option<String>,
    /// Per-operation timeout in seconds.
    pub operation_timeout_secs: u64,
    pub billing_mode: BillingMode,
    /// Base table capacity (provisioned mode only).
    pub table_capacity: Capacity,
    /// Capacity of each global secondary index (provisioned mode only).
    pub index_capacity: Capacity,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            region: None,
            endpoint_url: None,
            operation_timeout_secs: 30,
            billing_mode: BillingMode::Provisioned,
            table_capacity: Capacity {
                read: 10,
                write: 10,
            },
            index_capacity: Capacity { read: 5, write: 5 },
        }
    }
}
