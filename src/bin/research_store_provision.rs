//! research-store-provision: one-shot table bootstrap
//!
//! Runs the same single-flight provisioning a service performs at startup,
//! then prints the health report as JSON. Exits non-zero when storage is
//! unreachable or provisioning degraded, so it can gate a deployment.
//!
//! ## Configuration
//! - `--config <path>` or RESEARCH_STORE_CONFIG: YAML config file
//! - DYNAMODB_TABLE: table name
//! - AWS_REGION / AWS_DEFAULT_REGION: region
//! - RESEARCH_STORE__STORAGE__ENDPOINT_URL: endpoint override (DynamoDB Local)
//! - RESEARCH_STORE_LOG: log filter (default "info")

use std::process::ExitCode;

use tracing::{error, info};

use research_store::config::Config;
use research_store::provisioning::BootstrapOutcome;
use research_store::utils::bootstrap::{init_tracing, parse_config_path};
use research_store::StorageContext;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(table = %config.storage.table_name, "Starting research-store-provision");

    let context = StorageContext::connect(&config).await;
    let degraded = matches!(context.initialize().await, BootstrapOutcome::Degraded { .. });

    let report = context.health_check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if degraded || !report.overall {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
