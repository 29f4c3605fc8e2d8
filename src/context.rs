//! Process-wide wiring of the storage layer.
//!
//! One [`StorageContext`] per process: it owns the store handle, the
//! bootstrap coordinator and the services built on the store, all sharing
//! the same table.

use std::sync::Arc;

use crate::config::Config;
use crate::ingest::ResponseIngestor;
use crate::metrics::MetricsAggregator;
use crate::provisioning::{
    BootstrapCoordinator, BootstrapOutcome, HealthReport, TableAdmin, TableProvisioner,
};
use crate::research::ResearchRepository;
use crate::storage::{EntityStore, CATALOG};
use crate::utils::retry::{provisioning_backoff, write_conflict_backoff};

/// Everything request handlers need from the storage layer.
pub struct StorageContext {
    store: Arc<dyn EntityStore>,
    bootstrap: BootstrapCoordinator,
    ingestor: ResponseIngestor,
    research: ResearchRepository,
    metrics: MetricsAggregator,
}

impl StorageContext {
    /// Assemble a context over explicit backends.
    pub fn from_parts(
        store: Arc<dyn EntityStore>,
        admin: Arc<dyn TableAdmin>,
        config: &Config,
    ) -> Self {
        let provisioner = TableProvisioner::new(
            admin,
            config.storage.table_name.clone(),
            &CATALOG,
            provisioning_backoff(&config.provisioning),
        );

        Self {
            bootstrap: BootstrapCoordinator::new(provisioner, config.provisioning.enabled),
            ingestor: ResponseIngestor::new(store.clone(), &config.ingest),
            research: ResearchRepository::new(store.clone(), write_conflict_backoff(&config.ingest)),
            metrics: MetricsAggregator::new(store.clone()),
            store,
        }
    }

    /// Connect to DynamoDB using the configured table, region and endpoint.
    #[cfg(feature = "dynamo")]
    pub async fn connect(config: &Config) -> Self {
        use tracing::info;

        use crate::storage::dynamo::{self, DynamoEntityStore, DynamoTableAdmin};

        info!(
            table = %config.storage.table_name,
            region = config.storage.region.as_deref().unwrap_or("<sdk default>"),
            "Storage: dynamodb"
        );

        let client = dynamo::connect(&config.storage).await;
        let store = Arc::new(DynamoEntityStore::new(
            client.clone(),
            config.storage.table_name.clone(),
        ));
        let admin = Arc::new(DynamoTableAdmin::new(client, &config.storage));
        Self::from_parts(store, admin, config)
    }

    /// Run table bootstrap once. Later calls return the first outcome.
    pub async fn initialize(&self) -> &BootstrapOutcome {
        self.bootstrap.initialize().await
    }

    pub async fn health_check(&self) -> HealthReport {
        self.bootstrap.health_check().await
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn bootstrap(&self) -> &BootstrapCoordinator {
        &self.bootstrap
    }

    pub fn ingestor(&self) -> &ResponseIngestor {
        &self.ingestor
    }

    pub fn research(&self) -> &ResearchRepository {
        &self.research
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }
}
