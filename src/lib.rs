//! Research Store - storage layer for UX research studies
//!
//! Provisions a single shared DynamoDB table with its secondary indexes,
//! ingests participant responses with re-entry merging, manages research
//! rows and their configuration documents, and derives research metrics
//! (NPS, CSAT/CES/CV, NEV, trust flow) from stored responses.

pub mod config;
pub mod context;
pub mod ingest;
pub mod metrics;
pub mod provisioning;
pub mod research;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use context::StorageContext;
pub use ingest::{IngestError, IngestRequest, ModuleResponse, ResponseIngestor};
pub use metrics::{MetricsAggregator, MetricsSummary, TrustFlowPoint};
pub use provisioning::{BootstrapCoordinator, BootstrapOutcome, HealthReport, TableProvisioner};
pub use research::{Research, ResearchError, ResearchRepository};
pub use storage::{EntityStore, StorageError};
