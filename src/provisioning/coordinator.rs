//! Single-flight bootstrap.
//!
//! The first `initialize()` call spawns provisioning as a detached task that
//! every caller awaits, so a caller dropped mid-flight (a request hitting
//! its deadline) neither cancels nor restarts the attempt. A failed attempt
//! is terminal for the lifetime of the coordinator: it is logged, recorded
//! as [`BootstrapOutcome::Degraded`] and never re-thrown, so request
//! handlers that do not need the table keep working.

use std::sync::{Arc, OnceLock};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use super::{ProvisionState, Ready, TableProvisioner};

/// Result of the one provisioning attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The table is ACTIVE.
    Ready(Ready),
    /// Provisioning is disabled by configuration.
    Skipped,
    /// Provisioning failed; the process continues without it.
    Degraded { reason: String, timed_out: bool },
}

/// Operational status, serialized as `{ "storage": bool, "overall": bool }`
/// plus `missingIndexes` when the table lacks required indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub storage: bool,
    pub overall: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_indexes: Vec<String>,
}

/// Runs table provisioning at most once.
pub struct BootstrapCoordinator {
    provisioner: Arc<TableProvisioner>,
    enabled: bool,
    attempt: OnceLock<Shared<BoxFuture<'static, BootstrapOutcome>>>,
    outcome: OnceCell<BootstrapOutcome>,
}

impl BootstrapCoordinator {
    pub fn new(provisioner: TableProvisioner, enabled: bool) -> Self {
        Self {
            provisioner: Arc::new(provisioner),
            enabled,
            attempt: OnceLock::new(),
            outcome: OnceCell::new(),
        }
    }

    /// Provision the table once and return the outcome. Never fails.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn initialize(&self) -> &BootstrapOutcome {
        let attempt = self.attempt.get_or_init(|| self.spawn_attempt()).clone();
        self.outcome.get_or_init(|| attempt).await
    }

    /// True once an attempt has finished, whether it succeeded or not.
    pub fn is_initialized(&self) -> bool {
        self.outcome().is_some()
    }

    /// Outcome of the attempt, if one has finished.
    pub fn outcome(&self) -> Option<&BootstrapOutcome> {
        self.outcome
            .get()
            .or_else(|| self.attempt.get().and_then(Shared::peek))
    }

    pub fn provisioner(&self) -> &TableProvisioner {
        &self.provisioner
    }

    /// Probe the store. Does not trigger or reset initialization.
    pub async fn health_check(&self) -> HealthReport {
        let storage = self.provisioner.test_connection().await;
        let missing_indexes = match self.outcome() {
            Some(BootstrapOutcome::Ready(ready)) => ready.missing_indexes().to_vec(),
            _ => Vec::new(),
        };
        HealthReport {
            storage,
            overall: storage,
            missing_indexes,
        }
    }

    fn spawn_attempt(&self) -> Shared<BoxFuture<'static, BootstrapOutcome>> {
        let task = tokio::spawn(run(self.provisioner.clone(), self.enabled));
        async move {
            task.await.unwrap_or_else(|e| {
                error!(error = %e, "Provisioning task aborted; continuing in degraded mode");
                BootstrapOutcome::Degraded {
                    reason: format!("provisioning task aborted: {e}"),
                    timed_out: false,
                }
            })
        }
        .boxed()
        .shared()
    }
}

async fn run(provisioner: Arc<TableProvisioner>, enabled: bool) -> BootstrapOutcome {
    if !enabled {
        info!(table = %provisioner.table_name(), "Provisioning disabled, skipping");
        return BootstrapOutcome::Skipped;
    }

    match provisioner.ensure_table().await {
        Ok(ready) => {
            if let ProvisionState::Partial { missing } = &ready.state {
                warn!(
                    table = %ready.table,
                    missing = ?missing,
                    "Storage initialized with missing indexes; dependent queries are degraded"
                );
            } else {
                info!(table = %ready.table, state = ?ready.state, "Storage initialized");
            }
            BootstrapOutcome::Ready(ready)
        }
        Err(e) => {
            error!(
                table = %provisioner.table_name(),
                error = %e,
                "Storage initialization failed; continuing in degraded mode"
            );
            BootstrapOutcome::Degraded {
                timed_out: e.is_timeout(),
                reason: e.to_string(),
            }
        }
    }
}
