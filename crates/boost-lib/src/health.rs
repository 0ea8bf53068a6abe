//! Health of the agent's storage, aggregation and expiry sweep
//!
//! Aggregation passes and sweeps report their outcome here. One failure
//! degrades a component; [`FAILURES_UNTIL_UNHEALTHY`] failures in a row mark
//! it unhealthy. A success resets it. Backs `/healthz` and `/readyz`.

use crate::aggregator::{AggregateReport, SweepReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

pub const FAILURES_UNTIL_UNHEALTHY: u32 = 3;

/// Tracked parts of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// The key-value store behind every partition
    Storage,
    /// Folding samples into statistics and the integrity index
    Aggregator,
    /// Periodic expiry of stale records
    Sweeper,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Storage, Component::Aggregator, Component::Sweeper];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Storage => "storage",
            Component::Aggregator => "aggregator",
            Component::Sweeper => "sweeper",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    /// Last failure, cleared on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub consecutive_failures: u32,
    /// When the status last changed
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    fn healthy(now: DateTime<Utc>) -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            since: now,
        }
    }

    fn succeed(&mut self, now: DateTime<Utc>) {
        if self.status != ComponentStatus::Healthy {
            *self = Self::healthy(now);
        }
    }

    fn fail(&mut self, message: String, now: DateTime<Utc>) -> ComponentStatus {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let status = if self.consecutive_failures >= FAILURES_UNTIL_UNHEALTHY {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        if status != self.status {
            self.since = now;
        }
        self.status = status;
        self.message = Some(message);
        status
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status across components
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct State {
    components: BTreeMap<Component, ComponentHealth>,
    storage_open: bool,
}

/// Shared health state; clones observe the same components
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every component starts healthy; the agent is not ready until the
    /// store is opened.
    pub fn new() -> Self {
        let now = Utc::now();
        let components = Component::ALL
            .iter()
            .map(|c| (*c, ComponentHealth::healthy(now)))
            .collect();
        Self {
            state: Arc::new(RwLock::new(State {
                components,
                storage_open: false,
            })),
        }
    }

    pub async fn record_success(&self, component: Component) {
        let mut state = self.state.write().await;
        if let Some(health) = state.components.get_mut(&component) {
            health.succeed(Utc::now());
        }
    }

    pub async fn record_failure(&self, component: Component, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.state.write().await;
        if let Some(health) = state.components.get_mut(&component) {
            let status = health.fail(message.clone(), Utc::now());
            warn!(
                component = %component,
                status = ?status,
                failures = health.consecutive_failures,
                error = %message,
                "Component failure recorded"
            );
        }
    }

    /// The store opened; the agent may serve traffic
    pub async fn mark_storage_open(&self) {
        self.state.write().await.storage_open = true;
    }

    /// The store could not be opened
    pub async fn mark_storage_failed(&self, message: impl Into<String>) {
        self.state.write().await.storage_open = false;
        self.record_failure(Component::Storage, message).await;
    }

    /// Fold one aggregation pass into storage and aggregator health.
    /// Passes with no samples are ignored.
    pub async fn observe_aggregation(&self, report: &AggregateReport) {
        if report.samples == 0 {
            return;
        }

        let failed_batches: Vec<&str> = [
            ("stats", &report.stats_batch),
            ("integrity", &report.integrity_batch),
        ]
        .into_iter()
        .filter(|(_, outcome)| outcome.is_failed())
        .map(|(name, _)| name)
        .collect();

        if report.read_failures > 0 || !failed_batches.is_empty() {
            self.record_failure(
                Component::Storage,
                format!(
                    "{} read failures, failed batches: [{}]",
                    report.read_failures,
                    failed_batches.join(", ")
                ),
            )
            .await;
        } else {
            self.record_success(Component::Storage).await;
        }

        if failed_batches.is_empty() {
            self.record_success(Component::Aggregator).await;
        } else {
            self.record_failure(
                Component::Aggregator,
                format!("{} batch dropped after retries", failed_batches.join(" and ")),
            )
            .await;
        }
    }

    /// Fold one expiry sweep into sweeper and storage health
    pub async fn observe_sweep(&self, report: &SweepReport) {
        if report.failures > 0 {
            let message = format!("{} expiry failures", report.failures);
            self.record_failure(Component::Sweeper, message.clone()).await;
            self.record_failure(Component::Storage, message).await;
        } else {
            self.record_success(Component::Sweeper).await;
            self.record_success(Component::Storage).await;
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.storage_open {
            return ReadinessResponse {
                ready: false,
                reason: Some("storage not open".to_string()),
            };
        }

        let unhealthy: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, h)| h.status == ComponentStatus::Unhealthy)
            .map(|(c, _)| c.as_str())
            .collect();

        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("unhealthy: {}", unhealthy.join(", "))),
            }
        }
    }
}
