//! Health aggregation over dependency capabilities.
//!
//! Three read-only queries with distinct contracts:
//! - liveness never touches dependencies, so orchestrators can tell
//!   "process up" from "process ready";
//! - readiness pings every registered dependency under a bounded per-probe
//!   timeout and explains any failure;
//! - health is the readiness superset with version/environment metadata,
//!   meant for operators rather than probes.
//!
//! Snapshots are recomputed on every query -- caching one would let a stale
//! "healthy" mask an outage. A dependency blip is expected operational
//! noise, so ping failures log at warn, never error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::warn;

use crate::cache::UserCache;
use crate::network::{ServerPhase, ShutdownController};
use crate::storage::Storage;

/// Classified dependency ping failures.
///
/// Recovered locally: a failing dependency degrades its reported status and
/// never crashes the health query.
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("ping timed out after {0:?}")]
    Timeout(Duration),
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("degraded: {0}")]
    Degraded(String),
}

impl DependencyError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Unreachable(_) => "unreachable",
            Self::Degraded(_) => "degraded",
        }
    }
}

/// A pingable dependency capability.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Stable dependency name used in reasons and logs.
    fn name(&self) -> &'static str;

    /// Checks the dependency. The aggregator enforces the timeout; probes
    /// only classify their own failures.
    async fn ping(&self) -> Result<(), DependencyError>;
}

/// Per-dependency (and overall) health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Point-in-time status of a single dependency.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub name: &'static str,
    pub status: HealthVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Liveness answer: process-level only.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Liveness {
    pub alive: bool,
}

/// Readiness answer with failure reasons.
#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub reasons: Vec<String>,
}

/// Operator-facing aggregate, recomputed per query.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthVerdict,
    pub phase: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub uptime_secs: u64,
    pub dependencies: Vec<DependencyStatus>,
}

// ---------------------------------------------------------------------------
// HealthAggregator
// ---------------------------------------------------------------------------

/// Answers liveness/readiness/health queries over registered probes.
pub struct HealthAggregator {
    probes: Vec<Arc<dyn DependencyProbe>>,
    probe_timeout: Duration,
    lifecycle: Arc<ShutdownController>,
    environment: String,
    started_at: Instant,
}

impl HealthAggregator {
    #[must_use]
    pub fn new(
        lifecycle: Arc<ShutdownController>,
        probe_timeout: Duration,
        environment: String,
    ) -> Self {
        Self {
            probes: Vec::new(),
            probe_timeout,
            lifecycle,
            environment,
            started_at: Instant::now(),
        }
    }

    /// Registers a dependency to be pinged by readiness and health queries.
    pub fn register_probe(&mut self, probe: Arc<dyn DependencyProbe>) {
        self.probes.push(probe);
    }

    /// Process-level liveness. Dependency-free by contract: a failed
    /// liveness probe restarts the process, which no dependency outage
    /// should be able to trigger.
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        Liveness {
            alive: !matches!(
                self.lifecycle.phase(),
                ServerPhase::Draining | ServerPhase::Stopped
            ),
        }
    }

    /// Whether the process can currently serve traffic.
    pub async fn readiness(&self) -> Readiness {
        let phase = self.lifecycle.phase();
        if phase != ServerPhase::Ready {
            return Readiness {
                ready: false,
                reasons: vec![format!("server is {}", phase.as_str())],
            };
        }

        let reasons: Vec<String> = self
            .probe_all()
            .await
            .into_iter()
            .filter(|dep| dep.status != HealthVerdict::Healthy)
            .map(|dep| {
                format!(
                    "{}: {}",
                    dep.name,
                    dep.detail.unwrap_or_else(|| "ping failed".to_string())
                )
            })
            .collect();

        Readiness {
            ready: reasons.is_empty(),
            reasons,
        }
    }

    /// Full snapshot for operator consumption.
    pub async fn health(&self) -> HealthSnapshot {
        let dependencies = self.probe_all().await;
        let status = overall_verdict(&dependencies);
        HealthSnapshot {
            status,
            phase: self.lifecycle.phase().as_str(),
            version: env!("CARGO_PKG_VERSION"),
            environment: self.environment.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            dependencies,
        }
    }

    /// Pings every probe concurrently, each under its own timeout, so one
    /// hung dependency can never stall the query past a single timeout.
    async fn probe_all(&self) -> Vec<DependencyStatus> {
        let timeout = self.probe_timeout;
        join_all(self.probes.iter().map(|probe| {
            let probe = Arc::clone(probe);
            async move {
                let outcome = match tokio::time::timeout(timeout, probe.ping()).await {
                    Ok(result) => result,
                    Err(_elapsed) => Err(DependencyError::Timeout(timeout)),
                };
                match outcome {
                    Ok(()) => DependencyStatus {
                        name: probe.name(),
                        status: HealthVerdict::Healthy,
                        detail: None,
                    },
                    Err(err) => {
                        warn!(
                            dependency = probe.name(),
                            kind = err.kind(),
                            detail = %err,
                            "dependency ping failed"
                        );
                        let status = match err {
                            DependencyError::Degraded(_) => HealthVerdict::Degraded,
                            _ => HealthVerdict::Unhealthy,
                        };
                        DependencyStatus {
                            name: probe.name(),
                            status,
                            detail: Some(err.to_string()),
                        }
                    }
                }
            }
        }))
        .await
    }
}

/// Worst-of aggregation: any unhealthy dependency makes the service
/// unhealthy; otherwise any degraded one makes it degraded.
fn overall_verdict(dependencies: &[DependencyStatus]) -> HealthVerdict {
    if dependencies
        .iter()
        .any(|d| d.status == HealthVerdict::Unhealthy)
    {
        HealthVerdict::Unhealthy
    } else if dependencies
        .iter()
        .any(|d| d.status == HealthVerdict::Degraded)
    {
        HealthVerdict::Degraded
    } else {
        HealthVerdict::Healthy
    }
}

// ---------------------------------------------------------------------------
// Built-in probes
// ---------------------------------------------------------------------------

/// Probe over the persistence capability.
pub struct StorageProbe {
    storage: Arc<dyn Storage>,
}

impl StorageProbe {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl DependencyProbe for StorageProbe {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn ping(&self) -> Result<(), DependencyError> {
        self.storage
            .ping()
            .await
            .map_err(|err| DependencyError::Unreachable(err.to_string()))
    }
}

/// Probe over the cache capability.
pub struct CacheProbe {
    cache: Arc<UserCache>,
}

impl CacheProbe {
    #[must_use]
    pub fn new(cache: Arc<UserCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl DependencyProbe for CacheProbe {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn ping(&self) -> Result<(), DependencyError> {
        self.cache
            .ping()
            .map_err(|err| DependencyError::Unreachable(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct HealthyProbe(&'static str);

    #[async_trait]
    impl DependencyProbe for HealthyProbe {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn ping(&self) -> Result<(), DependencyError> {
            Ok(())
        }
    }

    /// Sleeps past any reasonable probe timeout.
    struct HungProbe(&'static str);

    #[async_trait]
    impl DependencyProbe for HungProbe {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn ping(&self) -> Result<(), DependencyError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    struct DegradedProbe(&'static str);

    #[async_trait]
    impl DependencyProbe for DegradedProbe {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn ping(&self) -> Result<(), DependencyError> {
            Err(DependencyError::Degraded("replica lag".to_string()))
        }
    }

    fn ready_controller() -> Arc<ShutdownController> {
        let controller = Arc::new(ShutdownController::new());
        controller.set_ready();
        controller
    }

    fn aggregator(probes: Vec<Arc<dyn DependencyProbe>>) -> HealthAggregator {
        let mut agg = HealthAggregator::new(
            ready_controller(),
            Duration::from_millis(50),
            "test".to_string(),
        );
        for probe in probes {
            agg.register_probe(probe);
        }
        agg
    }

    #[tokio::test]
    async fn all_healthy_is_ready() {
        let agg = aggregator(vec![
            Arc::new(HealthyProbe("storage")),
            Arc::new(HealthyProbe("cache")),
        ]);
        let readiness = agg.readiness().await;
        assert!(readiness.ready);
        assert!(readiness.reasons.is_empty());
    }

    #[tokio::test]
    async fn storage_timeout_blocks_readiness_but_not_liveness() {
        let agg = aggregator(vec![
            Arc::new(HungProbe("storage")),
            Arc::new(HealthyProbe("cache")),
        ]);

        let readiness = agg.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reasons.len(), 1);
        assert!(readiness.reasons[0].starts_with("storage:"));
        assert!(readiness.reasons[0].contains("timed out"));

        // The process itself is still alive.
        assert!(agg.liveness().alive);
    }

    #[tokio::test]
    async fn hung_probe_is_bounded_by_its_timeout() {
        let agg = aggregator(vec![Arc::new(HungProbe("storage"))]);
        let started = Instant::now();
        let _ = agg.readiness().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn degraded_dependency_degrades_overall_verdict() {
        let agg = aggregator(vec![
            Arc::new(HealthyProbe("storage")),
            Arc::new(DegradedProbe("cache")),
        ]);
        let snapshot = agg.health().await;
        assert_eq!(snapshot.status, HealthVerdict::Degraded);
        let cache = snapshot
            .dependencies
            .iter()
            .find(|d| d.name == "cache")
            .unwrap();
        assert_eq!(cache.status, HealthVerdict::Degraded);
    }

    #[tokio::test]
    async fn unhealthy_wins_over_degraded() {
        let agg = aggregator(vec![
            Arc::new(DegradedProbe("cache")),
            Arc::new(HungProbe("storage")),
        ]);
        let snapshot = agg.health().await;
        assert_eq!(snapshot.status, HealthVerdict::Unhealthy);
    }

    #[tokio::test]
    async fn snapshot_carries_metadata() {
        let agg = aggregator(vec![Arc::new(HealthyProbe("storage"))]);
        let snapshot = agg.health().await;
        assert_eq!(snapshot.status, HealthVerdict::Healthy);
        assert_eq!(snapshot.environment, "test");
        assert_eq!(snapshot.phase, "ready");
        assert!(!snapshot.version.is_empty());
    }

    #[tokio::test]
    async fn draining_server_is_not_alive_and_not_ready() {
        let controller = ready_controller();
        let agg = HealthAggregator::new(
            Arc::clone(&controller),
            Duration::from_millis(50),
            "test".to_string(),
        );
        controller.trigger_shutdown();

        assert!(!agg.liveness().alive);
        let readiness = agg.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reasons, vec!["server is draining".to_string()]);
    }

    #[tokio::test]
    async fn starting_server_is_alive_but_not_ready() {
        let controller = Arc::new(ShutdownController::new());
        let agg = HealthAggregator::new(controller, Duration::from_millis(50), "test".to_string());

        assert!(agg.liveness().alive);
        assert!(!agg.readiness().await.ready);
    }

    #[tokio::test]
    async fn built_in_probes_report_healthy() {
        let storage: Arc<dyn Storage> = Arc::new(crate::storage::MemoryStorage::new());
        let cache = Arc::new(UserCache::new());
        let agg = aggregator(vec![
            Arc::new(StorageProbe::new(storage)),
            Arc::new(CacheProbe::new(cache)),
        ]);
        assert!(agg.readiness().await.ready);
    }
}
