//! Health checking with hysteresis
//!
//! Every cycle probes all registered wrappers and reads the pool and task
//! group snapshots from their managers. Each component keeps consecutive
//! success and failure counters across cycles, and its published status
//! only moves to `healthy` or `unhealthy` once the matching counter reaches
//! its threshold. Until then it is reported `degraded`.

use crate::backend::{CircuitBreakerState, PoolHealth, TaskGroupHealth};
use crate::config::HealthConfig;
use crate::events::{EventBus, OrchestrationEvent};
use crate::shared::clock::unix_millis;
use crate::shared::task::spawn_supervised;
use crate::wrapper::{Wrapper, WrapperDeps, WrapperFactory, WrapperHealth};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{RwLock, mpsc};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Gauge encoding: 0 healthy, 1 degraded, 2 unhealthy
    pub fn gauge_value(&self) -> i64 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Unhealthy => 2,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Wrapper,
    Pool,
    TaskGroup,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wrapper => "wrapper",
            Self::Pool => "pool",
            Self::TaskGroup => "task_group",
        }
    }

    /// Key of a component in the result map
    pub fn key(&self, name: &str) -> String {
        format!("{}:{}", self.as_str(), name)
    }
}

/// Latest published health of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub kind: ComponentKind,
    pub status: HealthStatus,
    pub message: String,
    pub response_time_ms: u64,
    pub last_checked: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

/// Snapshot of every component after one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalHealth {
    pub status: HealthStatus,
    pub components: Vec<HealthCheckResult>,
    pub timestamp: u64,
}

impl GlobalHealth {
    pub fn component(&self, kind: ComponentKind, name: &str) -> Option<&HealthCheckResult> {
        self.components
            .iter()
            .find(|c| c.kind == kind && c.component == name)
    }
}

/// Apply hysteresis to a raw probe status
///
/// A raw `healthy` stays `degraded` until `healthy_threshold` consecutive
/// successes; a raw `unhealthy` stays `degraded` until
/// `unhealthy_threshold` consecutive failures.
pub fn derive_status(
    raw: HealthStatus,
    consecutive_successes: u32,
    consecutive_failures: u32,
    healthy_threshold: u32,
    unhealthy_threshold: u32,
) -> HealthStatus {
    match raw {
        HealthStatus::Healthy if consecutive_successes < healthy_threshold => {
            HealthStatus::Degraded
        }
        HealthStatus::Unhealthy if consecutive_failures < unhealthy_threshold => {
            HealthStatus::Degraded
        }
        other => other,
    }
}

/// Overall status: any unhealthy wins, then any degraded; no components is degraded
pub fn global_status<'a>(statuses: impl IntoIterator<Item = &'a HealthStatus>) -> HealthStatus {
    let mut any = false;
    let mut degraded = false;
    for status in statuses {
        any = true;
        match status {
            HealthStatus::Unhealthy => return HealthStatus::Unhealthy,
            HealthStatus::Degraded => degraded = true,
            HealthStatus::Healthy => {}
        }
    }
    if !any || degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Raw status of a pool snapshot
pub fn pool_status(health: &PoolHealth) -> HealthStatus {
    if !health.healthy || health.healthy_instances == 0 {
        HealthStatus::Unhealthy
    } else if health.healthy_instances < health.total_instances {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Raw status of a task group snapshot
pub fn task_group_status(health: &TaskGroupHealth) -> HealthStatus {
    if !health.healthy
        || health.circuit_breaker_state == CircuitBreakerState::Open
        || health.active_echelons == 0
    {
        HealthStatus::Unhealthy
    } else if health.active_echelons < health.total_echelons
        || health.circuit_breaker_state == CircuitBreakerState::HalfOpen
    {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// One probe outcome before hysteresis
struct RawProbe {
    component: String,
    kind: ComponentKind,
    status: HealthStatus,
    message: String,
    response_time_ms: u64,
    details: serde_json::Value,
}

pub struct HealthChecker {
    config: HealthConfig,
    factory: Arc<WrapperFactory>,
    deps: WrapperDeps,
    results: RwLock<IndexMap<String, HealthCheckResult>>,
    events: EventBus,
    task: Mutex<Option<AbortHandle>>,
    feeds: Mutex<Vec<mpsc::UnboundedSender<GlobalHealth>>>,
    /// Unix millis of the last completed cycle, 0 before the first
    last_cycle: AtomicU64,
}

impl HealthChecker {
    pub fn new(config: HealthConfig, factory: Arc<WrapperFactory>, events: EventBus) -> Self {
        let deps = factory.deps().clone();
        Self {
            config,
            factory,
            deps,
            results: RwLock::new(IndexMap::new()),
            events,
            task: Mutex::new(None),
            feeds: Mutex::new(Vec::new()),
            last_cycle: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Receive every snapshot from now on, in order and without loss
    ///
    /// Unlike the event bus, a slow reader never misses a snapshot. Drop
    /// the receiver to detach.
    pub fn snapshot_feed(&self) -> mpsc::UnboundedReceiver<GlobalHealth> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    /// Start the background loop: one immediate cycle, then one per interval
    ///
    /// Does nothing when the interval is 0. Calling it again replaces the
    /// running loop.
    pub fn start(self: &Arc<Self>) {
        let Some(interval) = self.config.interval() else {
            tracing::info!("Health check loop disabled (interval_seconds = 0)");
            return;
        };

        let checker = Arc::clone(self);
        let abort = spawn_supervised("health_check", async move {
            tracing::info!(
                interval_seconds = interval.as_secs(),
                "Starting background health checks"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tracing::debug!("Running scheduled health checks");
                checker.check_all().await;
            }
        });

        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(abort);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            tracing::info!("Background health checks stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Run one full cycle, publish the snapshot and return it
    ///
    /// Each wrapper's cached health is overwritten with its published
    /// status, so routing follows the thresholds and treats a probe that
    /// timed out as failed.
    pub async fn check_all(&self) -> GlobalHealth {
        let wrappers = self.factory.get_all_wrappers().await;
        let mut probes = self.probe_wrappers(&wrappers).await;
        probes.extend(self.probe_pools().await);
        probes.extend(self.probe_task_groups().await);

        let now = unix_millis();
        let mut results = self.results.write().await;

        let seen: HashSet<String> = probes
            .iter()
            .map(|p| p.kind.key(&p.component))
            .collect();
        results.retain(|key, result| {
            let keep = seen.contains(key);
            if !keep {
                tracing::debug!(
                    component = %result.component,
                    kind = result.kind.as_str(),
                    "Pruned health entry for removed component"
                );
            }
            keep
        });

        for probe in probes {
            let key = probe.kind.key(&probe.component);
            let (mut successes, mut failures, previous_status) = results
                .get(&key)
                .map(|r| (r.consecutive_successes, r.consecutive_failures, Some(r.status)))
                .unwrap_or((0, 0, None));

            // Degraded probes still answered, so they count as successes
            if probe.status == HealthStatus::Unhealthy {
                failures = failures.saturating_add(1);
                successes = 0;
            } else {
                successes = successes.saturating_add(1);
                failures = 0;
            }

            let status = derive_status(
                probe.status,
                successes,
                failures,
                self.config.healthy_threshold,
                self.config.unhealthy_threshold,
            );
            log_transition(&probe, previous_status, status);

            results.insert(
                key,
                HealthCheckResult {
                    component: probe.component,
                    kind: probe.kind,
                    status,
                    message: probe.message,
                    response_time_ms: probe.response_time_ms,
                    last_checked: now,
                    consecutive_failures: failures,
                    consecutive_successes: successes,
                    details: probe.details,
                },
            );
        }

        let snapshot = GlobalHealth {
            status: global_status(results.values().map(|r| &r.status)),
            components: results.values().cloned().collect(),
            timestamp: now,
        };
        self.last_cycle.store(now, Ordering::Release);
        let verdicts: Vec<(&Arc<dyn Wrapper>, WrapperHealth)> = wrappers
            .iter()
            .filter_map(|wrapper| {
                let result = results.get(&ComponentKind::Wrapper.key(wrapper.name()))?;
                Some((
                    wrapper,
                    WrapperHealth {
                        status: result.status,
                        message: result.message.clone(),
                        response_time_ms: result.response_time_ms,
                        checked_at: now,
                        details: result.details.clone(),
                    },
                ))
            })
            .collect();
        drop(results);

        for (wrapper, health) in verdicts {
            wrapper.core().set_health(health).await;
        }

        tracing::debug!(
            status = %snapshot.status,
            components = snapshot.components.len(),
            "Health check cycle completed"
        );
        self.feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|feed| feed.send(snapshot.clone()).is_ok());
        self.events
            .publish(OrchestrationEvent::HealthCheck(snapshot.clone()));
        snapshot
    }

    /// Probe wrappers concurrently, each raced against the timeout
    ///
    /// A probe that loses the race is dropped, so a late answer never
    /// reaches the counters.
    async fn probe_wrappers(&self, wrappers: &[Arc<dyn Wrapper>]) -> Vec<RawProbe> {
        let timeout = self.config.timeout();
        join_all(wrappers.iter().map(|wrapper| async move {
            let started = Instant::now();
            let outcome = tokio::time::timeout(timeout, wrapper.health_check()).await;
            let elapsed = started.elapsed().as_millis() as u64;
            let (status, message, details, response_time_ms) = match outcome {
                Ok(Ok(health)) => (
                    health.status,
                    health.message,
                    health.details,
                    health.response_time_ms,
                ),
                Ok(Err(e)) => (
                    HealthStatus::Unhealthy,
                    e.to_string(),
                    serde_json::Value::Null,
                    elapsed,
                ),
                Err(_elapsed) => (
                    HealthStatus::Unhealthy,
                    format!("health check timed out after {}ms", self.config.timeout_ms),
                    serde_json::Value::Null,
                    elapsed,
                ),
            };
            RawProbe {
                component: wrapper.name().to_string(),
                kind: ComponentKind::Wrapper,
                status,
                message,
                response_time_ms,
                details,
            }
        }))
        .await
    }

    async fn probe_pools(&self) -> Vec<RawProbe> {
        let started = Instant::now();
        match tokio::time::timeout(self.config.timeout(), self.deps.pools.global_health_check())
            .await
        {
            Ok(pools) => {
                let elapsed = started.elapsed().as_millis() as u64;
                pools
                    .into_iter()
                    .map(|(name, health)| RawProbe {
                        status: pool_status(&health),
                        message: format!(
                            "{}/{} instances healthy",
                            health.healthy_instances, health.total_instances
                        ),
                        details: serde_json::json!({
                            "healthy_instances": health.healthy_instances,
                            "total_instances": health.total_instances,
                            "errors": health.errors,
                        }),
                        component: name,
                        kind: ComponentKind::Pool,
                        response_time_ms: elapsed,
                    })
                    .collect()
            }
            Err(_elapsed) => self.timed_out(ComponentKind::Pool).await,
        }
    }

    async fn probe_task_groups(&self) -> Vec<RawProbe> {
        let started = Instant::now();
        match tokio::time::timeout(
            self.config.timeout(),
            self.deps.task_groups.global_health_check(),
        )
        .await
        {
            Ok(groups) => {
                let elapsed = started.elapsed().as_millis() as u64;
                groups
                    .into_iter()
                    .map(|(name, health)| RawProbe {
                        status: task_group_status(&health),
                        message: format!(
                            "{}/{} echelons active, circuit {}",
                            health.active_echelons,
                            health.total_echelons,
                            health.circuit_breaker_state.as_str()
                        ),
                        details: serde_json::json!({
                            "active_echelons": health.active_echelons,
                            "total_echelons": health.total_echelons,
                            "circuit_breaker_state": health.circuit_breaker_state.as_str(),
                            "errors": health.errors,
                        }),
                        component: name,
                        kind: ComponentKind::TaskGroup,
                        response_time_ms: elapsed,
                    })
                    .collect()
            }
            Err(_elapsed) => self.timed_out(ComponentKind::TaskGroup).await,
        }
    }

    /// Failures for every known component of a kind whose snapshot timed out
    async fn timed_out(&self, kind: ComponentKind) -> Vec<RawProbe> {
        tracing::warn!(
            kind = kind.as_str(),
            timeout_ms = self.config.timeout_ms,
            "Global health snapshot timed out"
        );
        self.results
            .read()
            .await
            .values()
            .filter(|r| r.kind == kind)
            .map(|r| RawProbe {
                component: r.component.clone(),
                kind,
                status: HealthStatus::Unhealthy,
                message: format!("health snapshot timed out after {}ms", self.config.timeout_ms),
                response_time_ms: self.config.timeout_ms,
                details: serde_json::Value::Null,
            })
            .collect()
    }

    pub async fn get_component_health(
        &self,
        kind: ComponentKind,
        name: &str,
    ) -> Option<HealthCheckResult> {
        self.results.read().await.get(&kind.key(name)).cloned()
    }

    pub async fn get_all_results(&self) -> Vec<HealthCheckResult> {
        self.results.read().await.values().cloned().collect()
    }

    /// Snapshot of the current results without probing
    pub async fn get_global_health(&self) -> GlobalHealth {
        let results = self.results.read().await;
        GlobalHealth {
            status: global_status(results.values().map(|r| &r.status)),
            components: results.values().cloned().collect(),
            timestamp: unix_millis(),
        }
    }

    /// Whether at least one cycle has completed
    pub fn has_results(&self) -> bool {
        self.last_cycle_at().is_some()
    }

    pub fn last_cycle_at(&self) -> Option<u64> {
        match self.last_cycle.load(Ordering::Acquire) {
            0 => None,
            at => Some(at),
        }
    }
}

fn log_transition(probe: &RawProbe, previous: Option<HealthStatus>, status: HealthStatus) {
    if previous == Some(status) {
        return;
    }
    match status {
        HealthStatus::Unhealthy => tracing::warn!(
            component = %probe.component,
            kind = probe.kind.as_str(),
            previous = ?previous,
            message = %probe.message,
            "Component marked unhealthy"
        ),
        HealthStatus::Degraded => tracing::info!(
            component = %probe.component,
            kind = probe.kind.as_str(),
            previous = ?previous,
            message = %probe.message,
            "Component degraded"
        ),
        HealthStatus::Healthy => tracing::info!(
            component = %probe.component,
            kind = probe.kind.as_str(),
            previous = ?previous,
            "Component healthy"
        ),
    }
}
