//! Orchestration facade
//!
//! `OrchestrationService` owns every subsystem and wires them together:
//! the wrapper factory and router, the health checker, the metrics
//! collector, the alerting service and the Prometheus registry. Request
//! outcomes flow into the collector; health snapshots flow to alerting
//! through the checker's snapshot feed.

use crate::alerting::{Alert, AlertStatistics, AlertingService};
use crate::backend::CompletionRequest;
use crate::collector::{MetricTags, MetricsCollector, SeriesSummary};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::events::{EventBus, OrchestrationEvent, Subscription};
use crate::health::{ComponentKind, HealthCheckResult, HealthChecker, HealthStatus};
use crate::metrics::{Metrics, Outcome};
use crate::shared::clock::unix_millis;
use crate::shared::task::spawn_supervised;
use crate::wrapper::{
    RoutedResponse, RoutedStream, WrapperConfig, WrapperDeps, WrapperFactory, WrapperManager,
    WrapperStatistics, WrapperType,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;

pub const SERIES_REQUESTS_TOTAL: &str = "requests.total";
pub const SERIES_REQUESTS_SUCCESS: &str = "requests.success";
pub const SERIES_REQUESTS_ERROR: &str = "requests.error";
pub const SERIES_REQUESTS_LATENCY: &str = "requests.latency_ms";
pub const SERIES_STREAMS_OPENED: &str = "requests.stream_opened";

/// Number of resolved alerts included in status reports
const ALERT_HISTORY_LIMIT: usize = 50;

/// Overall health as reported to callers; `Unknown` before the first cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl From<HealthStatus> for ServiceHealth {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Healthy => Self::Healthy,
            HealthStatus::Degraded => Self::Degraded,
            HealthStatus::Unhealthy => Self::Unhealthy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: ServiceHealth,
    pub components: Vec<HealthCheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl HealthReport {
    fn unknown() -> Self {
        Self {
            status: ServiceHealth::Unknown,
            components: Vec::new(),
            timestamp: None,
        }
    }
}

/// One registered wrapper as seen by the status report
#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub wrapper_type: WrapperType,
    pub enabled: bool,
    pub health: Option<HealthStatus>,
    pub statistics: WrapperStatistics,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    pub series: Vec<SeriesSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsReport {
    pub enabled: bool,
    pub active: Vec<Alert>,
    pub history: Vec<Alert>,
    pub statistics: AlertStatistics,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub initialized: bool,
    pub health: HealthReport,
    pub components: Vec<ComponentStatus>,
    pub metrics: MetricsReport,
    pub alerts: AlertsReport,
    pub last_updated: u64,
}

/// Wrapper changes made by one configuration reload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
    pub recreated: Vec<String>,
    pub failed: Vec<String>,
    pub rules_applied: usize,
}

impl ReloadSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.updated.is_empty()
            && self.recreated.is_empty()
            && self.failed.is_empty()
    }
}

pub struct OrchestrationService {
    config: RwLock<Config>,
    config_path: Option<PathBuf>,
    events: EventBus,
    factory: Arc<WrapperFactory>,
    manager: WrapperManager,
    health: Arc<HealthChecker>,
    collector: Arc<MetricsCollector>,
    alerting: Arc<AlertingService>,
    metrics: Arc<Metrics>,
    initialized: AtomicBool,
    shut_down: AtomicBool,
    lifecycle: Mutex<()>,
    forwarder: StdMutex<Option<AbortHandle>>,
}

impl OrchestrationService {
    /// Build every subsystem from a validated configuration
    ///
    /// Nothing runs until [`initialize`](Self::initialize) is called.
    pub fn new(config: Config, deps: WrapperDeps) -> AppResult<Self> {
        config.validate()?;
        let metrics = Metrics::new().map_err(|e| {
            AppError::Internal(format!("failed to register Prometheus metrics: {}", e))
        })?;

        let events = EventBus::default();
        let factory = Arc::new(WrapperFactory::new(deps));
        let manager = WrapperManager::new(Arc::clone(&factory));
        let health = Arc::new(HealthChecker::new(
            config.health.clone(),
            Arc::clone(&factory),
            events.clone(),
        ));
        let collector = Arc::new(MetricsCollector::new(config.metrics.clone(), events.clone()));
        let alerting = Arc::new(AlertingService::new(config.alerting.clone(), events.clone()));

        Ok(Self {
            config: RwLock::new(config),
            config_path: None,
            events,
            factory,
            manager,
            health,
            collector,
            alerting,
            metrics: Arc::new(metrics),
            initialized: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            forwarder: StdMutex::new(None),
        })
    }

    /// Load the configuration file and remember its path for reloads
    pub fn from_file<P: AsRef<Path>>(path: P, deps: WrapperDeps) -> AppResult<Self> {
        let path = path.as_ref();
        let config = Config::from_file(path)?;
        let mut service = Self::new(config, deps)?;
        service.config_path = Some(path.to_path_buf());
        Ok(service)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Attach a new event subscriber; drop the handle to detach
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn factory(&self) -> &Arc<WrapperFactory> {
        &self.factory
    }

    pub fn manager(&self) -> &WrapperManager {
        &self.manager
    }

    pub fn health_checker(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn alerting(&self) -> &Arc<AlertingService> {
        &self.alerting
    }

    pub fn prometheus(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Start every subsystem
    ///
    /// Wrapper creation is best-effort: a wrapper that fails to build is
    /// logged and skipped. Calling this twice is a no-op; calling it after
    /// [`shutdown`](Self::shutdown) fails.
    pub async fn initialize(&self) -> AppResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.shut_down.load(Ordering::Acquire) {
            return Err(AppError::Internal(
                "orchestration service has been shut down".to_string(),
            ));
        }
        if self.is_initialized() {
            tracing::debug!("Orchestration service already initialized");
            return Ok(());
        }

        let start = Instant::now();
        let wrappers = self.config.read().await.wrappers.clone();

        self.collector.start();
        self.alerting.start();
        // Subscribe before the first health cycle can publish
        self.start_forwarder();

        let created = self.factory.create_wrappers(wrappers.clone()).await;
        if created.len() < wrappers.len() {
            tracing::warn!(
                configured = wrappers.len(),
                created = created.len(),
                "Some configured wrappers failed to initialize"
            );
        }

        self.health.start();
        self.initialized.store(true, Ordering::Release);
        self.events.publish(OrchestrationEvent::Initialized);

        tracing::info!(
            wrapper_count = created.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Orchestration service initialized"
        );
        Ok(())
    }

    /// Feed health snapshots to alerting and the Prometheus gauges, and
    /// count alerts
    ///
    /// Snapshots arrive on the checker's lossless feed so none is dropped
    /// when the event bus is busy with metric events.
    fn start_forwarder(&self) {
        let mut snapshots = self.health.snapshot_feed();
        let mut subscription = self.events.subscribe();
        let alerting = Arc::clone(&self.alerting);
        let metrics = Arc::clone(&self.metrics);

        let abort = spawn_supervised("event_forwarder", async move {
            let mut gauges: HashSet<(String, ComponentKind)> = HashSet::new();
            loop {
                tokio::select! {
                    Some(snapshot) = snapshots.recv() => {
                        let seen: HashSet<(String, ComponentKind)> = snapshot
                            .components
                            .iter()
                            .map(|c| (c.component.clone(), c.kind))
                            .collect();
                        for (component, kind) in gauges.difference(&seen) {
                            metrics.remove_component_health(component, *kind);
                        }
                        for result in &snapshot.components {
                            metrics.set_component_health(
                                &result.component,
                                result.kind,
                                result.status,
                            );
                        }
                        gauges = seen;

                        let fired = alerting.process_health_check(&snapshot).await;
                        if !fired.is_empty() {
                            tracing::debug!(
                                alert_count = fired.len(),
                                "Health snapshot raised alerts"
                            );
                        }
                    }
                    event = subscription.recv() => match event {
                        Some(OrchestrationEvent::Alert(alert)) => metrics.record_alert(alert.level),
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });

        let previous = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(abort);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn ensure_initialized(&self) -> AppResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(AppError::NotInitialized)
        }
    }

    /// Route one request and record its outcome
    pub async fn execute_request(
        &self,
        request: &CompletionRequest,
        wrapper_name: Option<&str>,
    ) -> AppResult<RoutedResponse> {
        request.validate()?;
        self.ensure_initialized()?;

        let start = Instant::now();
        let result = self.manager.execute_request(request, wrapper_name).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(routed) => {
                self.record_outcome(&routed.wrapper_name, Ok(()), latency_ms)
                    .await;
            }
            Err(e) => {
                let wrapper = failed_wrapper_name(e, wrapper_name);
                tracing::warn!(
                    wrapper_name = %wrapper,
                    error = %e,
                    error_type = e.error_type(),
                    "Request failed"
                );
                self.record_outcome(&wrapper, Err(e), latency_ms).await;
            }
        }
        result
    }

    /// Route one streaming request; only the open is recorded
    pub async fn execute_stream_request(
        &self,
        request: &CompletionRequest,
        wrapper_name: Option<&str>,
    ) -> AppResult<RoutedStream> {
        request.validate()?;
        self.ensure_initialized()?;

        let start = Instant::now();
        let result = self
            .manager
            .execute_stream_request(request, wrapper_name)
            .await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        // The stream itself is not Sync; only its name may live across awaits
        let opened = result.as_ref().map(|routed| routed.wrapper_name.clone());
        match opened {
            Ok(opened) => {
                let tags = tags_for(&opened, None);
                self.record_series(SERIES_STREAMS_OPENED, 1.0, tags).await;
                if let Err(e) = self.metrics.record_request(&opened, Outcome::StreamOpened) {
                    self.metrics.metrics_recording_failure("record_request");
                    tracing::error!(
                        error = %e,
                        wrapper_name = %opened,
                        "Metrics recording failed. Observability degraded but request continues."
                    );
                }
            }
            Err(e) => {
                let wrapper = failed_wrapper_name(e, wrapper_name);
                tracing::warn!(
                    wrapper_name = %wrapper,
                    error = %e,
                    "Stream request failed to open"
                );
                self.record_outcome(&wrapper, Err(e), latency_ms).await;
            }
        }
        result
    }

    async fn record_outcome(&self, wrapper: &str, outcome: Result<(), &AppError>, latency_ms: f64) {
        let error_type = outcome.err().map(AppError::error_type);

        self.record_series(SERIES_REQUESTS_TOTAL, 1.0, tags_for(wrapper, None))
            .await;
        match error_type {
            None => {
                self.record_series(SERIES_REQUESTS_SUCCESS, 1.0, tags_for(wrapper, None))
                    .await;
            }
            Some(error_type) => {
                self.record_series(SERIES_REQUESTS_ERROR, 1.0, tags_for(wrapper, Some(error_type)))
                    .await;
            }
        }
        self.record_series(SERIES_REQUESTS_LATENCY, latency_ms, tags_for(wrapper, None))
            .await;

        let prometheus_outcome = if error_type.is_none() {
            Outcome::Success
        } else {
            Outcome::Error
        };
        if let Err(e) = self.metrics.record_request(wrapper, prometheus_outcome) {
            self.metrics.metrics_recording_failure("record_request");
            tracing::error!(
                error = %e,
                wrapper_name = %wrapper,
                "Metrics recording failed. Observability degraded but request continues."
            );
        }
        if let Err(e) = self.metrics.record_request_duration(wrapper, latency_ms) {
            self.metrics
                .metrics_recording_failure("record_request_duration");
            tracing::error!(
                error = %e,
                wrapper_name = %wrapper,
                duration_ms = latency_ms,
                "Metrics recording failed. Observability degraded but request continues."
            );
        }
    }

    async fn record_series(&self, name: &str, value: f64, tags: MetricTags) {
        if !self.collector.config().enabled {
            return;
        }
        if let Err(e) = self.collector.record_metric(name, value, tags).await {
            self.metrics.metrics_recording_failure("record_metric");
            tracing::warn!(metric = name, error = %e, "Failed to record metric point");
        }
    }

    /// Full status snapshot; never fails
    pub async fn get_service_status(&self) -> ServiceStatus {
        let health = self.get_health_status().await;
        let metrics = self.get_metrics(None, None).await;
        let alerts = self.get_alerts().await;

        let mut components = Vec::new();
        for wrapper in self.factory.get_all_wrappers().await {
            let health = self
                .health
                .get_component_health(ComponentKind::Wrapper, wrapper.name())
                .await
                .map(|r| r.status);
            components.push(ComponentStatus {
                name: wrapper.name().to_string(),
                wrapper_type: wrapper.wrapper_type(),
                enabled: wrapper.is_enabled().await,
                health,
                statistics: wrapper.get_statistics().await,
            });
        }

        ServiceStatus {
            initialized: self.is_initialized(),
            health,
            components,
            metrics,
            alerts,
            last_updated: unix_millis(),
        }
    }

    /// Summaries of one series or all of them over an optional window
    pub async fn get_metrics(&self, name: Option<&str>, window_ms: Option<u64>) -> MetricsReport {
        let enabled = self.collector.config().enabled;
        if !enabled {
            return MetricsReport {
                enabled,
                window_ms,
                series: Vec::new(),
            };
        }

        let series = match name {
            Some(name) => self
                .collector
                .summarize(name, window_ms)
                .await
                .into_iter()
                .collect(),
            None => self.collector.summarize_all(window_ms).await,
        };
        MetricsReport {
            enabled,
            window_ms,
            series,
        }
    }

    /// Last published health snapshot; `unknown` before the first cycle
    pub async fn get_health_status(&self) -> HealthReport {
        if !self.is_initialized() || !self.health.has_results() {
            return HealthReport::unknown();
        }
        let global = self.health.get_global_health().await;
        HealthReport {
            status: global.status.into(),
            components: global.components,
            timestamp: Some(global.timestamp),
        }
    }

    pub async fn get_alerts(&self) -> AlertsReport {
        let enabled = self.alerting.is_enabled();
        if !enabled {
            return AlertsReport {
                enabled,
                active: Vec::new(),
                history: Vec::new(),
                statistics: AlertStatistics::default(),
            };
        }
        AlertsReport {
            enabled,
            active: self.alerting.get_active_alerts().await,
            history: self
                .alerting
                .get_alert_history(Some(ALERT_HISTORY_LIMIT))
                .await,
            statistics: self.alerting.get_statistics().await,
        }
    }

    pub async fn resolve_alert(&self, alert_id: &str) -> AppResult<Alert> {
        self.alerting.resolve_alert(alert_id).await
    }

    /// Re-read the file this service was loaded from and apply it
    pub async fn reload_configuration(&self) -> AppResult<ReloadSummary> {
        let path = self.config_path.as_ref().ok_or_else(|| {
            AppError::Config("no configuration file to reload from".to_string())
        })?;
        tracing::info!(path = %path.display(), "Reloading configuration");
        let config = Config::from_file(path)?;
        self.apply_configuration(config).await
    }

    /// Diff the wrapper set against `config` and apply the changes
    ///
    /// The configuration and its alert rules are validated before anything
    /// changes. A wrapper whose type or custom settings changed is rebuilt
    /// and swapped in only once the rebuild succeeded, so a failed rebuild
    /// keeps the old wrapper serving; other changes are applied in place.
    /// Health, metrics and alerting sections take effect on the next start,
    /// except for alert rules which are added immediately.
    pub async fn apply_configuration(&self, config: Config) -> AppResult<ReloadSummary> {
        config.validate()?;
        let _guard = self.lifecycle.lock().await;
        self.ensure_initialized()?;

        let mut summary = ReloadSummary {
            rules_applied: self
                .alerting
                .add_rules(config.alerting.rules.clone())
                .await?,
            ..ReloadSummary::default()
        };
        let wanted: HashSet<&str> = config.wrappers.iter().map(|w| w.name.as_str()).collect();

        for name in self.factory.wrapper_names().await {
            if wanted.contains(name.as_str()) {
                continue;
            }
            match self.factory.remove_wrapper(&name).await {
                Ok(()) => summary.removed.push(name),
                Err(e) => {
                    tracing::warn!(wrapper_name = %name, error = %e, "Failed to remove wrapper");
                    summary.failed.push(name);
                }
            }
        }

        for wrapper_config in &config.wrappers {
            let name = wrapper_config.name.clone();
            match self.apply_wrapper_config(wrapper_config).await {
                Ok(WrapperChange::Added) => summary.added.push(name),
                Ok(WrapperChange::Updated) => summary.updated.push(name),
                Ok(WrapperChange::Recreated) => summary.recreated.push(name),
                Ok(WrapperChange::Unchanged) => {}
                Err(e) => {
                    tracing::warn!(
                        wrapper_name = %name,
                        error = %e,
                        "Failed to apply wrapper configuration"
                    );
                    summary.failed.push(name);
                }
            }
        }

        *self.config.write().await = config;
        self.events.publish(OrchestrationEvent::ConfigurationReloaded);
        tracing::info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            updated = summary.updated.len(),
            recreated = summary.recreated.len(),
            failed = summary.failed.len(),
            "Configuration applied"
        );
        Ok(summary)
    }

    async fn apply_wrapper_config(&self, config: &WrapperConfig) -> AppResult<WrapperChange> {
        let Some(existing) = self.factory.get_wrapper(&config.name).await else {
            self.factory.create_wrapper(config.clone()).await?;
            return Ok(WrapperChange::Added);
        };

        let current = existing.get_configuration().await;
        if current == *config {
            return Ok(WrapperChange::Unchanged);
        }
        if requires_recreate(&current, config) {
            self.factory.replace_wrapper(config.clone()).await?;
            return Ok(WrapperChange::Recreated);
        }
        existing.update_configuration(config.clone()).await?;
        Ok(WrapperChange::Updated)
    }

    /// Stop all timers, close every wrapper and publish `Shutdown`
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Shutting down orchestration service");
        self.initialized.store(false, Ordering::Release);

        self.health.stop();
        self.collector.stop();
        self.alerting.stop();
        let forwarder = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }

        self.factory.close_all().await;
        self.events.publish(OrchestrationEvent::Shutdown);
        tracing::info!("Orchestration service stopped");
    }
}

enum WrapperChange {
    Added,
    Updated,
    Recreated,
    Unchanged,
}

/// Type or custom settings are read once when a wrapper is built
fn requires_recreate(current: &WrapperConfig, next: &WrapperConfig) -> bool {
    current.wrapper_type != next.wrapper_type || current.custom_settings != next.custom_settings
}

fn failed_wrapper_name(error: &AppError, requested: Option<&str>) -> String {
    match error {
        AppError::WrapperExecution { wrapper, .. } => wrapper.clone(),
        _ => requested.unwrap_or("none").to_string(),
    }
}

fn tags_for(wrapper: &str, error_type: Option<&str>) -> MetricTags {
    let mut tags = MetricTags::new();
    tags.insert("wrapper".to_string(), wrapper.to_string());
    if let Some(error_type) = error_type {
        tags.insert("error_type".to_string(), error_type.to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_loops() -> Config {
        let mut config = Config::default();
        config.health.interval_seconds = 0;
        config
    }

    #[tokio::test]
    async fn test_execute_before_initialize_fails() {
        let service = OrchestrationService::new(config_without_loops(), WrapperDeps::default())
            .expect("service should build");
        let err = service
            .execute_request(&CompletionRequest::new("hello"), None)
            .await
            .expect_err("uninitialized service must reject requests");
        assert!(matches!(err, AppError::NotInitialized));
    }

    #[tokio::test]
    async fn test_validation_runs_before_initialization_check() {
        let service = OrchestrationService::new(config_without_loops(), WrapperDeps::default())
            .expect("service should build");
        let err = service
            .execute_request(&CompletionRequest::new("   "), None)
            .await
            .expect_err("empty prompt must be rejected");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_accessors_return_unknown_shape_before_initialize() {
        let service = OrchestrationService::new(config_without_loops(), WrapperDeps::default())
            .expect("service should build");
        let status = service.get_service_status().await;
        assert!(!status.initialized);
        assert_eq!(status.health.status, ServiceHealth::Unknown);
        assert!(status.components.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent_and_shutdown_is_final() {
        let service = OrchestrationService::new(config_without_loops(), WrapperDeps::default())
            .expect("service should build");
        service.initialize().await.expect("first initialize");
        service.initialize().await.expect("second initialize is a no-op");
        assert!(service.is_initialized());

        service.shutdown().await;
        assert!(!service.is_initialized());
        assert!(service.initialize().await.is_err());
    }

    #[tokio::test]
    async fn test_no_wrappers_is_no_available_model() {
        let service = OrchestrationService::new(config_without_loops(), WrapperDeps::default())
            .expect("service should build");
        service.initialize().await.expect("initialize");
        let err = service
            .execute_request(&CompletionRequest::new("hello"), None)
            .await
            .expect_err("nothing to route to");
        assert!(matches!(err, AppError::NoAvailableModel(_)));

        let report = service.get_metrics(Some(SERIES_REQUESTS_ERROR), None).await;
        assert_eq!(report.series.len(), 1);
        assert_eq!(report.series[0].count, 1);
    }

    #[test]
    fn test_requires_recreate_on_binding_change() {
        let current = WrapperConfig::pool("primary", "gpu");
        let mut tuned = current.clone();
        tuned.max_retries = 5;
        assert!(!requires_recreate(&current, &tuned));

        let rebound = WrapperConfig::pool("primary", "cpu");
        assert!(requires_recreate(&current, &rebound));
    }

    #[test]
    fn test_tags_include_error_type_only_on_failure() {
        let tags = tags_for("primary", None);
        assert_eq!(tags.len(), 1);
        let tags = tags_for("primary", Some("timeout"));
        assert_eq!(tags.get("error_type").map(String::as_str), Some("timeout"));
    }
}
