//! Wrappers: uniform execution facades over backend resources
//!
//! Every wrapper binds one resource (a pool, a task group, or a direct
//! endpoint) to the same request lifecycle. The [`Wrapper`] trait supplies
//! the shared behavior as provided methods on top of a few required hooks:
//!
//! - an initialization guard that rejects calls until `initialize()` ran
//! - statistics bookkeeping with a running average latency
//! - a per-call timeout and retries of transient errors with backoff
//! - a streaming fallback that re-chunks a buffered response for wrappers
//!   without native streaming
//! - a cached last health result used by the router

use crate::backend::{
    CompletionRequest, CompletionResponse, ModelInfo, ResponseChunk, ResponseStream,
};
use crate::error::{AppError, AppResult};
use crate::health::HealthStatus;
use crate::shared::clock::unix_millis;
use crate::shared::retry::calculate_backoff;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

pub mod direct;
pub mod factory;
pub mod manager;
pub mod pool;
pub mod task_group;

pub use direct::DirectWrapper;
pub use factory::{WrapperBuilder, WrapperDeps, WrapperFactory};
pub use manager::{RoutedResponse, RoutedStream, WrapperManager};
pub use pool::PoolWrapper;
pub use task_group::TaskGroupWrapper;

/// Characters per chunk when re-chunking a buffered response
pub const STREAM_CHUNK_CHARS: usize = 64;

const RPM_WINDOW_MS: u64 = 60_000;

pub(crate) const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Kind of resource a wrapper binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapperType {
    Pool,
    TaskGroup,
    Direct,
}

impl WrapperType {
    pub const ALL: [WrapperType; 3] = [Self::Pool, Self::TaskGroup, Self::Direct];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pool => "pool",
            Self::TaskGroup => "task_group",
            Self::Direct => "direct",
        }
    }

    /// Router bucket order: pools first, then task groups, then direct
    pub fn preference_rank(&self) -> u8 {
        match self {
            Self::Pool => 0,
            Self::TaskGroup => 1,
            Self::Direct => 2,
        }
    }
}

impl fmt::Display for WrapperType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource binding and per-type settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// Pin a task group wrapper to one echelon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echelon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Free-form settings carried through untouched
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Configuration record for one wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapperConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub wrapper_type: WrapperType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_enabled")]
    pub enable_metrics: bool,
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub custom_settings: CustomSettings,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_metrics_interval_ms() -> u64 {
    60_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WrapperConfig {
    pub fn new(name: impl Into<String>, wrapper_type: WrapperType) -> Self {
        Self {
            name: name.into(),
            wrapper_type,
            enabled: default_enabled(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            enable_metrics: default_enabled(),
            metrics_interval_ms: default_metrics_interval_ms(),
            log_level: default_log_level(),
            custom_settings: CustomSettings::default(),
        }
    }

    pub fn pool(name: impl Into<String>, pool_name: impl Into<String>) -> Self {
        let mut config = Self::new(name, WrapperType::Pool);
        config.custom_settings.pool_name = Some(pool_name.into());
        config
    }

    pub fn task_group(
        name: impl Into<String>,
        group_name: impl Into<String>,
        echelon: Option<String>,
    ) -> Self {
        let mut config = Self::new(name, WrapperType::TaskGroup);
        config.custom_settings.group_name = Some(group_name.into());
        config.custom_settings.echelon = echelon;
        config
    }

    pub fn direct(
        name: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let mut config = Self::new(name, WrapperType::Direct);
        config.custom_settings.model = Some(model.into());
        config.custom_settings.base_url = Some(base_url.into());
        config
    }

    fn invalid(&self, reason: impl Into<String>) -> AppError {
        AppError::WrapperConfiguration {
            wrapper: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Check the record is complete and within bounds
    ///
    /// Retry counts and delays are unsigned, so only the positive-only
    /// fields and the per-type bindings need checking here.
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name must not be empty"));
        }
        if self.timeout_ms == 0 {
            return Err(self.invalid("timeout_ms must be greater than 0"));
        }
        if self.metrics_interval_ms == 0 {
            return Err(self.invalid("metrics_interval_ms must be greater than 0"));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(self.invalid(format!(
                "log_level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.log_level
            )));
        }

        let settings = &self.custom_settings;
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
        match self.wrapper_type {
            WrapperType::Pool if !present(&settings.pool_name) => {
                return Err(self.invalid("pool wrappers require custom_settings.pool_name"));
            }
            WrapperType::TaskGroup if !present(&settings.group_name) => {
                return Err(self.invalid("task_group wrappers require custom_settings.group_name"));
            }
            WrapperType::Direct if !present(&settings.model) => {
                return Err(self.invalid("direct wrappers require custom_settings.model"));
            }
            _ => {}
        }
        if settings.echelon.as_deref().is_some_and(|e| e.trim().is_empty()) {
            return Err(self.invalid("custom_settings.echelon must not be empty when set"));
        }
        if let Some(base_url) = &settings.base_url
            && !(base_url.starts_with("http://") || base_url.starts_with("https://"))
        {
            return Err(self.invalid(format!(
                "base_url must start with http:// or https://, got '{}'",
                base_url
            )));
        }
        if let Some(temperature) = settings.temperature
            && (!temperature.is_finite() || !(0.0..=2.0).contains(&temperature))
        {
            return Err(self.invalid(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                temperature
            )));
        }
        if settings.max_tokens == Some(0) {
            return Err(self.invalid("max_tokens must be greater than 0"));
        }

        Ok(())
    }
}

/// Running counters for one wrapper
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WrapperStatistics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_response_time_ms: u64,
    pub average_response_time_ms: f64,
    pub requests_per_minute: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request_time: Option<u64>,
}

impl WrapperStatistics {
    /// Share of completed requests that succeeded; 1.0 before any complete
    pub fn success_rate(&self) -> f64 {
        let completed = self.successful_requests + self.failed_requests;
        if completed == 0 {
            return 1.0;
        }
        self.successful_requests as f64 / completed as f64
    }
}

/// Result of a wrapper-specific probe
#[derive(Debug, Clone, PartialEq)]
pub struct HealthProbe {
    pub status: HealthStatus,
    pub message: String,
    pub details: serde_json::Value,
}

impl HealthProbe {
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Last health result cached on a wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapperHealth {
    pub status: HealthStatus,
    pub message: String,
    pub response_time_ms: u64,
    pub checked_at: u64,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

#[derive(Debug, Default)]
struct StatsState {
    stats: WrapperStatistics,
    recent_requests: VecDeque<u64>,
}

impl StatsState {
    fn prune(&mut self, now: u64) {
        while let Some(&oldest) = self.recent_requests.front() {
            if now.saturating_sub(oldest) < RPM_WINDOW_MS {
                break;
            }
            self.recent_requests.pop_front();
        }
    }
}

/// Clonable handle onto a wrapper's statistics
///
/// Streams outlive the call that opened them, so they record their outcome
/// through this handle.
#[derive(Debug, Clone, Default)]
pub struct StatsRecorder {
    state: Arc<Mutex<StatsState>>,
}

impl StatsRecorder {
    pub async fn record_start(&self) {
        let now = unix_millis();
        let mut state = self.state.lock().await;
        state.stats.total_requests += 1;
        state.stats.last_request_time = Some(now);
        state.recent_requests.push_back(now);
        state.prune(now);
    }

    pub async fn record_success(&self, elapsed_ms: u64) {
        let mut state = self.state.lock().await;
        let stats = &mut state.stats;
        stats.successful_requests += 1;
        stats.total_response_time_ms = stats.total_response_time_ms.saturating_add(elapsed_ms);
        let n = stats.successful_requests as f64;
        stats.average_response_time_ms =
            (stats.average_response_time_ms * (n - 1.0) + elapsed_ms as f64) / n;
    }

    pub async fn record_failure(&self, error: &AppError) {
        let mut state = self.state.lock().await;
        state.stats.failed_requests += 1;
        state.stats.last_error = Some(error.to_string());
        state.stats.last_error_time = Some(unix_millis());
    }

    pub async fn snapshot(&self) -> WrapperStatistics {
        let now = unix_millis();
        let mut state = self.state.lock().await;
        state.prune(now);
        let mut stats = state.stats.clone();
        stats.requests_per_minute = state.recent_requests.len() as f64;
        stats
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = StatsState::default();
    }
}

/// State shared by every wrapper implementation
pub struct WrapperCore {
    name: String,
    wrapper_type: WrapperType,
    config: RwLock<WrapperConfig>,
    stats: StatsRecorder,
    last_health: RwLock<Option<WrapperHealth>>,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl WrapperCore {
    pub fn new(config: WrapperConfig) -> Self {
        Self {
            name: config.name.clone(),
            wrapper_type: config.wrapper_type,
            config: RwLock::new(config),
            stats: StatsRecorder::default(),
            last_health: RwLock::new(None),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wrapper_type(&self) -> WrapperType {
        self.wrapper_type
    }

    pub async fn config(&self) -> WrapperConfig {
        self.config.read().await.clone()
    }

    pub fn stats(&self) -> &StatsRecorder {
        &self.stats
    }

    pub fn mark_initialized(&self) {
        self.closed.store(false, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reject calls on a wrapper that is not initialized or already closed
    pub fn ensure_ready(&self) -> AppResult<()> {
        if self.is_closed() {
            return Err(self.execution_error("wrapper is closed"));
        }
        if !self.is_initialized() {
            return Err(self.execution_error("wrapper is not initialized"));
        }
        Ok(())
    }

    pub fn execution_error(&self, message: impl Into<String>) -> AppError {
        AppError::WrapperExecution {
            wrapper: self.name.clone(),
            message: message.into(),
        }
    }

    pub async fn last_health(&self) -> Option<WrapperHealth> {
        self.last_health.read().await.clone()
    }

    pub(crate) async fn set_health(&self, health: WrapperHealth) {
        *self.last_health.write().await = Some(health);
    }

    async fn replace_config(&self, config: WrapperConfig) {
        *self.config.write().await = config;
    }

    fn mark_closed(&self) {
        self.initialized.store(false, Ordering::Release);
        self.closed.store(true, Ordering::Release);
    }
}

/// Uniform execution facade over one backend resource
#[async_trait]
pub trait Wrapper: Send + Sync {
    fn core(&self) -> &WrapperCore;

    /// Validate the backing resource, then mark the core initialized
    async fn initialize(&self) -> AppResult<()>;

    /// Run one attempt of a non-streaming request
    async fn perform_request(&self, request: &CompletionRequest) -> AppResult<CompletionResponse>;

    async fn perform_health_check(&self) -> AppResult<HealthProbe>;

    async fn get_model_info(&self) -> AppResult<ModelInfo>;

    /// Open a stream; the default buffers one response and re-chunks it
    async fn perform_stream(&self, request: &CompletionRequest) -> AppResult<ResponseStream> {
        let response = self.execute_with_retries(request).await?;
        Ok(rechunk(&response.content, STREAM_CHUNK_CHARS))
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn wrapper_type(&self) -> WrapperType {
        self.core().wrapper_type()
    }

    async fn is_enabled(&self) -> bool {
        self.core().config.read().await.enabled
    }

    /// Run `perform_request` under the configured timeout, retrying
    /// transient failures up to `max_retries` times with backoff
    async fn execute_with_retries(
        &self,
        request: &CompletionRequest,
    ) -> AppResult<CompletionResponse> {
        let config = self.core().config().await;
        let max_attempts = config.max_retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(
                Duration::from_millis(config.timeout_ms),
                self.perform_request(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_elapsed) => Err(AppError::Timeout {
                    component: format!("wrapper '{}'", config.name),
                    timeout_ms: config.timeout_ms,
                }),
            };

            let error = match result {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                return Err(error);
            }

            let backoff_ms = calculate_backoff(config.retry_delay_ms, attempt);
            tracing::warn!(
                wrapper_name = %config.name,
                log_level = %config.log_level,
                attempt,
                max_attempts,
                backoff_ms,
                error = %error,
                "Wrapper request failed, retrying"
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            attempt += 1;
        }
    }

    async fn generate_response(&self, request: &CompletionRequest) -> AppResult<CompletionResponse> {
        let core = self.core();
        core.ensure_ready()?;
        core.stats().record_start().await;

        let started = Instant::now();
        let result = self.execute_with_retries(request).await;
        match &result {
            Ok(_) => {
                core.stats()
                    .record_success(started.elapsed().as_millis() as u64)
                    .await
            }
            Err(e) => {
                tracing::debug!(wrapper_name = %core.name(), error = %e, "Wrapper request failed");
                core.stats().record_failure(e).await
            }
        }
        result
    }

    /// Open a stream of chunks
    ///
    /// Failures before the first chunk are returned directly; failures
    /// during iteration arrive as a terminal `Err` item. The outcome is
    /// recorded when the stream ends or fails.
    async fn generate_response_stream(
        &self,
        request: &CompletionRequest,
    ) -> AppResult<ResponseStream> {
        let core = self.core();
        core.ensure_ready()?;
        core.stats().record_start().await;

        let started = Instant::now();
        let timeout_ms = core.config().await.timeout_ms;
        let opened = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.perform_stream(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(AppError::Timeout {
                component: format!("wrapper '{}' stream", core.name()),
                timeout_ms,
            }),
        };

        let inner = match opened {
            Ok(inner) => inner,
            Err(e) => {
                core.stats().record_failure(&e).await;
                return Err(e);
            }
        };

        Ok(record_stream_outcome(
            inner,
            core.stats().clone(),
            core.name().to_string(),
            started,
        ))
    }

    async fn health_check(&self) -> AppResult<WrapperHealth> {
        let core = self.core();
        let started = Instant::now();
        let result = self.perform_health_check().await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(probe) => {
                let health = WrapperHealth {
                    status: probe.status,
                    message: probe.message,
                    response_time_ms,
                    checked_at: unix_millis(),
                    details: probe.details,
                };
                core.set_health(health.clone()).await;
                Ok(health)
            }
            Err(e) => {
                core.set_health(WrapperHealth {
                    status: HealthStatus::Unhealthy,
                    message: e.to_string(),
                    response_time_ms,
                    checked_at: unix_millis(),
                    details: serde_json::Value::Null,
                })
                .await;
                Err(e)
            }
        }
    }

    async fn last_health(&self) -> Option<WrapperHealth> {
        self.core().last_health().await
    }

    async fn supports_function_calling(&self) -> bool {
        self.get_model_info()
            .await
            .map(|info| info.supports_function_calling)
            .unwrap_or(false)
    }

    async fn get_statistics(&self) -> WrapperStatistics {
        self.core().stats().snapshot().await
    }

    async fn reset_statistics(&self) {
        self.core().stats().reset().await;
    }

    async fn get_configuration(&self) -> WrapperConfig {
        self.core().config().await
    }

    /// Replace the configuration atomically, or not at all
    ///
    /// The name and type of a wrapper are fixed at creation.
    async fn update_configuration(&self, config: WrapperConfig) -> AppResult<()> {
        let core = self.core();
        if config.name != core.name() {
            return Err(AppError::WrapperConfiguration {
                wrapper: core.name().to_string(),
                reason: format!("name cannot change (got '{}')", config.name),
            });
        }
        if config.wrapper_type != core.wrapper_type() {
            return Err(AppError::WrapperConfiguration {
                wrapper: core.name().to_string(),
                reason: format!("type cannot change (got '{}')", config.wrapper_type),
            });
        }
        config.validate()?;
        core.replace_config(config).await;
        tracing::info!(wrapper_name = %core.name(), "Wrapper configuration updated");
        Ok(())
    }

    async fn close(&self) -> AppResult<()> {
        let core = self.core();
        if !core.is_closed() {
            core.mark_closed();
            tracing::info!(wrapper_name = %core.name(), "Wrapper closed");
        }
        Ok(())
    }
}

/// Split buffered content into fixed-size chunks on character boundaries
///
/// The last chunk is flagged `finished`. Empty content yields a single
/// empty finished chunk.
pub fn rechunk(content: &str, chunk_chars: usize) -> ResponseStream {
    let chars: Vec<char> = content.chars().collect();
    let pieces: Vec<String> = if chars.is_empty() {
        vec![String::new()]
    } else {
        chars
            .chunks(chunk_chars.max(1))
            .map(|c| c.iter().collect())
            .collect()
    };

    let last = pieces.len() - 1;
    let chunks: Vec<AppResult<ResponseChunk>> = pieces
        .into_iter()
        .enumerate()
        .map(|(index, content)| {
            Ok(ResponseChunk {
                content,
                index,
                finished: index == last,
            })
        })
        .collect();

    stream::iter(chunks).boxed()
}

/// Records a stream's outcome exactly once
///
/// A stream dropped before its end counts as a failure, recorded from
/// `Drop` on the runtime.
struct StreamOutcome {
    stats: StatsRecorder,
    wrapper: String,
    started: Instant,
    chunks: usize,
    settled: bool,
}

impl StreamOutcome {
    async fn succeed(&mut self) {
        self.stats
            .record_success(self.started.elapsed().as_millis() as u64)
            .await;
        self.settled = true;
    }

    async fn fail(&mut self, error: &AppError) {
        self.stats.record_failure(error).await;
        self.settled = true;
    }
}

impl Drop for StreamOutcome {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let stats = self.stats.clone();
        let error = AppError::StreamInterrupted {
            source_name: format!("wrapper '{}'", self.wrapper),
            chunks_received: self.chunks,
            reason: "stream dropped before completion".to_string(),
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { stats.record_failure(&error).await });
            }
            Err(_) => {
                tracing::warn!(
                    wrapper_name = %self.wrapper,
                    "Stream dropped outside a Tokio runtime; outcome not recorded"
                );
            }
        }
    }
}

fn record_stream_outcome(
    inner: ResponseStream,
    stats: StatsRecorder,
    wrapper: String,
    started: Instant,
) -> ResponseStream {
    let outcome = StreamOutcome {
        stats,
        wrapper,
        started,
        chunks: 0,
        settled: false,
    };
    stream::unfold(Some((inner, outcome)), |state| async move {
        let (mut inner, mut outcome) = state?;
        match inner.next().await {
            Some(Ok(chunk)) => {
                outcome.chunks += 1;
                Some((Ok(chunk), Some((inner, outcome))))
            }
            Some(Err(e)) => {
                outcome.fail(&e).await;
                Some((Err(e), None))
            }
            None => {
                outcome.succeed().await;
                None
            }
        }
    })
    .boxed()
}
