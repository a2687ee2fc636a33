//! Configuration management for Tiergate
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Every section is optional; a missing section takes its defaults.

use crate::alerting::AlertRule;
use crate::error::{AppError, AppResult};
use crate::wrapper::{LOG_LEVELS, WrapperConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub wrappers: Vec<WrapperConfig>,
}

/// HTTP listener for the operator surface
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Health check loop and hysteresis thresholds
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Seconds between check cycles; 0 disables the background loop
    #[serde(default = "default_health_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
    /// Consecutive successes before a component is reported healthy
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    /// Consecutive failures before a component is reported unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_health_interval(),
            timeout_ms: default_health_timeout_ms(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

impl HealthConfig {
    /// Loop interval, or `None` when the loop is disabled
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_seconds > 0).then(|| Duration::from_secs(self.interval_seconds))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout_ms() -> u64 {
    5000
}

fn default_healthy_threshold() -> u32 {
    2
}

fn default_unhealthy_threshold() -> u32 {
    3
}

/// In-memory time-series settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_data_points")]
    pub max_data_points: usize,
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,
    #[serde(default = "default_aggregation_interval")]
    pub aggregation_interval_seconds: u64,
    #[serde(default = "default_metrics_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_data_points: default_max_data_points(),
            retention_seconds: default_retention_seconds(),
            aggregation_interval_seconds: default_aggregation_interval(),
            cleanup_interval_seconds: default_metrics_cleanup_interval(),
        }
    }
}

impl MetricsConfig {
    pub fn retention_ms(&self) -> u64 {
        self.retention_seconds.saturating_mul(1000)
    }

    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.aggregation_interval_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_data_points() -> usize {
    1000
}

fn default_retention_seconds() -> u64 {
    3600
}

fn default_aggregation_interval() -> u64 {
    60
}

fn default_metrics_cleanup_interval() -> u64 {
    300
}

/// Alert engine settings and extra rules
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_active_alerts")]
    pub max_active_alerts: usize,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default = "default_history_retention")]
    pub history_retention_seconds: u64,
    #[serde(default = "default_alert_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Response time above which a component raises `slow-response`
    #[serde(default = "default_slow_response_ms")]
    pub slow_response_threshold_ms: u64,
    /// Error ratio (0.0..=1.0) for the `high-error-rate` rule
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    /// Rules added on top of the built-in set; a matching id replaces a built-in
    #[serde(default)]
    pub rules: Vec<AlertRule>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_active_alerts: default_max_active_alerts(),
            history_size: default_history_size(),
            history_retention_seconds: default_history_retention(),
            cleanup_interval_seconds: default_alert_cleanup_interval(),
            slow_response_threshold_ms: default_slow_response_ms(),
            error_rate_threshold: default_error_rate_threshold(),
            rules: Vec::new(),
        }
    }
}

impl AlertingConfig {
    pub fn history_retention_ms(&self) -> u64 {
        self.history_retention_seconds.saturating_mul(1000)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

fn default_max_active_alerts() -> usize {
    100
}

fn default_history_size() -> usize {
    1000
}

fn default_history_retention() -> u64 {
    86_400
}

fn default_alert_cleanup_interval() -> u64 {
    3600
}

fn default_slow_response_ms() -> u64 {
    5000
}

fn default_error_rate_threshold() -> f64 {
    0.1
}

fn require_positive(value: u64, field: &str) -> AppResult<()> {
    if value == 0 {
        return Err(AppError::Config(format!("{} must be greater than 0", field)));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()` and `from_str()`, and by
    /// the orchestration service before applying a reloaded configuration.
    pub fn validate(&self) -> AppResult<()> {
        if self.server.host.trim().is_empty() {
            return Err(AppError::Config("server.host must not be empty".to_string()));
        }
        if !LOG_LEVELS.contains(&self.observability.log_level.as_str()) {
            return Err(AppError::Config(format!(
                "observability.log_level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.observability.log_level
            )));
        }

        // Health thresholds; interval 0 is allowed and disables the loop
        require_positive(self.health.timeout_ms, "health.timeout_ms")?;
        require_positive(
            self.health.healthy_threshold.into(),
            "health.healthy_threshold",
        )?;
        require_positive(
            self.health.unhealthy_threshold.into(),
            "health.unhealthy_threshold",
        )?;

        require_positive(self.metrics.max_data_points as u64, "metrics.max_data_points")?;
        require_positive(self.metrics.retention_seconds, "metrics.retention_seconds")?;
        require_positive(
            self.metrics.aggregation_interval_seconds,
            "metrics.aggregation_interval_seconds",
        )?;
        require_positive(
            self.metrics.cleanup_interval_seconds,
            "metrics.cleanup_interval_seconds",
        )?;

        let alerting = &self.alerting;
        require_positive(alerting.max_active_alerts as u64, "alerting.max_active_alerts")?;
        require_positive(alerting.history_size as u64, "alerting.history_size")?;
        require_positive(
            alerting.history_retention_seconds,
            "alerting.history_retention_seconds",
        )?;
        require_positive(
            alerting.cleanup_interval_seconds,
            "alerting.cleanup_interval_seconds",
        )?;
        require_positive(
            alerting.slow_response_threshold_ms,
            "alerting.slow_response_threshold_ms",
        )?;
        if !alerting.error_rate_threshold.is_finite()
            || !(0.0..=1.0).contains(&alerting.error_rate_threshold)
        {
            return Err(AppError::Config(format!(
                "alerting.error_rate_threshold must be between 0.0 and 1.0, got {}",
                alerting.error_rate_threshold
            )));
        }
        let mut rule_ids = HashSet::new();
        for rule in &alerting.rules {
            rule.validate()?;
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(AppError::Config(format!(
                    "alert rule id '{}' is defined more than once",
                    rule.id
                )));
            }
        }

        let mut wrapper_names = HashSet::new();
        for wrapper in &self.wrappers {
            wrapper.validate()?;
            if !wrapper_names.insert(wrapper.name.as_str()) {
                return Err(AppError::Config(format!(
                    "wrapper '{}' is defined more than once",
                    wrapper.name
                )));
            }
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        // Validate config before returning
        config.validate()?;
        Ok(config)
    }
}
