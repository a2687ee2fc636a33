//! Command-line interface for Tiergate
//!
//! Provides argument parsing and subcommand handling for the Tiergate binary.

use clap::{Parser, Subcommand};

/// Resilient routing gateway for pooled and tiered LLM backends
#[derive(Parser)]
#[command(name = "tiergate")]
#[command(version)]
#[command(about = "Resilient routing gateway for pooled and tiered LLM backends")]
#[command(
    long_about = "Tiergate routes completion requests across instance pools, tiered task \
    groups and direct endpoints, with health-checked selection, echelon fallback, \
    time-series metrics and rule-based alerting."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# Tiergate Configuration
# =======================
#
# Every section is optional; the values below are the defaults unless noted.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"
port = 3000

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
# RUST_LOG overrides this when set.
log_level = "info"

# ─────────────────────────────────────────────────────────────────────────────
# HEALTH CHECKS
# ─────────────────────────────────────────────────────────────────────────────
#
# A component only turns healthy after `healthy_threshold` consecutive good
# probes, and only turns unhealthy after `unhealthy_threshold` consecutive
# failures. In between it is reported as degraded.

[health]
# Seconds between cycles (0 disables the background loop)
interval_seconds = 30
timeout_ms = 5000
healthy_threshold = 2
unhealthy_threshold = 3

# ─────────────────────────────────────────────────────────────────────────────
# METRICS
# ─────────────────────────────────────────────────────────────────────────────
#
# In-memory time series served at /metrics/series. Prometheus metrics are
# always available at /metrics.

[metrics]
enabled = true
# Points kept per series (oldest dropped first)
max_data_points = 1000
retention_seconds = 3600
aggregation_interval_seconds = 60
cleanup_interval_seconds = 300

# ─────────────────────────────────────────────────────────────────────────────
# ALERTING
# ─────────────────────────────────────────────────────────────────────────────
#
# Built-in rules: component-unhealthy, system-degraded, high-error-rate,
# slow-response. Rules below with the same id replace the built-in one.

[alerting]
enabled = true
max_active_alerts = 100
history_size = 1000
history_retention_seconds = 86400
cleanup_interval_seconds = 3600
slow_response_threshold_ms = 5000
error_rate_threshold = 0.1

# [[alerting.rules]]
# id = "queue-depth"
# name = "Queue depth"
# type = "custom"          # health, performance, error_rate, availability, custom
# level = "warning"        # info, warning, error, critical
# cooldown_ms = 300000
#
# [alerting.rules.condition]
# metric = "queue_depth"
# threshold = 100.0
# operator = "gte"         # gt, gte, lt, lte, eq, ne
#
# [[alerting.rules.actions]]
# type = "webhook"         # log, webhook, email, slack
# url = "http://alerts.example.internal/hook"

# ─────────────────────────────────────────────────────────────────────────────
# WRAPPERS
# ─────────────────────────────────────────────────────────────────────────────
#
# Selection prefers pool wrappers, then task groups, then direct endpoints.
# Within the preferred type the best-scoring healthy wrapper wins.
#
# Common fields:
#   - enabled: Include the wrapper in selection (default true)
#   - timeout_ms: Per-attempt timeout (default 30000)
#   - max_retries: Retries of transient errors (default 2)
#   - retry_delay_ms: Base backoff, doubled per retry (default 1000)
#   - log_level: Attached to this wrapper's log events

# Pool wrapper: leases an instance from a named pool per request
# [[wrappers]]
# name = "gpu-pool"
# type = "pool"
#
# [wrappers.custom_settings]
# pool_name = "gpu"

# Task group wrapper: runs on a tiered group with echelon fallback
# [[wrappers]]
# name = "reasoning"
# type = "task_group"
#
# [wrappers.custom_settings]
# group_name = "reasoning"
# echelon = "premium"      # optional: pin to one echelon

# Direct wrapper: a single OpenAI-compatible endpoint
[[wrappers]]
name = "local"
type = "direct"
timeout_ms = 30000

[wrappers.custom_settings]
base_url = "http://localhost:11434/v1"
model = "your-model"
max_tokens = 4096
temperature = 0.7
"#
}
