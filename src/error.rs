//! Error types for Tiergate
//!
//! A single error enum covers configuration, routing, fallback and backend
//! failures. All errors implement `IntoResponse` for Axum handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read configuration file '{path}': {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file '{path}': {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    #[error("Task group not found: {0}")]
    TaskGroupNotFound(String),

    #[error("Echelon '{echelon}' not found in task group '{group}'")]
    EchelonNotFound { group: String, echelon: String },

    #[error("Echelon '{echelon}' in task group '{group}' cannot accept requests")]
    EchelonUnavailable { group: String, echelon: String },

    #[error("Wrapper not found: {0}")]
    WrapperNotFound(String),

    #[error("Wrapper already exists: {0}")]
    WrapperAlreadyExists(String),

    #[error("Unsupported wrapper type: {0}")]
    UnsupportedWrapperType(String),

    #[error("Invalid configuration for wrapper '{wrapper}': {reason}")]
    WrapperConfiguration { wrapper: String, reason: String },

    #[error("Wrapper '{wrapper}' failed: {message}")]
    WrapperExecution { wrapper: String, message: String },

    #[error("No healthy instance available in pool '{0}'")]
    NoHealthyInstance(String),

    #[error("No available model: {0}")]
    NoAvailableModel(String),

    #[error("Fallback exhausted after {attempts} attempts: {last_error}")]
    FallbackExhausted {
        attempts: u32,
        last_error: Box<AppError>,
    },

    #[error("Custom fallback handler timed out after {timeout_ms}ms")]
    FallbackTimeout { timeout_ms: u64 },

    #[error("Circuit breaker open for task group '{0}'")]
    CircuitBreakerOpen(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("{component} timed out after {timeout_ms}ms")]
    Timeout { component: String, timeout_ms: u64 },

    #[error("Stream interrupted from {source_name} after {chunks_received} chunks: {reason}")]
    StreamInterrupted {
        source_name: String,
        chunks_received: usize,
        reason: String,
    },

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Orchestration service is not initialized")]
    NotInitialized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable snake_case label used for metrics tags
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. } => "config",
            Self::Validation(_) => "validation",
            Self::PoolNotFound(_) => "pool_not_found",
            Self::TaskGroupNotFound(_) => "task_group_not_found",
            Self::EchelonNotFound { .. } => "echelon_not_found",
            Self::EchelonUnavailable { .. } => "echelon_unavailable",
            Self::WrapperNotFound(_) => "wrapper_not_found",
            Self::WrapperAlreadyExists(_) => "wrapper_already_exists",
            Self::UnsupportedWrapperType(_) => "unsupported_wrapper_type",
            Self::WrapperConfiguration { .. } => "wrapper_configuration",
            Self::WrapperExecution { .. } => "wrapper_execution",
            Self::NoHealthyInstance(_) => "no_healthy_instance",
            Self::NoAvailableModel(_) => "no_available_model",
            Self::FallbackExhausted { .. } => "fallback_exhausted",
            Self::FallbackTimeout { .. } => "fallback_timeout",
            Self::CircuitBreakerOpen(_) => "circuit_breaker_open",
            Self::Backend(_) => "backend",
            Self::Timeout { .. } => "timeout",
            Self::StreamInterrupted { .. } => "stream_interrupted",
            Self::AlertNotFound(_) => "alert_not_found",
            Self::NotInitialized => "not_initialized",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether a wrapper may retry the operation that produced this error
    ///
    /// Only transient transport failures qualify. Missing resources,
    /// configuration problems, open circuits and exhausted capacity are
    /// surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend(_) | Self::Timeout { .. } | Self::StreamInterrupted { .. }
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::WrapperConfiguration { .. } => StatusCode::BAD_REQUEST,
            Self::PoolNotFound(_)
            | Self::TaskGroupNotFound(_)
            | Self::EchelonNotFound { .. }
            | Self::WrapperNotFound(_)
            | Self::AlertNotFound(_) => StatusCode::NOT_FOUND,
            Self::WrapperAlreadyExists(_) => StatusCode::CONFLICT,
            Self::NoHealthyInstance(_)
            | Self::NoAvailableModel(_)
            | Self::EchelonUnavailable { .. }
            | Self::CircuitBreakerOpen(_)
            | Self::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } | Self::FallbackTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::WrapperExecution { .. }
            | Self::FallbackExhausted { .. }
            | Self::Backend(_)
            | Self::StreamInterrupted { .. } => StatusCode::BAD_GATEWAY,
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::UnsupportedWrapperType(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "type": self.error_type(),
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
