//! Contracts for the resources wrappers route to
//!
//! Pools, task groups and backend clients are owned elsewhere; this module
//! defines the narrow traits the gateway consumes them through, plus the
//! request and response shapes that flow across every wrapper.

use crate::error::{AppError, AppResult};
use crate::fallback::{FallbackExecutor, FallbackStrategy};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub mod agent;
pub mod echelon;

pub use agent::OpenAgentClient;
pub use echelon::{ConcurrencyPermit, Echelon, EchelonConfig};

/// A generic completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            model: None,
            max_tokens: None,
            temperature: None,
            stream: false,
            metadata: HashMap::new(),
        }
    }

    /// Reject requests that no backend could serve
    pub fn validate(&self) -> AppResult<()> {
        if self.prompt.trim().is_empty() {
            return Err(AppError::Validation("prompt must not be empty".to_string()));
        }
        if let Some(temperature) = self.temperature
            && (!temperature.is_finite() || !(0.0..=2.0).contains(&temperature))
        {
            return Err(AppError::Validation(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                temperature
            )));
        }
        if self.max_tokens == Some(0) {
            return Err(AppError::Validation(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Token accounting reported by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl CompletionResponse {
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            usage: None,
            finish_reason: Some("stop".to_string()),
        }
    }
}

/// One piece of a streamed completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseChunk {
    pub content: String,
    pub index: usize,
    /// Set on the last chunk of a stream
    pub finished: bool,
}

/// Forward-only, single-pass stream of chunks
///
/// An `Err` item is terminal: producers stop after yielding one.
pub type ResponseStream = BoxStream<'static, AppResult<ResponseChunk>>;

/// Static description of the model behind a client or wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub supports_streaming: bool,
    pub supports_function_calling: bool,
}

/// Transport to one backend LLM endpoint
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn generate_response(&self, request: &CompletionRequest)
    -> AppResult<CompletionResponse>;

    async fn generate_response_stream(&self, request: &CompletionRequest)
    -> AppResult<ResponseStream>;

    async fn get_model_info(&self) -> AppResult<ModelInfo>;
}

/// An instance leased from a pool
#[derive(Clone)]
pub struct PoolInstance {
    pub id: String,
    pub client: Arc<dyn BackendClient>,
}

impl std::fmt::Debug for PoolInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolInstance").field("id", &self.id).finish()
    }
}

/// Health snapshot of one pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolHealth {
    pub healthy: bool,
    pub healthy_instances: usize,
    pub total_instances: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Usage counters of one pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStatistics {
    pub total_instances: usize,
    pub active_instances: usize,
    pub idle_instances: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
}

/// Load-balanced instance pools
#[async_trait]
pub trait PoolManager: Send + Sync {
    async fn has_pool(&self, name: &str) -> bool;

    /// Acquire an instance; `None` when the pool is exhausted
    async fn get_pool_instance(&self, name: &str) -> AppResult<Option<PoolInstance>>;

    async fn release_pool_instance(&self, name: &str, instance: PoolInstance) -> AppResult<()>;

    async fn health_check(&self, name: &str) -> AppResult<PoolHealth>;

    async fn get_pool_statistics(&self, name: &str) -> AppResult<PoolStatistics>;

    async fn global_health_check(&self) -> HashMap<String, PoolHealth>;
}

/// State of a task group's circuit breaker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Health snapshot of one task group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskGroupHealth {
    pub healthy: bool,
    pub active_echelons: usize,
    pub total_echelons: usize,
    pub circuit_breaker_state: CircuitBreakerState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// A named aggregate of echelons with a shared fallback policy
///
/// Implementors usually forward `execute_with_fallback` to
/// [`crate::fallback::execute_group_with_fallback`].
#[async_trait]
pub trait TaskGroup: FallbackExecutor {
    fn name(&self) -> &str;

    fn echelons(&self) -> Vec<Arc<Echelon>>;

    fn echelon(&self, name: &str) -> Option<Arc<Echelon>> {
        self.echelons().into_iter().find(|e| e.name() == name)
    }

    fn models_for_echelon(&self, name: &str) -> Vec<String> {
        self.echelon(name)
            .map(|e| e.models().to_vec())
            .unwrap_or_default()
    }

    /// Models across all echelons that are currently available, deduplicated
    fn available_models(&self) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        for echelon in self.echelons().iter().filter(|e| e.is_available()) {
            for model in echelon.models() {
                if !models.contains(model) {
                    models.push(model.clone());
                }
            }
        }
        models
    }

    fn fallback_strategy(&self) -> &FallbackStrategy;

    fn circuit_breaker_state(&self) -> CircuitBreakerState {
        CircuitBreakerState::Closed
    }

    async fn execute_with_fallback(&self, request: &CompletionRequest)
    -> AppResult<CompletionResponse>;
}

/// Store of task groups
#[async_trait]
pub trait TaskGroupManager: Send + Sync {
    async fn get_task_group(&self, name: &str) -> Option<Arc<dyn TaskGroup>>;

    async fn global_health_check(&self) -> HashMap<String, TaskGroupHealth>;
}

/// Pool manager with no pools, for deployments that only use direct wrappers
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyPoolManager;

#[async_trait]
impl PoolManager for EmptyPoolManager {
    async fn has_pool(&self, _name: &str) -> bool {
        false
    }

    async fn get_pool_instance(&self, name: &str) -> AppResult<Option<PoolInstance>> {
        Err(AppError::PoolNotFound(name.to_string()))
    }

    async fn release_pool_instance(&self, name: &str, _instance: PoolInstance) -> AppResult<()> {
        Err(AppError::PoolNotFound(name.to_string()))
    }

    async fn health_check(&self, name: &str) -> AppResult<PoolHealth> {
        Err(AppError::PoolNotFound(name.to_string()))
    }

    async fn get_pool_statistics(&self, name: &str) -> AppResult<PoolStatistics> {
        Err(AppError::PoolNotFound(name.to_string()))
    }

    async fn global_health_check(&self) -> HashMap<String, PoolHealth> {
        HashMap::new()
    }
}

/// Task group store with no groups
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyTaskGroupManager;

#[async_trait]
impl TaskGroupManager for EmptyTaskGroupManager {
    async fn get_task_group(&self, _name: &str) -> Option<Arc<dyn TaskGroup>> {
        None
    }

    async fn global_health_check(&self) -> HashMap<String, TaskGroupHealth> {
        HashMap::new()
    }
}
