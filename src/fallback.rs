//! Fallback strategies for task groups
//!
//! A [`FallbackStrategy`] runs one degradation algorithm against a
//! request-scoped [`FallbackContext`]:
//!
//! - `echelon_down`: walk echelons by ascending priority
//! - `group_fallback`: walk a configured list of other task groups
//! - `custom`: hand the request to a caller-supplied handler under a timeout
//!
//! All three share one retry loop. Each attempt dispatches to exactly one
//! target; a failed target is recorded in the context so later attempts in
//! the same call resume past it instead of retrying it. Individual attempt
//! failures are logged, and only exhaustion is surfaced to the caller.

use crate::backend::echelon::dispatch_on_echelon;
use crate::backend::{
    CircuitBreakerState, CompletionRequest, CompletionResponse, Echelon, TaskGroup,
};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Executes single dispatches on behalf of a strategy
///
/// Task groups implement this to run a request on one of their echelons or
/// to forward it to another group.
#[async_trait]
pub trait FallbackExecutor: Send + Sync {
    async fn execute_on_echelon(
        &self,
        echelon: &Echelon,
        request: &CompletionRequest,
    ) -> AppResult<CompletionResponse>;

    async fn execute_on_group(
        &self,
        group: &str,
        _request: &CompletionRequest,
    ) -> AppResult<CompletionResponse> {
        Err(AppError::TaskGroupNotFound(group.to_string()))
    }
}

/// Caller-supplied fallback logic for the `custom` strategy
#[async_trait]
pub trait CustomFallbackHandler: Send + Sync {
    async fn handle(
        &self,
        context: &mut FallbackContext,
        executor: &dyn FallbackExecutor,
        request: &CompletionRequest,
    ) -> AppResult<CompletionResponse>;
}

/// Degradation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackType {
    EchelonDown,
    GroupFallback,
    Custom,
}

impl FallbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EchelonDown => "echelon_down",
            Self::GroupFallback => "group_fallback",
            Self::Custom => "custom",
        }
    }
}

/// Tunables shared by all strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackOptions {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub skip_unavailable: bool,
    pub fallback_groups: Vec<String>,
    /// Handler deadline for the `custom` strategy
    pub timeout_ms: u64,
}

impl Default for FallbackOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
            skip_unavailable: true,
            fallback_groups: Vec::new(),
            timeout_ms: 30_000,
        }
    }
}

/// Per-request fallback state
///
/// Created fresh for every request and dropped when it completes.
#[derive(Debug, Clone)]
pub struct FallbackContext {
    pub request_id: String,
    pub group: String,
    pub echelons: Vec<Arc<Echelon>>,
    pub failed_echelons: IndexSet<String>,
    pub failed_groups: IndexSet<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Attempts made so far
    pub attempts: u32,
}

impl FallbackContext {
    pub fn new(
        request_id: impl Into<String>,
        group: impl Into<String>,
        echelons: Vec<Arc<Echelon>>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            group: group.into(),
            echelons,
            failed_echelons: IndexSet::new(),
            failed_groups: IndexSet::new(),
            metadata: HashMap::new(),
            attempts: 0,
        }
    }
}

/// Successful result of a strategy run
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackOutcome {
    pub response: CompletionResponse,
    /// Echelon that served the request, for `echelon_down`
    pub echelon: Option<String>,
    /// Group that served the request, for `group_fallback`
    pub group: Option<String>,
    pub attempts: u32,
}

/// Serialized form of a strategy (the handler is never serialized)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FallbackDefinition {
    #[serde(rename = "type")]
    fallback_type: FallbackType,
    #[serde(default)]
    options: FallbackOptions,
}

/// One configured degradation algorithm
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "FallbackDefinition", into = "FallbackDefinition")]
pub struct FallbackStrategy {
    fallback_type: FallbackType,
    options: FallbackOptions,
    handler: Option<Arc<dyn CustomFallbackHandler>>,
}

impl std::fmt::Debug for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStrategy")
            .field("fallback_type", &self.fallback_type)
            .field("options", &self.options)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Equal when type and options match; handlers are not compared
impl PartialEq for FallbackStrategy {
    fn eq(&self, other: &Self) -> bool {
        self.fallback_type == other.fallback_type && self.options == other.options
    }
}

impl From<FallbackStrategy> for FallbackDefinition {
    fn from(strategy: FallbackStrategy) -> Self {
        Self {
            fallback_type: strategy.fallback_type,
            options: strategy.options,
        }
    }
}

impl TryFrom<FallbackDefinition> for FallbackStrategy {
    type Error = AppError;

    fn try_from(definition: FallbackDefinition) -> Result<Self, Self::Error> {
        Self::new(definition.fallback_type, definition.options)
    }
}

impl FallbackStrategy {
    /// Create and validate a strategy
    ///
    /// A `custom` strategy built this way has no handler yet; attach one
    /// with [`FallbackStrategy::with_handler`].
    pub fn new(fallback_type: FallbackType, options: FallbackOptions) -> AppResult<Self> {
        let strategy = Self {
            fallback_type,
            options,
            handler: None,
        };
        strategy.validate()?;
        Ok(strategy)
    }

    pub fn echelon_down(options: FallbackOptions) -> AppResult<Self> {
        Self::new(FallbackType::EchelonDown, options)
    }

    pub fn group_fallback(options: FallbackOptions) -> AppResult<Self> {
        Self::new(FallbackType::GroupFallback, options)
    }

    pub fn custom(
        options: FallbackOptions,
        handler: Arc<dyn CustomFallbackHandler>,
    ) -> AppResult<Self> {
        Ok(Self::new(FallbackType::Custom, options)?.with_handler(handler))
    }

    pub fn with_handler(mut self, handler: Arc<dyn CustomFallbackHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn fallback_type(&self) -> FallbackType {
        self.fallback_type
    }

    pub fn options(&self) -> &FallbackOptions {
        &self.options
    }

    pub fn validate(&self) -> AppResult<()> {
        match self.fallback_type {
            FallbackType::EchelonDown | FallbackType::GroupFallback => {
                if self.options.max_attempts == 0 {
                    return Err(AppError::Config(format!(
                        "{} fallback requires max_attempts >= 1",
                        self.fallback_type.as_str()
                    )));
                }
            }
            FallbackType::Custom => {
                if self.options.timeout_ms == 0 {
                    return Err(AppError::Config(
                        "custom fallback requires timeout_ms > 0".to_string(),
                    ));
                }
            }
        }

        if self.fallback_type == FallbackType::GroupFallback {
            if self.options.fallback_groups.is_empty() {
                return Err(AppError::Config(
                    "group_fallback requires at least one fallback group".to_string(),
                ));
            }
            if self.options.fallback_groups.iter().any(|g| g.trim().is_empty()) {
                return Err(AppError::Config(
                    "group_fallback group names must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> AppResult<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| AppError::Internal(format!("failed to serialize fallback strategy: {}", e)))
    }

    pub fn from_json(value: serde_json::Value) -> AppResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| AppError::Config(format!("invalid fallback strategy: {}", e)))
    }

    /// Run the strategy until one target succeeds or attempts run out
    pub async fn execute(
        &self,
        context: &mut FallbackContext,
        executor: &dyn FallbackExecutor,
        request: &CompletionRequest,
    ) -> AppResult<FallbackOutcome> {
        if self.fallback_type == FallbackType::Custom && self.handler.is_none() {
            return Err(AppError::Config(
                "custom fallback strategy has no handler".to_string(),
            ));
        }

        let max_attempts = self.options.max_attempts.max(1);
        let mut last_error: Option<AppError> = None;

        for attempt in 1..=max_attempts {
            context.attempts = attempt;

            let result = match self.fallback_type {
                FallbackType::EchelonDown => self.try_next_echelon(context, executor, request).await,
                FallbackType::GroupFallback => self.try_next_group(context, executor, request).await,
                FallbackType::Custom => self.try_custom(context, executor, request).await,
            };

            match result {
                Ok(outcome) => {
                    tracing::debug!(
                        request_id = %context.request_id,
                        group = %context.group,
                        strategy = self.fallback_type.as_str(),
                        attempt,
                        "Fallback attempt succeeded"
                    );
                    return Ok(outcome);
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %context.request_id,
                        group = %context.group,
                        strategy = self.fallback_type.as_str(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Fallback attempt failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < max_attempts && self.options.retry_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.options.retry_delay_ms)).await;
            }
        }

        tracing::error!(
            request_id = %context.request_id,
            group = %context.group,
            strategy = self.fallback_type.as_str(),
            attempts = max_attempts,
            failed_echelons = ?context.failed_echelons,
            failed_groups = ?context.failed_groups,
            "Fallback exhausted"
        );

        Err(AppError::FallbackExhausted {
            attempts: max_attempts,
            last_error: Box::new(last_error.unwrap_or_else(|| {
                AppError::Internal("fallback made no attempts".to_string())
            })),
        })
    }

    async fn try_next_echelon(
        &self,
        context: &mut FallbackContext,
        executor: &dyn FallbackExecutor,
        request: &CompletionRequest,
    ) -> AppResult<FallbackOutcome> {
        let mut ordered = context.echelons.clone();
        ordered.sort_by_key(|e| e.priority());

        let names: Vec<&str> = ordered.iter().map(|e| e.name()).collect();
        let start = resume_index(context.attempts, &names, &context.failed_echelons);

        let next = ordered[start..].iter().find(|e| {
            !context.failed_echelons.contains(e.name())
                && (!self.options.skip_unavailable || e.is_available())
        });
        let Some(echelon) = next.cloned() else {
            return Err(AppError::NoAvailableModel(format!(
                "no remaining echelons in task group '{}'",
                context.group
            )));
        };

        tracing::debug!(
            request_id = %context.request_id,
            group = %context.group,
            echelon = %echelon.name(),
            priority = echelon.priority(),
            attempt = context.attempts,
            "Dispatching to echelon"
        );

        match dispatch_on_echelon(&context.group, &echelon, executor, request).await {
            Ok(response) => Ok(FallbackOutcome {
                response,
                echelon: Some(echelon.name().to_string()),
                group: None,
                attempts: context.attempts,
            }),
            Err(e) => {
                context.failed_echelons.insert(echelon.name().to_string());
                Err(e)
            }
        }
    }

    async fn try_next_group(
        &self,
        context: &mut FallbackContext,
        executor: &dyn FallbackExecutor,
        request: &CompletionRequest,
    ) -> AppResult<FallbackOutcome> {
        let groups = &self.options.fallback_groups;
        let names: Vec<&str> = groups.iter().map(String::as_str).collect();
        let start = resume_index(context.attempts, &names, &context.failed_groups);

        let Some(group) = groups[start..]
            .iter()
            .find(|g| !context.failed_groups.contains(g.as_str()))
            .cloned()
        else {
            return Err(AppError::NoAvailableModel(format!(
                "no remaining fallback groups for task group '{}'",
                context.group
            )));
        };

        tracing::debug!(
            request_id = %context.request_id,
            group = %context.group,
            fallback_group = %group,
            attempt = context.attempts,
            "Dispatching to fallback group"
        );

        match executor.execute_on_group(&group, request).await {
            Ok(response) => Ok(FallbackOutcome {
                response,
                echelon: None,
                group: Some(group),
                attempts: context.attempts,
            }),
            Err(e) => {
                context.failed_groups.insert(group);
                Err(e)
            }
        }
    }

    async fn try_custom(
        &self,
        context: &mut FallbackContext,
        executor: &dyn FallbackExecutor,
        request: &CompletionRequest,
    ) -> AppResult<FallbackOutcome> {
        let Some(handler) = &self.handler else {
            return Err(AppError::Config(
                "custom fallback strategy has no handler".to_string(),
            ));
        };
        let timeout_ms = self.options.timeout_ms;
        let attempts = context.attempts;

        match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            handler.handle(context, executor, request),
        )
        .await
        {
            Ok(Ok(response)) => Ok(FallbackOutcome {
                response,
                echelon: None,
                group: None,
                attempts,
            }),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Err(AppError::FallbackTimeout { timeout_ms }),
        }
    }
}

/// Where the scan starts on this attempt
///
/// The first attempt scans from the top. Later attempts resume just past
/// the most recently failed target; if that target is not in the list the
/// scan starts from the top and relies on the failed set to skip entries.
fn resume_index(attempt: u32, names: &[&str], failed: &IndexSet<String>) -> usize {
    if attempt <= 1 {
        return 0;
    }
    failed
        .last()
        .and_then(|last| names.iter().position(|n| *n == last.as_str()))
        .map(|pos| pos + 1)
        .unwrap_or(0)
}

/// Run a task group's own strategy for one request
///
/// An open circuit breaker short-circuits with `CircuitBreakerOpen` before
/// any dispatch.
pub async fn execute_group_with_fallback(
    group: &dyn TaskGroup,
    request: &CompletionRequest,
) -> AppResult<FallbackOutcome> {
    if group.circuit_breaker_state() == CircuitBreakerState::Open {
        return Err(AppError::CircuitBreakerOpen(group.name().to_string()));
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    let mut context = FallbackContext::new(request_id, group.name(), group.echelons());
    group
        .fallback_strategy()
        .execute(&mut context, group, request)
        .await
}
