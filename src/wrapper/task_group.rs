//! Wrapper over a task group
//!
//! Without a pinned echelon, requests go through the group's own fallback
//! strategy. With one, they go straight to that echelon under a
//! concurrency permit and fail fast if it cannot take them.

use crate::backend::echelon::dispatch_on_echelon;
use crate::backend::{
    CircuitBreakerState, CompletionRequest, CompletionResponse, ModelInfo, TaskGroup,
    TaskGroupManager,
};
use crate::error::{AppError, AppResult};
use crate::health::HealthStatus;
use crate::wrapper::{HealthProbe, Wrapper, WrapperConfig, WrapperCore, WrapperType};
use async_trait::async_trait;
use std::sync::Arc;

/// Wrapper bound to one task group and optionally one echelon
pub struct TaskGroupWrapper {
    core: WrapperCore,
    groups: Arc<dyn TaskGroupManager>,
}

impl TaskGroupWrapper {
    pub fn new(config: WrapperConfig, groups: Arc<dyn TaskGroupManager>) -> AppResult<Self> {
        if config.wrapper_type != WrapperType::TaskGroup {
            return Err(AppError::WrapperConfiguration {
                wrapper: config.name.clone(),
                reason: format!("expected type 'task_group', got '{}'", config.wrapper_type),
            });
        }
        config.validate()?;
        Ok(Self {
            core: WrapperCore::new(config),
            groups,
        })
    }

    /// Resolve the bound group and the pinned echelon name, if any
    async fn binding(&self) -> AppResult<(Arc<dyn TaskGroup>, Option<String>)> {
        let settings = self.core.config().await.custom_settings;
        let group_name = settings
            .group_name
            .ok_or_else(|| AppError::WrapperConfiguration {
                wrapper: self.core.name().to_string(),
                reason: "missing custom_settings.group_name".to_string(),
            })?;
        let group = self
            .groups
            .get_task_group(&group_name)
            .await
            .ok_or(AppError::TaskGroupNotFound(group_name))?;
        Ok((group, settings.echelon))
    }
}

#[async_trait]
impl Wrapper for TaskGroupWrapper {
    fn core(&self) -> &WrapperCore {
        &self.core
    }

    async fn initialize(&self) -> AppResult<()> {
        let (group, pinned) = self.binding().await?;
        if let Some(echelon) = &pinned
            && group.echelon(echelon).is_none()
        {
            return Err(AppError::EchelonNotFound {
                group: group.name().to_string(),
                echelon: echelon.clone(),
            });
        }
        if group.available_models().is_empty() {
            return Err(AppError::NoAvailableModel(format!(
                "task group '{}' has no available models",
                group.name()
            )));
        }

        self.core.mark_initialized();
        tracing::info!(
            wrapper_name = %self.core.name(),
            group_name = %group.name(),
            echelon = ?pinned,
            "Task group wrapper initialized"
        );
        Ok(())
    }

    async fn perform_request(&self, request: &CompletionRequest) -> AppResult<CompletionResponse> {
        let (group, pinned) = self.binding().await?;
        let Some(echelon_name) = pinned else {
            return group.execute_with_fallback(request).await;
        };

        if group.circuit_breaker_state() == CircuitBreakerState::Open {
            return Err(AppError::CircuitBreakerOpen(group.name().to_string()));
        }
        let echelon = group
            .echelon(&echelon_name)
            .ok_or_else(|| AppError::EchelonNotFound {
                group: group.name().to_string(),
                echelon: echelon_name.clone(),
            })?;
        if !echelon.is_available() {
            return Err(AppError::EchelonUnavailable {
                group: group.name().to_string(),
                echelon: echelon_name,
            });
        }

        dispatch_on_echelon(group.name(), &echelon, group.as_ref(), request).await
    }

    async fn perform_health_check(&self) -> AppResult<HealthProbe> {
        let (group, pinned) = self.binding().await?;
        let echelons = group.echelons();
        let available = echelons.iter().filter(|e| e.is_available()).count();
        let circuit = group.circuit_breaker_state();
        let details = serde_json::json!({
            "group": group.name(),
            "available_echelons": available,
            "total_echelons": echelons.len(),
            "circuit_breaker_state": circuit.as_str(),
        });

        if circuit == CircuitBreakerState::Open {
            return Ok(HealthProbe::new(HealthStatus::Unhealthy, "circuit breaker is open")
                .with_details(details));
        }
        if group.available_models().is_empty() {
            return Ok(HealthProbe::new(HealthStatus::Unhealthy, "no available models")
                .with_details(details));
        }
        if let Some(name) = pinned {
            let pinned_ok = group.echelon(&name).is_some_and(|e| e.can_accept_request());
            if !pinned_ok {
                return Ok(HealthProbe::new(
                    HealthStatus::Degraded,
                    format!("pinned echelon '{}' cannot accept requests", name),
                )
                .with_details(details));
            }
        }
        if available < echelons.len() || circuit == CircuitBreakerState::HalfOpen {
            return Ok(HealthProbe::new(
                HealthStatus::Degraded,
                format!("{}/{} echelons available", available, echelons.len()),
            )
            .with_details(details));
        }

        Ok(HealthProbe::new(
            HealthStatus::Healthy,
            format!("{}/{} echelons available", available, echelons.len()),
        )
        .with_details(details))
    }

    async fn get_model_info(&self) -> AppResult<ModelInfo> {
        let (group, pinned) = self.binding().await?;
        let echelon = match &pinned {
            Some(name) => group.echelon(name),
            None => {
                let mut echelons = group.echelons();
                echelons.sort_by_key(|e| e.priority());
                echelons.into_iter().find(|e| e.is_available())
            }
        };
        let Some(echelon) = echelon else {
            return Err(AppError::NoAvailableModel(format!(
                "task group '{}' has no available echelon",
                group.name()
            )));
        };
        let name = echelon.models().first().cloned().ok_or_else(|| {
            AppError::NoAvailableModel(format!("echelon '{}' has no models", echelon.name()))
        })?;

        Ok(ModelInfo {
            name,
            provider: format!("task_group:{}", group.name()),
            max_tokens: Some(echelon.config().max_tokens),
            supports_streaming: false,
            supports_function_calling: false,
        })
    }
}
