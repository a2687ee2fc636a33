//! Router: selects a wrapper for each request and delegates to it
//!
//! Selection is bucket-then-score. Candidates are grouped by wrapper type
//! in preference order (pool, task group, direct); only the first
//! non-empty bucket is scored, so a higher score in a later bucket never
//! wins over an earlier one.

use crate::backend::{CompletionRequest, CompletionResponse, ResponseStream};
use crate::error::{AppError, AppResult};
use crate::health::HealthStatus;
use crate::wrapper::{Wrapper, WrapperFactory, WrapperStatistics, WrapperType};
use futures::StreamExt;
use std::sync::Arc;

const SUCCESS_WEIGHT: f64 = 40.0;
const LATENCY_WEIGHT: f64 = 30.0;
const HEALTH_BONUS: f64 = 20.0;
const LOAD_WEIGHT: f64 = 10.0;

/// Score a wrapper out of 100
///
/// Success rate contributes up to 40, low average latency up to 30 (one
/// point lost per 100ms), a healthy status 20 and low load up to 10 (one
/// point lost per 10 requests per minute).
pub fn score_wrapper(stats: &WrapperStatistics, healthy: bool) -> f64 {
    let success = stats.success_rate() * SUCCESS_WEIGHT;
    let latency = (LATENCY_WEIGHT - stats.average_response_time_ms / 100.0).max(0.0);
    let health = if healthy { HEALTH_BONUS } else { 0.0 };
    let load = (LOAD_WEIGHT - stats.requests_per_minute / 10.0).max(0.0);
    success + latency + health + load
}

/// A completed request and the wrapper that served it
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub wrapper_name: String,
    pub wrapper_type: WrapperType,
    pub response: CompletionResponse,
}

/// An open stream and the wrapper that serves it
pub struct RoutedStream {
    pub wrapper_name: String,
    pub wrapper_type: WrapperType,
    pub stream: ResponseStream,
}

pub struct WrapperManager {
    factory: Arc<WrapperFactory>,
}

impl WrapperManager {
    pub fn new(factory: Arc<WrapperFactory>) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &Arc<WrapperFactory> {
        &self.factory
    }

    /// Pick the wrapper that should serve `request`, if any can
    ///
    /// Disabled and unhealthy wrappers are never candidates. A wrapper
    /// that has not been health-checked yet is eligible but does not earn
    /// the health bonus.
    pub async fn get_best_wrapper(&self, _request: &CompletionRequest) -> Option<Arc<dyn Wrapper>> {
        let mut candidates: Vec<(Arc<dyn Wrapper>, bool)> = Vec::new();
        for wrapper in self.factory.get_all_wrappers().await {
            if !wrapper.is_enabled().await {
                continue;
            }
            let healthy = match wrapper.last_health().await.map(|h| h.status) {
                Some(HealthStatus::Healthy) => true,
                Some(HealthStatus::Degraded) | None => false,
                Some(HealthStatus::Unhealthy) => continue,
            };
            candidates.push((wrapper, healthy));
        }

        if candidates.len() <= 1 {
            return candidates.pop().map(|(wrapper, _)| wrapper);
        }

        let best_rank = candidates
            .iter()
            .map(|(w, _)| w.wrapper_type().preference_rank())
            .min()?;

        let mut best: Option<(Arc<dyn Wrapper>, f64)> = None;
        for (wrapper, healthy) in candidates
            .into_iter()
            .filter(|(w, _)| w.wrapper_type().preference_rank() == best_rank)
        {
            let score = score_wrapper(&wrapper.get_statistics().await, healthy);
            tracing::trace!(wrapper_name = %wrapper.name(), score, "Scored wrapper");
            if best.as_ref().is_none_or(|(_, top)| score > *top) {
                best = Some((wrapper, score));
            }
        }

        best.map(|(wrapper, score)| {
            tracing::debug!(
                wrapper_name = %wrapper.name(),
                wrapper_type = %wrapper.wrapper_type(),
                score,
                "Selected wrapper"
            );
            wrapper
        })
    }

    async fn resolve(
        &self,
        request: &CompletionRequest,
        wrapper_name: Option<&str>,
    ) -> AppResult<Arc<dyn Wrapper>> {
        match wrapper_name {
            Some(name) => self
                .factory
                .get_wrapper(name)
                .await
                .ok_or_else(|| AppError::WrapperNotFound(name.to_string())),
            None => self.get_best_wrapper(request).await.ok_or_else(|| {
                AppError::NoAvailableModel("no healthy wrapper is available".to_string())
            }),
        }
    }

    /// Route one request, by name or by selection
    ///
    /// Failures inside the wrapper come back as `WrapperExecution`; lookup
    /// failures are returned as they are.
    pub async fn execute_request(
        &self,
        request: &CompletionRequest,
        wrapper_name: Option<&str>,
    ) -> AppResult<RoutedResponse> {
        let wrapper = self.resolve(request, wrapper_name).await?;
        let response = wrapper
            .generate_response(request)
            .await
            .map_err(|e| wrap_execution_error(wrapper.name(), e))?;
        Ok(RoutedResponse {
            wrapper_name: wrapper.name().to_string(),
            wrapper_type: wrapper.wrapper_type(),
            response,
        })
    }

    pub async fn execute_stream_request(
        &self,
        request: &CompletionRequest,
        wrapper_name: Option<&str>,
    ) -> AppResult<RoutedStream> {
        let wrapper = self.resolve(request, wrapper_name).await?;
        let name = wrapper.name().to_string();
        let inner = wrapper
            .generate_response_stream(request)
            .await
            .map_err(|e| wrap_execution_error(&name, e))?;

        let stream_name = name.clone();
        let stream = inner
            .map(move |item| item.map_err(|e| wrap_execution_error(&stream_name, e)))
            .boxed();
        Ok(RoutedStream {
            wrapper_name: name,
            wrapper_type: wrapper.wrapper_type(),
            stream,
        })
    }
}

fn wrap_execution_error(wrapper: &str, error: AppError) -> AppError {
    match error {
        AppError::WrapperExecution { .. } => error,
        other => AppError::WrapperExecution {
            wrapper: wrapper.to_string(),
            message: other.to_string(),
        },
    }
}
