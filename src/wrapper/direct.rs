//! Wrapper over a single OpenAI-compatible endpoint

use crate::backend::{
    BackendClient, CompletionRequest, CompletionResponse, ModelInfo, OpenAgentClient,
    ResponseStream,
};
use crate::error::{AppError, AppResult};
use crate::health::HealthStatus;
use crate::wrapper::{HealthProbe, Wrapper, WrapperConfig, WrapperCore, WrapperType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Wrapper bound to one backend client
///
/// Health is probed over HTTP against `{base_url}/models` when a base URL
/// is configured, otherwise by asking the client for its model info.
pub struct DirectWrapper {
    core: WrapperCore,
    client: Arc<dyn BackendClient>,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl DirectWrapper {
    /// Build a wrapper that talks to `custom_settings.base_url` via open-agent-sdk
    pub fn new(config: WrapperConfig) -> AppResult<Self> {
        Self::check_type(&config)?;
        config.validate()?;
        let settings = &config.custom_settings;
        let (Some(model), Some(base_url)) = (settings.model.clone(), settings.base_url.clone())
        else {
            return Err(AppError::WrapperConfiguration {
                wrapper: config.name.clone(),
                reason: "direct wrappers require custom_settings.model and custom_settings.base_url"
                    .to_string(),
            });
        };
        let client = OpenAgentClient::new(
            model,
            base_url.clone(),
            settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            settings.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        );
        Ok(Self {
            core: WrapperCore::new(config),
            client: Arc::new(client),
            base_url: Some(base_url),
            http: reqwest::Client::new(),
        })
    }

    /// Build a wrapper around an existing client
    pub fn with_client(config: WrapperConfig, client: Arc<dyn BackendClient>) -> AppResult<Self> {
        Self::check_type(&config)?;
        config.validate()?;
        let base_url = config.custom_settings.base_url.clone();
        Ok(Self {
            core: WrapperCore::new(config),
            client,
            base_url,
            http: reqwest::Client::new(),
        })
    }

    fn check_type(config: &WrapperConfig) -> AppResult<()> {
        if config.wrapper_type != WrapperType::Direct {
            return Err(AppError::WrapperConfiguration {
                wrapper: config.name.clone(),
                reason: format!("expected type 'direct', got '{}'", config.wrapper_type),
            });
        }
        Ok(())
    }

    async fn probe_endpoint(&self, base_url: &str) -> AppResult<HealthProbe> {
        let timeout_ms = self.core.config().await.timeout_ms;

        // base_url already includes the API prefix (e.g. "http://host:port/v1")
        let url = format!("{}/models", base_url.trim_end_matches('/'));
        let request = self
            .http
            .head(&url)
            .timeout(Duration::from_millis(timeout_ms));
        let response = request.send().await.map_err(|e| {
            tracing::debug!(
                wrapper_name = %self.core.name(),
                url = %url,
                error = %e,
                "Endpoint health probe failed"
            );
            AppError::Backend(format!("health probe to {} failed: {}", url, e))
        })?;

        let status = response.status();
        let health = if status.is_success() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        tracing::debug!(
            wrapper_name = %self.core.name(),
            url = %url,
            status = %status,
            "Endpoint health probe completed"
        );
        Ok(HealthProbe::new(health, format!("HEAD {} returned {}", url, status))
            .with_details(serde_json::json!({ "url": url, "status": status.as_u16() })))
    }
}

#[async_trait]
impl Wrapper for DirectWrapper {
    fn core(&self) -> &WrapperCore {
        &self.core
    }

    async fn initialize(&self) -> AppResult<()> {
        self.core.mark_initialized();
        tracing::info!(
            wrapper_name = %self.core.name(),
            base_url = ?self.base_url,
            "Direct wrapper initialized"
        );
        Ok(())
    }

    async fn perform_request(&self, request: &CompletionRequest) -> AppResult<CompletionResponse> {
        self.client.generate_response(request).await
    }

    async fn perform_stream(&self, request: &CompletionRequest) -> AppResult<ResponseStream> {
        self.client.generate_response_stream(request).await
    }

    async fn perform_health_check(&self) -> AppResult<HealthProbe> {
        match &self.base_url {
            Some(base_url) => self.probe_endpoint(base_url).await,
            None => {
                let info = self.client.get_model_info().await?;
                Ok(HealthProbe::new(
                    HealthStatus::Healthy,
                    format!("model '{}' reachable", info.name),
                ))
            }
        }
    }

    async fn get_model_info(&self) -> AppResult<ModelInfo> {
        self.client.get_model_info().await
    }
}
