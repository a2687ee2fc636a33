//! Backend client for OpenAI-compatible endpoints via open-agent-sdk

use crate::backend::{
    BackendClient, CompletionRequest, CompletionResponse, ModelInfo, ResponseChunk,
    ResponseStream,
};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

/// Client bound to one model on one OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAgentClient {
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAgentClient {
    pub fn new(
        model: impl Into<String>,
        base_url: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into(),
            max_tokens,
            temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build agent options, letting the request override sampling defaults
    fn options(&self, request: &CompletionRequest) -> AppResult<open_agent::AgentOptions> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let max_tokens = request.max_tokens.unwrap_or(self.max_tokens);
        let temperature = request.temperature.unwrap_or(self.temperature);

        open_agent::AgentOptions::builder()
            .model(model)
            .base_url(&self.base_url)
            .max_tokens(max_tokens)
            .temperature(temperature)
            .build()
            .map_err(|e| {
                tracing::error!(
                    model = %model,
                    base_url = %self.base_url,
                    max_tokens,
                    temperature,
                    error = %e,
                    "Failed to build AgentOptions"
                );
                AppError::Config(format!(
                    "invalid agent options for model '{}' at {}: {}",
                    model, self.base_url, e
                ))
            })
    }

    fn prompt(request: &CompletionRequest) -> String {
        match &request.system {
            Some(system) if !system.trim().is_empty() => {
                format!("{}\n\n{}", system, request.prompt)
            }
            _ => request.prompt.clone(),
        }
    }
}

#[async_trait]
impl BackendClient for OpenAgentClient {
    async fn generate_response(
        &self,
        request: &CompletionRequest,
    ) -> AppResult<CompletionResponse> {
        let options = self.options(request)?;
        let prompt = Self::prompt(request);

        let mut stream = open_agent::query(&prompt, &options)
            .await
            .map_err(|e| AppError::Backend(format!("query to {} failed: {}", self.base_url, e)))?;

        let mut content = String::new();
        let mut blocks_received = 0;
        while let Some(result) = stream.next().await {
            match result {
                Ok(open_agent::ContentBlock::Text(text_block)) => {
                    blocks_received += 1;
                    content.push_str(&text_block.text);
                }
                Ok(other) => {
                    tracing::debug!(
                        base_url = %self.base_url,
                        block_type = ?other,
                        "Skipping non-text content block"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        base_url = %self.base_url,
                        blocks_received,
                        partial_length = content.len(),
                        error = %e,
                        "Stream error while collecting response, discarding partial content"
                    );
                    return Err(AppError::StreamInterrupted {
                        source_name: self.base_url.clone(),
                        chunks_received: blocks_received,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(CompletionResponse::new(
            content,
            request.model.clone().unwrap_or_else(|| self.model.clone()),
        ))
    }

    async fn generate_response_stream(
        &self,
        request: &CompletionRequest,
    ) -> AppResult<ResponseStream> {
        let options = self.options(request)?;
        let prompt = Self::prompt(request);
        let source_name = self.base_url.clone();

        let inner = open_agent::query(&prompt, &options)
            .await
            .map_err(|e| AppError::Backend(format!("query to {} failed: {}", source_name, e)))?;

        // (inner stream, next index, done)
        let chunks = stream::unfold((inner, 0usize, false), move |(mut inner, index, done)| {
            let source_name = source_name.clone();
            async move {
                if done {
                    return None;
                }
                loop {
                    match inner.next().await {
                        Some(Ok(open_agent::ContentBlock::Text(text_block))) => {
                            let chunk = ResponseChunk {
                                content: text_block.text,
                                index,
                                finished: false,
                            };
                            return Some((Ok(chunk), (inner, index + 1, false)));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            let err = AppError::StreamInterrupted {
                                source_name,
                                chunks_received: index,
                                reason: e.to_string(),
                            };
                            return Some((Err(err), (inner, index, true)));
                        }
                        None => {
                            let last = ResponseChunk {
                                content: String::new(),
                                index,
                                finished: true,
                            };
                            return Some((Ok(last), (inner, index + 1, true)));
                        }
                    }
                }
            }
        });

        Ok(chunks.boxed())
    }

    async fn get_model_info(&self) -> AppResult<ModelInfo> {
        Ok(ModelInfo {
            name: self.model.clone(),
            provider: "openai-compatible".to_string(),
            max_tokens: Some(self.max_tokens),
            supports_streaming: true,
            supports_function_calling: false,
        })
    }
}
