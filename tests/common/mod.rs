//! Shared test doubles for integration tests
//!
//! In-memory pool and task group managers plus a scriptable backend client.
//! Not every test binary uses every helper.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiergate::backend::{
    BackendClient, CircuitBreakerState, CompletionRequest, CompletionResponse, Echelon,
    EchelonConfig, ModelInfo, PoolHealth, PoolInstance, PoolManager, PoolStatistics,
    ResponseChunk, ResponseStream, TaskGroup, TaskGroupHealth, TaskGroupManager,
};
use tiergate::error::{AppError, AppResult};
use tiergate::fallback::{
    FallbackExecutor, FallbackOptions, FallbackStrategy, execute_group_with_fallback,
};
use tiergate::wrapper::{WrapperConfig, WrapperDeps};

/// Backend client that answers with fixed content, or fails on demand
pub struct FakeClient {
    pub model: String,
    pub content: String,
    pub failing: AtomicBool,
    pub delay: Duration,
    /// Chunks produced by the native stream; the last one may be an error
    pub stream_chunks: Vec<AppResult<String>>,
    pub calls: AtomicUsize,
}

impl FakeClient {
    pub fn new(model: &str, content: &str) -> Self {
        Self {
            model: model.to_string(),
            content: content.to_string(),
            failing: AtomicBool::new(false),
            delay: Duration::ZERO,
            stream_chunks: vec![Ok(content.to_string())],
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(model: &str) -> Self {
        let client = Self::new(model, "");
        client.failing.store(true, Ordering::SeqCst);
        client
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_stream(mut self, chunks: Vec<AppResult<String>>) -> Self {
        self.stream_chunks = chunks;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendClient for FakeClient {
    async fn generate_response(
        &self,
        _request: &CompletionRequest,
    ) -> AppResult<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Backend(format!("{} is down", self.model)));
        }
        Ok(CompletionResponse::new(self.content.clone(), self.model.clone()))
    }

    async fn generate_response_stream(
        &self,
        _request: &CompletionRequest,
    ) -> AppResult<ResponseStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Backend(format!("{} is down", self.model)));
        }
        let last = self.stream_chunks.len().saturating_sub(1);
        let items: Vec<AppResult<ResponseChunk>> = self
            .stream_chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| match chunk {
                Ok(content) => Ok(ResponseChunk {
                    content: content.clone(),
                    index,
                    finished: index == last,
                }),
                Err(_) => Err(AppError::StreamInterrupted {
                    source_name: self.model.clone(),
                    chunks_received: index,
                    reason: "connection reset".to_string(),
                }),
            })
            .collect();
        Ok(stream::iter(items).boxed())
    }

    async fn get_model_info(&self) -> AppResult<ModelInfo> {
        Ok(ModelInfo {
            name: self.model.clone(),
            provider: "fake".to_string(),
            max_tokens: Some(4096),
            supports_streaming: true,
            supports_function_calling: false,
        })
    }
}

/// One in-memory pool
pub struct FakePool {
    pub client: Arc<FakeClient>,
    pub capacity: usize,
    pub leased: AtomicUsize,
    pub health: Mutex<PoolHealth>,
}

/// Pool manager over [`FakePool`]s with lease/release accounting
#[derive(Default)]
pub struct FakePoolManager {
    pub pools: HashMap<String, FakePool>,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl FakePoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(mut self, name: &str, client: Arc<FakeClient>, capacity: usize) -> Self {
        self.pools.insert(
            name.to_string(),
            FakePool {
                client,
                capacity,
                leased: AtomicUsize::new(0),
                health: Mutex::new(PoolHealth {
                    healthy: true,
                    healthy_instances: capacity,
                    total_instances: capacity,
                    errors: Vec::new(),
                }),
            },
        );
        self
    }

    pub fn set_health(&self, name: &str, health: PoolHealth) {
        if let Some(pool) = self.pools.get(name) {
            *pool.health.lock().unwrap() = health;
        }
    }

    pub fn leased(&self, name: &str) -> usize {
        self.pools
            .get(name)
            .map(|p| p.leased.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolManager for FakePoolManager {
    async fn has_pool(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    async fn get_pool_instance(&self, name: &str) -> AppResult<Option<PoolInstance>> {
        let pool = self
            .pools
            .get(name)
            .ok_or_else(|| AppError::PoolNotFound(name.to_string()))?;
        let leased = pool.leased.fetch_add(1, Ordering::SeqCst);
        if leased >= pool.capacity {
            pool.leased.fetch_sub(1, Ordering::SeqCst);
            return Ok(None);
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Some(PoolInstance {
            id: format!("{}-{}", name, leased),
            client: pool.client.clone(),
        }))
    }

    async fn release_pool_instance(&self, name: &str, _instance: PoolInstance) -> AppResult<()> {
        let pool = self
            .pools
            .get(name)
            .ok_or_else(|| AppError::PoolNotFound(name.to_string()))?;
        pool.leased.fetch_sub(1, Ordering::SeqCst);
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self, name: &str) -> AppResult<PoolHealth> {
        let pool = self
            .pools
            .get(name)
            .ok_or_else(|| AppError::PoolNotFound(name.to_string()))?;
        Ok(pool.health.lock().unwrap().clone())
    }

    async fn get_pool_statistics(&self, name: &str) -> AppResult<PoolStatistics> {
        let pool = self
            .pools
            .get(name)
            .ok_or_else(|| AppError::PoolNotFound(name.to_string()))?;
        let active = pool.leased.load(Ordering::SeqCst);
        Ok(PoolStatistics {
            total_instances: pool.capacity,
            active_instances: active,
            idle_instances: pool.capacity.saturating_sub(active),
            total_requests: self.acquired.load(Ordering::SeqCst) as u64,
            failed_requests: 0,
        })
    }

    async fn global_health_check(&self) -> HashMap<String, PoolHealth> {
        self.pools
            .iter()
            .map(|(name, pool)| (name.clone(), pool.health.lock().unwrap().clone()))
            .collect()
    }
}

/// Task group whose echelons succeed or fail by name
pub struct FakeTaskGroup {
    pub name: String,
    pub echelons: Vec<Arc<Echelon>>,
    pub strategy: FallbackStrategy,
    pub failing: Mutex<Vec<String>>,
    pub circuit: Mutex<CircuitBreakerState>,
    pub dispatched: Mutex<Vec<String>>,
}

impl FakeTaskGroup {
    /// Group with echelons given as `(name, priority)`, using `echelon_down`
    pub fn new(name: &str, echelons: &[(&str, u32)]) -> Self {
        let options = FallbackOptions {
            max_attempts: echelons.len().max(1) as u32,
            retry_delay_ms: 0,
            ..FallbackOptions::default()
        };
        Self {
            name: name.to_string(),
            echelons: echelons
                .iter()
                .map(|(echelon, priority)| {
                    Arc::new(Echelon::new(EchelonConfig::new(
                        *echelon,
                        *priority,
                        vec![format!("{}-model", echelon)],
                    )))
                })
                .collect(),
            strategy: FallbackStrategy::echelon_down(options).unwrap(),
            failing: Mutex::new(Vec::new()),
            circuit: Mutex::new(CircuitBreakerState::Closed),
            dispatched: Mutex::new(Vec::new()),
        }
    }

    /// Replace an echelon with a disabled copy of itself
    pub fn with_disabled(mut self, echelon: &str) -> Self {
        for slot in self.echelons.iter_mut() {
            if slot.name() == echelon {
                let mut config = slot.config().clone();
                config.enabled = false;
                *slot = Arc::new(Echelon::new(config));
            }
        }
        self
    }

    pub fn fail_echelon(&self, echelon: &str) {
        self.failing.lock().unwrap().push(echelon.to_string());
    }

    pub fn set_circuit(&self, state: CircuitBreakerState) {
        *self.circuit.lock().unwrap() = state;
    }

    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl FallbackExecutor for FakeTaskGroup {
    async fn execute_on_echelon(
        &self,
        echelon: &Echelon,
        _request: &CompletionRequest,
    ) -> AppResult<CompletionResponse> {
        self.dispatched
            .lock()
            .unwrap()
            .push(echelon.name().to_string());
        if self.failing.lock().unwrap().iter().any(|e| e == echelon.name()) {
            return Err(AppError::Backend(format!("{} failed", echelon.name())));
        }
        let model = echelon.models().first().cloned().unwrap_or_default();
        Ok(CompletionResponse::new(
            format!("served by {}", echelon.name()),
            model,
        ))
    }
}

#[async_trait]
impl TaskGroup for FakeTaskGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn echelons(&self) -> Vec<Arc<Echelon>> {
        self.echelons.clone()
    }

    fn fallback_strategy(&self) -> &FallbackStrategy {
        &self.strategy
    }

    fn circuit_breaker_state(&self) -> CircuitBreakerState {
        *self.circuit.lock().unwrap()
    }

    async fn execute_with_fallback(
        &self,
        request: &CompletionRequest,
    ) -> AppResult<CompletionResponse> {
        execute_group_with_fallback(self, request)
            .await
            .map(|outcome| outcome.response)
    }
}

#[derive(Default)]
pub struct FakeTaskGroupManager {
    pub groups: HashMap<String, Arc<FakeTaskGroup>>,
}

impl FakeTaskGroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: Arc<FakeTaskGroup>) -> Self {
        self.groups.insert(group.name.clone(), group);
        self
    }
}

#[async_trait]
impl TaskGroupManager for FakeTaskGroupManager {
    async fn get_task_group(&self, name: &str) -> Option<Arc<dyn TaskGroup>> {
        self.groups
            .get(name)
            .map(|g| Arc::clone(g) as Arc<dyn TaskGroup>)
    }

    async fn global_health_check(&self) -> HashMap<String, TaskGroupHealth> {
        self.groups
            .iter()
            .map(|(name, group)| {
                let active = group.echelons.iter().filter(|e| e.is_available()).count();
                let circuit = *group.circuit.lock().unwrap();
                (
                    name.clone(),
                    TaskGroupHealth {
                        healthy: active > 0 && circuit != CircuitBreakerState::Open,
                        active_echelons: active,
                        total_echelons: group.echelons.len(),
                        circuit_breaker_state: circuit,
                        errors: Vec::new(),
                    },
                )
            })
            .collect()
    }
}

/// Wrapper config with no retries and short timeouts for fast tests
pub fn quick(mut config: WrapperConfig) -> WrapperConfig {
    config.max_retries = 0;
    config.retry_delay_ms = 0;
    config.timeout_ms = 2_000;
    config
}

pub fn deps(pools: Arc<FakePoolManager>, groups: Arc<FakeTaskGroupManager>) -> WrapperDeps {
    WrapperDeps::new(pools, groups)
}
