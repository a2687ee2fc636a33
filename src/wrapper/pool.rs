//! Wrapper over a load-balanced instance pool
//!
//! Every request leases one instance and hands it back exactly once, on
//! success, failure, timeout, or when a stream is dropped mid-iteration.

use crate::backend::{
    BackendClient, CompletionRequest, CompletionResponse, ModelInfo, PoolInstance, PoolManager,
    ResponseStream,
};
use crate::error::{AppError, AppResult};
use crate::health::HealthStatus;
use crate::wrapper::{HealthProbe, Wrapper, WrapperConfig, WrapperCore, WrapperType};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::sync::Arc;

/// Ownership of one leased pool instance
///
/// Call [`InstanceLease::release`] on every normal path. If the lease is
/// dropped instead (a cancelled call or an abandoned stream), the release
/// is spawned onto the runtime.
pub struct InstanceLease {
    pools: Arc<dyn PoolManager>,
    pool: String,
    client: Arc<dyn BackendClient>,
    instance: Option<PoolInstance>,
}

impl InstanceLease {
    fn new(pools: Arc<dyn PoolManager>, pool: String, instance: PoolInstance) -> Self {
        Self {
            client: Arc::clone(&instance.client),
            pools,
            pool,
            instance: Some(instance),
        }
    }

    pub fn client(&self) -> &Arc<dyn BackendClient> {
        &self.client
    }

    /// Return the instance to its pool
    ///
    /// Release failures are logged and never surfaced, so they cannot mask
    /// the outcome of the call that used the instance.
    pub async fn release(mut self) {
        if let Some(instance) = self.instance.take() {
            release_instance(Arc::clone(&self.pools), self.pool.clone(), instance).await;
        }
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        let pools = Arc::clone(&self.pools);
        let pool = self.pool.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(release_instance(pools, pool, instance));
            }
            Err(_) => {
                tracing::error!(
                    pool_name = %pool,
                    instance_id = %instance.id,
                    "Pool instance dropped outside a Tokio runtime and could not be released"
                );
            }
        }
    }
}

async fn release_instance(pools: Arc<dyn PoolManager>, pool: String, instance: PoolInstance) {
    let instance_id = instance.id.clone();
    if let Err(e) = pools.release_pool_instance(&pool, instance).await {
        tracing::warn!(
            pool_name = %pool,
            instance_id = %instance_id,
            error = %e,
            "Failed to release pool instance"
        );
    }
}

/// Wrapper bound to one named pool
pub struct PoolWrapper {
    core: WrapperCore,
    pools: Arc<dyn PoolManager>,
}

impl PoolWrapper {
    pub fn new(config: WrapperConfig, pools: Arc<dyn PoolManager>) -> AppResult<Self> {
        if config.wrapper_type != WrapperType::Pool {
            return Err(AppError::WrapperConfiguration {
                wrapper: config.name.clone(),
                reason: format!("expected type 'pool', got '{}'", config.wrapper_type),
            });
        }
        config.validate()?;
        Ok(Self {
            core: WrapperCore::new(config),
            pools,
        })
    }

    async fn pool_name(&self) -> AppResult<String> {
        self.core
            .config()
            .await
            .custom_settings
            .pool_name
            .ok_or_else(|| AppError::WrapperConfiguration {
                wrapper: self.core.name().to_string(),
                reason: "missing custom_settings.pool_name".to_string(),
            })
    }

    async fn acquire(&self, pool: &str) -> AppResult<InstanceLease> {
        match self.pools.get_pool_instance(pool).await? {
            Some(instance) => {
                tracing::trace!(
                    wrapper_name = %self.core.name(),
                    pool_name = %pool,
                    instance_id = %instance.id,
                    "Acquired pool instance"
                );
                Ok(InstanceLease::new(
                    Arc::clone(&self.pools),
                    pool.to_string(),
                    instance,
                ))
            }
            None => Err(AppError::NoHealthyInstance(pool.to_string())),
        }
    }
}

#[async_trait]
impl Wrapper for PoolWrapper {
    fn core(&self) -> &WrapperCore {
        &self.core
    }

    async fn initialize(&self) -> AppResult<()> {
        let pool = self.pool_name().await?;
        if !self.pools.has_pool(&pool).await {
            return Err(AppError::PoolNotFound(pool));
        }
        self.core.mark_initialized();
        tracing::info!(
            wrapper_name = %self.core.name(),
            pool_name = %pool,
            "Pool wrapper initialized"
        );
        Ok(())
    }

    async fn perform_request(&self, request: &CompletionRequest) -> AppResult<CompletionResponse> {
        let pool = self.pool_name().await?;
        let lease = self.acquire(&pool).await?;
        let result = lease.client().generate_response(request).await;
        lease.release().await;
        result
    }

    async fn perform_stream(&self, request: &CompletionRequest) -> AppResult<ResponseStream> {
        let pool = self.pool_name().await?;
        let lease = self.acquire(&pool).await?;
        let inner = match lease.client().generate_response_stream(request).await {
            Ok(inner) => inner,
            Err(e) => {
                lease.release().await;
                return Err(e);
            }
        };

        // The lease rides along with the stream and is released at the end,
        // on the first error, or by its Drop if the consumer stops early.
        let chunks = stream::unfold(Some((inner, lease)), |state| async move {
            let (mut inner, lease) = state?;
            match inner.next().await {
                Some(Ok(chunk)) => Some((Ok(chunk), Some((inner, lease)))),
                Some(Err(e)) => {
                    lease.release().await;
                    Some((Err(e), None))
                }
                None => {
                    lease.release().await;
                    None
                }
            }
        });
        Ok(chunks.boxed())
    }

    async fn perform_health_check(&self) -> AppResult<HealthProbe> {
        let pool = self.pool_name().await?;
        let health = self.pools.health_check(&pool).await?;
        let status = if health.healthy && health.healthy_instances > 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        let message = format!(
            "{}/{} instances healthy in pool '{}'",
            health.healthy_instances, health.total_instances, pool
        );
        Ok(HealthProbe::new(status, message).with_details(serde_json::json!({
            "pool": pool,
            "healthy_instances": health.healthy_instances,
            "total_instances": health.total_instances,
            "errors": health.errors,
        })))
    }

    async fn get_model_info(&self) -> AppResult<ModelInfo> {
        let pool = self.pool_name().await?;
        let lease = self.acquire(&pool).await?;
        let result = lease.client().get_model_info().await;
        lease.release().await;
        result
    }
}
