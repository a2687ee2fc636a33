//! Wrapper type registry and lifecycle management
//!
//! Construction is looked up per [`WrapperType`] in a registry of builder
//! functions. Pool, task group and direct builders are registered by
//! default; more can be registered or removed at runtime, and a type
//! without a builder fails closed with `UnsupportedWrapperType`.

use crate::backend::{EmptyPoolManager, EmptyTaskGroupManager, PoolManager, TaskGroupManager};
use crate::error::{AppError, AppResult};
use crate::health::HealthStatus;
use crate::shared::clock::unix_millis;
use crate::wrapper::{
    DirectWrapper, PoolWrapper, TaskGroupWrapper, Wrapper, WrapperConfig, WrapperHealth,
    WrapperStatistics, WrapperType,
};
use futures::future::join_all;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Collaborators handed to every builder
#[derive(Clone)]
pub struct WrapperDeps {
    pub pools: Arc<dyn PoolManager>,
    pub task_groups: Arc<dyn TaskGroupManager>,
}

impl WrapperDeps {
    pub fn new(pools: Arc<dyn PoolManager>, task_groups: Arc<dyn TaskGroupManager>) -> Self {
        Self { pools, task_groups }
    }
}

impl Default for WrapperDeps {
    fn default() -> Self {
        Self::new(Arc::new(EmptyPoolManager), Arc::new(EmptyTaskGroupManager))
    }
}

/// Constructs an uninitialized wrapper from its configuration
pub type WrapperBuilder =
    Arc<dyn Fn(WrapperConfig, &WrapperDeps) -> AppResult<Arc<dyn Wrapper>> + Send + Sync>;

fn default_builders() -> HashMap<WrapperType, WrapperBuilder> {
    let mut builders: HashMap<WrapperType, WrapperBuilder> = HashMap::new();
    builders.insert(
        WrapperType::Pool,
        Arc::new(|config: WrapperConfig, deps: &WrapperDeps| -> AppResult<Arc<dyn Wrapper>> {
            Ok(Arc::new(PoolWrapper::new(config, Arc::clone(&deps.pools))?) as Arc<dyn Wrapper>)
        }),
    );
    builders.insert(
        WrapperType::TaskGroup,
        Arc::new(|config: WrapperConfig, deps: &WrapperDeps| -> AppResult<Arc<dyn Wrapper>> {
            Ok(Arc::new(TaskGroupWrapper::new(config, Arc::clone(&deps.task_groups))?)
                as Arc<dyn Wrapper>)
        }),
    );
    builders.insert(
        WrapperType::Direct,
        Arc::new(|config: WrapperConfig, _deps: &WrapperDeps| -> AppResult<Arc<dyn Wrapper>> {
            Ok(Arc::new(DirectWrapper::new(config)?) as Arc<dyn Wrapper>)
        }),
    );
    builders
}

/// Registry of live wrappers, in creation order
pub struct WrapperFactory {
    deps: WrapperDeps,
    builders: RwLock<HashMap<WrapperType, WrapperBuilder>>,
    wrappers: RwLock<IndexMap<String, Arc<dyn Wrapper>>>,
}

impl WrapperFactory {
    pub fn new(deps: WrapperDeps) -> Self {
        Self {
            deps,
            builders: RwLock::new(default_builders()),
            wrappers: RwLock::new(IndexMap::new()),
        }
    }

    pub fn deps(&self) -> &WrapperDeps {
        &self.deps
    }

    /// Register (or replace) the builder for a type
    pub async fn register_type(&self, wrapper_type: WrapperType, builder: WrapperBuilder) {
        self.builders.write().await.insert(wrapper_type, builder);
        tracing::debug!(wrapper_type = %wrapper_type, "Wrapper type registered");
    }

    /// Remove the builder for a type; returns whether one was registered
    pub async fn unregister_type(&self, wrapper_type: WrapperType) -> bool {
        self.builders.write().await.remove(&wrapper_type).is_some()
    }

    pub async fn supported_types(&self) -> Vec<WrapperType> {
        let builders = self.builders.read().await;
        WrapperType::ALL
            .into_iter()
            .filter(|t| builders.contains_key(t))
            .collect()
    }

    /// Validate, build and initialize a wrapper without registering it
    async fn build_initialized(&self, config: WrapperConfig) -> AppResult<Arc<dyn Wrapper>> {
        config.validate()?;
        let builder = self
            .builders
            .read()
            .await
            .get(&config.wrapper_type)
            .cloned()
            .ok_or_else(|| AppError::UnsupportedWrapperType(config.wrapper_type.to_string()))?;

        let wrapper = builder(config, &self.deps)?;
        wrapper.initialize().await?;
        Ok(wrapper)
    }

    /// Validate, build, initialize and register one wrapper
    pub async fn create_wrapper(&self, config: WrapperConfig) -> AppResult<Arc<dyn Wrapper>> {
        if self.wrappers.read().await.contains_key(&config.name) {
            return Err(AppError::WrapperAlreadyExists(config.name));
        }
        let name = config.name.clone();
        let wrapper = self.build_initialized(config).await?;

        let mut wrappers = self.wrappers.write().await;
        if wrappers.contains_key(&name) {
            drop(wrappers);
            if let Err(e) = wrapper.close().await {
                tracing::warn!(wrapper_name = %name, error = %e, "Failed to close duplicate wrapper");
            }
            return Err(AppError::WrapperAlreadyExists(name));
        }
        wrappers.insert(name.clone(), Arc::clone(&wrapper));

        tracing::info!(
            wrapper_name = %name,
            wrapper_type = %wrapper.wrapper_type(),
            "Wrapper created"
        );
        Ok(wrapper)
    }

    /// Swap a registered wrapper for one built from `config`
    ///
    /// The replacement is built and initialized first; the current wrapper
    /// keeps serving until the swap and is closed after it. On error the
    /// registry is left untouched. The wrapper keeps its position.
    pub async fn replace_wrapper(&self, config: WrapperConfig) -> AppResult<Arc<dyn Wrapper>> {
        let name = config.name.clone();
        if !self.wrappers.read().await.contains_key(&name) {
            return Err(AppError::WrapperNotFound(name));
        }
        let replacement = self.build_initialized(config).await?;

        let previous = self
            .wrappers
            .write()
            .await
            .get_mut(&name)
            .map(|slot| std::mem::replace(slot, Arc::clone(&replacement)));
        let Some(previous) = previous else {
            // Removed while the replacement was being built
            if let Err(e) = replacement.close().await {
                tracing::warn!(wrapper_name = %name, error = %e, "Failed to close replacement");
            }
            return Err(AppError::WrapperNotFound(name));
        };

        if let Err(e) = previous.close().await {
            tracing::warn!(wrapper_name = %name, error = %e, "Failed to close replaced wrapper");
        }
        tracing::info!(
            wrapper_name = %name,
            wrapper_type = %replacement.wrapper_type(),
            "Wrapper replaced"
        );
        Ok(replacement)
    }

    /// Create each wrapper independently
    ///
    /// A failure is logged and does not stop the remaining creations; only
    /// the successes are returned.
    pub async fn create_wrappers(
        &self,
        configs: Vec<WrapperConfig>,
    ) -> IndexMap<String, Arc<dyn Wrapper>> {
        let mut created = IndexMap::new();
        for config in configs {
            let name = config.name.clone();
            match self.create_wrapper(config).await {
                Ok(wrapper) => {
                    created.insert(name, wrapper);
                }
                Err(e) => {
                    tracing::error!(wrapper_name = %name, error = %e, "Failed to create wrapper");
                }
            }
        }
        created
    }

    pub async fn get_wrapper(&self, name: &str) -> Option<Arc<dyn Wrapper>> {
        self.wrappers.read().await.get(name).cloned()
    }

    pub async fn get_all_wrappers(&self) -> Vec<Arc<dyn Wrapper>> {
        self.wrappers.read().await.values().cloned().collect()
    }

    pub async fn wrapper_names(&self) -> Vec<String> {
        self.wrappers.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.wrappers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.wrappers.read().await.is_empty()
    }

    /// Unregister and close a wrapper
    pub async fn remove_wrapper(&self, name: &str) -> AppResult<()> {
        let wrapper = self
            .wrappers
            .write()
            .await
            .shift_remove(name)
            .ok_or_else(|| AppError::WrapperNotFound(name.to_string()))?;

        if let Err(e) = wrapper.close().await {
            tracing::warn!(wrapper_name = %name, error = %e, "Failed to close removed wrapper");
        }
        tracing::info!(wrapper_name = %name, "Wrapper removed");
        Ok(())
    }

    /// Probe every wrapper concurrently
    ///
    /// A probe error becomes an `unhealthy` result for that wrapper.
    pub async fn health_check_all(&self) -> IndexMap<String, WrapperHealth> {
        let wrappers = self.get_all_wrappers().await;
        let results = join_all(wrappers.iter().map(|w| async move {
            let health = match w.health_check().await {
                Ok(health) => health,
                Err(e) => WrapperHealth {
                    status: HealthStatus::Unhealthy,
                    message: e.to_string(),
                    response_time_ms: 0,
                    checked_at: unix_millis(),
                    details: serde_json::Value::Null,
                },
            };
            (w.name().to_string(), health)
        }))
        .await;
        results.into_iter().collect()
    }

    pub async fn get_all_statistics(&self) -> IndexMap<String, WrapperStatistics> {
        let mut all = IndexMap::new();
        for wrapper in self.get_all_wrappers().await {
            all.insert(wrapper.name().to_string(), wrapper.get_statistics().await);
        }
        all
    }

    pub async fn reset_all_statistics(&self) {
        for wrapper in self.get_all_wrappers().await {
            wrapper.reset_statistics().await;
        }
    }

    /// Close and unregister every wrapper
    pub async fn close_all(&self) {
        let wrappers: Vec<(String, Arc<dyn Wrapper>)> =
            self.wrappers.write().await.drain(..).collect();
        for (name, wrapper) in wrappers {
            if let Err(e) = wrapper.close().await {
                tracing::warn!(wrapper_name = %name, error = %e, "Failed to close wrapper");
            }
        }
    }
}

impl Default for WrapperFactory {
    fn default() -> Self {
        Self::new(WrapperDeps::default())
    }
}
