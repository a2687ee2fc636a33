//! Echelons: priority tiers inside a task group
//!
//! An echelon carries its static configuration plus live counters. The
//! concurrency counter is a gate, not a queue: [`Echelon::try_acquire`]
//! either hands out a [`ConcurrencyPermit`] or refuses, and the permit gives
//! the slot back when dropped.

use crate::backend::{CompletionRequest, CompletionResponse};
use crate::error::{AppError, AppResult};
use crate::fallback::FallbackExecutor;
use crate::shared::clock::unix_millis;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const RPM_WINDOW_MS: u64 = 60_000;

/// Static configuration of an echelon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchelonConfig {
    pub name: String,
    /// Lower values are tried first
    pub priority: u32,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: u32,
    /// Requests allowed per rolling minute; 0 disables the limit
    #[serde(default)]
    pub rpm_limit: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_concurrency_limit() -> u32 {
    10
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_enabled() -> bool {
    true
}

impl EchelonConfig {
    pub fn new(name: impl Into<String>, priority: u32, models: Vec<String>) -> Self {
        Self {
            name: name.into(),
            priority,
            models,
            concurrency_limit: default_concurrency_limit(),
            rpm_limit: 0,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            enabled: default_enabled(),
        }
    }
}

/// A tier with live counters
#[derive(Debug)]
pub struct Echelon {
    config: EchelonConfig,
    current_concurrency: AtomicU32,
    current_rpm: AtomicU32,
    rpm_window_start: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl Echelon {
    pub fn new(config: EchelonConfig) -> Self {
        Self {
            config,
            current_concurrency: AtomicU32::new(0),
            current_rpm: AtomicU32::new(0),
            rpm_window_start: AtomicU64::new(unix_millis()),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn priority(&self) -> u32 {
        self.config.priority
    }

    pub fn models(&self) -> &[String] {
        &self.config.models
    }

    pub fn config(&self) -> &EchelonConfig {
        &self.config
    }

    pub fn current_concurrency(&self) -> u32 {
        self.current_concurrency.load(Ordering::Acquire)
    }

    pub fn current_rpm(&self) -> u32 {
        self.roll_rpm_window(unix_millis());
        self.current_rpm.load(Ordering::Acquire)
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Whether a new request would currently fit under both limits
    pub fn can_accept_request(&self) -> bool {
        if self.current_concurrency() >= self.config.concurrency_limit {
            return false;
        }
        self.config.rpm_limit == 0 || self.current_rpm() < self.config.rpm_limit
    }

    /// Enabled, has models, and has capacity
    pub fn is_available(&self) -> bool {
        self.config.enabled && !self.config.models.is_empty() && self.can_accept_request()
    }

    /// Claim one concurrency slot (and one RPM token when limited)
    ///
    /// Returns `None` when the echelon is disabled or either limit is
    /// reached. The check and the increment are a single compare-and-swap,
    /// so concurrent callers can never push the counter past the limit.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConcurrencyPermit> {
        if !self.config.enabled {
            return None;
        }
        self.roll_rpm_window(unix_millis());

        let limit = self.config.concurrency_limit;
        self.current_concurrency
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c < limit).then_some(c + 1)
            })
            .ok()?;

        let rpm_limit = self.config.rpm_limit;
        let rpm_ok = self
            .current_rpm
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                (rpm_limit == 0 || r < rpm_limit).then_some(r.saturating_add(1))
            })
            .is_ok();
        if !rpm_ok {
            self.current_concurrency.fetch_sub(1, Ordering::AcqRel);
            return None;
        }

        Some(ConcurrencyPermit {
            echelon: Arc::clone(self),
        })
    }

    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    fn roll_rpm_window(&self, now: u64) {
        let start = self.rpm_window_start.load(Ordering::Acquire);
        if now.saturating_sub(start) >= RPM_WINDOW_MS
            && self
                .rpm_window_start
                .compare_exchange(start, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.current_rpm.store(0, Ordering::Release);
        }
    }
}

/// One claimed concurrency slot; released on drop
#[derive(Debug)]
pub struct ConcurrencyPermit {
    echelon: Arc<Echelon>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.echelon
            .current_concurrency
            .fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run one request on one echelon under a permit
///
/// Rejects with `EchelonUnavailable` when no slot is free and records the
/// outcome on the echelon's counters.
pub async fn dispatch_on_echelon(
    group: &str,
    echelon: &Arc<Echelon>,
    executor: &dyn FallbackExecutor,
    request: &CompletionRequest,
) -> AppResult<CompletionResponse> {
    let Some(_permit) = echelon.try_acquire() else {
        return Err(AppError::EchelonUnavailable {
            group: group.to_string(),
            echelon: echelon.name().to_string(),
        });
    };

    match executor.execute_on_echelon(echelon, request).await {
        Ok(response) => {
            echelon.record_success();
            Ok(response)
        }
        Err(e) => {
            echelon.record_failure();
            Err(e)
        }
    }
}
