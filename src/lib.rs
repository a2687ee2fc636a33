//! Tiergate - resilient routing gateway for pooled and tiered LLM backends
//!
//! Requests are routed through wrappers that bind instance pools, tiered
//! task groups and direct endpoints to one execution lifecycle. Selection
//! prefers the most capable healthy wrapper; task groups degrade across
//! echelons when a tier fails. Health checks with hysteresis, a time-series
//! collector and rule-based alerting run alongside the request path, all
//! composed by [`service::OrchestrationService`].

pub mod alerting;
pub mod backend;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod fallback;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod service;
pub mod shared;
pub mod telemetry;
pub mod wrapper;
