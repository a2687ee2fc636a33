//! In-memory metrics time series
//!
//! Each named series is capped at `max_data_points` (oldest evicted first)
//! and garbage-collected by age on a separate timer. Aggregate queries
//! return `None` when there is no data, which callers must not read as 0.

use crate::config::MetricsConfig;
use crate::error::{AppError, AppResult};
use crate::events::{EventBus, OrchestrationEvent};
use crate::shared::clock::unix_millis;
use crate::shared::task::spawn_periodic;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio::task::AbortHandle;

pub type MetricTags = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregationFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }

    /// Reduce values; `None` when there are none
    pub fn apply(&self, values: impl IntoIterator<Item = f64>) -> Option<f64> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for value in values {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }
        if count == 0 {
            return None;
        }
        Some(match self {
            Self::Sum => sum,
            Self::Avg => sum / count as f64,
            Self::Min => min,
            Self::Max => max,
            Self::Count => count as f64,
        })
    }
}

impl FromStr for AggregationFunction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            other => Err(AppError::Validation(format!(
                "unknown aggregation function '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: u64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: MetricTags,
}

/// Published for every recorded point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    pub name: String,
    pub value: f64,
    pub tags: MetricTags,
    pub timestamp: u64,
}

/// Published by the aggregation timer for every active series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedMetricEvent {
    pub name: String,
    /// Average over the window
    pub value: f64,
    pub count: usize,
    /// Window length in milliseconds
    pub window: u64,
    pub timestamp: u64,
}

/// Summary of one series over an optional trailing window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    pub count: usize,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub latest: f64,
    pub first_timestamp: u64,
    pub last_timestamp: u64,
}

pub struct MetricsCollector {
    config: MetricsConfig,
    series: RwLock<HashMap<String, VecDeque<MetricPoint>>>,
    events: EventBus,
    tasks: Mutex<Vec<AbortHandle>>,
}

fn window_start(now: u64, window_ms: Option<u64>) -> u64 {
    window_ms.map_or(0, |w| now.saturating_sub(w))
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig, events: EventBus) -> Self {
        Self {
            config,
            series: RwLock::new(HashMap::new()),
            events,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub async fn record_metric(&self, name: &str, value: f64, tags: MetricTags) -> AppResult<()> {
        self.record_metric_at(name, value, tags, unix_millis()).await
    }

    /// Append a point with an explicit timestamp
    pub async fn record_metric_at(
        &self,
        name: &str,
        value: f64,
        tags: MetricTags,
        timestamp: u64,
    ) -> AppResult<()> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("metric name must not be empty".to_string()));
        }
        if !value.is_finite() {
            return Err(AppError::Validation(format!(
                "metric '{}' value must be finite, got {}",
                name, value
            )));
        }

        {
            let mut series = self.series.write().await;
            let points = series.entry(name.to_string()).or_default();
            points.push_back(MetricPoint {
                timestamp,
                value,
                tags: tags.clone(),
            });
            while points.len() > self.config.max_data_points {
                points.pop_front();
            }
        }

        self.events.publish(OrchestrationEvent::Metric(MetricEvent {
            name: name.to_string(),
            value,
            tags,
            timestamp,
        }));
        Ok(())
    }

    pub async fn get_aggregated_metrics(
        &self,
        name: &str,
        function: AggregationFunction,
        window_ms: Option<u64>,
    ) -> Option<f64> {
        self.get_aggregated_metrics_at(name, function, window_ms, unix_millis())
            .await
    }

    /// Aggregate the points at or after `now - window_ms` (all points without a window)
    pub async fn get_aggregated_metrics_at(
        &self,
        name: &str,
        function: AggregationFunction,
        window_ms: Option<u64>,
        now: u64,
    ) -> Option<f64> {
        let series = self.series.read().await;
        let start = window_start(now, window_ms);
        function.apply(
            series
                .get(name)?
                .iter()
                .filter(|p| p.timestamp >= start)
                .map(|p| p.value),
        )
    }

    pub async fn summarize(&self, name: &str, window_ms: Option<u64>) -> Option<SeriesSummary> {
        self.summarize_at(name, window_ms, unix_millis()).await
    }

    pub async fn summarize_at(
        &self,
        name: &str,
        window_ms: Option<u64>,
        now: u64,
    ) -> Option<SeriesSummary> {
        let series = self.series.read().await;
        let start = window_start(now, window_ms);
        let points: Vec<&MetricPoint> = series
            .get(name)?
            .iter()
            .filter(|p| p.timestamp >= start)
            .collect();
        let (first, last) = (points.first()?, points.last()?);
        let values = || points.iter().map(|p| p.value);

        Some(SeriesSummary {
            name: name.to_string(),
            window_ms,
            count: points.len(),
            sum: AggregationFunction::Sum.apply(values())?,
            avg: AggregationFunction::Avg.apply(values())?,
            min: AggregationFunction::Min.apply(values())?,
            max: AggregationFunction::Max.apply(values())?,
            latest: last.value,
            first_timestamp: first.timestamp,
            last_timestamp: last.timestamp,
        })
    }

    /// Summaries of every series that has points in the window, by name
    pub async fn summarize_all(&self, window_ms: Option<u64>) -> Vec<SeriesSummary> {
        let now = unix_millis();
        let mut summaries = Vec::new();
        for name in self.series_names().await {
            if let Some(summary) = self.summarize_at(&name, window_ms, now).await {
                summaries.push(summary);
            }
        }
        summaries
    }

    pub async fn get_series(&self, name: &str) -> Vec<MetricPoint> {
        self.series
            .read()
            .await
            .get(name)
            .map(|points| points.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn series_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Rolling averages over the aggregation interval ending at `now`
    pub async fn aggregate_at(&self, now: u64) -> Vec<AggregatedMetricEvent> {
        let window = self.config.aggregation_interval_seconds.saturating_mul(1000);
        let start = now.saturating_sub(window);
        let series = self.series.read().await;

        let mut aggregates: Vec<AggregatedMetricEvent> = series
            .iter()
            .filter_map(|(name, points)| {
                let values: Vec<f64> = points
                    .iter()
                    .filter(|p| p.timestamp >= start)
                    .map(|p| p.value)
                    .collect();
                let value = AggregationFunction::Avg.apply(values.iter().copied())?;
                Some(AggregatedMetricEvent {
                    name: name.clone(),
                    value,
                    count: values.len(),
                    window,
                    timestamp: now,
                })
            })
            .collect();
        aggregates.sort_by(|a, b| a.name.cmp(&b.name));
        aggregates
    }

    /// Compute and publish one round of aggregates
    pub async fn publish_aggregates(&self) -> usize {
        let aggregates = self.aggregate_at(unix_millis()).await;
        let count = aggregates.len();
        for aggregate in aggregates {
            self.events
                .publish(OrchestrationEvent::AggregatedMetric(aggregate));
        }
        count
    }

    /// Drop points older than the retention period, and emptied series
    ///
    /// Returns the number of points removed.
    pub async fn cleanup_at(&self, now: u64) -> usize {
        let cutoff = now.saturating_sub(self.config.retention_ms());
        let mut series = self.series.write().await;
        let mut removed = 0;
        for points in series.values_mut() {
            while points.front().is_some_and(|p| p.timestamp < cutoff) {
                points.pop_front();
                removed += 1;
            }
        }
        series.retain(|_, points| !points.is_empty());
        removed
    }

    pub async fn clear(&self) {
        self.series.write().await.clear();
    }

    /// Start the aggregation and cleanup timers; no-op when disabled
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            tracing::info!("Metrics collection disabled");
            return;
        }
        self.stop();

        let aggregation = spawn_periodic(
            "metrics_aggregation",
            self.config.aggregation_interval(),
            Arc::clone(self),
            |collector| async move {
                let published = collector.publish_aggregates().await;
                tracing::trace!(published, "Published metric aggregates");
            },
        );
        let cleanup = spawn_periodic(
            "metrics_cleanup",
            self.config.cleanup_interval(),
            Arc::clone(self),
            |collector| async move {
                let removed = collector.cleanup_at(unix_millis()).await;
                if removed > 0 {
                    tracing::debug!(removed, "Evicted expired metric points");
                }
            },
        );

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([aggregation, cleanup]);
        tracing::info!(
            aggregation_interval_seconds = self.config.aggregation_interval_seconds,
            cleanup_interval_seconds = self.config.cleanup_interval_seconds,
            "Metrics collector started"
        );
    }

    pub fn stop(&self) {
        let tasks: Vec<AbortHandle> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
    }
}
