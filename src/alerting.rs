//! Rule-based alerting
//!
//! Health snapshots are pushed in by the orchestration service. A rule
//! fires only when it is enabled, its cooldown has elapsed and the active
//! set has room, and it never creates a second live alert for the same
//! rule and component. All of those checks and the insert happen under
//! one lock. Actions run after the lock is released.

use crate::config::AlertingConfig;
use crate::error::{AppError, AppResult};
use crate::events::{EventBus, OrchestrationEvent};
use crate::health::{GlobalHealth, HealthStatus};
use crate::shared::clock::unix_millis;
use crate::shared::task::spawn_periodic;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

pub const RULE_COMPONENT_UNHEALTHY: &str = "component-unhealthy";
pub const RULE_SYSTEM_DEGRADED: &str = "system-degraded";
pub const RULE_HIGH_ERROR_RATE: &str = "high-error-rate";
pub const RULE_SLOW_RESPONSE: &str = "slow-response";

const DEFAULT_COOLDOWN_MS: u64 = 5 * 60 * 1000;
const ACTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Health,
    Performance,
    ErrorRate,
    Availability,
    Custom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    #[default]
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Gte => value >= threshold,
            Self::Lt => value < threshold,
            Self::Lte => value <= threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
            Self::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub operator: ComparisonOperator,
    #[serde(default = "default_time_window_ms")]
    pub time_window_ms: u64,
    #[serde(default = "default_evaluation_periods")]
    pub evaluation_periods: u32,
}

impl Default for AlertCondition {
    fn default() -> Self {
        Self {
            metric: String::new(),
            threshold: 0.0,
            operator: ComparisonOperator::default(),
            time_window_ms: default_time_window_ms(),
            evaluation_periods: default_evaluation_periods(),
        }
    }
}

fn default_time_window_ms() -> u64 {
    300_000
}

fn default_evaluation_periods() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertAction {
    Log,
    Webhook {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    Email {
        recipients: Vec<String>,
    },
    Slack {
        webhook_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
}

impl AlertAction {
    fn kind(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Webhook { .. } => "webhook",
            Self::Email { .. } => "email",
            Self::Slack { .. } => "slack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub level: AlertLevel,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub condition: AlertCondition,
    #[serde(default)]
    pub actions: Vec<AlertAction>,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown_ms() -> u64 {
    DEFAULT_COOLDOWN_MS
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl AlertRule {
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |reason: String| {
            Err(AppError::Config(format!("alert rule '{}' {}", self.id, reason)))
        };
        if self.id.trim().is_empty() {
            return invalid("must have a non-empty id".to_string());
        }
        if self.name.trim().is_empty() {
            return invalid("must have a non-empty name".to_string());
        }
        if !self.condition.threshold.is_finite() {
            return invalid(format!(
                "has a non-finite threshold {}",
                self.condition.threshold
            ));
        }
        for action in &self.actions {
            match action {
                AlertAction::Webhook { url, .. } if !is_http_url(url) => {
                    return invalid(format!("has an invalid webhook url '{}'", url));
                }
                AlertAction::Slack { webhook_url, .. } if !is_http_url(webhook_url) => {
                    return invalid(format!("has an invalid slack webhook url '{}'", webhook_url));
                }
                AlertAction::Email { recipients } if recipients.is_empty() => {
                    return invalid("has an email action without recipients".to_string());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub level: AlertLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<u64>,
}

/// What a caller supplies when firing a rule
#[derive(Debug, Clone, Default)]
pub struct AlertTrigger {
    pub component: Option<String>,
    pub message: String,
    pub details: serde_json::Value,
}

impl AlertTrigger {
    pub fn new(component: Option<String>, message: impl Into<String>) -> Self {
        Self {
            component,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertStatistics {
    pub active_alerts: usize,
    pub history_size: usize,
    pub active_by_level: BTreeMap<String, usize>,
    pub total_rules: usize,
    pub enabled_rules: usize,
}

/// Built-in rules, parameterized by the configured thresholds
pub fn default_rules(config: &AlertingConfig) -> Vec<AlertRule> {
    let rule = |id: &str, name: &str, alert_type, level, condition| AlertRule {
        id: id.to_string(),
        name: name.to_string(),
        alert_type,
        level,
        enabled: true,
        condition,
        actions: vec![AlertAction::Log],
        cooldown_ms: DEFAULT_COOLDOWN_MS,
        last_triggered: None,
    };

    vec![
        rule(
            RULE_COMPONENT_UNHEALTHY,
            "Component unhealthy",
            AlertType::Health,
            AlertLevel::Error,
            AlertCondition {
                metric: "component_health".to_string(),
                ..AlertCondition::default()
            },
        ),
        rule(
            RULE_SYSTEM_DEGRADED,
            "System degraded",
            AlertType::Availability,
            AlertLevel::Warning,
            AlertCondition {
                metric: "system_health".to_string(),
                ..AlertCondition::default()
            },
        ),
        rule(
            RULE_HIGH_ERROR_RATE,
            "High error rate",
            AlertType::ErrorRate,
            AlertLevel::Warning,
            AlertCondition {
                metric: "error_rate".to_string(),
                threshold: config.error_rate_threshold,
                operator: ComparisonOperator::Gt,
                ..AlertCondition::default()
            },
        ),
        rule(
            RULE_SLOW_RESPONSE,
            "Slow response",
            AlertType::Performance,
            AlertLevel::Warning,
            AlertCondition {
                metric: "response_time".to_string(),
                threshold: config.slow_response_threshold_ms as f64,
                operator: ComparisonOperator::Gt,
                ..AlertCondition::default()
            },
        ),
    ]
}

#[derive(Debug, Default)]
struct AlertState {
    rules: IndexMap<String, AlertRule>,
    active: IndexMap<String, Alert>,
    history: VecDeque<Alert>,
}

impl AlertState {
    fn push_history(&mut self, alert: Alert, capacity: usize) {
        self.history.push_back(alert);
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }
}

pub struct AlertingService {
    config: AlertingConfig,
    state: Mutex<AlertState>,
    events: EventBus,
    http: reqwest::Client,
    task: StdMutex<Option<AbortHandle>>,
}

impl AlertingService {
    /// Built-in rules plus the configured ones; a configured rule replaces
    /// a built-in with the same id
    pub fn new(config: AlertingConfig, events: EventBus) -> Self {
        let mut state = AlertState::default();
        for rule in default_rules(&config).into_iter().chain(config.rules.clone()) {
            state.rules.insert(rule.id.clone(), rule);
        }
        Self {
            config,
            state: Mutex::new(state),
            events,
            http: reqwest::Client::new(),
            task: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &AlertingConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Add a rule, replacing any rule with the same id
    pub async fn add_rule(&self, rule: AlertRule) -> AppResult<()> {
        rule.validate()?;
        tracing::info!(rule_id = %rule.id, level = %rule.level, "Alert rule added");
        self.state.lock().await.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// Add several rules; if any is invalid, none is added
    pub async fn add_rules(&self, rules: Vec<AlertRule>) -> AppResult<usize> {
        for rule in &rules {
            rule.validate()?;
        }
        let count = rules.len();
        let mut state = self.state.lock().await;
        for rule in rules {
            tracing::info!(rule_id = %rule.id, level = %rule.level, "Alert rule added");
            state.rules.insert(rule.id.clone(), rule);
        }
        Ok(count)
    }

    pub async fn remove_rule(&self, rule_id: &str) -> bool {
        self.state.lock().await.rules.shift_remove(rule_id).is_some()
    }

    pub async fn get_rule(&self, rule_id: &str) -> Option<AlertRule> {
        self.state.lock().await.rules.get(rule_id).cloned()
    }

    pub async fn get_rules(&self) -> Vec<AlertRule> {
        self.state.lock().await.rules.values().cloned().collect()
    }

    pub async fn process_health_check(&self, snapshot: &GlobalHealth) -> Vec<Alert> {
        self.process_health_check_at(snapshot, unix_millis()).await
    }

    /// Resolve alerts for recovered components, then fire rules for the rest
    pub async fn process_health_check_at(&self, snapshot: &GlobalHealth, now: u64) -> Vec<Alert> {
        if !self.config.enabled {
            return Vec::new();
        }

        for component in &snapshot.components {
            if component.status == HealthStatus::Healthy {
                let key = component.kind.key(&component.component);
                self.resolve_matching(
                    |a| {
                        a.component.as_deref() == Some(key.as_str())
                            && (a.rule_id == RULE_COMPONENT_UNHEALTHY
                                || a.rule_id == RULE_SLOW_RESPONSE)
                    },
                    now,
                )
                .await;
            }
        }
        if snapshot.status == HealthStatus::Healthy {
            self.resolve_matching(|a| a.rule_id == RULE_SYSTEM_DEGRADED, now)
                .await;
        }

        let mut fired = Vec::new();
        if snapshot.status != HealthStatus::Healthy {
            let (unhealthy, degraded) = snapshot.components.iter().fold((0, 0), |(u, d), c| {
                match c.status {
                    HealthStatus::Unhealthy => (u + 1, d),
                    HealthStatus::Degraded => (u, d + 1),
                    HealthStatus::Healthy => (u, d),
                }
            });
            let trigger = AlertTrigger::new(None, format!("System health is {}", snapshot.status))
                .with_details(serde_json::json!({
                    "status": snapshot.status,
                    "components": snapshot.components.len(),
                    "unhealthy": unhealthy,
                    "degraded": degraded,
                }));
            fired.extend(self.trigger_rule_at(RULE_SYSTEM_DEGRADED, trigger, now).await);
        }

        let slow_threshold = self
            .get_rule(RULE_SLOW_RESPONSE)
            .await
            .map_or(self.config.slow_response_threshold_ms as f64, |r| {
                r.condition.threshold
            });

        for component in &snapshot.components {
            if component.status == HealthStatus::Healthy {
                continue;
            }
            let key = component.kind.key(&component.component);
            let trigger = AlertTrigger::new(
                Some(key.clone()),
                format!(
                    "{} '{}' is {}: {}",
                    component.kind.as_str(),
                    component.component,
                    component.status,
                    component.message
                ),
            )
            .with_details(serde_json::json!({
                "status": component.status,
                "consecutive_failures": component.consecutive_failures,
                "response_time_ms": component.response_time_ms,
            }));
            fired.extend(
                self.trigger_rule_at(RULE_COMPONENT_UNHEALTHY, trigger, now)
                    .await,
            );

            if component.response_time_ms as f64 > slow_threshold {
                let trigger = AlertTrigger::new(
                    Some(key),
                    format!(
                        "{} '{}' responded in {}ms (threshold {}ms)",
                        component.kind.as_str(),
                        component.component,
                        component.response_time_ms,
                        slow_threshold
                    ),
                );
                fired.extend(self.trigger_rule_at(RULE_SLOW_RESPONSE, trigger, now).await);
            }
        }
        fired
    }

    pub async fn trigger_rule(&self, rule_id: &str, trigger: AlertTrigger) -> Option<Alert> {
        self.trigger_rule_at(rule_id, trigger, unix_millis()).await
    }

    /// Fire a rule if every gate passes; returns the new alert
    pub async fn trigger_rule_at(
        &self,
        rule_id: &str,
        trigger: AlertTrigger,
        now: u64,
    ) -> Option<Alert> {
        let (alert, actions) = {
            let mut state = self.state.lock().await;
            let active_count = state.active.len();
            let duplicate = state.active.values().any(|a| {
                a.rule_id == rule_id && a.component.as_deref() == trigger.component.as_deref()
            });

            let Some(rule) = state.rules.get_mut(rule_id) else {
                tracing::warn!(rule_id = %rule_id, "Attempted to trigger unknown alert rule");
                return None;
            };
            if !rule.enabled {
                return None;
            }
            if rule
                .last_triggered
                .is_some_and(|last| now.saturating_sub(last) < rule.cooldown_ms)
            {
                tracing::trace!(rule_id = %rule_id, "Alert rule in cooldown");
                return None;
            }
            if active_count >= self.config.max_active_alerts {
                tracing::warn!(
                    rule_id = %rule_id,
                    max_active_alerts = self.config.max_active_alerts,
                    "Active alert limit reached, alert suppressed"
                );
                return None;
            }
            if duplicate {
                tracing::trace!(
                    rule_id = %rule_id,
                    component = ?trigger.component,
                    "Live alert already exists for rule and component"
                );
                return None;
            }

            rule.last_triggered = Some(now);
            let alert = Alert {
                id: uuid::Uuid::new_v4().to_string(),
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                alert_type: rule.alert_type,
                level: rule.level,
                message: trigger.message,
                component: trigger.component,
                timestamp: now,
                details: trigger.details,
                resolved: false,
                resolved_at: None,
            };
            let actions = rule.actions.clone();
            state.active.insert(alert.id.clone(), alert.clone());
            (alert, actions)
        };

        self.dispatch_actions(&alert, actions);
        self.events.publish(OrchestrationEvent::Alert(alert.clone()));
        Some(alert)
    }

    /// Fire a metric rule when `value` crosses its threshold
    pub async fn evaluate_metric(
        &self,
        rule_id: &str,
        value: f64,
        component: Option<&str>,
    ) -> Option<Alert> {
        let rule = self.get_rule(rule_id).await?;
        if !rule.enabled || !value.is_finite() {
            return None;
        }
        let condition = &rule.condition;
        if !condition.operator.evaluate(value, condition.threshold) {
            return None;
        }
        let message = format!(
            "{} is {} ({} {})",
            condition.metric,
            value,
            condition.operator.symbol(),
            condition.threshold
        );
        let trigger = AlertTrigger::new(component.map(str::to_string), message).with_details(
            serde_json::json!({
                "metric": condition.metric,
                "value": value,
                "threshold": condition.threshold,
            }),
        );
        self.trigger_rule(rule_id, trigger).await
    }

    /// Evaluate every enabled rule whose metric has a supplied value
    pub async fn check_metric_alerts(&self, values: &HashMap<String, f64>) -> Vec<Alert> {
        let candidates: Vec<(String, f64)> = self
            .get_rules()
            .await
            .into_iter()
            .filter(|r| r.enabled && !r.condition.metric.is_empty())
            .filter_map(|r| values.get(&r.condition.metric).map(|v| (r.id, *v)))
            .collect();

        let mut fired = Vec::new();
        for (rule_id, value) in candidates {
            fired.extend(self.evaluate_metric(&rule_id, value, None).await);
        }
        fired
    }

    /// Move an active alert to history
    pub async fn resolve_alert(&self, alert_id: &str) -> AppResult<Alert> {
        let alert = {
            let mut state = self.state.lock().await;
            let mut alert = state
                .active
                .shift_remove(alert_id)
                .ok_or_else(|| AppError::AlertNotFound(alert_id.to_string()))?;
            alert.resolved = true;
            alert.resolved_at = Some(unix_millis());
            state.push_history(alert.clone(), self.config.history_size);
            alert
        };

        tracing::info!(
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            component = ?alert.component,
            "Alert resolved"
        );
        self.events
            .publish(OrchestrationEvent::AlertResolved(alert.clone()));
        Ok(alert)
    }

    async fn resolve_matching<F>(&self, predicate: F, now: u64) -> Vec<Alert>
    where
        F: Fn(&Alert) -> bool,
    {
        let resolved: Vec<Alert> = {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state
                .active
                .values()
                .filter(|a| predicate(a))
                .map(|a| a.id.clone())
                .collect();
            let mut resolved = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(mut alert) = state.active.shift_remove(&id) {
                    alert.resolved = true;
                    alert.resolved_at = Some(now);
                    state.push_history(alert.clone(), self.config.history_size);
                    resolved.push(alert);
                }
            }
            resolved
        };

        for alert in &resolved {
            tracing::info!(
                alert_id = %alert.id,
                rule_id = %alert.rule_id,
                component = ?alert.component,
                "Alert auto-resolved after recovery"
            );
            self.events
                .publish(OrchestrationEvent::AlertResolved(alert.clone()));
        }
        resolved
    }

    pub async fn get_active_alerts(&self) -> Vec<Alert> {
        self.state.lock().await.active.values().cloned().collect()
    }

    /// Resolved alerts, newest first
    pub async fn get_alert_history(&self, limit: Option<usize>) -> Vec<Alert> {
        let state = self.state.lock().await;
        state
            .history
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub async fn get_statistics(&self) -> AlertStatistics {
        let state = self.state.lock().await;
        let mut active_by_level = BTreeMap::new();
        for alert in state.active.values() {
            *active_by_level
                .entry(alert.level.as_str().to_string())
                .or_insert(0) += 1;
        }
        AlertStatistics {
            active_alerts: state.active.len(),
            history_size: state.history.len(),
            active_by_level,
            total_rules: state.rules.len(),
            enabled_rules: state.rules.values().filter(|r| r.enabled).count(),
        }
    }

    /// Drop history entries older than the retention period
    pub async fn cleanup_at(&self, now: u64) -> usize {
        let cutoff = now.saturating_sub(self.config.history_retention_ms());
        let mut state = self.state.lock().await;
        let before = state.history.len();
        state
            .history
            .retain(|a| a.resolved_at.unwrap_or(a.timestamp) >= cutoff);
        before - state.history.len()
    }

    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            tracing::info!("Alerting disabled");
            return;
        }
        let abort = spawn_periodic(
            "alert_cleanup",
            self.config.cleanup_interval(),
            Arc::clone(self),
            |service| async move {
                let removed = service.cleanup_at(unix_millis()).await;
                if removed > 0 {
                    tracing::debug!(removed, "Pruned alert history");
                }
            },
        );
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(abort);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Deliver actions in order on a background task; a failing action
    /// never stops the rest
    fn dispatch_actions(&self, alert: &Alert, actions: Vec<AlertAction>) {
        if actions.is_empty() {
            return;
        }
        let http = self.http.clone();
        let alert = alert.clone();
        tokio::spawn(async move {
            for action in &actions {
                if let Err(e) = run_action(&http, &alert, action).await {
                    tracing::warn!(
                        alert_id = %alert.id,
                        rule_id = %alert.rule_id,
                        action = action.kind(),
                        error = %e,
                        "Alert action failed"
                    );
                }
            }
        });
    }
}

async fn run_action(http: &reqwest::Client, alert: &Alert, action: &AlertAction) -> AppResult<()> {
    match action {
        AlertAction::Log => {
            log_alert(alert);
            Ok(())
        }
        AlertAction::Webhook { url, headers } => {
            let mut request = http.post(url).json(alert);
            for (name, value) in headers {
                request = request.header(name, value);
            }
            send(request, url).await
        }
        AlertAction::Slack {
            webhook_url,
            channel,
        } => {
            let mut payload = serde_json::json!({
                "text": format!(
                    "[{}] {}: {}",
                    alert.level.as_str().to_uppercase(),
                    alert.rule_name,
                    alert.message
                ),
            });
            if let Some(channel) = channel {
                payload["channel"] = serde_json::Value::String(channel.clone());
            }
            send(http.post(webhook_url).json(&payload), webhook_url).await
        }
        AlertAction::Email { recipients } => {
            // No mail transport at this layer
            tracing::info!(
                alert_id = %alert.id,
                recipients = ?recipients,
                message = %alert.message,
                "Email alert not sent: no mail transport configured"
            );
            Ok(())
        }
    }
}

async fn send(request: reqwest::RequestBuilder, url: &str) -> AppResult<()> {
    let response = request
        .timeout(ACTION_TIMEOUT)
        .send()
        .await
        .map_err(|e| AppError::Backend(format!("alert delivery to {} failed: {}", url, e)))?;
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Backend(format!(
            "alert delivery to {} returned {}",
            url, status
        )));
    }
    tracing::debug!(url = %url, status = %status, "Alert delivered");
    Ok(())
}

fn log_alert(alert: &Alert) {
    match alert.level {
        AlertLevel::Info => tracing::info!(
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            component = ?alert.component,
            "ALERT: {}", alert.message
        ),
        AlertLevel::Warning => tracing::warn!(
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            component = ?alert.component,
            "ALERT: {}", alert.message
        ),
        AlertLevel::Error | AlertLevel::Critical => tracing::error!(
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            level = %alert.level,
            component = ?alert.component,
            "ALERT: {}", alert.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(config: AlertingConfig) -> AlertingService {
        AlertingService::new(config, EventBus::default())
    }

    fn trigger(component: &str) -> AlertTrigger {
        AlertTrigger::new(Some(component.to_string()), "down")
    }

    #[tokio::test]
    async fn test_builtin_rules_use_configured_thresholds() {
        let config = AlertingConfig {
            slow_response_threshold_ms: 1234,
            error_rate_threshold: 0.25,
            ..AlertingConfig::default()
        };
        let service = service(config);
        let slow = service.get_rule(RULE_SLOW_RESPONSE).await.expect("built-in");
        assert_eq!(slow.condition.threshold, 1234.0);
        let errors = service.get_rule(RULE_HIGH_ERROR_RATE).await.expect("built-in");
        assert_eq!(errors.condition.threshold, 0.25);
        assert_eq!(service.get_rules().await.len(), 4);
    }

    #[tokio::test]
    async fn test_dedup_and_cooldown() {
        let service = service(AlertingConfig::default());
        let t = 10_000_000;

        let first = service
            .trigger_rule_at(RULE_COMPONENT_UNHEALTHY, trigger("wrapper:a"), t)
            .await;
        assert!(first.is_some());

        // Within cooldown
        assert!(
            service
                .trigger_rule_at(RULE_COMPONENT_UNHEALTHY, trigger("wrapper:a"), t + 1000)
                .await
                .is_none()
        );
        // After cooldown, still deduplicated while the first is live
        let after_cooldown = t + DEFAULT_COOLDOWN_MS + 1;
        assert!(
            service
                .trigger_rule_at(RULE_COMPONENT_UNHEALTHY, trigger("wrapper:a"), after_cooldown)
                .await
                .is_none()
        );
        assert_eq!(service.get_active_alerts().await.len(), 1);

        service
            .resolve_alert(&first.expect("fired").id)
            .await
            .expect("resolves");
        let second = service
            .trigger_rule_at(RULE_COMPONENT_UNHEALTHY, trigger("wrapper:a"), after_cooldown)
            .await;
        assert!(second.is_some());
        assert_eq!(service.get_active_alerts().await.len(), 1);
        assert_eq!(service.get_alert_history(None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let config = AlertingConfig {
            max_active_alerts: 1,
            ..AlertingConfig::default()
        };
        let service = service(config);
        assert!(
            service
                .trigger_rule_at(RULE_SYSTEM_DEGRADED, AlertTrigger::new(None, "x"), 1)
                .await
                .is_some()
        );
        assert!(
            service
                .trigger_rule_at(RULE_COMPONENT_UNHEALTHY, trigger("pool:p"), 1)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_disabled_and_unknown_rules_never_fire() {
        let service = service(AlertingConfig::default());
        let mut rule = service.get_rule(RULE_SYSTEM_DEGRADED).await.expect("built-in");
        rule.enabled = false;
        service.add_rule(rule).await.expect("valid");

        assert!(
            service
                .trigger_rule_at(RULE_SYSTEM_DEGRADED, AlertTrigger::new(None, "x"), 1)
                .await
                .is_none()
        );
        assert!(
            service
                .trigger_rule_at("nope", AlertTrigger::new(None, "x"), 1)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_resolve_unknown_alert() {
        let service = service(AlertingConfig::default());
        assert!(matches!(
            service.resolve_alert("missing").await,
            Err(AppError::AlertNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_evaluate_metric_respects_operator() {
        let service = service(AlertingConfig::default());
        assert!(
            service
                .evaluate_metric(RULE_HIGH_ERROR_RATE, 0.05, Some("wrapper:a"))
                .await
                .is_none()
        );
        let alert = service
            .evaluate_metric(RULE_HIGH_ERROR_RATE, 0.5, Some("wrapper:a"))
            .await
            .expect("fires above threshold");
        assert_eq!(alert.level, AlertLevel::Warning);
        assert!(alert.message.contains("error_rate"));
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_pruned() {
        let config = AlertingConfig {
            history_size: 2,
            history_retention_seconds: 10,
            ..AlertingConfig::default()
        };
        let service = service(config);
        for i in 0..3 {
            let alert = service
                .trigger_rule_at(RULE_COMPONENT_UNHEALTHY, trigger(&format!("wrapper:{i}")), 1)
                .await
                .expect("fires");
            service.resolve_alert(&alert.id).await.expect("resolves");
            // Cooldown is per rule; clear it so the next component can fire
            let mut rule = service.get_rule(RULE_COMPONENT_UNHEALTHY).await.expect("rule");
            rule.last_triggered = None;
            service.add_rule(rule).await.expect("valid");
        }
        assert_eq!(service.get_alert_history(None).await.len(), 2);

        let removed = service.cleanup_at(unix_millis() + 60_000).await;
        assert_eq!(removed, 2);
        assert!(service.get_alert_history(None).await.is_empty());
    }

    #[test]
    fn test_rule_validation() {
        let mut rule = default_rules(&AlertingConfig::default()).remove(0);
        assert!(rule.validate().is_ok());
        rule.actions.push(AlertAction::Webhook {
            url: "ftp://nope".to_string(),
            headers: BTreeMap::new(),
        });
        let message = rule.validate().expect_err("ftp url").to_string();
        assert!(message.starts_with("Configuration error: alert rule"));
        assert_eq!(message.matches("Configuration error").count(), 1);
    }

    #[test]
    fn test_operators() {
        assert!(ComparisonOperator::Gt.evaluate(2.0, 1.0));
        assert!(!ComparisonOperator::Gt.evaluate(1.0, 1.0));
        assert!(ComparisonOperator::Gte.evaluate(1.0, 1.0));
        assert!(ComparisonOperator::Lt.evaluate(0.5, 1.0));
        assert!(ComparisonOperator::Lte.evaluate(1.0, 1.0));
        assert!(ComparisonOperator::Eq.evaluate(1.0, 1.0));
        assert!(ComparisonOperator::Ne.evaluate(1.0, 2.0));
    }
}
