//! Integration tests for alert delivery and health-driven alerting

use std::collections::BTreeMap;
use std::time::Duration;
use tiergate::alerting::{
    AlertAction, AlertCondition, AlertLevel, AlertRule, AlertTrigger, AlertType, AlertingService,
    RULE_COMPONENT_UNHEALTHY, RULE_SYSTEM_DEGRADED,
};
use tiergate::config::AlertingConfig;
use tiergate::events::{EventBus, OrchestrationEvent};
use tiergate::health::{ComponentKind, GlobalHealth, HealthCheckResult, HealthStatus};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rule(id: &str, actions: Vec<AlertAction>) -> AlertRule {
    AlertRule {
        id: id.to_string(),
        name: "Queue backlog".to_string(),
        alert_type: AlertType::Custom,
        level: AlertLevel::Critical,
        enabled: true,
        condition: AlertCondition {
            metric: "queue_depth".to_string(),
            threshold: 100.0,
            ..AlertCondition::default()
        },
        actions,
        cooldown_ms: 60_000,
        last_triggered: None,
    }
}

/// Actions are delivered in the background; wait until `expected` arrived
async fn wait_for_requests(server: &MockServer, expected: usize) -> Vec<String> {
    for _ in 0..200 {
        let received = server.received_requests().await.unwrap_or_default();
        if received.len() >= expected {
            return received.iter().map(|r| r.url.path().to_string()).collect();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} delivered actions", expected);
}

fn component(name: &str, status: HealthStatus, response_time_ms: u64) -> HealthCheckResult {
    HealthCheckResult {
        component: name.to_string(),
        kind: ComponentKind::Pool,
        status,
        message: format!("pool is {}", status),
        response_time_ms,
        last_checked: 1_000,
        consecutive_failures: if status == HealthStatus::Unhealthy { 3 } else { 0 },
        consecutive_successes: if status == HealthStatus::Healthy { 2 } else { 0 },
        details: serde_json::Value::Null,
    }
}

fn snapshot(status: HealthStatus, components: Vec<HealthCheckResult>) -> GlobalHealth {
    GlobalHealth {
        status,
        components,
        timestamp: 1_000,
    }
}

#[tokio::test]
async fn test_webhook_receives_alert_json_with_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("x-alert-token", "secret"))
        .and(body_partial_json(serde_json::json!({
            "rule_id": "queue-backlog",
            "level": "critical",
            "message": "queue_depth is 150",
            "resolved": false,
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut headers = BTreeMap::new();
    headers.insert("x-alert-token".to_string(), "secret".to_string());
    let alerting = AlertingService::new(AlertingConfig::default(), EventBus::default());
    alerting
        .add_rule(rule(
            "queue-backlog",
            vec![AlertAction::Webhook {
                url: format!("{}/hook", server.uri()),
                headers,
            }],
        ))
        .await
        .unwrap();

    let alert = alerting
        .trigger_rule("queue-backlog", AlertTrigger::new(None, "queue_depth is 150"))
        .await
        .expect("rule fires");
    assert_eq!(alert.level, AlertLevel::Critical);
    wait_for_requests(&server, 1).await;
}

#[tokio::test]
async fn test_slack_payload_has_level_prefix_and_channel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .and(body_partial_json(serde_json::json!({
            "text": "[CRITICAL] Queue backlog: backlog growing",
            "channel": "#ops",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let alerting = AlertingService::new(AlertingConfig::default(), EventBus::default());
    alerting
        .add_rule(rule(
            "queue-backlog",
            vec![AlertAction::Slack {
                webhook_url: format!("{}/slack", server.uri()),
                channel: Some("#ops".to_string()),
            }],
        ))
        .await
        .unwrap();

    assert!(
        alerting
            .trigger_rule("queue-backlog", AlertTrigger::new(None, "backlog growing"))
            .await
            .is_some()
    );
    wait_for_requests(&server, 1).await;
}

#[tokio::test]
async fn test_failing_action_does_not_block_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/working"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let events = EventBus::default();
    let mut subscription = events.subscribe();
    let alerting = AlertingService::new(AlertingConfig::default(), events);
    alerting
        .add_rule(rule(
            "queue-backlog",
            vec![
                AlertAction::Webhook {
                    url: format!("{}/broken", server.uri()),
                    headers: BTreeMap::new(),
                },
                AlertAction::Email {
                    recipients: vec!["ops@example.com".to_string()],
                },
                AlertAction::Webhook {
                    url: format!("{}/working", server.uri()),
                    headers: BTreeMap::new(),
                },
            ],
        ))
        .await
        .unwrap();

    let alert = alerting
        .trigger_rule("queue-backlog", AlertTrigger::new(None, "backlog"))
        .await
        .expect("alert is still created");

    assert_eq!(alerting.get_active_alerts().await, vec![alert.clone()]);
    match subscription.try_recv() {
        Some(OrchestrationEvent::Alert(published)) => assert_eq!(published.id, alert.id),
        other => panic!("expected an alert event, got {:?}", other),
    }
    assert_eq!(wait_for_requests(&server, 2).await, ["/broken", "/working"]);
}

#[tokio::test]
async fn test_slow_webhook_does_not_delay_the_alert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let alerting = AlertingService::new(AlertingConfig::default(), EventBus::default());
    alerting
        .add_rule(rule(
            "queue-backlog",
            vec![AlertAction::Webhook {
                url: format!("{}/slow", server.uri()),
                headers: BTreeMap::new(),
            }],
        ))
        .await
        .unwrap();

    let alert = tokio::time::timeout(
        Duration::from_secs(1),
        alerting.trigger_rule("queue-backlog", AlertTrigger::new(None, "backlog")),
    )
    .await
    .expect("alert is raised without waiting for delivery");
    assert!(alert.is_some());
    assert_eq!(alerting.get_active_alerts().await.len(), 1);
}

#[tokio::test]
async fn test_invalid_action_urls_are_rejected() {
    let alerting = AlertingService::new(AlertingConfig::default(), EventBus::default());
    let result = alerting
        .add_rule(rule(
            "bad",
            vec![AlertAction::Webhook {
                url: "ftp://example.com".to_string(),
                headers: BTreeMap::new(),
            }],
        ))
        .await;
    assert!(result.is_err());
    assert!(alerting.get_rule("bad").await.is_none());
}

#[tokio::test]
async fn test_add_rules_is_all_or_nothing() {
    let alerting = AlertingService::new(AlertingConfig::default(), EventBus::default());
    let mut invalid = rule("broken", Vec::new());
    invalid.name = " ".to_string();

    let result = alerting
        .add_rules(vec![rule("queue-backlog", Vec::new()), invalid])
        .await;

    assert!(result.is_err());
    assert!(alerting.get_rule("queue-backlog").await.is_none());
    assert_eq!(
        alerting
            .add_rules(vec![rule("queue-backlog", Vec::new())])
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_unhealthy_snapshot_raises_one_alert_per_component() {
    let alerting = AlertingService::new(AlertingConfig::default(), EventBus::default());
    let down = snapshot(
        HealthStatus::Unhealthy,
        vec![
            component("gpu", HealthStatus::Unhealthy, 10),
            component("cpu", HealthStatus::Healthy, 10),
        ],
    );

    let fired = alerting.process_health_check_at(&down, 1_000).await;
    let rules: Vec<&str> = fired.iter().map(|a| a.rule_id.as_str()).collect();
    assert_eq!(rules, [RULE_SYSTEM_DEGRADED, RULE_COMPONENT_UNHEALTHY]);
    assert_eq!(fired[1].component.as_deref(), Some("pool:gpu"));

    // Same failure on the next cycle: no duplicates
    let again = alerting.process_health_check_at(&down, 2_000).await;
    assert!(again.is_empty());
    assert_eq!(alerting.get_active_alerts().await.len(), 2);
}

#[tokio::test]
async fn test_recovery_auto_resolves_alerts() {
    let events = EventBus::default();
    let mut subscription = events.subscribe();
    let alerting = AlertingService::new(AlertingConfig::default(), events);

    let down = snapshot(
        HealthStatus::Unhealthy,
        vec![component("gpu", HealthStatus::Unhealthy, 10)],
    );
    alerting.process_health_check_at(&down, 1_000).await;

    let up = snapshot(
        HealthStatus::Healthy,
        vec![component("gpu", HealthStatus::Healthy, 10)],
    );
    let fired = alerting.process_health_check_at(&up, 2_000).await;
    assert!(fired.is_empty());
    assert!(alerting.get_active_alerts().await.is_empty());

    let history = alerting.get_alert_history(None).await;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|a| a.resolved && a.resolved_at == Some(2_000)));

    let mut resolved = 0;
    while let Some(event) = subscription.try_recv() {
        if matches!(event, OrchestrationEvent::AlertResolved(_)) {
            resolved += 1;
        }
    }
    assert_eq!(resolved, 2);
}

#[tokio::test]
async fn test_slow_component_raises_slow_response() {
    let config = AlertingConfig {
        slow_response_threshold_ms: 100,
        ..AlertingConfig::default()
    };
    let alerting = AlertingService::new(config, EventBus::default());
    let slow = snapshot(
        HealthStatus::Degraded,
        vec![component("gpu", HealthStatus::Degraded, 250)],
    );

    let fired = alerting.process_health_check_at(&slow, 1_000).await;
    assert!(fired.iter().any(|a| a.rule_id == "slow-response"));
}

#[tokio::test]
async fn test_disabled_alerting_ignores_snapshots() {
    let config = AlertingConfig {
        enabled: false,
        ..AlertingConfig::default()
    };
    let alerting = AlertingService::new(config, EventBus::default());
    let down = snapshot(
        HealthStatus::Unhealthy,
        vec![component("gpu", HealthStatus::Unhealthy, 10)],
    );

    assert!(alerting.process_health_check_at(&down, 1_000).await.is_empty());
    assert!(alerting.get_active_alerts().await.is_empty());
}
