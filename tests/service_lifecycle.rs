//! Integration tests for the orchestration service facade

mod common;

use common::{FakeClient, FakePoolManager, FakeTaskGroup, FakeTaskGroupManager, deps, quick};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tiergate::backend::{CompletionRequest, PoolHealth};
use tiergate::config::Config;
use tiergate::error::AppError;
use tiergate::events::OrchestrationEvent;
use tiergate::service::{
    OrchestrationService, SERIES_REQUESTS_ERROR, SERIES_REQUESTS_SUCCESS,
    SERIES_REQUESTS_TOTAL, SERIES_STREAMS_OPENED, ServiceHealth,
};
use tiergate::wrapper::{WrapperConfig, WrapperType};

fn pools() -> Arc<FakePoolManager> {
    Arc::new(
        FakePoolManager::new()
            .with_pool("gpu", Arc::new(FakeClient::new("gpu-model", "from gpu")), 2)
            .with_pool("cpu", Arc::new(FakeClient::new("cpu-model", "from cpu")), 2),
    )
}

fn groups() -> Arc<FakeTaskGroupManager> {
    Arc::new(
        FakeTaskGroupManager::new().with_group(Arc::new(FakeTaskGroup::new(
            "reasoning",
            &[("premium", 1), ("standard", 2)],
        ))),
    )
}

fn base_config(wrappers: Vec<WrapperConfig>) -> Config {
    let mut config = Config::default();
    config.health.interval_seconds = 0;
    config.health.healthy_threshold = 1;
    config.health.unhealthy_threshold = 1;
    config.wrappers = wrappers;
    config
}

async fn started(
    config: Config,
    pools: Arc<FakePoolManager>,
) -> Arc<OrchestrationService> {
    let service = Arc::new(OrchestrationService::new(config, deps(pools, groups())).unwrap());
    service.initialize().await.unwrap();
    service
}

async fn series_count(service: &OrchestrationService, name: &str) -> usize {
    service
        .get_metrics(Some(name), None)
        .await
        .series
        .first()
        .map_or(0, |s| s.count)
}

#[tokio::test]
async fn test_initialize_creates_configured_wrappers() {
    let service = started(
        base_config(vec![
            quick(WrapperConfig::pool("pool", "gpu")),
            quick(WrapperConfig::task_group("group", "reasoning", None)),
            quick(WrapperConfig::pool("broken", "missing")),
        ]),
        pools(),
    )
    .await;

    assert!(service.is_initialized());
    assert_eq!(service.factory().wrapper_names().await, vec!["pool", "group"]);

    let status = service.get_service_status().await;
    assert!(status.initialized);
    assert_eq!(status.components.len(), 2);
    assert_eq!(status.components[1].wrapper_type, WrapperType::TaskGroup);
    assert_eq!(status.health.status, ServiceHealth::Unknown);
}

#[tokio::test]
async fn test_initialize_publishes_event() {
    let service = Arc::new(
        OrchestrationService::new(base_config(Vec::new()), deps(pools(), groups())).unwrap(),
    );
    let mut events = service.subscribe();

    service.initialize().await.unwrap();

    let mut saw_initialized = false;
    while let Some(event) = events.try_recv() {
        saw_initialized |= matches!(event, OrchestrationEvent::Initialized);
    }
    assert!(saw_initialized);
}

#[tokio::test]
async fn test_execute_request_records_outcome() {
    let service = started(
        base_config(vec![quick(WrapperConfig::pool("pool", "gpu"))]),
        pools(),
    )
    .await;

    let routed = service
        .execute_request(&CompletionRequest::new("hi"), None)
        .await
        .unwrap();
    assert_eq!(routed.wrapper_name, "pool");
    assert_eq!(routed.response.content, "from gpu");

    assert_eq!(series_count(&service, SERIES_REQUESTS_TOTAL).await, 1);
    assert_eq!(series_count(&service, SERIES_REQUESTS_SUCCESS).await, 1);
    assert_eq!(series_count(&service, SERIES_REQUESTS_ERROR).await, 0);

    let exposition = service.prometheus().gather().unwrap();
    assert!(exposition.lines().any(|line| {
        line.starts_with("tiergate_requests_total{")
            && line.contains(r#"wrapper="pool""#)
            && line.contains(r#"outcome="success""#)
            && line.ends_with(" 1")
    }));
}

#[tokio::test]
async fn test_failed_request_records_error_with_wrapper_name() {
    let pools = Arc::new(FakePoolManager::new().with_pool(
        "gpu",
        Arc::new(FakeClient::failing("gpu-model")),
        2,
    ));
    let service = started(
        base_config(vec![quick(WrapperConfig::pool("pool", "gpu"))]),
        pools,
    )
    .await;

    let err = service
        .execute_request(&CompletionRequest::new("hi"), None)
        .await
        .expect_err("backend is down");
    assert!(matches!(err, AppError::WrapperExecution { .. }));

    let errors = service
        .collector()
        .get_series(SERIES_REQUESTS_ERROR)
        .await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].tags.get("wrapper").map(String::as_str), Some("pool"));
    assert_eq!(
        errors[0].tags.get("error_type").map(String::as_str),
        Some("wrapper_execution")
    );
}

#[tokio::test]
async fn test_stream_request_records_open() {
    let service = started(
        base_config(vec![quick(WrapperConfig::pool("pool", "gpu"))]),
        pools(),
    )
    .await;

    let routed = service
        .execute_stream_request(&CompletionRequest::new("hi"), Some("pool"))
        .await
        .unwrap();
    let chunks: Vec<_> = routed.stream.collect().await;

    assert_eq!(chunks.len(), 1);
    assert_eq!(series_count(&service, SERIES_STREAMS_OPENED).await, 1);
    assert_eq!(series_count(&service, SERIES_REQUESTS_TOTAL).await, 0);
}

#[tokio::test]
async fn test_health_cycle_feeds_alerting_and_gauges() {
    let pools = pools();
    let service = started(
        base_config(vec![quick(WrapperConfig::pool("pool", "gpu"))]),
        Arc::clone(&pools),
    )
    .await;

    pools.set_health(
        "gpu",
        PoolHealth {
            healthy: false,
            healthy_instances: 0,
            total_instances: 2,
            errors: vec!["down".to_string()],
        },
    );
    service.health_checker().check_all().await;

    let report = service.get_health_status().await;
    assert_eq!(report.status, ServiceHealth::Unhealthy);
    assert!(report.timestamp.is_some());

    // The forwarder processes the snapshot asynchronously
    let mut active = Vec::new();
    for _ in 0..100 {
        active = service.alerting().get_active_alerts().await;
        if !active.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(
        active
            .iter()
            .any(|a| a.component.as_deref() == Some("pool:gpu"))
    );

    let exposition = service.prometheus().gather().unwrap();
    assert!(exposition.contains(r#"tiergate_component_health{component="gpu",kind="pool"} 2"#));

    // Alert events come back through the same forwarder
    let mut counted = false;
    for _ in 0..100 {
        counted = service
            .prometheus()
            .gather()
            .unwrap()
            .contains(r#"tiergate_alerts_total{level="error"}"#);
        if counted {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(counted);

    let resolved = service.resolve_alert(&active[0].id).await.unwrap();
    assert!(resolved.resolved);
    assert!(matches!(
        service.resolve_alert(&active[0].id).await,
        Err(AppError::AlertNotFound(_))
    ));
}

#[tokio::test]
async fn test_health_snapshot_reaches_alerting_when_bus_is_flooded() {
    let pools = pools();
    let service = started(
        base_config(vec![quick(WrapperConfig::pool("pool", "gpu"))]),
        Arc::clone(&pools),
    )
    .await;

    pools.set_health(
        "gpu",
        PoolHealth {
            healthy: false,
            healthy_instances: 0,
            total_instances: 2,
            errors: vec!["down".to_string()],
        },
    );
    service.health_checker().check_all().await;
    // Far more events than the bus buffers, before the forwarder gets to run
    for _ in 0..5_000 {
        service
            .events()
            .publish(OrchestrationEvent::ConfigurationReloaded);
    }

    let mut raised = false;
    for _ in 0..100 {
        raised = service
            .alerting()
            .get_active_alerts()
            .await
            .iter()
            .any(|a| a.component.as_deref() == Some("pool:gpu"));
        if raised {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(raised);
}

#[tokio::test]
async fn test_apply_configuration_diffs_wrappers() {
    let service = started(
        base_config(vec![
            quick(WrapperConfig::pool("keep", "gpu")),
            quick(WrapperConfig::pool("tune", "gpu")),
            quick(WrapperConfig::pool("move", "gpu")),
            quick(WrapperConfig::pool("drop", "gpu")),
        ]),
        pools(),
    )
    .await;
    let mut events = service.subscribe();

    let mut tuned = quick(WrapperConfig::pool("tune", "gpu"));
    tuned.timeout_ms = 9_000;
    let next = base_config(vec![
        quick(WrapperConfig::pool("keep", "gpu")),
        tuned,
        quick(WrapperConfig::pool("move", "cpu")),
        quick(WrapperConfig::task_group("new", "reasoning", None)),
        quick(WrapperConfig::pool("bad", "missing")),
    ]);

    let summary = service.apply_configuration(next).await.unwrap();

    assert_eq!(summary.removed, vec!["drop"]);
    assert_eq!(summary.updated, vec!["tune"]);
    assert_eq!(summary.recreated, vec!["move"]);
    assert_eq!(summary.added, vec!["new"]);
    assert_eq!(summary.failed, vec!["bad"]);

    let tune = service.factory().get_wrapper("tune").await.unwrap();
    assert_eq!(tune.get_configuration().await.timeout_ms, 9_000);
    let moved = service.factory().get_wrapper("move").await.unwrap();
    let routed = service
        .execute_request(&CompletionRequest::new("hi"), Some("move"))
        .await
        .unwrap();
    assert_eq!(routed.response.content, "from cpu");
    assert_eq!(
        moved.get_configuration().await.custom_settings.pool_name.as_deref(),
        Some("cpu")
    );

    let mut reloaded = false;
    while let Some(event) = events.try_recv() {
        reloaded |= matches!(event, OrchestrationEvent::ConfigurationReloaded);
    }
    assert!(reloaded);
}

#[tokio::test]
async fn test_failed_rebuild_keeps_old_wrapper_serving() {
    let service = started(
        base_config(vec![
            quick(WrapperConfig::pool("first", "gpu")),
            quick(WrapperConfig::pool("main", "gpu")),
        ]),
        pools(),
    )
    .await;

    let next = base_config(vec![
        quick(WrapperConfig::pool("first", "gpu")),
        quick(WrapperConfig::pool("main", "missing")),
    ]);
    let summary = service.apply_configuration(next).await.unwrap();

    assert_eq!(summary.failed, vec!["main"]);
    assert!(summary.recreated.is_empty());
    assert_eq!(service.factory().wrapper_names().await, vec!["first", "main"]);
    let main = service.factory().get_wrapper("main").await.unwrap();
    assert_eq!(
        main.get_configuration().await.custom_settings.pool_name.as_deref(),
        Some("gpu")
    );
    let routed = service
        .execute_request(&CompletionRequest::new("hi"), Some("main"))
        .await
        .unwrap();
    assert_eq!(routed.response.content, "from gpu");
}

#[tokio::test]
async fn test_invalid_alert_rule_aborts_reload_before_wrappers_change() {
    let service = started(
        base_config(vec![quick(WrapperConfig::pool("keep", "gpu"))]),
        pools(),
    )
    .await;

    let mut rule = tiergate::alerting::AlertRule {
        id: "queue-backlog".to_string(),
        name: "Queue backlog".to_string(),
        alert_type: tiergate::alerting::AlertType::Custom,
        level: tiergate::alerting::AlertLevel::Warning,
        enabled: true,
        condition: tiergate::alerting::AlertCondition::default(),
        actions: Vec::new(),
        cooldown_ms: 1_000,
        last_triggered: None,
    };
    rule.condition.threshold = f64::NAN;
    let mut next = base_config(vec![quick(WrapperConfig::pool("other", "cpu"))]);
    next.alerting.rules = vec![rule];

    assert!(service.apply_configuration(next).await.is_err());
    assert_eq!(service.factory().wrapper_names().await, vec!["keep"]);
    assert!(service.alerting().get_rule("queue-backlog").await.is_none());
}

#[tokio::test]
async fn test_invalid_configuration_changes_nothing() {
    let service = started(
        base_config(vec![quick(WrapperConfig::pool("keep", "gpu"))]),
        pools(),
    )
    .await;

    let mut invalid = base_config(Vec::new());
    invalid.observability.log_level = "loud".to_string();

    assert!(service.apply_configuration(invalid).await.is_err());
    assert_eq!(service.factory().wrapper_names().await, vec!["keep"]);
}

#[tokio::test]
async fn test_reload_configuration_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[health]
interval_seconds = 0

[[wrappers]]
name = "pool"
type = "pool"
max_retries = 0

[wrappers.custom_settings]
pool_name = "gpu"
"#
    )
    .unwrap();

    let service = Arc::new(
        OrchestrationService::from_file(file.path(), deps(pools(), groups())).unwrap(),
    );
    service.initialize().await.unwrap();
    assert_eq!(service.factory().wrapper_names().await, vec!["pool"]);

    let contents = r#"
[health]
interval_seconds = 0

[[wrappers]]
name = "group"
type = "task_group"

[wrappers.custom_settings]
group_name = "reasoning"
"#;
    std::fs::write(file.path(), contents).unwrap();

    let summary = service.reload_configuration().await.unwrap();
    assert_eq!(summary.removed, vec!["pool"]);
    assert_eq!(summary.added, vec!["group"]);
    assert_eq!(service.config().await.wrappers[0].name, "group");
}

#[tokio::test]
async fn test_reload_without_file_is_config_error() {
    let service = started(base_config(Vec::new()), pools()).await;
    assert!(matches!(
        service.reload_configuration().await,
        Err(AppError::Config(_))
    ));
}

#[tokio::test]
async fn test_shutdown_closes_everything_once() {
    let service = started(
        base_config(vec![quick(WrapperConfig::pool("pool", "gpu"))]),
        pools(),
    )
    .await;
    let mut events = service.subscribe();

    service.shutdown().await;
    service.shutdown().await;

    assert!(!service.is_initialized());
    assert!(service.factory().is_empty().await);
    assert!(matches!(
        service
            .execute_request(&CompletionRequest::new("hi"), None)
            .await,
        Err(AppError::NotInitialized)
    ));
    assert!(service.initialize().await.is_err());

    let mut shutdowns = 0;
    while let Some(event) = events.try_recv() {
        if matches!(event, OrchestrationEvent::Shutdown) {
            shutdowns += 1;
        }
    }
    assert_eq!(shutdowns, 1);
}
