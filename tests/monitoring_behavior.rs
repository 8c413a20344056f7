//! Behavior tests for performance monitoring: alerting, deduplication, and
//! the aggregate health report.

use std::collections::HashMap;
use std::time::Duration;

use tickermux_tests::ScriptedClient;

use tickermux_core::{
    AlertMetric, AlertSeverity, BatchPolicy, DataType, Gateway, HealthStatus, MonitorConfig,
    ProviderId, ProviderPolicy, QueryParams, SourceError,
};

fn policy(source: ProviderId) -> ProviderPolicy {
    ProviderPolicy {
        batch: BatchPolicy::disabled(),
        ..ProviderPolicy::default_for(source)
    }
}

#[tokio::test]
async fn repeated_failures_raise_exactly_one_alert_per_source() {
    // Given: a source that fails every call
    let yahoo = ScriptedClient::failing(ProviderId::Yahoo, SourceError::unavailable("down"));
    let gateway = Gateway::builder()
        .with_client(yahoo)
        .with_policy(policy(ProviderId::Yahoo))
        .without_background_tasks()
        .build();

    // When: several queries fail inside the dedup window
    for ticker in ["AAPL", "MSFT", "NVDA"] {
        let _ = gateway
            .query(ProviderId::Yahoo, DataType::Quote, QueryParams::ticker(ticker))
            .await;
    }

    // Then: one high-severity request_failure alert is active
    let alerts = gateway.monitor().active_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metric, AlertMetric::RequestFailure);
    assert_eq!(alerts[0].severity, AlertSeverity::High);
    assert_eq!(alerts[0].source, ProviderId::Yahoo);
}

#[tokio::test]
async fn slow_successes_raise_a_latency_alert() {
    // Given: a healthy but slow source against a 20ms latency ceiling
    let fmp = ScriptedClient::succeeding(ProviderId::Fmp).with_delay(Duration::from_millis(60));
    let gateway = Gateway::builder()
        .with_client(fmp)
        .with_policy(policy(ProviderId::Fmp))
        .with_monitor_config(MonitorConfig {
            latency_ceiling: Duration::from_millis(20),
            ..MonitorConfig::default()
        })
        .without_background_tasks()
        .build();

    // When: the slow query succeeds
    gateway
        .query(ProviderId::Fmp, DataType::Quote, QueryParams::ticker("AAPL"))
        .await
        .expect("slow call still succeeds");

    // Then: a medium-severity latency alert is active alongside the success
    let metrics = gateway.monitor().metrics();
    assert_eq!(metrics.successes, 1);
    assert_eq!(metrics.active_alerts.len(), 1);
    assert_eq!(metrics.active_alerts[0].metric, AlertMetric::Latency);
    assert_eq!(metrics.active_alerts[0].severity, AlertSeverity::Medium);
}

#[tokio::test]
async fn metrics_break_down_outcomes_per_source() {
    // Given: one healthy and one failing source
    let fmp = ScriptedClient::succeeding(ProviderId::Fmp);
    let yahoo = ScriptedClient::failing(ProviderId::Yahoo, SourceError::unavailable("down"));
    let gateway = Gateway::builder()
        .with_client(fmp)
        .with_client(yahoo)
        .with_policy(policy(ProviderId::Fmp))
        .with_policy(policy(ProviderId::Yahoo))
        .without_background_tasks()
        .build();

    // When: traffic hits both
    for ticker in ["AAPL", "MSFT"] {
        gateway
            .query(ProviderId::Fmp, DataType::Quote, QueryParams::ticker(ticker))
            .await
            .expect("fmp succeeds");
    }
    let _ = gateway
        .query(ProviderId::Yahoo, DataType::Quote, QueryParams::ticker("AAPL"))
        .await;

    // Then: the per-source breakdown separates the two
    let metrics = gateway.monitor().metrics();
    assert_eq!(metrics.total_requests, 3);
    assert!((metrics.success_rate - 2.0 / 3.0).abs() < 1e-9);

    let fmp_metrics = metrics
        .by_source
        .iter()
        .find(|m| m.source == ProviderId::Fmp)
        .expect("fmp breakdown present");
    assert_eq!(fmp_metrics.requests, 2);
    assert!((fmp_metrics.uptime - 1.0).abs() < 1e-9);
    assert!(fmp_metrics.last_error.is_none());

    let yahoo_metrics = metrics
        .by_source
        .iter()
        .find(|m| m.source == ProviderId::Yahoo)
        .expect("yahoo breakdown present");
    assert!((yahoo_metrics.error_rate - 1.0).abs() < 1e-9);
    assert!(yahoo_metrics.last_error.is_some());
}

#[tokio::test]
async fn health_report_is_healthy_under_clean_traffic() {
    // Given: a gateway with clean traffic and warm cache
    let fmp = ScriptedClient::succeeding(ProviderId::Fmp);
    let gateway = Gateway::builder()
        .with_client(fmp)
        .with_policy(policy(ProviderId::Fmp))
        .without_background_tasks()
        .build();
    let params = QueryParams::ticker("AAPL");
    gateway
        .query(ProviderId::Fmp, DataType::Quote, params.clone())
        .await
        .expect("first call succeeds");
    gateway
        .query(ProviderId::Fmp, DataType::Quote, params)
        .await
        .expect("cached call succeeds");

    // When: the report is assembled from live gateway state
    let provider_health: HashMap<ProviderId, bool> = gateway
        .health_status()
        .into_iter()
        .map(|(source, record)| (source, record.healthy))
        .collect();
    let cache_stats = gateway.cache().stats().await;
    let report = gateway.monitor().health_report(&provider_health, &cache_stats);

    // Then: every named check passes
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.checks.iter().all(|check| check.passed));
    let names: Vec<&str> = report.checks.iter().map(|check| check.name).collect();
    assert_eq!(
        names,
        vec!["success_rate", "p95_latency", "provider_health", "cache_hit_rate"]
    );
}

#[tokio::test]
async fn health_report_degrades_when_a_provider_stays_down() {
    // Given: sustained failures from the only registered source
    let yahoo = ScriptedClient::failing(ProviderId::Yahoo, SourceError::unavailable("down"));
    let gateway = Gateway::builder()
        .with_client(yahoo)
        .with_policy(policy(ProviderId::Yahoo))
        .without_background_tasks()
        .build();
    for ticker in ["AAPL", "MSFT", "NVDA"] {
        let _ = gateway
            .query(ProviderId::Yahoo, DataType::Quote, QueryParams::ticker(ticker))
            .await;
    }

    // When: the report is assembled
    let provider_health: HashMap<ProviderId, bool> = gateway
        .health_status()
        .into_iter()
        .map(|(source, record)| (source, record.healthy))
        .collect();
    let cache_stats = gateway.cache().stats().await;
    let report = gateway.monitor().health_report(&provider_health, &cache_stats);

    // Then: the verdict is no longer healthy and the failing checks are named
    assert_ne!(report.status, HealthStatus::Healthy);
    assert!(report
        .checks
        .iter()
        .any(|check| check.name == "success_rate" && !check.passed));
    assert!(report
        .checks
        .iter()
        .any(|check| check.name == "provider_health" && !check.passed));
}

#[tokio::test]
async fn resolved_alerts_leave_the_active_list() {
    // Given: an active failure alert
    let yahoo = ScriptedClient::failing(ProviderId::Yahoo, SourceError::unavailable("down"));
    let gateway = Gateway::builder()
        .with_client(yahoo)
        .with_policy(policy(ProviderId::Yahoo))
        .without_background_tasks()
        .build();
    let _ = gateway
        .query(ProviderId::Yahoo, DataType::Quote, QueryParams::ticker("AAPL"))
        .await;
    let alert_id = gateway.monitor().active_alerts()[0].id;

    // When: an operator resolves it
    assert!(gateway.monitor().resolve_alert(alert_id));

    // Then: the active list is empty
    assert!(gateway.monitor().active_alerts().is_empty());
}
