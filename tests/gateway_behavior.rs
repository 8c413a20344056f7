//! Behavior tests for the gateway dispatch pipeline: caching, rate windows,
//! health gating, and timeout handling.

use std::time::Duration;

use tickermux_tests::ScriptedClient;

use tickermux_core::{
    BatchPolicy, DataType, Gateway, GatewayErrorKind, ProviderId, ProviderPolicy, QueryParams,
    SourceError,
};

fn policy(source: ProviderId) -> ProviderPolicy {
    ProviderPolicy {
        batch: BatchPolicy::disabled(),
        ..ProviderPolicy::default_for(source)
    }
}

#[tokio::test]
async fn cached_payloads_round_trip_until_their_ttl_expires() {
    // Given: an FMP client whose answers stay fresh for 30ms
    let client = ScriptedClient::succeeding(ProviderId::Fmp);
    let gateway = Gateway::builder()
        .with_client(client.clone())
        .with_policy(ProviderPolicy {
            ttl_ceiling: Some(Duration::from_millis(30)),
            ..policy(ProviderId::Fmp)
        })
        .without_background_tasks()
        .build();
    let params = QueryParams::ticker("AAPL");

    // When: the same query runs twice inside the TTL and once after it
    let first = gateway
        .query(ProviderId::Fmp, DataType::Quote, params.clone())
        .await
        .expect("first call succeeds");
    let second = gateway
        .query(ProviderId::Fmp, DataType::Quote, params.clone())
        .await
        .expect("second call succeeds");
    tokio::time::sleep(Duration::from_millis(45)).await;
    gateway
        .query(ProviderId::Fmp, DataType::Quote, params)
        .await
        .expect("post-expiry call succeeds");

    // Then: only the first and third calls reached the upstream
    assert_eq!(first, second);
    assert_eq!(client.calls(), 2);
    let stats = gateway.cache().stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.expirations, 1);
}

#[tokio::test]
async fn parameter_order_does_not_defeat_the_cache() {
    // Given: a registered client
    let client = ScriptedClient::succeeding(ProviderId::Fmp);
    let gateway = Gateway::builder()
        .with_client(client.clone())
        .with_policy(policy(ProviderId::Fmp))
        .without_background_tasks()
        .build();

    // When: the same logical query arrives with parameters assembled in
    // different orders
    let a = QueryParams::new().with("ticker", "AAPL").with("period", "annual");
    let b = QueryParams::new().with("period", "annual").with("ticker", "AAPL");
    gateway
        .query(ProviderId::Fmp, DataType::FinancialMetrics, a)
        .await
        .expect("first ordering succeeds");
    gateway
        .query(ProviderId::Fmp, DataType::FinancialMetrics, b)
        .await
        .expect("second ordering succeeds");

    // Then: the second call is a cache hit
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn rate_window_rejects_excess_calls_and_resets_after_elapsing() {
    // Given: a source limited to 2 calls per 60ms window
    let client = ScriptedClient::succeeding(ProviderId::Yahoo);
    let gateway = Gateway::builder()
        .with_client(client.clone())
        .with_policy(ProviderPolicy {
            rate_limit: 2,
            rate_window: Duration::from_millis(60),
            ..policy(ProviderId::Yahoo)
        })
        .without_background_tasks()
        .build();

    // When: three distinct queries land inside one window
    for ticker in ["AAPL", "MSFT"] {
        gateway
            .query(ProviderId::Yahoo, DataType::Quote, QueryParams::ticker(ticker))
            .await
            .expect("calls within the limit succeed");
    }
    let rejected = gateway
        .query(ProviderId::Yahoo, DataType::Quote, QueryParams::ticker("NVDA"))
        .await
        .expect_err("third call exceeds the window");

    // Then: the rejection is retryable and never reached the upstream
    assert_eq!(rejected.kind(), GatewayErrorKind::RateLimited);
    assert!(rejected.retryable());
    assert_eq!(client.calls(), 2);

    // And: the window resets once it elapses
    tokio::time::sleep(Duration::from_millis(70)).await;
    gateway
        .query(ProviderId::Yahoo, DataType::Quote, QueryParams::ticker("NVDA"))
        .await
        .expect("fresh window admits the call");
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn slow_upstreams_time_out_and_the_call_is_abandoned() {
    // Given: a client that takes 200ms against a 40ms timeout
    let client = ScriptedClient::succeeding(ProviderId::Polygon)
        .with_delay(Duration::from_millis(200));
    let gateway = Gateway::builder()
        .with_client(client.clone())
        .with_policy(ProviderPolicy {
            call_timeout: Duration::from_millis(40),
            ..policy(ProviderId::Polygon)
        })
        .without_background_tasks()
        .build();

    // When: the query runs
    let err = gateway
        .query(ProviderId::Polygon, DataType::Quote, QueryParams::ticker("SPY"))
        .await
        .expect_err("slow upstream times out");

    // Then: the timeout is classified retryable, the in-flight call was
    // started exactly once, and the failure was recorded
    assert_eq!(err.kind(), GatewayErrorKind::Timeout);
    assert!(err.retryable());
    assert_eq!(client.calls(), 1);
    let metrics = gateway.monitor().metrics();
    assert_eq!(metrics.failures, 1);
}

#[tokio::test]
async fn unhealthy_sources_are_gated_without_an_upstream_call() {
    // Given: a client whose self-test reports unhealthy
    let client = ScriptedClient::succeeding(ProviderId::Finnhub);
    client.set_healthy_answer(false);
    let gateway = Gateway::builder()
        .with_client(client.clone())
        .with_policy(policy(ProviderId::Finnhub))
        .without_background_tasks()
        .build();
    gateway.probe_health().await;

    // When: a query targets the unhealthy source
    let err = gateway
        .query(ProviderId::Finnhub, DataType::News, QueryParams::ticker("AAPL"))
        .await
        .expect_err("unhealthy source is gated");

    // Then: the error is retryable and the upstream was never called
    assert_eq!(err.kind(), GatewayErrorKind::Unhealthy);
    assert!(err.retryable());
    assert_eq!(client.calls(), 0);
    assert!(gateway.available_clients().is_empty());
}

#[tokio::test]
async fn upstream_failures_update_health_and_the_monitor() {
    // Given: a client that always fails with a transient error
    let client = ScriptedClient::failing(
        ProviderId::Yahoo,
        SourceError::unavailable("service unavailable"),
    );
    let gateway = Gateway::builder()
        .with_client(client)
        .with_policy(policy(ProviderId::Yahoo))
        .without_background_tasks()
        .build();

    // When: a query fails
    let err = gateway
        .query(ProviderId::Yahoo, DataType::Quote, QueryParams::ticker("AAPL"))
        .await
        .expect_err("upstream failure propagates");

    // Then: the error carries the full call context and the health record
    // reflects the failure
    assert_eq!(err.source(), ProviderId::Yahoo);
    assert_eq!(err.data_type(), DataType::Quote);
    assert!(err.retryable());

    let health = gateway.health_status();
    let record = &health[&ProviderId::Yahoo];
    assert!(!record.healthy);
    assert_eq!(record.error_count, 1);
    assert!(record
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("service unavailable")));
    assert_eq!(gateway.monitor().metrics().failures, 1);
}

#[tokio::test]
async fn unknown_sources_fail_fast() {
    // Given: a gateway with only FMP registered
    let gateway = Gateway::builder()
        .with_client(ScriptedClient::succeeding(ProviderId::Fmp))
        .without_background_tasks()
        .build();

    // When: a query names an unregistered source
    let err = gateway
        .query(ProviderId::Polygon, DataType::Quote, QueryParams::ticker("SPY"))
        .await
        .expect_err("unregistered source is rejected");

    // Then: the failure is permanent
    assert_eq!(err.kind(), GatewayErrorKind::ClientNotFound);
    assert!(!err.retryable());
}
