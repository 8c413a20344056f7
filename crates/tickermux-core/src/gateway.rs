//! Provider gateway: registry, health tracking, rate limiting, dispatch.
//!
//! The gateway owns every registered [`ProviderClient`] together with the
//! bookkeeping around it: a health record maintained from dispatch outcomes
//! and a background probe, a fixed-window rate counter per source, the shared
//! payload cache, the request batcher, and the performance monitor. Routing
//! decisions live one level up in the router; the gateway only answers
//! "query this one source" with a fully classified outcome.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::batcher::{BatchExecutor, RequestBatcher};
use crate::cache::{effective_ttl, CacheConfig, CacheManager, CacheProfile};
use crate::error::GatewayError;
use crate::monitor::{MonitorConfig, PerformanceMonitor};
use crate::policy::ProviderPolicy;
use crate::provider::{Payload, ProviderClient, QueryParams, QueryRequest, SourceError};
use crate::{DataType, ProviderId};

/// Health bookkeeping for one registered client. Owned exclusively by the
/// gateway; adapters only answer `is_healthy`.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub healthy: bool,
    pub last_checked: Option<OffsetDateTime>,
    pub latency: Option<Duration>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl HealthRecord {
    fn optimistic() -> Self {
        Self {
            healthy: true,
            last_checked: None,
            latency: None,
            error_count: 0,
            last_error: None,
        }
    }
}

#[derive(Debug)]
struct RateWindow {
    window_start: Instant,
    count: u32,
}

impl RateWindow {
    fn fresh(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }

    fn roll_if_elapsed(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.count = 0;
        }
    }
}

/// One successful dispatch, with enough detail for routing provenance.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub payload: Payload,
    /// True when the answer came from the cache without an upstream call.
    pub cached: bool,
    pub latency: Duration,
}

/// Gateway-level knobs beyond the per-provider policies.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub probe_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(60),
        }
    }
}

type ClientMap = HashMap<ProviderId, Arc<dyn ProviderClient>>;

/// Batch executor backing the gateway's batcher: identical queued calls are
/// coalesced into a single client query, then fanned back out positionally.
struct ClientBatchExecutor {
    clients: Arc<ClientMap>,
}

impl BatchExecutor for ClientBatchExecutor {
    fn execute_batch<'a>(
        &'a self,
        source: ProviderId,
        data_type: DataType,
        calls: Vec<QueryParams>,
    ) -> Pin<
        Box<dyn Future<Output = Result<Vec<Result<Payload, SourceError>>, SourceError>> + Send + 'a>,
    > {
        Box::pin(async move {
            let client = self
                .clients
                .get(&source)
                .ok_or_else(|| {
                    SourceError::internal(format!("no client registered for source '{source}'"))
                })?
                .clone();

            let mut by_params: HashMap<String, Result<Payload, SourceError>> = HashMap::new();
            let mut results = Vec::with_capacity(calls.len());

            for params in calls {
                let canonical = params.canonical();
                if !by_params.contains_key(&canonical) {
                    let outcome = client
                        .query(QueryRequest::new(data_type, params.clone()))
                        .await;
                    by_params.insert(canonical.clone(), outcome);
                }
                results.push(
                    by_params
                        .get(&canonical)
                        .cloned()
                        .unwrap_or_else(|| Err(SourceError::internal("coalesced result missing"))),
                );
            }

            Ok(results)
        })
    }
}

/// Multi-source dispatch gateway.
pub struct Gateway {
    clients: Arc<ClientMap>,
    policies: HashMap<ProviderId, ProviderPolicy>,
    health: std::sync::Mutex<HashMap<ProviderId, HealthRecord>>,
    rate: std::sync::Mutex<HashMap<ProviderId, RateWindow>>,
    cache: Arc<CacheManager>,
    monitor: Arc<PerformanceMonitor>,
    batcher: Arc<RequestBatcher>,
    config: GatewayConfig,
    stopped: AtomicBool,
    probe: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Queries one source with the standard cache profile.
    pub async fn query(
        &self,
        source: ProviderId,
        data_type: DataType,
        params: QueryParams,
    ) -> Result<Payload, GatewayError> {
        self.dispatch(source, data_type, params, CacheProfile::Standard)
            .await
    }

    /// Like [`Gateway::dispatch_detailed`], returning just the payload.
    pub async fn dispatch(
        &self,
        source: ProviderId,
        data_type: DataType,
        params: QueryParams,
        profile: CacheProfile,
    ) -> Result<Payload, GatewayError> {
        self.dispatch_detailed(source, data_type, params, profile)
            .await
            .map(|outcome| outcome.payload)
    }

    /// Full dispatch pipeline for one source.
    ///
    /// Order: registry lookup, cache lookup, health gate, rate gate, upstream
    /// call under the policy timeout. Cache hits return without touching the
    /// monitor; every other outcome is recorded.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] classifying the failure and whether a
    /// fallback source is worth trying.
    pub async fn dispatch_detailed(
        &self,
        source: ProviderId,
        data_type: DataType,
        params: QueryParams,
        profile: CacheProfile,
    ) -> Result<DispatchOutcome, GatewayError> {
        let Some(client) = self.clients.get(&source) else {
            return Err(GatewayError::client_not_found(source, data_type, params));
        };
        let policy = self.policy(source);

        if let Some(payload) = self.cache.get(data_type, source, &params).await {
            debug!("cache hit for {source}/{data_type}");
            return Ok(DispatchOutcome {
                payload,
                cached: true,
                latency: Duration::ZERO,
            });
        }

        if let Some(err) = self.health_gate(source, data_type, &params) {
            self.monitor
                .record_request(source, data_type, Duration::ZERO, false, Some(err.message()));
            return Err(err);
        }

        if let Some(err) = self.rate_gate(source, data_type, &params, &policy) {
            self.monitor
                .record_request(source, data_type, Duration::ZERO, false, Some(err.message()));
            return Err(err);
        }

        let started = Instant::now();
        let outcome = self
            .call_upstream(client, source, data_type, params.clone(), &policy)
            .await;
        let latency = started.elapsed();

        match outcome {
            Ok(payload) => {
                self.mark_healthy(source, latency);
                self.consume_rate_budget(source, &policy);
                self.monitor
                    .record_request(source, data_type, latency, true, None);
                let ttl = effective_ttl(data_type, profile, &policy);
                self.cache
                    .set(data_type, source, &params, payload.clone(), ttl)
                    .await;
                Ok(DispatchOutcome {
                    payload,
                    cached: false,
                    latency,
                })
            }
            Err(err) => {
                self.mark_unhealthy(source, err.message());
                self.monitor
                    .record_request(source, data_type, latency, false, Some(err.message()));
                warn!("dispatch to {source}/{data_type} failed: {err}");
                Err(err)
            }
        }
    }

    fn health_gate(
        &self,
        source: ProviderId,
        data_type: DataType,
        params: &QueryParams,
    ) -> Option<GatewayError> {
        let health = self.health.lock().expect("health map not poisoned");
        match health.get(&source) {
            Some(record) if !record.healthy => Some(GatewayError::unhealthy(
                source,
                data_type,
                params.clone(),
                record.last_error.as_deref(),
            )),
            _ => None,
        }
    }

    fn rate_gate(
        &self,
        source: ProviderId,
        data_type: DataType,
        params: &QueryParams,
        policy: &ProviderPolicy,
    ) -> Option<GatewayError> {
        let now = Instant::now();
        let mut rate = self.rate.lock().expect("rate map not poisoned");
        let window = rate.entry(source).or_insert_with(|| RateWindow::fresh(now));
        window.roll_if_elapsed(now, policy.rate_window);

        if window.count >= policy.rate_limit {
            Some(GatewayError::rate_limited(
                source,
                data_type,
                params.clone(),
                policy.rate_limit,
            ))
        } else {
            None
        }
    }

    /// Runs the upstream call, either through the batcher or as a spawned
    /// task raced against the policy timeout. Losing the race abandons the
    /// in-flight call rather than cancelling it; a late result is discarded.
    async fn call_upstream(
        &self,
        client: &Arc<dyn ProviderClient>,
        source: ProviderId,
        data_type: DataType,
        params: QueryParams,
        policy: &ProviderPolicy,
    ) -> Result<Payload, GatewayError> {
        let (handle, allowance) = if policy.batch.enabled {
            let batcher = Arc::clone(&self.batcher);
            let batch_params = params.clone();
            let handle = tokio::spawn(async move {
                batcher.submit(source, data_type, batch_params).await
            });
            (handle, policy.call_timeout + policy.batch.max_wait)
        } else {
            let client = Arc::clone(client);
            let request = QueryRequest::new(data_type, params.clone());
            let handle = tokio::spawn(async move { client.query(request).await });
            (handle, policy.call_timeout)
        };

        match tokio::time::timeout(allowance, handle).await {
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(source_err))) => Err(GatewayError::upstream(
                source, data_type, params, &source_err,
            )),
            Ok(Err(_join)) => Err(GatewayError::batch_failed(
                source,
                data_type,
                params,
                "dispatch task aborted",
            )),
            Err(_elapsed) => Err(GatewayError::timeout(
                source,
                data_type,
                params,
                allowance.as_millis(),
            )),
        }
    }

    fn mark_healthy(&self, source: ProviderId, latency: Duration) {
        let mut health = self.health.lock().expect("health map not poisoned");
        let record = health.entry(source).or_insert_with(HealthRecord::optimistic);
        record.healthy = true;
        record.latency = Some(latency);
        record.last_checked = Some(OffsetDateTime::now_utc());
    }

    fn mark_unhealthy(&self, source: ProviderId, error: &str) {
        let mut health = self.health.lock().expect("health map not poisoned");
        let record = health.entry(source).or_insert_with(HealthRecord::optimistic);
        record.healthy = false;
        record.error_count += 1;
        record.last_error = Some(error.to_owned());
        record.last_checked = Some(OffsetDateTime::now_utc());
    }

    fn consume_rate_budget(&self, source: ProviderId, policy: &ProviderPolicy) {
        let now = Instant::now();
        let mut rate = self.rate.lock().expect("rate map not poisoned");
        let window = rate.entry(source).or_insert_with(|| RateWindow::fresh(now));
        window.roll_if_elapsed(now, policy.rate_window);
        window.count += 1;
    }

    /// True when the source still has calls left in its current rate window.
    /// Unknown sources have no budget.
    pub fn has_rate_budget(&self, source: ProviderId) -> bool {
        if !self.clients.contains_key(&source) {
            return false;
        }
        let policy = self.policy(source);
        let now = Instant::now();
        let mut rate = self.rate.lock().expect("rate map not poisoned");
        let window = rate.entry(source).or_insert_with(|| RateWindow::fresh(now));
        window.roll_if_elapsed(now, policy.rate_window);
        window.count < policy.rate_limit
    }

    pub fn policy(&self, source: ProviderId) -> ProviderPolicy {
        self.policies
            .get(&source)
            .cloned()
            .unwrap_or_else(|| ProviderPolicy::default_for(source))
    }

    pub fn is_registered(&self, source: ProviderId) -> bool {
        self.clients.contains_key(&source)
    }

    /// Snapshot of every client's health record.
    pub fn health_status(&self) -> HashMap<ProviderId, HealthRecord> {
        self.health.lock().expect("health map not poisoned").clone()
    }

    /// Sources currently considered healthy.
    pub fn available_clients(&self) -> Vec<ProviderId> {
        let health = self.health.lock().expect("health map not poisoned");
        let mut available: Vec<ProviderId> = self
            .clients
            .keys()
            .filter(|source| health.get(source).map_or(true, |record| record.healthy))
            .copied()
            .collect();
        available.sort();
        available
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Probes every client's `is_healthy` once and folds the answers into
    /// the health records.
    pub async fn probe_health(&self) {
        for (source, client) in self.clients.iter() {
            let started = Instant::now();
            let healthy = client.is_healthy().await;
            let latency = started.elapsed();

            let mut health = self.health.lock().expect("health map not poisoned");
            let record = health
                .entry(*source)
                .or_insert_with(HealthRecord::optimistic);
            record.healthy = healthy;
            record.latency = Some(latency);
            record.last_checked = Some(OffsetDateTime::now_utc());
            if healthy {
                debug!("health probe: {source} healthy in {}ms", latency.as_millis());
            } else {
                warn!("health probe: {source} unhealthy");
            }
        }
    }

    fn spawn_probe(this: &Arc<Self>) {
        let weak = Arc::downgrade(this);
        let interval = this.config.probe_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(gateway) = weak.upgrade() else { break };
                if gateway.stopped.load(Ordering::Acquire) {
                    break;
                }
                gateway.probe_health().await;
            }
        });

        let mut slot = this.probe.lock().expect("probe slot not poisoned");
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stops the health probe, the cache sweeper, and the batcher (failing
    /// its pending calls). Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("gateway shutting down");
        let mut slot = self.probe.lock().expect("probe slot not poisoned");
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        drop(slot);
        self.cache.shutdown();
        self.batcher.shutdown();
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Assembles a [`Gateway`] and wires up its background loops.
pub struct GatewayBuilder {
    clients: Vec<Arc<dyn ProviderClient>>,
    policies: HashMap<ProviderId, ProviderPolicy>,
    cache_config: CacheConfig,
    monitor_config: MonitorConfig,
    config: GatewayConfig,
    background: bool,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            clients: Vec::new(),
            policies: HashMap::new(),
            cache_config: CacheConfig::default(),
            monitor_config: MonitorConfig::default(),
            config: GatewayConfig::default(),
            background: true,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        let source = client.id();
        self.policies
            .entry(source)
            .or_insert_with(|| ProviderPolicy::default_for(source));
        self.clients.push(client);
        self
    }

    /// Overrides the policy for the client's source.
    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.policies.insert(policy.provider_id, policy);
        self
    }

    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn with_monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.config.probe_interval = interval;
        self
    }

    /// Disables the background probe and sweep loops; tests drive
    /// `probe_health` and `sweep` directly.
    pub fn without_background_tasks(mut self) -> Self {
        self.background = false;
        self
    }

    pub fn build(self) -> Arc<Gateway> {
        let mut client_map: ClientMap = HashMap::new();
        for client in self.clients {
            client_map.insert(client.id(), client);
        }
        let clients = Arc::new(client_map);

        let health = clients
            .keys()
            .map(|source| (*source, HealthRecord::optimistic()))
            .collect();

        let cache = Arc::new(CacheManager::new(self.cache_config));
        let executor = Arc::new(ClientBatchExecutor {
            clients: Arc::clone(&clients),
        });
        let batch_policies = self
            .policies
            .iter()
            .map(|(source, policy)| (*source, policy.batch))
            .collect();
        let batcher = Arc::new(RequestBatcher::new(executor, batch_policies));

        let gateway = Arc::new(Gateway {
            clients,
            policies: self.policies,
            health: std::sync::Mutex::new(health),
            rate: std::sync::Mutex::new(HashMap::new()),
            cache,
            monitor: Arc::new(PerformanceMonitor::new(self.monitor_config)),
            batcher,
            config: self.config,
            stopped: AtomicBool::new(false),
            probe: std::sync::Mutex::new(None),
        });

        if self.background {
            CacheManager::spawn_sweeper(&gateway.cache);
            Gateway::spawn_probe(&gateway);
        }
        gateway
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
