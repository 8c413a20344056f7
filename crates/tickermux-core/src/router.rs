//! Fallback routing and enhancement merge.
//!
//! The router maps each data type to a static route: one primary source, an
//! ordered fallback chain, and optional enhancement sources whose payloads
//! fill fields the base answer is missing. The gateway decides whether one
//! source call succeeds; the router decides which sources to try and in what
//! order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use crate::cache::CacheProfile;
use crate::error::{GatewayError, RouteError};
use crate::gateway::Gateway;
use crate::provider::{Payload, QueryParams};
use crate::{DataType, ProviderId};

/// How a route treats sources under rate pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateStrategy {
    /// Try the configured chain in order.
    #[default]
    Normal,
    /// Skip sources whose rate window is already exhausted.
    Conservative,
    /// Prefer currently-healthy sources; fall back to the full chain if
    /// everything looks down.
    Opportunistic,
}

/// Static routing decision for one data type.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub primary: ProviderId,
    pub fallbacks: Vec<ProviderId>,
    /// Best-effort sources merged into a successful base payload.
    pub enhancements: Vec<ProviderId>,
    pub cache_profile: CacheProfile,
    pub rate_strategy: RateStrategy,
}

impl RouteConfig {
    pub fn new(primary: ProviderId) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            enhancements: Vec::new(),
            cache_profile: CacheProfile::Standard,
            rate_strategy: RateStrategy::Normal,
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: impl Into<Vec<ProviderId>>) -> Self {
        self.fallbacks = fallbacks.into();
        self
    }

    pub fn with_enhancements(mut self, enhancements: impl Into<Vec<ProviderId>>) -> Self {
        self.enhancements = enhancements.into();
        self
    }

    pub fn with_cache_profile(mut self, profile: CacheProfile) -> Self {
        self.cache_profile = profile;
        self
    }

    pub fn with_rate_strategy(mut self, strategy: RateStrategy) -> Self {
        self.rate_strategy = strategy;
        self
    }

    fn chain(&self) -> Vec<ProviderId> {
        let mut chain = Vec::with_capacity(1 + self.fallbacks.len());
        chain.push(self.primary);
        chain.extend(self.fallbacks.iter().copied());
        chain
    }
}

/// Default route table covering every data type.
pub fn default_routes() -> HashMap<DataType, RouteConfig> {
    let mut routes = HashMap::new();

    routes.insert(
        DataType::CompanyProfile,
        RouteConfig::new(ProviderId::Fmp)
            .with_fallbacks([ProviderId::Yahoo])
            .with_enhancements([ProviderId::Finnhub]),
    );
    routes.insert(
        DataType::FinancialMetrics,
        RouteConfig::new(ProviderId::Fmp)
            .with_fallbacks([ProviderId::AlphaVantage, ProviderId::Yahoo])
            .with_cache_profile(CacheProfile::Aggressive)
            .with_rate_strategy(RateStrategy::Conservative),
    );
    routes.insert(
        DataType::Quote,
        RouteConfig::new(ProviderId::Polygon)
            .with_fallbacks([ProviderId::Yahoo, ProviderId::AlphaVantage])
            .with_cache_profile(CacheProfile::Minimal),
    );
    routes.insert(
        DataType::EarningsHistory,
        RouteConfig::new(ProviderId::Fmp)
            .with_fallbacks([ProviderId::Finnhub, ProviderId::AlphaVantage]),
    );
    routes.insert(
        DataType::OwnershipActivity,
        RouteConfig::new(ProviderId::Finnhub),
    );
    routes.insert(
        DataType::SentimentIndex,
        RouteConfig::new(ProviderId::Finnhub).with_cache_profile(CacheProfile::Minimal),
    );
    routes.insert(
        DataType::OptionsActivity,
        RouteConfig::new(ProviderId::Polygon)
            .with_cache_profile(CacheProfile::Minimal)
            .with_rate_strategy(RateStrategy::Opportunistic),
    );
    routes.insert(
        DataType::News,
        RouteConfig::new(ProviderId::Finnhub)
            .with_fallbacks([ProviderId::Yahoo, ProviderId::Polygon])
            .with_cache_profile(CacheProfile::Minimal),
    );

    routes
}

/// A routed answer with its provenance.
#[derive(Debug, Clone)]
pub struct RouteSuccess {
    pub payload: Payload,
    /// The source whose answer was ultimately used.
    pub source: ProviderId,
    pub cached: bool,
    pub latency: Duration,
    /// Sources actually dispatched, in order.
    pub attempted: Vec<ProviderId>,
    /// Errors collected from sources that failed or were skipped.
    pub errors: Vec<GatewayError>,
}

/// Provenance of one section of an enhanced company answer.
#[derive(Debug, Clone)]
pub struct SectionProvenance {
    pub data_type: DataType,
    /// The serving source; `None` when the section failed entirely.
    pub source: Option<ProviderId>,
    pub cached: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

/// Company profile plus every supplemental section that could be fetched.
#[derive(Debug, Clone)]
pub struct EnhancedCompanyData {
    pub ticker: String,
    pub profile: Payload,
    pub sections: BTreeMap<DataType, Payload>,
    pub provenance: Vec<SectionProvenance>,
}

/// Multi-source router over a shared [`Gateway`].
#[derive(Clone)]
pub struct Router {
    gateway: Arc<Gateway>,
    routes: Arc<HashMap<DataType, RouteConfig>>,
}

impl Router {
    /// A router with the default route table.
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self::with_routes(gateway, default_routes())
    }

    pub fn with_routes(gateway: Arc<Gateway>, routes: HashMap<DataType, RouteConfig>) -> Self {
        Self {
            gateway,
            routes: Arc::new(routes),
        }
    }

    pub fn route(&self, data_type: DataType) -> Option<&RouteConfig> {
        self.routes.get(&data_type)
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Resolves one data type through its fallback chain: primary first,
    /// then each fallback strictly in configured order, first success wins.
    /// A successful base answer is then enhanced best-effort.
    ///
    /// # Errors
    ///
    /// [`RouteError::RouteNotConfigured`] for an unrouted data type,
    /// [`RouteError::NoFallback`] when the primary fails with no fallbacks
    /// configured, and [`RouteError::Exhausted`] when every source in the
    /// chain failed.
    pub async fn get_data(
        &self,
        data_type: DataType,
        params: QueryParams,
    ) -> Result<RouteSuccess, RouteError> {
        let Some(route) = self.routes.get(&data_type) else {
            return Err(RouteError::RouteNotConfigured { data_type });
        };

        let chain = self.apply_strategy(route);
        let mut attempted = Vec::new();
        let mut errors: Vec<GatewayError> = Vec::new();

        for source in chain {
            if route.rate_strategy == RateStrategy::Conservative
                && !self.gateway.has_rate_budget(source)
            {
                debug!("skipping {source} for {data_type}: rate window exhausted");
                errors.push(GatewayError::rate_limited(
                    source,
                    data_type,
                    params.clone(),
                    self.gateway.policy(source).rate_limit,
                ));
                continue;
            }

            attempted.push(source);
            match self
                .gateway
                .dispatch_detailed(source, data_type, params.clone(), route.cache_profile)
                .await
            {
                Ok(outcome) => {
                    let payload = self
                        .enhance(route, source, data_type, &params, outcome.payload)
                        .await;
                    return Ok(RouteSuccess {
                        payload,
                        source,
                        cached: outcome.cached,
                        latency: outcome.latency,
                        attempted,
                        errors,
                    });
                }
                Err(err) => {
                    debug!("source {source} failed for {data_type}: {err}");
                    errors.push(err);
                }
            }
        }

        if route.fallbacks.is_empty() {
            let cause = errors.remove(0);
            warn!("route for {data_type} failed with no fallback sources: {cause}");
            return Err(RouteError::NoFallback {
                data_type,
                primary: route.primary,
                cause,
            });
        }

        warn!(
            "route for {data_type} exhausted after {} error(s)",
            errors.len()
        );
        Err(RouteError::Exhausted { data_type, errors })
    }

    /// Applies the route's rate strategy to its chain. Conservative skipping
    /// happens per-attempt in `get_data`; here Opportunistic reorders the
    /// chain to currently-healthy sources, keeping the full chain as a last
    /// resort when nothing reports healthy.
    fn apply_strategy(&self, route: &RouteConfig) -> Vec<ProviderId> {
        let chain = route.chain();
        if route.rate_strategy != RateStrategy::Opportunistic {
            return chain;
        }

        let available = self.gateway.available_clients();
        let healthy: Vec<ProviderId> = chain
            .iter()
            .copied()
            .filter(|source| available.contains(source))
            .collect();
        if healthy.is_empty() {
            chain
        } else {
            healthy
        }
    }

    /// Best-effort parallel enhancement: every configured enhancement source
    /// (other than the one that served the base) is queried for the same data
    /// type; failures are swallowed; only fields absent from the base object
    /// are filled, earlier sources winning.
    async fn enhance(
        &self,
        route: &RouteConfig,
        served_by: ProviderId,
        data_type: DataType,
        params: &QueryParams,
        base: Payload,
    ) -> Payload {
        if route.enhancements.is_empty() || !base.is_object() {
            return base;
        }

        let mut handles = Vec::new();
        for source in route.enhancements.iter().copied() {
            if source == served_by {
                continue;
            }
            let gateway = Arc::clone(&self.gateway);
            let params = params.clone();
            let profile = route.cache_profile;
            handles.push((
                source,
                tokio::spawn(async move {
                    gateway.dispatch(source, data_type, params, profile).await
                }),
            ));
        }

        let mut merged = base;
        for (source, handle) in handles {
            match handle.await {
                Ok(Ok(extra)) => {
                    let filled = merge_absent_fields(&mut merged, &extra);
                    if filled > 0 {
                        debug!("enhanced {data_type} with {filled} field(s) from {source}");
                    }
                }
                Ok(Err(err)) => debug!("enhancement from {source} skipped: {err}"),
                Err(_) => debug!("enhancement from {source} skipped: task aborted"),
            }
        }
        merged
    }

    /// Fetches the company profile through the route table, then every
    /// supplemental section in parallel. Section failures degrade the answer
    /// instead of failing it; provenance records each section's fate.
    ///
    /// # Errors
    ///
    /// Fails only when the base profile itself cannot be routed.
    pub async fn get_enhanced_company_data(
        &self,
        ticker: &str,
    ) -> Result<EnhancedCompanyData, RouteError> {
        const SECTIONS: [DataType; 5] = [
            DataType::EarningsHistory,
            DataType::OwnershipActivity,
            DataType::SentimentIndex,
            DataType::OptionsActivity,
            DataType::News,
        ];

        let params = QueryParams::ticker(ticker);
        let base = self.get_data(DataType::CompanyProfile, params.clone()).await?;

        let mut provenance = vec![SectionProvenance {
            data_type: DataType::CompanyProfile,
            source: Some(base.source),
            cached: base.cached,
            latency: base.latency,
            error: None,
        }];

        let mut handles = Vec::new();
        for data_type in SECTIONS {
            let router = self.clone();
            let params = params.clone();
            handles.push((
                data_type,
                tokio::spawn(async move { router.get_data(data_type, params).await }),
            ));
        }

        let mut sections = BTreeMap::new();
        for (data_type, handle) in handles {
            match handle.await {
                Ok(Ok(success)) => {
                    provenance.push(SectionProvenance {
                        data_type,
                        source: Some(success.source),
                        cached: success.cached,
                        latency: success.latency,
                        error: None,
                    });
                    sections.insert(data_type, success.payload);
                }
                Ok(Err(err)) => provenance.push(SectionProvenance {
                    data_type,
                    source: None,
                    cached: false,
                    latency: Duration::ZERO,
                    error: Some(err.to_string()),
                }),
                Err(_) => provenance.push(SectionProvenance {
                    data_type,
                    source: None,
                    cached: false,
                    latency: Duration::ZERO,
                    error: Some("section task aborted".to_owned()),
                }),
            }
        }

        Ok(EnhancedCompanyData {
            ticker: ticker.to_owned(),
            profile: base.payload,
            sections,
            provenance,
        })
    }
}

/// Copies top-level fields from `extra` into `base` where `base` has no
/// value for the key. Returns the number of fields filled.
fn merge_absent_fields(base: &mut Value, extra: &Value) -> usize {
    let (Some(base_map), Some(extra_map)) = (base.as_object_mut(), extra.as_object()) else {
        return 0;
    };

    let mut filled = 0;
    for (key, value) in extra_map {
        if !base_map.contains_key(key) && !value.is_null() {
            base_map.insert(key.clone(), value.clone());
            filled += 1;
        }
    }
    filled
}
