//! # Tickermux Core
//!
//! Multi-source gateway for per-company financial data.
//!
//! ## Overview
//!
//! Tickermux fronts a set of external market-data providers behind one
//! dispatch pipeline:
//!
//! - **Provider clients** wrap each upstream API behind a common trait with
//!   a declared capability set
//! - **Gateway** tracks per-source health, enforces fixed-window rate
//!   limits, and classifies every failure
//! - **Cache** keeps payloads fresh per data type, with LRU eviction and
//!   per-source TTL clamps
//! - **Batcher** coalesces concurrent calls against batch-friendly sources
//! - **Router** walks primary/fallback chains and merges enhancement fields
//! - **Monitor** aggregates latency and failure telemetry into alerts and a
//!   health verdict
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters (FMP, Alpha Vantage, Yahoo, Finnhub, Polygon) |
//! | [`batcher`] | Request batching and coalescing |
//! | [`cache`] | TTL + LRU payload cache |
//! | [`error`] | Gateway and routing error taxonomy |
//! | [`gateway`] | Client registry, health tracking, rate limiting, dispatch |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`monitor`] | Performance monitoring and alerting |
//! | [`policy`] | Per-provider operating policies |
//! | [`provider`] | Provider client contract and request types |
//! | [`router`] | Fallback routing and enhancement merge |
//! | [`throttling`] | Provider-internal rate discipline |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tickermux_core::adapters::{FmpClient, YahooClient};
//! use tickermux_core::gateway::Gateway;
//! use tickermux_core::router::Router;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Gateway::builder()
//!         .with_client(Arc::new(FmpClient::new()))
//!         .with_client(Arc::new(YahooClient::new()))
//!         .build();
//!
//!     let router = Router::new(gateway);
//!     let company = router.get_enhanced_company_data("AAPL").await?;
//!     println!("{}", company.profile);
//!     Ok(())
//! }
//! ```
//!
//! ## Security
//!
//! - API keys are read from environment variables only (never logged)
//! - Offline by default: adapters serve deterministic mock data until a real
//!   HTTP client is injected

pub mod adapters;
pub mod batcher;
pub mod cache;
mod data_type;
pub mod error;
pub mod gateway;
pub mod http_client;
pub mod monitor;
pub mod policy;
pub mod provider;
pub mod router;
mod source;
pub mod throttling;

// Re-export commonly used types at crate root for convenience

pub use data_type::DataType;
pub use source::ProviderId;

pub use cache::{CacheConfig, CacheManager, CacheProfile, CacheStats};
pub use error::{GatewayError, GatewayErrorKind, RouteError, ValidationError};
pub use gateway::{DispatchOutcome, Gateway, GatewayBuilder, HealthRecord};
pub use monitor::{
    Alert, AlertMetric, AlertSeverity, HealthReport, HealthStatus, MonitorConfig,
    PerformanceMetrics, PerformanceMonitor,
};
pub use policy::{BatchPolicy, ProviderPolicy};
pub use provider::{
    CapabilitySet, Payload, ProviderClient, QueryParams, QueryRequest, SourceError,
    SourceErrorKind,
};
pub use router::{
    default_routes, EnhancedCompanyData, RateStrategy, RouteConfig, RouteSuccess, Router,
    SectionProvenance,
};
