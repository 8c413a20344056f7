//! Gateway and router error taxonomy.

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::provider::{QueryParams, SourceError, SourceErrorKind};
use crate::{DataType, ProviderId};

/// Validation errors for string inputs at the crate boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid source '{value}', expected one of fmp, alphavantage, yahoo, finnhub, polygon")]
    InvalidSource { value: String },
    #[error("invalid data type '{value}'")]
    InvalidDataType { value: String },
}

/// Message classes the gateway treats as transient.
///
/// Timeouts, network-level failures, and rate-limit responses are worth
/// retrying on a fallback source; everything else is assumed permanent.
pub fn retryable_message(message: &str) -> bool {
    const TRANSIENT_MARKERS: [&str; 10] = [
        "timeout",
        "timed out",
        "connection",
        "network",
        "unreachable",
        "reset by peer",
        "rate limit",
        "too many requests",
        "429",
        "unavailable",
    ];

    let lowered = message.to_ascii_lowercase();
    TRANSIENT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Failure classes produced by a single gateway dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// The requested source is not registered. Non-retryable.
    ClientNotFound,
    /// The source's health record currently reports unhealthy.
    Unhealthy,
    /// The source's rate window is exhausted; no upstream call was made.
    RateLimited,
    /// The upstream call exceeded the dispatch timeout.
    Timeout,
    /// The upstream call itself failed; retryability follows message class.
    Upstream,
    /// A batch executor failed, failing every queued member.
    BatchFailed,
}

/// Typed dispatch failure carrying the full call context, so the router can
/// decide whether to advance down the fallback chain.
#[derive(Debug, Clone)]
pub struct GatewayError {
    kind: GatewayErrorKind,
    source: ProviderId,
    data_type: DataType,
    params: QueryParams,
    message: String,
    retryable: bool,
}

impl GatewayError {
    pub fn client_not_found(source: ProviderId, data_type: DataType, params: QueryParams) -> Self {
        Self {
            kind: GatewayErrorKind::ClientNotFound,
            message: format!("no client registered for source '{source}'"),
            retryable: false,
            source,
            data_type,
            params,
        }
    }

    pub fn unhealthy(
        source: ProviderId,
        data_type: DataType,
        params: QueryParams,
        last_error: Option<&str>,
    ) -> Self {
        let message = match last_error {
            Some(detail) => format!("source '{source}' is unhealthy: {detail}"),
            None => format!("source '{source}' is unhealthy"),
        };
        Self {
            kind: GatewayErrorKind::Unhealthy,
            message,
            retryable: true,
            source,
            data_type,
            params,
        }
    }

    pub fn rate_limited(
        source: ProviderId,
        data_type: DataType,
        params: QueryParams,
        limit: u32,
    ) -> Self {
        Self {
            kind: GatewayErrorKind::RateLimited,
            message: format!("source '{source}' exceeded its rate window ({limit} calls)"),
            retryable: true,
            source,
            data_type,
            params,
        }
    }

    pub fn timeout(
        source: ProviderId,
        data_type: DataType,
        params: QueryParams,
        timeout_ms: u128,
    ) -> Self {
        Self {
            kind: GatewayErrorKind::Timeout,
            message: format!("source '{source}' did not answer within {timeout_ms}ms"),
            retryable: true,
            source,
            data_type,
            params,
        }
    }

    pub fn upstream(
        source: ProviderId,
        data_type: DataType,
        params: QueryParams,
        error: &SourceError,
    ) -> Self {
        let kind = match error.kind() {
            SourceErrorKind::RateLimited => GatewayErrorKind::RateLimited,
            SourceErrorKind::Timeout => GatewayErrorKind::Timeout,
            _ => GatewayErrorKind::Upstream,
        };
        Self {
            kind,
            message: error.to_string(),
            retryable: error.retryable() || retryable_message(error.message()),
            source,
            data_type,
            params,
        }
    }

    pub fn batch_failed(
        source: ProviderId,
        data_type: DataType,
        params: QueryParams,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind: GatewayErrorKind::BatchFailed,
            message: detail.into(),
            retryable: true,
            source,
            data_type,
            params,
        }
    }

    pub const fn kind(&self) -> GatewayErrorKind {
        self.kind
    }

    pub const fn source(&self) -> ProviderId {
        self.source
    }

    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {}{}",
            self.source,
            self.data_type,
            self.message,
            if self.retryable { " (retryable)" } else { "" }
        )
    }
}

impl std::error::Error for GatewayError {}

/// Aggregate routing failure after the fallback chain is settled.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no route configured for data type '{data_type}'")]
    RouteNotConfigured { data_type: DataType },

    #[error(
        "primary source '{primary}' failed for '{data_type}' and no fallback sources available: {cause}"
    )]
    NoFallback {
        data_type: DataType,
        primary: ProviderId,
        cause: GatewayError,
    },

    #[error("all sources failed for data type '{data_type}' ({n} attempt(s))", n = .errors.len())]
    Exhausted {
        data_type: DataType,
        errors: Vec<GatewayError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SourceError;

    #[test]
    fn transient_wording_is_retryable() {
        assert!(retryable_message("upstream request timed out"));
        assert!(retryable_message("HTTP 429 Too Many Requests"));
        assert!(retryable_message("network unreachable"));
        assert!(!retryable_message("symbol not found"));
    }

    #[test]
    fn client_not_found_is_not_retryable() {
        let err = GatewayError::client_not_found(
            ProviderId::Polygon,
            DataType::Quote,
            QueryParams::ticker("AAPL"),
        );
        assert_eq!(err.kind(), GatewayErrorKind::ClientNotFound);
        assert!(!err.retryable());
    }

    #[test]
    fn upstream_rate_limit_maps_to_rate_limited_kind() {
        let source_err = SourceError::rate_limited("free-tier limit exceeded");
        let err = GatewayError::upstream(
            ProviderId::AlphaVantage,
            DataType::FinancialMetrics,
            QueryParams::ticker("MSFT"),
            &source_err,
        );
        assert_eq!(err.kind(), GatewayErrorKind::RateLimited);
        assert!(err.retryable());
    }

    #[test]
    fn exhausted_route_error_names_the_data_type() {
        let err = RouteError::Exhausted {
            data_type: DataType::News,
            errors: vec![],
        };
        assert!(err.to_string().contains("news"));
    }
}
