//! Provider adapters.
//!
//! One [`ProviderClient`](crate::provider::ProviderClient) implementation per
//! external source. Each adapter owns its transport: the default constructor
//! wires a [`NoopHttpClient`](crate::http_client::NoopHttpClient) and serves
//! deterministic canned payloads, so the whole stack runs offline; real
//! deployments inject a reqwest-backed client and an API key.

mod alphavantage;
mod finnhub;
mod fmp;
mod polygon;
mod yahoo;

pub use alphavantage::AlphaVantageClient;
pub use finnhub::FinnhubClient;
pub use fmp::FmpClient;
pub use polygon::PolygonClient;
pub use yahoo::YahooClient;

use crate::http_client::HttpResponse;
use crate::provider::{Payload, QueryParams, SourceError};

/// Stable per-ticker seed for deterministic mock payloads.
pub(crate) fn ticker_seed(ticker: &str) -> u64 {
    ticker.bytes().fold(11_u64, |acc, byte| {
        acc.wrapping_mul(31).wrapping_add(u64::from(byte))
    })
}

/// Extracts the mandatory ticker parameter.
pub(crate) fn require_ticker(params: &QueryParams) -> Result<&str, SourceError> {
    params
        .get_str("ticker")
        .filter(|ticker| !ticker.trim().is_empty())
        .ok_or_else(|| SourceError::invalid_request("missing required parameter 'ticker'"))
}

/// Classifies a transport response: 2xx parses as JSON, 429 is a rate limit,
/// 5xx is a transient outage, everything else is an upstream failure.
pub(crate) fn payload_from_response(response: HttpResponse) -> Result<Payload, SourceError> {
    if response.status == 429 {
        return Err(SourceError::rate_limited("upstream returned HTTP 429"));
    }
    if response.status >= 500 {
        return Err(SourceError::unavailable(format!(
            "upstream returned HTTP {}",
            response.status
        )));
    }
    if !response.is_success() {
        return Err(SourceError::upstream(format!(
            "upstream returned HTTP {}",
            response.status
        )));
    }

    serde_json::from_str(&response.body)
        .map_err(|e| SourceError::upstream(format!("malformed upstream response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SourceErrorKind;

    #[test]
    fn missing_ticker_is_an_invalid_request() {
        let err = require_ticker(&QueryParams::new()).unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::InvalidRequest);

        let err = require_ticker(&QueryParams::ticker("  ")).unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::InvalidRequest);
    }

    #[test]
    fn http_statuses_map_to_source_error_kinds() {
        let too_many = HttpResponse {
            status: 429,
            body: String::new(),
        };
        assert_eq!(
            payload_from_response(too_many).unwrap_err().kind(),
            SourceErrorKind::RateLimited
        );

        let outage = HttpResponse {
            status: 503,
            body: String::new(),
        };
        assert_eq!(
            payload_from_response(outage).unwrap_err().kind(),
            SourceErrorKind::Unavailable
        );

        let not_found = HttpResponse {
            status: 404,
            body: String::new(),
        };
        assert_eq!(
            payload_from_response(not_found).unwrap_err().kind(),
            SourceErrorKind::Upstream
        );

        let ok = HttpResponse::ok_json(r#"{"price": 1.5}"#);
        assert!(payload_from_response(ok).is_ok());
    }
}
