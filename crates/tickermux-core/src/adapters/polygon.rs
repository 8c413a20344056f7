use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;

use crate::adapters::{payload_from_response, require_ticker, ticker_seed};
use crate::http_client::{HttpClient, HttpRequest, NoopHttpClient};
use crate::provider::{
    CapabilitySet, Payload, ProviderClient, QueryRequest, SourceError,
};
use crate::{DataType, ProviderId};

const BASE_URL: &str = "https://api.polygon.io";

/// Polygon adapter: quotes, options activity, news. Batch-enabled by policy,
/// so concurrent quote fans route through the request batcher.
#[derive(Clone)]
pub struct PolygonClient {
    http_client: Arc<dyn HttpClient>,
    api_key: String,
    use_real_api: bool,
}

impl Default for PolygonClient {
    fn default() -> Self {
        Self {
            http_client: Arc::new(NoopHttpClient),
            api_key: std::env::var("TICKERMUX_POLYGON_API_KEY")
                .unwrap_or_else(|_| String::from("demo")),
            use_real_api: false,
        }
    }
}

impl PolygonClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        let use_real_api = !http_client.is_mock();
        Self {
            http_client,
            api_key: api_key.into(),
            use_real_api,
        }
    }

    fn endpoint(&self, data_type: DataType, ticker: &str) -> String {
        let ticker = urlencoding::encode(ticker);
        let path = match data_type {
            DataType::Quote => format!("v2/last/trade/{ticker}"),
            DataType::OptionsActivity => format!("v3/snapshot/options/{ticker}"),
            DataType::News => format!("v2/reference/news?ticker={ticker}"),
            _ => unreachable!("capability check precedes endpoint construction"),
        };
        let separator = if path.contains('?') { '&' } else { '?' };
        format!("{BASE_URL}/{path}{separator}apiKey={}", self.api_key)
    }

    async fn fetch_real(&self, data_type: DataType, ticker: &str) -> Result<Payload, SourceError> {
        let request = HttpRequest::get(self.endpoint(data_type, ticker)).with_timeout_ms(8_000);
        let response = self.http_client.execute(request).await.map_err(|e| {
            SourceError::unavailable(format!("polygon transport error: {}", e.message()))
        })?;
        payload_from_response(response)
    }

    fn mock_payload(data_type: DataType, ticker: &str) -> Payload {
        let seed = ticker_seed(ticker);
        match data_type {
            DataType::Quote => json!({
                "ticker": ticker,
                "price": 103.8 + (seed % 610) as f64 / 10.0,
                "bid": 103.7 + (seed % 610) as f64 / 10.0,
                "ask": 103.9 + (seed % 610) as f64 / 10.0,
                "volume": 28_000_000 + seed % 6_000_000,
            }),
            DataType::OptionsActivity => json!({
                "ticker": ticker,
                "put_call_ratio": 0.6 + (seed % 80) as f64 / 100.0,
                "total_open_interest": 500_000 + seed % 250_000,
                "unusual_contracts": [
                    {"strike": 110.0 + (seed % 40) as f64, "kind": "call", "volume": 9_000 + seed % 3_000},
                ],
            }),
            DataType::News => json!({
                "ticker": ticker,
                "articles": [
                    {"headline": format!("Options desks eye {ticker} ahead of expiry"), "age_minutes": 55},
                ],
            }),
            _ => unreachable!("capability check precedes mock construction"),
        }
    }
}

impl ProviderClient for PolygonClient {
    fn id(&self) -> ProviderId {
        ProviderId::Polygon
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(DataType::Quote)
            .with(DataType::OptionsActivity)
            .with(DataType::News)
    }

    fn is_healthy<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            if !self.use_real_api {
                return true;
            }
            let request = HttpRequest::get(format!(
                "{BASE_URL}/v1/marketstatus/now?apiKey={}",
                self.api_key
            ))
            .with_timeout_ms(3_000);
            matches!(self.http_client.execute(request).await, Ok(r) if r.is_success())
        })
    }

    fn query<'a>(
        &'a self,
        req: QueryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            if !self.capabilities().supports(req.data_type) {
                return Err(SourceError::unsupported_operation(self.id(), req.data_type));
            }
            let ticker = require_ticker(&req.params)?;

            if self.use_real_api {
                self.fetch_real(req.data_type, ticker).await
            } else {
                Ok(Self::mock_payload(req.data_type, ticker))
            }
        })
    }
}
