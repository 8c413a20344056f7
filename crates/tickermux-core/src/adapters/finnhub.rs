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

const BASE_URL: &str = "https://finnhub.io/api/v1";

/// Finnhub adapter. Its profile payload is slim, but it is the only source
/// for ownership activity and the sentiment index, which makes it the
/// enhancement source of choice.
#[derive(Clone)]
pub struct FinnhubClient {
    http_client: Arc<dyn HttpClient>,
    api_key: String,
    use_real_api: bool,
}

impl Default for FinnhubClient {
    fn default() -> Self {
        Self {
            http_client: Arc::new(NoopHttpClient),
            api_key: std::env::var("TICKERMUX_FINNHUB_API_KEY")
                .unwrap_or_else(|_| String::from("demo")),
            use_real_api: false,
        }
    }
}

impl FinnhubClient {
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

    fn endpoint(data_type: DataType, ticker: &str) -> String {
        let ticker = urlencoding::encode(ticker);
        let path = match data_type {
            DataType::CompanyProfile => format!("stock/profile2?symbol={ticker}"),
            DataType::EarningsHistory => format!("stock/earnings?symbol={ticker}"),
            DataType::OwnershipActivity => format!("stock/insider-transactions?symbol={ticker}"),
            DataType::SentimentIndex => format!("news-sentiment?symbol={ticker}"),
            DataType::News => format!("company-news?symbol={ticker}"),
            _ => unreachable!("capability check precedes endpoint construction"),
        };
        format!("{BASE_URL}/{path}")
    }

    async fn fetch_real(&self, data_type: DataType, ticker: &str) -> Result<Payload, SourceError> {
        // Finnhub authenticates via header, keeping the key out of URLs and
        // access logs.
        let request = HttpRequest::get(Self::endpoint(data_type, ticker))
            .with_header("x-finnhub-token", self.api_key.as_str())
            .with_timeout_ms(8_000);
        let response = self.http_client.execute(request).await.map_err(|e| {
            SourceError::unavailable(format!("finnhub transport error: {}", e.message()))
        })?;
        payload_from_response(response)
    }

    fn mock_payload(data_type: DataType, ticker: &str) -> Payload {
        let seed = ticker_seed(ticker);
        match data_type {
            // Deliberately slim: no sector or description, so enhancement
            // merging has fields to contribute elsewhere and gaps here.
            DataType::CompanyProfile => json!({
                "ticker": ticker,
                "name": format!("{ticker} Incorporated"),
                "exchange": "NASDAQ",
                "ipo_year": 1990 + seed % 30,
                "logo": format!("https://static.example.com/logos/{ticker}.png"),
            }),
            DataType::EarningsHistory => json!({
                "ticker": ticker,
                "earnings": [
                    {"period": "Q1", "eps": 1.05 + (seed % 10) as f64 / 10.0, "surprise": 0.03},
                ],
            }),
            DataType::OwnershipActivity => json!({
                "ticker": ticker,
                "transactions": [
                    {"insider": "CFO", "kind": "sell", "shares": 4_000 + seed % 2_000},
                    {"insider": "Director", "kind": "buy", "shares": 1_200 + seed % 900},
                ],
            }),
            DataType::SentimentIndex => json!({
                "ticker": ticker,
                "bullish": 0.35 + (seed % 40) as f64 / 100.0,
                "bearish": 0.20 + (seed % 25) as f64 / 100.0,
                "articles_last_week": 40 + seed % 80,
            }),
            DataType::News => json!({
                "ticker": ticker,
                "articles": [
                    {"headline": format!("{ticker} expands data center capacity"), "age_minutes": 20},
                ],
            }),
            _ => unreachable!("capability check precedes mock construction"),
        }
    }
}

impl ProviderClient for FinnhubClient {
    fn id(&self) -> ProviderId {
        ProviderId::Finnhub
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(DataType::CompanyProfile)
            .with(DataType::EarningsHistory)
            .with(DataType::OwnershipActivity)
            .with(DataType::SentimentIndex)
            .with(DataType::News)
    }

    fn is_healthy<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            if !self.use_real_api {
                return true;
            }
            let request = HttpRequest::get(Self::endpoint(DataType::CompanyProfile, "AAPL"))
                .with_header("x-finnhub-token", self.api_key.as_str())
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
