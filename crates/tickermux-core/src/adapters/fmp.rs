use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;
use time::OffsetDateTime;

use crate::adapters::{payload_from_response, require_ticker, ticker_seed};
use crate::http_client::{HttpClient, HttpRequest, NoopHttpClient};
use crate::provider::{
    CapabilitySet, Payload, ProviderClient, QueryRequest, SourceError,
};
use crate::{DataType, ProviderId};

const BASE_URL: &str = "https://financialmodelingprep.com/api/v3";

/// Financial Modeling Prep adapter. The workhorse source: profile, metrics,
/// earnings, and quote.
#[derive(Clone)]
pub struct FmpClient {
    http_client: Arc<dyn HttpClient>,
    api_key: String,
    use_real_api: bool,
}

impl Default for FmpClient {
    fn default() -> Self {
        Self {
            http_client: Arc::new(NoopHttpClient),
            api_key: std::env::var("TICKERMUX_FMP_API_KEY")
                .unwrap_or_else(|_| String::from("demo")),
            use_real_api: false,
        }
    }
}

impl FmpClient {
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
            DataType::CompanyProfile => format!("profile/{ticker}"),
            DataType::FinancialMetrics => format!("key-metrics-ttm/{ticker}"),
            DataType::EarningsHistory => format!("historical/earning_calendar/{ticker}"),
            DataType::Quote => format!("quote/{ticker}"),
            _ => unreachable!("capability check precedes endpoint construction"),
        };
        format!("{BASE_URL}/{path}?apikey={}", self.api_key)
    }

    async fn fetch_real(&self, data_type: DataType, ticker: &str) -> Result<Payload, SourceError> {
        let request = HttpRequest::get(self.endpoint(data_type, ticker)).with_timeout_ms(8_000);
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| SourceError::unavailable(format!("fmp transport error: {}", e.message())))?;
        payload_from_response(response)
    }

    fn mock_payload(data_type: DataType, ticker: &str) -> Payload {
        let seed = ticker_seed(ticker);
        let price = 105.0 + (seed % 600) as f64 / 10.0;
        match data_type {
            DataType::CompanyProfile => json!({
                "ticker": ticker,
                "name": format!("{ticker} Incorporated"),
                "sector": "Technology",
                "industry": "Software",
                "market_cap": 500_000_000_000_u64 + seed % 100_000 * 1_000_000,
                "description": format!("{ticker} designs and sells products worldwide."),
            }),
            DataType::FinancialMetrics => json!({
                "ticker": ticker,
                "pe_ratio": 14.0 + (seed % 260) as f64 / 10.0,
                "roe": 0.08 + (seed % 30) as f64 / 100.0,
                "debt_to_equity": 0.4 + (seed % 12) as f64 / 10.0,
                "revenue_per_share": 20.0 + (seed % 400) as f64 / 10.0,
            }),
            DataType::EarningsHistory => json!({
                "ticker": ticker,
                "earnings": [
                    {"period": "Q1", "eps": 1.1 + (seed % 9) as f64 / 10.0, "surprise": 0.04},
                    {"period": "Q2", "eps": 1.2 + (seed % 7) as f64 / 10.0, "surprise": -0.01},
                ],
            }),
            DataType::Quote => json!({
                "ticker": ticker,
                "price": price,
                "change": (seed % 40) as f64 / 10.0 - 2.0,
                "volume": 25_000_000 + seed % 4_000_000,
                "as_of": OffsetDateTime::now_utc().unix_timestamp(),
            }),
            _ => unreachable!("capability check precedes mock construction"),
        }
    }
}

impl ProviderClient for FmpClient {
    fn id(&self) -> ProviderId {
        ProviderId::Fmp
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(DataType::CompanyProfile)
            .with(DataType::FinancialMetrics)
            .with(DataType::EarningsHistory)
            .with(DataType::Quote)
    }

    fn is_healthy<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            if !self.use_real_api {
                return true;
            }
            let request =
                HttpRequest::get(self.endpoint(DataType::Quote, "AAPL")).with_timeout_ms(3_000);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{QueryParams, SourceErrorKind};

    #[tokio::test]
    async fn mock_profile_is_deterministic_per_ticker() {
        let client = FmpClient::new();
        let req = QueryRequest::new(DataType::CompanyProfile, QueryParams::ticker("AAPL"));

        let first = client.query(req.clone()).await.unwrap();
        let second = client.query(req).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first["ticker"], "AAPL");
        assert_eq!(first["sector"], "Technology");
    }

    #[tokio::test]
    async fn unsupported_operations_are_rejected_up_front() {
        let client = FmpClient::new();
        let err = client
            .query(QueryRequest::new(
                DataType::SentimentIndex,
                QueryParams::ticker("AAPL"),
            ))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), SourceErrorKind::UnsupportedOperation);
    }
}
