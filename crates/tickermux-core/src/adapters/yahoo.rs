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

const BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance adapter. Tolerant, keyless, backup quality: it answers most
/// data types but its payloads age out of the cache quickly.
#[derive(Clone)]
pub struct YahooClient {
    http_client: Arc<dyn HttpClient>,
    use_real_api: bool,
}

impl Default for YahooClient {
    fn default() -> Self {
        Self {
            http_client: Arc::new(NoopHttpClient),
            use_real_api: false,
        }
    }
}

impl YahooClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>) -> Self {
        let use_real_api = !http_client.is_mock();
        Self {
            http_client,
            use_real_api,
        }
    }

    fn endpoint(data_type: DataType, ticker: &str) -> String {
        let ticker = urlencoding::encode(ticker);
        match data_type {
            DataType::CompanyProfile => format!(
                "{BASE_URL}/v10/finance/quoteSummary/{ticker}?modules=assetProfile"
            ),
            DataType::FinancialMetrics => format!(
                "{BASE_URL}/v10/finance/quoteSummary/{ticker}?modules=financialData,defaultKeyStatistics"
            ),
            DataType::Quote => format!("{BASE_URL}/v8/finance/chart/{ticker}?range=1d"),
            DataType::News => format!("{BASE_URL}/v1/finance/search?q={ticker}&newsCount=10"),
            _ => unreachable!("capability check precedes endpoint construction"),
        }
    }

    async fn fetch_real(&self, data_type: DataType, ticker: &str) -> Result<Payload, SourceError> {
        let request = HttpRequest::get(Self::endpoint(data_type, ticker))
            .with_header("accept", "application/json")
            .with_timeout_ms(6_000);
        let response = self.http_client.execute(request).await.map_err(|e| {
            SourceError::unavailable(format!("yahoo transport error: {}", e.message()))
        })?;
        payload_from_response(response)
    }

    fn mock_payload(data_type: DataType, ticker: &str) -> Payload {
        let seed = ticker_seed(ticker);
        match data_type {
            DataType::CompanyProfile => json!({
                "ticker": ticker,
                "name": format!("{ticker} Incorporated"),
                "website": format!("https://www.{}.example.com", ticker.to_ascii_lowercase()),
                "employees": 40_000 + seed % 120_000,
            }),
            DataType::FinancialMetrics => json!({
                "ticker": ticker,
                "pe_ratio": 15.0 + (seed % 200) as f64 / 10.0,
                "price_to_book": 3.0 + (seed % 50) as f64 / 10.0,
            }),
            DataType::Quote => json!({
                "ticker": ticker,
                "price": 104.5 + (seed % 590) as f64 / 10.0,
                "volume": 22_000_000 + seed % 5_000_000,
            }),
            DataType::News => json!({
                "ticker": ticker,
                "articles": [
                    {"headline": format!("{ticker} shares move on sector rotation"), "age_minutes": 35},
                    {"headline": format!("Analysts revisit {ticker} price targets"), "age_minutes": 110},
                ],
            }),
            _ => unreachable!("capability check precedes mock construction"),
        }
    }
}

impl ProviderClient for YahooClient {
    fn id(&self) -> ProviderId {
        ProviderId::Yahoo
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(DataType::CompanyProfile)
            .with(DataType::FinancialMetrics)
            .with(DataType::Quote)
            .with(DataType::News)
    }

    fn is_healthy<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            if !self.use_real_api {
                return true;
            }
            let request =
                HttpRequest::get(Self::endpoint(DataType::Quote, "AAPL")).with_timeout_ms(3_000);
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
