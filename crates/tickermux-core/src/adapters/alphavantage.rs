use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;

use crate::adapters::{payload_from_response, require_ticker, ticker_seed};
use crate::http_client::{HttpClient, HttpRequest, NoopHttpClient};
use crate::policy::ProviderPolicy;
use crate::provider::{
    CapabilitySet, Payload, ProviderClient, QueryRequest, SourceError,
};
use crate::throttling::{CallPacer, RateBudget};
use crate::{DataType, ProviderId};

const BASE_URL: &str = "https://www.alphavantage.co/query";

/// Alpha Vantage adapter. Rate-strict: the free tier allows roughly five
/// calls a minute, so the adapter enforces its own budget before every call
/// and, in real mode, paces calls twelve seconds apart.
#[derive(Clone)]
pub struct AlphaVantageClient {
    http_client: Arc<dyn HttpClient>,
    api_key: String,
    use_real_api: bool,
    budget: RateBudget,
    pacer: Arc<CallPacer>,
}

impl Default for AlphaVantageClient {
    fn default() -> Self {
        let policy = ProviderPolicy::alphavantage_default();
        Self {
            http_client: Arc::new(NoopHttpClient),
            api_key: std::env::var("TICKERMUX_ALPHAVANTAGE_API_KEY")
                .unwrap_or_else(|_| String::from("demo")),
            use_real_api: false,
            budget: RateBudget::new(policy.rate_window, policy.rate_limit),
            pacer: Arc::new(CallPacer::new(
                policy.min_call_spacing.unwrap_or_default(),
            )),
        }
    }
}

impl AlphaVantageClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        let use_real_api = !http_client.is_mock();
        Self {
            http_client,
            api_key: api_key.into(),
            use_real_api,
            ..Self::default()
        }
    }

    fn endpoint(&self, data_type: DataType, ticker: &str) -> String {
        let function = match data_type {
            DataType::FinancialMetrics => "OVERVIEW",
            DataType::EarningsHistory => "EARNINGS",
            DataType::Quote => "GLOBAL_QUOTE",
            _ => unreachable!("capability check precedes endpoint construction"),
        };
        format!(
            "{BASE_URL}?function={function}&symbol={}&apikey={}",
            urlencoding::encode(ticker),
            self.api_key
        )
    }

    async fn fetch_real(&self, data_type: DataType, ticker: &str) -> Result<Payload, SourceError> {
        self.pacer.pace().await;

        let request = HttpRequest::get(self.endpoint(data_type, ticker)).with_timeout_ms(12_000);
        let response = self.http_client.execute(request).await.map_err(|e| {
            SourceError::unavailable(format!("alphavantage transport error: {}", e.message()))
        })?;
        let payload = payload_from_response(response)?;

        // The free tier signals throttling inside a 200 response.
        if payload.get("Note").is_some() || payload.get("Information").is_some() {
            return Err(SourceError::rate_limited(
                "alphavantage free-tier limit exceeded",
            ));
        }
        Ok(payload)
    }

    fn mock_payload(data_type: DataType, ticker: &str) -> Payload {
        let seed = ticker_seed(ticker);
        match data_type {
            DataType::FinancialMetrics => json!({
                "ticker": ticker,
                "pe_ratio": 13.0 + (seed % 240) as f64 / 10.0,
                "ebitda": 90_000_000_000_u64 + seed % 9_000 * 1_000_000,
                "profit_margin": 0.18 + (seed % 20) as f64 / 100.0,
                "beta": 0.9 + (seed % 8) as f64 / 10.0,
            }),
            DataType::EarningsHistory => json!({
                "ticker": ticker,
                "earnings": [
                    {"period": "Q1", "eps": 1.0 + (seed % 11) as f64 / 10.0, "surprise": 0.02},
                    {"period": "Q2", "eps": 1.1 + (seed % 6) as f64 / 10.0, "surprise": 0.05},
                ],
            }),
            DataType::Quote => json!({
                "ticker": ticker,
                "price": 91.0 + (seed % 520) as f64 / 10.0,
                "volume": 30_000 + seed % 12_000,
            }),
            _ => unreachable!("capability check precedes mock construction"),
        }
    }
}

impl ProviderClient for AlphaVantageClient {
    fn id(&self) -> ProviderId {
        ProviderId::AlphaVantage
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(DataType::FinancialMetrics)
            .with(DataType::EarningsHistory)
            .with(DataType::Quote)
    }

    fn is_healthy<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        // No dedicated status endpoint; a health probe would burn free-tier
        // budget, so report healthy while budget remains.
        Box::pin(async move { !self.use_real_api || self.budget.check() })
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

            if !self.budget.check() {
                return Err(SourceError::rate_limited(
                    "alphavantage free-tier limit exceeded",
                ));
            }

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
    async fn rate_limits_after_five_calls_in_a_window() {
        let client = AlphaVantageClient::new();
        let req = QueryRequest::new(DataType::Quote, QueryParams::ticker("MSFT"));

        for _ in 0..5 {
            assert!(client.query(req.clone()).await.is_ok());
        }

        let err = client.query(req).await.unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn profile_is_not_a_supported_operation() {
        let client = AlphaVantageClient::new();
        let err = client
            .query(QueryRequest::new(
                DataType::CompanyProfile,
                QueryParams::ticker("MSFT"),
            ))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), SourceErrorKind::UnsupportedOperation);
    }
}
