use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Canonical identifiers for the external data providers the gateway knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Core provider: company profile, financial metrics, earnings, quotes.
    Fmp,
    /// Rate-strict free tier; serializes its own upstream calls.
    AlphaVantage,
    /// Rate-tolerant backup-quality source.
    Yahoo,
    /// Enhancement-heavy source: ownership, sentiment, news.
    Finnhub,
    /// Quotes, options activity, news; batch-friendly.
    Polygon,
}

impl ProviderId {
    pub const ALL: [Self; 5] = [
        Self::Fmp,
        Self::AlphaVantage,
        Self::Yahoo,
        Self::Finnhub,
        Self::Polygon,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fmp => "fmp",
            Self::AlphaVantage => "alphavantage",
            Self::Yahoo => "yahoo",
            Self::Finnhub => "finnhub",
            Self::Polygon => "polygon",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fmp" => Ok(Self::Fmp),
            "alphavantage" => Ok(Self::AlphaVantage),
            "yahoo" => Ok(Self::Yahoo),
            "finnhub" => Ok(Self::Finnhub),
            "polygon" => Ok(Self::Polygon),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
