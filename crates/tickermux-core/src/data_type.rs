use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Logical data type served by the gateway.
///
/// This enum doubles as the operation vocabulary of the provider contract:
/// a provider supports a subset of these, declared in its
/// [`CapabilitySet`](crate::provider::CapabilitySet), so an unsupported
/// operation is a typed error rather than a runtime string mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    CompanyProfile,
    FinancialMetrics,
    Quote,
    EarningsHistory,
    OwnershipActivity,
    SentimentIndex,
    OptionsActivity,
    News,
}

impl DataType {
    pub const ALL: [Self; 8] = [
        Self::CompanyProfile,
        Self::FinancialMetrics,
        Self::Quote,
        Self::EarningsHistory,
        Self::OwnershipActivity,
        Self::SentimentIndex,
        Self::OptionsActivity,
        Self::News,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CompanyProfile => "company_profile",
            Self::FinancialMetrics => "financial_metrics",
            Self::Quote => "quote",
            Self::EarningsHistory => "earnings_history",
            Self::OwnershipActivity => "ownership_activity",
            Self::SentimentIndex => "sentiment_index",
            Self::OptionsActivity => "options_activity",
            Self::News => "news",
        }
    }

    /// Bit position used by [`CapabilitySet`](crate::provider::CapabilitySet).
    pub(crate) const fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// Base cache freshness for this data type, before per-source and
    /// per-route adjustments. Quarterly data stays fresh for hours; quotes,
    /// news, and sentiment go stale in minutes.
    pub const fn base_ttl(self) -> Duration {
        match self {
            Self::CompanyProfile => Duration::from_secs(24 * 60 * 60),
            Self::FinancialMetrics => Duration::from_secs(6 * 60 * 60),
            Self::EarningsHistory => Duration::from_secs(12 * 60 * 60),
            Self::OwnershipActivity => Duration::from_secs(60 * 60),
            Self::SentimentIndex => Duration::from_secs(10 * 60),
            Self::OptionsActivity => Duration::from_secs(5 * 60),
            Self::News => Duration::from_secs(5 * 60),
            Self::Quote => Duration::from_secs(60),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "company_profile" => Ok(Self::CompanyProfile),
            "financial_metrics" => Ok(Self::FinancialMetrics),
            "quote" => Ok(Self::Quote),
            "earnings_history" => Ok(Self::EarningsHistory),
            "ownership_activity" => Ok(Self::OwnershipActivity),
            "sentiment_index" => Ok(Self::SentimentIndex),
            "options_activity" => Ok(Self::OptionsActivity),
            "news" => Ok(Self::News),
            other => Err(ValidationError::InvalidDataType {
                value: other.to_owned(),
            }),
        }
    }
}
