//! Per-provider operating policies.
//!
//! A [`ProviderPolicy`] captures everything the gateway needs to know about
//! one source's temperament: how many calls fit in a rate window, whether
//! calls must be spaced out, how long to wait for an answer, whether
//! batching pays off, and how its cache TTLs are clamped.

use std::time::Duration;

use crate::ProviderId;

/// Batching behavior for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub enabled: bool,
    pub max_batch_size: usize,
    pub max_wait: Duration,
}

impl BatchPolicy {
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            max_batch_size: 1,
            max_wait: Duration::ZERO,
        }
    }

    pub const fn new(max_batch_size: usize, max_wait: Duration) -> Self {
        Self {
            enabled: true,
            max_batch_size,
            max_wait,
        }
    }
}

/// Operating policy for one external source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    /// Calls admitted per rate window by the gateway.
    pub rate_limit: u32,
    pub rate_window: Duration,
    /// Minimum delay between call starts; set for rate-strict sources that
    /// must serialize their own upstream calls.
    pub min_call_spacing: Option<Duration>,
    pub call_timeout: Duration,
    pub batch: BatchPolicy,
    /// Rate-strict sources keep cache entries at least this long.
    pub ttl_floor: Option<Duration>,
    /// Backup-quality sources keep cache entries at most this long.
    pub ttl_ceiling: Option<Duration>,
}

impl ProviderPolicy {
    pub fn fmp_default() -> Self {
        Self {
            provider_id: ProviderId::Fmp,
            rate_limit: 30,
            rate_window: Duration::from_secs(60),
            min_call_spacing: None,
            call_timeout: Duration::from_secs(10),
            batch: BatchPolicy::disabled(),
            ttl_floor: None,
            ttl_ceiling: None,
        }
    }

    /// Free tier allows roughly five calls a minute; calls are spaced twelve
    /// seconds apart and results are kept cached for at least an hour.
    pub fn alphavantage_default() -> Self {
        Self {
            provider_id: ProviderId::AlphaVantage,
            rate_limit: 5,
            rate_window: Duration::from_secs(60),
            min_call_spacing: Some(Duration::from_secs(12)),
            call_timeout: Duration::from_secs(15),
            batch: BatchPolicy::new(5, Duration::from_millis(200)),
            ttl_floor: Some(Duration::from_secs(60 * 60)),
            ttl_ceiling: None,
        }
    }

    /// Tolerant but backup-quality; stale data ages out quickly.
    pub fn yahoo_default() -> Self {
        Self {
            provider_id: ProviderId::Yahoo,
            rate_limit: 60,
            rate_window: Duration::from_secs(60),
            min_call_spacing: None,
            call_timeout: Duration::from_secs(8),
            batch: BatchPolicy::disabled(),
            ttl_floor: None,
            ttl_ceiling: Some(Duration::from_secs(5 * 60)),
        }
    }

    pub fn finnhub_default() -> Self {
        Self {
            provider_id: ProviderId::Finnhub,
            rate_limit: 30,
            rate_window: Duration::from_secs(60),
            min_call_spacing: None,
            call_timeout: Duration::from_secs(10),
            batch: BatchPolicy::disabled(),
            ttl_floor: None,
            ttl_ceiling: None,
        }
    }

    pub fn polygon_default() -> Self {
        Self {
            provider_id: ProviderId::Polygon,
            rate_limit: 10,
            rate_window: Duration::from_secs(60),
            min_call_spacing: None,
            call_timeout: Duration::from_secs(10),
            batch: BatchPolicy::new(10, Duration::from_millis(100)),
            ttl_floor: None,
            ttl_ceiling: None,
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Fmp => Self::fmp_default(),
            ProviderId::AlphaVantage => Self::alphavantage_default(),
            ProviderId::Yahoo => Self::yahoo_default(),
            ProviderId::Finnhub => Self::finnhub_default(),
            ProviderId::Polygon => Self::polygon_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphavantage_policy_matches_free_tier() {
        let policy = ProviderPolicy::alphavantage_default();

        assert_eq!(policy.rate_limit, 5);
        assert_eq!(policy.rate_window, Duration::from_secs(60));
        assert_eq!(policy.min_call_spacing, Some(Duration::from_secs(12)));
        assert!(policy.batch.enabled);
        assert!(policy.ttl_floor.is_some());
    }

    #[test]
    fn yahoo_is_tolerant_but_capped() {
        let policy = ProviderPolicy::yahoo_default();

        assert!(policy.min_call_spacing.is_none());
        assert!(policy.ttl_ceiling.is_some());
        assert!(!policy.batch.enabled);
    }

    #[test]
    fn every_provider_has_a_default_policy() {
        for provider in ProviderId::ALL {
            assert_eq!(ProviderPolicy::default_for(provider).provider_id, provider);
        }
    }
}
