//! Performance monitoring and alerting.
//!
//! The monitor is a passive observer: the gateway reports every dispatch
//! outcome through [`PerformanceMonitor::record_request`], and readers pull
//! aggregated metrics, active alerts, and an overall health verdict. It never
//! raises errors back into the request path.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use log::warn;
use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::{DataType, ProviderId};

/// Monitoring knobs. Defaults: 24 h retention, 1 h stats window, 5 s latency
/// ceiling, 5 min alert dedup, 15 min auto-resolve for non-critical alerts.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub retention: Duration,
    pub stats_window: Duration,
    pub latency_ceiling: Duration,
    pub alert_dedup_window: Duration,
    pub auto_resolve_after: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            stats_window: Duration::from_secs(60 * 60),
            latency_ceiling: Duration::from_secs(5),
            alert_dedup_window: Duration::from_secs(5 * 60),
            auto_resolve_after: Duration::from_secs(15 * 60),
        }
    }
}

/// One recorded dispatch outcome.
#[derive(Debug, Clone)]
pub struct PerformanceEntry {
    pub source: ProviderId,
    pub data_type: DataType,
    pub latency: Duration,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: OffsetDateTime,
    at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertMetric {
    RequestFailure,
    Latency,
}

impl AlertMetric {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestFailure => "request_failure",
            Self::Latency => "latency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Medium,
    High,
    Critical,
}

/// An operational alert. Non-critical alerts resolve themselves after the
/// configured delay; critical ones stay active until resolved explicitly.
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: Uuid,
    pub source: ProviderId,
    pub metric: AlertMetric,
    pub severity: AlertSeverity,
    pub message: String,
    pub raised_at: OffsetDateTime,
    pub resolved: bool,
}

struct AlertRecord {
    alert: Alert,
    raised: Instant,
}

/// Per-source aggregate over the stats window.
#[derive(Debug, Clone)]
pub struct SourceMetrics {
    pub source: ProviderId,
    pub requests: u64,
    /// Share of requests that succeeded.
    pub uptime: f64,
    pub average_latency: Duration,
    pub error_rate: f64,
    pub last_error: Option<String>,
}

/// Aggregate view over the stats window.
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    pub window: Duration,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub latency_p50: Duration,
    pub latency_p95: Duration,
    pub latency_p99: Duration,
    pub by_source: Vec<SourceMetrics>,
    pub active_alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
}

struct MonitorInner {
    entries: Vec<PerformanceEntry>,
    alerts: Vec<AlertRecord>,
}

/// Rolling-window dispatch monitor.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    inner: Mutex<MonitorInner>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(MonitorInner {
                entries: Vec::new(),
                alerts: Vec::new(),
            }),
        }
    }

    /// Records one dispatch outcome, trims the retention window, and runs
    /// the immediate alert checks.
    pub fn record_request(
        &self,
        source: ProviderId,
        data_type: DataType,
        latency: Duration,
        success: bool,
        error: Option<&str>,
    ) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("monitor state not poisoned");

        inner.entries.push(PerformanceEntry {
            source,
            data_type,
            latency,
            success,
            error: error.map(str::to_owned),
            timestamp: OffsetDateTime::now_utc(),
            at: now,
        });
        self.trim(&mut inner, now);
        self.auto_resolve(&mut inner, now);

        if !success {
            self.raise(
                &mut inner,
                now,
                source,
                AlertMetric::RequestFailure,
                AlertSeverity::High,
                format!(
                    "request to '{source}' for '{data_type}' failed: {}",
                    error.unwrap_or("unknown error")
                ),
            );
        }
        if latency > self.config.latency_ceiling {
            self.raise(
                &mut inner,
                now,
                source,
                AlertMetric::Latency,
                AlertSeverity::Medium,
                format!(
                    "request to '{source}' for '{data_type}' took {}ms (ceiling {}ms)",
                    latency.as_millis(),
                    self.config.latency_ceiling.as_millis()
                ),
            );
        }
    }

    fn trim(&self, inner: &mut MonitorInner, now: Instant) {
        let retention = self.config.retention;
        inner
            .entries
            .retain(|entry| now.duration_since(entry.at) < retention);
        inner
            .alerts
            .retain(|record| !record.alert.resolved || now.duration_since(record.raised) < retention);
    }

    fn auto_resolve(&self, inner: &mut MonitorInner, now: Instant) {
        let delay = self.config.auto_resolve_after;
        for record in &mut inner.alerts {
            if !record.alert.resolved
                && record.alert.severity < AlertSeverity::Critical
                && now.duration_since(record.raised) >= delay
            {
                record.alert.resolved = true;
            }
        }
    }

    /// Raises an alert unless an unresolved one for the same source and
    /// metric was raised within the dedup window.
    fn raise(
        &self,
        inner: &mut MonitorInner,
        now: Instant,
        source: ProviderId,
        metric: AlertMetric,
        severity: AlertSeverity,
        message: String,
    ) {
        let duplicate = inner.alerts.iter().any(|record| {
            !record.alert.resolved
                && record.alert.source == source
                && record.alert.metric == metric
                && now.duration_since(record.raised) < self.config.alert_dedup_window
        });
        if duplicate {
            return;
        }

        warn!("alert [{}/{}]: {message}", source, metric.as_str());
        inner.alerts.push(AlertRecord {
            alert: Alert {
                id: Uuid::new_v4(),
                source,
                metric,
                severity,
                message,
                raised_at: OffsetDateTime::now_utc(),
                resolved: false,
            },
            raised: now,
        });
    }

    /// Marks one alert resolved. Returns false if the id is unknown.
    pub fn resolve_alert(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().expect("monitor state not poisoned");
        for record in &mut inner.alerts {
            if record.alert.id == id {
                record.alert.resolved = true;
                return true;
            }
        }
        false
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("monitor state not poisoned");
        self.auto_resolve(&mut inner, now);
        inner
            .alerts
            .iter()
            .filter(|record| !record.alert.resolved)
            .map(|record| record.alert.clone())
            .collect()
    }

    /// Aggregates the stats window into totals, latency percentiles, and a
    /// per-source breakdown.
    pub fn metrics(&self) -> PerformanceMetrics {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("monitor state not poisoned");
        self.auto_resolve(&mut inner, now);

        let window = self.config.stats_window;
        let recent: Vec<&PerformanceEntry> = inner
            .entries
            .iter()
            .filter(|entry| now.duration_since(entry.at) < window)
            .collect();

        let total = recent.len() as u64;
        let successes = recent.iter().filter(|entry| entry.success).count() as u64;
        let failures = total - successes;
        let success_rate = if total == 0 {
            1.0
        } else {
            successes as f64 / total as f64
        };

        let mut latencies: Vec<Duration> = recent.iter().map(|entry| entry.latency).collect();
        latencies.sort_unstable();

        let mut grouped: BTreeMap<ProviderId, Vec<&PerformanceEntry>> = BTreeMap::new();
        for entry in &recent {
            grouped.entry(entry.source).or_default().push(entry);
        }
        let by_source = grouped
            .into_iter()
            .map(|(source, entries)| {
                let requests = entries.len() as u64;
                let ok = entries.iter().filter(|entry| entry.success).count() as u64;
                let total_latency: Duration = entries.iter().map(|entry| entry.latency).sum();
                let last_error = entries
                    .iter()
                    .rev()
                    .find_map(|entry| entry.error.clone());
                SourceMetrics {
                    source,
                    requests,
                    uptime: ok as f64 / requests as f64,
                    average_latency: total_latency / requests as u32,
                    error_rate: (requests - ok) as f64 / requests as f64,
                    last_error,
                }
            })
            .collect();

        let active_alerts = inner
            .alerts
            .iter()
            .filter(|record| !record.alert.resolved)
            .map(|record| record.alert.clone())
            .collect();

        PerformanceMetrics {
            window,
            total_requests: total,
            successes,
            failures,
            success_rate,
            latency_p50: percentile(&latencies, 50),
            latency_p95: percentile(&latencies, 95),
            latency_p99: percentile(&latencies, 99),
            by_source,
            active_alerts,
        }
    }

    /// Combines request metrics, provider health, and cache behavior into a
    /// single verdict with named checks.
    pub fn health_report(
        &self,
        provider_health: &HashMap<ProviderId, bool>,
        cache_stats: &CacheStats,
    ) -> HealthReport {
        let metrics = self.metrics();
        let mut checks = Vec::new();

        checks.push(HealthCheck {
            name: "success_rate",
            passed: metrics.success_rate >= 0.90,
            detail: format!(
                "{:.1}% of {} requests succeeded in the last {}s",
                metrics.success_rate * 100.0,
                metrics.total_requests,
                metrics.window.as_secs()
            ),
        });

        checks.push(HealthCheck {
            name: "p95_latency",
            passed: metrics.latency_p95 <= self.config.latency_ceiling,
            detail: format!(
                "p95 latency {}ms against a {}ms ceiling",
                metrics.latency_p95.as_millis(),
                self.config.latency_ceiling.as_millis()
            ),
        });

        let healthy = provider_health.values().filter(|ok| **ok).count();
        let total_providers = provider_health.len();
        checks.push(HealthCheck {
            name: "provider_health",
            passed: total_providers == 0 || healthy * 2 >= total_providers,
            detail: format!("{healthy} of {total_providers} providers healthy"),
        });

        let lookups = cache_stats.hits + cache_stats.misses;
        checks.push(HealthCheck {
            name: "cache_hit_rate",
            passed: lookups == 0 || cache_stats.hit_rate >= 0.20,
            detail: format!(
                "{:.1}% hit rate over {lookups} lookups",
                cache_stats.hit_rate * 100.0
            ),
        });

        let failed = checks.iter().filter(|check| !check.passed).count();
        let status = match failed {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        };

        HealthReport { status, checks }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[Duration], pct: u32) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (u64::from(pct) * sorted.len() as u64).div_ceil(100);
    let index = (rank.max(1) as usize - 1).min(sorted.len() - 1);
    sorted[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(MonitorConfig {
            latency_ceiling: Duration::from_millis(500),
            ..MonitorConfig::default()
        })
    }

    #[tokio::test]
    async fn failures_raise_a_high_severity_alert() {
        let monitor = monitor();
        monitor.record_request(
            ProviderId::Fmp,
            DataType::Quote,
            Duration::from_millis(100),
            false,
            Some("connection refused"),
        );

        let alerts = monitor.active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, AlertMetric::RequestFailure);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
        assert!(alerts[0].message.contains("connection refused"));
    }

    #[tokio::test]
    async fn duplicate_failures_within_the_dedup_window_raise_one_alert() {
        let monitor = monitor();
        for _ in 0..5 {
            monitor.record_request(
                ProviderId::Fmp,
                DataType::Quote,
                Duration::from_millis(100),
                false,
                Some("connection refused"),
            );
        }

        assert_eq!(monitor.active_alerts().len(), 1);
    }

    #[tokio::test]
    async fn distinct_sources_alert_independently() {
        let monitor = monitor();
        monitor.record_request(
            ProviderId::Fmp,
            DataType::Quote,
            Duration::from_millis(100),
            false,
            Some("down"),
        );
        monitor.record_request(
            ProviderId::Yahoo,
            DataType::Quote,
            Duration::from_millis(100),
            false,
            Some("down"),
        );

        assert_eq!(monitor.active_alerts().len(), 2);
    }

    #[tokio::test]
    async fn slow_requests_raise_a_latency_alert() {
        let monitor = monitor();
        monitor.record_request(
            ProviderId::AlphaVantage,
            DataType::FinancialMetrics,
            Duration::from_millis(900),
            true,
            None,
        );

        let alerts = monitor.active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, AlertMetric::Latency);
        assert_eq!(alerts[0].severity, AlertSeverity::Medium);
    }

    #[tokio::test]
    async fn metrics_aggregate_the_stats_window() {
        let monitor = monitor();
        for i in 0..10 {
            monitor.record_request(
                ProviderId::Fmp,
                DataType::Quote,
                Duration::from_millis(10 * (i + 1)),
                i < 9,
                (i >= 9).then_some("boom"),
            );
        }

        let metrics = monitor.metrics();
        assert_eq!(metrics.total_requests, 10);
        assert_eq!(metrics.successes, 9);
        assert_eq!(metrics.failures, 1);
        assert!((metrics.success_rate - 0.9).abs() < 1e-9);
        assert_eq!(metrics.latency_p50, Duration::from_millis(50));
        assert_eq!(metrics.latency_p99, Duration::from_millis(100));

        let fmp = &metrics.by_source[0];
        assert_eq!(fmp.source, ProviderId::Fmp);
        assert_eq!(fmp.requests, 10);
        assert_eq!(fmp.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn resolve_alert_clears_it_from_the_active_list() {
        let monitor = monitor();
        monitor.record_request(
            ProviderId::Fmp,
            DataType::Quote,
            Duration::from_millis(100),
            false,
            Some("down"),
        );

        let id = monitor.active_alerts()[0].id;
        assert!(monitor.resolve_alert(id));
        assert!(monitor.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn health_report_degrades_with_one_failed_check() {
        let monitor = monitor();
        for _ in 0..10 {
            monitor.record_request(
                ProviderId::Fmp,
                DataType::Quote,
                Duration::from_millis(50),
                false,
                Some("down"),
            );
        }

        let provider_health: HashMap<ProviderId, bool> =
            ProviderId::ALL.into_iter().map(|p| (p, true)).collect();
        let report = monitor.health_report(&provider_health, &CacheStats::default());

        assert_eq!(report.status, HealthStatus::Degraded);
        let failed: Vec<&str> = report
            .checks
            .iter()
            .filter(|check| !check.passed)
            .map(|check| check.name)
            .collect();
        assert_eq!(failed, vec!["success_rate"]);
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        let sorted: Vec<Duration> = (1..=4).map(Duration::from_millis).collect();
        assert_eq!(percentile(&sorted, 50), Duration::from_millis(2));
        assert_eq!(percentile(&sorted, 95), Duration::from_millis(4));
        assert_eq!(percentile(&[], 95), Duration::ZERO);
    }
}
