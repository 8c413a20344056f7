//! TTL + LRU cache for provider payloads.
//!
//! Keys are `"{data_type}:{source}:{canonical params}"`, so two callers who
//! assembled the same parameters in different orders share one entry. Expiry
//! is lazy on access with a background sweep for entries nobody touches;
//! capacity pressure evicts the least-recently-accessed entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::policy::ProviderPolicy;
use crate::provider::{Payload, QueryParams};
use crate::{DataType, ProviderId};

/// How aggressively a route caches, applied on top of the data type's base
/// TTL before per-source clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheProfile {
    /// Double the base freshness; for routes backed by rate-strict sources.
    Aggressive,
    #[default]
    Standard,
    /// Halve the base freshness; for routes where staleness is costly.
    Minimal,
}

impl CacheProfile {
    const fn scale_num_den(self) -> (u32, u32) {
        match self {
            Self::Aggressive => (2, 1),
            Self::Standard => (1, 1),
            Self::Minimal => (1, 2),
        }
    }
}

/// Freshness for one write: the data type's base TTL scaled by the route's
/// cache profile, then clamped into the serving source's floor/ceiling.
pub fn effective_ttl(data_type: DataType, profile: CacheProfile, policy: &ProviderPolicy) -> Duration {
    let (num, den) = profile.scale_num_den();
    let mut ttl = data_type.base_ttl() * num / den;

    if let Some(floor) = policy.ttl_floor {
        ttl = ttl.max(floor);
    }
    if let Some(ceiling) = policy.ttl_ceiling {
        ttl = ttl.min(ceiling);
    }
    ttl
}

/// Builds the canonical cache key for one dispatch.
pub fn cache_key(data_type: DataType, source: ProviderId, params: &QueryParams) -> String {
    format!("{data_type}:{source}:{}", params.canonical())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Payload,
    data_type: DataType,
    source: ProviderId,
    created_at: Instant,
    ttl: Duration,
    hit_count: u64,
    last_accessed: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    /// Hits over total lookups; zero when the cache has never been read.
    pub hit_rate: f64,
    /// Lookup counts per data type, busiest first.
    pub requests_by_data_type: Vec<(DataType, u64)>,
    /// Lookup counts per source, busiest first.
    pub requests_by_source: Vec<(ProviderId, u64)>,
}

#[derive(Debug)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    requests_by_data_type: BTreeMap<DataType, u64>,
    requests_by_source: BTreeMap<ProviderId, u64>,
}

impl CacheInner {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
            requests_by_data_type: BTreeMap::new(),
            requests_by_source: BTreeMap::new(),
        }
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.evictions += 1;
            debug!("cache evicted least-recently-used entry '{key}'");
        }
    }
}

/// Cache behavior knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Shared payload cache. Cheap to clone via `Arc` at the gateway level.
pub struct CacheManager {
    config: CacheConfig,
    inner: RwLock<CacheInner>,
    stopped: AtomicBool,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(CacheInner::new()),
            stopped: AtomicBool::new(false),
            sweeper: std::sync::Mutex::new(None),
        }
    }

    /// Looks up one entry, expiring it lazily if its TTL has elapsed.
    pub async fn get(
        &self,
        data_type: DataType,
        source: ProviderId,
        params: &QueryParams,
    ) -> Option<Payload> {
        let key = cache_key(data_type, source, params);
        let now = Instant::now();
        let mut inner = self.inner.write().await;

        *inner.requests_by_data_type.entry(data_type).or_insert(0) += 1;
        *inner.requests_by_source.entry(source).or_insert(0) += 1;

        match inner.entries.get_mut(&key) {
            Some(entry) if entry.is_expired(now) => {
                inner.entries.remove(&key);
                inner.expirations += 1;
                inner.misses += 1;
                None
            }
            Some(entry) => {
                entry.hit_count += 1;
                entry.last_accessed = now;
                let payload = entry.payload.clone();
                inner.hits += 1;
                Some(payload)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Stores one payload, evicting the least-recently-accessed entry when
    /// the cache is full and the key is new.
    pub async fn set(
        &self,
        data_type: DataType,
        source: ProviderId,
        params: &QueryParams,
        payload: Payload,
        ttl: Duration,
    ) {
        let key = cache_key(data_type, source, params);
        let now = Instant::now();
        let mut inner = self.inner.write().await;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.config.max_entries {
            inner.evict_lru();
        }

        inner.entries.insert(
            key,
            CacheEntry {
                payload,
                data_type,
                source,
                created_at: now,
                ttl,
                hit_count: 0,
                last_accessed: now,
            },
        );
    }

    /// Drops every entry of one data type. Returns the number removed.
    pub async fn invalidate_data_type(&self, data_type: DataType) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.data_type != data_type);
        before - inner.entries.len()
    }

    /// Drops every entry served by one source. Returns the number removed.
    pub async fn invalidate_source(&self, source: ProviderId) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.source != source);
        before - inner.entries.len()
    }

    /// Drops every entry whose key or serialized payload contains `needle`.
    /// Used to invalidate everything known about one ticker.
    pub async fn invalidate_matching(&self, needle: &str) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|key, entry| {
            if key.contains(needle) {
                return false;
            }
            match serde_json::to_string(&entry.payload) {
                Ok(serialized) => !serialized.contains(needle),
                Err(_) => true,
            }
        });
        before - inner.entries.len()
    }

    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        let lookups = inner.hits + inner.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            inner.hits as f64 / lookups as f64
        };

        let mut requests_by_data_type: Vec<(DataType, u64)> = inner
            .requests_by_data_type
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect();
        requests_by_data_type.sort_by(|a, b| b.1.cmp(&a.1));

        let mut requests_by_source: Vec<(ProviderId, u64)> = inner
            .requests_by_source
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect();
        requests_by_source.sort_by(|a, b| b.1.cmp(&a.1));

        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            entries: inner.entries.len(),
            hit_rate,
            requests_by_data_type,
            requests_by_source,
        }
    }

    /// Removes every expired entry right now.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.expirations += removed as u64;
        if removed > 0 {
            debug!("cache sweep removed {removed} expired entries");
        }
        removed
    }

    /// Starts the periodic sweep loop. Holds only a weak reference so a
    /// dropped manager stops its own sweeper.
    pub fn spawn_sweeper(this: &Arc<Self>) {
        let weak = Arc::downgrade(this);
        let interval = this.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                if cache.stopped.load(Ordering::Acquire) {
                    break;
                }
                cache.sweep().await;
            }
        });

        let mut slot = this.sweeper.lock().expect("sweeper slot not poisoned");
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stops the sweep loop. Entries stay readable; expiry remains lazy.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        let mut slot = self.sweeper.lock().expect("sweeper slot not poisoned");
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
