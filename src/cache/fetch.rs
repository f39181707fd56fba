//! Fetch orchestration.
//!
//! Per-request state machine over a classified GET:
//!
//! ```text
//! START → CHECK_CACHE → { SERVE_FRESH | FETCH_NETWORK }
//!                        → { SERVE_NETWORK | FALLBACK_STALE | FAIL }
//! ```
//!
//! Every internal failure is folded into an outcome here; nothing escapes as
//! a raw error. Concurrent requests for the same key are deliberately not
//! deduplicated: two simultaneous misses each fetch and write independently
//! and the last write wins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::net::{FetchedResponse, Fetcher};

use super::entry::{CacheEntry, EntryKey};
use super::lifecycle::CurrentGeneration;
use super::store::CacheStore;

const METRIC_CACHE_HIT_TOTAL: &str = "dispensa_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "dispensa_cache_miss_total";
const METRIC_CACHE_STALE_SERVED_TOTAL: &str = "dispensa_cache_stale_served_total";
const METRIC_CACHE_UNAVAILABLE_TOTAL: &str = "dispensa_cache_unavailable_total";
const METRIC_CACHE_WRITE_TOTAL: &str = "dispensa_cache_write_total";
const METRIC_FETCH_DURATION_MS: &str = "dispensa_fetch_duration_ms";

/// Synthesized body/reason when the network is down and no entry exists.
pub const UNAVAILABLE_REASON: &str = "unavailable";

/// Status of the synthesized failure response.
pub const UNAVAILABLE_STATUS: u16 = 503;

/// Terminal state of one orchestrated fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Entry found within the freshness window; network never consulted.
    Fresh(CacheEntry),
    /// Live response from the origin (cached when 2xx).
    Network(FetchedResponse),
    /// Expired (or racing) entry served because the network failed.
    Stale(CacheEntry),
    /// Network failed and no entry exists: the fixed 503.
    Unavailable,
}

impl FetchOutcome {
    pub fn status(&self) -> u16 {
        match self {
            FetchOutcome::Fresh(entry) | FetchOutcome::Stale(entry) => entry.status,
            FetchOutcome::Network(response) => response.status,
            FetchOutcome::Unavailable => UNAVAILABLE_STATUS,
        }
    }

    pub fn body(&self) -> &[u8] {
        match self {
            FetchOutcome::Fresh(entry) | FetchOutcome::Stale(entry) => &entry.body,
            FetchOutcome::Network(response) => &response.body,
            FetchOutcome::Unavailable => UNAVAILABLE_REASON.as_bytes(),
        }
    }
}

/// Cache-first fetch with network fallback and stale-on-error fallback.
pub struct FetchOrchestrator {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    current: Arc<CurrentGeneration>,
    freshness_window: Duration,
}

impl FetchOrchestrator {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        current: Arc<CurrentGeneration>,
        freshness_window: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
            current,
            freshness_window,
        }
    }

    /// Run the state machine for one key. Infallible: every failure mode is
    /// an outcome.
    pub async fn fetch(&self, key: &EntryKey) -> FetchOutcome {
        let generation = self.current.name();

        // CHECK_CACHE
        match self.lookup(&generation, key).await {
            Some(entry) if entry.is_fresh(self.clock.now(), self.freshness_window) => {
                counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                debug!(url = %key.url, outcome = "fresh", "serving cached entry");
                return FetchOutcome::Fresh(entry);
            }
            Some(entry) => {
                debug!(
                    url = %key.url,
                    age_ms = entry.age_ms(self.clock.now()) as i64,
                    outcome = "expired",
                    "cache entry expired, fetching from origin"
                );
            }
            None => {
                debug!(url = %key.url, outcome = "miss", "cache miss, fetching from origin");
            }
        }
        counter!(METRIC_CACHE_MISS_TOTAL).increment(1);

        // FETCH_NETWORK
        let started_at = Instant::now();
        match self.fetcher.get(&key.url).await {
            Ok(response) => {
                histogram!(METRIC_FETCH_DURATION_MS)
                    .record(started_at.elapsed().as_secs_f64() * 1000.0);
                if response.is_success() {
                    self.write_back(&generation, key, &response).await;
                } else {
                    // Negative results are never cached.
                    debug!(
                        url = %key.url,
                        status = response.status,
                        "not caching non-success response"
                    );
                }
                FetchOutcome::Network(response)
            }
            Err(error) => {
                warn!(
                    url = %key.url,
                    error = %error,
                    "network fetch failed, attempting stale fallback"
                );
                // FALLBACK_STALE: re-look-up; an expired entry beats a hard
                // failure.
                match self.lookup(&generation, key).await {
                    Some(entry) => {
                        counter!(METRIC_CACHE_STALE_SERVED_TOTAL).increment(1);
                        info!(url = %key.url, "serving stale entry after network failure");
                        FetchOutcome::Stale(entry)
                    }
                    None => {
                        counter!(METRIC_CACHE_UNAVAILABLE_TOTAL).increment(1);
                        FetchOutcome::Unavailable
                    }
                }
            }
        }
    }

    /// Store read; I/O failure degrades to a miss.
    async fn lookup(&self, generation: &str, key: &EntryKey) -> Option<CacheEntry> {
        match self.store.get(generation, key).await {
            Ok(found) => found,
            Err(error) => {
                warn!(
                    url = %key.url,
                    error = %error,
                    "cache read failed, treating as miss"
                );
                None
            }
        }
    }

    /// Stamp and persist a successful response. Write failures are logged
    /// and swallowed; the live response is served regardless.
    async fn write_back(&self, generation: &str, key: &EntryKey, response: &FetchedResponse) {
        let entry = CacheEntry::stamped(response, self.clock.now());
        match self.store.put(generation, key, entry).await {
            Ok(()) => {
                counter!(METRIC_CACHE_WRITE_TOTAL).increment(1);
                debug!(url = %key.url, "cached fresh response");
            }
            Err(error) => {
                warn!(
                    url = %key.url,
                    error = %error,
                    "cache write failed, serving response uncached"
                );
            }
        }
    }
}
