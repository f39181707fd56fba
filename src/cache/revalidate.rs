//! Background revalidation.
//!
//! Periodically refreshes the configured asset set in the current generation
//! so that entries rarely expire in the request path. A pass walks the assets
//! sequentially, in configuration order; each failure is recorded and the
//! pass moves on. A pass never fails as a whole.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::net::Fetcher;

use super::entry::{CacheEntry, EntryKey};
use super::lifecycle::CurrentGeneration;
use super::store::CacheStore;

const METRIC_REVALIDATE_REFRESHED_TOTAL: &str = "dispensa_revalidate_refreshed_total";
const METRIC_REVALIDATE_FAILED_TOTAL: &str = "dispensa_revalidate_failed_total";

/// Tally of one revalidation pass.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct RevalidationReport {
    pub refreshed: usize,
    pub failed: usize,
}

/// Walks the revalidation asset set and rewrites fresh copies into the
/// current generation.
pub struct Revalidator {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    current: Arc<CurrentGeneration>,
    assets: Vec<String>,
}

impl Revalidator {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        current: Arc<CurrentGeneration>,
        assets: Vec<String>,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
            current,
            assets,
        }
    }

    /// One full pass over the asset set. Individual failures are tallied,
    /// never propagated.
    pub async fn run_once(&self) -> RevalidationReport {
        let generation = self.current.name();
        let mut report = RevalidationReport::default();

        for asset in &self.assets {
            if self.refresh(&generation, asset).await {
                report.refreshed += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(
            generation = %generation,
            refreshed = report.refreshed,
            failed = report.failed,
            "revalidation pass complete"
        );
        report
    }

    async fn refresh(&self, generation: &str, asset: &str) -> bool {
        let response = match self.fetcher.get(asset).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                counter!(METRIC_REVALIDATE_FAILED_TOTAL).increment(1);
                warn!(url = %asset, status = response.status, "revalidation got non-success status");
                return false;
            }
            Err(error) => {
                counter!(METRIC_REVALIDATE_FAILED_TOTAL).increment(1);
                warn!(url = %asset, error = %error, "revalidation fetch failed");
                return false;
            }
        };

        let key = EntryKey::get(asset);
        let entry = CacheEntry::stamped(&response, self.clock.now());
        match self.store.put(generation, &key, entry).await {
            Ok(()) => {
                counter!(METRIC_REVALIDATE_REFRESHED_TOTAL).increment(1);
                debug!(url = %asset, "revalidated asset");
                true
            }
            Err(error) => {
                counter!(METRIC_REVALIDATE_FAILED_TOTAL).increment(1);
                warn!(url = %asset, error = %error, "revalidation write failed");
                false
            }
        }
    }

    /// Spawn the periodic loop. The first tick fires after one full
    /// interval, not at startup. Abort the handle to stop the loop.
    pub fn spawn_interval(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // interval() yields immediately on the first tick.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
