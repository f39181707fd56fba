//! Cache runtime configuration.
//!
//! Built from the validated `[cache]` settings section; see
//! `crate::config::CacheSettings` for the raw layer.

use std::time::Duration;

pub(crate) const DEFAULT_GENERATION: &str = "v1";
pub(crate) const DEFAULT_FRESHNESS_WINDOW_MS: u64 = 7 * 24 * 60 * 60 * 1000;
pub(crate) const DEFAULT_REVALIDATE_INTERVAL_MS: u64 = 60 * 60 * 1000;

/// Fixed-at-deploy cache behavior.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Name of the generation this deployment installs and serves from.
    pub generation: String,
    /// Maximum entry age before revalidation is required. Default 7 days.
    pub freshness_window: Duration,
    /// Literal critical-asset URLs, pre-populated at install.
    pub critical_assets: Vec<String>,
    /// Regex patterns for platform-emitted asset names.
    pub platform_patterns: Vec<String>,
    /// Ordered set of URLs the background revalidator refreshes.
    pub revalidation_assets: Vec<String>,
    /// Cadence of the background revalidation timer.
    pub revalidate_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            generation: DEFAULT_GENERATION.to_string(),
            freshness_window: Duration::from_millis(DEFAULT_FRESHNESS_WINDOW_MS),
            critical_assets: Vec::new(),
            platform_patterns: Vec::new(),
            revalidation_assets: Vec::new(),
            revalidate_interval: Duration::from_millis(DEFAULT_REVALIDATE_INTERVAL_MS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            generation: settings.generation.clone(),
            freshness_window: Duration::from_millis(settings.freshness_window_ms.get()),
            critical_assets: settings.critical_assets.clone(),
            platform_patterns: settings.platform_patterns.clone(),
            revalidation_assets: settings.revalidation_assets.clone(),
            revalidate_interval: Duration::from_millis(settings.revalidate_interval_ms.get()),
        }
    }
}
