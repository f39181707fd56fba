//! Dispensa: a generation-scoped asset-caching proxy.
//!
//! Sits in front of a site origin and caches classified static assets with a
//! fixed freshness window, surviving origin outages by serving stale entries.
//! Cache contents are grouped into named generations; a deployment installs a
//! new generation and activates it, which deletes every older one.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod telemetry;
