//! Cache identity and stored entries.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::net::FetchedResponse;

/// Identity of a cacheable request: method plus absolute URL.
///
/// Only GETs ever reach the store, but the method is part of the identity so
/// the key space stays unambiguous if that ever changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub method: String,
    pub url: String,
}

impl EntryKey {
    /// Key for a GET of the given absolute URL.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
        }
    }

    /// Stable on-disk identifier: SHA-256 over method and URL.
    pub fn storage_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A stored response with its freshness stamp.
///
/// `cached_at` is owned entirely by this subsystem; any cache-control headers
/// from the origin are stored verbatim but never consulted.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub cached_at: OffsetDateTime,
}

impl CacheEntry {
    /// Build an entry from an upstream response, stamped with `cached_at`.
    pub fn stamped(response: &FetchedResponse, cached_at: OffsetDateTime) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at,
        }
    }

    /// Entry age at `now`. Negative when the clock moved backwards.
    pub fn age_ms(&self, now: OffsetDateTime) -> i128 {
        (now - self.cached_at).whole_milliseconds()
    }

    /// Fresh while the age has not exceeded the window.
    pub fn is_fresh(&self, now: OffsetDateTime, window: std::time::Duration) -> bool {
        self.age_ms(now) <= window.as_millis() as i128
    }
}
