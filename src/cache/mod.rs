//! Generation-scoped asset cache.
//!
//! The subsystem sits between an HTTP front end and an origin and caches
//! classified static assets with a fixed freshness window. Entries live in
//! named generations; installing a new generation and activating it replaces
//! the cache population atomically from the request path's point of view.
//!
//! Components:
//! - [`Classifier`] decides which requests the cache handles at all.
//! - [`CacheStore`] is the storage seam, with in-memory and filesystem
//!   implementations.
//! - [`FetchOrchestrator`] runs the cache-first request flow, including the
//!   stale fallback when the origin is unreachable.
//! - [`LifecycleManager`] installs, activates, and prunes generations.
//! - [`Revalidator`] refreshes the critical asset set in the background.

pub mod classify;
pub mod config;
pub mod entry;
pub mod fetch;
pub mod fs_store;
pub mod lifecycle;
pub mod revalidate;
pub mod store;

pub use classify::{Classifier, ClassifyError};
pub use config::CacheConfig;
pub use entry::{CacheEntry, EntryKey};
pub use fetch::{FetchOrchestrator, FetchOutcome, UNAVAILABLE_REASON, UNAVAILABLE_STATUS};
pub use fs_store::FsStore;
pub use lifecycle::{
    CurrentGeneration, GenerationState, LifecycleError, LifecycleManager, resting_generation,
};
pub use revalidate::{RevalidationReport, Revalidator};
pub use store::{CacheStore, MemoryStore, StoreError};
