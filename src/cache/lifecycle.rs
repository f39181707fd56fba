//! Generation lifecycle.
//!
//! A deployment installs a new generation (pre-populating the critical-asset
//! list), then activates it: every other generation is deleted, and only once
//! deletion has fully completed does the orchestrator start consulting the
//! new generation. Activation is the one serialization point in the system.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::net::{FetchError, Fetcher};

use super::config::CacheConfig;
use super::entry::{CacheEntry, EntryKey};
use super::store::{CacheStore, StoreError};

/// The generation the orchestrator currently reads from and writes to.
///
/// Swapped by the lifecycle manager after activation completes; read on every
/// request.
#[derive(Debug)]
pub struct CurrentGeneration {
    name: RwLock<String>,
}

impl CurrentGeneration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: RwLock::new(name.into()),
        }
    }

    pub fn name(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(|poisoned| {
                warn!("recovered from poisoned generation lock");
                poisoned.into_inner()
            })
            .clone()
    }

    /// Point at a different generation. Normally driven by [`LifecycleManager::activate`];
    /// public so the serving environment can select the pre-activation generation.
    pub fn swap(&self, name: impl Into<String>) {
        *self.name.write().unwrap_or_else(|poisoned| {
            warn!("recovered from poisoned generation lock");
            poisoned.into_inner()
        }) = name.into();
    }
}

/// Lifecycle position of the configured generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    /// No install has been attempted yet.
    Pending,
    Installing,
    Installed,
    Activating,
    Active,
}

impl GenerationState {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationState::Pending => "pending",
            GenerationState::Installing => "installing",
            GenerationState::Installed => "installed",
            GenerationState::Activating => "activating",
            GenerationState::Active => "active",
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("store operation failed for generation `{generation}`: {source}")]
    Store {
        generation: String,
        #[source]
        source: StoreError,
    },
    #[error("install fetch failed for `{url}`: {source}")]
    InstallFetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("install fetch for `{url}` returned status {status}")]
    InstallStatus { url: String, status: u16 },
    #[error("cannot activate from state `{0}`")]
    NotInstalled(&'static str),
}

/// Drives install/activate transitions for the configured generation.
pub struct LifecycleManager {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    current: Arc<CurrentGeneration>,
    state: RwLock<GenerationState>,
    skip_wait: AtomicBool,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
        current: Arc<CurrentGeneration>,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
            config,
            current,
            state: RwLock::new(GenerationState::Pending),
            skip_wait: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> GenerationState {
        *self.state.read().unwrap_or_else(|poisoned| {
            warn!("recovered from poisoned lifecycle state lock");
            poisoned.into_inner()
        })
    }

    fn set_state(&self, next: GenerationState) {
        *self.state.write().unwrap_or_else(|poisoned| {
            warn!("recovered from poisoned lifecycle state lock");
            poisoned.into_inner()
        }) = next;
    }

    fn store_error(&self, source: StoreError) -> LifecycleError {
        LifecycleError::Store {
            generation: self.config.generation.clone(),
            source,
        }
    }

    /// Install the configured generation: create its namespace and fetch
    /// every critical asset, in order.
    ///
    /// All-or-nothing: the first failure deletes the partially populated
    /// generation and fails the install. Retry is the caller's concern.
    /// If a skip-wait signal arrived before install completed, activation
    /// chains immediately.
    pub async fn install(&self) -> Result<(), LifecycleError> {
        let generation = &self.config.generation;
        self.set_state(GenerationState::Installing);
        info!(
            %generation,
            assets = self.config.critical_assets.len(),
            "installing generation"
        );

        self.store
            .open(generation)
            .await
            .map_err(|err| self.store_error(err))?;

        for url in &self.config.critical_assets {
            if let Err(error) = self.install_one(generation, url).await {
                warn!(
                    %generation,
                    %url,
                    error = %error,
                    "install failed, discarding partial generation"
                );
                if let Err(cleanup) = self.store.delete_generation(generation).await {
                    warn!(
                        %generation,
                        error = %cleanup,
                        "failed to discard partial generation"
                    );
                }
                self.set_state(GenerationState::Pending);
                return Err(error);
            }
        }

        self.set_state(GenerationState::Installed);
        info!(%generation, "generation installed");

        if self.skip_wait.load(Ordering::SeqCst) {
            info!(
                %generation,
                "skip-wait signal pending, activating immediately"
            );
            self.activate().await?;
        }
        Ok(())
    }

    async fn install_one(&self, generation: &str, url: &str) -> Result<(), LifecycleError> {
        let response = self
            .fetcher
            .get(url)
            .await
            .map_err(|source| LifecycleError::InstallFetch {
                url: url.to_string(),
                source,
            })?;

        if !response.is_success() {
            return Err(LifecycleError::InstallStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        let entry = CacheEntry::stamped(&response, self.clock.now());
        self.store
            .put(generation, &EntryKey::get(url), entry)
            .await
            .map_err(|err| self.store_error(err))
    }

    /// Promote the installed generation: delete every other generation, then
    /// swap the current-generation handle.
    pub async fn activate(&self) -> Result<(), LifecycleError> {
        match self.state() {
            GenerationState::Installed => {}
            other => return Err(LifecycleError::NotInstalled(other.as_str())),
        }

        let generation = &self.config.generation;
        self.set_state(GenerationState::Activating);
        info!(%generation, "activating generation");

        let names = match self.store.list_generations().await {
            Ok(names) => names,
            Err(err) => {
                self.set_state(GenerationState::Installed);
                return Err(self.store_error(err));
            }
        };

        for name in names.iter().filter(|name| *name != generation) {
            info!(stale = %name, "deleting stale generation");
            if let Err(err) = self.store.delete_generation(name).await {
                self.set_state(GenerationState::Installed);
                return Err(self.store_error(err));
            }
        }

        // Deletion has fully completed; only now does the orchestrator see
        // the new generation.
        self.current.swap(generation.clone());
        self.set_state(GenerationState::Active);
        info!(%generation, "generation active");
        Ok(())
    }

    /// External skip-wait control message: record the signal and, when a
    /// generation is installed-but-waiting, activate immediately.
    pub async fn skip_waiting(&self) -> Result<(), LifecycleError> {
        self.skip_wait.store(true, Ordering::SeqCst);
        info!("skip-wait signal received");

        if self.state() == GenerationState::Installed {
            self.activate().await
        } else {
            Ok(())
        }
    }
}

/// The generation to serve from while a freshly installed one is waiting for
/// activation. The store does not record which generation was active before
/// this process started, so the lexically last non-installed name is chosen;
/// versioned names sort naturally.
pub async fn resting_generation(
    store: &dyn CacheStore,
    exclude: &str,
) -> Result<Option<String>, StoreError> {
    let names = store.list_generations().await?;
    Ok(names.into_iter().filter(|name| name != exclude).next_back())
}
