//! Per-session state shared by install, uninstall and audit.

use super::config::PkgConfig;
use super::error::PkgError;
use super::registry::{Packument, RegistryClient};
use stackpm_util::{FileSystem, OsFileSystem};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OnceCell, Semaphore, SemaphorePermit};
use tracing::debug;

type PackumentSlot = Arc<OnceCell<Arc<Packument>>>;

/// Everything one package manager session needs: registry client,
/// filesystem, concurrency budget and the packument cache.
///
/// Cloning is cheap; clones share the budget and the cache.
#[derive(Clone)]
pub struct PkgContext {
    registry: RegistryClient,
    fs: Arc<dyn FileSystem>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    packuments: Arc<Mutex<HashMap<String, PackumentSlot>>>,
}

impl PkgContext {
    /// Build a session on the real filesystem.
    ///
    /// # Errors
    /// Returns an error if the registry URL is invalid.
    pub fn new(config: &PkgConfig) -> Result<Self, PkgError> {
        Self::with_fs(config, Arc::new(OsFileSystem))
    }

    /// Build a session on a custom filesystem.
    ///
    /// # Errors
    /// Returns an error if the registry URL is invalid.
    pub fn with_fs(config: &PkgConfig, fs: Arc<dyn FileSystem>) -> Result<Self, PkgError> {
        let max_concurrent = config.max_concurrent.max(1);
        Ok(Self {
            registry: RegistryClient::new(&config.registry_url)?,
            fs,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            packuments: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    #[must_use]
    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    #[must_use]
    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Take one unit of the concurrency budget.
    ///
    /// # Errors
    /// Returns an error if the semaphore was closed.
    pub async fn permit(&self) -> Result<SemaphorePermit<'_>, PkgError> {
        self.semaphore
            .acquire()
            .await
            .map_err(|e| PkgError::registry(format!("Concurrency limiter closed: {e}")))
    }

    /// Fetch a packument once per session.
    ///
    /// Concurrent callers asking for the same name share one request. Failed
    /// fetches are not cached.
    ///
    /// # Errors
    /// Returns the registry error of the fetch.
    pub async fn packument(&self, name: &str) -> Result<Arc<Packument>, PkgError> {
        let slot = {
            let mut cache = match self.packuments.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(cache.entry(name.to_string()).or_default())
        };

        let packument = slot
            .get_or_try_init(|| async {
                let _permit = self.permit().await?;
                debug!(name, "Packument cache miss");
                self.registry.fetch_packument(name).await.map(Arc::new)
            })
            .await?;

        Ok(Arc::clone(packument))
    }
}

impl std::fmt::Debug for PkgContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkgContext")
            .field("registry", self.registry.base_url())
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}
