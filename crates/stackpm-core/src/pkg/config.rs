//! Package manager settings.

use super::registry::DEFAULT_REGISTRY;
use crate::Error;

/// Environment variable overriding the registry URL.
pub const REGISTRY_ENV: &str = "STACKPM_NPM_REGISTRY";

/// Environment variable overriding the concurrency budget.
pub const CONCURRENCY_ENV: &str = "STACKPM_MAX_CONCURRENCY";

/// Default number of concurrent registry requests and downloads.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Settings for one package manager session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgConfig {
    /// Registry base URL.
    pub registry_url: String,
    /// Upper bound on simultaneous registry requests and tarball installs.
    pub max_concurrent: usize,
}

impl Default for PkgConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY.to_string(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl PkgConfig {
    /// Defaults overridden by `STACKPM_NPM_REGISTRY` and `STACKPM_MAX_CONCURRENCY`.
    ///
    /// # Errors
    /// Returns an error if the concurrency variable is not a positive integer.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`PkgConfig::from_env`] with a custom variable source.
    ///
    /// # Errors
    /// Returns an error if the concurrency variable is not a positive integer.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(REGISTRY_ENV).filter(|v| !v.trim().is_empty()) {
            config.registry_url = url.trim().to_string();
        }

        if let Some(raw) = lookup(CONCURRENCY_ENV).filter(|v| !v.trim().is_empty()) {
            let parsed: usize = raw.trim().parse().map_err(|e| Error::InvalidEnv {
                var: CONCURRENCY_ENV,
                value: raw.clone(),
                reason: format!("{e}"),
            })?;
            if parsed == 0 {
                return Err(Error::InvalidEnv {
                    var: CONCURRENCY_ENV,
                    value: raw,
                    reason: "must be at least 1".to_string(),
                });
            }
            config.max_concurrent = parsed;
        }

        Ok(config)
    }

    /// Set the registry URL.
    #[must_use]
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    /// Set the concurrency budget (at least 1).
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }
}
