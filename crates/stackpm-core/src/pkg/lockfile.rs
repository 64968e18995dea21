//! `package-lock.json` (v3 subset) reading and writing.
//!
//! Keys of [`PackageLock::packages`] are install paths such as
//! `node_modules/a/node_modules/@scope/b`; the empty key is the project
//! itself.

use super::error::PkgError;
use super::registry::{string_map, EnginesField, LicenseField};
use serde::{Deserialize, Deserializer, Serialize};
use stackpm_util::FileSystem;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Lockfile name.
pub const LOCKFILE_NAME: &str = "package-lock.json";

/// `lockfileVersion` written by this implementation.
pub const LOCKFILE_VERSION: u32 = 3;

/// Key of the project's own entry.
pub const ROOT_KEY: &str = "";

const NODE_MODULES: &str = "node_modules/";

/// The lockfile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageLock {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_lockfile_version")]
    pub lockfile_version: u32,
    #[serde(default)]
    pub requires: bool,
    #[serde(default)]
    pub packages: BTreeMap<String, LockDependency>,
}

fn default_lockfile_version() -> u32 {
    LOCKFILE_VERSION
}

/// One entry of `packages`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockDependency {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resolved: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub integrity: String,
    #[serde(
        default,
        deserialize_with = "string_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dependencies: BTreeMap<String, String>,
    /// Only set on the root entry.
    #[serde(
        default,
        deserialize_with = "string_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        deserialize_with = "string_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        deserialize_with = "license_string",
        skip_serializing_if = "String::is_empty"
    )]
    pub license: String,
    #[serde(
        default,
        deserialize_with = "engines_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub engines: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub peer: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !b
}

fn license_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<LicenseField>::deserialize(deserializer)?
        .map(|license| license.normalize())
        .unwrap_or_default())
}

fn engines_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<EnginesField>::deserialize(deserializer)?
        .map(|engines| engines.normalize())
        .unwrap_or_default())
}

impl PackageLock {
    /// Create an empty v3 lockfile.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            lockfile_version: LOCKFILE_VERSION,
            requires: true,
            packages: BTreeMap::new(),
        }
    }

    /// Load `package-lock.json` from `dir`.
    ///
    /// Returns `None` if the file is missing or cannot be parsed.
    #[must_use]
    pub fn load(fs: &dyn FileSystem, dir: &Path) -> Option<Self> {
        let path = dir.join(LOCKFILE_NAME);
        if !fs.exists(&path) {
            debug!(path = %path.display(), "No lockfile");
            return None;
        }

        let bytes = match fs.read_file(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read lockfile");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(lock) => Some(lock),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt lockfile, ignoring it");
                None
            }
        }
    }

    /// Like [`PackageLock::load`], but a missing or corrupt file is an error.
    ///
    /// # Errors
    /// Returns `PKG_LOCK_INVALID` if there is no usable lockfile.
    pub fn load_required(fs: &dyn FileSystem, dir: &Path) -> Result<Self, PkgError> {
        Self::load(fs, dir).ok_or_else(|| {
            PkgError::lock_invalid(format!(
                "No readable {LOCKFILE_NAME} in {}",
                dir.display()
            ))
        })
    }

    /// Write the lockfile into `dir` atomically (2-space indent, trailing newline).
    ///
    /// # Errors
    /// Returns `PKG_LOCK_WRITE_FAILED` if serialisation or the write fails.
    pub fn save(&self, fs: &dyn FileSystem, dir: &Path) -> Result<(), PkgError> {
        let mut content = serde_json::to_string_pretty(self)
            .map_err(|e| PkgError::lock_write_failed(format!("Failed to serialize lockfile: {e}")))?;
        content.push('\n');

        let path = dir.join(LOCKFILE_NAME);
        fs.write_atomic(&path, content.as_bytes()).map_err(|e| {
            PkgError::lock_write_failed(format!("Failed to write {}: {e}", path.display()))
        })
    }

    /// The project's own entry.
    #[must_use]
    pub fn root(&self) -> Option<&LockDependency> {
        self.packages.get(ROOT_KEY)
    }

    /// Remove `path` and every entry nested below it. Returns the removed keys.
    pub fn remove_subtree(&mut self, path: &str) -> Vec<String> {
        let nested = format!("{path}/");
        let doomed: Vec<String> = self
            .packages
            .keys()
            .filter(|key| key.as_str() == path || key.starts_with(&nested))
            .cloned()
            .collect();
        for key in &doomed {
            self.packages.remove(key);
        }
        doomed
    }
}

/// `node_modules/<name>` below `parent` (the root when `parent` is empty).
#[must_use]
pub fn join_install_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        format!("{NODE_MODULES}{name}")
    } else {
        format!("{parent}/{NODE_MODULES}{name}")
    }
}

/// The install path enclosing `path`, or `None` for the root and top-level
/// packages' parent.
///
/// `node_modules/a/node_modules/b` gives `node_modules/a`;
/// `node_modules/a` gives `""`; `""` gives `None`.
#[must_use]
pub fn parent_install_path(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    let idx = path.rfind(NODE_MODULES)?;
    Some(path[..idx].trim_end_matches('/'))
}

/// Package name an install path refers to (text after the last `node_modules/`).
#[must_use]
pub fn package_name_from_path(path: &str) -> &str {
    path.rfind(NODE_MODULES)
        .map_or(path, |idx| &path[idx + NODE_MODULES.len()..])
}
