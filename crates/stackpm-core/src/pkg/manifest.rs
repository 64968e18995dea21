//! `package.json` reading and writing.
//!
//! Only the fields the installer needs are typed. Everything else in the
//! file is kept in [`PackageJson::extra`] so a rewrite does not lose it.

use super::error::PkgError;
use super::registry::string_map;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stackpm_util::FileSystem;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Manifest file name.
pub const MANIFEST_NAME: &str = "package.json";

/// The subset of `package.json` the package manager understands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(
        default,
        deserialize_with = "string_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        deserialize_with = "string_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, String>,
    /// Every other top-level field, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageJson {
    /// Load `package.json` from `dir`.
    ///
    /// A missing or unparseable file yields an empty manifest.
    #[must_use]
    pub fn load(fs: &dyn FileSystem, dir: &Path) -> Self {
        let path = dir.join(MANIFEST_NAME);
        if !fs.exists(&path) {
            debug!(path = %path.display(), "No package.json, starting empty");
            return Self::default();
        }

        let bytes = match fs.read_file(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read package.json");
                return Self::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt package.json, starting empty");
                Self::default()
            }
        }
    }

    /// Write `package.json` into `dir` (2-space indent, trailing newline).
    ///
    /// # Errors
    /// Returns `PKG_MANIFEST_WRITE_FAILED` if serialisation or the write fails.
    pub fn save(&self, fs: &dyn FileSystem, dir: &Path) -> Result<(), PkgError> {
        let mut content = serde_json::to_string_pretty(self).map_err(|e| {
            PkgError::manifest_write_failed(format!("Failed to serialize package.json: {e}"))
        })?;
        content.push('\n');

        let path = dir.join(MANIFEST_NAME);
        fs.write_atomic(&path, content.as_bytes()).map_err(|e| {
            PkgError::manifest_write_failed(format!(
                "Failed to write {}: {e}",
                path.display()
            ))
        })
    }

    /// Record `name` at `range` in `dependencies` or `devDependencies`.
    pub fn add_dependency(&mut self, name: impl Into<String>, range: impl Into<String>, dev: bool) {
        let section = if dev {
            &mut self.dev_dependencies
        } else {
            &mut self.dependencies
        };
        section.insert(name.into(), range.into());
    }

    /// Remove `name` from both dependency sections. Returns whether it was present.
    pub fn remove_dependency(&mut self, name: &str) -> bool {
        let in_deps = self.dependencies.remove(name).is_some();
        let in_dev = self.dev_dependencies.remove(name).is_some();
        in_deps || in_dev
    }

    /// `devDependencies` merged with `dependencies`; `dependencies` wins on
    /// a name present in both.
    #[must_use]
    pub fn all_dependencies(&self) -> BTreeMap<String, String> {
        let mut merged = self.dev_dependencies.clone();
        merged.extend(
            self.dependencies
                .iter()
                .map(|(name, range)| (name.clone(), range.clone())),
        );
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackpm_util::OsFileSystem;
    use std::fs;
    use tempfile::tempdir;

    fn write_package_json(dir: &Path, content: &str) {
        fs::write(dir.join(MANIFEST_NAME), content).unwrap();
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempdir().unwrap();
        let manifest = PackageJson::load(&OsFileSystem, dir.path());
        assert_eq!(manifest, PackageJson::default());
    }

    #[test]
    fn test_load_corrupt_is_empty() {
        let dir = tempdir().unwrap();
        write_package_json(dir.path(), "{ not json");
        let manifest = PackageJson::load(&OsFileSystem, dir.path());
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn test_dependencies_precedence() {
        let dir = tempdir().unwrap();
        write_package_json(
            dir.path(),
            r#"{
                "dependencies": { "pkg": "1.0.0", "a": "^1.0.0" },
                "devDependencies": { "pkg": "2.0.0", "b": "^2.0.0" }
            }"#,
        );

        let merged = PackageJson::load(&OsFileSystem, dir.path()).all_dependencies();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged["pkg"], "1.0.0");
        assert_eq!(merged["b"], "^2.0.0");
    }

    #[test]
    fn test_non_string_ranges_are_dropped() {
        let dir = tempdir().unwrap();
        write_package_json(
            dir.path(),
            r#"{ "dependencies": { "good": "^1.0.0", "bad": 123 } }"#,
        );

        let manifest = PackageJson::load(&OsFileSystem, dir.path());
        assert_eq!(manifest.dependencies.len(), 1);
        assert!(manifest.dependencies.contains_key("good"));
    }

    #[test]
    fn test_save_preserves_unknown_fields() {
        let dir = tempdir().unwrap();
        write_package_json(
            dir.path(),
            r#"{
                "name": "app",
                "version": "1.0.0",
                "scripts": { "start": "node index.js" },
                "private": true
            }"#,
        );

        let mut manifest = PackageJson::load(&OsFileSystem, dir.path());
        manifest.add_dependency("left-pad", "^1.3.0", false);
        manifest.save(&OsFileSystem, dir.path()).unwrap();

        let content = fs::read_to_string(dir.path().join(MANIFEST_NAME)).unwrap();
        assert!(content.ends_with('\n'));
        assert!(content.contains("\n  \"name\": \"app\""));

        let value: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["scripts"]["start"], "node index.js");
        assert_eq!(value["private"], true);
        assert_eq!(value["dependencies"]["left-pad"], "^1.3.0");
    }

    #[test]
    fn test_save_does_not_escape_html() {
        let dir = tempdir().unwrap();
        let mut manifest = PackageJson::default();
        manifest.add_dependency("range", ">=1.0.0 <2.0.0", true);
        manifest.save(&OsFileSystem, dir.path()).unwrap();

        let content = fs::read_to_string(dir.path().join(MANIFEST_NAME)).unwrap();
        assert!(content.contains(">=1.0.0 <2.0.0"));
    }

    #[test]
    fn test_remove_dependency() {
        let mut manifest = PackageJson::default();
        manifest.add_dependency("a", "^1.0.0", false);
        manifest.add_dependency("a", "^1.0.0", true);
        assert!(manifest.remove_dependency("a"));
        assert!(!manifest.remove_dependency("a"));
        assert!(manifest.all_dependencies().is_empty());
    }
}
