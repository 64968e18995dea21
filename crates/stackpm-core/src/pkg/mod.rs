//! Package manager functionality.
//!
//! Provides:
//! - Parsing package specifications (name@version)
//! - Fetching package metadata from the npm registry
//! - Resolving npm version ranges using semver
//! - Reading and writing `package.json` and `package-lock.json`
//! - Breadth-first tree resolution with hoisting and peer dependencies
//! - Downloading and extracting tarballs under a shared concurrency budget
//! - Uninstalling direct dependencies
//! - Bulk security advisory lookup

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod install;
pub mod lockfile;
pub mod manifest;
pub mod peer;
pub mod progress;
pub mod registry;
pub mod resolve;
pub mod spec;
pub mod tarball;
pub mod uninstall;
pub mod version;

pub use audit::{audit, audit_payload};
pub use config::{PkgConfig, CONCURRENCY_ENV, DEFAULT_MAX_CONCURRENT, REGISTRY_ENV};
pub use context::PkgContext;
pub use error::{codes as pkg_codes, PkgError};
pub use install::{install, InstallOptions, InstallSummary};
pub use lockfile::{
    join_install_path, package_name_from_path, parent_install_path, LockDependency, PackageLock,
    LOCKFILE_NAME, LOCKFILE_VERSION,
};
pub use manifest::{PackageJson, MANIFEST_NAME};
pub use peer::mark_peers;
pub use progress::{Progress, ProgressReporter, Stage};
pub use registry::{
    Dist, EnginesField, LicenseField, Packument, PackumentVersion, RegistryClient,
    DEFAULT_REGISTRY,
};
pub use resolve::{resolve_tree, PlacementSink, MAX_DEPTH};
pub use spec::{validate_package_name, PackageSpec};
pub use tarball::{download_and_extract, download_tarball, extract_tarball, MAX_TARBALL_SIZE};
pub use uninstall::uninstall;
pub use version::{parse_range, resolve_version, version_satisfies};
