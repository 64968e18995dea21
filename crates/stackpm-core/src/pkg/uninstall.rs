//! Removing direct dependencies.

use super::context::PkgContext;
use super::error::PkgError;
use super::install::{install, InstallOptions, InstallSummary};
use super::lockfile::join_install_path;
use super::manifest::PackageJson;
use super::progress::{Progress, ProgressReporter, Stage};
use super::spec::validate_package_name;
use std::path::Path;
use tracing::{debug, error, warn};

/// Remove `names` from the manifest and `node_modules`, then reinstall so
/// the tree and the lockfile match the remaining dependencies.
///
/// An empty `names` list changes nothing and only reports `Done`. Names that
/// are not a plain `name` or `@scope/name` are skipped.
///
/// # Errors
/// Returns an error only if the reconciling install cannot run.
pub async fn uninstall(
    ctx: &PkgContext,
    directory: &Path,
    names: &[String],
    progress: &ProgressReporter,
) -> Result<InstallSummary, PkgError> {
    if names.is_empty() {
        progress.stage(Stage::Done);
        return Ok(InstallSummary::default());
    }

    let fs = ctx.fs().as_ref();
    let mut manifest = PackageJson::load(fs, directory);

    for name in names {
        if let Err(e) = validate_package_name(name) {
            warn!(name = %name, error = %e, "Skipping invalid package name");
            continue;
        }

        progress.report(Progress::stage(Stage::Uninstalling).with_name(name.as_str()));

        if !manifest.remove_dependency(name) {
            debug!(name = %name, "Not a direct dependency");
        }

        let target = directory.join(join_install_path("", name));
        if let Err(e) = fs.remove(&target) {
            warn!(name = %name, error = %e, "Failed to remove package directory");
        }
    }

    if let Err(e) = manifest.save(fs, directory) {
        error!(error = %e, "Failed to update package.json");
    }

    install(ctx, directory, &[], &InstallOptions::default(), progress).await
}
