//! Security advisory lookup for the packages in the lockfile.

use super::context::PkgContext;
use super::error::PkgError;
use super::lockfile::{package_name_from_path, PackageLock, ROOT_KEY};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// `name -> versions` for every installed package in `lock`.
///
/// The root entry and entries without a version are skipped.
#[must_use]
pub fn audit_payload(lock: &PackageLock) -> BTreeMap<String, Vec<String>> {
    let mut versions: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for (path, entry) in &lock.packages {
        if path == ROOT_KEY || entry.version.is_empty() || !path.contains("node_modules/") {
            continue;
        }
        versions
            .entry(package_name_from_path(path).to_string())
            .or_default()
            .insert(entry.version.clone());
    }

    versions
        .into_iter()
        .map(|(name, set)| (name, set.into_iter().collect()))
        .collect()
}

/// Ask the registry's bulk advisory endpoint about the locked packages.
///
/// # Errors
/// Returns `PKG_LOCK_INVALID` without a usable lockfile, or
/// `PKG_AUDIT_FAILED` if the registry rejects the request.
pub async fn audit(ctx: &PkgContext, directory: &Path) -> Result<Value, PkgError> {
    let lock = PackageLock::load_required(ctx.fs().as_ref(), directory)?;
    let payload = audit_payload(&lock);
    debug!(packages = payload.len(), "Submitting audit");

    let body = serde_json::to_value(&payload)?;
    let _permit = ctx.permit().await?;
    ctx.registry().post_bulk_advisories(&body).await
}
