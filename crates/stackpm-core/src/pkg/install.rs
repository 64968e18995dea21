//! The install pipeline.
//!
//! 1. explicit specifiers are resolved and pinned into `package.json`
//! 2. the dependency tree is resolved level by level
//! 3. each level's placements are prepared on the blocking pool, then
//!    installed (or reused) while resolution continues
//! 4. failed installs are dropped, peers are marked, the lockfile is written

use super::context::PkgContext;
use super::error::PkgError;
use super::lockfile::{LockDependency, PackageLock, ROOT_KEY};
use super::manifest::PackageJson;
use super::peer::mark_peers;
use super::progress::{Progress, ProgressReporter, Stage};
use super::resolve::{resolve_tree, PlacementSink};
use super::spec::PackageSpec;
use super::tarball::download_and_extract;
use super::version::resolve_version;
use stackpm_util::FileSystem;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Options for [`install`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Record explicit specifiers under `devDependencies`.
    pub save_dev: bool,
}

/// What an install run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallSummary {
    /// Packages recorded in the lockfile (root entry excluded).
    pub packages: usize,
    /// Packages downloaded and extracted.
    pub downloaded: usize,
    /// Packages whose existing directory was kept.
    pub reused: usize,
    /// Install paths that failed and were removed again.
    pub failed: Vec<String>,
}

/// Install the project in `directory`, adding `specs` to its manifest first.
///
/// Per-package failures are logged and leave the package out of the tree;
/// manifest and lockfile write failures are logged as errors. The returned
/// future completes only after the lockfile is written.
///
/// # Errors
/// Returns an error only if the session itself is unusable.
pub async fn install(
    ctx: &PkgContext,
    directory: &Path,
    specs: &[String],
    options: &InstallOptions,
    progress: &ProgressReporter,
) -> Result<InstallSummary, PkgError> {
    let fs = ctx.fs().as_ref();
    progress.report(Progress::stage(Stage::Initialization).with_progress(0.0));

    let mut manifest = PackageJson::load(fs, directory);
    if !specs.is_empty() {
        add_explicit_specs(ctx, &mut manifest, specs, options.save_dev).await;
        if let Err(e) = manifest.save(fs, directory) {
            error!(error = %e, "Failed to update package.json");
        }
    }
    progress.report(Progress::stage(Stage::Initialization).with_progress(0.1));

    let previous = PackageLock::load(fs, directory);
    let mut lock = PackageLock::new(project_name(&manifest, directory), manifest.version.clone());
    lock.packages.insert(
        ROOT_KEY.to_string(),
        LockDependency {
            version: manifest.version.clone(),
            dependencies: manifest.dependencies.clone(),
            dev_dependencies: manifest.dev_dependencies.clone(),
            ..LockDependency::default()
        },
    );

    progress.stage(Stage::Installing);

    let mut installer = Installer::new(ctx, directory, previous.as_ref(), progress);
    let tree = resolve_tree(ctx, manifest.all_dependencies(), progress, &mut installer).await;
    lock.packages.extend(tree);

    let mut summary = installer.finish().await;

    for path in &summary.failed {
        if let Err(e) = fs.remove(&directory.join(path)) {
            warn!(path = %path, error = %e, "Failed to clean up after failed install");
        }
        for removed in lock.remove_subtree(path) {
            debug!(path = %removed, "Dropped from lockfile");
        }
    }

    mark_peers(&mut lock.packages);

    progress.stage(Stage::Finalizing);
    if let Err(e) = lock.save(fs, directory) {
        error!(error = %e, "Failed to write lockfile");
    }

    summary.packages = lock.packages.len().saturating_sub(1);
    info!(
        packages = summary.packages,
        downloaded = summary.downloaded,
        reused = summary.reused,
        failed = summary.failed.len(),
        "Install finished"
    );

    progress.stage(Stage::Done);
    Ok(summary)
}

async fn add_explicit_specs(
    ctx: &PkgContext,
    manifest: &mut PackageJson,
    specs: &[String],
    save_dev: bool,
) {
    for raw in specs {
        let spec = match PackageSpec::parse(raw) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(spec = %raw, error = %e, "Skipping invalid package spec");
                continue;
            }
        };

        let packument = match ctx.packument(&spec.name).await {
            Ok(packument) => packument,
            Err(e) => {
                warn!(name = %spec.name, error = %e, "Skipping package: metadata unavailable");
                continue;
            }
        };

        match resolve_version(&packument, spec.specifier()) {
            Ok(record) => {
                let range = format!("^{}", record.version);
                debug!(name = %spec.name, range = %range, dev = save_dev, "Adding to package.json");
                manifest.add_dependency(spec.name.clone(), range, save_dev);
            }
            Err(e) => {
                warn!(name = %spec.name, specifier = spec.specifier(), error = %e, "Skipping package: no matching version");
            }
        }
    }
}

fn project_name(manifest: &PackageJson, directory: &Path) -> String {
    if !manifest.name.is_empty() {
        return manifest.name.clone();
    }
    directory
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .or_else(|| {
            directory
                .canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(std::ffi::OsStr::to_os_string))
        })
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

type InstallTask = (String, Result<(), PkgError>);

/// A placement waiting for its directory to be prepared.
#[derive(Debug)]
struct Slot {
    path: String,
    name: String,
    version: String,
    resolved: String,
    target: PathBuf,
    /// The previous lock recorded the same version and integrity here.
    reusable: bool,
}

#[derive(Debug)]
enum SlotState {
    Reused,
    Prepared,
    Failed(PkgError),
}

/// Keep reusable slots whose directory exists; clear and recreate the rest.
///
/// Runs on the blocking pool, one level at a time, so a slot is always
/// prepared before anything is placed below it.
fn prepare_slots(fs: &dyn FileSystem, slots: &[(PathBuf, bool)]) -> Vec<SlotState> {
    slots
        .iter()
        .map(|(target, reusable)| {
            if *reusable && fs.stat(target).map(|stat| stat.is_dir).unwrap_or(false) {
                return SlotState::Reused;
            }
            match fs.remove(target).and_then(|()| fs.mkdir(target)) {
                Ok(()) => SlotState::Prepared,
                Err(e) => SlotState::Failed(PkgError::fs(format!(
                    "Failed to prepare '{}': {e}",
                    target.display()
                ))),
            }
        })
        .collect()
}

/// Installs placements as the resolver reports them.
struct Installer<'a> {
    ctx: &'a PkgContext,
    directory: PathBuf,
    previous: Option<&'a PackageLock>,
    progress: &'a ProgressReporter,
    pending: Vec<Slot>,
    tasks: JoinSet<InstallTask>,
    reused: usize,
    failed: Vec<String>,
}

impl<'a> Installer<'a> {
    fn new(
        ctx: &'a PkgContext,
        directory: &Path,
        previous: Option<&'a PackageLock>,
        progress: &'a ProgressReporter,
    ) -> Self {
        Self {
            ctx,
            directory: directory.to_path_buf(),
            previous,
            progress,
            pending: Vec::new(),
            tasks: JoinSet::new(),
            reused: 0,
            failed: Vec::new(),
        }
    }

    /// Prepare every pending slot, then reuse or schedule each one.
    async fn flush(&mut self) {
        let slots = std::mem::take(&mut self.pending);
        if slots.is_empty() {
            return;
        }

        let fs = Arc::clone(self.ctx.fs());
        let jobs: Vec<(PathBuf, bool)> = slots
            .iter()
            .map(|slot| (slot.target.clone(), slot.reusable))
            .collect();
        let states = match tokio::task::spawn_blocking(move || prepare_slots(fs.as_ref(), &jobs))
            .await
        {
            Ok(states) => states,
            Err(e) => {
                warn!(error = %e, "Slot preparation aborted");
                slots
                    .iter()
                    .map(|_| SlotState::Failed(PkgError::fs("slot preparation aborted")))
                    .collect()
            }
        };

        for (slot, state) in slots.into_iter().zip(states) {
            match state {
                SlotState::Reused => {
                    debug!(path = %slot.path, version = %slot.version, "Reusing installed package");
                    self.progress.report(
                        Progress::stage(Stage::Extracting)
                            .with_name(slot.name.as_str())
                            .with_version(slot.version.as_str())
                            .with_progress(1.0),
                    );
                    self.reused += 1;
                }
                SlotState::Prepared if slot.resolved.is_empty() => {
                    warn!(path = %slot.path, "No tarball URL recorded");
                    self.failed.push(slot.path);
                }
                SlotState::Prepared => self.spawn_install(slot),
                SlotState::Failed(e) => {
                    warn!(path = %slot.path, error = %e, "Failed to prepare install directory");
                    self.failed.push(slot.path);
                }
            }
        }
    }

    fn spawn_install(&mut self, slot: Slot) {
        let ctx = self.ctx.clone();
        let progress = self.progress.clone();
        let Slot {
            path,
            name,
            version,
            resolved: url,
            target,
            ..
        } = slot;

        self.tasks.spawn(async move {
            let result = async {
                let _permit = ctx.permit().await?;
                debug!(name = %name, version = %version, url = %url, "Downloading");

                let folder = name.rsplit('/').next().unwrap_or(name.as_str());
                download_and_extract(
                    ctx.registry().http(),
                    &url,
                    &target,
                    folder,
                    ctx.fs().clone(),
                    |fraction| {
                        progress.report(
                            Progress::stage(Stage::Extracting)
                                .with_name(name.as_str())
                                .with_version(version.as_str())
                                .with_progress(fraction),
                        );
                    },
                )
                .await
            }
            .await;
            (path, result)
        });
    }

    /// Wait for every scheduled install.
    async fn finish(mut self) -> InstallSummary {
        self.flush().await;

        let mut downloaded = 0;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => downloaded += 1,
                Ok((path, Err(e))) => {
                    warn!(path = %path, error = %e, "Install failed");
                    self.failed.push(path);
                }
                Err(e) => warn!(error = %e, "Install task aborted"),
            }
        }

        self.failed.sort();
        InstallSummary {
            packages: 0,
            downloaded,
            reused: self.reused,
            failed: self.failed,
        }
    }
}

impl PlacementSink for Installer<'_> {
    fn placed(&mut self, path: &str, name: &str, entry: &LockDependency) {
        let reusable = self
            .previous
            .and_then(|lock| lock.packages.get(path))
            .is_some_and(|old| old.version == entry.version && old.integrity == entry.integrity);

        self.pending.push(Slot {
            path: path.to_string(),
            name: name.to_string(),
            version: entry.version.clone(),
            resolved: entry.resolved.clone(),
            target: self.directory.join(path),
            reusable,
        });
    }

    fn level_done(&mut self) -> impl Future<Output = ()> + Send {
        self.flush()
    }
}
