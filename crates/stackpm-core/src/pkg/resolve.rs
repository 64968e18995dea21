//! Breadth-first dependency tree resolution with hoisting.
//!
//! The tree is built one level at a time. Every dependency of a level is
//! resolved concurrently; once the level is complete, placements are applied
//! in `(parent path, name)` order so the resulting tree does not depend on
//! network timing. Each placement is handed to a [`PlacementSink`], and the
//! sink is told when a level is complete, which lets installation overlap the
//! remaining levels.

use super::context::PkgContext;
use super::lockfile::{join_install_path, parent_install_path, LockDependency};
use super::progress::{Progress, ProgressReporter, Stage};
use super::registry::PackumentVersion;
use super::spec::validate_package_name;
use super::version::{resolve_version, version_satisfies};
use futures::future;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{debug, warn};

/// Maximum resolution depth to prevent infinite loops.
pub const MAX_DEPTH: usize = 100;

/// Receives every package the resolver places in the tree.
pub trait PlacementSink {
    /// `name` was placed at install path `path` with lock entry `entry`.
    fn placed(&mut self, path: &str, name: &str, entry: &LockDependency);

    /// Every placement of the current level has been reported. The next
    /// level is not resolved until the returned future completes.
    fn level_done(&mut self) -> impl Future<Output = ()> + Send;
}

impl PlacementSink for () {
    fn placed(&mut self, _path: &str, _name: &str, _entry: &LockDependency) {}

    fn level_done(&mut self) -> impl Future<Output = ()> + Send {
        future::ready(())
    }
}

/// Dependencies declared by one placed package (or the project itself).
#[derive(Debug, Clone, Default)]
struct WorkItem {
    parent_path: String,
    dependencies: BTreeMap<String, String>,
    peers: BTreeMap<String, String>,
}

#[derive(Debug)]
struct Resolved {
    parent_path: String,
    name: String,
    record: PackumentVersion,
}

/// Resolve `root_deps` into a tree of install paths.
///
/// Dependencies that cannot be fetched or resolved are logged and skipped
/// along with their subtree. Returns the lock entries keyed by install path
/// (the root entry is not included).
pub async fn resolve_tree<S>(
    ctx: &PkgContext,
    root_deps: BTreeMap<String, String>,
    progress: &ProgressReporter,
    sink: &mut S,
) -> BTreeMap<String, LockDependency>
where
    S: PlacementSink + Send,
{
    let mut installed: BTreeMap<String, String> = BTreeMap::new();
    let mut packages: BTreeMap<String, LockDependency> = BTreeMap::new();

    let mut level = vec![WorkItem {
        dependencies: root_deps,
        ..WorkItem::default()
    }];
    let mut depth = 0;

    while !level.is_empty() {
        if depth >= MAX_DEPTH {
            warn!(depth, pending = level.len(), "Maximum resolution depth reached");
            break;
        }

        let jobs: Vec<(String, String, String)> = level
            .into_iter()
            .flat_map(|item| {
                let deps = with_unsatisfied_peers(&item, &installed);
                let parent = item.parent_path;
                deps.into_iter()
                    .map(move |(name, range)| (parent.clone(), name, range))
            })
            .collect();

        debug!(depth, count = jobs.len(), "Resolving level");

        let mut resolved: Vec<Resolved> = stream::iter(jobs)
            .map(|(parent_path, name, range)| resolve_one(ctx, progress, parent_path, name, range))
            .buffer_unordered(ctx.max_concurrent())
            .filter_map(future::ready)
            .collect()
            .await;

        resolved.sort_by(|a, b| {
            a.parent_path
                .cmp(&b.parent_path)
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut next = Vec::new();
        for item in resolved {
            let Some(path) =
                choose_path(&installed, &item.parent_path, &item.name, &item.record.version)
            else {
                debug!(name = %item.name, version = %item.record.version, "Already satisfied");
                continue;
            };

            let entry = lock_entry(&item.record);
            debug!(name = %item.name, version = %entry.version, path = %path, "Placed");

            installed.insert(path.clone(), entry.version.clone());
            sink.placed(&path, &item.name, &entry);
            packages.insert(path.clone(), entry);

            next.push(WorkItem {
                parent_path: path,
                dependencies: item.record.dependencies,
                peers: item.record.peer_dependencies,
            });
        }

        sink.level_done().await;

        level = next;
        depth += 1;
    }

    packages
}

async fn resolve_one(
    ctx: &PkgContext,
    progress: &ProgressReporter,
    parent_path: String,
    name: String,
    range: String,
) -> Option<Resolved> {
    if let Err(e) = validate_package_name(&name) {
        warn!(name = %name, parent = %parent_path, error = %e, "Skipping dependency: invalid name");
        return None;
    }

    progress.report(Progress::stage(Stage::Resolving).with_name(name.as_str()));

    let packument = match ctx.packument(&name).await {
        Ok(packument) => packument,
        Err(e) => {
            warn!(name = %name, error = %e, "Skipping dependency: metadata unavailable");
            return None;
        }
    };

    match resolve_version(&packument, &range) {
        Ok(record) => Some(Resolved {
            parent_path,
            name,
            record: record.clone(),
        }),
        Err(e) => {
            warn!(name = %name, range = %range, error = %e, "Skipping dependency: no matching version");
            None
        }
    }
}

/// Dependencies of `item`, plus every peer that no enclosing level already
/// satisfies. An explicit dependency wins over a peer of the same name.
fn with_unsatisfied_peers(
    item: &WorkItem,
    installed: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut deps = item.dependencies.clone();
    for (peer, range) in &item.peers {
        if deps.contains_key(peer) {
            continue;
        }
        if peer_satisfied(installed, &item.parent_path, peer, range) {
            debug!(peer = %peer, range = %range, "Peer already satisfied");
            continue;
        }
        deps.insert(peer.clone(), range.clone());
    }
    deps
}

/// Whether `<ancestor>/node_modules/<peer>` satisfies `range` for `from` or
/// any path enclosing it, up to and including the root.
fn peer_satisfied(
    installed: &BTreeMap<String, String>,
    from: &str,
    peer: &str,
    range: &str,
) -> bool {
    let mut current = Some(from);
    while let Some(path) = current {
        if let Some(version) = installed.get(&join_install_path(path, peer)) {
            if version_satisfies(version, range) {
                return true;
            }
        }
        current = parent_install_path(path);
    }
    false
}

/// Where `name@version` requested by `parent` goes, or `None` if an
/// existing placement already provides it.
fn choose_path(
    installed: &BTreeMap<String, String>,
    parent: &str,
    name: &str,
    version: &str,
) -> Option<String> {
    let root_path = join_install_path("", name);
    match installed.get(&root_path) {
        None => Some(root_path),
        Some(existing) if existing == version => None,
        Some(_) if parent.is_empty() => Some(root_path),
        Some(_) => {
            let nested = join_install_path(parent, name);
            if installed.get(&nested).is_some_and(|v| v == version) {
                None
            } else {
                Some(nested)
            }
        }
    }
}

fn lock_entry(record: &PackumentVersion) -> LockDependency {
    LockDependency {
        version: record.version.clone(),
        resolved: record.dist.tarball.clone(),
        integrity: record.integrity().to_string(),
        dependencies: record.dependencies.clone(),
        peer_dependencies: record.peer_dependencies.clone(),
        license: record.license_string(),
        engines: record.engines_map(),
        ..LockDependency::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::registry::Dist;

    fn installed(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(p, v)| ((*p).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_choose_path_hoists_to_root() {
        let state = installed(&[]);
        assert_eq!(
            choose_path(&state, "node_modules/a", "c", "1.0.0"),
            Some("node_modules/c".to_string())
        );
    }

    #[test]
    fn test_choose_path_dedupes() {
        let state = installed(&[("node_modules/c", "1.0.0")]);
        assert_eq!(choose_path(&state, "node_modules/a", "c", "1.0.0"), None);
    }

    #[test]
    fn test_choose_path_nests_on_conflict() {
        let state = installed(&[("node_modules/c", "2.0.0")]);
        assert_eq!(
            choose_path(&state, "node_modules/a", "c", "1.0.0"),
            Some("node_modules/a/node_modules/c".to_string())
        );
    }

    #[test]
    fn test_choose_path_root_request_overwrites() {
        let state = installed(&[("node_modules/c", "2.0.0")]);
        assert_eq!(
            choose_path(&state, "", "c", "1.0.0"),
            Some("node_modules/c".to_string())
        );
    }

    #[test]
    fn test_choose_path_nested_already_present() {
        let state = installed(&[
            ("node_modules/c", "2.0.0"),
            ("node_modules/a/node_modules/c", "1.0.0"),
        ]);
        assert_eq!(choose_path(&state, "node_modules/a", "c", "1.0.0"), None);
    }

    #[test]
    fn test_peer_satisfied_walks_up() {
        let state = installed(&[("node_modules/react", "18.2.0")]);
        assert!(peer_satisfied(
            &state,
            "node_modules/a/node_modules/b",
            "react",
            "^18.0.0"
        ));
        assert!(!peer_satisfied(&state, "node_modules/a", "react", "^17.0.0"));
        assert!(!peer_satisfied(&state, "node_modules/a", "vue", "*"));
    }

    #[test]
    fn test_explicit_dependency_beats_peer() {
        let mut item = WorkItem {
            parent_path: "node_modules/a".to_string(),
            ..WorkItem::default()
        };
        item.dependencies
            .insert("react".to_string(), "18.2.0".to_string());
        item.peers.insert("react".to_string(), "^17".to_string());
        item.peers.insert("react-dom".to_string(), "^17".to_string());

        let deps = with_unsatisfied_peers(&item, &installed(&[]));
        assert_eq!(deps["react"], "18.2.0");
        assert_eq!(deps["react-dom"], "^17");
    }

    #[test]
    fn test_lock_entry_from_record() {
        let record = PackumentVersion {
            name: "a".to_string(),
            version: "1.0.0".to_string(),
            dist: Dist {
                tarball: "http://r/a/-/a-1.0.0.tgz".to_string(),
                shasum: "abc".to_string(),
                integrity: None,
            },
            ..PackumentVersion::default()
        };
        let entry = lock_entry(&record);
        assert_eq!(entry.version, "1.0.0");
        assert_eq!(entry.resolved, "http://r/a/-/a-1.0.0.tgz");
        assert_eq!(entry.integrity, "abc");
        assert!(!entry.peer);
    }
}
