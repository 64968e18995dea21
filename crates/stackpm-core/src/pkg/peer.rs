//! Marks lock entries that were installed to satisfy a peer dependency.

use super::lockfile::{join_install_path, parent_install_path, LockDependency};
use std::collections::BTreeMap;

/// Set `peer = true` on every entry some other entry declares as a peer.
///
/// For each declared peer the nearest `<ancestor>/node_modules/<peer>`,
/// starting at the declaring entry's own path, is the one marked.
pub fn mark_peers(packages: &mut BTreeMap<String, LockDependency>) {
    let view: &BTreeMap<String, LockDependency> = packages;
    let hits: Vec<String> = view
        .iter()
        .flat_map(|(path, entry)| {
            entry
                .peer_dependencies
                .keys()
                .filter_map(move |peer| nearest_install(view, path, peer))
        })
        .collect();

    for hit in hits {
        if let Some(entry) = packages.get_mut(&hit) {
            entry.peer = true;
        }
    }
}

fn nearest_install(
    packages: &BTreeMap<String, LockDependency>,
    from: &str,
    name: &str,
) -> Option<String> {
    let mut current = Some(from);
    while let Some(path) = current {
        let candidate = join_install_path(path, name);
        if packages.contains_key(&candidate) {
            return Some(candidate);
        }
        current = parent_install_path(path);
    }
    None
}
