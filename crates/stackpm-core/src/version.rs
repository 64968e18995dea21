use std::fmt::Write;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `lockfileVersion` this build reads and writes.
pub const LOCKFILE_VERSION: u32 = crate::pkg::LOCKFILE_VERSION;

/// Returns a formatted version string including build metadata if available.
#[must_use]
pub fn version_string() -> String {
    let mut s = format!("stackpm {VERSION}");

    if let Some(hash) = option_env!("STACKPM_BUILD_GIT_HASH") {
        let _ = write!(s, " ({hash})");
    }

    s
}
