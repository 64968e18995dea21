//! Package spec parsing.
//!
//! Parses the specifiers accepted by `install`:
//! - `react`
//! - `react@18.2.0`
//! - `react@^18.0.0`
//! - `react@next`
//! - `@types/node`
//! - `@types/node@^20`

use super::error::PkgError;

/// Specifier used when none is given.
pub const DEFAULT_SPECIFIER: &str = "latest";

/// A parsed package specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Full package name (e.g., "@scope/name" or "name").
    pub name: String,
    /// Range, exact version or dist-tag (None means latest).
    pub range: Option<String>,
}

impl PackageSpec {
    /// Parse a package specification string.
    ///
    /// The version part starts at the last `@` that is not the leading scope
    /// marker.
    ///
    /// # Errors
    /// Returns an error if the spec is empty or the name is malformed.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(PkgError::spec_invalid("Empty package spec"));
        }

        let (name, range) = match input.rfind('@') {
            Some(at) if at > 0 => {
                let range = &input[at + 1..];
                if range.is_empty() {
                    return Err(PkgError::spec_invalid(format!(
                        "Invalid package spec: empty version range in '{input}'"
                    )));
                }
                (&input[..at], Some(range.to_string()))
            }
            _ => (input, None),
        };

        validate_name(name, input)?;

        Ok(Self {
            name: name.to_string(),
            range,
        })
    }

    /// The specifier to resolve, defaulting to `latest`.
    #[must_use]
    pub fn specifier(&self) -> &str {
        self.range.as_deref().unwrap_or(DEFAULT_SPECIFIER)
    }

    /// Check if this is a scoped package.
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.name.starts_with('@')
    }
}

/// Check that `name` is a plain `name` or `@scope/name` usable as a single
/// `node_modules` entry.
///
/// # Errors
/// Returns `PKG_SPEC_INVALID` for empty segments, `.`/`..`, extra `/` or
/// characters outside the npm name alphabet.
pub fn validate_package_name(name: &str) -> Result<(), PkgError> {
    validate_name(name, name)
}

fn validate_name(name: &str, input: &str) -> Result<(), PkgError> {
    let bare = if let Some(scoped) = name.strip_prefix('@') {
        let Some((scope, pkg)) = scoped.split_once('/') else {
            return Err(PkgError::spec_invalid(format!(
                "Invalid scoped package: missing '/' in '{input}'"
            )));
        };
        if scope.is_empty() {
            return Err(PkgError::spec_invalid(format!(
                "Invalid scoped package: empty scope in '{input}'"
            )));
        }
        check_segment(scope)?;
        pkg
    } else {
        name
    };

    if bare.is_empty() {
        return Err(PkgError::spec_invalid(format!(
            "Invalid package spec: empty name in '{input}'"
        )));
    }

    check_segment(bare)
}

fn check_segment(segment: &str) -> Result<(), PkgError> {
    if segment == "." || segment == ".." {
        return Err(PkgError::spec_invalid(format!(
            "Invalid package name segment '{segment}'"
        )));
    }
    for c in segment.chars() {
        if !c.is_alphanumeric() && !matches!(c, '-' | '_' | '.' | '~') {
            return Err(PkgError::spec_invalid(format!(
                "Invalid character '{c}' in package name '{segment}'"
            )));
        }
    }
    Ok(())
}
