//! Version resolution using semver.
//!
//! npm ranges are translated into one `VersionReq` per `||` alternative.
//! The `semver` crate already gives partial versions npm's meaning
//! (`=1.2` is `>=1.2.0, <1.3.0`, `<=2` is `<3.0.0`), so the translation
//! mostly normalises syntax: x-ranges, hyphen ranges, spaces between an
//! operator and its version, and bare versions, which npm treats as exact.

use super::error::PkgError;
use super::registry::{Packument, PackumentVersion};
use semver::{Version, VersionReq};

/// Resolve a specifier against a packument.
///
/// # Rules
/// - `""` or `"latest"` returns the record `dist-tags.latest` points at
/// - a valid npm range returns the highest satisfying version
/// - otherwise an exact version key, then a dist-tag, is tried
///
/// # Errors
/// Returns `PKG_VERSION_NOT_FOUND` if nothing satisfies the specifier, or the
/// range parse error if the specifier is neither a range, a version nor a tag.
pub fn resolve_version<'a>(
    packument: &'a Packument,
    specifier: &str,
) -> Result<&'a PackumentVersion, PkgError> {
    let name = if packument.name.is_empty() {
        "unknown"
    } else {
        packument.name.as_str()
    };
    let specifier = specifier.trim();

    if specifier.is_empty() || specifier == "latest" {
        return packument
            .latest()
            .and_then(|latest| packument.versions.get(latest))
            .ok_or_else(|| PkgError::version_not_found(name, "latest"));
    }

    match parse_range(specifier) {
        Ok(reqs) => max_satisfying(packument, &reqs)
            .ok_or_else(|| PkgError::version_not_found(name, specifier)),
        Err(parse_err) => {
            if let Some(record) = packument.versions.get(specifier) {
                return Ok(record);
            }
            if let Some(record) = packument
                .dist_tags
                .get(specifier)
                .and_then(|tagged| packument.versions.get(tagged))
            {
                return Ok(record);
            }
            Err(parse_err)
        }
    }
}

fn max_satisfying<'a>(packument: &'a Packument, reqs: &[VersionReq]) -> Option<&'a PackumentVersion> {
    packument
        .versions
        .iter()
        .filter_map(|(key, record)| Version::parse(key).ok().map(|v| (v, record)))
        .filter(|(v, _)| reqs.iter().any(|req| req.matches(v)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, record)| record)
}

/// Check whether a concrete version satisfies an npm range.
///
/// An unparseable range only matches the identical version string.
#[must_use]
pub fn version_satisfies(version: &str, range: &str) -> bool {
    let Ok(reqs) = parse_range(range) else {
        return version.trim() == range.trim();
    };
    let Ok(parsed) = Version::parse(version.trim().trim_start_matches('v')) else {
        return false;
    };
    reqs.iter().any(|req| req.matches(&parsed))
}

/// Parse an npm range into its `||` alternatives.
///
/// # Errors
/// Returns `PKG_RANGE_INVALID` if any alternative is malformed.
pub fn parse_range(range: &str) -> Result<Vec<VersionReq>, PkgError> {
    range.split("||").map(|alt| parse_alternative(alt, range)).collect()
}

fn parse_alternative(alt: &str, full: &str) -> Result<VersionReq, PkgError> {
    let tokens = merge_operator_tokens(alt.split_whitespace());

    let comparators: Vec<String> = match tokens.as_slice() {
        [] => return Ok(VersionReq::STAR),
        // "1.2 - 2" => ">=1.2, <=2"
        [low, dash, high] if dash == "-" => vec![
            convert_comparator(&format!(">={low}"), full)?,
            convert_comparator(&format!("<={high}"), full)?,
        ],
        _ => tokens
            .iter()
            .map(|token| convert_comparator(token, full))
            .collect::<Result<_, _>>()?,
    };

    let comparators: Vec<String> = comparators.into_iter().filter(|c| c != "*").collect();
    if comparators.is_empty() {
        return Ok(VersionReq::STAR);
    }

    VersionReq::parse(&comparators.join(", "))
        .map_err(|e| PkgError::range_invalid(format!("Invalid version range '{full}': {e}")))
}

/// Glue a dangling operator (`>=`, `<`, ...) onto the version that follows.
fn merge_operator_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    let mut pending = String::new();

    for token in tokens {
        if token.chars().all(is_operator_char) {
            pending.push_str(token);
            continue;
        }
        merged.push(format!("{pending}{token}"));
        pending.clear();
    }

    if !pending.is_empty() {
        merged.push(pending);
    }
    merged
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '~' | '^')
}

/// Convert one npm comparator into `semver` syntax.
fn convert_comparator(token: &str, full: &str) -> Result<String, PkgError> {
    let split = token.find(|c: char| !is_operator_char(c)).unwrap_or(token.len());
    let (op, rest) = token.split_at(split);
    let op = match op {
        "~>" => "~",
        "" | "==" => "=",
        other => other,
    };
    if !matches!(op, "=" | "^" | "~" | ">" | ">=" | "<" | "<=") {
        return Err(PkgError::range_invalid(format!(
            "Invalid version range '{full}': unknown operator '{op}'"
        )));
    }

    if rest.is_empty() && op != "=" {
        return Err(PkgError::range_invalid(format!(
            "Invalid version range '{full}': operator '{op}' has no version"
        )));
    }

    let rest = rest.trim_start_matches(['v', 'V']);

    if Version::parse(rest).is_ok() {
        return Ok(format!("{op}{rest}"));
    }

    // Partial or x-range: keep the numeric parts before the first wildcard
    let mut parts = Vec::new();
    for part in rest.split('.') {
        if matches!(part, "" | "x" | "X" | "*") {
            break;
        }
        if !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(PkgError::range_invalid(format!(
                "Invalid version range '{full}': bad version '{rest}'"
            )));
        }
        parts.push(part);
    }

    if parts.len() > 3 {
        return Err(PkgError::range_invalid(format!(
            "Invalid version range '{full}': too many version parts in '{rest}'"
        )));
    }

    if parts.is_empty() {
        return Ok(match op {
            // nothing is greater or smaller than "any version"
            ">" | "<" => "<0.0.0-0".to_string(),
            _ => "*".to_string(),
        });
    }

    Ok(format!("{op}{}", parts.join(".")))
}
