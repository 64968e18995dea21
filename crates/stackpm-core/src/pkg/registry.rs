//! npm registry client and packument types.

use super::error::PkgError;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Path of the bulk advisory endpoint, relative to the registry root.
pub const BULK_ADVISORY_PATH: &str = "-/npm/v1/security/advisories/bulk";

/// Package metadata document ("packument") as served by the registry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Packument {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "dist-tags", default, deserialize_with = "string_map")]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, PackumentVersion>,
}

impl Packument {
    /// Version string the `latest` dist-tag points at.
    #[must_use]
    pub fn latest(&self) -> Option<&str> {
        self.dist_tags.get("latest").map(String::as_str)
    }
}

/// One published version inside a packument.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackumentVersion {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "string_map")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "string_map")]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dist: Dist,
    #[serde(default)]
    pub license: Option<LicenseField>,
    #[serde(default)]
    pub engines: Option<EnginesField>,
}

impl PackumentVersion {
    /// Integrity string used as the freshness key, falling back to the shasum.
    #[must_use]
    pub fn integrity(&self) -> &str {
        match self.dist.integrity.as_deref() {
            Some(integrity) if !integrity.is_empty() => integrity,
            _ => &self.dist.shasum,
        }
    }

    /// License normalised to a single string (empty if absent).
    #[must_use]
    pub fn license_string(&self) -> String {
        self.license
            .as_ref()
            .map(LicenseField::normalize)
            .unwrap_or_default()
    }

    /// Engines normalised to a `name -> range` map.
    #[must_use]
    pub fn engines_map(&self) -> BTreeMap<String, String> {
        self.engines
            .as_ref()
            .map(EnginesField::normalize)
            .unwrap_or_default()
    }
}

/// Tarball location and checksums.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Dist {
    #[serde(default)]
    pub tarball: String,
    #[serde(default)]
    pub shasum: String,
    #[serde(default)]
    pub integrity: Option<String>,
}

/// The shapes a `license` field shows up in across the registry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LicenseField {
    /// `"MIT"`
    Text(String),
    /// `{ "type": "MIT", "url": "..." }`
    Object {
        #[serde(rename = "type")]
        kind: String,
    },
    /// `[{ "type": "MIT" }, { "type": "Apache-2.0" }]`
    List(Vec<LicenseField>),
    /// Anything else is carried but ignored.
    Other(Value),
}

impl LicenseField {
    /// Collapse to the single string stored in the lockfile.
    #[must_use]
    pub fn normalize(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Object { kind } => kind.clone(),
            Self::List(items) => items
                .iter()
                .map(Self::normalize)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" OR "),
            Self::Other(_) => String::new(),
        }
    }
}

/// The shapes an `engines` field shows up in across the registry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EnginesField {
    /// `{ "node": ">=14" }`
    Map(BTreeMap<String, String>),
    /// `["node >= 0.8"]`
    List(Vec<String>),
    /// `"node >= 0.8"`
    Text(String),
    Other(Value),
}

impl EnginesField {
    /// Collapse to the `name -> range` map stored in the lockfile.
    #[must_use]
    pub fn normalize(&self) -> BTreeMap<String, String> {
        match self {
            Self::Map(map) => map.clone(),
            Self::List(items) => items.iter().filter_map(|s| split_engine(s)).collect(),
            Self::Text(text) => split_engine(text).into_iter().collect(),
            Self::Other(_) => BTreeMap::new(),
        }
    }
}

fn split_engine(entry: &str) -> Option<(String, String)> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    match entry.split_once(char::is_whitespace) {
        Some((name, range)) => Some((name.to_string(), range.trim().to_string())),
        None => Some((entry.to_string(), "*".to_string())),
    }
}

/// Accept `null`, objects with non-string values, or garbage as a string map.
pub(crate) fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Object(obj) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(obj
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            _ => None,
        })
        .collect())
}

/// Registry client for fetching package metadata.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

impl RegistryClient {
    /// Create a new registry client with the given base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        // Url::join replaces the last segment unless the base ends in '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };

        let base_url = Url::parse(&normalized)
            .map_err(|e| PkgError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("stackpm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PkgError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { base_url, http })
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the HTTP client (for reuse in tarball downloads).
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Fetch the packument for a package.
    ///
    /// # Errors
    /// Returns an error if the request fails, the package is not found, or
    /// the body is not a valid packument.
    pub async fn fetch_packument(&self, name: &str) -> Result<Packument, PkgError> {
        let encoded_name = if name.starts_with('@') {
            name.replace('/', "%2F")
        } else {
            name.to_string()
        };

        let url = self
            .base_url
            .join(&encoded_name)
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{name}': {e}")))?;

        debug!(name, url = %url, "Fetching packument");

        let response = self
            .http
            .get(url.as_str())
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PkgError::not_found(name));
        }

        if !response.status().is_success() {
            return Err(PkgError::registry(format!(
                "Registry returned status {} for '{name}'",
                response.status()
            )));
        }

        let body = response.bytes().await?;
        let packument: Packument = serde_json::from_slice(&body)?;
        Ok(packument)
    }

    /// POST a bulk advisory query and return the decoded report.
    ///
    /// # Errors
    /// Returns an error if the request fails or the registry rejects it.
    pub async fn post_bulk_advisories(&self, payload: &Value) -> Result<Value, PkgError> {
        let url = self
            .base_url
            .join(BULK_ADVISORY_PATH)
            .map_err(|e| PkgError::audit_failed(format!("Failed to build audit URL: {e}")))?;

        let body = serde_json::to_vec(payload)?;

        let response = self
            .http
            .post(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| PkgError::audit_failed(format!("Failed to perform audit: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PkgError::audit_failed(format!(
                "Audit failed with status {status}: {text}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PkgError::audit_failed(format!("Failed to read audit report: {e}")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| PkgError::audit_failed(format!("Failed to parse audit report: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> Packument {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_parse_packument() {
        let packument = parse(serde_json::json!({
            "name": "react",
            "dist-tags": { "latest": "18.2.0", "next": "19.0.0-rc.0" },
            "versions": {
                "18.2.0": {
                    "name": "react",
                    "version": "18.2.0",
                    "dependencies": { "loose-envify": "^1.1.0" },
                    "dist": {
                        "tarball": "https://registry.npmjs.org/react/-/react-18.2.0.tgz",
                        "shasum": "abc123",
                        "integrity": "sha512-xyz"
                    },
                    "license": "MIT",
                    "engines": { "node": ">=0.10.0" }
                }
            }
        }));

        assert_eq!(packument.latest(), Some("18.2.0"));
        let v = &packument.versions["18.2.0"];
        assert_eq!(v.dependencies["loose-envify"], "^1.1.0");
        assert_eq!(v.integrity(), "sha512-xyz");
        assert_eq!(v.license_string(), "MIT");
        assert_eq!(v.engines_map()["node"], ">=0.10.0");
    }

    #[test]
    fn test_integrity_falls_back_to_shasum() {
        let v: PackumentVersion = serde_json::from_value(serde_json::json!({
            "version": "1.0.0",
            "dist": { "tarball": "http://x/a.tgz", "shasum": "deadbeef" }
        }))
        .unwrap();
        assert_eq!(v.integrity(), "deadbeef");
    }

    #[test]
    fn test_license_shapes() {
        let object: LicenseField =
            serde_json::from_value(serde_json::json!({ "type": "ISC", "url": "http://x" }))
                .unwrap();
        assert_eq!(object.normalize(), "ISC");

        let list: LicenseField = serde_json::from_value(serde_json::json!([
            { "type": "MIT" },
            { "type": "Apache-2.0" }
        ]))
        .unwrap();
        assert_eq!(list.normalize(), "MIT OR Apache-2.0");

        let odd: LicenseField = serde_json::from_value(serde_json::json!(42)).unwrap();
        assert_eq!(odd.normalize(), "");
    }

    #[test]
    fn test_engines_shapes() {
        let list: EnginesField =
            serde_json::from_value(serde_json::json!(["node >= 0.8", "npm"])).unwrap();
        let map = list.normalize();
        assert_eq!(map["node"], ">= 0.8");
        assert_eq!(map["npm"], "*");

        let text: EnginesField = serde_json::from_value(serde_json::json!("node >=4")).unwrap();
        assert_eq!(text.normalize()["node"], ">=4");
    }

    #[test]
    fn test_tolerates_odd_dependency_maps() {
        let v: PackumentVersion = serde_json::from_value(serde_json::json!({
            "version": "1.0.0",
            "dependencies": null,
            "peerDependencies": { "react": "^18", "weird": 1 }
        }))
        .unwrap();
        assert!(v.dependencies.is_empty());
        assert_eq!(v.peer_dependencies.len(), 1);
    }

    #[test]
    fn test_client_creation() {
        let client = RegistryClient::new(DEFAULT_REGISTRY);
        assert!(client.is_ok());
    }

    #[test]
    fn test_client_adds_trailing_slash() {
        let client = RegistryClient::new("http://127.0.0.1:4873/npm").unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:4873/npm/");
    }

    #[test]
    fn test_client_invalid_url() {
        let client = RegistryClient::new("not-a-url");
        assert!(client.is_err());
    }
}
