//! Mock npm registry shared by the integration tests.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use stackpm_core::pkg::{PkgConfig, PkgContext, Progress, ProgressReporter, Stage};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tar::Builder;
use tempfile::TempDir;

/// One published version served by the mock registry.
#[derive(Debug, Clone)]
pub struct MockPackage {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<(String, String)>,
    pub peer_dependencies: Vec<(String, String)>,
    /// Serve a 500 instead of the tarball.
    pub broken: bool,
    /// Serve the packument with `Content-Encoding: gzip`.
    pub gzipped: bool,
    /// Serve a packument body that is not JSON.
    pub malformed: bool,
}

impl MockPackage {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            dependencies: Vec::new(),
            peer_dependencies: Vec::new(),
            broken: false,
            gzipped: false,
            malformed: false,
        }
    }

    pub fn dep(mut self, name: &str, range: &str) -> Self {
        self.dependencies.push((name.to_string(), range.to_string()));
        self
    }

    pub fn peer(mut self, name: &str, range: &str) -> Self {
        self.peer_dependencies
            .push((name.to_string(), range.to_string()));
        self
    }

    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub fn gzipped(mut self) -> Self {
        self.gzipped = true;
        self
    }

    pub fn malformed(mut self) -> Self {
        self.malformed = true;
        self
    }

    fn tarball_file(&self) -> String {
        format!("{}-{}.tgz", self.name.replace('/', "-"), self.version)
    }

    fn integrity(&self) -> String {
        format!("sha512-{}-{}", self.name.replace('/', "-"), self.version)
    }
}

struct RegistryState {
    base_url: String,
    packages: Vec<MockPackage>,
    downloads: AtomicUsize,
    audits: Mutex<Vec<serde_json::Value>>,
    /// Added to every packument and tarball response.
    delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Counts one packument or tarball request as in flight until dropped.
struct InFlight<'a>(&'a RegistryState);

impl<'a> InFlight<'a> {
    async fn enter(state: &'a RegistryState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !state.delay.is_zero() {
            tokio::time::sleep(state.delay).await;
        }
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a running mock registry.
pub struct MockRegistry {
    pub url: String,
    state: Arc<RegistryState>,
}

impl MockRegistry {
    /// Start serving `packages` on an ephemeral port.
    pub async fn start(packages: Vec<MockPackage>) -> Self {
        Self::start_with_delay(packages, Duration::ZERO).await
    }

    /// Start serving `packages`, holding each packument and tarball
    /// response for `delay`.
    pub async fn start_with_delay(packages: Vec<MockPackage>, delay: Duration) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{addr}");

        let state = Arc::new(RegistryState {
            base_url: base_url.clone(),
            packages,
            downloads: AtomicUsize::new(0),
            audits: Mutex::new(Vec::new()),
            delay,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/-/npm/v1/security/advisories/bulk", post(handle_audit))
            .route("/tarballs/:file", get(handle_tarball))
            .route("/:name", get(handle_packument))
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: base_url,
            state,
        }
    }

    /// Number of tarballs served so far.
    pub fn downloads(&self) -> usize {
        self.state.downloads.load(Ordering::SeqCst)
    }

    /// Bodies of every audit request received.
    pub fn audits(&self) -> Vec<serde_json::Value> {
        self.state.audits.lock().unwrap().clone()
    }

    /// Most packument and tarball requests ever served at once.
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    /// A session pointed at this registry.
    pub fn context(&self) -> PkgContext {
        self.context_with_concurrency(4)
    }

    /// A session pointed at this registry with its own request budget.
    pub fn context_with_concurrency(&self, max_concurrent: usize) -> PkgContext {
        let config = PkgConfig::default()
            .with_registry_url(self.url.clone())
            .with_max_concurrent(max_concurrent);
        PkgContext::new(&config).unwrap()
    }
}

async fn handle_packument(
    Path(name): Path<String>,
    State(state): State<Arc<RegistryState>>,
) -> Response {
    let _in_flight = InFlight::enter(&state).await;

    let mut records: Vec<&MockPackage> = state.packages.iter().filter(|p| p.name == name).collect();
    if records.is_empty() {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }
    if records.iter().any(|p| p.malformed) {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            "{not json",
        )
            .into_response();
    }
    records.sort_by_key(|p| semver::Version::parse(&p.version).unwrap());

    let versions: serde_json::Map<String, serde_json::Value> = records
        .iter()
        .map(|p| {
            let deps: BTreeMap<&str, &str> = p
                .dependencies
                .iter()
                .map(|(n, r)| (n.as_str(), r.as_str()))
                .collect();
            let peers: BTreeMap<&str, &str> = p
                .peer_dependencies
                .iter()
                .map(|(n, r)| (n.as_str(), r.as_str()))
                .collect();
            (
                p.version.clone(),
                serde_json::json!({
                    "name": p.name,
                    "version": p.version,
                    "dependencies": deps,
                    "peerDependencies": peers,
                    "license": "MIT",
                    "engines": { "node": ">=14" },
                    "dist": {
                        "tarball": format!("{}/tarballs/{}", state.base_url, p.tarball_file()),
                        "shasum": "0000",
                        "integrity": p.integrity(),
                    }
                }),
            )
        })
        .collect();

    let latest = records.last().map(|p| p.version.clone()).unwrap_or_default();
    let packument = serde_json::json!({
        "name": name,
        "dist-tags": { "latest": latest },
        "versions": versions,
    });

    let body = serde_json::to_vec(&packument).unwrap();
    if records.iter().any(|p| p.gzipped) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body).unwrap();
        return (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CONTENT_ENCODING, "gzip"),
            ],
            encoder.finish().unwrap(),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

async fn handle_tarball(
    Path(file): Path<String>,
    State(state): State<Arc<RegistryState>>,
) -> Response {
    let _in_flight = InFlight::enter(&state).await;

    let Some(package) = state.packages.iter().find(|p| p.tarball_file() == file) else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    if package.broken {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }

    state.downloads.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from(create_test_tarball(&package.name, &package.version)),
    )
        .into_response()
}

async fn handle_audit(State(state): State<Arc<RegistryState>>, body: Bytes) -> Response {
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
    state.audits.lock().unwrap().push(payload);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"a":[{"id":1,"severity":"high","title":"Prototype pollution"}]}"#,
    )
        .into_response()
}

/// Create a test tarball with a package.json and an index.js.
pub fn create_test_tarball(name: &str, version: &str) -> Vec<u8> {
    let pkg_json = format!(r#"{{"name":"{name}","version":"{version}","main":"index.js"}}"#);
    let index_js = b"module.exports = 42;";

    let mut tar_bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut tar_bytes);

        let mut header = tar::Header::new_gnu();
        header.set_path("package/package.json").unwrap();
        header.set_size(pkg_json.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, pkg_json.as_bytes()).unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_path("package/index.js").unwrap();
        header.set_size(index_js.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &index_js[..]).unwrap();

        builder.finish().unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

/// Create a test project with package.json.
pub fn create_test_project(deps: &[(&str, &str)], dev_deps: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();

    let mut package_json = serde_json::json!({
        "name": "test-project",
        "version": "1.0.0"
    });

    if !deps.is_empty() {
        let deps_obj: serde_json::Map<String, serde_json::Value> = deps
            .iter()
            .map(|(name, range)| ((*name).to_string(), serde_json::json!(range)))
            .collect();
        package_json["dependencies"] = serde_json::Value::Object(deps_obj);
    }

    if !dev_deps.is_empty() {
        let dev_deps_obj: serde_json::Map<String, serde_json::Value> = dev_deps
            .iter()
            .map(|(name, range)| ((*name).to_string(), serde_json::json!(range)))
            .collect();
        package_json["devDependencies"] = serde_json::Value::Object(dev_deps_obj);
    }

    std::fs::write(
        dir.path().join("package.json"),
        serde_json::to_string_pretty(&package_json).unwrap(),
    )
    .unwrap();

    dir
}

/// Progress reporter that records every event.
pub fn recording_reporter() -> (ProgressReporter, Arc<Mutex<Vec<Progress>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let reporter = ProgressReporter::new(move |p| sink.lock().unwrap().push(p));
    (reporter, events)
}

/// Stages of the recorded events, in order.
pub fn stages(events: &Arc<Mutex<Vec<Progress>>>) -> Vec<Stage> {
    events.lock().unwrap().iter().map(|p| p.stage).collect()
}

/// Parse the project's lockfile.
pub fn read_lock(dir: &std::path::Path) -> serde_json::Value {
    let content = std::fs::read_to_string(dir.join("package-lock.json")).unwrap();
    serde_json::from_str(&content).unwrap()
}

/// Parse the project's manifest.
pub fn read_manifest(dir: &std::path::Path) -> serde_json::Value {
    let content = std::fs::read_to_string(dir.join("package.json")).unwrap();
    serde_json::from_str(&content).unwrap()
}
