//! Registry metadata: packument types, the `Registry` trait the collector fetches through,
//! an HTTP implementation (npm registry protocol) and an in-memory one.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{ResolveError, Result};

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// Distribution info for one published version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    pub tarball: String,
    #[serde(default)]
    pub shasum: String,
}

/// The part of a version's package.json the resolver needs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    pub dist: Dist,
}

/// version -> manifest for one package.
pub type Packument = BTreeMap<String, VersionManifest>;

/// Source of registry metadata. Failures are fatal to the branch that asked.
pub trait Registry: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Arc<Packument>>;
}

/// Scoped: @scope/pkg -> @scope%2Fpkg
pub fn encoded_package_path(package: &str) -> String {
    if package.starts_with('@') {
        package.replace('/', "%2F")
    } else {
        package.to_string()
    }
}

/// Build the conventional tarball URL for a package version.
/// Scoped: @scope/pkg -> <registry>/@scope%2Fpkg/-/pkg-1.0.0.tgz
pub fn tarball_url(registry: &str, name: &str, version: &str) -> String {
    let tarball_name = if name.starts_with('@') {
        name.rsplit('/').next().unwrap_or(name)
    } else {
        name
    };
    format!(
        "{}/{}/-/{}-{}.tgz",
        registry.trim_end_matches('/'),
        encoded_package_path(name),
        tarball_name,
        version
    )
}

#[derive(Deserialize)]
struct RawPackument {
    #[serde(default)]
    versions: BTreeMap<String, VersionManifest>,
}

/// Parse a registry packument document, keeping only `versions`.
pub fn parse_packument(package: &str, body: &[u8]) -> Result<Packument> {
    let raw: RawPackument =
        serde_json::from_slice(body).map_err(|e| ResolveError::registry(package, e))?;
    Ok(raw.versions)
}

/// Wraps a registry so each package is fetched at most once per instance.
/// Two workers asking for the same unseen name at once may both fetch; the first
/// stored result wins.
pub struct Memoized<R> {
    inner: R,
    memo: DashMap<String, Arc<Packument>>,
}

impl<R: Registry> Memoized<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            memo: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: Registry> Registry for Memoized<R> {
    fn resolve(&self, name: &str) -> Result<Arc<Packument>> {
        if let Some(hit) = self.memo.get(name) {
            return Ok(Arc::clone(hit.value()));
        }
        let fetched = self.inner.resolve(name)?;
        let stored = self.memo.entry(name.to_string()).or_insert(fetched);
        Ok(Arc::clone(stored.value()))
    }
}

/// One packument GET per call against the configured registries.
#[cfg(feature = "http-ureq")]
struct NpmFetcher {
    config: crate::config::Config,
}

#[cfg(feature = "http-ureq")]
impl Registry for NpmFetcher {
    fn resolve(&self, package: &str) -> Result<Arc<Packument>> {
        let url = format!(
            "{}/{}",
            self.config.registry_for(package).trim_end_matches('/'),
            encoded_package_path(package)
        );
        let body = crate::http_client::get_with_accept(
            &url,
            Some("application/vnd.npm.install-v1+json"),
        )
        .map_err(|e| ResolveError::registry(package, e))?;
        let versions = parse_packument(package, &body)?;
        if versions.is_empty() {
            return Err(ResolveError::registry(package, "packument has no versions"));
        }
        Ok(Arc::new(versions))
    }
}

/// npm-protocol registry over HTTP, memoized per package name.
#[cfg(feature = "http-ureq")]
pub struct HttpRegistry(Memoized<NpmFetcher>);

#[cfg(feature = "http-ureq")]
impl HttpRegistry {
    /// Registry URL and scoped registries taken from the effective config.
    pub fn from_config(config: &crate::config::Config) -> Self {
        HttpRegistry(Memoized::new(NpmFetcher {
            config: config.clone(),
        }))
    }
}

#[cfg(feature = "http-ureq")]
impl Registry for HttpRegistry {
    fn resolve(&self, name: &str) -> Result<Arc<Packument>> {
        self.0.resolve(name)
    }
}

/// In-memory registry for offline fixtures and tests. Counts fetches.
#[derive(Default)]
pub struct MemoryRegistry {
    base_url: String,
    packages: HashMap<String, Arc<Packument>>,
    fetches: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_REGISTRY.to_string(),
            ..Default::default()
        }
    }

    /// Publish `name@version` with the given dependency ranges.
    /// The tarball URL is the conventional one; shasum is derived from `name@version`.
    pub fn publish(&mut self, name: &str, version: &str, dependencies: &[(&str, &str)]) -> &mut Self {
        let shasum = format!("{:x}", Sha1::digest(format!("{}@{}", name, version).as_bytes()));
        let manifest = VersionManifest {
            dependencies: dependencies
                .iter()
                .map(|(n, r)| (n.to_string(), r.to_string()))
                .collect(),
            dist: Dist {
                tarball: tarball_url(&self.base_url, name, version),
                shasum,
            },
        };
        let entry = self
            .packages
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Packument::new()));
        Arc::make_mut(entry).insert(version.to_string(), manifest);
        self
    }

    /// Number of `resolve` calls served so far (including failures).
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl Registry for MemoryRegistry {
    fn resolve(&self, name: &str) -> Result<Arc<Packument>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.packages
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::registry(name, "HTTP 404"))
    }
}
