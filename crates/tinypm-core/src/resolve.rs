//! Resolution entry point: seeds the collector with the root manifest's direct
//! dependencies, writes pinned ranges back, persists the lockfile and hands out the
//! install plan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::collector::{default_concurrency, Collector, HoistedEntry, NestedRequest};
use crate::error::Result;
use crate::lockfile::{LockBackend, LockStore};
use crate::manifest::{DepKind, RootManifest};
use crate::registry::Registry;

/// Everything the installer has to materialize.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InstallPlan {
    pub hoisted: BTreeMap<String, HoistedEntry>,
    pub nested: Vec<NestedRequest>,
}

/// One directory to fill from one tarball.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallTarget {
    pub name: String,
    pub url: String,
    pub dir: PathBuf,
}

impl InstallPlan {
    pub fn len(&self) -> usize {
        self.hoisted.len() + self.nested.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Install directories under `root`: hoisted entries first, then nested requests.
    pub fn targets(&self, root: &Path) -> Vec<InstallTarget> {
        let node_modules = root.join("node_modules");
        let hoisted = self.hoisted.iter().map(|(name, entry)| InstallTarget {
            name: name.clone(),
            url: entry.url.clone(),
            dir: node_modules.join(name),
        });
        let nested = self.nested.iter().map(|req| InstallTarget {
            name: req.name.clone(),
            url: req.url.clone(),
            dir: node_modules
                .join(&req.parent)
                .join("node_modules")
                .join(&req.name),
        });
        hoisted.chain(nested).collect()
    }
}

#[derive(Clone, Debug)]
pub struct ResolveOptions {
    /// Skip devDependencies.
    pub production: bool,
    /// Concurrent registry lookups.
    pub concurrency: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            production: false,
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Resolution {
    pub plan: InstallPlan,
    /// Direct edges requested without a range, now pinned: (map, name, `^version`).
    pub pinned: Vec<(DepKind, String, String)>,
    /// Tarball URL -> shasum for every locked entry, for download verification.
    pub checksums: BTreeMap<String, String>,
}

/// Resolve the root manifest's dependencies into an install plan.
///
/// On success the manifest has its empty ranges rewritten to `^version` and the lock
/// has been persisted. On any failure nothing is persisted.
pub fn resolve_manifest<R, B>(
    manifest: &mut RootManifest,
    registry: &R,
    lock: &mut LockStore<B>,
    options: &ResolveOptions,
) -> Result<Resolution>
where
    R: Registry + ?Sized,
    B: LockBackend,
{
    let mut kinds: Vec<DepKind> = Vec::new();
    let mut roots: Vec<(String, String)> = Vec::new();
    for (name, range) in manifest.dependencies() {
        kinds.push(DepKind::Prod);
        roots.push((name, range));
    }
    if !options.production {
        for (name, range) in manifest.dev_dependencies() {
            kinds.push(DepKind::Dev);
            roots.push((name, range));
        }
    }

    let collected = Collector::new(registry, lock)
        .concurrency(options.concurrency)
        .collect(&roots)?;

    let mut pinned = Vec::new();
    for ((kind, (name, _)), pin) in kinds.iter().zip(&roots).zip(collected.pins) {
        if let Some(range) = pin {
            manifest.set_range(*kind, name, &range);
            pinned.push((*kind, name.clone(), range));
        }
    }

    lock.persist()?;

    let checksums = lock
        .pending()
        .values()
        .filter(|e| !e.shasum.is_empty())
        .map(|e| (e.url.clone(), e.shasum.clone()))
        .collect();

    Ok(Resolution {
        plan: InstallPlan {
            hoisted: collected.placements.hoisted,
            nested: collected.placements.nested,
        },
        pinned,
        checksums,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfile::MemoryLockBackend;
    use crate::registry::MemoryRegistry;

    fn opts() -> ResolveOptions {
        ResolveOptions {
            production: false,
            concurrency: 1,
        }
    }

    #[test]
    fn test_targets_layout() {
        let mut plan = InstallPlan::default();
        plan.hoisted.insert(
            "b".into(),
            HoistedEntry {
                url: "https://r/b-2.0.0.tgz".into(),
                version: "2.0.0".into(),
            },
        );
        plan.nested.push(NestedRequest {
            name: "b".into(),
            url: "https://r/b-1.0.0.tgz".into(),
            parent: "a/node_modules/c".into(),
        });
        let targets = plan.targets(Path::new("/proj"));
        assert_eq!(plan.len(), 2);
        assert_eq!(targets[0].dir, Path::new("/proj/node_modules/b"));
        assert_eq!(
            targets[1].dir,
            Path::new("/proj/node_modules/a/node_modules/c/node_modules/b")
        );
    }

    #[test]
    fn test_production_skips_dev_dependencies() {
        let mut reg = MemoryRegistry::new();
        reg.publish("a", "1.0.0", &[]).publish("mocha", "10.0.0", &[]);
        let mut manifest = RootManifest::parse(
            Path::new("package.json"),
            r#"{"dependencies":{"a":"^1.0.0"},"devDependencies":{"mocha":"^10.0.0"}}"#,
        )
        .unwrap();
        let mut lock = LockStore::new(MemoryLockBackend::default());
        let options = ResolveOptions {
            production: true,
            ..opts()
        };
        let res = resolve_manifest(&mut manifest, &reg, &mut lock, &options).unwrap();
        assert_eq!(res.plan.hoisted.keys().collect::<Vec<_>>(), vec!["a"]);
        assert!(!lock.backend().contents().unwrap().contains("mocha"));
    }

    #[test]
    fn test_dev_pin_is_written_to_dev_map() {
        let mut reg = MemoryRegistry::new();
        reg.publish("mocha", "10.2.0", &[]);
        let mut manifest =
            RootManifest::parse(Path::new("package.json"), r#"{"devDependencies":{"mocha":""}}"#).unwrap();
        let mut lock = LockStore::new(MemoryLockBackend::default());
        let res = resolve_manifest(&mut manifest, &reg, &mut lock, &opts()).unwrap();
        assert_eq!(res.pinned, vec![(DepKind::Dev, "mocha".to_string(), "^10.2.0".to_string())]);
        assert_eq!(manifest.dev_dependencies(), vec![("mocha".to_string(), "^10.2.0".to_string())]);
        assert!(manifest.dependencies().is_empty());
    }

    #[test]
    fn test_same_unranged_package_in_both_maps_is_pinned_twice() {
        let mut reg = MemoryRegistry::new();
        reg.publish("a", "1.0.0", &[]);
        let mut manifest = RootManifest::parse(
            Path::new("package.json"),
            r#"{"dependencies":{"a":""},"devDependencies":{"a":""}}"#,
        )
        .unwrap();
        let mut lock = LockStore::new(MemoryLockBackend::default());
        let res = resolve_manifest(&mut manifest, &reg, &mut lock, &opts()).unwrap();
        assert_eq!(res.pinned.len(), 2);
        assert_eq!(manifest.dependencies(), vec![("a".to_string(), "^1.0.0".to_string())]);
        assert_eq!(manifest.dev_dependencies(), vec![("a".to_string(), "^1.0.0".to_string())]);
    }

    #[test]
    fn test_failure_persists_nothing() {
        let mut reg = MemoryRegistry::new();
        reg.publish("a", "1.0.0", &[]);
        let mut manifest =
            RootManifest::parse(Path::new("package.json"), r#"{"dependencies":{"a":"^1.0.0","b":"^1.0.0"}}"#)
                .unwrap();
        let mut lock = LockStore::new(MemoryLockBackend::default());
        assert!(resolve_manifest(&mut manifest, &reg, &mut lock, &opts()).is_err());
        assert_eq!(lock.backend().contents(), None);
    }

    #[test]
    fn test_checksums_cover_locked_urls() {
        let mut reg = MemoryRegistry::new();
        reg.publish("a", "1.0.0", &[]);
        let mut manifest =
            RootManifest::parse(Path::new("package.json"), r#"{"dependencies":{"a":"^1.0.0"}}"#).unwrap();
        let mut lock = LockStore::new(MemoryLockBackend::default());
        let res = resolve_manifest(&mut manifest, &reg, &mut lock, &opts()).unwrap();
        let url = &res.plan.hoisted["a"].url;
        assert_eq!(res.checksums[url].len(), 40);
    }
}
