//! Root package.json: read the direct dependency maps, rewrite pinned ranges, write back.
//! Fields the resolver doesn't know about are kept verbatim and in their original order.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{ResolveError, Result};

pub const MANIFEST_NAME: &str = "package.json";

/// Which dependency map of the root manifest an edge came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepKind {
    Prod,
    Dev,
}

impl DepKind {
    pub fn key(self) -> &'static str {
        match self {
            DepKind::Prod => "dependencies",
            DepKind::Dev => "devDependencies",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RootManifest {
    doc: Map<String, Value>,
}

impl RootManifest {
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(doc)) => Ok(Self { doc }),
            Ok(_) => Err(ResolveError::manifest(path, "top-level value is not an object")),
            Err(e) => Err(ResolveError::manifest(path, e)),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ResolveError::manifest(path, e))?;
        Self::parse(path, &text)
    }

    /// (name, range) pairs of one dependency map in file order. Non-string ranges are skipped.
    pub fn deps(&self, kind: DepKind) -> Vec<(String, String)> {
        self.doc
            .get(kind.key())
            .and_then(|d| d.as_object())
            .map(|d| {
                d.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dependencies(&self) -> Vec<(String, String)> {
        self.deps(DepKind::Prod)
    }

    pub fn dev_dependencies(&self) -> Vec<(String, String)> {
        self.deps(DepKind::Dev)
    }

    fn deps_mut(&mut self, kind: DepKind) -> &mut Map<String, Value> {
        let slot = self
            .doc
            .entry(kind.key())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => map,
            _ => unreachable!("slot was just made an object"),
        }
    }

    /// Set (or add) the range for `name` in the given map.
    pub fn set_range(&mut self, kind: DepKind, name: &str, range: &str) {
        self.deps_mut(kind)
            .insert(name.to_string(), Value::String(range.to_string()));
    }

    /// Add a requested package to `kind`, dropping it from the other map.
    /// An empty range gets pinned to `^version` once resolved.
    pub fn add_dependency(&mut self, kind: DepKind, name: &str, range: &str) {
        let other = match kind {
            DepKind::Prod => DepKind::Dev,
            DepKind::Dev => DepKind::Prod,
        };
        if let Some(Value::Object(map)) = self.doc.get_mut(other.key()) {
            map.remove(name);
        }
        self.set_range(kind, name, range);
    }

    /// Sort both dependency maps by package name.
    pub fn sort_dependencies(&mut self) {
        for kind in [DepKind::Prod, DepKind::Dev] {
            if let Some(Value::Object(map)) = self.doc.get_mut(kind.key()) {
                let mut entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                map.extend(entries);
            }
        }
    }

    pub fn to_pretty_string(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(&self.doc)
            .map_err(|e| ResolveError::manifest(Path::new(MANIFEST_NAME), e))?;
        out.push('\n');
        Ok(out)
    }

    /// Write back with sorted dependency maps and 2-space indentation.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.sort_dependencies();
        let text = self.to_pretty_string()?;
        std::fs::write(path, text).map_err(|e| ResolveError::manifest(path, e))
    }
}

/// Walk up from `start` to the nearest directory containing package.json.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(MANIFEST_NAME))
        .find(|candidate| candidate.is_file())
}
