//! tinypm-lock.json: pins each (name, range) edge to the version, tarball and checksum
//! chosen by a previous run.
//!
//! Entries read from disk ("previous") are only ever read. Entries produced by the
//! current run ("pending") are write-once per key and are what gets persisted.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{ResolveError, Result};
use crate::registry::{Dist, Packument, VersionManifest};

pub const LOCKFILE_NAME: &str = "tinypm-lock.json";

/// One locked edge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub version: String,
    pub url: String,
    #[serde(default)]
    pub shasum: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// Key used in the lock document: `name@range` (range may be empty).
pub fn lock_key(name: &str, range: &str) -> String {
    format!("{}@{}", name, range)
}

/// Durable storage for the serialized lock document.
pub trait LockBackend: Send + Sync {
    /// Raw document, or None when nothing was persisted yet.
    fn read(&self) -> Result<Option<String>>;
    fn write(&self, contents: &str) -> Result<()>;
}

/// Lock document stored as a file next to package.json.
pub struct FileLockBackend {
    path: PathBuf,
}

impl FileLockBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LockBackend for FileLockBackend {
    fn read(&self) -> Result<Option<String>> {
        if !self.path.is_file() {
            return Ok(None);
        }
        std::fs::read_to_string(&self.path)
            .map(Some)
            .map_err(|e| ResolveError::lockfile("read", format!("{}: {}", self.path.display(), e)))
    }

    fn write(&self, contents: &str) -> Result<()> {
        let tmp = self.path.with_extension(format!("json.tmp-{}", std::process::id()));
        std::fs::write(&tmp, contents)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                ResolveError::lockfile("write", format!("{}: {}", self.path.display(), e))
            })
    }
}

/// Lock document held in memory (tests, dry runs).
#[derive(Default)]
pub struct MemoryLockBackend {
    contents: Mutex<Option<String>>,
}

impl MemoryLockBackend {
    pub fn new(contents: Option<String>) -> Self {
        Self {
            contents: Mutex::new(contents),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl LockBackend for MemoryLockBackend {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.contents())
    }

    fn write(&self, contents: &str) -> Result<()> {
        *self.contents.lock().unwrap_or_else(|p| p.into_inner()) = Some(contents.to_string());
        Ok(())
    }
}

/// Read-only view over the entries loaded from the previous run.
#[derive(Clone, Copy)]
pub struct PreviousLock<'a> {
    entries: &'a HashMap<String, LockEntry>,
}

impl PreviousLock<'_> {
    /// Single-version manifest synthesized from the locked entry, if any.
    pub fn lookup(&self, name: &str, range: &str) -> Option<Packument> {
        let item = self.entries.get(&lock_key(name, range))?;
        let mut fragment = Packument::new();
        fragment.insert(
            item.version.clone(),
            VersionManifest {
                dependencies: item.dependencies.clone(),
                dist: Dist {
                    tarball: item.url.clone(),
                    shasum: item.shasum.clone(),
                },
            },
        );
        Some(fragment)
    }
}

/// Write-once sink for entries produced by the current run.
pub struct PendingLock<'a> {
    entries: &'a mut BTreeMap<String, LockEntry>,
}

impl PendingLock<'_> {
    /// Store the entry for (name, range). Returns false if the key was already recorded;
    /// the first record wins.
    pub fn record(&mut self, name: &str, range: &str, entry: LockEntry) -> bool {
        use std::collections::btree_map::Entry;
        match self.entries.entry(lock_key(name, range)) {
            Entry::Vacant(v) => {
                v.insert(entry);
                true
            }
            Entry::Occupied(_) => false,
        }
    }
}

pub struct LockStore<B: LockBackend> {
    backend: B,
    previous: HashMap<String, LockEntry>,
    pending: BTreeMap<String, LockEntry>,
}

impl<B: LockBackend> LockStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            previous: HashMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Load persisted entries into the read-only set. No-op when nothing was persisted.
    pub fn read_previous(&mut self) -> Result<()> {
        let Some(raw) = self.backend.read()? else {
            return Ok(());
        };
        if raw.trim().is_empty() {
            return Ok(());
        }
        let entries: HashMap<String, LockEntry> =
            serde_json::from_str(&raw).map_err(|e| ResolveError::lockfile("parse", e))?;
        self.previous.extend(entries);
        Ok(())
    }

    pub fn lookup(&self, name: &str, range: &str) -> Option<Packument> {
        self.previous().lookup(name, range)
    }

    pub fn record(&mut self, name: &str, range: &str, entry: LockEntry) -> bool {
        self.split().1.record(name, range, entry)
    }

    pub fn previous(&self) -> PreviousLock<'_> {
        PreviousLock {
            entries: &self.previous,
        }
    }

    /// Borrow the previous set for reading and the pending set for writing at once.
    pub fn split(&mut self) -> (PreviousLock<'_>, PendingLock<'_>) {
        (
            PreviousLock {
                entries: &self.previous,
            },
            PendingLock {
                entries: &mut self.pending,
            },
        )
    }

    pub fn pending(&self) -> &BTreeMap<String, LockEntry> {
        &self.pending
    }

    /// The pending set as it will be persisted, keys sorted.
    pub fn serialize(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(&self.pending)
            .map_err(|e| ResolveError::lockfile("serialize", e))?;
        out.push('\n');
        Ok(out)
    }

    /// Write the full pending set through the backend.
    pub fn persist(&self) -> Result<()> {
        let doc = self.serialize()?;
        self.backend.write(&doc)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}
