//! Dependency collection: walks the graph from the direct dependencies, decides for every
//! edge whether the shared (hoisted) copy serves it or a private nested copy is needed,
//! records lock entries and prunes edges that loop back into their own ancestor chain.
//!
//! One coordinating thread owns every table (hoisted, nested, pending lock, pins).
//! Lookups (previous lock, then registry) run on a rayon pool and report back over a
//! channel, so registry waits overlap while placement decisions stay strictly serial.
//! The first fatal error cancels queued lookups and aborts the run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ResolveError, Result};
use crate::lockfile::{LockBackend, LockEntry, LockStore, PendingLock, PreviousLock};
use crate::registry::{Packument, Registry};
use crate::stack::{Frame, Stack};
use crate::utils;
use crate::version;

/// The one shared copy of a package, installed at `<root>/node_modules/<name>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoistedEntry {
    pub url: String,
    pub version: String,
}

/// A private copy installed under `<root>/node_modules/<parent>/node_modules/<name>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedRequest {
    pub name: String,
    pub url: String,
    pub parent: String,
}

/// Hoisted and nested placements accumulated during one run.
#[derive(Clone, Debug, Default)]
pub struct Placements {
    pub hoisted: BTreeMap<String, HoistedEntry>,
    pub nested: Vec<NestedRequest>,
}

/// One dependency edge waiting to be resolved, with its own ancestor chain.
#[derive(Clone, Debug)]
struct Edge {
    /// Index into the direct-dependency list, for direct edges.
    root: Option<usize>,
    name: String,
    range: String,
    stack: Stack,
}

/// What resolving a single edge produced.
#[derive(Debug, Default)]
struct Settled {
    pin: Option<String>,
    children: Vec<Edge>,
}

struct Lookup {
    edge: Edge,
    result: Result<Arc<Packument>>,
}

/// Outcome of a full collection run.
#[derive(Debug, Default)]
pub struct Collected {
    pub placements: Placements,
    /// Per direct edge: `^version` when it was requested with an empty range.
    pub pins: Vec<Option<String>>,
}

/// Locked fragment first; registry only on a miss.
fn lookup_manifest<R: Registry + ?Sized>(
    registry: &R,
    previous: PreviousLock<'_>,
    name: &str,
    range: &str,
) -> Result<Arc<Packument>> {
    match previous.lookup(name, range) {
        Some(fragment) => Ok(Arc::new(fragment)),
        None => registry.resolve(name),
    }
}

impl Placements {
    /// Resolve one edge against its manifest: pick the version, place it, lock it and
    /// return the child edges still worth visiting.
    fn settle(
        &mut self,
        pending: &mut PendingLock<'_>,
        edge: &Edge,
        manifest: &Packument,
    ) -> Result<Settled> {
        utils::log(&format!("Resolving {}@{}", edge.name, display_range(&edge.range)));

        let matched = version::match_version(
            &edge.name,
            &edge.range,
            manifest.keys().map(String::as_str),
        )?;
        let chosen = manifest.get(&matched).ok_or_else(|| ResolveError::UnresolvableConstraint {
            name: edge.name.clone(),
            range: edge.range.clone(),
        })?;
        let url = chosen.dist.tarball.clone();

        match self.hoisted.get(&edge.name) {
            None => {
                self.hoisted.insert(
                    edge.name.clone(),
                    HoistedEntry {
                        url: url.clone(),
                        version: matched.clone(),
                    },
                );
            }
            Some(shared) if version::satisfies(&shared.version, &edge.range) => {
                match edge.stack.find_conflict(&edge.name, &matched) {
                    None => {
                        return Ok(Settled {
                            pin: pin_for(&edge.range, &shared.version),
                            children: Vec::new(),
                        })
                    }
                    Some(index) => self.nested.push(NestedRequest {
                        name: edge.name.clone(),
                        url: url.clone(),
                        parent: edge.stack.nest_path(index),
                    }),
                }
            }
            Some(shared) => {
                let Some(parent) = edge.stack.top() else {
                    return Err(ResolveError::DirectConflict {
                        name: edge.name.clone(),
                        hoisted: shared.version.clone(),
                        range: edge.range.clone(),
                    });
                };
                self.nested.push(NestedRequest {
                    name: edge.name.clone(),
                    url: url.clone(),
                    parent: parent.name.clone(),
                });
            }
        }

        pending.record(
            &edge.name,
            &edge.range,
            LockEntry {
                version: matched.clone(),
                url,
                shasum: chosen.dist.shasum.clone(),
                dependencies: chosen.dependencies.clone(),
            },
        );

        let mut children = Vec::new();
        if !chosen.dependencies.is_empty() {
            let stack = edge.stack.push(Frame {
                name: edge.name.clone(),
                version: matched.clone(),
                dependencies: chosen.dependencies.clone(),
            });
            for (dep, range) in &chosen.dependencies {
                if stack.has_cycle(dep, range) {
                    continue;
                }
                children.push(Edge {
                    root: None,
                    name: dep.clone(),
                    range: range.clone(),
                    stack: stack.clone(),
                });
            }
        }

        Ok(Settled {
            pin: pin_for(&edge.range, &matched),
            children,
        })
    }
}

/// `^version` for an edge requested without a range.
fn pin_for(range: &str, version: &str) -> Option<String> {
    range.trim().is_empty().then(|| format!("^{}", version))
}

fn display_range(range: &str) -> &str {
    if range.trim().is_empty() {
        "latest"
    } else {
        range
    }
}

/// Default number of lookup workers: twice the CPU count, clamped to 4..=32.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() * 2).clamp(4, 32))
        .unwrap_or(8)
}

pub struct Collector<'a, R: Registry + ?Sized, B: LockBackend> {
    registry: &'a R,
    lock: &'a mut LockStore<B>,
    concurrency: usize,
}

impl<'a, R: Registry + ?Sized, B: LockBackend> Collector<'a, R, B> {
    pub fn new(registry: &'a R, lock: &'a mut LockStore<B>) -> Self {
        Self {
            registry,
            lock,
            concurrency: default_concurrency(),
        }
    }

    /// Number of concurrent lookups. 1 makes traversal order fully deterministic.
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }

    /// Collect everything reachable from `roots` (name, range) pairs.
    ///
    /// Direct edges are placed before any transitive edge is scheduled, so a direct
    /// dependency always owns its hoisted slot. Beyond that, the first edge to be
    /// settled for a name claims the hoisted copy.
    pub fn collect(self, roots: &[(String, String)]) -> Result<Collected> {
        let Collector {
            registry,
            lock,
            concurrency,
        } = self;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("tinypm-lookup-{}", i))
            .build()
            .map_err(|e| ResolveError::Runtime {
                source: e.to_string(),
            })?;

        let (previous, mut pending) = lock.split();
        let cancelled = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<Lookup>();

        pool.in_place_scope_fifo(|scope| {
            let spawn = |edge: Edge| {
                let tx = tx.clone();
                let cancelled = &cancelled;
                scope.spawn_fifo(move |_| {
                    let result = if cancelled.load(Ordering::Acquire) {
                        Err(ResolveError::Cancelled)
                    } else {
                        lookup_manifest(registry, previous, &edge.name, &edge.range)
                    };
                    let _ = tx.send(Lookup { edge, result });
                });
            };
            let abort = |err: ResolveError| {
                cancelled.store(true, Ordering::Release);
                Err(err)
            };

            let mut placements = Placements::default();
            let mut pins = vec![None; roots.len()];
            let mut in_flight = 0usize;
            let mut roots_left = roots.len();
            let mut deferred: Vec<Edge> = Vec::new();

            for (i, (name, range)) in roots.iter().enumerate() {
                spawn(Edge {
                    root: Some(i),
                    name: name.clone(),
                    range: range.clone(),
                    stack: Stack::new(),
                });
                in_flight += 1;
            }

            while in_flight > 0 {
                let Ok(Lookup { edge, result }) = rx.recv() else {
                    break;
                };
                in_flight -= 1;

                let manifest = match result {
                    Ok(m) => m,
                    Err(e) => return abort(e),
                };
                let settled = match placements.settle(&mut pending, &edge, &manifest) {
                    Ok(s) => s,
                    Err(e) => return abort(e),
                };

                match edge.root {
                    Some(i) => {
                        pins[i] = settled.pin;
                        deferred.extend(settled.children);
                        roots_left -= 1;
                        if roots_left == 0 {
                            for child in deferred.drain(..) {
                                spawn(child);
                                in_flight += 1;
                            }
                        }
                    }
                    None => {
                        for child in settled.children {
                            spawn(child);
                            in_flight += 1;
                        }
                    }
                }
            }

            Ok(Collected { placements, pins })
        })
    }
}
