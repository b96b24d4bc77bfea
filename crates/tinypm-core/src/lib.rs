//! Core library for tinypm: version matching, dependency collection with hoisting,
//! lockfile reconciliation and install-plan materialization.
//! Used by the CLI binary; the resolver is usable on its own with any `Registry`.

pub mod collector;
pub mod config;
pub mod error;
#[cfg(feature = "http-ureq")]
pub mod http_client;
pub mod install;
pub mod lockfile;
pub mod manifest;
pub mod registry;
pub mod resolve;
pub mod stack;
pub mod utils;
pub mod version;

// Re-export main API for CLI
pub use collector::{Collected, Collector, HoistedEntry, NestedRequest};
pub use config::{load_config, Config};
pub use error::{ResolveError, Result};
#[cfg(feature = "http-ureq")]
pub use install::install_plan;
pub use lockfile::{FileLockBackend, LockBackend, LockEntry, LockStore, MemoryLockBackend};
pub use manifest::{find_manifest, DepKind, RootManifest};
#[cfg(feature = "http-ureq")]
pub use registry::HttpRegistry;
pub use registry::{Memoized, MemoryRegistry, Packument, Registry};
pub use resolve::{resolve_manifest, InstallPlan, InstallTarget, Resolution, ResolveOptions};
pub use utils::{get_cache_dir, init_cache, log, log_error};
