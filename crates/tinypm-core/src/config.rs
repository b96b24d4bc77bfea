//! Optional config from .tinypmrc or ~/.tinypmrc (JSON), plus the registry lines of
//! .npmrc. Environment variables override files; CLI flags override both.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::collector::default_concurrency;
use crate::lockfile::LOCKFILE_NAME;
use crate::registry::DEFAULT_REGISTRY;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub registry: String,
    /// `@scope` -> registry URL
    pub scoped_registries: HashMap<String, String>,
    /// Concurrent registry lookups and downloads.
    pub concurrency: usize,
    /// Lockfile name, relative to the project directory.
    pub lockfile: String,
    /// Skip devDependencies.
    pub production: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            scoped_registries: HashMap::new(),
            concurrency: default_concurrency(),
            lockfile: LOCKFILE_NAME.to_string(),
            production: false,
        }
    }
}

impl Config {
    /// Registry URL serving `package`, honouring scoped registries.
    pub fn registry_for(&self, package: &str) -> &str {
        if package.starts_with('@') {
            if let Some((scope, _)) = package.split_once('/') {
                if let Some(url) = self.scoped_registries.get(scope) {
                    return url;
                }
            }
        }
        &self.registry
    }

    pub fn lockfile_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.lockfile)
    }
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RcFile {
    registry: Option<String>,
    concurrency: Option<usize>,
    lockfile: Option<String>,
    production: Option<bool>,
}

/// Registry settings read from an .npmrc file.
#[derive(Default, Clone, Debug)]
pub struct NpmRcConfig {
    pub registry: Option<String>,
    pub scoped_registries: HashMap<String, String>,
}

fn read_npmrc(path: &Path) -> NpmRcConfig {
    let mut out = NpmRcConfig::default();
    let Ok(s) = std::fs::read_to_string(path) else {
        return out;
    };
    for raw in s.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let key = k.trim();
        let mut value = v.trim().to_string();
        if value.starts_with("${") && value.ends_with('}') && value.len() > 3 {
            let env_key = &value[2..value.len() - 1];
            if let Ok(env_val) = std::env::var(env_key) {
                value = env_val;
            }
        }
        if key == "registry" {
            out.registry = Some(value.trim_end_matches('/').to_string());
            continue;
        }
        if let Some(scope) = key.strip_suffix(":registry") {
            if scope.starts_with('@') && scope.len() > 1 {
                out.scoped_registries
                    .insert(scope.to_string(), value.trim_end_matches('/').to_string());
            }
        }
    }
    out
}

/// Load .npmrc from project then home, with project taking precedence.
pub fn load_npmrc(dir: &Path, home: Option<&Path>) -> NpmRcConfig {
    let project = read_npmrc(&dir.join(".npmrc"));
    let home_cfg = home.map(|h| read_npmrc(&h.join(".npmrc"))).unwrap_or_default();
    let mut scoped_registries = home_cfg.scoped_registries;
    scoped_registries.extend(project.scoped_registries);
    NpmRcConfig {
        registry: project.registry.or(home_cfg.registry),
        scoped_registries,
    }
}

/// Files only: .tinypmrc in dir, else in home; then .npmrc registries. No env lookup.
pub fn load_config_from(dir: &Path, home: Option<&Path>) -> Config {
    let mut cfg = Config::default();
    let mut candidates = vec![dir.join(".tinypmrc")];
    if let Some(h) = home {
        candidates.push(h.join(".tinypmrc"));
    }

    let mut rc_registry = None;
    for path in &candidates {
        if !path.is_file() {
            continue;
        }
        if let Ok(s) = std::fs::read_to_string(path) {
            match serde_json::from_str::<RcFile>(&s) {
                Ok(rc) => {
                    rc_registry = rc.registry;
                    if let Some(n) = rc.concurrency {
                        cfg.concurrency = n.clamp(1, 64);
                    }
                    if let Some(l) = rc.lockfile.filter(|l| !l.trim().is_empty()) {
                        cfg.lockfile = l;
                    }
                    if let Some(p) = rc.production {
                        cfg.production = p;
                    }
                }
                Err(e) => crate::utils::log_error(&format!(
                    "Ignoring invalid {}: {}",
                    path.display(),
                    e
                )),
            }
        }
        break;
    }

    let npmrc = load_npmrc(dir, home);
    cfg.scoped_registries = npmrc.scoped_registries;
    if let Some(r) = rc_registry.or(npmrc.registry) {
        cfg.registry = r.trim_end_matches('/').to_string();
    }
    cfg
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Full config for a project directory: files, then environment overrides.
pub fn load_config(dir: &Path) -> Config {
    let home = dirs::home_dir();
    let mut cfg = load_config_from(dir, home.as_deref());
    if let Some(r) = env_nonempty("TINYPM_REGISTRY").or_else(|| env_nonempty("NPM_CONFIG_REGISTRY")) {
        cfg.registry = r.trim_end_matches('/').to_string();
    }
    if let Some(n) = env_nonempty("TINYPM_CONCURRENCY").and_then(|v| v.parse::<usize>().ok()) {
        cfg.concurrency = n.clamp(1, 64);
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_files() {
        let td = tempfile::tempdir().unwrap();
        let cfg = load_config_from(td.path(), None);
        assert_eq!(cfg.registry, DEFAULT_REGISTRY);
        assert_eq!(cfg.lockfile, LOCKFILE_NAME);
        assert!(!cfg.production);
        assert!(cfg.concurrency >= 1);
    }

    #[test]
    fn test_project_rc_wins_over_home() {
        let project = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            project.path().join(".tinypmrc"),
            r#"{"registry":"https://npm.example.test/","concurrency":3,"production":true}"#,
        )
        .unwrap();
        std::fs::write(home.path().join(".tinypmrc"), r#"{"lockfile":"home.lock.json"}"#).unwrap();

        let cfg = load_config_from(project.path(), Some(home.path()));
        assert_eq!(cfg.registry, "https://npm.example.test");
        assert_eq!(cfg.concurrency, 3);
        assert!(cfg.production);
        assert_eq!(cfg.lockfile, LOCKFILE_NAME);
    }

    #[test]
    fn test_npmrc_scoped_registry_resolution() {
        let td = tempfile::tempdir().unwrap();
        std::fs::write(
            td.path().join(".npmrc"),
            "registry=https://mirror.example.test/\n@myco:registry=https://npm.myco.local/\n; comment\n",
        )
        .unwrap();

        let cfg = load_config_from(td.path(), None);
        assert_eq!(cfg.registry, "https://mirror.example.test");
        assert_eq!(cfg.registry_for("@myco/foo"), "https://npm.myco.local");
        assert_eq!(cfg.registry_for("@other/foo"), "https://mirror.example.test");
        assert_eq!(cfg.registry_for("lodash"), "https://mirror.example.test");
    }

    #[test]
    fn test_invalid_rc_falls_back_to_defaults() {
        let td = tempfile::tempdir().unwrap();
        std::fs::write(td.path().join(".tinypmrc"), "not json").unwrap();
        let cfg = load_config_from(td.path(), None);
        assert_eq!(cfg.registry, DEFAULT_REGISTRY);
    }
}
