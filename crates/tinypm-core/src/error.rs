//! Error taxonomy for resolution, lockfile and install operations.
//! A fatal error aborts the whole run; cyclic edges are pruned, never reported.

use std::fmt;

/// Main error type for tinypm operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No published version satisfies the requested range
    UnresolvableConstraint { name: String, range: String },
    /// A direct dependency whose range the already-hoisted copy cannot serve
    DirectConflict {
        name: String,
        hoisted: String,
        range: String,
    },
    /// Registry metadata could not be fetched or parsed
    Registry { package: String, source: String },
    /// Lockfile read, parse or write failure
    Lockfile { operation: String, source: String },
    /// Root manifest (package.json) read or write failure
    Manifest { path: String, source: String },
    /// Tarball download, checksum or extraction failure
    Install { package: String, source: String },
    /// Worker pool could not be started
    Runtime { source: String },
    /// A sibling branch failed first; this branch stopped without doing work
    Cancelled,
}

impl ResolveError {
    pub fn registry(package: &str, source: impl fmt::Display) -> Self {
        ResolveError::Registry {
            package: package.to_string(),
            source: source.to_string(),
        }
    }

    pub fn lockfile(operation: &str, source: impl fmt::Display) -> Self {
        ResolveError::Lockfile {
            operation: operation.to_string(),
            source: source.to_string(),
        }
    }

    pub fn manifest(path: &std::path::Path, source: impl fmt::Display) -> Self {
        ResolveError::Manifest {
            path: path.display().to_string(),
            source: source.to_string(),
        }
    }

    pub fn install(package: &str, source: impl fmt::Display) -> Self {
        ResolveError::Install {
            package: package.to_string(),
            source: source.to_string(),
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::UnresolvableConstraint { name, range } => {
                if range.is_empty() {
                    write!(f, "Cannot resolve suitable package: {} has no published versions", name)
                } else {
                    write!(f, "Cannot resolve suitable package: no version of {} satisfies {}", name, range)
                }
            }
            ResolveError::DirectConflict { name, hoisted, range } => write!(
                f,
                "Conflicting direct dependencies on {}: hoisted {} does not satisfy {}",
                name, hoisted, range
            ),
            ResolveError::Registry { package, source } => {
                write!(f, "Registry error for {}: {}", package, source)
            }
            ResolveError::Lockfile { operation, source } => {
                write!(f, "Lockfile error in {}: {}", operation, source)
            }
            ResolveError::Manifest { path, source } => {
                write!(f, "Manifest error: {} (path: {})", source, path)
            }
            ResolveError::Install { package, source } => {
                write!(f, "Install error for {}: {}", package, source)
            }
            ResolveError::Runtime { source } => write!(f, "Runtime error: {}", source),
            ResolveError::Cancelled => write!(f, "Resolution cancelled"),
        }
    }
}

impl std::error::Error for ResolveError {}

pub type Result<T> = std::result::Result<T, ResolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolvable_names_package_and_range() {
        let err = ResolveError::UnresolvableConstraint {
            name: "left-pad".into(),
            range: "^9.0.0".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("left-pad"));
        assert!(msg.contains("^9.0.0"));
    }

    #[test]
    fn unresolvable_with_empty_range() {
        let err = ResolveError::UnresolvableConstraint {
            name: "ghost".into(),
            range: String::new(),
        };
        assert!(err.to_string().contains("no published versions"));
    }

    #[test]
    fn collaborator_errors_keep_source() {
        let err = ResolveError::registry("react", "HTTP 404");
        assert_eq!(err.to_string(), "Registry error for react: HTTP 404");
        let err = ResolveError::manifest(std::path::Path::new("package.json"), "bad json");
        assert!(err.to_string().contains("package.json"));
    }
}
