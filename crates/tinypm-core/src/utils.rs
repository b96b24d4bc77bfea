use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{Result, Write};
use std::path::PathBuf;

use chrono::Local;

pub const LOG_FILE: &str = "logs.txt";

/// Returns the path to the cache directory. Uses TINYPM_CACHE_DIR if set;
/// otherwise `<home>/.tinypm-cache`.
pub fn get_cache_dir() -> PathBuf {
    if let Ok(dir) = env::var("TINYPM_CACHE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tinypm-cache")
}

/// Create the cache directory and its log file.
pub fn init_cache() -> Result<()> {
    let cache_dir = get_cache_dir();
    fs::create_dir_all(&cache_dir)?;

    let log_path = cache_dir.join(LOG_FILE);
    if !log_path.exists() {
        File::create(&log_path)?;
    }
    Ok(())
}

fn is_quiet() -> bool {
    if env::var("TINYPM_QUIET").map(|v| v == "1" || v == "true").unwrap_or(false) {
        return true;
    }
    env::var("TINYPM_LOG")
        .map(|v| v.eq_ignore_ascii_case("quiet") || v.eq_ignore_ascii_case("error"))
        .unwrap_or(false)
}

fn append_to_log_file(line: &str) {
    let cache_dir = get_cache_dir();
    // Only log to disk once init_cache has run; never create the cache dir as a side effect.
    if !cache_dir.is_dir() {
        return;
    }
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(cache_dir.join(LOG_FILE))
    {
        let _ = writeln!(file, "{}", line);
    }
}

pub fn log(message: &str) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let log_message = format!("[{}] {}", timestamp, message);

    if !is_quiet() {
        println!("{}", log_message);
    }
    append_to_log_file(&log_message);
}

pub fn log_error(message: &str) {
    eprintln!("{}", message);
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    append_to_log_file(&format!("[{}] ERROR {}", timestamp, message));
}

/// Package name without version: lodash@4 -> (lodash, 4), @scope/pkg@1.0 -> (@scope/pkg, 1.0).
/// A spec without a version yields an empty range.
pub fn split_spec(spec: &str) -> (&str, &str) {
    let search_from = usize::from(spec.starts_with('@'));
    match spec[search_from..].find('@') {
        Some(idx) => {
            let at = idx + search_from;
            (&spec[..at], spec[at + 1..].trim())
        }
        None => (spec, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_spec_unscoped() {
        assert_eq!(split_spec("lodash"), ("lodash", ""));
        assert_eq!(split_spec("lodash@4.17.21"), ("lodash", "4.17.21"));
        assert_eq!(split_spec("react@^18"), ("react", "^18"));
    }

    #[test]
    fn test_split_spec_scoped() {
        assert_eq!(split_spec("@babel/core"), ("@babel/core", ""));
        assert_eq!(split_spec("@types/node@>=18 <21"), ("@types/node", ">=18 <21"));
    }

    #[test]
    fn test_cache_dir_is_named_or_overridden() {
        let dir = get_cache_dir();
        let overridden = env::var("TINYPM_CACHE_DIR").map(|d| !d.trim().is_empty()).unwrap_or(false);
        assert!(overridden || dir.ends_with(".tinypm-cache"));
    }
}
