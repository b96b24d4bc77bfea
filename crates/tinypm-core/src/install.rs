//! Materialize an install plan: download each tarball, check its shasum, extract it into
//! `node_modules`. Hoisted packages go first so nested copies land inside existing dirs.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{ResolveError, Result};
use crate::resolve::InstallTarget;
#[cfg(feature = "http-ureq")]
use crate::resolve::InstallPlan;

#[cfg(feature = "http-ureq")]
static TMP_DOWNLOAD_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// SHA-1 hex of a file, the format npm publishes as `dist.shasum`.
pub fn file_shasum(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Extract .tgz into dest_dir, stripping one top-level directory from tarball.
pub fn extract_tarball_to_dir(tarball_path: &Path, dest_dir: &Path) -> std::result::Result<(), String> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let f = File::open(tarball_path).map_err(|e| e.to_string())?;
    let dec = GzDecoder::new(BufReader::new(f));
    let mut archive = Archive::new(dec);

    std::fs::create_dir_all(dest_dir).map_err(|e| e.to_string())?;

    for entry in archive.entries().map_err(|e| e.to_string())? {
        let mut entry = entry.map_err(|e| e.to_string())?;
        let path = entry.path().map_err(|e| e.to_string())?;
        let path_str = path.to_string_lossy();
        let parts: Vec<&str> = path_str.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
        if parts.len() < 2 {
            continue;
        }
        if parts.iter().any(|p| *p == "..") {
            return Err(format!("refusing entry outside package root: {}", path_str));
        }
        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            continue;
        }
        let out_path = parts[1..].iter().fold(dest_dir.to_path_buf(), |acc, p| acc.join(p));
        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| e.to_string())?;
        } else {
            if let Some(p) = out_path.parent() {
                std::fs::create_dir_all(p).map_err(|e| e.to_string())?;
            }
            entry.unpack(&out_path).map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

/// Verify (when a checksum is known) and extract one downloaded tarball.
pub fn unpack_verified(tarball: &Path, target: &InstallTarget, expected_shasum: Option<&str>) -> Result<()> {
    if let Some(expected) = expected_shasum.filter(|s| !s.is_empty()) {
        let actual = file_shasum(tarball).map_err(|e| ResolveError::install(&target.name, e))?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(ResolveError::install(
                &target.name,
                format!("shasum mismatch: expected {}, got {}", expected, actual),
            ));
        }
    }
    extract_tarball_to_dir(tarball, &target.dir).map_err(|e| ResolveError::install(&target.name, e))
}

#[cfg(feature = "http-ureq")]
fn install_target(target: &InstallTarget, expected_shasum: Option<&str>, tmp_dir: &Path) -> Result<()> {
    let n = TMP_DOWNLOAD_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let tmp = tmp_dir.join(format!("tmp-{}-{}.tgz", std::process::id(), n));
    crate::http_client::get_to_file(&target.url, &tmp)
        .map_err(|e| ResolveError::install(&target.name, format!("download {}: {}", target.url, e)))?;
    let result = unpack_verified(&tmp, target, expected_shasum);
    let _ = std::fs::remove_file(&tmp);
    result
}

/// Install every target of the plan under `root`. `checksums` maps tarball URL to shasum;
/// `on_installed` is called once per finished target (from worker threads).
#[cfg(feature = "http-ureq")]
pub fn install_plan<F>(
    plan: &InstallPlan,
    root: &Path,
    checksums: &std::collections::BTreeMap<String, String>,
    concurrency: usize,
    on_installed: F,
) -> Result<()>
where
    F: Fn(&InstallTarget) + Sync,
{
    use rayon::prelude::*;

    let tmp_dir = crate::utils::get_cache_dir().join("tmp");
    std::fs::create_dir_all(&tmp_dir).map_err(|e| ResolveError::install("<cache>", e))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .thread_name(|i| format!("tinypm-install-{}", i))
        .build()
        .map_err(|e| ResolveError::Runtime {
            source: e.to_string(),
        })?;

    let targets = plan.targets(root);
    let (hoisted, nested) = targets.split_at(plan.hoisted.len());
    for batch in [hoisted, nested] {
        pool.install(|| {
            batch.par_iter().try_for_each(|target| {
                install_target(target, checksums.get(&target.url).map(String::as_str), &tmp_dir)?;
                crate::utils::log(&format!("Installed {} -> {}", target.name, target.dir.display()));
                on_installed(target);
                Ok(())
            })
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn make_tgz(dir: &Path, files: &[(&str, &str)]) -> PathBuf {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let path = dir.join("pkg.tgz");
        let f = File::create(&path).unwrap();
        let enc = GzEncoder::new(f, Compression::default());
        let mut builder = tar::Builder::new(enc);
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    fn target(dir: PathBuf) -> InstallTarget {
        InstallTarget {
            name: "left-pad".into(),
            url: "https://r/left-pad-1.3.0.tgz".into(),
            dir,
        }
    }

    #[test]
    fn test_extract_strips_top_level_directory() {
        let td = tempfile::tempdir().unwrap();
        let tgz = make_tgz(
            td.path(),
            &[("package/package.json", "{\"name\":\"left-pad\"}"), ("package/lib/index.js", "module.exports = 1")],
        );
        let dest = td.path().join("node_modules/left-pad");
        extract_tarball_to_dir(&tgz, &dest).unwrap();
        assert!(dest.join("package.json").is_file());
        assert_eq!(std::fs::read_to_string(dest.join("lib/index.js")).unwrap(), "module.exports = 1");
    }

    #[test]
    fn test_extract_skips_links() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let td = tempfile::tempdir().unwrap();
        let outside = td.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        let tgz = td.path().join("links.tgz");
        let enc = GzEncoder::new(File::create(&tgz).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(enc);
        for (kind, name) in [(tar::EntryType::Symlink, "package/link"), (tar::EntryType::Link, "package/hard")] {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(kind);
            header.set_size(0);
            header.set_mode(0o777);
            header.set_link_name(outside.to_str().unwrap()).unwrap();
            header.set_cksum();
            builder.append_data(&mut header, name, std::io::empty()).unwrap();
        }
        let body = "pwned";
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "package/link/evil.txt", body.as_bytes()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = td.path().join("node_modules/pkg");
        extract_tarball_to_dir(&tgz, &dest).unwrap();
        assert!(!std::fs::symlink_metadata(dest.join("link")).unwrap().file_type().is_symlink());
        assert!(!dest.join("hard").exists());
        assert!(dest.join("link/evil.txt").is_file());
        assert!(!outside.join("evil.txt").exists());
    }

    #[test]
    fn test_unpack_verified_checks_shasum() {
        let td = tempfile::tempdir().unwrap();
        let tgz = make_tgz(td.path(), &[("package/index.js", "x")]);
        let good = file_shasum(&tgz).unwrap();
        assert_eq!(good.len(), 40);

        let t = target(td.path().join("out"));
        let err = unpack_verified(&tgz, &t, Some("0000000000000000000000000000000000000000")).unwrap_err();
        assert!(err.to_string().contains("shasum mismatch"));
        assert!(!t.dir.join("index.js").exists());

        unpack_verified(&tgz, &t, Some(&good)).unwrap();
        assert!(t.dir.join("index.js").is_file());
    }

    #[test]
    fn test_unknown_checksum_still_extracts() {
        let td = tempfile::tempdir().unwrap();
        let tgz = make_tgz(td.path(), &[("package/a.txt", "a")]);
        let t = target(td.path().join("out"));
        unpack_verified(&tgz, &t, None).unwrap();
        assert!(t.dir.join("a.txt").is_file());
    }
}
