//! Content-addressed store for launched binaries.
//!
//! Layout under `<home>/downloads/`:
//!
//! - `metadata/<source key>/<artifact name>`: text file holding the hex digest.
//! - `sha256/<digest>/bin/<executable>`: the binary itself.
//! - `_tmp/<random>`: in-flight downloads, removed by the process that created them.
//!
//! The binary path depends only on the digest, so mirrors serving identical
//! bytes share one directory and one `PATH` entry.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use fs4::FileExt;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, warn};

use crate::compute_sha256;
use crate::http::mark_executable;

const DOWNLOADS_DIR: &str = "downloads";
const MAX_KEY_LEN: usize = 255;
const LOCK_TIMEOUT: Duration = Duration::from_secs(60);
const LOCK_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("{} has sha256={actual} but need sha256={expected}", path.display())]
    DigestMismatch {
        path: PathBuf,
        actual: String,
        expected: String,
    },
}

/// What to cache and under which mapping key.
#[derive(Debug, Clone, Copy)]
pub struct CacheRequest<'a> {
    /// Sanitized fork name or mirror URL.
    pub source_key: &'a str,
    /// Canonical artifact name without extension.
    pub artifact_name: &'a str,
    /// File name inside `bin/`.
    pub executable: &'a str,
    /// Expected digest, compared case-insensitively.
    pub pinned_sha256: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    #[must_use]
    pub fn new(home: &Path) -> Self {
        Self {
            root: home.join(DOWNLOADS_DIR),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn mapping_path(&self, request: &CacheRequest<'_>) -> PathBuf {
        self.root
            .join("metadata")
            .join(request.source_key)
            .join(request.artifact_name)
    }

    #[must_use]
    pub fn binary_path(&self, digest: &str, executable: &str) -> PathBuf {
        self.root
            .join("sha256")
            .join(digest)
            .join("bin")
            .join(executable)
    }

    pub(crate) fn tmp_dir(&self) -> PathBuf {
        self.root.join("_tmp")
    }

    /// Fast path: mapping file present and the binary it names exists.
    ///
    /// # Errors
    /// Returns an error if the mapping file exists but cannot be read.
    pub fn lookup(&self, request: &CacheRequest<'_>) -> Result<Option<PathBuf>> {
        let mapping = self.mapping_path(request);
        let digest = match fs::read_to_string(&mapping) {
            Ok(digest) => digest,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("could not read {}", mapping.display()));
            }
        };
        let digest = digest.trim();
        if digest.is_empty() {
            return Ok(None);
        }
        let binary = self.binary_path(digest, request.executable);
        Ok(binary.is_file().then_some(binary))
    }

    /// Returns the cached binary, downloading it through `download(dir, file)`
    /// when the mapping is missing or stale.
    ///
    /// # Errors
    /// Fails on download errors, digest pin mismatches, and filesystem errors.
    pub fn ensure_cached<F>(&self, request: &CacheRequest<'_>, download: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path, &str) -> Result<PathBuf>,
    {
        if let Some(path) = self.lookup(request)? {
            debug!(path = %path.display(), "cache hit");
            return Ok(path);
        }

        let tmp_dir = self.tmp_dir();
        fs::create_dir_all(&tmp_dir)
            .with_context(|| format!("could not create directory {}", tmp_dir.display()))?;
        let tmp_name = random_name();
        let _scratch = TempPath::from_path(tmp_dir.join(&tmp_name));
        let downloaded = TempPath::from_path(download(&tmp_dir, &tmp_name)?);

        let digest = compute_sha256(&downloaded)
            .with_context(|| format!("cannot compute sha256 of {}", downloaded.display()))?;
        let target = self.binary_path(&digest, request.executable);
        if let Some(expected) = request.pinned_sha256 {
            let expected = expected.trim().to_ascii_lowercase();
            if expected != digest {
                return Err(CacheError::DigestMismatch {
                    path: target,
                    actual: digest,
                    expected,
                }
                .into());
            }
        }

        self.place(&downloaded, &target, request.executable)?;
        atomic_write(&self.mapping_path(request), digest.as_bytes())
            .context("failed to write mapping file after download")?;
        Ok(target)
    }

    fn place(&self, downloaded: &Path, target: &Path, executable: &str) -> Result<()> {
        let bin_dir = target
            .parent()
            .with_context(|| format!("{} has no parent directory", target.display()))?;
        fs::create_dir_all(bin_dir)
            .with_context(|| format!("could not create directory {}", bin_dir.display()))?;
        let staged = tempfile::Builder::new()
            .prefix(&format!("{executable}.tmp"))
            .tempfile_in(bin_dir)
            .with_context(|| format!("could not create temporary file in {}", bin_dir.display()))?
            .into_temp_path();
        fs::rename(downloaded, &staged).with_context(|| {
            format!(
                "failed to move {} to {}",
                downloaded.display(),
                staged.display()
            )
        })?;
        mark_executable(&staged)
            .with_context(|| format!("could not chmod file {}", staged.display()))?;
        rename_if_absent(&staged, target).with_context(|| {
            format!("failed to move {} to {}", staged.display(), target.display())
        })
    }
}

/// Renames `src` to `dst` under an advisory lock on `<dst>.lock`, unless
/// `dst` already exists. The lock wait is bounded; on timeout the rename
/// proceeds unlocked.
fn rename_if_absent(src: &Path, dst: &Path) -> Result<()> {
    let mut lock_path = OsString::from(dst.as_os_str());
    lock_path.push(".lock");
    let lock_path = PathBuf::from(lock_path);
    let _lock = match acquire_lock(&lock_path, LOCK_TIMEOUT) {
        Ok(Some(file)) => Some(file),
        Ok(None) => {
            warn!(
                lock = %lock_path.display(),
                "timed out waiting for lock, parallel launches may race"
            );
            None
        }
        Err(err) => {
            warn!(
                lock = %lock_path.display(),
                error = %err,
                "unable to create lock, parallel launches may race"
            );
            None
        }
    };

    if dst.exists() {
        debug!(path = %dst.display(), "another process placed the binary first");
        return Ok(());
    }
    fs::rename(src, dst)?;
    Ok(())
}

fn acquire_lock(path: &Path, timeout: Duration) -> Result<Option<File>> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let deadline = Instant::now() + timeout;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(Some(file)),
            Err(err) if is_contended(&err) => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(LOCK_POLL);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    if err.kind() == ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(windows)]
    if matches!(err.raw_os_error(), Some(32 | 33)) {
        return true;
    }
    false
}

/// Writes through a sibling temp file and renames it over `path`.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temporary file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("failed to write {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to rename temporary file to {}", path.display()))?;
    Ok(())
}

pub(crate) fn random_name() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Maps a URL or path to a single directory name: every non-alphanumeric
/// character becomes `-`; names over 255 bytes are truncated and suffixed
/// with `...<sha256 of the input>`.
#[must_use]
pub fn sanitize_key(raw: &str) -> String {
    let mut key: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if key.len() > MAX_KEY_LEN {
        let suffix = format!("...{}", hex::encode(Sha256::digest(raw.as_bytes())));
        key.truncate(MAX_KEY_LEN - suffix.len());
        key.push_str(&suffix);
    }
    key
}

/// Points `<home>/local/<sanitized path>/bin/<executable>` at a user-supplied
/// binary, by symlink where possible and by copy otherwise.
///
/// # Errors
/// Fails when the directory cannot be created or neither link nor copy works.
pub fn link_local(home: &Path, binary: &Path, executable: &str) -> Result<PathBuf> {
    let dir = home
        .join("local")
        .join(sanitize_key(&binary.to_string_lossy()))
        .join("bin");
    fs::create_dir_all(&dir)
        .with_context(|| format!("could not create directory {}", dir.display()))?;
    let dest = dir.join(executable);
    if fs::symlink_metadata(&dest).is_ok() {
        return Ok(dest);
    }
    if let Err(err) = symlink(binary, &dest) {
        debug!(error = %err, "symlink failed, copying {}", binary.display());
        fs::copy(binary, &dest).with_context(|| {
            format!(
                "could not copy file from {} to {}",
                binary.display(),
                dest.display()
            )
        })?;
        mark_executable(&dest)
            .with_context(|| format!("could not chmod file {}", dest.display()))?;
    }
    Ok(dest)
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request<'a>(source_key: &'a str, pinned: Option<&'a str>) -> CacheRequest<'a> {
        CacheRequest {
            source_key,
            artifact_name: "bazel-7.0.0-linux-x86_64",
            executable: "bazel",
            pinned_sha256: pinned,
        }
    }

    fn writer(contents: &'static [u8]) -> impl FnOnce(&Path, &str) -> Result<PathBuf> {
        move |dir, name| {
            let path = dir.join(name);
            fs::write(&path, contents)?;
            Ok(path)
        }
    }

    fn sha(contents: &[u8]) -> String {
        hex::encode(Sha256::digest(contents))
    }

    fn tmp_is_empty(cache: &ArtifactCache) -> Result<bool> {
        let dir = cache.root().join("_tmp");
        Ok(!dir.exists() || fs::read_dir(dir)?.next().is_none())
    }

    #[test]
    fn stores_by_digest_and_records_mapping() -> Result<()> {
        let home = tempfile::tempdir()?;
        let cache = ArtifactCache::new(home.path());
        let path = cache.ensure_cached(&request("bazelbuild", None), writer(b"binary-v7"))?;

        let digest = sha(b"binary-v7");
        assert_eq!(path, cache.binary_path(&digest, "bazel"));
        assert_eq!(compute_sha256(&path)?, digest);
        assert_eq!(
            fs::read_to_string(cache.mapping_path(&request("bazelbuild", None)))?,
            digest
        );
        assert!(tmp_is_empty(&cache)?);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o755);
        }
        Ok(())
    }

    #[test]
    fn second_lookup_skips_download() -> Result<()> {
        let home = tempfile::tempdir()?;
        let cache = ArtifactCache::new(home.path());
        let first = cache.ensure_cached(&request("bazelbuild", None), writer(b"bin"))?;
        let second = cache.ensure_cached(&request("bazelbuild", None), |_, _| {
            panic!("cache hit must not download")
        })?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn mirrors_with_identical_bytes_share_a_directory() -> Result<()> {
        let home = tempfile::tempdir()?;
        let cache = ArtifactCache::new(home.path());
        let a = sanitize_key("https://mirror-a.example.com/bazel");
        let b = sanitize_key("https://mirror-b.example.com/bazel");
        let from_a = cache.ensure_cached(&request(&a, None), writer(b"same"))?;
        let from_b = cache.ensure_cached(&request(&b, None), writer(b"same"))?;
        assert_eq!(from_a.parent(), from_b.parent());
        assert!(cache.mapping_path(&request(&a, None)).is_file());
        assert!(cache.mapping_path(&request(&b, None)).is_file());
        Ok(())
    }

    #[test]
    fn pinned_digest_mismatch_leaves_nothing_behind() -> Result<()> {
        let home = tempfile::tempdir()?;
        let cache = ArtifactCache::new(home.path());
        let wrong = "0".repeat(64);
        let err = cache
            .ensure_cached(&request("bazelbuild", Some(&wrong)), writer(b"payload"))
            .unwrap_err();
        let actual = sha(b"payload");
        match err.downcast_ref::<CacheError>() {
            Some(CacheError::DigestMismatch {
                actual: got,
                expected,
                ..
            }) => {
                assert_eq!(got, &actual);
                assert_eq!(expected, &wrong);
            }
            None => panic!("unexpected error: {err:#}"),
        }
        assert!(!cache.root().join("sha256").join(&actual).exists());
        assert!(!cache.mapping_path(&request("bazelbuild", None)).exists());
        assert!(tmp_is_empty(&cache)?);
        Ok(())
    }

    #[test]
    fn pinned_digest_is_case_insensitive() -> Result<()> {
        let home = tempfile::tempdir()?;
        let cache = ArtifactCache::new(home.path());
        let pin = sha(b"payload").to_ascii_uppercase();
        let path = cache.ensure_cached(&request("bazelbuild", Some(&pin)), writer(b"payload"))?;
        assert!(path.is_file());
        Ok(())
    }

    #[test]
    fn failed_download_cleans_scratch_space() -> Result<()> {
        let home = tempfile::tempdir()?;
        let cache = ArtifactCache::new(home.path());
        let result = cache.ensure_cached(&request("bazelbuild", None), |dir, name| {
            fs::write(dir.join(name), b"partial")?;
            anyhow::bail!("connection reset")
        });
        assert!(result.is_err());
        assert!(tmp_is_empty(&cache)?);
        assert!(!cache.root().join("sha256").exists());
        Ok(())
    }

    #[test]
    fn stale_mapping_triggers_download() -> Result<()> {
        let home = tempfile::tempdir()?;
        let cache = ArtifactCache::new(home.path());
        let req = request("bazelbuild", None);
        atomic_write(&cache.mapping_path(&req), "f".repeat(64).as_bytes())?;
        let path = cache.ensure_cached(&req, writer(b"fresh"))?;
        assert_eq!(path, cache.binary_path(&sha(b"fresh"), "bazel"));
        Ok(())
    }

    #[test]
    fn concurrent_placements_produce_one_binary() -> Result<()> {
        let home = tempfile::tempdir()?;
        let cache = Arc::new(ArtifactCache::new(home.path()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    cache.ensure_cached(&request("bazelbuild", None), writer(b"racy"))
                })
            })
            .collect();
        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.join().expect("thread panicked")?);
        }
        paths.dedup();
        assert_eq!(paths.len(), 1);

        let bin_dir = paths[0].parent().unwrap();
        let names: Vec<_> = fs::read_dir(bin_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| !name.ends_with(".lock"))
            .collect();
        assert_eq!(names, vec!["bazel".to_string()]);
        assert!(tmp_is_empty(&cache)?);
        Ok(())
    }

    #[test]
    fn sanitizes_keys() {
        assert_eq!(
            sanitize_key("https://example.com/a_b"),
            "https---example-com-a-b"
        );
        let long = format!("https://example.com/{}", "x".repeat(400));
        let key = sanitize_key(&long);
        assert_eq!(key.len(), 255);
        assert!(key.ends_with(&hex::encode(Sha256::digest(long.as_bytes()))));
        assert!(key.contains("..."));
    }

    #[test]
    fn links_local_binaries() -> Result<()> {
        let home = tempfile::tempdir()?;
        let source = home.path().join("my-bazel");
        fs::write(&source, b"#!/bin/sh\n")?;
        let linked = link_local(home.path(), &source, "bazel")?;
        assert!(linked.starts_with(home.path().join("local")));
        assert_eq!(fs::read(&linked)?, b"#!/bin/sh\n");
        assert_eq!(link_local(home.path(), &source, "bazel")?, linked);
        Ok(())
    }
}
