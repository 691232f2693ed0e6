//! Shell completion scripts shipped inside Bazel's self-extracting installer.
//!
//! Scripts are unpacked to `sha256/<installer digest>/completion/`, next to
//! the binaries, and `metadata/<source key>/<installer name>` maps the
//! installer to its digest.

use std::fs;
use std::io::{Cursor, ErrorKind, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tracing::debug;
use zip::ZipArchive;

use crate::cache::{atomic_write, random_name, ArtifactCache};

pub const BASH_COMPLETION: &str = "bazel-complete.bash";
pub const FISH_COMPLETION: &str = "bazel.fish";

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("could not find zip file in installer script")]
    NoArchive,
    #[error("{BASH_COMPLETION} not found in zip file")]
    MissingBash,
}

impl ArtifactCache {
    #[must_use]
    pub fn completion_dir(&self, digest: &str) -> PathBuf {
        self.root().join("sha256").join(digest).join("completion")
    }

    fn installer_mapping(&self, source_key: &str, installer: &str) -> PathBuf {
        self.root().join("metadata").join(source_key).join(installer)
    }

    /// Returns the directory holding the completion scripts of `installer`,
    /// downloading it through `download(dir, file)` when they are not
    /// unpacked yet.
    ///
    /// # Errors
    /// Fails on download errors, installers without an embedded archive or
    /// bash script, and filesystem errors.
    pub fn ensure_completions<F>(
        &self,
        source_key: &str,
        installer: &str,
        download: F,
    ) -> Result<PathBuf>
    where
        F: FnOnce(&Path, &str) -> Result<PathBuf>,
    {
        let mapping = self.installer_mapping(source_key, installer);
        if let Some(dir) = self.cached_completions(&mapping)? {
            debug!(dir = %dir.display(), "completion scripts cached");
            return Ok(dir);
        }

        let tmp_dir = self.tmp_dir();
        fs::create_dir_all(&tmp_dir)
            .with_context(|| format!("could not create directory {}", tmp_dir.display()))?;
        let tmp_name = format!("{}-installer", random_name());
        let _scratch = TempPath::from_path(tmp_dir.join(&tmp_name));
        let downloaded = TempPath::from_path(download(&tmp_dir, &tmp_name)?);
        let contents = fs::read(&downloaded)
            .with_context(|| format!("failed to read installer {}", downloaded.display()))?;
        let digest = hex::encode(Sha256::digest(&contents));

        let dir = self.completion_dir(&digest);
        if !dir.join(BASH_COMPLETION).is_file() {
            for (name, script) in extract_completion_scripts(&contents)? {
                atomic_write(&dir.join(name), &script)
                    .with_context(|| format!("failed to write {name}"))?;
            }
        }
        atomic_write(&mapping, digest.as_bytes()).context("failed to write mapping file")?;
        Ok(dir)
    }

    fn cached_completions(&self, mapping: &Path) -> Result<Option<PathBuf>> {
        let digest = match fs::read_to_string(mapping) {
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
        let dir = self.completion_dir(digest);
        Ok(dir.join(BASH_COMPLETION).is_file().then_some(dir))
    }
}

/// Unpacks the completion scripts from the zip archive appended to an
/// installer script. Only the bash script is required; fish completion
/// ships with newer releases.
///
/// # Errors
/// Fails when no archive is embedded, it cannot be read, or it lacks the
/// bash script.
pub fn extract_completion_scripts(installer: &[u8]) -> Result<Vec<(&'static str, Vec<u8>)>> {
    let start = installer
        .windows(ZIP_MAGIC.len())
        .position(|window| window == ZIP_MAGIC)
        .ok_or(CompletionError::NoArchive)?;
    let mut archive = ZipArchive::new(Cursor::new(&installer[start..]))
        .context("could not read zip archive embedded in installer")?;
    let mut scripts = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = match entry.name() {
            BASH_COMPLETION => BASH_COMPLETION,
            FISH_COMPLETION => FISH_COMPLETION,
            _ => continue,
        };
        let mut script = Vec::new();
        entry
            .read_to_end(&mut script)
            .with_context(|| format!("could not read completion file {name}"))?;
        scripts.push((name, script));
    }
    if !scripts.iter().any(|(name, _)| *name == BASH_COMPLETION) {
        return Err(CompletionError::MissingBash.into());
    }
    Ok(scripts)
}
