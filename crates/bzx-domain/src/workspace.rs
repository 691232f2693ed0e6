use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Files whose presence marks a directory as the workspace root.
pub const BOUNDARY_FILES: [&str; 4] = ["MODULE.bazel", "REPO.bazel", "WORKSPACE.bazel", "WORKSPACE"];

/// Per-workspace version pin.
pub const VERSION_FILE: &str = ".bazelversion";

/// Walks up from `cwd` and returns the first directory holding a boundary file.
#[must_use]
pub fn find_workspace_root(cwd: &Path) -> Option<PathBuf> {
    let mut dir = cwd.to_path_buf();
    loop {
        if BOUNDARY_FILES
            .iter()
            .any(|name| dir.join(name).is_file())
        {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Returns the trimmed first line of `<root>/.bazelversion`, if it is non-empty.
///
/// # Errors
/// Returns an error if the file exists but cannot be read.
pub fn read_version_file(root: &Path) -> Result<Option<String>> {
    let path = root.join(VERSION_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("could not read {}", path.display()));
        }
    };
    Ok(contents
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned))
}
