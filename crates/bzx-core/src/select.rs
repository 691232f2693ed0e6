//! Which version label an invocation asks for.

use std::path::Path;

use anyhow::Result;
use bzx_domain::{keys, read_version_file, Config};
use tracing::debug;

/// `USE_BAZEL_VERSION` from any config layer, then the workspace's
/// `.bazelversion`, then `USE_BAZEL_FALLBACK_VERSION`.
///
/// # Errors
/// Fails when `.bazelversion` is unreadable or the fallback is invalid or forbidden.
pub fn select_label(config: &Config, workspace_root: Option<&Path>) -> Result<String> {
    if let Some(label) = config.get(keys::USE_BAZEL_VERSION) {
        debug!(label, source = ?config.source_of(keys::USE_BAZEL_VERSION), "version from config");
        return Ok(label.to_string());
    }
    if let Some(root) = workspace_root {
        if let Some(label) = read_version_file(root)? {
            debug!(label = %label, root = %root.display(), "version from .bazelversion");
            return Ok(label);
        }
    }
    Ok(config.fallback_label()?)
}
