//! Makes the selected Bazel binary available on disk: resolves the label,
//! applies URL overrides and hands the download to the artifact cache.

use std::path::{Path, PathBuf};

use anyhow::Result;
use bzx_domain::{keys, parse_label, Config, ConfigError, VersionKind, UPSTREAM_FORK};
use bzx_store::{link_local, sanitize_key, ArtifactCache, CacheRequest, HttpClient, Netrc};
use tracing::debug;

use crate::format_url::build_url;
use crate::repos::{Repositories, Target};
use crate::resolve::Downloader;

/// Version reported for user-supplied binaries.
pub const LOCAL_VERSION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    pub path: PathBuf,
    pub version: String,
}

pub struct Installer<'a> {
    config: &'a Config,
    home: &'a Path,
    target: &'a Target,
    http: &'a HttpClient,
    repos: &'a Repositories,
}

impl<'a> Installer<'a> {
    #[must_use]
    pub fn new(
        config: &'a Config,
        home: &'a Path,
        target: &'a Target,
        http: &'a HttpClient,
        repos: &'a Repositories,
    ) -> Self {
        Self {
            config,
            home,
            target,
            http,
            repos,
        }
    }

    /// Returns a local path to the binary `label` names, downloading it into
    /// the cache when needed.
    ///
    /// # Errors
    /// Fails for invalid labels or URL overrides, resolution and download
    /// failures, and digest pin mismatches.
    pub fn install(&self, label: &str) -> Result<Installed> {
        let info = parse_label(label)?;
        let executable = self.target.platform.executable_name();
        if info.kind == VersionKind::AbsolutePath {
            let path = link_local(self.home, Path::new(&info.value), &executable)?;
            return Ok(Installed {
                path,
                version: LOCAL_VERSION.to_string(),
            });
        }

        let base_url = self.config.get(keys::BASE_URL);
        let format_url = self.config.get(keys::FORMAT_URL);
        if base_url.is_some() && format_url.is_some() {
            return Err(ConfigError::ConflictingUrls.into());
        }
        let pinned = self.config.get(keys::VERIFY_SHA256);
        if let Some(format) = format_url {
            build_url(format, &info.value, &self.target.platform, pinned)?;
        }

        let resolved = self.repos.resolve(self.home, &info, self.target)?;
        let version = resolved.version;
        debug!(label, version = %version, kind = ?resolved.kind, "resolved version");

        let source_key = match (base_url, format_url) {
            (Some(url), _) | (None, Some(url)) => sanitize_key(url),
            (None, None) => info.fork.clone().unwrap_or_else(|| UPSTREAM_FORK.to_string()),
        };
        let downloader: Downloader<'_> = match (base_url, format_url) {
            (Some(base), _) => {
                let url = format!(
                    "{}/{version}/{}",
                    base.trim_end_matches('/'),
                    self.target.artifact_file(&version)
                );
                let auth = Netrc::load()?.and_then(|netrc| netrc.auth_for_url(&url));
                Box::new(move |dir: &Path, file: &str| {
                    self.http.download_to_dir(&url, dir, file, auth.as_ref())
                })
            }
            (None, Some(format)) => {
                let url = build_url(format, &version, &self.target.platform, pinned)?;
                Box::new(move |dir: &Path, file: &str| {
                    self.http.download_to_dir(&url, dir, file, None)
                })
            }
            (None, None) => resolved.downloader,
        };

        let artifact_name = self.target.artifact_key(&version);
        let request = CacheRequest {
            source_key: &source_key,
            artifact_name: &artifact_name,
            executable: &executable,
            pinned_sha256: pinned,
        };
        let path = ArtifactCache::new(self.home).ensure_cached(&request, downloader)?;
        Ok(Installed { path, version })
    }
}
