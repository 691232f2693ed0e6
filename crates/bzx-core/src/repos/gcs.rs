//! Upstream builds hosted on Google Cloud Storage: releases, release
//! candidates, rolling releases and per-commit CI artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bzx_domain::{is_commit_hash, sort_ascending};
use bzx_store::HttpClient;
use serde::Deserialize;
use tracing::{debug, info};

use super::{CommitIndex, FilterOpts, LtsIndex, RollingIndex, Target};

const LISTING_URL: &str = "https://www.googleapis.com/storage/v1/b/bazel/o";
const RELEASES_URL: &str = "https://releases.bazel.build";
const COMMITS_URL: &str = "https://storage.googleapis.com/bazel-builds/artifacts";
const LAST_GREEN_URL: &str =
    "https://storage.googleapis.com/bazel-untrusted-builds/last_green_commit/";
const LAST_GREEN_PIPELINE: &str = "github.com/bazelbuild/bazel.git/bazel-bazel";
const LAST_GREEN_DOWNSTREAM: &str = "downstream_pipeline";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsEndpoints {
    /// Object listing API of the release bucket.
    pub listing: String,
    /// Host of release, candidate and rolling artifacts.
    pub releases: String,
    /// Host of per-commit artifacts.
    pub commits: String,
    /// Directory holding the last-green commit files.
    pub last_green: String,
}

impl Default for GcsEndpoints {
    fn default() -> Self {
        Self {
            listing: LISTING_URL.to_string(),
            releases: RELEASES_URL.to_string(),
            commits: COMMITS_URL.to_string(),
            last_green: LAST_GREEN_URL.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListResponse {
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    items: Vec<serde_json::Value>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Default)]
struct Listing {
    prefixes: Vec<String>,
    has_items: bool,
}

pub struct GcsRepo {
    http: Arc<HttpClient>,
    endpoints: GcsEndpoints,
}

impl GcsRepo {
    #[must_use]
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self::with_endpoints(http, GcsEndpoints::default())
    }

    #[must_use]
    pub fn with_endpoints(http: Arc<HttpClient>, endpoints: GcsEndpoints) -> Self {
        Self { http, endpoints }
    }

    fn list(&self, prefix: &str) -> Result<Listing> {
        let mut base = format!("{}?delimiter=/", self.endpoints.listing);
        if !prefix.is_empty() {
            base.push_str("&prefix=");
            base.push_str(prefix);
        }

        let mut listing = Listing::default();
        let mut page_token: Option<String> = None;
        loop {
            let url = match &page_token {
                Some(token) => format!("{base}&pageToken={token}"),
                None => base.clone(),
            };
            let body = self
                .http
                .read_remote(&url, None)
                .with_context(|| format!("could not list GCS objects at {url}"))?;
            let response: ListResponse = serde_json::from_slice(&body)
                .with_context(|| format!("could not parse GCS index JSON from {url}"))?;
            listing.prefixes.extend(response.prefixes);
            listing.has_items |= !response.items.is_empty();
            match response.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(listing),
            }
        }
    }

    /// Base versions in ascending order.
    fn history(&self) -> Result<Vec<String>> {
        let listing = self
            .list("")
            .context("could not list Bazel versions in GCS bucket")?;
        let mut versions = versions_from_prefixes(&listing.prefixes);
        sort_ascending(&mut versions);
        if versions.is_empty() {
            bail!("could not find any Bazel versions");
        }
        Ok(versions)
    }

    fn has_release(&self, base: &str) -> Result<bool> {
        let listing = self
            .list(&format!("{base}/release/"))
            .with_context(|| format!("could not list available releases for {base}"))?;
        Ok(listing.has_items)
    }

    /// Release candidates of `base`, newest first.
    fn candidates(&self, base: &str) -> Result<Vec<String>> {
        let listing = self
            .list(&format!("{base}/"))
            .with_context(|| format!("could not list release candidates for {base}"))?;
        let mut candidates: Vec<String> = versions_from_prefixes(&listing.prefixes)
            .into_iter()
            .filter(|version| version.contains("rc"))
            .collect();
        sort_ascending(&mut candidates);
        candidates.reverse();
        Ok(candidates)
    }
}

/// `7.0.0/` becomes `7.0.0`, `7.0.0/rc1/` becomes `7.0.0rc1` and
/// `7.0.0/release/` becomes `7.0.0`.
fn versions_from_prefixes(prefixes: &[String]) -> Vec<String> {
    prefixes
        .iter()
        .map(|prefix| {
            let joined = prefix.replace('/', "");
            joined
                .strip_suffix("release")
                .map_or(joined.clone(), ToOwned::to_owned)
        })
        .collect()
}

fn major_of(version: &str) -> Option<u64> {
    version.split('.').next()?.parse().ok()
}

impl LtsIndex for GcsRepo {
    fn versions(&self, opts: &FilterOpts) -> Result<Vec<String>> {
        let history = self.history()?;
        let mut matches = Vec::new();
        for base in history.iter().rev() {
            if matches.len() >= opts.max_results {
                break;
            }
            if let Some(track) = opts.track {
                match major_of(base) {
                    Some(major) if major > track => continue,
                    Some(major) if major < track => break,
                    Some(_) => {}
                    None => continue,
                }
            }
            if opts.admits_release() {
                if self.has_release(base)? {
                    matches.push(base.clone());
                } else if !opts.admits_candidates() {
                    debug!(base, "no release published yet, stepping back to an older base");
                }
            }
            if opts.admits_candidates() {
                matches.extend(self.candidates(base)?);
            }
        }
        matches.truncate(opts.max_results);
        Ok(matches)
    }

    fn download(
        &self,
        version: &str,
        target: &Target,
        dest_dir: &Path,
        dest_file: &str,
    ) -> Result<PathBuf> {
        let file = target.artifact_file(version);
        let url = match version.split_once("rc") {
            Some((base, number)) => {
                format!("{}/{base}/rc{number}/{file}", self.endpoints.releases)
            }
            None => format!("{}/{version}/release/{file}", self.endpoints.releases),
        };
        self.http.download_to_dir(&url, dest_dir, dest_file, None)
    }
}

impl CommitIndex for GcsRepo {
    fn last_green(&self, downstream: bool) -> Result<String> {
        let suffix = if downstream {
            LAST_GREEN_DOWNSTREAM
        } else {
            LAST_GREEN_PIPELINE
        };
        let url = format!("{}{suffix}", self.endpoints.last_green);
        let body = self
            .http
            .read_remote(&url, None)
            .context("could not determine last green commit")?;
        let commit = String::from_utf8_lossy(&body).trim().to_string();
        if !is_commit_hash(&commit) {
            bail!("invalid commit hash \"{commit}\" in {url}");
        }
        Ok(commit)
    }

    fn download(
        &self,
        commit: &str,
        target: &Target,
        dest_dir: &Path,
        dest_file: &str,
    ) -> Result<PathBuf> {
        info!("Using unreleased version at commit {commit}");
        let url = format!(
            "{}/{}/{commit}/{}",
            self.endpoints.commits,
            target.platform.commit_label(),
            target.platform.executable_name()
        );
        self.http.download_to_dir(&url, dest_dir, dest_file, None)
    }
}

impl RollingIndex for GcsRepo {
    fn versions(&self) -> Result<Vec<String>> {
        let history = self.history()?;
        for base in history.iter().rev().take(2) {
            let listing = self
                .list(&format!("{base}/rolling/"))
                .with_context(|| format!("could not list rolling releases for {base}"))?;
            let mut releases: Vec<String> = listing
                .prefixes
                .iter()
                .filter(|prefix| !prefix.contains("rc"))
                .filter_map(|prefix| prefix.split('/').nth(2))
                .filter(|version| !version.is_empty())
                .map(ToOwned::to_owned)
                .collect();
            if !releases.is_empty() {
                sort_ascending(&mut releases);
                return Ok(releases);
            }
            debug!(base, "no rolling releases, falling back one track");
        }
        Ok(Vec::new())
    }

    fn download(
        &self,
        version: &str,
        target: &Target,
        dest_dir: &Path,
        dest_file: &str,
    ) -> Result<PathBuf> {
        let base = version.split('-').next().unwrap_or(version);
        let url = format!(
            "{}/{base}/rolling/{version}/{}",
            self.endpoints.releases,
            target.artifact_file(version)
        );
        self.http.download_to_dir(&url, dest_dir, dest_file, None)
    }
}
