//! Remote indexes of Bazel builds.
//!
//! Each capability is a trait; [`Repositories`] holds one slot per capability.
//! A slot without a backing implementation answers every call with a fixed
//! error, so callers never branch on availability.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use bzx_domain::{CandidatePolicy, Flavor, Platform};

pub mod gcs;
pub mod github;

pub use gcs::{GcsEndpoints, GcsRepo};
pub use github::{GitHubEndpoints, GitHubRepo};

/// What a download needs to know about the host to pick an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub platform: Platform,
    pub flavor: Flavor,
}

impl Target {
    /// Remote file name of `version` for this host, with executable suffix.
    #[must_use]
    pub fn artifact_file(&self, version: &str) -> String {
        self.platform.artifact_name(self.flavor, version, true)
    }

    /// Cache key of `version` for this host, without executable suffix.
    #[must_use]
    pub fn artifact_key(&self, version: &str) -> String {
        self.platform.artifact_name(self.flavor, version, false)
    }
}

/// Narrows an LTS listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOpts {
    /// Stop once this many matches are collected.
    pub max_results: usize,
    /// Only versions whose major component equals this.
    pub track: Option<u64>,
    pub policy: CandidatePolicy,
}

impl FilterOpts {
    #[must_use]
    pub fn admits_release(&self) -> bool {
        self.policy != CandidatePolicy::CandidateOnly
    }

    #[must_use]
    pub fn admits_candidates(&self) -> bool {
        self.policy != CandidatePolicy::ReleaseOnly
    }
}

/// Releases and release candidates published by the upstream project.
pub trait LtsIndex {
    /// Matching versions, newest first, at most `opts.max_results` of them.
    fn versions(&self, opts: &FilterOpts) -> Result<Vec<String>>;

    /// Downloads a release or release candidate to `<dest_dir>/<dest_file>`.
    fn download(
        &self,
        version: &str,
        target: &Target,
        dest_dir: &Path,
        dest_file: &str,
    ) -> Result<PathBuf>;
}

/// Release lists of named forks.
pub trait ForkIndex {
    /// Non-prerelease versions published by `fork`, in listing order.
    fn versions(&self, home: &Path, fork: &str) -> Result<Vec<String>>;

    fn download(
        &self,
        fork: &str,
        version: &str,
        target: &Target,
        dest_dir: &Path,
        dest_file: &str,
    ) -> Result<PathBuf>;
}

/// CI builds at individual commits.
pub trait CommitIndex {
    /// Most recent commit that passed CI, or the downstream pipeline.
    fn last_green(&self, downstream: bool) -> Result<String>;

    fn download(
        &self,
        commit: &str,
        target: &Target,
        dest_dir: &Path,
        dest_file: &str,
    ) -> Result<PathBuf>;
}

/// Rolling releases of the newest track.
pub trait RollingIndex {
    /// Rolling versions in ascending order.
    fn versions(&self) -> Result<Vec<String>>;

    fn download(
        &self,
        version: &str,
        target: &Target,
        dest_dir: &Path,
        dest_file: &str,
    ) -> Result<PathBuf>;
}

/// A capability slot.
pub enum Repo<T: ?Sized> {
    Available(Box<T>),
    Unsupported(&'static str),
}

impl<T: ?Sized> Repo<T> {
    /// # Errors
    /// Returns the slot's error when no implementation backs it.
    pub fn get(&self) -> Result<&T> {
        match self {
            Repo::Available(repo) => Ok(&**repo),
            Repo::Unsupported(reason) => Err(anyhow!(*reason)),
        }
    }
}

pub struct Repositories {
    pub lts: Repo<dyn LtsIndex>,
    pub forks: Repo<dyn ForkIndex>,
    pub commits: Repo<dyn CommitIndex>,
    pub rolling: Repo<dyn RollingIndex>,
}

impl Repositories {
    /// All slots unsupported; fill the ones a caller needs.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            lts: Repo::Unsupported("official Bazel releases are not supported"),
            forks: Repo::Unsupported("forked versions of Bazel are not supported"),
            commits: Repo::Unsupported("Bazel versions built at commits are not supported"),
            rolling: Repo::Unsupported("rolling Bazel releases are not supported"),
        }
    }

    #[must_use]
    pub fn with_lts(mut self, repo: Box<dyn LtsIndex>) -> Self {
        self.lts = Repo::Available(repo);
        self
    }

    #[must_use]
    pub fn with_forks(mut self, repo: Box<dyn ForkIndex>) -> Self {
        self.forks = Repo::Available(repo);
        self
    }

    #[must_use]
    pub fn with_commits(mut self, repo: Box<dyn CommitIndex>) -> Self {
        self.commits = Repo::Available(repo);
        self
    }

    #[must_use]
    pub fn with_rolling(mut self, repo: Box<dyn RollingIndex>) -> Self {
        self.rolling = Repo::Available(repo);
        self
    }
}
