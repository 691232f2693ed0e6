//! Turns a parsed version label into a concrete version plus a bound
//! downloader for the index that serves it.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bzx_domain::{sort_ascending, VersionInfo, VersionKind};
use tracing::debug;

use crate::repos::{FilterOpts, Repositories, Target};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("forks do not support last_rc, last_green and last_downstream_green")]
    ForkRelative,
    #[error("forks only support absolute versions, latest(-N) and <track>.x labels, got \"{0}\"")]
    ForkRolling(String),
    #[error(
        "unable to determine latest version: requested {requested} latest releases, but only found {found}"
    )]
    NotEnoughReleases { requested: usize, found: usize },
    #[error("no rolling releases available")]
    NoRolling,
}

/// Which index a resolved version is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoKind {
    Lts,
    Fork,
    Commit,
    Rolling,
}

/// `downloader(dest_dir, dest_file)` fetches the resolved version.
pub type Downloader<'a> = Box<dyn FnOnce(&Path, &str) -> Result<PathBuf> + 'a>;

pub struct Resolved<'a> {
    pub version: String,
    pub kind: RepoKind,
    pub downloader: Downloader<'a>,
}

impl std::fmt::Debug for Resolved<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("version", &self.version)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Repositories {
    /// Resolves `info` against the matching index.
    ///
    /// # Errors
    /// Fails when the index cannot be queried or holds too few matching versions.
    pub fn resolve<'a>(
        &'a self,
        home: &Path,
        info: &VersionInfo,
        target: &'a Target,
    ) -> Result<Resolved<'a>> {
        if let Some(fork) = &info.fork {
            return self.resolve_fork(home, fork, info, target);
        }
        match info.kind {
            VersionKind::Release | VersionKind::Candidate => self.resolve_lts(info, target),
            VersionKind::Commit => self.resolve_commit(info, target),
            VersionKind::Rolling => self.resolve_rolling(info, target),
            VersionKind::AbsolutePath => {
                bail!("\"{}\" is a local path, not a version", info.value)
            }
        }
    }

    fn resolve_fork<'a>(
        &'a self,
        home: &Path,
        fork: &str,
        info: &VersionInfo,
        target: &'a Target,
    ) -> Result<Resolved<'a>> {
        if info.is_relative && matches!(info.kind, VersionKind::Candidate | VersionKind::Commit) {
            return Err(ResolveError::ForkRelative.into());
        }
        if info.is_relative && info.kind == VersionKind::Rolling {
            return Err(ResolveError::ForkRolling(info.value.clone()).into());
        }
        let version = if info.is_relative {
            let mut available: Vec<String> = self
                .forks
                .get()?
                .versions(home, fork)?
                .into_iter()
                .filter(|version| info.track.is_none_or(|track| major_of(version) == Some(track)))
                .collect();
            sort_ascending(&mut available);
            pick_from_ascending(&available, info.latest_offset)?
        } else {
            info.value.clone()
        };

        let fork = fork.to_string();
        let bound = version.clone();
        Ok(Resolved {
            version,
            kind: RepoKind::Fork,
            downloader: Box::new(move |dir: &Path, file: &str| {
                self.forks.get()?.download(&fork, &bound, target, dir, file)
            }),
        })
    }

    fn resolve_lts<'a>(&'a self, info: &VersionInfo, target: &'a Target) -> Result<Resolved<'a>> {
        let version = if info.is_relative {
            let opts = FilterOpts {
                max_results: info.latest_offset.saturating_add(1),
                track: info.track,
                policy: info.candidate_policy(),
            };
            let mut available = self
                .lts
                .get()?
                .versions(&opts)
                .context("unable to determine latest version")?;
            sort_ascending(&mut available);
            debug!(label = %info.value, ?available, "resolving relative version");
            pick_from_ascending(&available, info.latest_offset)?
        } else {
            info.value.clone()
        };

        let bound = version.clone();
        Ok(Resolved {
            version,
            kind: RepoKind::Lts,
            downloader: Box::new(move |dir: &Path, file: &str| {
                self.lts.get()?.download(&bound, target, dir, file)
            }),
        })
    }

    fn resolve_commit<'a>(
        &'a self,
        info: &VersionInfo,
        target: &'a Target,
    ) -> Result<Resolved<'a>> {
        let version = if info.is_relative {
            self.commits
                .get()?
                .last_green(info.downstream)
                .context("cannot resolve last green commit")?
        } else {
            info.value.clone()
        };

        let bound = version.clone();
        Ok(Resolved {
            version,
            kind: RepoKind::Commit,
            downloader: Box::new(move |dir: &Path, file: &str| {
                self.commits.get()?.download(&bound, target, dir, file)
            }),
        })
    }

    fn resolve_rolling<'a>(
        &'a self,
        info: &VersionInfo,
        target: &'a Target,
    ) -> Result<Resolved<'a>> {
        let version = if info.is_relative {
            self.rolling
                .get()?
                .versions()?
                .pop()
                .ok_or(ResolveError::NoRolling)?
        } else {
            info.value.clone()
        };

        let bound = version.clone();
        Ok(Resolved {
            version,
            kind: RepoKind::Rolling,
            downloader: Box::new(move |dir: &Path, file: &str| {
                self.rolling.get()?.download(&bound, target, dir, file)
            }),
        })
    }
}

fn major_of(version: &str) -> Option<u64> {
    version
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .split('.')
        .next()?
        .parse()
        .ok()
}

/// Picks the entry `offset` places below the newest one.
fn pick_from_ascending(available: &[String], offset: usize) -> Result<String> {
    let requested = offset.saturating_add(1);
    if available.len() < requested {
        return Err(ResolveError::NotEnoughReleases {
            requested,
            found: available.len(),
        }
        .into());
    }
    Ok(available[available.len() - requested].clone())
}
