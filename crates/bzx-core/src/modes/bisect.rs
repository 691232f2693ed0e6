//! `--bisect=[~]A..B`: binary search over the upstream commits between two
//! builds for the first one that changes the outcome of a command.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bzx_domain::{TOOL_NAME, UPSTREAM_FORK};
use bzx_store::{Auth, HttpClient};
use serde::Deserialize;

use super::flags::startup_options;
use super::{BisectRange, Outcome, Session};

/// Exit code of a Bazel command interrupted by the user.
pub const INTERRUPTED: i32 = 8;

const PER_PAGE: usize = 250;

/// Linear history between two commits, oldest first. `old` may differ from
/// the requested commit when it was not an ancestor of the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRange {
    pub old: String,
    pub commits: Vec<String>,
}

/// Source of the commits to bisect over.
pub trait CommitHistory {
    /// Non-merge commits in `(old, new]`.
    fn between(&self, old: &str, new: &str) -> Result<CommitRange>;
}

/// The GitHub compare endpoint of the upstream repository.
pub struct GitHubCompare {
    http: Arc<HttpClient>,
    api: String,
    auth: Option<Auth>,
    per_page: usize,
}

#[derive(Debug, Deserialize)]
struct Comparison {
    #[serde(default)]
    commits: Vec<CompareCommit>,
    base_commit: CommitRef,
    merge_base_commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CompareCommit {
    sha: String,
    #[serde(default)]
    parents: Vec<CommitRef>,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

impl GitHubCompare {
    #[must_use]
    pub fn new(http: Arc<HttpClient>, api: &str, token: Option<&str>) -> Self {
        Self {
            http,
            api: api.trim_end_matches('/').to_string(),
            auth: token.map(|token| Auth::Token(token.to_string())),
            per_page: PER_PAGE,
        }
    }

    #[must_use]
    pub fn with_per_page(mut self, per_page: usize) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    fn page(&self, old: &str, new: &str, page: usize) -> Result<Comparison> {
        let url = format!(
            "{}/repos/{UPSTREAM_FORK}/{TOOL_NAME}/compare/{old}...{new}?page={page}&per_page={}",
            self.api, self.per_page
        );
        let fetched = self
            .http
            .fetch(&url, self.auth.as_ref())
            .with_context(|| format!("could not get commits from {url}"))?;
        let body = String::from_utf8_lossy(&fetched.body);
        match fetched.status {
            200 => {}
            404 => bail!("repository or commit not found: {body}"),
            403 => bail!(
                "github API rate limit hit, consider setting BZX_GITHUB_TOKEN: {body}"
            ),
            status => bail!("unexpected response status code {status}: {body}"),
        }
        serde_json::from_slice(&fetched.body)
            .with_context(|| format!("could not parse compare response from {url}"))
    }
}

impl CommitHistory for GitHubCompare {
    fn between(&self, old: &str, new: &str) -> Result<CommitRange> {
        let mut range = CommitRange {
            old: old.to_string(),
            commits: Vec::new(),
        };
        for page in 1.. {
            let comparison = self.page(old, new, page)?;
            if comparison.commits.is_empty() {
                break;
            }
            let merge_base = comparison.merge_base_commit.sha;
            if merge_base != comparison.base_commit.sha && merge_base != range.old {
                tracing::info!(
                    merge_base = %merge_base,
                    "the old Bazel commit is not an ancestor of the new one, using the merge base instead"
                );
                range.old = merge_base;
            }
            let fetched = comparison.commits.len();
            range.commits.extend(
                comparison
                    .commits
                    .into_iter()
                    .filter(|commit| commit.parents.len() == 1)
                    .map(|commit| commit.sha),
            );
            if fetched < self.per_page {
                break;
            }
        }
        Ok(range)
    }
}

struct Bisector<'s, 'a> {
    session: &'s mut Session<'a>,
    args: &'s [String],
    startup: Vec<String>,
    install: &'s dyn Fn(&str) -> Result<PathBuf>,
}

impl Bisector<'_, '_> {
    fn test_at(&mut self, commit: &str) -> Result<Outcome> {
        let bazel = self.install_at(commit)?;
        self.session.run_step(&bazel, &self.startup, self.args)
    }

    fn install_at(&self, commit: &str) -> Result<PathBuf> {
        (self.install)(commit).with_context(|| format!("could not install Bazel at commit {commit}"))
    }
}

/// Runs the bisection and prints the commit where the outcome flips.
/// `install` makes the Bazel binary built at a commit available locally.
///
/// # Errors
/// Fails when the commit list cannot be fetched or is empty, or when a
/// binary cannot be installed or run.
pub fn bisect(
    session: &mut Session<'_>,
    range: &BisectRange,
    args: &[String],
    history: &dyn CommitHistory,
    install: &dyn Fn(&str) -> Result<PathBuf>,
) -> Result<i32> {
    let (old_word, new_word) = if range.old_is_good {
        ("good", "bad")
    } else {
        ("bad", "good")
    };

    writeln!(
        session.out,
        "\n\n--- Getting the list of commits between {} and {}\n",
        range.old, range.new
    )?;
    let CommitRange { old, commits } = history.between(&range.old, &range.new)?;
    if commits.is_empty() {
        bail!(
            "no commits found between ({old}, {new}], the old commit should be first, maybe try with --bisect={new}..{old} or --bisect=~{old}..{new}?",
            new = range.new
        );
    }
    writeln!(
        session.out,
        "Found {} commits between ({old}, {}]",
        commits.len(),
        range.new
    )?;

    let mut bisector = Bisector {
        session,
        args,
        startup: startup_options(args),
        install,
    };
    let matches_old = |code: i32| (code == 0) == range.old_is_good;

    writeln!(
        bisector.session.out,
        "\n\n--- Verifying if the given {old_word} Bazel commit ({old}) is actually {old_word}\n"
    )?;
    match bisector.test_at(&old)? {
        Outcome::Stopped(code) => return Ok(code),
        Outcome::Exited(INTERRUPTED) => return interrupted(bisector.session),
        Outcome::Exited(code) if !matches_old(code) => {
            let verdict = if range.old_is_good {
                "already broken"
            } else {
                "already fixed"
            };
            writeln!(
                bisector.session.out,
                "Failure: Given {old_word} bazel commit is {verdict}."
            )?;
            return Ok(1);
        }
        Outcome::Exited(_) => {}
    }

    writeln!(bisector.session.out, "\n\n--- Start bisecting\n")?;
    let (mut left, mut right) = (0, commits.len());
    while left < right {
        let mid = (left + right) / 2;
        let commit = &commits[mid];
        writeln!(
            bisector.session.out,
            "\n\n--- Testing with Bazel built at {commit}, {} commits remaining...\n",
            right - left
        )?;
        let code = match bisector.test_at(commit)? {
            Outcome::Stopped(code) => return Ok(code),
            Outcome::Exited(INTERRUPTED) => return interrupted(bisector.session),
            Outcome::Exited(code) => code,
        };
        let verdict = if code == 0 { "Succeeded" } else { "Failed" };
        writeln!(bisector.session.out, "\n\n--- {verdict} at {commit}\n")?;
        if matches_old(code) {
            left = mid + 1;
        } else {
            right = mid;
        }
    }

    let out = &mut *bisector.session.out;
    writeln!(out, "\n\n--- Bisect Result\n")?;
    match commits.get(right) {
        Some(commit) => writeln!(
            out,
            "first {new_word} commit is https://github.com/{UPSTREAM_FORK}/{TOOL_NAME}/commit/{commit}"
        )?,
        None if range.old_is_good => {
            writeln!(out, "first bad commit not found, every commit succeeded.")?;
        }
        None => writeln!(out, "first good commit not found, every commit failed.")?,
    }
    out.flush()?;
    Ok(0)
}

fn interrupted(session: &mut Session<'_>) -> Result<i32> {
    writeln!(session.out, "Bisecting was interrupted, stopping...")?;
    Ok(INTERRUPTED)
}
