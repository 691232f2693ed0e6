//! Version labels: the strings users write in `.bazelversion` or
//! `USE_BAZEL_VERSION`, and the ordering of the concrete versions they resolve to.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Fork name of the official releases; `bazelbuild/7.0.0` is the same as `7.0.0`.
pub const UPSTREAM_FORK: &str = "bazelbuild";

static LATEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^latest(?:-(\d+))?$").expect("constant regex pattern is valid")
});
static RELEASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("constant regex pattern is valid"));
static TRACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.(x|\*)$").expect("constant regex pattern is valid"));
static PATCHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+-\w+$").expect("constant regex pattern is valid"));
static CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+rc\d+$").expect("constant regex pattern is valid")
});
static COMMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{40}$").expect("constant regex pattern is valid"));
static ROLLING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.0\.0-pre\.\d{8}(\.\d+){1,2}$").expect("constant regex pattern is valid")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version \"{0}\"")]
    Invalid(String),
    #[error("invalid version \"{0}\", could not parse version with more than one slash")]
    TooManySlashes(String),
    #[error("invalid version \"{0}\", could not parse offset")]
    Offset(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    Release,
    Candidate,
    Rolling,
    Commit,
    AbsolutePath,
}

/// Which kinds of LTS builds a relative label may resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidatePolicy {
    ReleaseOnly,
    CandidateOnly,
    Either,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// `None` for upstream builds.
    pub fork: Option<String>,
    /// The label without its fork prefix.
    pub value: String,
    pub kind: VersionKind,
    pub is_relative: bool,
    pub latest_offset: usize,
    pub track: Option<u64>,
    pub must_be_release: bool,
    pub must_be_candidate: bool,
    /// `last_downstream_green` rather than `last_green`.
    pub downstream: bool,
}

impl VersionInfo {
    fn new(fork: Option<String>, value: &str, kind: VersionKind) -> Self {
        Self {
            fork,
            value: value.to_string(),
            kind,
            is_relative: false,
            latest_offset: 0,
            track: None,
            must_be_release: false,
            must_be_candidate: false,
            downstream: false,
        }
    }

    #[must_use]
    pub fn is_fork(&self) -> bool {
        self.fork.is_some()
    }

    #[must_use]
    pub fn candidate_policy(&self) -> CandidatePolicy {
        if self.must_be_candidate {
            CandidatePolicy::CandidateOnly
        } else if self.must_be_release {
            CandidatePolicy::ReleaseOnly
        } else {
            CandidatePolicy::Either
        }
    }
}

/// Parses a full label, including an optional `<fork>/` prefix.
///
/// # Errors
/// Returns an error for labels outside the grammar.
pub fn parse_label(label: &str) -> Result<VersionInfo, VersionError> {
    let label = label.trim();
    if Path::new(label).is_absolute() {
        return Ok(VersionInfo::new(None, label, VersionKind::AbsolutePath));
    }
    let (fork, value) = match label.split('/').collect::<Vec<_>>().as_slice() {
        [value] => (None, *value),
        [fork, value] => (Some(*fork), *value),
        _ => return Err(VersionError::TooManySlashes(label.to_string())),
    };
    let fork = fork
        .filter(|name| !name.is_empty() && *name != UPSTREAM_FORK)
        .map(ToOwned::to_owned);
    parse_version(fork, value)
}

/// Classifies a label without fork prefix.
///
/// # Errors
/// Returns an error for labels outside the grammar.
pub fn parse_version(fork: Option<String>, value: &str) -> Result<VersionInfo, VersionError> {
    if let Some(captures) = LATEST.captures(value) {
        let mut info = VersionInfo::new(fork, value, VersionKind::Release);
        info.is_relative = true;
        info.must_be_release = true;
        if let Some(offset) = captures.get(1) {
            info.latest_offset = offset
                .as_str()
                .parse::<usize>()
                .ok()
                .filter(|offset| offset.checked_add(1).is_some())
                .ok_or_else(|| VersionError::Offset(value.to_string()))?;
        }
        return Ok(info);
    }
    if RELEASE.is_match(value) || PATCHED.is_match(value) {
        let mut info = VersionInfo::new(fork, value, VersionKind::Release);
        info.must_be_release = true;
        return Ok(info);
    }
    if let Some(captures) = TRACK.captures(value) {
        let mut info = VersionInfo::new(fork, value, VersionKind::Release);
        info.is_relative = true;
        info.track = Some(
            captures[1]
                .parse()
                .map_err(|_| VersionError::Invalid(value.to_string()))?,
        );
        info.must_be_release = &captures[2] == "x";
        return Ok(info);
    }
    if CANDIDATE.is_match(value) {
        let mut info = VersionInfo::new(fork, value, VersionKind::Candidate);
        info.must_be_candidate = true;
        return Ok(info);
    }
    if value == "last_rc" {
        let mut info = VersionInfo::new(fork, value, VersionKind::Candidate);
        info.is_relative = true;
        info.must_be_candidate = true;
        return Ok(info);
    }
    if COMMIT.is_match(value) {
        return Ok(VersionInfo::new(fork, value, VersionKind::Commit));
    }
    if value == "last_green" || value == "last_downstream_green" {
        let mut info = VersionInfo::new(fork, value, VersionKind::Commit);
        info.is_relative = true;
        info.downstream = value == "last_downstream_green";
        return Ok(info);
    }
    if ROLLING.is_match(value) {
        return Ok(VersionInfo::new(fork, value, VersionKind::Rolling));
    }
    if value == "rolling" {
        let mut info = VersionInfo::new(fork, value, VersionKind::Rolling);
        info.is_relative = true;
        return Ok(info);
    }
    Err(VersionError::Invalid(value.to_string()))
}

#[must_use]
pub fn is_commit_hash(value: &str) -> bool {
    COMMIT.is_match(value)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Identifier {
    Numeric(u64),
    Alpha(String),
}

/// Sort key for concrete versions: a numeric release triple plus pre-release
/// identifiers (`rc2`, `pre.20240101.1`, patch suffixes). A version with
/// pre-release identifiers sorts before the same release without them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionKey {
    release: Vec<u64>,
    pre: Vec<Identifier>,
}

impl VersionKey {
    #[must_use]
    pub fn release(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            release: vec![major, minor, patch],
            pre: Vec::new(),
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let split = value
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(value.len());
        let (numbers, rest) = value.split_at(split);
        let numbers = numbers.strip_suffix('.').unwrap_or(numbers);
        if numbers.is_empty() {
            return None;
        }
        let release = numbers
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        let rest = rest.strip_prefix('-').unwrap_or(rest);
        let mut pre = Vec::new();
        for part in rest.split(['.', '-']).filter(|part| !part.is_empty()) {
            pre.extend(split_identifiers(part));
        }
        Some(Self { release, pre })
    }
}

fn split_identifiers(part: &str) -> Vec<Identifier> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut numeric = false;
    for c in part.chars() {
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != numeric {
            out.push(identifier(&current, numeric));
            current.clear();
        }
        numeric = is_digit;
        current.push(c);
    }
    if !current.is_empty() {
        out.push(identifier(&current, numeric));
    }
    out
}

fn identifier(text: &str, numeric: bool) -> Identifier {
    match text.parse() {
        Ok(number) if numeric => Identifier::Numeric(number),
        _ => Identifier::Alpha(text.to_string()),
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.release.len().max(other.release.len());
        for idx in 0..width {
            let left = self.release.get(idx).copied().unwrap_or(0);
            let right = other.release.get(idx).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.pre.cmp(&other.pre),
        }
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders concrete versions; strings that do not parse sort first.
#[must_use]
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    match (VersionKey::parse(left), VersionKey::parse(right)) {
        (Some(a), Some(b)) => a.cmp(&b).then_with(|| left.cmp(right)),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

pub fn sort_ascending(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_versions(a, b));
}
