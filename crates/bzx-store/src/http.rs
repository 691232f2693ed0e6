use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use tempfile::NamedTempFile;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::cache::atomic_write;
use crate::progress::DownloadProgress;

pub const DEFAULT_USER_AGENT: &str = concat!("bzx/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_JITTER_MS: u64 = 500;
const CACHE_FRESHNESS: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("unexpected status code while reading {url}: {status}")]
    Status { url: String, status: u16 },
    #[error("unable to complete request to {url} after {retries} retries. Most recent status: {last}")]
    RetriesExhausted {
        url: String,
        retries: u32,
        last: String,
    },
    #[error("unable to complete request to {url} within {limit:?}")]
    Deadline { url: String, limit: Duration },
}

/// Time source for retry waits, replaceable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_wall_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            max_wall_time: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// `Authorization: token <value>`, as the GitHub API expects.
    Token(String),
    Basic { login: String, password: String },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Token(_) => f.write_str("Auth::Token(..)"),
            Auth::Basic { login, .. } => write!(f, "Auth::Basic({login})"),
        }
    }
}

impl Auth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::Token(token) => request.header(AUTHORIZATION, format!("token {token}")),
            Auth::Basic { login, password } => request.basic_auth(login, Some(password)),
        }
    }
}

/// Final response of a request after transient failures were retried.
#[derive(Debug)]
pub struct Fetched {
    pub status: u16,
    pub body: Vec<u8>,
}

pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    show_progress: bool,
}

impl HttpClient {
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            policy: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            show_progress: false,
        })
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// GETs `url`, retrying 5xx, 408 and 429 responses and request timeouts.
    /// Any other status is returned to the caller.
    ///
    /// # Errors
    /// Fails on network errors, when retries run out, or when the wall-time budget is spent.
    pub fn fetch(&self, url: &str, auth: Option<&Auth>) -> Result<Fetched> {
        let mut response = self.send(url, auth)?;
        let status = response.status().as_u16();
        let mut body = Vec::new();
        response
            .read_to_end(&mut body)
            .with_context(|| format!("failed to read content at {url}"))?;
        Ok(Fetched { status, body })
    }

    /// Returns the body of a 200 response.
    ///
    /// # Errors
    /// Fails for any non-200 final status.
    pub fn read_remote(&self, url: &str, auth: Option<&Auth>) -> Result<Vec<u8>> {
        let fetched = self.fetch(url, auth)?;
        if fetched.status != 200 {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: fetched.status,
            }
            .into());
        }
        Ok(fetched.body)
    }

    /// Streams `url` into `<dest_dir>/<dest_file>` through a temp file in the
    /// same directory, marks it executable and returns the final path.
    ///
    /// # Errors
    /// Fails on HTTP errors or any filesystem error; the temp file is removed.
    pub fn download_to_dir(
        &self,
        url: &str,
        dest_dir: &Path,
        dest_file: &str,
        auth: Option<&Auth>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("could not create directory {}", dest_dir.display()))?;
        let dest = dest_dir.join(dest_file);

        info!("Downloading {url}...");
        let mut response = self.send(url, auth)?;
        if response.status() != StatusCode::OK {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            }
            .into());
        }

        let mut tmp = NamedTempFile::new_in(dest_dir)
            .with_context(|| format!("could not create temporary file in {}", dest_dir.display()))?;
        let mut progress = DownloadProgress::new(
            format!("Downloading {url}"),
            response.content_length(),
            self.show_progress,
        );
        let mut buf = [0u8; 64 * 1024];
        loop {
            let read = response
                .read(&mut buf)
                .with_context(|| format!("failed to read response body from {url}"))?;
            if read == 0 {
                break;
            }
            tmp.write_all(&buf[..read]).with_context(|| {
                format!("could not write to {}", tmp.path().display())
            })?;
            progress.advance(read as u64);
        }
        drop(progress);
        tmp.flush()?;
        mark_executable(tmp.path())
            .with_context(|| format!("could not chmod file {}", tmp.path().display()))?;
        tmp.persist(&dest)
            .map_err(|err| err.error)
            .with_context(|| format!("could not move download to {}", dest.display()))?;
        Ok(dest)
    }

    /// Returns `<home>/<cache_file>` when it is younger than an hour, otherwise
    /// downloads `url` and refreshes the cached copy.
    ///
    /// # Errors
    /// Fails when the download fails or the cache file cannot be written.
    pub fn maybe_cached_download(
        &self,
        home: &Path,
        url: &str,
        cache_file: &str,
        description: &str,
        auth: Option<&Auth>,
    ) -> Result<Vec<u8>> {
        let cache_path = home.join(cache_file);
        if is_fresh(&cache_path) {
            debug!(path = %cache_path.display(), "using cached {description}");
            return fs::read(&cache_path)
                .with_context(|| format!("could not read {}", cache_path.display()));
        }

        let body = self
            .read_remote(url, auth)
            .with_context(|| format!("could not download {description}"))?;
        atomic_write(&cache_path, &body)?;
        Ok(body)
    }

    fn send(&self, url: &str, auth: Option<&Auth>) -> Result<Response> {
        let deadline = self.clock.now() + self.policy.max_wall_time;
        let mut attempt = 0u32;
        loop {
            let mut request = self.client.get(url);
            if let Some(auth) = auth {
                request = auth.apply(request);
            }
            let (last, retry_after) = match request.send() {
                Ok(response) if !is_transient(response.status()) => return Ok(response),
                Ok(response) => (
                    response.status().to_string(),
                    retry_after(response.headers(), OffsetDateTime::now_utc()),
                ),
                Err(err) if err.is_timeout() => (err.to_string(), None),
                Err(err) => return Err(err).with_context(|| format!("could not fetch {url}")),
            };

            if attempt >= self.policy.max_retries {
                return Err(HttpError::RetriesExhausted {
                    url: url.to_string(),
                    retries: attempt,
                    last,
                }
                .into());
            }
            let wait = retry_after.unwrap_or_else(|| backoff(attempt));
            if self.clock.now() + wait > deadline {
                return Err(HttpError::Deadline {
                    url: url.to_string(),
                    limit: self.policy.max_wall_time,
                }
                .into());
            }
            debug!(url, attempt, ?wait, status = %last, "retrying request");
            self.clock.sleep(wait);
            attempt += 1;
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn backoff(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..=MAX_JITTER_MS);
    Duration::from_secs(1u64 << attempt.min(16)) + Duration::from_millis(jitter)
}

/// `Retry-After` as delta-seconds or an HTTP-date relative to `now`.
pub(crate) fn retry_after(headers: &HeaderMap, now: OffsetDateTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = OffsetDateTime::parse(value, &Rfc2822).ok()?;
    let delta = at - now;
    Some(if delta.is_negative() {
        Duration::ZERO
    } else {
        delta.unsigned_abs()
    })
}

fn is_fresh(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age < CACHE_FRESHNESS)
}

#[cfg(unix)]
pub(crate) fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
pub(crate) fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
