//! Network and disk leaves of the launcher: a retrying HTTP client, `.netrc`
//! credentials, download progress, the content-addressed artifact cache and
//! shell completion scripts unpacked from release installers.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub mod cache;
pub mod completion;
pub mod http;
pub mod netrc;
pub mod progress;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use cache::{link_local, sanitize_key, ArtifactCache, CacheError, CacheRequest};
pub use completion::{CompletionError, BASH_COMPLETION, FISH_COMPLETION};
pub use http::{Auth, Clock, Fetched, HttpClient, HttpError, RetryPolicy, SystemClock};
pub use netrc::{Credentials, Netrc};
pub use progress::progress_enabled;

/// Lowercase hex SHA-256 of a file's contents.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn compute_sha256(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buf)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
