//! `bazel completion bash|fish`: prints the completion script shipped with
//! the selected release instead of running Bazel.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use bzx_domain::{keys, Config, ConfigError, Platform, UPSTREAM_FORK};
use bzx_store::{sanitize_key, ArtifactCache, HttpClient, Netrc, BASH_COMPLETION, FISH_COMPLETION};

use crate::format_url::build_url;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ShellError {
    #[error("only bash and fish completion are supported, got: {0}")]
    Unsupported(String),
    #[error("fish completion script not available for Bazel version {0}")]
    FishUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Fish,
}

impl Shell {
    #[must_use]
    pub fn script_name(self) -> &'static str {
        match self {
            Shell::Bash => BASH_COMPLETION,
            Shell::Fish => FISH_COMPLETION,
        }
    }
}

/// True when `completion` is the first argument that is not a flag.
#[must_use]
pub fn is_completion_command(args: &[String]) -> bool {
    args.iter()
        .find(|arg| !arg.starts_with("--"))
        .is_some_and(|arg| arg == "completion")
}

/// Shell named right after `completion`.
///
/// # Errors
/// Fails for anything but `bash` and `fish`, including a missing name.
pub fn requested_shell(args: &[String]) -> Result<Shell, ShellError> {
    let shell = args
        .iter()
        .skip_while(|arg| *arg != "completion")
        .nth(1)
        .map_or("", String::as_str);
    match shell {
        "bash" => Ok(Shell::Bash),
        "fish" => Ok(Shell::Fish),
        other => Err(ShellError::Unsupported(other.to_string())),
    }
}

pub struct Completions<'a> {
    config: &'a Config,
    home: &'a Path,
    platform: &'a Platform,
    http: &'a HttpClient,
    downloads: &'a str,
}

impl<'a> Completions<'a> {
    /// `downloads` is the host serving upstream release assets.
    #[must_use]
    pub fn new(
        config: &'a Config,
        home: &'a Path,
        platform: &'a Platform,
        http: &'a HttpClient,
        downloads: &'a str,
    ) -> Self {
        Self {
            config,
            home,
            platform,
            http,
            downloads,
        }
    }

    /// Location of the installer of `version`. `BZX_FORMAT_URL` templates are
    /// rewritten from the binary name to the installer name.
    ///
    /// # Errors
    /// Fails when both URL overrides are set or the template is invalid.
    pub fn installer_url(&self, version: &str) -> Result<String> {
        let base_url = self.config.get(keys::BASE_URL);
        let format_url = self.config.get(keys::FORMAT_URL);
        if base_url.is_some() && format_url.is_some() {
            return Err(ConfigError::ConflictingUrls.into());
        }
        if let Some(format) = format_url {
            let format = format
                .replacen("bazel-%v", "bazel-%v-installer", 1)
                .replacen("%e", ".sh", 1);
            let pinned = self.config.get(keys::VERIFY_SHA256);
            return Ok(build_url(&format, version, self.platform, pinned)?);
        }
        let installer = self.platform.installer_name(version);
        let root = base_url.map_or_else(
            || format!("{}/bazelbuild/bazel/releases/download", self.downloads),
            ToString::to_string,
        );
        Ok(format!("{}/{version}/{installer}", root.trim_end_matches('/')))
    }

    /// Completion script for `shell` from the installer of `version`,
    /// downloading and unpacking the installer on first use.
    ///
    /// # Errors
    /// Fails when the installer cannot be fetched or unpacked, or has no
    /// script for `shell`.
    pub fn script(&self, version: &str, shell: Shell) -> Result<String> {
        let url = self
            .installer_url(version)
            .context("could not construct installer URL")?;
        let base_url = self.config.get(keys::BASE_URL);
        let source_key = base_url
            .or(self.config.get(keys::FORMAT_URL))
            .map_or_else(|| UPSTREAM_FORK.to_string(), sanitize_key);
        let auth = match base_url {
            Some(_) => Netrc::load()?.and_then(|netrc| netrc.auth_for_url(&url)),
            None => None,
        };

        let dir = ArtifactCache::new(self.home)
            .ensure_completions(
                &source_key,
                &self.platform.installer_name(version),
                |dir: &Path, file: &str| self.http.download_to_dir(&url, dir, file, auth.as_ref()),
            )
            .context("could not download completion script")?;

        let path = dir.join(shell.script_name());
        match fs::read_to_string(&path) {
            Ok(script) => Ok(script),
            Err(err) if err.kind() == ErrorKind::NotFound && shell == Shell::Fish => {
                Err(ShellError::FishUnavailable(version.to_string()).into())
            }
            Err(err) => Err(err).with_context(|| {
                format!("could not read cached completion script {}", path.display())
            }),
        }
    }
}
