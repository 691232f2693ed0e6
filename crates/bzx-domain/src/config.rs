use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Name of the rc file read from the workspace root and the user home.
pub const RC_FILE: &str = ".bzxrc";

pub mod keys {
    pub const USE_BAZEL_VERSION: &str = "USE_BAZEL_VERSION";
    pub const USE_BAZEL_FALLBACK_VERSION: &str = "USE_BAZEL_FALLBACK_VERSION";
    pub const HOME: &str = "BZX_HOME";
    pub const BASE_URL: &str = "BZX_BASE_URL";
    pub const FORMAT_URL: &str = "BZX_FORMAT_URL";
    pub const VERIFY_SHA256: &str = "BZX_VERIFY_SHA256";
    pub const GITHUB_TOKEN: &str = "BZX_GITHUB_TOKEN";
    pub const SKIP_WRAPPER: &str = "BZX_SKIP_WRAPPER";
    pub const SHUTDOWN: &str = "BZX_SHUTDOWN";
    pub const CLEAN: &str = "BZX_CLEAN";
    pub const INCOMPATIBLE_FLAGS: &str = "BZX_INCOMPATIBLE_FLAGS";
    pub const SHOW_PROGRESS: &str = "BZX_SHOW_PROGRESS";
    pub const USER_AGENT: &str = "BZX_USER_AGENT";
    pub const WRAPPER_DIRECTORY: &str = "BZX_WRAPPER_DIRECTORY";
    pub const NOJDK: &str = "BZX_NOJDK";
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("not allowed to use fallback version \"{0}\"")]
    FallbackForbidden(String),
    #[error("invalid fallback version format \"{raw}\" (effectively \"{mode}:{label}\")")]
    InvalidFallback {
        raw: String,
        mode: String,
        label: String,
    },
    #[error("cannot set {} and {} at once", keys::BASE_URL, keys::FORMAT_URL)]
    ConflictingUrls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSource {
    Environment,
    WorkspaceRc,
    UserRc,
}

#[derive(Debug, Clone)]
struct Layer {
    source: LayerSource,
    vars: HashMap<String, String>,
}

/// Read-only keyed settings, environment first, then the workspace rc file,
/// then the user rc file. Empty values count as absent.
#[derive(Debug, Clone)]
pub struct Config {
    layers: Vec<Layer>,
}

impl Config {
    /// Captures the process environment and both rc files.
    ///
    /// # Errors
    /// Returns an error if an existing rc file cannot be read.
    pub fn load(workspace_root: Option<&Path>) -> Result<Self> {
        let env_vars = env_snapshot(env::vars_os());
        let workspace_rc = match workspace_root {
            Some(root) => read_rc_file(&root.join(RC_FILE))?,
            None => HashMap::new(),
        };
        let user_rc = match dirs_next::home_dir() {
            Some(home) => read_rc_file(&home.join(RC_FILE))?,
            None => HashMap::new(),
        };
        Ok(Self::from_layers(env_vars, workspace_rc, user_rc))
    }

    #[must_use]
    pub fn from_layers(
        env_vars: HashMap<String, String>,
        workspace_rc: HashMap<String, String>,
        user_rc: HashMap<String, String>,
    ) -> Self {
        Self {
            layers: vec![
                Layer {
                    source: LayerSource::Environment,
                    vars: env_vars,
                },
                Layer {
                    source: LayerSource::WorkspaceRc,
                    vars: workspace_rc,
                },
                Layer {
                    source: LayerSource::UserRc,
                    vars: user_rc,
                },
            ],
        }
    }

    /// Environment-only config built from literal pairs.
    #[must_use]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self::from_layers(vars, HashMap::new(), HashMap::new())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lookup(key).map(|(value, _)| value)
    }

    #[must_use]
    pub fn source_of(&self, key: &str) -> Option<LayerSource> {
        self.lookup(key).map(|(_, source)| source)
    }

    #[must_use]
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn lookup(&self, key: &str) -> Option<(&str, LayerSource)> {
        self.layers.iter().find_map(|layer| {
            layer
                .vars
                .get(key)
                .map(String::as_str)
                .filter(|value| !value.is_empty())
                .map(|value| (value, layer.source))
        })
    }

    /// Resolves the launcher home: `BZX_HOME_<OS>`, then `BZX_HOME`, then the
    /// user cache directory.
    ///
    /// # Errors
    /// Returns an error when no override is set and the platform has no cache directory.
    pub fn home_dir(&self) -> Result<PathBuf> {
        let per_os = format!("{}_{}", keys::HOME, os_key());
        if let Some(value) = self.get(&per_os).or_else(|| self.get(keys::HOME)) {
            return Ok(expand_tilde(value));
        }
        let cache = dirs_next::cache_dir().context("could not get the user's cache directory")?;
        Ok(cache.join("bzx"))
    }

    /// Splits `USE_BAZEL_FALLBACK_VERSION` into a label, applying its mode.
    ///
    /// # Errors
    /// Fails for the `error` mode and for unknown modes.
    pub fn fallback_label(&self) -> Result<String, ConfigError> {
        let raw = self.get(keys::USE_BAZEL_FALLBACK_VERSION).unwrap_or("");
        let (mode, label) = raw.split_once(':').unwrap_or(("silent", raw));
        let label = if label.is_empty() { "latest" } else { label };
        match mode {
            "silent" => Ok(label.to_string()),
            "warn" => {
                tracing::warn!(version = label, "used fallback version");
                Ok(label.to_string())
            }
            "error" => Err(ConfigError::FallbackForbidden(label.to_string())),
            other => Err(ConfigError::InvalidFallback {
                raw: raw.to_string(),
                mode: other.to_string(),
                label: label.to_string(),
            }),
        }
    }

    /// Returns `Some(true)`/`Some(false)` for recognised truthy/falsy values.
    #[must_use]
    pub fn bool_setting(&self, key: &str) -> Option<bool> {
        parse_bool(self.get(key)?)
    }
}

#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Some(true),
        "no" | "n" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Parses `KEY=VALUE` lines; `#` lines and lines without `=` are skipped.
#[must_use]
pub fn parse_rc(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn read_rc_file(path: &Path) -> Result<HashMap<String, String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(parse_rc(&contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
        Err(err) => Err(err).with_context(|| format!("could not read {}", path.display())),
    }
}

fn os_key() -> String {
    match env::consts::OS {
        "macos" => "DARWIN".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

fn expand_tilde(value: &str) -> PathBuf {
    if value == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    if let Some(rest) = value
        .strip_prefix("~/")
        .or_else(|| value.strip_prefix("~\\"))
    {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(value)
}

/// Keeps the UTF-8 variables of an environment listing. Keys bzx reads are
/// ASCII, so other pairs are dropped.
fn env_snapshot(vars: impl Iterator<Item = (OsString, OsString)>) -> HashMap<String, String> {
    vars.filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
        (Ok(key), Ok(value)) => Some((key, value)),
        (key, _) => {
            tracing::debug!(key = ?key, "ignoring non UTF-8 environment variable");
            None
        }
    })
    .collect()
}
