//! Fork releases published on GitHub.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bzx_domain::TOOL_NAME;
use bzx_store::{Auth, HttpClient};
use serde::Deserialize;

use super::{ForkIndex, Target};

const API_URL: &str = "https://api.github.com";
const DOWNLOAD_URL: &str = "https://github.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubEndpoints {
    /// REST API root, also used for commit comparisons.
    pub api: String,
    /// Host serving release assets.
    pub downloads: String,
}

impl Default for GitHubEndpoints {
    fn default() -> Self {
        Self {
            api: API_URL.to_string(),
            downloads: DOWNLOAD_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
}

pub struct GitHubRepo {
    http: Arc<HttpClient>,
    endpoints: GitHubEndpoints,
    auth: Option<Auth>,
}

impl GitHubRepo {
    #[must_use]
    pub fn new(http: Arc<HttpClient>, endpoints: GitHubEndpoints, token: Option<&str>) -> Self {
        Self {
            http,
            endpoints,
            auth: token.map(|token| Auth::Token(token.to_string())),
        }
    }
}

fn parse_releases(body: &[u8]) -> Result<Vec<String>> {
    let releases: Vec<Release> =
        serde_json::from_slice(body).context("could not parse JSON into list of releases")?;
    Ok(releases
        .into_iter()
        .filter(|release| !release.prerelease)
        .map(|release| release.tag_name)
        .collect())
}

impl ForkIndex for GitHubRepo {
    fn versions(&self, home: &Path, fork: &str) -> Result<Vec<String>> {
        let url = format!("{}/repos/{fork}/{TOOL_NAME}/releases", self.endpoints.api);
        let body = self
            .http
            .maybe_cached_download(
                home,
                &url,
                &format!("{fork}-releases.json"),
                &format!("{fork} releases"),
                self.auth.as_ref(),
            )
            .with_context(|| format!("unable to determine '{fork}' releases"))?;
        parse_releases(&body).with_context(|| format!("unable to determine '{fork}' releases"))
    }

    fn download(
        &self,
        fork: &str,
        version: &str,
        target: &Target,
        dest_dir: &Path,
        dest_file: &str,
    ) -> Result<PathBuf> {
        let url = format!(
            "{}/{fork}/{TOOL_NAME}/releases/download/{version}/{}",
            self.endpoints.downloads,
            target.artifact_file(version)
        );
        self.http.download_to_dir(&url, dest_dir, dest_file, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{base_url, http_client, start_server};
    use httptest::{matchers::*, responders::*, Expectation};

    #[test]
    fn skips_prereleases() -> Result<()> {
        let body = br#"[
            {"tag_name": "v2.0.0", "prerelease": false},
            {"tag_name": "v2.1.0-beta", "prerelease": true},
            {"tag_name": "v1.0.0"}
        ]"#;
        assert_eq!(parse_releases(body)?, vec!["v2.0.0", "v1.0.0"]);
        let err = parse_releases(b"{}").unwrap_err();
        assert_eq!(err.to_string(), "could not parse JSON into list of releases");
        Ok(())
    }

    #[test]
    fn caches_release_list_per_fork() -> Result<()> {
        let Some(server) = start_server("caches_release_list_per_fork") else {
            return Ok(());
        };
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/repos/acme/bazel/releases"),
                request::headers(contains(("authorization", "token t0ken"))),
            ])
            .times(1)
            .respond_with(json_encoded(serde_json::json!([
                {"tag_name": "5.0.0-acme", "prerelease": false}
            ]))),
        );
        let home = tempfile::tempdir()?;
        let endpoints = GitHubEndpoints {
            api: base_url(&server),
            downloads: base_url(&server),
        };
        let repo = GitHubRepo::new(http_client()?, endpoints, Some("t0ken"));
        assert_eq!(repo.versions(home.path(), "acme")?, vec!["5.0.0-acme"]);
        assert_eq!(repo.versions(home.path(), "acme")?, vec!["5.0.0-acme"]);
        assert!(home.path().join("acme-releases.json").is_file());
        Ok(())
    }
}
