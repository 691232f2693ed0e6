//! Fixtures shared by unit tests.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
pub(crate) use bzx_store::test_support::start_server;
use bzx_store::{HttpClient, RetryPolicy};
use httptest::Server;

use crate::process::ChildRunner;
use crate::repos::GcsEndpoints;

pub(crate) const LISTING_PATH: &str = "/storage/v1/b/bazel/o";

/// Server root without trailing slash.
pub(crate) fn base_url(server: &Server) -> String {
    server.url_str("/").trim_end_matches('/').to_string()
}

pub(crate) fn http_client() -> Result<Arc<HttpClient>> {
    let client = HttpClient::new("bzx-test")?.with_policy(RetryPolicy {
        max_retries: 0,
        max_wall_time: Duration::from_secs(5),
    });
    Ok(Arc::new(client))
}

pub(crate) fn gcs_endpoints(server: &Server) -> GcsEndpoints {
    let base = base_url(server);
    GcsEndpoints {
        listing: format!("{base}{LISTING_PATH}"),
        releases: format!("{base}/releases"),
        commits: format!("{base}/commits"),
        last_green: format!("{base}/last_green/"),
    }
}

pub(crate) fn listing(prefixes: &[&str], items: bool) -> serde_json::Value {
    let items: Vec<serde_json::Value> = if items {
        vec![serde_json::json!({ "name": "artifact" })]
    } else {
        Vec::new()
    };
    serde_json::json!({ "prefixes": prefixes, "items": items })
}

/// Scripted child process: exit codes are looked up by binary and argv.
#[derive(Default)]
pub(crate) struct FakeRunner {
    rules: Vec<(Option<PathBuf>, Box<dyn Fn(&[String]) -> bool + Send + Sync>, i32)>,
    default_code: i32,
    help_output: HashMap<String, String>,
    calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl FakeRunner {
    pub(crate) fn new(default_code: i32) -> Self {
        Self {
            default_code,
            ..Self::default()
        }
    }

    /// Exits with `code` when `matcher` accepts the argv.
    pub(crate) fn when(
        mut self,
        matcher: impl Fn(&[String]) -> bool + Send + Sync + 'static,
        code: i32,
    ) -> Self {
        self.rules.push((None, Box::new(matcher), code));
        self
    }

    /// Exits with `code` whenever `binary` runs.
    pub(crate) fn when_binary(mut self, binary: &Path, code: i32) -> Self {
        self.rules
            .push((Some(binary.to_path_buf()), Box::new(|_| true), code));
        self
    }

    /// Writes `output` to the capture sink for `help <command> --short`.
    pub(crate) fn with_help(mut self, command: &str, output: &str) -> Self {
        self.help_output
            .insert(command.to_string(), output.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn argv_log(&self) -> Vec<Vec<String>> {
        self.calls().into_iter().map(|(_, args)| args).collect()
    }
}

impl ChildRunner for FakeRunner {
    fn run(&self, bazel: &Path, args: &[String], capture: Option<&mut dyn Write>) -> Result<i32> {
        self.calls
            .lock()
            .unwrap()
            .push((bazel.to_path_buf(), args.to_vec()));
        if let (Some(sink), [help, command, short]) = (capture, args) {
            if help == "help" && short == "--short" {
                if let Some(output) = self.help_output.get(command) {
                    sink.write_all(output.as_bytes())?;
                }
                return Ok(0);
            }
        }
        for (binary, matcher, code) in &self.rules {
            if binary.as_deref().is_some_and(|expected| expected != bazel) {
                continue;
            }
            if matcher(args) {
                return Ok(*code);
            }
        }
        Ok(self.default_code)
    }
}

/// Installer script with a zip archive of `files` appended.
pub(crate) fn installer_script(files: &[(&str, &str)]) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in files {
        writer.start_file(*name, zip::write::FileOptions::default())?;
        writer.write_all(contents.as_bytes())?;
    }
    let mut script = b"#!/bin/bash\nexit 0\n".to_vec();
    script.extend_from_slice(&writer.finish()?.into_inner());
    Ok(script)
}

pub(crate) fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}
