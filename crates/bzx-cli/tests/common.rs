#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use tempfile::TempDir;

/// Variables a developer machine may carry that would change what bzx does.
const INHERITED: [&str; 14] = [
    "USE_BAZEL_VERSION",
    "USE_BAZEL_FALLBACK_VERSION",
    "BZX_HOME_LINUX",
    "BZX_HOME_DARWIN",
    "BZX_HOME_WINDOWS",
    "BZX_BASE_URL",
    "BZX_FORMAT_URL",
    "BZX_VERIFY_SHA256",
    "BZX_SKIP_WRAPPER",
    "BZX_SHUTDOWN",
    "BZX_CLEAN",
    "BZX_INCOMPATIBLE_FLAGS",
    "BZX_WRAPPER_DIRECTORY",
    "BZX_NOJDK",
];

/// A scratch workspace plus an isolated launcher home and user home.
pub struct Sandbox {
    pub temp: TempDir,
    pub workspace: PathBuf,
    pub home: PathBuf,
    pub user_home: PathBuf,
}

impl Sandbox {
    pub fn new(prefix: &str) -> Self {
        let temp = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .expect("tempdir");
        let workspace = temp.path().join("workspace");
        let user_home = temp.path().join("user");
        fs::create_dir_all(&workspace).expect("workspace dir");
        fs::create_dir_all(&user_home).expect("user home dir");
        fs::write(workspace.join("MODULE.bazel"), "").expect("MODULE.bazel");
        let home = temp.path().join("bzx-home");
        Self {
            temp,
            workspace,
            home,
            user_home,
        }
    }

    pub fn bzx(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("bzx");
        for key in INHERITED {
            cmd.env_remove(key);
        }
        cmd.current_dir(&self.workspace)
            .env("HOME", &self.user_home)
            .env("BZX_HOME", &self.home)
            .env("BZX_SHOW_PROGRESS", "0")
            .env("NETRC", self.user_home.join(".netrc"));
        cmd
    }

    /// Writes an executable shell script.
    #[cfg(unix)]
    pub fn script(&self, relative: &str, body: &str) -> PathBuf {
        let path = self.temp.path().join(relative);
        write_script(&path, body);
        path
    }
}

#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("script dir");
    }
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
}

/// Remote file name of a release for the host running the tests.
pub fn host_artifact(version: &str) -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "aarch64" => "arm64",
        other => other,
    };
    format!("bazel-{version}-{os}-{arch}")
}
