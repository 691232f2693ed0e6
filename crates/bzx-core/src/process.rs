//! Child process façade: environment assembly, signal handling while a
//! child runs, and exit code propagation.

use std::env;
use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use bzx_domain::{keys, Config};

use crate::wrapper;

/// Set in the child so a wrapper that calls back into the launcher runs Bazel directly.
pub const SKIP_WRAPPER_VAR: &str = keys::SKIP_WRAPPER;
/// Path of the real binary, set when a wrapper script is launched instead.
pub const BAZEL_REAL_VAR: &str = "BAZEL_REAL";
/// Absolute path of the launcher itself.
pub const LAUNCHER_VAR: &str = "BZX";

#[cfg(windows)]
const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: &str = ":";

/// Runs one Bazel invocation to completion.
pub trait ChildRunner {
    /// Runs `bazel` with `args`. Stdout goes to `capture` when given, otherwise
    /// it is inherited. Returns the exit code, or -1 when the child was
    /// terminated without one.
    fn run(&self, bazel: &Path, args: &[String], capture: Option<&mut dyn Write>) -> Result<i32>;
}

/// Environment handed to the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEnv {
    vars: Vec<(OsString, OsString)>,
}

impl ChildEnv {
    /// Builds the environment from the current process for running `bazel`
    /// through `exec_path`.
    #[must_use]
    pub fn capture(bazel: &Path, exec_path: &Path) -> Self {
        Self::from_parent(env::vars_os(), bazel, exec_path, env::current_exe().ok())
    }

    pub fn from_parent(
        parent: impl IntoIterator<Item = (OsString, OsString)>,
        bazel: &Path,
        exec_path: &Path,
        launcher: Option<PathBuf>,
    ) -> Self {
        let mut child = Self {
            vars: parent.into_iter().collect(),
        };
        child.set(SKIP_WRAPPER_VAR, OsString::from("true"));
        if exec_path != bazel {
            child.set(BAZEL_REAL_VAR, bazel.as_os_str().to_os_string());
        }
        if let Some(launcher) = launcher {
            child.set(LAUNCHER_VAR, launcher.into_os_string());
        }
        if let Some(dir) = bazel.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            child.prepend_path(dir);
        }
        child
    }

    #[must_use]
    pub fn vars(&self) -> &[(OsString, OsString)] {
        &self.vars
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_os_str())
    }

    /// `KEY=VALUE` lines, lossily decoded.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.vars.iter().map(|(key, value)| {
            format!("{}={}", key.to_string_lossy(), value.to_string_lossy())
        })
    }

    fn set(&mut self, key: &str, value: OsString) {
        match self.vars.iter_mut().find(|(name, _)| name == key) {
            Some((_, existing)) => *existing = value,
            None => self.vars.push((OsString::from(key), value)),
        }
    }

    /// Prepends `dir` to the first variable named `PATH` in any case.
    fn prepend_path(&mut self, dir: &Path) {
        let existing = self
            .vars
            .iter_mut()
            .find(|(name, _)| name.to_string_lossy().eq_ignore_ascii_case("PATH"));
        match existing {
            Some((_, value)) => {
                let mut joined = dir.as_os_str().to_os_string();
                joined.push(PATH_LIST_SEPARATOR);
                joined.push(value.as_os_str());
                *value = joined;
            }
            None => self
                .vars
                .push((OsString::from("PATH"), dir.as_os_str().to_os_string())),
        }
    }
}

/// Runs children on the host, delegating to a workspace wrapper when present.
pub struct HostRunner<'a> {
    config: &'a Config,
    workspace_root: Option<&'a Path>,
}

impl<'a> HostRunner<'a> {
    #[must_use]
    pub fn new(config: &'a Config, workspace_root: Option<&'a Path>) -> Self {
        Self {
            config,
            workspace_root,
        }
    }
}

impl ChildRunner for HostRunner<'_> {
    fn run(&self, bazel: &Path, args: &[String], capture: Option<&mut dyn Write>) -> Result<i32> {
        let invocation = wrapper::select(bazel, self.config, self.workspace_root);
        let child_env = ChildEnv::capture(bazel, invocation.path());
        let mut command = invocation.command(args);
        command
            .env_clear()
            .envs(child_env.vars().iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .stdout(if capture.is_some() {
                Stdio::piped()
            } else {
                Stdio::inherit()
            });

        let _shield = SignalShield::engage();
        let mut child = command
            .spawn()
            .with_context(|| format!("could not start Bazel: {}", invocation.path().display()))?;
        if let Some(sink) = capture {
            if let Some(mut stdout) = child.stdout.take() {
                io::copy(&mut stdout, sink).context("failed to read Bazel output")?;
            }
        }
        let status = child.wait().context("failed to wait for Bazel")?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// While alive, SIGINT, SIGTERM and SIGQUIT no longer terminate the launcher;
/// the child receives them from the terminal and decides itself.
pub(crate) struct SignalShield {
    #[cfg(unix)]
    armed: Option<&'static std::sync::Arc<std::sync::atomic::AtomicBool>>,
}

#[cfg(unix)]
impl SignalShield {
    pub(crate) fn engage() -> Self {
        use std::sync::atomic::Ordering;

        let armed = idle_flag();
        if let Some(idle) = armed {
            idle.store(false, Ordering::SeqCst);
        }
        Self { armed }
    }
}

#[cfg(unix)]
impl Drop for SignalShield {
    fn drop(&mut self) {
        if let Some(idle) = self.armed {
            idle.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }
}

/// Flag consulted by the launcher's handlers: while true, the signals keep
/// their default action.
#[cfg(unix)]
fn idle_flag() -> Option<&'static std::sync::Arc<std::sync::atomic::AtomicBool>> {
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, OnceLock};

    use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};

    static IDLE: OnceLock<Option<Arc<AtomicBool>>> = OnceLock::new();
    IDLE.get_or_init(|| {
        let idle = Arc::new(AtomicBool::new(true));
        for signal in [SIGINT, SIGTERM, SIGQUIT] {
            if let Err(err) = signal_hook::flag::register_conditional_default(signal, Arc::clone(&idle)) {
                tracing::warn!(signal, error = %err, "could not install signal handler");
                return None;
            }
        }
        Some(idle)
    })
    .as_ref()
}

#[cfg(not(unix))]
impl SignalShield {
    pub(crate) fn engage() -> Self {
        Self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    #[test]
    fn child_env_marks_launcher_and_prepends_path() {
        let bazel = Path::new("/home/u/.cache/bzx/downloads/sha256/ab/bin/bazel");
        let env = ChildEnv::from_parent(
            parent(&[("HOME", "/home/u"), ("PATH", "/usr/bin")]),
            bazel,
            bazel,
            Some(PathBuf::from("/usr/local/bin/bzx")),
        );
        assert_eq!(env.get("BZX_SKIP_WRAPPER"), Some(OsStr::new("true")));
        assert_eq!(env.get("BZX"), Some(OsStr::new("/usr/local/bin/bzx")));
        assert_eq!(env.get("BAZEL_REAL"), None);
        let expected = format!(
            "/home/u/.cache/bzx/downloads/sha256/ab/bin{PATH_LIST_SEPARATOR}/usr/bin"
        );
        assert_eq!(env.get("PATH"), Some(OsStr::new(&expected)));
        assert_eq!(env.get("HOME"), Some(OsStr::new("/home/u")));
    }

    #[test]
    fn wrapped_children_learn_the_real_binary() {
        let bazel = Path::new("/cache/bin/bazel");
        let env = ChildEnv::from_parent(
            parent(&[("Path", "C:\\Windows")]),
            bazel,
            Path::new("/ws/tools/bazel"),
            None,
        );
        assert_eq!(env.get("BAZEL_REAL"), Some(OsStr::new("/cache/bin/bazel")));
        let expected = format!("/cache/bin{PATH_LIST_SEPARATOR}C:\\Windows");
        assert_eq!(env.get("Path"), Some(OsStr::new(&expected)));
        assert_eq!(env.get("PATH"), None);
    }

    #[test]
    fn missing_path_is_created() {
        let bazel = Path::new("/cache/bin/bazel");
        let env = ChildEnv::from_parent(
            parent(&[("BZX_SKIP_WRAPPER", "")]),
            bazel,
            bazel,
            None,
        );
        assert_eq!(env.get("PATH"), Some(OsStr::new("/cache/bin")));
        let lines: Vec<String> = env.lines().collect();
        assert_eq!(lines, vec!["BZX_SKIP_WRAPPER=true", "PATH=/cache/bin"]);
    }

    #[cfg(unix)]
    #[test]
    fn host_runner_propagates_exit_codes_and_captures_stdout() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir()?;
        let script = temp.path().join("bazel");
        std::fs::write(&script, "#!/bin/sh\necho \"args: $*\"\nexit 3\n")?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

        let config = Config::from_pairs(&[]);
        let runner = HostRunner::new(&config, None);
        let mut out = Vec::new();
        let code = runner.run(
            &script,
            &["build".to_string(), "//...".to_string()],
            Some(&mut out),
        )?;
        assert_eq!(code, 3);
        assert_eq!(String::from_utf8(out)?, "args: build //...\n");
        Ok(())
    }

    #[test]
    fn spawn_failures_are_errors() {
        let config = Config::from_pairs(&[]);
        let runner = HostRunner::new(&config, None);
        let err = runner
            .run(Path::new("/nonexistent/bzx-test/bazel"), &[], None)
            .unwrap_err();
        assert!(err.to_string().starts_with("could not start Bazel"), "{err}");
    }
}
