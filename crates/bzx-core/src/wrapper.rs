//! In-repository wrapper scripts that take over launching Bazel.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use bzx_domain::{keys, Config, TOOL_NAME};
use tracing::debug;

const DEFAULT_WRAPPER_DIRECTORY: &str = "tools";

/// How to start the selected executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptInvocation {
    /// The real binary or an executable wrapper.
    Direct(PathBuf),
    /// `tools/bazel.bat`, run through `cmd.exe /c`.
    Batch(PathBuf),
    /// `tools/bazel.ps1`, run through PowerShell.
    PowerShell(PathBuf),
}

impl ScriptInvocation {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ScriptInvocation::Direct(path)
            | ScriptInvocation::Batch(path)
            | ScriptInvocation::PowerShell(path) => path,
        }
    }

    #[must_use]
    pub fn command(&self, args: &[String]) -> Command {
        match self {
            ScriptInvocation::Direct(path) => {
                let mut command = Command::new(path);
                command.args(args);
                command
            }
            ScriptInvocation::PowerShell(path) => {
                let mut command = Command::new(
                    system_root().join(r"system32\WindowsPowerShell\v1.0\powershell.exe"),
                );
                command
                    .args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"])
                    .arg(path)
                    .args(args);
                command
            }
            ScriptInvocation::Batch(path) => batch_command(path, args),
        }
    }
}

/// Picks the wrapper of the workspace, or `bazel` itself when there is none
/// or `BZX_SKIP_WRAPPER` is set.
#[must_use]
pub fn select(bazel: &Path, config: &Config, workspace_root: Option<&Path>) -> ScriptInvocation {
    let direct = || ScriptInvocation::Direct(bazel.to_path_buf());
    if config.is_set(keys::SKIP_WRAPPER) {
        return direct();
    }
    let Some(root) = workspace_root else {
        return direct();
    };
    let directory = config
        .get(keys::WRAPPER_DIRECTORY)
        .unwrap_or(DEFAULT_WRAPPER_DIRECTORY);
    match find_wrapper(&root.join(directory), cfg!(windows)) {
        Some(wrapper) => {
            debug!(wrapper = %wrapper.path().display(), "delegating to workspace wrapper");
            wrapper
        }
        None => direct(),
    }
}

/// Looks for `bazel`, then on Windows `bazel.ps1` and `bazel.bat`, in `dir`.
#[must_use]
pub fn find_wrapper(dir: &Path, windows: bool) -> Option<ScriptInvocation> {
    let plain = dir.join(TOOL_NAME);
    if is_executable_file(&plain) {
        return Some(ScriptInvocation::Direct(plain));
    }
    if !windows {
        return None;
    }
    let powershell = dir.join(format!("{TOOL_NAME}.ps1"));
    if powershell.is_file() {
        return Some(ScriptInvocation::PowerShell(powershell));
    }
    let batch = dir.join(format!("{TOOL_NAME}.bat"));
    if batch.is_file() {
        return Some(ScriptInvocation::Batch(batch));
    }
    None
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .is_ok_and(|meta| !meta.is_dir() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| !meta.is_dir())
}

fn system_root() -> PathBuf {
    std::env::var_os("SystemRoot").map_or_else(|| PathBuf::from(r"C:\Windows"), PathBuf::from)
}

/// `cmd.exe /c "<script> <args>"` with every element quoted for the CRT parser.
fn batch_command_line(script: &Path, args: &[String]) -> String {
    let mut parts = vec![escape_arg(&script.to_string_lossy())];
    parts.extend(args.iter().map(|arg| escape_arg(arg)));
    format!("/c \"{}\"", parts.join(" "))
}

#[cfg(windows)]
fn batch_command(script: &Path, args: &[String]) -> Command {
    use std::os::windows::process::CommandExt;

    let mut command = Command::new(system_root().join(r"system32\cmd.exe"));
    command.raw_arg(batch_command_line(script, args));
    command
}

#[cfg(not(windows))]
fn batch_command(script: &Path, args: &[String]) -> Command {
    let mut command = Command::new(system_root().join(r"system32\cmd.exe"));
    command.arg(batch_command_line(script, args));
    command
}

/// Quotes `arg` so the Windows CRT splits it back into the same string.
fn escape_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }
    let needs_backslash = arg.contains(['"', '\\']);
    let has_space = arg.contains([' ', '\t']);
    if !needs_backslash && !has_space {
        return arg.to_string();
    }
    if !needs_backslash {
        return format!("\"{arg}\"");
    }

    let mut escaped = String::with_capacity(arg.len() + 2);
    if has_space {
        escaped.push('"');
    }
    let mut slashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => slashes += 1,
            '"' => {
                escaped.extend(std::iter::repeat('\\').take(slashes + 1));
                slashes = 0;
            }
            _ => slashes = 0,
        }
        escaped.push(c);
    }
    if has_space {
        escaped.extend(std::iter::repeat('\\').take(slashes));
        escaped.push('"');
    }
    escaped
}
