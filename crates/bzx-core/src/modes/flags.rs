//! Argument surgery and discovery of `--incompatible_*` flags.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use bzx_domain::{keys, Config};
use regex::Regex;

use super::ModeError;
use crate::process::ChildRunner;

static INCOMPATIBLE_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*--\[no\](incompatible_\w+)$").expect("constant regex pattern is valid")
});

/// Bazel commands; everything before the first of them is a startup option.
pub const BAZEL_COMMANDS: [&str; 21] = [
    "analyze-profile",
    "aquery",
    "build",
    "canonicalize-flags",
    "clean",
    "coverage",
    "cquery",
    "dump",
    "fetch",
    "help",
    "info",
    "license",
    "mobile-install",
    "mod",
    "print_action",
    "query",
    "run",
    "shutdown",
    "sync",
    "test",
    "version",
];

/// Inserts `extra` before the first `--`, or appends it.
#[must_use]
pub fn insert_args(base: &[String], extra: &[String]) -> Vec<String> {
    let split = base
        .iter()
        .position(|arg| arg == "--")
        .unwrap_or(base.len());
    let mut args = Vec::with_capacity(base.len() + extra.len());
    args.extend_from_slice(&base[..split]);
    args.extend_from_slice(extra);
    args.extend_from_slice(&base[split..]);
    args
}

/// Arguments before the first known command.
#[must_use]
pub fn startup_options(args: &[String]) -> Vec<String> {
    args.iter()
        .take_while(|arg| !BAZEL_COMMANDS.contains(&arg.as_str()))
        .cloned()
        .collect()
}

/// The first argument that is not a flag.
///
/// # Errors
/// Fails when every argument is a flag.
pub fn bazel_command(args: &[String]) -> Result<&str, ModeError> {
    args.iter()
        .find(|arg| !arg.starts_with('-'))
        .map(String::as_str)
        .ok_or_else(|| ModeError::NoCommand(args.join(" ")))
}

/// True when the command is `version` or `--version` precedes any command.
#[must_use]
pub fn is_version_command(args: &[String]) -> bool {
    for arg in args {
        if arg.starts_with("--") {
            if arg == "--version" {
                return true;
            }
            continue;
        }
        return arg == "version";
    }
    false
}

/// Incompatible flags for `command`, from `BZX_INCOMPATIBLE_FLAGS` or from
/// `bazel help <command> --short`, sorted.
///
/// # Errors
/// Fails when the help command cannot be run.
pub fn incompatible_flags(
    config: &Config,
    runner: &dyn ChildRunner,
    bazel: &Path,
    command: &str,
) -> Result<Vec<String>> {
    if let Some(configured) = config.get(keys::INCOMPATIBLE_FLAGS) {
        return Ok(configured
            .split(',')
            .map(str::trim)
            .filter(|flag| !flag.is_empty())
            .map(ToOwned::to_owned)
            .collect());
    }

    let mut help = Vec::new();
    let args = ["help".to_string(), command.to_string(), "--short".to_string()];
    runner
        .run(bazel, &args, Some(&mut help))
        .with_context(|| {
            format!(
                "unable to determine incompatible flags with binary {}",
                bazel.display()
            )
        })?;
    Ok(parse_help(&String::from_utf8_lossy(&help)))
}

fn parse_help(help: &str) -> Vec<String> {
    let mut flags: Vec<String> = INCOMPATIBLE_FLAG
        .captures_iter(help)
        .map(|captures| format!("--{}", &captures[1]))
        .collect();
    flags.sort();
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{args, FakeRunner};

    #[test]
    fn inserts_before_separator() {
        assert_eq!(
            insert_args(&args(&["run", "//:x", "--", "arg"]), &args(&["--a", "--b"])),
            args(&["run", "//:x", "--a", "--b", "--", "arg"])
        );
        assert_eq!(
            insert_args(&args(&["build", "//..."]), &args(&["--a"])),
            args(&["build", "//...", "--a"])
        );
    }

    #[test]
    fn startup_options_stop_at_command() {
        assert_eq!(
            startup_options(&args(&["--host_jvm_args=-Xmx1g", "--batch", "test", "//..."])),
            args(&["--host_jvm_args=-Xmx1g", "--batch"])
        );
        assert_eq!(startup_options(&args(&["build"])), Vec::<String>::new());
    }

    #[test]
    fn finds_command() {
        assert_eq!(bazel_command(&args(&["--batch", "build", "//..."])), Ok("build"));
        assert_eq!(
            bazel_command(&args(&["--batch", "--nohome_rc"])),
            Err(ModeError::NoCommand("--batch --nohome_rc".to_string()))
        );
    }

    #[test]
    fn detects_version_requests() {
        assert!(is_version_command(&args(&["version"])));
        assert!(is_version_command(&args(&["--batch", "version", "--gnu_format"])));
        assert!(is_version_command(&args(&["--version"])));
        assert!(!is_version_command(&args(&["build", "version"])));
        assert!(!is_version_command(&[]));
    }

    #[test]
    fn configured_flags_skip_the_help_run() -> Result<()> {
        let config = Config::from_pairs(&[(
            "BZX_INCOMPATIBLE_FLAGS",
            "--incompatible_b,--incompatible_a",
        )]);
        let runner = FakeRunner::new(1);
        let flags = incompatible_flags(&config, &runner, Path::new("bazel"), "build")?;
        assert_eq!(flags, args(&["--incompatible_b", "--incompatible_a"]));
        assert!(runner.calls().is_empty());
        Ok(())
    }

    #[test]
    fn parses_help_output() -> Result<()> {
        let help = "  --[no]keep_going\n  --[no]incompatible_zeta\n  \
                    --[no]incompatible_alpha\n  --incompatible_value=<a string>\n";
        let runner = FakeRunner::new(0).with_help("build", help);
        let config = Config::from_pairs(&[]);
        let flags = incompatible_flags(&config, &runner, Path::new("bazel"), "build")?;
        assert_eq!(flags, args(&["--incompatible_alpha", "--incompatible_zeta"]));
        assert_eq!(runner.argv_log(), vec![args(&["help", "build", "--short"])]);
        Ok(())
    }
}
