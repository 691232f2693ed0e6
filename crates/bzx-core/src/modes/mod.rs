//! Prefix commands that change what a launch does: `--print_env`,
//! `--strict`, `--migrate` and `--bisect`.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use bzx_domain::{keys, Config};

use crate::process::ChildRunner;

pub mod bisect;
pub mod flags;
pub mod migrate;

const BISECT_FORMAT: &str = "'--bisect=[~]<good bazel commit>..<bad bazel commit>'";

/// Result of one step of a multi-run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Bazel ran and exited with this code.
    Exited(i32),
    /// A housekeeping command failed with this code; Bazel did not run.
    Stopped(i32),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("--bisect must have a value. Expected format: {BISECT_FORMAT}")]
    MissingBisectRange,
    #[error("Invalid format for --bisect. Expected format: {BISECT_FORMAT}")]
    InvalidBisectRange,
    #[error(
        "could not find a valid Bazel command in \"{0}\". Please run `bazel help` if you need help on how to use Bazel"
    )]
    NoCommand(String),
}

/// `A..B` asserts A is good and looks for the first bad commit;
/// `~A..B` asserts A is bad and looks for the first good one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BisectRange {
    pub old: String,
    pub new: String,
    pub old_is_good: bool,
}

impl BisectRange {
    /// Parses the value after `--bisect=`.
    ///
    /// # Errors
    /// Fails unless the value has exactly one `..` between two non-empty commits.
    pub fn parse(value: &str) -> Result<Self, ModeError> {
        let (old_is_good, value) = match value.strip_prefix('~') {
            Some(rest) => (false, rest),
            None => (true, value),
        };
        let parts: Vec<&str> = value.split("..").collect();
        match parts.as_slice() {
            [old, new] if !old.is_empty() && !new.is_empty() => Ok(Self {
                old: (*old).to_string(),
                new: (*new).to_string(),
                old_is_good,
            }),
            _ => Err(ModeError::InvalidBisectRange),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Run,
    PrintEnv,
    Strict,
    Migrate,
    Bisect(BisectRange),
}

/// Splits off a leading mode flag. Only the first argument is inspected.
///
/// # Errors
/// Fails for a malformed `--bisect` argument.
pub fn parse_mode(args: &[String]) -> Result<(Mode, &[String]), ModeError> {
    let Some((first, rest)) = args.split_first() else {
        return Ok((Mode::Run, args));
    };
    let mode = match first.as_str() {
        "--print_env" => Mode::PrintEnv,
        "--strict" => Mode::Strict,
        "--migrate" => Mode::Migrate,
        "--bisect" => return Err(ModeError::MissingBisectRange),
        other => match other.strip_prefix("--bisect=") {
            Some(value) => Mode::Bisect(BisectRange::parse(value)?),
            None => return Ok((Mode::Run, args)),
        },
    };
    Ok((mode, rest))
}

/// Shared plumbing of the orchestrating modes: echoing, running and the
/// optional `shutdown`/`clean --expunge` between runs.
pub struct Session<'a> {
    pub config: &'a Config,
    pub runner: &'a dyn ChildRunner,
    pub out: &'a mut dyn Write,
}

impl Session<'_> {
    /// Prints `bazel <args>` and runs it.
    pub(crate) fn run_echoed(&mut self, bazel: &Path, args: &[String]) -> Result<i32> {
        writeln!(self.out, "bazel {}", args.join(" "))?;
        self.out.flush()?;
        self.runner.run(bazel, args, None)
    }

    /// Runs housekeeping then `bazel <args>`. A failed housekeeping command
    /// stops the run before Bazel starts.
    pub(crate) fn run_step(
        &mut self,
        bazel: &Path,
        startup: &[String],
        args: &[String],
    ) -> Result<Outcome> {
        if let Some(code) = self.housekeeping(bazel, startup)? {
            return Ok(Outcome::Stopped(code));
        }
        self.run_echoed(bazel, args).map(Outcome::Exited)
    }

    /// Runs the configured housekeeping commands. Returns the exit code to
    /// stop with when one of them fails.
    pub(crate) fn housekeeping(&mut self, bazel: &Path, startup: &[String]) -> Result<Option<i32>> {
        if self.config.is_set(keys::SHUTDOWN) {
            if let Some(code) = self.housekeeping_step(bazel, startup, &["shutdown"], "shutdown")? {
                return Ok(Some(code));
            }
        }
        if self.config.is_set(keys::CLEAN) {
            if let Some(code) =
                self.housekeeping_step(bazel, startup, &["clean", "--expunge"], "clean")?
            {
                return Ok(Some(code));
            }
        }
        Ok(None)
    }

    fn housekeeping_step(
        &mut self,
        bazel: &Path,
        startup: &[String],
        command: &[&str],
        name: &str,
    ) -> Result<Option<i32>> {
        let mut args = startup.to_vec();
        args.extend(command.iter().map(|part| (*part).to_string()));
        let code = self.run_echoed(bazel, &args)?;
        writeln!(self.out)?;
        if code != 0 {
            writeln!(self.out, "Failure: {name} command failed.")?;
            return Ok(Some(code));
        }
        Ok(None)
    }
}
