//! `--migrate`: find out which incompatible flags a command still breaks on.

use std::io::Write;
use std::path::Path;

use anyhow::Result;

use super::flags::{insert_args, startup_options};
use super::{Outcome, Session};

/// Exit code when at least one flag needs migration work.
pub const MIGRATION_NEEDED: i32 = 73;

/// Runs the command without flags, with all flags, then once per flag, and
/// reports which flags passed.
///
/// # Errors
/// Fails when a child cannot be started or stdout cannot be written.
pub fn migrate(
    session: &mut Session<'_>,
    bazel: &Path,
    base_args: &[String],
    flags: &[String],
) -> Result<i32> {
    let startup = startup_options(base_args);

    writeln!(session.out, "\n\n--- Running Bazel with no incompatible flags\n")?;
    let code = match session.run_step(bazel, &startup, base_args)? {
        Outcome::Stopped(code) => return Ok(code),
        Outcome::Exited(code) => code,
    };
    if code != 0 {
        writeln!(session.out, "Failure: Command failed, even without incompatible flags.")?;
        return Ok(code);
    }

    writeln!(session.out, "\n\n--- Running Bazel with all incompatible flags\n")?;
    match session.run_step(bazel, &startup, &insert_args(base_args, flags))? {
        Outcome::Stopped(code) => return Ok(code),
        Outcome::Exited(0) => {
            writeln!(session.out, "Success: No migration needed.")?;
            return Ok(0);
        }
        Outcome::Exited(_) => {}
    }

    let mut passing = Vec::new();
    let mut failing = Vec::new();
    for flag in flags {
        writeln!(session.out, "\n\n--- Running Bazel with {flag}\n")?;
        let args = insert_args(base_args, std::slice::from_ref(flag));
        match session.run_step(bazel, &startup, &args)? {
            Outcome::Stopped(code) => return Ok(code),
            Outcome::Exited(0) => passing.push(flag.as_str()),
            Outcome::Exited(_) => failing.push(flag.as_str()),
        }
    }
    tracing::debug!(passing = passing.len(), failing = failing.len(), "migration runs finished");

    writeln!(session.out, "\n\n+++ Result\n")?;
    writeln!(session.out, "Command was successful with the following flags:")?;
    for flag in &passing {
        writeln!(session.out, "  {flag}")?;
    }
    writeln!(session.out)?;
    writeln!(session.out, "Migration is needed for the following flags:")?;
    for flag in &failing {
        writeln!(session.out, "  {flag}")?;
    }
    session.out.flush()?;
    Ok(MIGRATION_NEEDED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{args, FakeRunner};
    use bzx_domain::Config;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn has(args: &[String], flag: &str) -> bool {
        args.iter().any(|arg| arg == flag)
    }

    #[test]
    fn reports_flags_that_need_migration() -> Result<()> {
        let config = Config::from_pairs(&[]);
        let runner = FakeRunner::new(0).when(|args| has(args, "--incompatible_b"), 1);
        let mut out = Vec::new();
        let mut session = Session {
            config: &config,
            runner: &runner,
            out: &mut out,
        };
        let flags = args(&["--incompatible_a", "--incompatible_b"]);
        let code = migrate(&mut session, Path::new("bazel"), &args(&["build", "//..."]), &flags)?;
        assert_eq!(code, MIGRATION_NEEDED);
        assert_eq!(
            runner.argv_log(),
            vec![
                args(&["build", "//..."]),
                args(&["build", "//...", "--incompatible_a", "--incompatible_b"]),
                args(&["build", "//...", "--incompatible_a"]),
                args(&["build", "//...", "--incompatible_b"]),
            ]
        );
        let out = String::from_utf8(out)?;
        assert!(out.contains("bazel build //... --incompatible_a\n"));
        assert!(out.ends_with(
            "Command was successful with the following flags:\n  --incompatible_a\n\n\
             Migration is needed for the following flags:\n  --incompatible_b\n"
        ));
        Ok(())
    }

    #[test]
    fn stops_when_all_flags_pass() -> Result<()> {
        let config = Config::from_pairs(&[]);
        let runner = FakeRunner::new(0);
        let mut out = Vec::new();
        let mut session = Session {
            config: &config,
            runner: &runner,
            out: &mut out,
        };
        let flags = args(&["--incompatible_a"]);
        let code = migrate(&mut session, Path::new("bazel"), &args(&["test"]), &flags)?;
        assert_eq!(code, 0);
        assert_eq!(runner.calls().len(), 2);
        assert!(String::from_utf8(out)?.ends_with("Success: No migration needed.\n"));
        Ok(())
    }

    #[test]
    fn broken_baseline_returns_its_code() -> Result<()> {
        let config = Config::from_pairs(&[]);
        let runner = FakeRunner::new(2);
        let mut out = Vec::new();
        let mut session = Session {
            config: &config,
            runner: &runner,
            out: &mut out,
        };
        let code = migrate(
            &mut session,
            Path::new("bazel"),
            &args(&["build"]),
            &args(&["--incompatible_a"]),
        )?;
        assert_eq!(code, 2);
        assert_eq!(runner.calls().len(), 1);
        assert!(String::from_utf8(out)?
            .contains("Failure: Command failed, even without incompatible flags."));
        Ok(())
    }

    #[test]
    fn housekeeping_precedes_every_run() -> Result<()> {
        let config = Config::from_pairs(&[("BZX_SHUTDOWN", "1")]);
        let runner = FakeRunner::new(0);
        let mut out = Vec::new();
        let mut session = Session {
            config: &config,
            runner: &runner,
            out: &mut out,
        };
        let base = args(&["--batch", "build", "--", "//x"]);
        migrate(&mut session, Path::new("bazel"), &base, &args(&["--incompatible_a"]))?;
        assert_eq!(
            runner.argv_log(),
            vec![
                args(&["--batch", "shutdown"]),
                args(&["--batch", "build", "--", "//x"]),
                args(&["--batch", "shutdown"]),
                args(&["--batch", "build", "--incompatible_a", "--", "//x"]),
            ]
        );
        Ok(())
    }

    #[test]
    fn failed_shutdown_stops_with_its_code() -> Result<()> {
        let config = Config::from_pairs(&[("BZX_SHUTDOWN", "1")]);
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&shutdowns);
        let runner = FakeRunner::new(1).when(
            move |args| args == ["shutdown"] && seen.fetch_add(1, Ordering::SeqCst) > 0,
            9,
        );
        let runner = runner.when(|args| args == ["build"] || args == ["shutdown"], 0);
        let mut out = Vec::new();
        let mut session = Session {
            config: &config,
            runner: &runner,
            out: &mut out,
        };
        let code = migrate(
            &mut session,
            Path::new("bazel"),
            &args(&["build"]),
            &args(&["--incompatible_a"]),
        )?;
        assert_eq!(code, 9);
        assert_eq!(
            runner.argv_log(),
            vec![args(&["shutdown"]), args(&["build"]), args(&["shutdown"])]
        );
        let out = String::from_utf8(out)?;
        assert!(out.contains("Failure: shutdown command failed."));
        assert!(!out.contains("Migration is needed"));
        Ok(())
    }

    #[test]
    fn failed_clean_during_flag_runs_stops_migration() -> Result<()> {
        let config = Config::from_pairs(&[("BZX_CLEAN", "1")]);
        let cleans = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&cleans);
        let runner = FakeRunner::new(0)
            .when(
                move |args| args.first().is_some_and(|arg| arg == "clean")
                    && seen.fetch_add(1, Ordering::SeqCst) >= 2,
                5,
            )
            .when(|args| args.iter().any(|arg| arg.starts_with("--incompatible")), 1);
        let mut out = Vec::new();
        let mut session = Session {
            config: &config,
            runner: &runner,
            out: &mut out,
        };
        let code = migrate(
            &mut session,
            Path::new("bazel"),
            &args(&["test"]),
            &args(&["--incompatible_a", "--incompatible_b"]),
        )?;
        assert_eq!(code, 5);
        let log = runner.argv_log();
        assert_eq!(log.last(), Some(&args(&["clean", "--expunge"])));
        assert!(!log.contains(&args(&["test", "--incompatible_a"])));
        assert!(!String::from_utf8(out)?.contains("+++ Result"));
        Ok(())
    }
}
