//! The bzx launcher: picks a Bazel version for the current workspace, makes
//! the binary available through the content-addressed cache and runs it,
//! optionally orchestrating `--strict`, `--migrate` and `--bisect` runs.

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bzx_domain::{find_workspace_root, keys, Config, Flavor, Platform};
use bzx_store::{http::DEFAULT_USER_AGENT, progress_enabled, HttpClient};
use tracing::debug;

pub mod completion;
pub mod format_url;
pub mod install;
pub mod modes;
pub mod process;
pub mod repos;
pub mod resolve;
pub mod select;
pub mod wrapper;

#[cfg(test)]
mod test_support;

pub use install::{Installed, Installer};
pub use modes::{parse_mode, BisectRange, Mode, ModeError, Session};
pub use process::{ChildEnv, ChildRunner, HostRunner};
pub use repos::{GcsEndpoints, GitHubEndpoints, Repositories, Target};

use completion::{is_completion_command, requested_shell, Completions};
use modes::bisect::{bisect, GitHubCompare};
use modes::flags::{bazel_command, incompatible_flags, insert_args, is_version_command};
use modes::migrate::migrate;
use repos::{GcsRepo, GitHubRepo};
use select::select_label;

/// Version of the launcher itself.
pub const LAUNCHER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One launcher invocation's view of the world.
pub struct Launcher {
    config: Config,
    workspace_root: Option<PathBuf>,
    home: PathBuf,
    target: Target,
    http: Arc<HttpClient>,
    repos: Repositories,
    github: GitHubEndpoints,
}

impl Launcher {
    /// Reads the working directory, the rc files and the environment.
    ///
    /// # Errors
    /// Fails on unreadable rc files, unsupported hosts, or a missing home directory.
    pub fn from_env() -> Result<Self> {
        let cwd = env::current_dir().context("could not get working directory")?;
        let workspace_root = find_workspace_root(&cwd);
        let config = Config::load(workspace_root.as_deref())?;
        let flavor = if config.bool_setting(keys::NOJDK) == Some(true) {
            Flavor::NoJdk
        } else {
            Flavor::Standard
        };
        let target = Target {
            platform: Platform::host()?,
            flavor,
        };
        Self::with_endpoints(
            config,
            workspace_root,
            target,
            GcsEndpoints::default(),
            GitHubEndpoints::default(),
        )
    }

    /// # Errors
    /// Fails when the home directory cannot be determined or the HTTP client
    /// cannot be built.
    pub fn with_endpoints(
        config: Config,
        workspace_root: Option<PathBuf>,
        target: Target,
        gcs: GcsEndpoints,
        github: GitHubEndpoints,
    ) -> Result<Self> {
        let home = config.home_dir()?;
        let user_agent = config.get(keys::USER_AGENT).unwrap_or(DEFAULT_USER_AGENT);
        let show_progress = progress_enabled(config.bool_setting(keys::SHOW_PROGRESS));
        let http = Arc::new(HttpClient::new(user_agent)?.with_progress(show_progress));
        let gcs_repo = || Box::new(GcsRepo::with_endpoints(Arc::clone(&http), gcs.clone()));
        let repos = Repositories::empty()
            .with_lts(gcs_repo())
            .with_commits(gcs_repo())
            .with_rolling(gcs_repo())
            .with_forks(Box::new(GitHubRepo::new(
                Arc::clone(&http),
                github.clone(),
                config.get(keys::GITHUB_TOKEN),
            )));
        debug!(home = %home.display(), root = ?workspace_root, "launcher initialised");
        Ok(Self {
            config,
            workspace_root,
            home,
            target,
            http,
            repos,
            github,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Runs `args` with children on the host and reports on stdout.
    ///
    /// # Errors
    /// See [`Launcher::run_with`].
    pub fn run(&self, args: &[String]) -> Result<i32> {
        let runner = HostRunner::new(&self.config, self.workspace_root.as_deref());
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.run_with(args, &runner, &mut out)
    }

    /// Returns the exit code the launcher should end with.
    ///
    /// # Errors
    /// Fails for malformed mode arguments, version selection, installation,
    /// and children that cannot be started.
    pub fn run_with(
        &self,
        args: &[String],
        runner: &dyn ChildRunner,
        out: &mut dyn Write,
    ) -> Result<i32> {
        let (mode, args) = parse_mode(args)?;
        debug!(?mode, "dispatching");
        match mode {
            Mode::Bisect(range) => {
                let installer = self.installer();
                let install = |commit: &str| installer.install(commit).map(|installed| installed.path);
                let compare = GitHubCompare::new(
                    Arc::clone(&self.http),
                    &self.github.api,
                    self.config.get(keys::GITHUB_TOKEN),
                );
                let mut session = self.session(runner, out);
                bisect(&mut session, &range, args, &compare, &install)
            }
            Mode::PrintEnv => {
                let bazel = self.install_selected()?.path;
                let invocation =
                    wrapper::select(&bazel, &self.config, self.workspace_root.as_deref());
                for line in ChildEnv::capture(&bazel, invocation.path()).lines() {
                    writeln!(out, "{line}")?;
                }
                Ok(0)
            }
            Mode::Strict => {
                let command = bazel_command(args)?;
                let installed = self.install_selected()?;
                let flags = incompatible_flags(&self.config, runner, &installed.path, command)?;
                self.run_bazel(&installed, &insert_args(args, &flags), runner, out)
            }
            Mode::Migrate => {
                let command = bazel_command(args)?;
                let bazel = self.install_selected()?.path;
                let flags = incompatible_flags(&self.config, runner, &bazel, command)?;
                let mut session = self.session(runner, out);
                migrate(&mut session, &bazel, args, &flags)
            }
            Mode::Run => {
                let installed = self.install_selected()?;
                self.run_bazel(&installed, args, runner, out)
            }
        }
    }

    fn installer(&self) -> Installer<'_> {
        Installer::new(
            &self.config,
            &self.home,
            &self.target,
            &self.http,
            &self.repos,
        )
    }

    fn install_selected(&self) -> Result<Installed> {
        let label = select_label(&self.config, self.workspace_root.as_deref())?;
        let installed = self.installer().install(&label)?;
        debug!(label = %label, version = %installed.version, path = %installed.path.display(), "using bazel");
        Ok(installed)
    }

    fn session<'s>(&'s self, runner: &'s dyn ChildRunner, out: &'s mut dyn Write) -> Session<'s> {
        Session {
            config: &self.config,
            runner,
            out,
        }
    }

    fn run_bazel(
        &self,
        installed: &Installed,
        args: &[String],
        runner: &dyn ChildRunner,
        out: &mut dyn Write,
    ) -> Result<i32> {
        if is_version_command(args) {
            if args.iter().any(|arg| arg == "--gnu_format") {
                writeln!(out, "bzx {LAUNCHER_VERSION}")?;
            } else {
                writeln!(out, "bzx version: {LAUNCHER_VERSION}")?;
            }
            out.flush()?;
        }
        if is_completion_command(args) {
            self.print_completion(&installed.version, args, out)
                .context("could not handle completion command")?;
            return Ok(0);
        }
        runner.run(&installed.path, args, None)
    }

    fn print_completion(&self, version: &str, args: &[String], out: &mut dyn Write) -> Result<()> {
        let shell = requested_shell(args)?;
        let completions = Completions::new(
            &self.config,
            &self.home,
            &self.target.platform,
            &self.http,
            &self.github.downloads,
        );
        out.write_all(completions.script(version, shell)?.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

/// Entry point of the `bzx` binary.
///
/// # Errors
/// Any launcher failure; child exit codes are returned as `Ok`.
pub fn run(args: &[String]) -> Result<i32> {
    Launcher::from_env()?.run(args)
}
