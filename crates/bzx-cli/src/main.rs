use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable holding `tracing` filter directives.
const LOG_ENV: &str = "BZX_LOG";
const DEFAULT_DIRECTIVES: &str = "bzx=info,bzx_core=info,bzx_store=info,bzx_domain=info";

/// Runs the Bazel version a workspace asks for. Every argument is passed on
/// to Bazel, except a leading `--print_env`, `--strict`, `--migrate` or
/// `--bisect=[~]<good>..<bad>`.
#[derive(Parser, Debug)]
#[command(
    name = "bzx",
    disable_help_flag = true,
    disable_version_flag = true,
    disable_help_subcommand = true
)]
struct BzxCli {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = BzxCli::parse();
    let code = bzx_core::run(&cli.args).map_err(|err| eyre!("{err:?}"))?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .without_time()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
