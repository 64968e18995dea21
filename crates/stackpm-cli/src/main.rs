#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use stackpm_core::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stackpm")]
#[command(author, version, about = "An npm-compatible dependency installer", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit progress events as JSON lines on stdout and JSON logs on stderr
    #[arg(long, global = true)]
    json: bool,

    /// Override the project directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Registry base URL (defaults to $STACKPM_NPM_REGISTRY, then the public npm registry)
    #[arg(long, global = true, value_name = "URL")]
    registry: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Install the project's dependencies, adding any given packages first
    #[command(visible_alias = "i")]
    Install {
        /// Packages to add (e.g., "react", "lodash@^4", "@types/node@20")
        specs: Vec<String>,

        /// Record added packages under devDependencies
        #[arg(short = 'D', long)]
        save_dev: bool,

        /// Maximum concurrent registry requests and downloads
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..=256))]
        concurrency: Option<u32>,
    },

    /// Remove direct dependencies and reinstall the rest
    #[command(visible_alias = "rm")]
    Uninstall {
        /// Package names to remove
        names: Vec<String>,
    },

    /// Report known security advisories for the locked packages
    Audit,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(config.json_logs),
        Some(Commands::Install {
            specs,
            save_dev,
            concurrency,
        }) => {
            let span = tracing::info_span!("install", cmd = "install", cwd = %config.cwd.display());
            let _guard = span.enter();
            let pkg_config = commands::pkg_config(cli.registry.as_deref(), concurrency)?;
            commands::install::run(&config, &pkg_config, &specs, save_dev)
        }
        Some(Commands::Uninstall { names }) => {
            let span =
                tracing::info_span!("uninstall", cmd = "uninstall", cwd = %config.cwd.display());
            let _guard = span.enter();
            let pkg_config = commands::pkg_config(cli.registry.as_deref(), None)?;
            commands::uninstall::run(&config, &pkg_config, &names)
        }
        Some(Commands::Audit) => {
            let span = tracing::info_span!("audit", cmd = "audit", cwd = %config.cwd.display());
            let _guard = span.enter();
            let pkg_config = commands::pkg_config(cli.registry.as_deref(), None)?;
            commands::audit::run(&config, &pkg_config)
        }
    }
}
