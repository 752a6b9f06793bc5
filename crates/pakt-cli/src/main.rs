#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use pakt_core::pkg::{Direction, InstallationStrategy};
use pakt_core::{Config, DependencyRule};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pakt")]
#[command(author, version, about = "Resolve, download, and extract npm packages", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Read settings from a JSON config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Registry base URL
    #[arg(long, global = true, env = "PAKT_REGISTRY", value_name = "URL")]
    registry: Option<String>,

    /// Root directory for pakt's files
    #[arg(long, global = true, value_name = "PATH")]
    home_dir: Option<PathBuf>,

    /// Tarball cache directory
    #[arg(long, global = true, value_name = "PATH")]
    download_dir: Option<PathBuf>,

    /// Target directory of global installs
    #[arg(long, global = true, value_name = "PATH")]
    install_dir: Option<PathBuf>,

    /// Registry user (basic auth)
    #[arg(short = 'U', long, global = true)]
    username: Option<String>,

    /// Registry password (basic auth)
    #[arg(short = 'P', long, global = true, requires = "username")]
    password: Option<String>,

    /// Download tarballs again even if they are cached
    #[arg(short, long, global = true)]
    force: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Which dependency kinds the requested packages pull in.
#[derive(clap::Args, Debug, Clone, Copy)]
struct DepFlags {
    /// Skip `dependencies` of the requested packages
    #[arg(long)]
    no_prod: bool,

    /// Include `devDependencies` of the requested packages
    #[arg(long)]
    dev: bool,

    /// Include `optionalDependencies` of the requested packages
    #[arg(long)]
    optional: bool,

    /// Include `peerDependencies` of the requested packages
    #[arg(long)]
    peer: bool,
}

impl DepFlags {
    fn rule(self) -> DependencyRule {
        DependencyRule::for_flags(!self.no_prod, self.dev, self.optional, self.peer)
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Resolve the dependency tree of packages, optionally downloading tarballs
    #[command(visible_alias = "d")]
    Download {
        /// Package specs (`name`, `name@range`, `@scope/name@tag`)
        #[arg(required = true)]
        specs: Vec<String>,

        #[command(flatten)]
        deps: DepFlags,

        /// Fetch every tarball into the download directory
        #[arg(long)]
        download: bool,

        /// Traversal order: wider or deeper
        #[arg(long, default_value = "wider")]
        direction: Direction,
    },

    /// Install packages and their dependencies into a directory
    #[command(visible_alias = "e")]
    Extract {
        /// Package specs (`name`, `name@range`, `@scope/name@tag`)
        #[arg(required = true)]
        specs: Vec<String>,

        #[command(flatten)]
        deps: DepFlags,

        /// Layout of installed files
        #[arg(short, long, default_value = "npm", value_name = "NAME")]
        strategy: InstallationStrategy,

        /// Install root (defaults to the current directory)
        #[arg(short, long, value_name = "PATH", conflicts_with = "global")]
        output: Option<PathBuf>,

        /// Install into the global install directory
        #[arg(short, long)]
        global: bool,
    },

    /// Print one file from a package tarball
    Cat {
        /// Package spec
        spec: String,

        /// File path inside the package (e.g. `dist/vue.js`)
        path: String,
    },
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path).into_diagnostic()?,
        None => Config::default(),
    };

    if let Some(registry) = &cli.registry {
        config = config.with_registry_url(registry.clone());
    }
    if let Some(dir) = &cli.home_dir {
        config = config.with_home_dir(dir.clone());
    }
    if let Some(dir) = &cli.download_dir {
        config = config.with_download_dir(dir.clone());
    }
    if let Some(dir) = &cli.install_dir {
        config = config.with_install_dir(dir.clone());
    }
    if let Some(username) = &cli.username {
        config = config.with_credentials(username.clone(), cli.password.clone());
    }
    if cli.force {
        config = config.with_use_cache(false);
    }

    Ok(config
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    logging::init(config.verbosity, config.json_logs);

    let Some(command) = cli.command else {
        return commands::version::run();
    };

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    match command {
        Commands::Version => commands::version::run(),
        Commands::Download {
            specs,
            deps,
            download,
            direction,
        } => {
            let span = tracing::info_span!("download", cmd = "download");
            let _guard = span.enter();
            runtime.block_on(commands::download::run(
                config,
                commands::download::DownloadAction {
                    specs,
                    rule: deps.rule(),
                    direction,
                    fetch: download,
                },
                cli.json,
            ))
        }
        Commands::Extract {
            specs,
            deps,
            strategy,
            output,
            global,
        } => {
            let span = tracing::info_span!("extract", cmd = "extract");
            let _guard = span.enter();
            let root = if global {
                config.install_dir()
            } else {
                match output {
                    Some(dir) => dir,
                    None => std::env::current_dir().into_diagnostic()?,
                }
            };
            runtime.block_on(commands::extract::run(
                config,
                commands::extract::ExtractAction {
                    specs,
                    rule: deps.rule(),
                    strategy,
                    root,
                },
                cli.json,
            ))
        }
        Commands::Cat { spec, path } => runtime.block_on(commands::cat::run(config, &spec, &path)),
    }
}
