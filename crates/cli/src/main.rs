use anyhow::Result;
use clap::{Parser, Subcommand};
use codechat_daemon::daemon::print_stdout;
use codechat_daemon::{index_once, logging, serve, DaemonConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codechat-daemon")]
#[command(about = "Index a workspace and answer code questions over HTTP", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Config file (default: <config dir>/codechat/config.toml)
    #[arg(long, global = true, env = "CODECHAT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the workspace and serve /health and /query
    Serve {
        /// Workspace root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Listen address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Index the workspace once and exit
    Index {
        /// Workspace root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    logging::init(cli.verbose, cli.quiet, config.log_level.as_deref());

    match cli.command {
        Commands::Serve { root, bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            serve(&root, &config).await
        }
        Commands::Index { root, json } => {
            let summary = index_once(&root, &config).await?;
            if json {
                print_stdout(&serde_json::to_string_pretty(&summary)?)
            } else {
                print_stdout(&format!(
                    "{} file(s) tracked: {} indexed, {} degraded, {} unindexable; {} chunk(s)",
                    summary.tracked_files,
                    summary.indexed_files,
                    summary.degraded_files,
                    summary.unindexable_files,
                    summary.chunks
                ))
            }
        }
    }
}
