mod config;
mod serve_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::{CliOverrides, ResolvedConfig};
use serve_cmd::ServeArgs;

#[derive(Parser)]
#[command(name = "importhost", about = "Fake go-import host backed by a real VCS daemon")]
struct Cli {
    /// Config file (defaults to ~/.config/importhost/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Serve one package until interrupted
    Serve {
        /// Import path to serve, e.g. example.org/mod
        package: String,
        /// Sandbox root; the repository lives at <root>/<package>
        #[arg(long)]
        root: Option<PathBuf>,
        /// VCS backend (overrides IMPORTHOST_BACKEND and the config file)
        #[arg(long)]
        backend: Option<String>,
        /// Host for the daemon to listen on
        #[arg(long)]
        listen_host: Option<String>,
        /// Readiness timeout for the daemon, in milliseconds
        #[arg(long)]
        readiness_timeout_ms: Option<u64>,
        /// Commit whatever is already in the repository directory
        #[arg(long)]
        commit: bool,
        /// Print the endpoint summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            let path = cli.config.unwrap_or_else(config::config_path);
            config::init_config(&path, force)?;
            println!("Wrote {}", path.display());
        }
        Commands::Serve {
            package,
            root,
            backend,
            listen_host,
            readiness_timeout_ms,
            commit,
            json,
        } => {
            let resolved = ResolvedConfig::resolve(
                cli.config.as_deref(),
                CliOverrides {
                    backend,
                    listen_host,
                    readiness_timeout_ms,
                },
            )?;
            let args = ServeArgs {
                package,
                root,
                commit,
                json,
            };
            if let Err(e) = serve_cmd::run_serve(resolved, args).await {
                eprintln!("{e:#}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
