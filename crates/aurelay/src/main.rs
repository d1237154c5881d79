use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aurelay::api::{create_router, AppState};
use aurelay::config::{DeliveryMode, RelayConfig};
use aurelay::db::Database;

#[derive(Debug, Parser)]
#[command(author, version, about = "Aurelay - realtime chat relay server.")]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the relay server
    Serve(ServeCommand),
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Args)]
struct ServeCommand {
    /// Socket address to listen on (overrides config)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,
    /// Path to the sqlite database (overrides config)
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,
    /// Fan-out policy: targeted or broadcast (overrides config)
    #[arg(long, value_name = "MODE")]
    delivery_mode: Option<DeliveryMode>,
}

fn init_logging(opts: &CommonOpts) {
    let default_directive = if opts.quiet {
        "error"
    } else {
        match opts.verbose {
            0 => "aurelay=info,tower_http=warn",
            1 => "aurelay=debug,tower_http=debug",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    let mut config = RelayConfig::load(cli.common.config.as_deref())?;

    match cli.command {
        Command::Serve(cmd) => {
            if let Some(listen) = cmd.listen {
                config.listen = listen;
            }
            if let Some(database) = cmd.database {
                config.database = database;
            }
            if let Some(mode) = cmd.delivery_mode {
                config.delivery_mode = mode;
            }
            serve(config).await
        }
        Command::Config => {
            let rendered = toml::to_string_pretty(&config).context("rendering config")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

async fn serve(config: RelayConfig) -> Result<()> {
    let db = Database::open(&config.database)
        .await
        .with_context(|| format!("opening database at {}", config.database.display()))?;

    let state = AppState::new(&db, &config);
    let app = create_router(state);

    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("parsing listen address: {}", config.listen))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(
        listen = %addr,
        delivery_mode = ?config.delivery_mode,
        "relay listening"
    );
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
