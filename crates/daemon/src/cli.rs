//! Command-line surface of the panel daemon.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use xpanel_common::{PanelConfig, UserId};
use xpanel_core::{FileStore, Panel, Scheduler, SyncStatus};

use crate::api::ApiServer;

/// Panel daemon CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "xpanel", version, about = "Proxy panel control plane")]
pub struct Cli {
    /// Config file path (TOML). Written with defaults when missing.
    #[arg(short, long, default_value = "xpanel.toml")]
    pub config: PathBuf,

    /// Override the data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Log level override.
    #[arg(long, env = "XPANEL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Public server address advertised in links.
    #[arg(long, env = "XPANEL_SERVER_ADDRESS")]
    pub server_address: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the scheduler and the admin API (default)
    Run,
    /// Rotate the transport credentials now and resync the engine
    Rotate,
    /// Print the engine document the panel would write
    Render,
    /// Rebuild and apply the engine document
    Sync,
    /// Print a user's subscription links
    Links {
        /// User name or id
        user: String,

        /// Server address to put in the links
        #[arg(long)]
        address: Option<String>,
    },
}

/// Run the daemon with the given CLI arguments.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = load_or_init_config(&cli.config)?;

    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(address) = &cli.server_address {
        config.reality.server_address = Some(address.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = Some(level.clone());
    }

    init_tracing(config.logging.level.as_deref());
    info!("Starting xpanel v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(FileStore::new(&config.data_dir));
    let panel = Arc::new(Panel::builder(config).build(store));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => serve(panel).await,
        Command::Rotate => {
            let rotated = panel.rotate_now().await?;
            println!("Public key:  {}", rotated.value.public_key());
            println!(
                "Short ids:   {}",
                rotated
                    .value
                    .short_ids
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            report_status(&rotated.status);
            Ok(())
        }
        Command::Render => {
            let doc = panel.render().await?;
            println!("{}", doc.to_pretty_json()?);
            Ok(())
        }
        Command::Sync => {
            report_status(&panel.resync().await);
            Ok(())
        }
        Command::Links { user, address } => {
            let user = match UserId::parse(&user) {
                Ok(id) => panel.get_user(id).await?,
                Err(_) => panel.find_user(&user).await?,
            };
            let links = panel.subscription(user.id, address.as_deref()).await?;
            for (dialect, uri) in &links.links {
                println!("{:<13} {}", dialect.as_str(), uri);
            }
            for warning in &links.warnings {
                eprintln!("warning: {}", warning);
            }
            Ok(())
        }
    }
}

async fn serve(panel: Arc<Panel>) -> Result<()> {
    let boot = panel.bootstrap().await?;
    info!("Transport public key {}", boot.value.public_key());
    if let SyncStatus::Stale(e) = &boot.status {
        warn!("Engine not updated at start-up: {}", e);
    }

    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::for_panel(panel.clone(), shutdown.clone());

    let api = if panel.config().api.enabled {
        let addr: SocketAddr = panel
            .config()
            .api
            .listen
            .parse()
            .with_context(|| format!("invalid api.listen '{}'", panel.config().api.listen))?;
        let server = ApiServer::new(addr, panel.clone(), shutdown.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        info!("API server disabled");
        None
    };

    info!("Panel is running. Press Ctrl+C to stop.");
    shutdown_signal_handler().await;
    info!("Shutdown signal received");

    shutdown.cancel();
    scheduler.join().await;
    if let Some(api) = api {
        if let Err(e) = api.await {
            warn!("API task ended abnormally: {}", e);
        }
    }

    info!("Panel stopped");
    Ok(())
}

fn report_status(status: &SyncStatus) {
    match status {
        SyncStatus::Applied(path) => println!("Engine updated via {}", path),
        SyncStatus::Stale(e) => eprintln!("Stored, but engine not updated: {}", e),
    }
}

/// Load the config file, or write the defaults there for next time
fn load_or_init_config(path: &Path) -> Result<PanelConfig> {
    if path.exists() {
        return PanelConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()));
    }

    let config = PanelConfig::default();
    if let Err(e) = config.to_file(path) {
        eprintln!("Failed to save default config to {}: {}", path.display(), e);
    }
    Ok(config)
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.unwrap_or("info");
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::try_parse_from(["xpanel"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("xpanel.toml"));
    }

    #[test]
    fn test_links_subcommand() {
        let cli = Cli::try_parse_from([
            "xpanel",
            "--config",
            "/etc/xpanel.toml",
            "links",
            "alice",
            "--address",
            "198.51.100.4",
        ])
        .unwrap();

        match cli.command {
            Some(Command::Links { user, address }) => {
                assert_eq!(user, "alice");
                assert_eq!(address.as_deref(), Some("198.51.100.4"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_missing_config_is_written_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpanel.toml");

        let config = load_or_init_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.engine.listen_port, PanelConfig::default().engine.listen_port);

        let reloaded = load_or_init_config(&path).unwrap();
        assert_eq!(reloaded.reality.dest, config.reality.dest);
    }
}
