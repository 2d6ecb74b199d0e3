//! natter server - chat room daemon

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use natter_utils::{LogConfig, LogOutput, NatterError, Result};

mod broadcaster;
mod config;
mod handlers;
mod registry;
mod server;
mod session;
mod watchdog;

use config::{AppConfig, ConfigLoader};
use server::ChatServer;

/// Multi-user text chat server over plain TCP
#[derive(Parser, Debug)]
#[command(name = "natter-server")]
#[command(about = "Multi-user text chat server")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    ///
    /// Without this flag the XDG location is used when present, and the
    /// built-in defaults otherwise.
    #[arg(long, env = "NATTER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address as host:port, overriding the configuration file
    #[arg(long, env = "NATTER_ADDR")]
    listen: Option<String>,

    /// Seconds of silence before a session is disconnected
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Also write logs to this file under the state log directory
    #[arg(long)]
    log_file: Option<String>,
}

/// Split a `host:port` listen flag
fn parse_listen(value: &str) -> Result<(String, u16)> {
    let Some((host, port)) = value.rsplit_once(':') else {
        return Err(NatterError::config(format!(
            "listen address '{value}' must be host:port"
        )));
    };
    if host.is_empty() {
        return Err(NatterError::config(format!(
            "listen address '{value}' is missing a host"
        )));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| NatterError::config(format!("invalid port '{port}' in listen address")))?;
    Ok((host.to_string(), port))
}

/// Resolve configuration from file, flags and defaults, then validate
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_path(path)?,
        None => ConfigLoader::load()?,
    };

    if let Some(listen) = &cli.listen {
        let (host, port) = parse_listen(listen)?;
        config.listen.host = host;
        config.listen.port = port;
    }

    if let Some(secs) = cli.idle_timeout {
        config.session.idle_timeout_secs = secs;
    }

    ConfigLoader::validate(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        output: if cli.log_file.is_some() {
            LogOutput::Both
        } else {
            LogOutput::Stderr
        },
        file_name: cli.log_file.clone(),
        ..LogConfig::server()
    };
    natter_utils::init_logging_with_config(log_config)?;

    let config = load_config(&cli)?;
    info!(
        addr = %config.listen.addr(),
        idle_timeout_secs = config.session.idle_timeout_secs,
        "natter server starting"
    );

    let server = ChatServer::new(config);
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for interrupt");
            return;
        }
        info!("interrupt received, shutting down");
        let _ = shutdown.send(());
    });

    server.run().await?;

    info!("natter server stopped");
    Ok(())
}
