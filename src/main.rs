//! ota-server: an HTTPS server for over-the-air firmware images.
//!
//! This is the application entry point. It parses flags, initializes tracing,
//! merges flags over the optional TOML config file, and runs the server until
//! SIGINT/SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ota_server::config::{AppConfig, ServerSection, DEFAULT_LOG_FILTER};
use ota_server::http::setup_shutdown_handler;
use ota_server::StaticTlsServer;

/// Runs an HTTPS server to serve images for over-the-air (OTA) updates.
#[derive(Parser, Debug)]
#[command(name = "ota-server", version, about)]
struct Args {
    /// Directory containing OTA images [default: ../../build_app/]
    #[arg(long = "ota_image_dir")]
    ota_image_dir: Option<PathBuf>,

    /// IP address to bind the server [default: 0.0.0.0]
    #[arg(long = "server_ip")]
    server_ip: Option<String>,

    /// Port to bind the server [default: 8070]
    #[arg(long = "server_port")]
    server_port: Option<u16>,

    /// Server certificate file; pass without a value to disable TLS [default: ./ca_cert.pem]
    #[arg(long = "server_cert", num_args = 0..=1, default_missing_value = "")]
    server_cert: Option<String>,

    /// Server private key file; pass without a value to disable TLS [default: ./ca_key.pem]
    #[arg(long = "server_key", num_args = 0..=1, default_missing_value = "")]
    server_key: Option<String>,

    /// Path to an optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level filter (e.g., "ota_server=debug")
    #[arg(short, long = "log_level")]
    log_level: Option<String>,
}

impl Args {
    fn server_overrides(&self) -> ServerSection {
        ServerSection {
            ota_image_dir: self.ota_image_dir.clone(),
            server_ip: self.server_ip.clone(),
            server_port: self.server_port,
            server_cert: self.server_cert.as_ref().map(PathBuf::from),
            server_key: self.server_key.as_ref().map(PathBuf::from),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match AppConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::default(),
    };
    config.server = config.server.clone().overlay(args.server_overrides());

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    if config.logging.is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let server_config = config.server_config()?;
    let limits = config.limits.limits()?;

    tracing::info!(
        root = %server_config.root_dir().display(),
        host = %server_config.bind_host(),
        port = server_config.bind_port(),
        tls = server_config.tls().is_tls(),
        "Loaded configuration"
    );

    let server = StaticTlsServer::with_limits(server_config, limits);
    setup_shutdown_handler(server.handle());

    server.start().await?;
    Ok(())
}
