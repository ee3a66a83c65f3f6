//! Virtual API Server - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use virtual_api_server::{server, ServerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "virtual-api-server",
    about = "Serve runtime-registered mock endpoints with templated responses",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "virtual-api.yaml")]
    config: PathBuf,

    /// Listen address, overrides the configuration file
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Admin key for the /_system management API
    #[arg(long, env = "VAPI_ADMIN_KEY", hide_env_values = true)]
    admin_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        ServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no endpoints)");
        ServerConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} endpoints defined)",
            config.endpoints.len()
        );
        return Ok(());
    }

    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(key) = args.admin_key {
        config.admin.api_key = Some(key);
    }
    if config.admin.api_key.is_none() {
        tracing::warn!("No admin key configured, the /_system API will reject every call");
    }

    server::serve(config).await
}
