// ABOUTME: Gateway entry point: loads configuration, wires stores, vendors and the SMPP server
// ABOUTME: Runs until ctrl-c, then shuts the server down before stopping vendor binds

use argh::FromArgs;
use smpp_gateway::config::{Config, LogFormat};
use smpp_gateway::connectors::{ConnectorManager, PostgresVendorStore};
use smpp_gateway::dlr::RedisDlrTracker;
use smpp_gateway::ratelimit::{RateLimiter, RedisCounterStore};
use smpp_gateway::routing::PriorityRouter;
use smpp_gateway::server::{AllowAll, ServerSettings, SmppServer, StaticCredentials};
use std::error::Error;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// SMPP gateway routing customer traffic to upstream vendors
#[derive(FromArgs)]
struct CliArgs {
    /// address to listen on (overrides SMPP_HOST)
    #[argh(option)]
    host: Option<String>,

    /// plain SMPP port (overrides SMPP_PORT)
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// TLS SMPP port (overrides SMPP_TLS_PORT)
    #[argh(option)]
    tls_port: Option<u16>,

    /// accept every customer bind without checking credentials
    #[argh(switch)]
    allow_all_binds: bool,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = argh::from_env();

    let mut config = Config::from_env()?;
    if let Some(host) = cli_args.host {
        config.smpp_host = host;
    }
    if let Some(port) = cli_args.port {
        config.smpp_port = port;
    }
    if let Some(port) = cli_args.tls_port {
        config.smpp_tls_port = port;
    }
    config.allow_all_binds |= cli_args.allow_all_binds;

    init_tracing(&config);
    info!(environment = %config.environment, "Starting SMPP gateway");

    let vendor_store = PostgresVendorStore::new(&config.postgres)?;
    vendor_store.ping().await?;

    let redis_url = config.redis.url();
    let limiter = RateLimiter::new(Arc::new(RedisCounterStore::new(&redis_url).await?));
    let tracker = RedisDlrTracker::new(&redis_url).await?;

    let manager = Arc::new(ConnectorManager::new(Arc::new(vendor_store)));
    let loaded = manager.load_vendors().await?;
    if loaded == 0 {
        warn!("No active SMPP vendors configured");
    }

    let server = SmppServer::new(ServerSettings::from_config(&config));
    if config.allow_all_binds {
        warn!("Accepting every customer bind without authentication");
        server.set_credential_store(Arc::new(AllowAll));
    } else {
        info!(customers = config.credentials.len(), "Loaded customer credentials");
        server.set_credential_store(Arc::new(StaticCredentials::new(config.credentials.clone())));
    }
    server.set_router(Arc::new(PriorityRouter::new(manager.clone())));
    server.set_dlr_tracker(Arc::new(tracker));
    server.set_rate_limiter(Arc::new(limiter));
    manager.set_dlr_handler(Arc::new(server.clone())).await;

    manager.start_all().await;
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server.shutdown().await;
    manager.stop_all().await;
    info!("SMPP gateway stopped");
    Ok(())
}
