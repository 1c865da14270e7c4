//! Tether relay server entry point.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_relay::{RelayConfig, RelayServer, ServerConfig};

/// Multi-tenant CDP relay for extension-tunnelled browsers.
#[derive(Debug, Parser)]
#[command(name = "tether-server", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 3000, env = "TETHER_PORT")]
    port: u16,

    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0", env = "TETHER_HOST")]
    host: String,

    /// Shared bearer token required on every WebSocket upgrade.
    #[arg(long, env = "TETHER_TOKEN")]
    token: Option<String>,

    /// Cap on concurrent client CDP connections.
    #[arg(long = "max-instances", default_value_t = 100)]
    max_instances: usize,

    /// Seconds a device may sit short of ACTIVE before eviction.
    #[arg(long = "instance-timeout", default_value_t = 30)]
    instance_timeout: u64,

    /// Seconds between stale-device checks (heartbeat interval; the sweep
    /// runs at twice this).
    #[arg(long = "inactive-check-interval", default_value_t = 30)]
    inactive_check_interval: u64,

    /// Log every relayed CDP frame.
    #[arg(long = "cdp-logging", default_value_t = false)]
    cdp_logging: bool,

    /// Mount the enhanced /v2/* endpoint family (`--v2 false` disables it).
    #[arg(
        long = "v2",
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    v2: bool,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = RelayConfig {
        heartbeat_interval_ms: cli.inactive_check_interval.saturating_mul(1_000),
        connection_timeout_ms: cli.instance_timeout.saturating_mul(1_000),
        max_concurrent_connections: cli.max_instances,
        enable_detailed_logging: cli.cdp_logging,
        ..RelayConfig::default()
    };
    let server_config = ServerConfig {
        host: cli.host,
        port: cli.port,
        token: cli.token.unwrap_or_else(|| ServerConfig::default().token),
        v2_enabled: cli.v2,
    };

    let addr = format!("{}:{}", server_config.host, server_config.port);
    let server = RelayServer::new(config, server_config);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Starting Tether relay");

    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Interrupt received");
        })
        .await
}
