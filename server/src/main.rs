use anyhow::Result;
use clap::Parser;
use examrelay_server::{Broker, BrokerConfig};
use examrelay_shared::limits;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exam session relay broker.
#[derive(Parser, Debug)]
#[command(name = "examrelay-server", about = "Exam session pairing and relay broker")]
struct Cli {
    /// Address of the line-oriented TCP listener.
    #[arg(long, env = "EXAMRELAY_TCP_ADDR", default_value = "0.0.0.0:8080")]
    tcp_addr: String,

    /// Address of the WebSocket/HTTP listener.
    #[arg(long, env = "EXAMRELAY_WS_ADDR", default_value = "0.0.0.0:8081")]
    ws_addr: String,

    /// Seconds from full pairing until the expiry notice.
    #[arg(long, env = "EXAMRELAY_SESSION_DURATION_SECS", default_value_t = limits::SESSION_DURATION_SECS)]
    session_duration_secs: u64,

    /// Capacity of each connection's outbound queue.
    #[arg(long, env = "EXAMRELAY_QUEUE_CAPACITY", default_value_t = limits::OUTBOUND_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Longest accepted TCP line in bytes.
    #[arg(long, env = "EXAMRELAY_MAX_LINE_LENGTH", default_value_t = limits::MAX_LINE_LENGTH)]
    max_line_length: usize,

    /// Do not forward user messages to the examiner.
    #[arg(long, env = "EXAMRELAY_NO_USER_RELAY")]
    no_user_relay: bool,

    /// Seconds a vacant session may stay idle before eviction.
    #[arg(long, env = "EXAMRELAY_IDLE_TTL_SECS", default_value_t = limits::IDLE_SESSION_TTL_SECS)]
    idle_ttl_secs: u64,

    /// Seconds between idle sweeps.
    #[arg(long, env = "EXAMRELAY_SWEEP_INTERVAL_SECS", default_value_t = limits::SWEEP_INTERVAL_SECS)]
    sweep_interval_secs: u64,
}

impl From<Cli> for BrokerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            tcp_addr: cli.tcp_addr,
            ws_addr: cli.ws_addr,
            session_duration_secs: cli.session_duration_secs,
            outbound_queue_capacity: cli.queue_capacity,
            max_line_length: cli.max_line_length,
            relay_user_messages: !cli.no_user_relay,
            idle_session_ttl_secs: cli.idle_ttl_secs,
            sweep_interval_secs: cli.sweep_interval_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = BrokerConfig::from(Cli::parse());
    info!(
        "Exam relay starting: tcp={} ws={} duration={}s",
        config.tcp_addr, config.ws_addr, config.session_duration_secs
    );

    let broker = Broker::new(config);
    let (tcp_listener, ws_listener) = broker.bind().await?;
    let _sweeper = broker.spawn_sweeper();

    tokio::select! {
        _ = broker.serve_tcp(tcp_listener) => {
            error!("TCP listener stopped");
        }
        result = broker.serve_ws(ws_listener) => {
            if let Err(e) = result {
                error!("{:#}", e);
                return Err(e);
            }
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down, {} sessions registered", broker.registry().len());
        }
    }

    Ok(())
}
