mod connection;

use anyhow::{Context, Result};
use clap::Parser;
use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager};
use examrelay_shared::Identity;
use tokio::io::{AsyncBufReadExt, BufReader};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Typing this line ends the session
const QUIT_COMMAND: &str = "ex";

/// Interactive client for the exam relay
#[derive(Parser, Debug)]
#[command(name = "exam-client", about = "Join an exam session over the line protocol")]
struct Cli {
    /// Relay TCP address
    #[arg(long, env = "EXAMRELAY_SERVER", default_value = "127.0.0.1:8080")]
    server: String,

    /// examiner or user
    #[arg(long)]
    role: String,

    /// Session identifier shared by both participants
    #[arg(long)]
    session: String,

    /// Consecutive failed connects before giving up, 0 retries forever
    #[arg(long, default_value_t = 10)]
    max_reconnect_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let identity = Identity::from_params(Some(cli.role.as_str()), Some(cli.session.as_str()))
        .with_context(|| format!("invalid identity {}/{}", cli.role, cli.session))?;

    let config = ConnectionConfig {
        max_reconnect_attempts: cli.max_reconnect_attempts,
        ..ConnectionConfig::new(cli.server, identity)
    };

    info!("Exam client starting: {} as {}", config.server, config.identity.to_line());

    let mut conn = ConnectionManager::new(config);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let line = match line.context("Failed to read stdin")? {
                    Some(line) => line,
                    None => break,
                };
                let line = line.trim_end();
                if line == QUIT_COMMAND {
                    info!("Exiting");
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                conn.send(line).await?;
            }

            event = conn.recv() => {
                match event {
                    Some(ConnectionEvent::Connected) => {
                        info!("Connected as {}", conn.identity().to_line());
                    }
                    Some(ConnectionEvent::Received(line)) => {
                        println!("{}", line);
                    }
                    Some(ConnectionEvent::Disconnected { reason }) => {
                        warn!("Disconnected: {}", reason);
                    }
                    Some(ConnectionEvent::ConnectionFailed { reason }) => {
                        error!("Connection failed: {}", reason);
                        break;
                    }
                    None => {
                        error!("Connection manager closed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
