//! Connection manager with persistent connection and automatic reconnection

use anyhow::{anyhow, Result};
use examrelay_shared::{
    codec::{self, LineDecoder},
    limits, Identity, Notice,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connected and identity line sent
    Connected,
    /// Disconnected from server, a reconnect will follow
    Disconnected { reason: String },
    /// Received a line from the server
    Received(String),
    /// Gave up; no further reconnects
    ConnectionFailed { reason: String },
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Relay TCP address
    pub server: String,
    /// Identity announced on every connect
    pub identity: Identity,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Consecutive failed attempts before giving up, 0 retries forever
    pub max_reconnect_attempts: u32,
    pub max_line_length: usize,
}

impl ConnectionConfig {
    pub fn new(server: impl Into<String>, identity: Identity) -> Self {
        Self {
            server: server.into(),
            identity,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            max_line_length: limits::MAX_LINE_LENGTH,
        }
    }
}

/// Manages the connection to the relay
pub struct ConnectionManager {
    config: ConnectionConfig,
    /// Channel to send lines to the server
    outbound_tx: mpsc::Sender<String>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the connection loop
    pub fn new(config: ConnectionConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(100);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);

        let config_clone = config.clone();
        tokio::spawn(async move {
            connection_loop(config_clone, outbound_rx, event_tx).await;
        });

        Self {
            config,
            outbound_tx,
            event_rx,
        }
    }

    /// Queue a line for the server
    pub async fn send(&self, line: impl Into<String>) -> Result<()> {
        self.outbound_tx
            .send(line.into())
            .await
            .map_err(|_| anyhow!("Connection closed"))
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    pub fn identity(&self) -> &Identity {
        &self.config.identity
    }
}

/// How an established connection ended
enum Closed {
    /// The manager was dropped
    Shutdown,
    /// The server refused our identity
    Rejected(String),
    Lost(anyhow::Error),
}

/// Main connection loop with reconnection logic
async fn connection_loop(
    config: ConnectionConfig,
    mut outbound_rx: mpsc::Receiver<String>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let mut reconnect_delay = config.reconnect_delay;
    let mut failed_attempts = 0u32;

    loop {
        let failure = match timeout(config.connect_timeout, TcpStream::connect(&config.server)).await {
            Ok(Ok(stream)) => {
                reconnect_delay = config.reconnect_delay;
                failed_attempts = 0;

                match handle_connection(stream, &config, &mut outbound_rx, &event_tx).await {
                    Closed::Shutdown => return,
                    Closed::Rejected(notice) => {
                        let _ = event_tx
                            .send(ConnectionEvent::ConnectionFailed { reason: notice })
                            .await;
                        return;
                    }
                    Closed::Lost(reason) => {
                        let _ = event_tx
                            .send(ConnectionEvent::Disconnected {
                                reason: reason.to_string(),
                            })
                            .await;
                    }
                }
                None
            }
            Ok(Err(e)) => Some(format!("connect to {} failed: {}", config.server, e)),
            Err(_) => Some(format!("connect to {} timed out", config.server)),
        };

        if let Some(reason) = failure {
            failed_attempts += 1;
            if config.max_reconnect_attempts > 0 && failed_attempts >= config.max_reconnect_attempts {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: format!("{} (after {} attempts)", reason, failed_attempts),
                    })
                    .await;
                return;
            }
            let _ = event_tx
                .send(ConnectionEvent::Disconnected { reason })
                .await;
        }

        // Wait before reconnecting
        tokio::time::sleep(reconnect_delay).await;

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
    }
}

/// A first line that means the relay refused the identity
fn is_rejection(line: &str, identity: &Identity) -> bool {
    line == Notice::RoleOccupied(identity.role).to_string() || line.starts_with("ERROR: ")
}

/// Handle an active connection
async fn handle_connection(
    stream: TcpStream,
    config: &ConnectionConfig,
    outbound_rx: &mut mpsc::Receiver<String>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Closed {
    let (mut reader, mut writer) = stream.into_split();

    let hello = codec::encode(config.identity.to_line().as_bytes());
    if let Err(e) = writer.write_all(&hello).await {
        return Closed::Lost(anyhow!("Failed to send identity: {}", e));
    }
    let _ = event_tx.send(ConnectionEvent::Connected).await;

    let mut decoder = LineDecoder::with_max_length(config.max_line_length);
    let mut read_buf = vec![0u8; 4096];
    let mut first_line: Option<String> = None;
    let mut lines_seen = 0usize;

    loop {
        tokio::select! {
            // Send outbound lines
            line = outbound_rx.recv() => {
                let Some(line) = line else {
                    return Closed::Shutdown;
                };
                if let Err(e) = writer.write_all(&codec::encode(line.as_bytes())).await {
                    return Closed::Lost(anyhow!("Write error: {}", e));
                }
            }

            // Read incoming lines
            result = reader.read(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        // Refusal is a single notice followed by close
                        if let (1, Some(line)) = (lines_seen, first_line.take()) {
                            if is_rejection(&line, &config.identity) {
                                return Closed::Rejected(line);
                            }
                        }
                        return Closed::Lost(anyhow!("Server closed connection"));
                    }
                    Ok(n) => {
                        decoder.extend(&read_buf[..n]);

                        loop {
                            match decoder.decode_next() {
                                Ok(Some(line)) => {
                                    lines_seen += 1;
                                    if lines_seen == 1 {
                                        first_line = Some(line.clone());
                                    }
                                    let _ = event_tx.send(ConnectionEvent::Received(line)).await;
                                }
                                Ok(None) => break,
                                Err(e) => return Closed::Lost(anyhow!("Decode error: {}", e)),
                            }
                        }
                    }
                    Err(e) => {
                        return Closed::Lost(anyhow!("Read error: {}", e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use examrelay_shared::Role;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn fast_config(server: String) -> ConnectionConfig {
        ConnectionConfig {
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(40),
            connect_timeout: Duration::from_secs(1),
            ..ConnectionConfig::new(server, Identity::new(Role::User, "abc123"))
        }
    }

    async fn next_event(manager: &mut ConnectionManager) -> ConnectionEvent {
        timeout(Duration::from_secs(5), manager.recv())
            .await
            .expect("timed out")
            .expect("manager closed")
    }

    #[tokio::test]
    async fn test_identity_sent_first_and_lines_exchanged() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut manager = ConnectionManager::new(fast_config(addr.to_string()));

        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("user/abc123"));
        assert_eq!(next_event(&mut manager).await, ConnectionEvent::Connected);

        writer.write_all(b"Session started\n").await.unwrap();
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::Received("Session started".into())
        );

        manager.send("my answer").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("my answer"));
    }

    #[tokio::test]
    async fn test_reconnect_resends_identity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut manager = ConnectionManager::new(fast_config(addr.to_string()));

        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("user/abc123"));
        drop(lines);

        assert_eq!(next_event(&mut manager).await, ConnectionEvent::Connected);
        assert!(matches!(
            next_event(&mut manager).await,
            ConnectionEvent::Disconnected { .. }
        ));

        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("user/abc123"));
        assert_eq!(next_event(&mut manager).await, ConnectionEvent::Connected);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ConnectionConfig {
            max_reconnect_attempts: 2,
            ..fast_config(addr.to_string())
        };
        let mut manager = ConnectionManager::new(config);

        assert!(matches!(
            next_event(&mut manager).await,
            ConnectionEvent::Disconnected { .. }
        ));
        match next_event(&mut manager).await {
            ConnectionEvent::ConnectionFailed { reason } => {
                assert!(reason.contains("after 2 attempts"), "{}", reason)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejection_stops_reconnecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut manager = ConnectionManager::new(fast_config(addr.to_string()));

        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        lines.next_line().await.unwrap();
        writer.write_all(b"WARNING: User exists\n").await.unwrap();
        drop(writer);
        drop(lines);

        assert_eq!(next_event(&mut manager).await, ConnectionEvent::Connected);
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::Received("WARNING: User exists".into())
        );
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::ConnectionFailed {
                reason: "WARNING: User exists".into()
            }
        );
        assert_eq!(next_event_or_none(&mut manager).await, None);
    }

    async fn next_event_or_none(manager: &mut ConnectionManager) -> Option<ConnectionEvent> {
        timeout(Duration::from_secs(5), manager.recv()).await.expect("timed out")
    }

    #[test]
    fn test_is_rejection() {
        let identity = Identity::new(Role::Examiner, "s");
        assert!(is_rejection("WARNING: Examiner exists", &identity));
        assert!(!is_rejection("WARNING: User exists", &identity));
        assert!(is_rejection("ERROR: invalid identity: missing role", &identity));
        assert!(!is_rejection("Session started", &identity));
    }
}
