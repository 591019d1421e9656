//! Per-connection outbound handle and writer task

use bytes::Bytes;
use examrelay_shared::{codec, Notice, Role};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to send messages to a specific participant
///
/// Sessions hold this as a back-reference for relay only; the dispatcher task
/// that created it owns the transport.
pub struct Connection {
    id: u64,
    role: Role,
    addr: SocketAddr,
    tx: mpsc::Sender<Bytes>,
    /// Count of messages dropped due to a full or closed queue
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Wrap an existing outbound queue
    pub fn new(role: Role, addr: SocketAddr, tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            role,
            addr,
            tx,
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a connection together with the receiving end of its queue
    pub fn channel(
        role: Role,
        addr: SocketAddr,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(role, addr, tx)), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer-visible transport address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Enqueue a payload without waiting
    ///
    /// Returns `false` if the queue is full or the writer is gone; the
    /// message is dropped and counted.
    pub fn send(&self, payload: Bytes) -> bool {
        match self.tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    conn_id = self.id,
                    role = %self.role,
                    addr = %self.addr,
                    dropped,
                    "outbound queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                debug!(conn_id = self.id, addr = %self.addr, "outbound queue closed");
                false
            }
        }
    }

    pub fn send_notice(&self, notice: &Notice) -> bool {
        self.send(notice.to_bytes())
    }

    /// Total messages dropped for this connection
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("addr", &self.addr)
            .finish()
    }
}

/// Drain an outbound queue into a newline-framed writer
///
/// Runs until every sender is dropped or a write fails, then shuts the
/// write side down.
pub async fn run_line_writer<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    addr: SocketAddr,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(payload) = rx.recv().await {
        let framed = codec::encode(&payload);
        if let Err(e) = writer.write_all(&framed).await {
            debug!(%addr, "write failed: {}", e);
            return Err(e);
        }
    }

    writer.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_message_success() {
        let (conn, mut rx) = Connection::channel(Role::User, addr(), 8);
        assert!(conn.send(Bytes::from_static(b"hello")));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let (conn, mut rx) = Connection::channel(Role::Examiner, addr(), 1);
        assert!(conn.send_notice(&Notice::SessionStarted));
        // Queue is now full
        assert!(!conn.send_notice(&Notice::Expired));
        assert_eq!(conn.drop_count(), 1);

        // Order preserved for what was accepted
        assert_eq!(rx.recv().await.unwrap(), Notice::SessionStarted.to_bytes());
    }

    #[tokio::test]
    async fn test_closed_queue_returns_false() {
        let (conn, rx) = Connection::channel(Role::User, addr(), 4);
        drop(rx);
        assert!(!conn.send(Bytes::from_static(b"late")));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _rx_a) = Connection::channel(Role::User, addr(), 1);
        let (b, _rx_b) = Connection::channel(Role::User, addr(), 1);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_line_writer_frames_in_order() {
        let (tx, rx) = mpsc::channel(8);
        let (client, mut server) = tokio::io::duplex(1024);

        let writer = tokio::spawn(run_line_writer(rx, client, addr()));
        tx.send(Bytes::from_static(b"first")).await.unwrap();
        tx.send(Bytes::from_static(b"second\n")).await.unwrap();
        drop(tx);
        writer.await.unwrap().unwrap();

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"first\nsecond\n");
    }
}
