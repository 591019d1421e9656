//! Line-oriented TCP binding
//!
//! The first non-empty line is the identity (`<role>/<session>`); every
//! later line is relayed by role. Notices are written back one per line.

use super::{ConnectionDispatcher, ConnectionDriver};
use crate::error::DispatchError;
use crate::session::run_line_writer;
use bytes::Bytes;
use examrelay_shared::codec::LineDecoder;
use examrelay_shared::state_machine::ConnectionState;
use examrelay_shared::Identity;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// How long a closing connection waits for its writer to flush
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept connections forever, one task per connection
pub async fn serve(listener: TcpListener, dispatcher: Arc<ConnectionDispatcher>) {
    if let Ok(addr) = listener.local_addr() {
        info!("TCP relay listening on {}", addr);
    }

    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    handle_connection(socket, addr, dispatcher).await;
                });
            }
            Err(e) => {
                warn!("accept failed: {}", e);
            }
        }
    }
}

/// Inbound half of a TCP connection with its line decoder
struct LineReader {
    reader: OwnedReadHalf,
    decoder: LineDecoder,
    read_buf: Vec<u8>,
}

impl LineReader {
    fn new(reader: OwnedReadHalf, max_line_length: usize) -> Self {
        Self {
            reader,
            decoder: LineDecoder::with_max_length(max_line_length),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Read the next line
    /// Returns `Ok(None)` if the peer closed the connection
    async fn recv(&mut self) -> Result<Option<String>, DispatchError> {
        loop {
            // First try to decode from existing buffer
            if let Some(line) = self.decoder.decode_next()? {
                return Ok(Some(line));
            }

            // Read more data
            let n = self.reader.read(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }
}

/// Drive one TCP connection from accept to close
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<ConnectionDispatcher>,
) {
    info!(%addr, "client connected");

    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel::<Bytes>(dispatcher.config().outbound_queue_capacity.max(1));
    let mut writer_task = tokio::spawn(run_line_writer(rx, writer, addr));

    let mut reader = LineReader::new(reader, dispatcher.config().max_line_length);
    let mut driver = ConnectionDriver::new(dispatcher, addr, tx);

    loop {
        let line = match reader.recv().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(%addr, "client disconnected");
                break;
            }
            Err(e) => {
                warn!(%addr, "read failed: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match driver.state() {
            ConnectionState::AwaitingIdentity => {
                if let Err(e) = driver.identify(Identity::parse_line(&line)) {
                    info!(%addr, "rejected: {}", e);
                    break;
                }
            }
            ConnectionState::Active => driver.on_message(Bytes::from(line)).await,
            ConnectionState::Closed => break,
        }
    }

    driver.close();
    drop(driver);

    // The writer ends once every queue handle is gone, after flushing notices
    match timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => debug!(%addr, "writer ended with error: {}", e),
        Ok(Err(e)) => warn!(%addr, "writer task failed: {}", e),
        Err(_) => {
            warn!(%addr, "writer did not drain in time");
            writer_task.abort();
        }
    }
}
