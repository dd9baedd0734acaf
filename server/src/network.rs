//! TCP transport: accept loop and per-connection reader/writer tasks
//!
//! The transport layer knows nothing about sessions or matchmaking.
//! Each accepted connection gets a numeric id, a reader task that
//! decodes length-prefixed bincode frames into client events, and a
//! writer task that drains the connection's outbound channel. Both
//! directions funnel through the coordinator's single event queue, so
//! the coordinator stays the only writer of shared state.

use crate::coordinator::ConnectionEvent;
use crate::registry::ConnectionId;
use log::{debug, error, info, warn};
use shared::{encode_frame, ClientEvent, ServerEvent, MAX_FRAME_LEN};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Listens for client connections and feeds the coordinator.
pub struct NetworkServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl NetworkServer {
    /// Binds the listener. Port 0 picks a free port; `local_addr`
    /// reports the real one.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, spawning the per-connection tasks.
    pub async fn run(self, events: mpsc::UnboundedSender<ConnectionEvent>) -> std::io::Result<()> {
        let mut next_conn_id: ConnectionId = 1;

        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let conn = next_conn_id;
            next_conn_id += 1;
            debug!("Connection {} accepted from {}", conn, peer_addr);

            let events = events.clone();
            tokio::spawn(async move {
                handle_connection(stream, conn, events).await;
            });
        }
    }
}

/// Runs one connection to completion: registers it with the
/// coordinator, pumps frames both ways, and reports the close.
async fn handle_connection(
    stream: TcpStream,
    conn: ConnectionId,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

    if events
        .send(ConnectionEvent::Opened {
            conn,
            sender: outbound_tx,
        })
        .is_err()
    {
        // Coordinator is gone; nothing useful left to do.
        return;
    }

    let writer = tokio::spawn(write_loop(write_half, outbound_rx, conn));
    read_loop(read_half, conn, &events).await;

    if let Err(e) = events.send(ConnectionEvent::Closed { conn }) {
        error!("Failed to report close of connection {}: {}", conn, e);
    }
    writer.abort();
}

/// Reads frames until EOF or a transport error. A frame whose body
/// fails to decode is logged and skipped; the stream stays framed, so
/// one bad event must not cost the connection.
async fn read_loop(
    mut reader: OwnedReadHalf,
    conn: ConnectionId,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
) {
    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            warn!(
                "Connection {} sent oversized frame ({} bytes), dropping connection",
                conn, len
            );
            break;
        }

        let mut body = vec![0u8; len as usize];
        if reader.read_exact(&mut body).await.is_err() {
            break;
        }

        match bincode::deserialize::<ClientEvent>(&body) {
            Ok(event) => {
                if events
                    .send(ConnectionEvent::Inbound { conn, event })
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                warn!("Undecodable event from connection {}: {}", conn, e);
            }
        }
    }
}

/// Drains the connection's outbound channel onto the socket. An event
/// that fails to encode, including one past the frame cap, is dropped
/// whole so the framed stream stays intact.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<ServerEvent>,
    conn: ConnectionId,
) {
    while let Some(event) = outbound.recv().await {
        let frame = match encode_frame(&event) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode event for connection {}: {}", conn, e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(&frame).await {
            debug!("Write to connection {} failed: {}", conn, e);
            break;
        }
    }
}
