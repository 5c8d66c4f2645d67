use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nether_common::PublicKey;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{write_message, MessageReader};
use crate::config::with_default_port;
use crate::error::P2pError;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Shareable handle to one open peer stream.
///
/// Only the write half lives here; the read half is owned by the chat loop
/// driving this connection.
#[derive(Clone)]
pub struct PeerConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    identity: PublicKey,
    listen_port: u16,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    closed: CancellationToken,
}

impl PeerConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Public key declared by the peer at handshake. Never re-verified.
    pub fn identity(&self) -> &PublicKey {
        &self.identity
    }

    /// Where the peer accepts connections: its IP as seen by us plus the
    /// listen port it declared.
    pub fn advertised_addr(&self) -> String {
        SocketAddr::new(self.remote_addr.ip(), self.listen_port).to_string()
    }

    /// Sends one message, holding the write lock across all of its frames.
    pub async fn send(&self, text: &str) -> Result<(), P2pError> {
        if self.closed.is_cancelled() {
            return Err(P2pError::Closed);
        }
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, text).await
    }

    /// Stops the chat loop and shuts the write side down.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        debug!(conn = self.id, peer = %self.remote_addr, "connection closed");
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("remote", &self.remote_addr)
            .field("advertised", &self.advertised_addr())
            .finish()
    }
}

/// Dials peers and performs the identity handshake on both directions.
#[derive(Clone, Debug)]
pub struct Transport {
    identity: PublicKey,
    listen_port: u16,
    connect_timeout: Duration,
}

impl Transport {
    pub fn new(identity: PublicKey, listen_port: u16, connect_timeout: Duration) -> Self {
        Self { identity, listen_port, connect_timeout }
    }

    pub fn identity(&self) -> &PublicKey {
        &self.identity
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Opens a TCP stream to `address` and handshakes.
    pub async fn connect(&self, address: &str) -> Result<(PeerConnection, MessageReader<OwnedReadHalf>), P2pError> {
        let target = with_default_port(address);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| P2pError::Connection(format!("timed out connecting to {}", target)))?
            .map_err(|e| P2pError::Connection(format!("{}: {}", target, e)))?;
        self.handshake(stream).await
    }

    /// Exchanges `<base64 key> <listen port>` with the peer.
    ///
    /// Both sides write first and then read, so it works the same for
    /// accepted and dialed streams.
    pub async fn handshake(&self, stream: TcpStream) -> Result<(PeerConnection, MessageReader<OwnedReadHalf>), P2pError> {
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read_half, mut write_half) = stream.into_split();

        let hello = format!("{} {}", self.identity.to_base64(), self.listen_port);
        write_message(&mut write_half, &hello)
            .await
            .map_err(|e| P2pError::Handshake(format!("send: {}", e)))?;

        let mut reader = MessageReader::new(read_half);
        let reply = tokio::time::timeout(self.connect_timeout, reader.read_message())
            .await
            .map_err(|_| P2pError::Handshake("peer did not identify itself in time".into()))?
            .map_err(|e| P2pError::Handshake(format!("read: {}", e)))?;

        let (identity, listen_port) = parse_hello(&reply)?;

        let connection = PeerConnection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr,
            local_addr,
            identity,
            listen_port,
            writer: Arc::new(Mutex::new(write_half)),
            closed: CancellationToken::new(),
        };
        debug!(conn = connection.id, peer = %remote_addr, advertised = %connection.advertised_addr(), "handshake complete");
        Ok((connection, reader))
    }
}

fn parse_hello(text: &str) -> Result<(PublicKey, u16), P2pError> {
    let mut tokens = text.split_whitespace();
    let key = tokens
        .next()
        .ok_or_else(|| P2pError::Handshake("empty identity message".into()))?;
    let identity = PublicKey::from_base64(key).map_err(|e| P2pError::Handshake(e.to_string()))?;
    let port = tokens
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .filter(|p| *p != 0)
        .ok_or_else(|| P2pError::Handshake("missing or invalid listen port".into()))?;
    Ok((identity, port))
}
