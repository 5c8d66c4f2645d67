use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::MessageReader;
use crate::command::Command;
use crate::connection::{PeerConnection, Transport};
use crate::error::P2pError;
use crate::ports::MessageHandler;
use crate::registry::{MembershipRegistry, Role};

/// Transport plus registry: accepts, dials and drives chat loops.
#[derive(Clone)]
pub struct PeerNetwork {
    transport: Transport,
    registry: Arc<MembershipRegistry>,
    shutdown: CancellationToken,
}

impl PeerNetwork {
    pub fn new(transport: Transport, shutdown: CancellationToken) -> Self {
        Self {
            transport,
            registry: Arc::new(MembershipRegistry::new()),
            shutdown,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn registry(&self) -> &Arc<MembershipRegistry> {
        &self.registry
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Accepts connections until shutdown. Each accepted stream is handshaken,
    /// registered as [`Role::Client`] and served by its own chat loop.
    pub fn spawn_listener(&self, listener: TcpListener, handler: Arc<dyn MessageHandler>) -> JoinHandle<()> {
        let network = self.clone();
        tokio::spawn(async move {
            if let Ok(addr) = listener.local_addr() {
                info!("👂 Listening on {}", addr);
            }
            loop {
                let accepted = tokio::select! {
                    _ = network.shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };

                match accepted {
                    Ok((stream, addr)) => {
                        let network = network.clone();
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            match network.transport.handshake(stream).await {
                                Ok((conn, reader)) => {
                                    info!(conn = conn.id(), peer = %addr, "🤝 Peer connected");
                                    network.registry.add(Role::Client, conn.clone()).await;
                                    network.chat_loop(conn, reader, handler).await;
                                }
                                Err(e) => warn!(peer = %addr, "handshake rejected: {}", e),
                            }
                        });
                    }
                    Err(e) => {
                        error!("accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
            info!("Listener stopped");
        })
    }

    /// Dials `address` and returns the handshaken connection without
    /// registering it or starting its chat loop.
    pub async fn connect(&self, address: &str) -> Result<(PeerConnection, MessageReader<OwnedReadHalf>), P2pError> {
        self.transport.connect(address).await
    }

    /// Dials `address`, registers the connection under `role` and starts its chat loop.
    pub async fn dial(
        &self,
        address: &str,
        role: Role,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<PeerConnection, P2pError> {
        let (conn, reader) = self.connect(address).await?;
        self.register(role, conn.clone(), reader, handler).await;
        Ok(conn)
    }

    /// Registers an already handshaken connection and starts its chat loop.
    pub async fn register(
        &self,
        role: Role,
        conn: PeerConnection,
        reader: MessageReader<OwnedReadHalf>,
        handler: Arc<dyn MessageHandler>,
    ) -> JoinHandle<()> {
        self.registry.add(role, conn.clone()).await;
        debug!(conn = conn.id(), peer = %conn.remote_addr(), %role, "registered");
        let network = self.clone();
        tokio::spawn(async move { network.chat_loop(conn, reader, handler).await })
    }

    /// Reads messages from `conn` until it closes, dispatching each parsed
    /// command to `handler`, then deregisters it.
    async fn chat_loop(
        &self,
        conn: PeerConnection,
        mut reader: MessageReader<OwnedReadHalf>,
        handler: Arc<dyn MessageHandler>,
    ) {
        loop {
            let text = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = conn.closed() => break,
                read = reader.read_message() => match read {
                    Ok(text) => text,
                    Err(P2pError::Closed) => {
                        debug!(conn = conn.id(), "peer hung up");
                        break;
                    }
                    Err(e) => {
                        warn!(conn = conn.id(), peer = %conn.remote_addr(), "read failed: {}", e);
                        break;
                    }
                },
            };

            match Command::parse(&text) {
                Ok(None) => {}
                Ok(Some(Command::Unknown(verb))) => {
                    debug!(conn = conn.id(), "unknown command {:?}", verb);
                    if let Err(e) = conn.send(&Command::UnknownCommand.to_string()).await {
                        warn!(conn = conn.id(), "reply failed: {}", e);
                        break;
                    }
                }
                Ok(Some(command)) => handler.handle(&conn, command).await,
                Err(e) => warn!(conn = conn.id(), "dropping message: {}", e),
            }
        }

        if let Some((role, _)) = self.registry.remove(conn.id()).await {
            info!(conn = conn.id(), peer = %conn.remote_addr(), %role, "🔌 Peer disconnected");
        }
        conn.close().await;
        handler.on_disconnect(&conn).await;
    }
}
