use async_trait::async_trait;

use crate::command::Command;
use crate::connection::PeerConnection;

/// Receives every parsed inbound command together with the connection it came from.
///
/// Implementations must not block the caller for long: the chat loop of `conn`
/// does not read its next frame until `handle` returns.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, conn: &PeerConnection, command: Command);

    /// Called after the chat loop of a connection ended and it was deregistered.
    async fn on_disconnect(&self, _conn: &PeerConnection) {}
}
