//! TCP transport for Nether peers.
//!
//! Messages are plain text, fragmented into fixed 1024-byte frames. Every
//! connection starts with an identity handshake and is then owned by a chat
//! loop that turns inbound text into [`Command`]s for a [`MessageHandler`].

pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod ports;
pub mod registry;
pub mod server;

pub use codec::{MessageReader, FRAME_SIZE, HEADER_CAPACITY, PAYLOAD_CAPACITY};
pub use command::Command;
pub use config::{TransportConfig, DEFAULT_PORT};
pub use connection::{ConnectionId, PeerConnection, Transport};
pub use error::{FrameError, P2pError, ProtocolError};
pub use ports::MessageHandler;
pub use registry::{MembershipRegistry, Role, RoleCounts, Scope};
pub use server::PeerNetwork;
