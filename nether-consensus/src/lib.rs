//! Proof-of-work leader election for Nether peers.
//!
//! [`ElectionCoordinator`] is the [`nether_p2p::MessageHandler`] behind every
//! connection: it runs election rounds, answers role queries and ships the
//! ledger between peers.

pub mod coordinator;
pub mod error;
pub mod ledger_sync;
pub mod pow;
pub mod state;

pub use coordinator::{ConnectionInfo, ConnectionSummary, ElectionCoordinator, ElectionOptions, ElectionStatus};
pub use error::{ElectionError, ProtocolError};
pub use ledger_sync::SharedLedger;
pub use pow::{leading_zero_bits, render_nonce, validate_proof, ProofOfWorkEngine};
pub use state::{ElectionState, Phase};
