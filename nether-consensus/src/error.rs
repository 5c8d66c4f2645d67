use nether_ledger::LedgerError;
use nether_p2p::P2pError;
use thiserror::Error;

pub use nether_p2p::ProtocolError;

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("only a leader can start an election")]
    NotLeader,

    #[error("no leader reachable through {0}")]
    NoLeader(String),

    #[error("transport error: {0}")]
    Transport(#[from] P2pError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
