use nether_common::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt ledger: {0}")]
    Corrupt(String),

    #[error("chain broken at block {index}")]
    ChainBroken { index: u64 },

    #[error("invalid signature on block {index}")]
    InvalidSignature { index: u64 },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
