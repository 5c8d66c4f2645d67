use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid public key encoding: {0}")]
    InvalidEncoding(String),

    /// Signing with a well-formed key must never fail. Callers treat this as fatal.
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("key file error: {0}")]
    KeyFile(#[from] std::io::Error),
}
