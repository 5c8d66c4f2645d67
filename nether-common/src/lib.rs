//! Shared primitives for the Nether node: identity keys, hashing and small helpers.
//!
//! Everything in here is synchronous and free of networking so the ledger,
//! transport and election crates can all depend on it.

pub mod auth;
pub mod crypto;
pub mod error;
pub mod utils;

pub use crypto::hash::{sha256, Hash, HASH_SIZE};
pub use crypto::keys::{Keypair, PublicKey, SignatureBytes, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE};
pub use error::CryptoError;
