//! Boundary to the local identity provider.
//!
//! The credential file itself (and any password-derived encryption of it) lives
//! outside the node; the node only asks for the current keypair.

pub mod key_file;

use crate::crypto::keys::Keypair;

pub trait KeyProvider: Send + Sync {
    fn current_keypair(&self) -> Keypair;
}

/// Holds an already loaded keypair in memory.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    keypair: Keypair,
}

impl StaticKeyProvider {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn current_keypair(&self) -> Keypair {
        self.keypair.clone()
    }
}

pub use key_file::load_or_generate_keypair;
