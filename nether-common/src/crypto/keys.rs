//! ECDSA P-256 identity keys.
//!
//! Public keys travel as the raw 64-byte `X ∥ Y` affine coordinates (no SEC1
//! prefix byte) and signatures as the 64-byte `r ∥ s` pair, which is the layout
//! stored in ledger blocks and exchanged during the peer handshake.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::crypto::hash::Hash;
use crate::error::CryptoError;

pub const SECRET_KEY_SIZE: usize = 32;
pub const PUBLIC_KEY_SIZE: usize = 64;
pub const SIGNATURE_SIZE: usize = 64;

pub type SignatureBytes = [u8; SIGNATURE_SIZE];

/// Raw uncompressed P-256 point without the `0x04` tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey(format!("expected {} bytes, got {}", PUBLIC_KEY_SIZE, bytes.len()))
        })?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Decodes the base64 form sent during the handshake.
    ///
    /// Only the length is checked here; the point itself is validated lazily
    /// when a signature is verified against it.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        let mut sec1 = [0u8; PUBLIC_KEY_SIZE + 1];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(&self.0);
        VerifyingKey::from_sec1_bytes(&sec1).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Verifies an `r ∥ s` signature over a 32-byte digest.
    pub fn verify_digest(&self, digest: &Hash, signature: &SignatureBytes) -> bool {
        let Ok(key) = self.verifying_key() else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify_prehash(digest, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_base64()[..12])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// The node's signing identity.
#[derive(Clone)]
pub struct Keypair {
    secret: SigningKey,
    public: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(CryptoError::InvalidSecretKey(format!(
                "expected {} bytes, got {}",
                SECRET_KEY_SIZE,
                bytes.len()
            )));
        }
        let secret = SigningKey::from_slice(bytes).map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;
        Ok(Self::from_signing_key(secret))
    }

    fn from_signing_key(secret: SigningKey) -> Self {
        let point = secret.verifying_key().to_encoded_point(false);
        let mut raw = [0u8; PUBLIC_KEY_SIZE];
        // Uncompressed SEC1 is 0x04 ∥ X ∥ Y.
        raw.copy_from_slice(&point.as_bytes()[1..]);
        Self { secret, public: PublicKey(raw) }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        let mut out = [0u8; SECRET_KEY_SIZE];
        out.copy_from_slice(&self.secret.to_bytes());
        out
    }

    /// Signs a 32-byte digest and returns the raw `r ∥ s` pair.
    pub fn sign_digest(&self, digest: &Hash) -> Result<SignatureBytes, CryptoError> {
        let signature: Signature = self
            .secret
            .sign_prehash(digest)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(&signature.to_bytes());
        Ok(out)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair").field("public", &self.public).finish_non_exhaustive()
    }
}
