use sha2::{Digest, Sha256};

pub const HASH_SIZE: usize = 32;

pub type Hash = [u8; HASH_SIZE];

/// Computes the SHA-256 digest of the given data.
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes the SHA-256 digest of several slices as if they were concatenated.
pub fn sha256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
