use std::fmt;
use std::io::Read;

use chrono::{DateTime, Utc};
use nether_common::crypto::hash::sha256_concat;
use nether_common::utils::random::random_bytes;
use nether_common::utils::time::current_time;
use nether_common::{Hash, Keypair, PublicKey, SignatureBytes, HASH_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

use crate::dataset::{DataSet, STORAGE_LOCATION_SIZE};
use crate::error::{LedgerError, Result};

/// Serialized size of a block with an empty dataset:
/// size(8) + index(8) + timestamp(8) + prev_hash(32) + hash(32) + signature(64) + public_key(64) + count(4).
pub const BLOCK_FIXED_SIZE: usize = 8 + 8 + 8 + HASH_SIZE + HASH_SIZE + SIGNATURE_SIZE + PUBLIC_KEY_SIZE + 4;

/// Largest size prefix a block can carry: the record count is a u32.
pub const MAX_BLOCK_SIZE: u64 = BLOCK_FIXED_SIZE as u64 + u32::MAX as u64 * STORAGE_LOCATION_SIZE as u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub prev_hash: Hash,
    pub hash: Hash,
    pub signature: SignatureBytes,
    pub public_key: PublicKey,
    pub data: DataSet,
}

impl Block {
    /// First block of a fresh ledger. Its `prev_hash` is random so two
    /// independently created ledgers never share a genesis hash.
    pub fn genesis(keypair: &Keypair) -> Result<Self> {
        Self::signed(0, random_bytes::<HASH_SIZE>(), DataSet::default(), keypair)
    }

    /// Builds the successor of `previous` carrying `data`.
    pub fn next(previous: &Block, data: DataSet, keypair: &Keypair) -> Result<Self> {
        Self::signed(previous.index + 1, previous.hash, data, keypair)
    }

    fn signed(index: u64, prev_hash: Hash, data: DataSet, keypair: &Keypair) -> Result<Self> {
        let mut block = Self {
            index,
            timestamp: current_time(),
            prev_hash,
            hash: [0u8; HASH_SIZE],
            signature: [0u8; SIGNATURE_SIZE],
            public_key: keypair.public_key(),
            data,
        };
        block.hash = block.compute_hash();
        block.signature = keypair.sign_digest(&block.hash)?;
        Ok(block)
    }

    /// SHA-256 over `index ∥ timestamp ∥ prev_hash ∥ records`, integers little-endian.
    pub fn compute_hash(&self) -> Hash {
        let records = self.data.records_bytes();
        sha256_concat(&[
            &self.index.to_le_bytes()[..],
            &self.timestamp.to_le_bytes()[..],
            &self.prev_hash[..],
            &records[..],
        ])
    }

    /// Checks the stored hash against the contents and the signature against the hash.
    pub fn verify(&self) -> Result<()> {
        if self.compute_hash() != self.hash {
            return Err(LedgerError::Corrupt(format!("hash mismatch on block {}", self.index)));
        }
        if !self.public_key.verify_digest(&self.hash, &self.signature) {
            return Err(LedgerError::InvalidSignature { index: self.index });
        }
        Ok(())
    }

    pub fn serialized_size(&self) -> usize {
        BLOCK_FIXED_SIZE + self.data.records_size()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let size = self.serialized_size();
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&(size as u64).to_le_bytes());
        out.extend_from_slice(&self.index.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.prev_hash);
        out.extend_from_slice(&self.hash);
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(self.public_key.as_bytes());
        self.data.encode_into(&mut out);
        out
    }

    /// Parses one block whose size prefix must equal `bytes.len()`.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_FIXED_SIZE {
            return Err(LedgerError::Corrupt(format!(
                "block truncated: {} of at least {} bytes",
                bytes.len(),
                BLOCK_FIXED_SIZE
            )));
        }

        let mut cursor = Cursor { bytes, pos: 0 };
        let declared = cursor.u64() as usize;
        if declared != bytes.len() {
            return Err(LedgerError::Corrupt(format!(
                "block size prefix says {} but {} bytes were given",
                declared,
                bytes.len()
            )));
        }

        let index = cursor.u64();
        let timestamp = cursor.u64();
        let prev_hash = cursor.array::<HASH_SIZE>();
        let hash = cursor.array::<HASH_SIZE>();
        let signature = cursor.array::<SIGNATURE_SIZE>();
        let public_key = PublicKey(cursor.array::<PUBLIC_KEY_SIZE>());
        let data = DataSet::decode(cursor.rest())?;

        Ok(Self { index, timestamp, prev_hash, hash, signature, public_key, data })
    }

    /// Reads the next size-prefixed block from a stream.
    ///
    /// Returns `Ok(None)` on a clean end of stream before the size prefix.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut prefix = [0u8; 8];
        match reader.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let size = u64::from_le_bytes(prefix);
        if size < BLOCK_FIXED_SIZE as u64 || size > MAX_BLOCK_SIZE {
            return Err(LedgerError::Corrupt(format!("block size prefix {} out of range", size)));
        }

        // The buffer grows with the bytes actually present, never with the prefix.
        let mut buffer = Vec::with_capacity(BLOCK_FIXED_SIZE);
        buffer.extend_from_slice(&prefix);
        (&mut *reader).take(size - 8).read_to_end(&mut buffer)?;
        if buffer.len() as u64 != size {
            return Err(LedgerError::Corrupt(format!(
                "block truncated: {} of {} bytes",
                buffer.len(),
                size
            )));
        }

        Self::deserialize(&buffer).map(Some)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when = DateTime::<Utc>::from_timestamp(self.timestamp as i64, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| self.timestamp.to_string());

        writeln!(f, "Block #{}", self.index)?;
        writeln!(f, "  Timestamp: {}", when)?;
        writeln!(f, "  Prev hash: {}", hex::encode(self.prev_hash))?;
        writeln!(f, "  Hash:      {}", hex::encode(self.hash))?;
        writeln!(f, "  Author:    {}", self.public_key)?;
        write!(f, "  Records:   {}", self.data.len())?;
        for location in self.data.iter() {
            write!(f, "\n    {}… @ {}", &hex::encode(location.key)[..16], location.pointer)?;
        }
        Ok(())
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.array::<8>())
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}
