use nether_common::{Hash, HASH_SIZE};

use crate::error::{LedgerError, Result};

pub const HEADER_SIZE: usize = 8 + 8 + 8 + 8 + HASH_SIZE;

/// Rewritable prefix of a ledger file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerHeader {
    /// Blocks in the file, genesis included.
    pub total_count: u64,
    /// Blocks authored by the key that signed genesis.
    pub local_count: u64,
    pub last_block_index: u64,
    /// Byte offset of the most recently appended block.
    pub last_block_offset: u64,
    pub genesis_hash: Hash,
}

impl LedgerHeader {
    /// Header of a file that holds only its genesis block.
    pub fn for_genesis(genesis_hash: Hash) -> Self {
        Self {
            total_count: 1,
            local_count: 1,
            last_block_index: 0,
            last_block_offset: HEADER_SIZE as u64,
            genesis_hash,
        }
    }

    /// The header once block `index` sits at `offset`. `local` marks a block
    /// signed by the genesis key.
    pub fn after_append(&self, index: u64, offset: u64, local: bool) -> Self {
        Self {
            total_count: self.total_count + 1,
            local_count: self.local_count + u64::from(local),
            last_block_index: index,
            last_block_offset: offset,
            genesis_hash: self.genesis_hash,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..8].copy_from_slice(&self.total_count.to_le_bytes());
        out[8..16].copy_from_slice(&self.local_count.to_le_bytes());
        out[16..24].copy_from_slice(&self.last_block_index.to_le_bytes());
        out[24..32].copy_from_slice(&self.last_block_offset.to_le_bytes());
        out[32..].copy_from_slice(&self.genesis_hash);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(LedgerError::Corrupt(format!(
                "header needs {} bytes, found {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        let word = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };
        let mut genesis_hash = [0u8; HASH_SIZE];
        genesis_hash.copy_from_slice(&bytes[32..HEADER_SIZE]);

        let header = Self {
            total_count: word(0),
            local_count: word(8),
            last_block_index: word(16),
            last_block_offset: word(24),
            genesis_hash,
        };
        if header.total_count == 0 || header.last_block_offset < HEADER_SIZE as u64 {
            return Err(LedgerError::Corrupt("header describes an empty ledger".into()));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_64_bytes() {
        assert_eq!(HEADER_SIZE, 64);
        let header = LedgerHeader::for_genesis([9u8; HASH_SIZE]);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..8], &1u64.to_le_bytes());
        assert_eq!(&bytes[24..32], &64u64.to_le_bytes());
        assert_eq!(LedgerHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_after_append() {
        let genesis = LedgerHeader::for_genesis([1u8; HASH_SIZE]);
        let next = genesis.after_append(1, 400, false);
        assert_eq!((next.total_count, next.local_count), (2, 1));
        assert_eq!((next.last_block_index, next.last_block_offset), (1, 400));
        assert_eq!(next.genesis_hash, genesis.genesis_hash);
        assert_eq!(next.after_append(2, 700, true).local_count, 2);
    }

    #[test]
    fn test_short_header_is_corrupt() {
        assert!(matches!(LedgerHeader::from_bytes(&[0u8; 10]), Err(LedgerError::Corrupt(_))));
    }

    #[test]
    fn test_zeroed_header_is_corrupt() {
        assert!(matches!(LedgerHeader::from_bytes(&[0u8; HEADER_SIZE]), Err(LedgerError::Corrupt(_))));
    }
}
