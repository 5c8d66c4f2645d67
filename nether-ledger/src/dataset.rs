use nether_common::PUBLIC_KEY_SIZE;

use crate::error::{LedgerError, Result};

/// Serialized size of one [`StorageLocation`]: 64-byte key plus u64 pointer.
pub const STORAGE_LOCATION_SIZE: usize = PUBLIC_KEY_SIZE + 8;

/// Where a record's payload lives, keyed by the public key of its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageLocation {
    pub key: [u8; PUBLIC_KEY_SIZE],
    pub pointer: u64,
}

impl StorageLocation {
    pub fn new(key: [u8; PUBLIC_KEY_SIZE], pointer: u64) -> Self {
        Self { key, pointer }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.pointer.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> Self {
        let mut key = [0u8; PUBLIC_KEY_SIZE];
        key.copy_from_slice(&bytes[..PUBLIC_KEY_SIZE]);
        let mut pointer = [0u8; 8];
        pointer.copy_from_slice(&bytes[PUBLIC_KEY_SIZE..STORAGE_LOCATION_SIZE]);
        Self { key, pointer: u64::from_le_bytes(pointer) }
    }
}

/// The payload of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSet {
    pub locations: Vec<StorageLocation>,
}

impl DataSet {
    pub fn new(locations: Vec<StorageLocation>) -> Self {
        Self { locations }
    }

    pub fn push(&mut self, location: StorageLocation) {
        self.locations.push(location);
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StorageLocation> {
        self.locations.iter()
    }

    /// Bytes taken by the records alone, without the count prefix.
    pub fn records_size(&self) -> usize {
        self.locations.len() * STORAGE_LOCATION_SIZE
    }

    /// Records concatenated without the count prefix, as fed to the block hash.
    pub fn records_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.records_size());
        for location in &self.locations {
            location.write_to(&mut out);
        }
        out
    }

    /// Writes the u32 count followed by every record.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.locations.len() as u32).to_le_bytes());
        for location in &self.locations {
            location.write_to(out);
        }
    }

    /// Decodes a count-prefixed record sequence that must span `bytes` exactly.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(LedgerError::Corrupt("dataset shorter than its count prefix".into()));
        }
        let mut count = [0u8; 4];
        count.copy_from_slice(&bytes[..4]);
        let count = u32::from_le_bytes(count) as usize;

        let body = &bytes[4..];
        if body.len() != count * STORAGE_LOCATION_SIZE {
            return Err(LedgerError::Corrupt(format!(
                "dataset declares {} records but carries {} bytes",
                count,
                body.len()
            )));
        }

        let locations = body
            .chunks_exact(STORAGE_LOCATION_SIZE)
            .map(StorageLocation::read_from)
            .collect();
        Ok(Self { locations })
    }
}

impl FromIterator<StorageLocation> for DataSet {
    fn from_iter<T: IntoIterator<Item = StorageLocation>>(iter: T) -> Self {
        Self { locations: iter.into_iter().collect() }
    }
}
