//! Append-only binary ledger.
//!
//! A ledger file is a fixed 64-byte [`LedgerHeader`] followed by the genesis
//! block and every appended block, each prefixed by its own serialized length.

pub mod block;
pub mod dataset;
pub mod error;
pub mod header;
pub mod ledger;

pub use block::{Block, BLOCK_FIXED_SIZE};
pub use dataset::{DataSet, StorageLocation, STORAGE_LOCATION_SIZE};
pub use error::{LedgerError, Result};
pub use header::{LedgerHeader, HEADER_SIZE};
pub use ledger::{BlockIter, Ledger};
