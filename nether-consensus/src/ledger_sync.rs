use std::io;
use std::path::{Path, PathBuf};

use nether_common::Keypair;
use nether_ledger::{Block, DataSet, Ledger, LedgerError, LedgerHeader};
use tokio::sync::Mutex;
use tracing::info;

/// The node's ledger file behind one async lock, so appends, imports and
/// transfers never overlap.
#[derive(Debug)]
pub struct SharedLedger {
    path: PathBuf,
    inner: Mutex<Option<Ledger>>,
}

impl SharedLedger {
    /// Opens the ledger at `path` if it exists; otherwise starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let ledger = if path.exists() { Some(Ledger::open(&path)?) } else { None };
        Ok(Self { path, inner: Mutex::new(ledger) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Replaces whatever is on disk with a fresh genesis-only ledger.
    pub async fn create(&self, keypair: &Keypair) -> Result<Block, LedgerError> {
        let mut slot = self.inner.lock().await;
        let ledger = Ledger::create(&self.path, keypair)?;
        let genesis = ledger.genesis().clone();
        *slot = Some(ledger);
        Ok(genesis)
    }

    pub async fn append(&self, data: DataSet, keypair: &Keypair) -> Result<Block, LedgerError> {
        let mut slot = self.inner.lock().await;
        let ledger = slot.as_mut().ok_or_else(|| missing(&self.path))?;
        ledger.append_block(data, keypair)
    }

    pub async fn header(&self) -> Option<LedgerHeader> {
        self.inner.lock().await.as_ref().map(|l| *l.header())
    }

    pub async fn blocks(&self) -> Result<Vec<Block>, LedgerError> {
        let slot = self.inner.lock().await;
        slot.as_ref().ok_or_else(|| missing(&self.path))?.read_all()
    }

    pub async fn verify(&self) -> Result<u64, LedgerError> {
        let slot = self.inner.lock().await;
        slot.as_ref().ok_or_else(|| missing(&self.path))?.verify_chain()
    }

    /// The whole file, or `None` when this node holds no ledger.
    pub async fn export(&self) -> Result<Option<Vec<u8>>, LedgerError> {
        let slot = self.inner.lock().await;
        slot.as_ref().map(Ledger::to_bytes).transpose()
    }

    /// Verifies `bytes` and swaps them in as the local ledger.
    pub async fn import(&self, bytes: &[u8]) -> Result<LedgerHeader, LedgerError> {
        let mut slot = self.inner.lock().await;
        // Release the old handle before the file is renamed over.
        slot.take();
        let ledger = match Ledger::import(&self.path, bytes) {
            Ok(ledger) => ledger,
            Err(e) => {
                if self.path.exists() {
                    *slot = Ledger::open(&self.path).ok();
                }
                return Err(e);
            }
        };
        let header = *ledger.header();
        info!("📚 Ledger replaced: {} blocks, tip #{}", header.total_count, header.last_block_index);
        *slot = Some(ledger);
        Ok(header)
    }
}

fn missing(path: &Path) -> LedgerError {
    LedgerError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no ledger at {}", path.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_ledger_exports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedLedger::open(dir.path().join("nether.chain")).unwrap();

        assert!(!shared.is_loaded().await);
        assert!(shared.export().await.unwrap().is_none());
        assert!(shared.append(DataSet::default(), &Keypair::generate()).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_import_keeps_current_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = Keypair::generate();
        let shared = SharedLedger::open(dir.path().join("nether.chain")).unwrap();
        shared.create(&keypair).await.unwrap();
        shared.append(DataSet::default(), &keypair).await.unwrap();

        assert!(shared.import(b"garbage").await.is_err());
        assert_eq!(shared.header().await.unwrap().total_count, 2);
    }

    #[tokio::test]
    async fn test_import_from_peer_export() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = Keypair::generate();

        let remote = SharedLedger::open(dir.path().join("remote.chain")).unwrap();
        remote.create(&keypair).await.unwrap();
        remote.append(DataSet::default(), &keypair).await.unwrap();
        let bytes = remote.export().await.unwrap().unwrap();

        let local = SharedLedger::open(dir.path().join("local.chain")).unwrap();
        let header = local.import(&bytes).await.unwrap();
        assert_eq!(header, remote.header().await.unwrap());
        assert_eq!(local.verify().await.unwrap(), 2);
    }
}
