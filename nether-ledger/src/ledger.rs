use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nether_common::Keypair;
use tracing::{debug, info};

use crate::block::Block;
use crate::dataset::DataSet;
use crate::error::{LedgerError, Result};
use crate::header::{LedgerHeader, HEADER_SIZE};

/// File-backed append-only chain of signed blocks.
///
/// The header is rewritten in place after every append; the write is not
/// transactional, a crash between the block write and the header write leaves
/// a trailing block the header does not account for.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    file: File,
    header: LedgerHeader,
    genesis: Block,
    last: Block,
}

impl Ledger {
    /// Creates (or truncates) a ledger holding a freshly signed genesis block.
    pub fn create(path: impl AsRef<Path>, keypair: &Keypair) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let genesis = Block::genesis(keypair)?;
        let header = LedgerHeader::for_genesis(genesis.hash);

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(&genesis.serialize())?;
        file.sync_all()?;

        info!("📒 Created ledger at {:?} (genesis {})", path, hex::encode(&genesis.hash[..8]));

        Ok(Self {
            path,
            file,
            header,
            last: genesis.clone(),
            genesis,
        })
    }

    /// Opens an existing ledger, reading its header, genesis and last block.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut raw_header = Vec::with_capacity(HEADER_SIZE);
        (&mut file).take(HEADER_SIZE as u64).read_to_end(&mut raw_header)?;
        let header = LedgerHeader::from_bytes(&raw_header)?;

        let genesis = Self::read_block_at(&mut file, HEADER_SIZE as u64)?;
        if genesis.hash != header.genesis_hash {
            return Err(LedgerError::Corrupt("genesis hash does not match header".into()));
        }

        let last = if header.last_block_offset == HEADER_SIZE as u64 {
            genesis.clone()
        } else {
            Self::read_block_at(&mut file, header.last_block_offset)?
        };
        if last.index != header.last_block_index {
            return Err(LedgerError::Corrupt(format!(
                "header points at block {} but found block {}",
                header.last_block_index, last.index
            )));
        }

        debug!("Opened ledger {:?} with {} blocks", path, header.total_count);
        Ok(Self { path, file, header, genesis, last })
    }

    /// Opens the ledger at `path`, creating it when the file is missing.
    pub fn open_or_create(path: impl AsRef<Path>, keypair: &Keypair) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path, keypair)
        }
    }

    fn read_block_at(file: &mut File, offset: u64) -> Result<Block> {
        file.seek(SeekFrom::Start(offset))?;
        Block::read_from(file)?.ok_or_else(|| LedgerError::Corrupt(format!("no block at offset {}", offset)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &LedgerHeader {
        &self.header
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    pub fn last_block(&self) -> &Block {
        &self.last
    }

    /// Signs a block carrying `data` on top of the current tip and persists it.
    pub fn append_block(&mut self, data: DataSet, keypair: &Keypair) -> Result<Block> {
        let block = Block::next(&self.last, data, keypair)?;

        let offset = self.file.seek(SeekFrom::End(0))?;
        let header = self
            .header
            .after_append(block.index, offset, block.public_key == self.genesis.public_key);

        self.file.write_all(&block.serialize())?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.file.sync_data()?;

        // Only a fully written block moves the tip.
        debug!("Appended block {} at offset {}", block.index, offset);
        self.header = header;
        self.last = block.clone();
        Ok(block)
    }

    /// Forward-only traversal from genesis up to the header's last block.
    pub fn iter(&self) -> Result<BlockIter<BufReader<File>>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        Ok(BlockIter::new(BufReader::new(file), self.header.last_block_index))
    }

    pub fn read_all(&self) -> Result<Vec<Block>> {
        self.iter()?.collect()
    }

    /// Walks the whole file checking links, indices, hashes and signatures.
    /// Returns the number of blocks verified.
    pub fn verify_chain(&self) -> Result<u64> {
        verify_blocks(&self.header, self.iter()?)
    }

    /// The raw file contents, as shipped in `BLOCKCHAIN_DATA`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Verifies a ledger image received from a peer and atomically replaces
    /// the file at `path` with it.
    pub fn import(path: impl AsRef<Path>, bytes: &[u8]) -> Result<Self> {
        let path = path.as_ref();
        let header = LedgerHeader::from_bytes(bytes)?;
        let blocks = BlockIter::new(Cursor::new(&bytes[HEADER_SIZE..]), header.last_block_index);
        let count = verify_blocks(&header, blocks)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;

        info!("📥 Imported ledger with {} blocks into {:?}", count, path);
        Self::open(path)
    }
}

/// Sequential block reader that stops after the block with `last_index`.
pub struct BlockIter<R> {
    reader: R,
    last_index: u64,
    done: bool,
}

impl<R: Read> BlockIter<R> {
    pub fn new(reader: R, last_index: u64) -> Self {
        Self { reader, last_index, done: false }
    }
}

impl<R: Read> Iterator for BlockIter<R> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match Block::read_from(&mut self.reader) {
            Ok(Some(block)) => {
                if block.index >= self.last_index {
                    self.done = true;
                }
                Some(Ok(block))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn verify_blocks<I>(header: &LedgerHeader, blocks: I) -> Result<u64>
where
    I: Iterator<Item = Result<Block>>,
{
    let mut previous: Option<Block> = None;
    let mut offset = HEADER_SIZE as u64;
    let mut last_offset = offset;
    let mut count = 0u64;

    for block in blocks {
        let block = block?;
        block.verify()?;

        match &previous {
            None => {
                if block.index != 0 || block.hash != header.genesis_hash {
                    return Err(LedgerError::ChainBroken { index: block.index });
                }
            }
            Some(prev) => {
                if block.index != prev.index + 1 || block.prev_hash != prev.hash {
                    return Err(LedgerError::ChainBroken { index: block.index });
                }
            }
        }

        last_offset = offset;
        offset += block.serialized_size() as u64;
        count += 1;
        previous = Some(block);
    }

    let last = previous.ok_or_else(|| LedgerError::Corrupt("ledger holds no blocks".into()))?;
    if last.index != header.last_block_index {
        return Err(LedgerError::Corrupt(format!(
            "chain ends at block {} but header says {}",
            last.index, header.last_block_index
        )));
    }
    if count != header.total_count {
        return Err(LedgerError::Corrupt(format!(
            "found {} blocks but header counts {}",
            count, header.total_count
        )));
    }
    if last_offset != header.last_block_offset {
        return Err(LedgerError::Corrupt("header offset does not point at the last block".into()));
    }
    Ok(count)
}
