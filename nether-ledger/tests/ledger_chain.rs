use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use nether_common::{Keypair, PUBLIC_KEY_SIZE};
use nether_ledger::{DataSet, Ledger, LedgerError, StorageLocation, HEADER_SIZE};

fn records(seed: u8, count: usize) -> DataSet {
    (0..count)
        .map(|i| StorageLocation::new([seed; PUBLIC_KEY_SIZE], (seed as u64) * 100 + i as u64))
        .collect()
}

#[test]
fn test_hash_chain_and_header_after_many_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nether.chain");
    let keypair = Keypair::generate();

    let mut ledger = Ledger::create(&path, &keypair).unwrap();
    for n in 1..=10u8 {
        ledger.append_block(records(n, n as usize % 4), &keypair).unwrap();
    }

    let header = *ledger.header();
    assert_eq!(header.total_count, 11);
    assert_eq!(header.local_count, 11);
    assert_eq!(header.last_block_index, 10);
    assert_eq!(header.genesis_hash, ledger.genesis().hash);

    let blocks = ledger.read_all().unwrap();
    assert_eq!(blocks.len(), 11);
    for pair in blocks.windows(2) {
        assert_eq!(pair[1].index, pair[0].index + 1);
        assert_eq!(pair[1].prev_hash, pair[0].hash);
        assert_eq!(pair[1].hash, pair[1].compute_hash());
    }

    // The header offset points at exactly the last block.
    let size: u64 = blocks[..10].iter().map(|b| b.serialized_size() as u64).sum();
    assert_eq!(header.last_block_offset, HEADER_SIZE as u64 + size);

    assert_eq!(ledger.verify_chain().unwrap(), 11);
}

#[test]
fn test_every_signature_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = Keypair::generate();
    let mut ledger = Ledger::create(dir.path().join("nether.chain"), &keypair).unwrap();
    for n in 0..5u8 {
        ledger.append_block(records(n, 2), &keypair).unwrap();
    }

    for block in ledger.iter().unwrap() {
        let block = block.unwrap();
        assert!(block.public_key.verify_digest(&block.hash, &block.signature));
    }
}

#[test]
fn test_corrupted_byte_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nether.chain");
    let keypair = Keypair::generate();

    let mut ledger = Ledger::create(&path, &keypair).unwrap();
    let first = ledger.append_block(records(1, 3), &keypair).unwrap();
    ledger.append_block(records(2, 1), &keypair).unwrap();

    // Overwrite the timestamp of block 1; it sits right after genesis.
    let genesis_size = ledger.genesis().serialized_size() as u64;
    let timestamp_at = HEADER_SIZE as u64 + genesis_size + 16;
    drop(ledger);
    {
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(timestamp_at)).unwrap();
        file.write_all(&(first.timestamp + 1).to_le_bytes()).unwrap();
    }

    let ledger = Ledger::open(&path).unwrap();
    match ledger.verify_chain() {
        Err(LedgerError::Corrupt(msg)) => assert!(msg.contains("block 1")),
        other => panic!("expected corruption, got {:?}", other),
    }
}

#[test]
fn test_import_replaces_existing_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let leader_key = Keypair::generate();
    let follower_key = Keypair::generate();

    let mut remote = Ledger::create(dir.path().join("remote.chain"), &leader_key).unwrap();
    remote.append_block(records(4, 2), &leader_key).unwrap();
    remote.append_block(records(5, 2), &leader_key).unwrap();
    let image = remote.to_bytes().unwrap();

    let local_path = dir.path().join("local.chain");
    Ledger::create(&local_path, &follower_key).unwrap();

    let imported = Ledger::import(&local_path, &image).unwrap();
    assert_eq!(imported.header(), remote.header());
    assert_eq!(imported.last_block(), remote.last_block());
    assert_eq!(imported.verify_chain().unwrap(), 3);

    // Appending on top of an imported chain keeps it valid.
    let mut imported = imported;
    imported.append_block(records(6, 1), &follower_key).unwrap();
    assert_eq!(imported.header().local_count, 3);
    assert_eq!(imported.verify_chain().unwrap(), 4);
}

#[test]
fn test_import_rejects_truncated_image() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = Keypair::generate();
    let mut ledger = Ledger::create(dir.path().join("a.chain"), &keypair).unwrap();
    ledger.append_block(records(1, 1), &keypair).unwrap();

    let image = ledger.to_bytes().unwrap();
    let target = dir.path().join("b.chain");
    let err = Ledger::import(&target, &image[..image.len() - 10]).unwrap_err();
    assert!(matches!(err, LedgerError::Corrupt(_)));
}

#[test]
fn test_import_rejects_huge_size_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = Keypair::generate();
    let ledger = Ledger::create(dir.path().join("a.chain"), &keypair).unwrap();

    let mut image = ledger.to_bytes().unwrap();
    image[HEADER_SIZE..HEADER_SIZE + 8].copy_from_slice(&(1u64 << 46).to_le_bytes());

    let target = dir.path().join("b.chain");
    let err = Ledger::import(&target, &image).unwrap_err();
    assert!(matches!(err, LedgerError::Corrupt(_)));
    assert!(!target.exists());
}

#[test]
fn test_flipped_hash_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nether.chain");
    let keypair = Keypair::generate();

    let mut ledger = Ledger::create(&path, &keypair).unwrap();
    let block = ledger.append_block(records(3, 2), &keypair).unwrap();
    ledger.append_block(records(4, 1), &keypair).unwrap();

    let mut tampered = block.clone();
    tampered.hash[0] ^= 0x01;
    assert!(tampered.verify().is_err());
    block.verify().unwrap();

    // Block 1 starts right after genesis; its hash sits 56 bytes in.
    let hash_at = HEADER_SIZE as u64 + ledger.genesis().serialized_size() as u64 + 56;
    drop(ledger);
    {
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(hash_at)).unwrap();
        file.write_all(&[block.hash[0] ^ 0x01]).unwrap();
    }

    let ledger = Ledger::open(&path).unwrap();
    assert!(ledger.verify_chain().is_err());
}
