//! Integration tests for sled-backed chain persistence.
//!
//! Each test gets its own temporary sled directory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chaintext_crypto::signing::{Ed25519Signer, Ed25519Verifier};
use chaintext_storage::block::{validate_chain, Block};
use chaintext_storage::chain::ChainStore;
use chaintext_storage::kv::{KeyValueStore, SledStore};
use chaintext_types::{RoomId, Timestamp};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns a unique temporary directory for each test.
fn temp_dir() -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "chaintext-chain-test-{}-{}-{}",
        std::process::id(),
        id,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    ));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

fn build_chain(signer: &Ed25519Signer, n: usize) -> Result<Vec<Block>, Box<dyn std::error::Error>> {
    let mut blocks: Vec<Block> = Vec::new();
    for i in 0..n {
        let prev = blocks.last().map(|b| b.hash);
        let ts = Timestamp::from_millis(1_750_000_000_000 + (i as i64) * 1000)?;
        blocks.push(Block::create(signer, format!("sealed-{i}").into_bytes(), ts, prev)?);
    }
    Ok(blocks)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn chain_survives_restart() -> Result<(), Box<dyn std::error::Error>> {
    let dir = temp_dir();
    let signer = Ed25519Signer::generate();
    let blocks = build_chain(&signer, 5)?;

    {
        let store = Arc::new(SledStore::open(&dir)?);
        let mut chain =
            ChainStore::open(RoomId::default(), store.clone(), Arc::new(Ed25519Verifier))?;
        for block in &blocks {
            chain.append(block.clone())?;
        }
        store.flush()?;
    }

    let store = Arc::new(SledStore::open(&dir)?);
    let chain = ChainStore::open(RoomId::default(), store, Arc::new(Ed25519Verifier))?;
    assert_eq!(chain.snapshot(), blocks);
    validate_chain(chain.blocks())?;

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn merged_out_of_order_blocks_persist_in_acceptance_order(
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = temp_dir();
    let signer = Ed25519Signer::generate();
    let blocks = build_chain(&signer, 3)?;

    {
        let store = Arc::new(SledStore::open(&dir)?);
        let mut chain =
            ChainStore::open(RoomId::default(), store.clone(), Arc::new(Ed25519Verifier))?;
        let reversed: Vec<Block> = blocks.iter().rev().cloned().collect();
        assert_eq!(chain.merge_remote(reversed), 3);
        store.flush()?;
    }

    let store = Arc::new(SledStore::open(&dir)?);
    assert_eq!(store.keys("chain/lobby/")?.len(), 3);
    let chain = ChainStore::open(RoomId::default(), store, Arc::new(Ed25519Verifier))?;
    assert_eq!(chain.snapshot(), blocks);

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn tampered_row_is_skipped_on_reload() -> Result<(), Box<dyn std::error::Error>> {
    let dir = temp_dir();
    let signer = Ed25519Signer::generate();
    let blocks = build_chain(&signer, 2)?;

    {
        let store = Arc::new(SledStore::open(&dir)?);
        let mut chain =
            ChainStore::open(RoomId::default(), store.clone(), Arc::new(Ed25519Verifier))?;
        chain.append(blocks[0].clone())?;

        let mut forged = blocks[1].clone();
        forged.encrypted_payload = b"rewritten".to_vec();
        store.put("chain/lobby/0000000000000001", &serde_json::to_vec(&forged)?)?;
        store.flush()?;
    }

    let store = Arc::new(SledStore::open(&dir)?);
    let chain = ChainStore::open(RoomId::default(), store, Arc::new(Ed25519Verifier))?;
    assert_eq!(chain.len(), 1);
    assert_eq!(chain.orphan_count(), 0);

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
