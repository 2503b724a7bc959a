//! Local message authoring.
//!
//! Turns plaintext into a block on the local chain:
//!
//! 1. Seal the plaintext with the room key.
//! 2. Hash `sealed ‖ timestamp ‖ tail hash` and sign the hash.
//! 3. Append to the chain (which re-checks every invariant).
//!
//! The caller broadcasts the returned block. Any failure along the way
//! surfaces as a single retryable [`ChaintextError::AuthoringFailure`].

use chaintext_crypto::aead::{PayloadCipher, PayloadKey};
use chaintext_crypto::signing::BlockSigner;
use chaintext_storage::block::Block;
use chaintext_storage::chain::ChainStore;
use chaintext_types::{ChaintextError, Result, Timestamp};

/// Seals, signs, and appends a new block carrying `plaintext`.
///
/// # Errors
///
/// Returns [`ChaintextError::AuthoringFailure`] if sealing, signing,
/// or the append fails. The chain is unchanged in that case.
pub fn author_block(
    chain: &mut ChainStore,
    signer: &dyn BlockSigner,
    cipher: &dyn PayloadCipher,
    key: &PayloadKey,
    plaintext: &[u8],
    now: Timestamp,
) -> Result<Block> {
    let sealed = cipher.seal(plaintext, key).map_err(|e| ChaintextError::AuthoringFailure {
        reason: format!("failed to seal payload: {e}"),
    })?;

    let previous = chain.tail().map(|b| b.hash);
    let block = Block::create(signer, sealed, now, previous).map_err(|e| {
        ChaintextError::AuthoringFailure {
            reason: format!("failed to sign block: {e}"),
        }
    })?;

    chain
        .append(block.clone())
        .map_err(|e| ChaintextError::AuthoringFailure {
            reason: format!("failed to append block: {e}"),
        })?;

    tracing::info!(
        room = %chain.room(),
        hash = %block.hash,
        length = chain.len(),
        "message authored"
    );
    Ok(block)
}

/// Opens a block's payload with the room key.
///
/// # Errors
///
/// Returns [`ChaintextError::CryptoError`] if the payload was sealed
/// under another key or has been tampered with.
pub fn read_payload(
    cipher: &dyn PayloadCipher,
    key: &PayloadKey,
    block: &Block,
) -> Result<Vec<u8>> {
    cipher.open(&block.encrypted_payload, key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
