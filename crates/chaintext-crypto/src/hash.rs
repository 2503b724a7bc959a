//! SHA-256 hashing and deterministic block hash computation.
//!
//! Block hashes use the ChainText formula
//! `SHA256(encrypted + timestamp + previousHash)` where every part is
//! the string form carried on the wire: lowercase-hex payload,
//! canonical ISO 8601 timestamp, lowercase-hex previous hash (empty for
//! genesis).

use chaintext_types::{BlockHash, RoomId, Timestamp};
use sha2::{Digest, Sha256};

/// Domain separator for per-room payload keys.
const ROOM_KEY_DOMAIN: &[u8] = b"chaintext-room-key";

/// Computes the SHA-256 hash of arbitrary data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Computes the hash a block with these contents must carry.
///
/// Formula: `SHA-256(hex(payload) || iso(timestamp) || hex(previous))`
/// over UTF-8 bytes. Pure and deterministic.
pub fn compute_block_hash(
    encrypted_payload: &[u8],
    timestamp: &Timestamp,
    previous_hash: Option<&BlockHash>,
) -> BlockHash {
    let mut hasher = Sha256::new();
    hasher.update(hex::encode(encrypted_payload).as_bytes());
    hasher.update(timestamp.to_iso().as_bytes());
    if let Some(prev) = previous_hash {
        hasher.update(prev.to_hex().as_bytes());
    }

    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    BlockHash::new(out)
}

/// Derives the symmetric payload key shared by every member of a room.
///
/// `key = SHA-256("chaintext-room-key" || room)`. Anyone who knows the
/// room name can read its messages; confidentiality beyond that is the
/// encryption provider's business.
pub fn derive_room_key(room: &RoomId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(ROOM_KEY_DOMAIN);
    hasher.update(room.as_str().as_bytes());
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
