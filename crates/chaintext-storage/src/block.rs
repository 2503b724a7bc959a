//! Block record, wire shape, and validation rules.
//!
//! A block is immutable once created. Its wire shape is camelCase JSON:
//!
//! ```text
//! { sender, encryptedPayload (hex), timestamp (ISO 8601),
//!   previousHash (hex, "" for genesis), hash (hex), signature (hex) }
//! ```

use chaintext_crypto::hash::compute_block_hash;
use chaintext_crypto::signing::{BlockSigner, SignatureVerifier};
use chaintext_types::{BlockHash, BlockSignature, ChaintextError, Identity, Result, Timestamp};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// One signed, hash-linked message record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Author identity as understood by the signing provider.
    pub sender: Identity,
    /// Sealed message body. The overlay never sees plaintext.
    #[serde(with = "hex_bytes")]
    pub encrypted_payload: Vec<u8>,
    /// Creation time, millisecond precision.
    pub timestamp: Timestamp,
    /// Hash of the predecessor, `None` for a genesis block.
    #[serde(with = "optional_hash")]
    pub previous_hash: Option<BlockHash>,
    /// Digest of payload, timestamp and previous hash.
    pub hash: BlockHash,
    /// Signature by `sender` over `hash`.
    pub signature: BlockSignature,
}

impl Block {
    /// Creates and signs a new block linked to `previous_hash`.
    ///
    /// # Errors
    ///
    /// Propagates the signer's error if it cannot produce a signature.
    pub fn create(
        signer: &dyn BlockSigner,
        encrypted_payload: Vec<u8>,
        timestamp: Timestamp,
        previous_hash: Option<BlockHash>,
    ) -> Result<Self> {
        let hash = compute_block_hash(&encrypted_payload, &timestamp, previous_hash.as_ref());
        let signature = signer.sign(&hash)?;
        Ok(Self {
            sender: signer.identity(),
            encrypted_payload,
            timestamp,
            previous_hash,
            hash,
            signature,
        })
    }

    /// Recomputes the hash this block should carry.
    pub fn expected_hash(&self) -> BlockHash {
        compute_block_hash(
            &self.encrypted_payload,
            &self.timestamp,
            self.previous_hash.as_ref(),
        )
    }

    /// Returns `true` if this block has no predecessor.
    pub fn is_genesis(&self) -> bool {
        self.previous_hash.is_none()
    }

    /// Checks that `hash` matches the block contents.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::InvalidHash`] on mismatch.
    pub fn verify_hash(&self) -> Result<()> {
        let expected = self.expected_hash();
        if expected != self.hash {
            return Err(ChaintextError::InvalidHash {
                reason: format!("block claims {} but contents hash to {expected}", self.hash),
            });
        }
        Ok(())
    }

    /// Checks that `signature` verifies against `hash` and `sender`.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::InvalidSignature`] if it does not.
    pub fn verify_signature(&self, verifier: &dyn SignatureVerifier) -> Result<()> {
        if !verifier.verify(&self.hash, &self.signature, &self.sender) {
            return Err(ChaintextError::InvalidSignature {
                reason: format!("signature on {} does not verify for {}", self.hash, self.sender),
            });
        }
        Ok(())
    }
}

/// Validates hash integrity and linkage across an ordered sequence.
///
/// The first block must be genesis and every later block must link to
/// its immediate predecessor. Signatures are not checked here.
///
/// # Errors
///
/// Returns the first [`ChaintextError::InvalidHash`] or
/// [`ChaintextError::InvalidLinkage`] found.
pub fn validate_chain(blocks: &[Block]) -> Result<()> {
    let mut previous: Option<&Block> = None;
    for (index, block) in blocks.iter().enumerate() {
        block.verify_hash()?;

        let expected_prev = previous.map(|p| p.hash);
        if block.previous_hash != expected_prev {
            return Err(ChaintextError::InvalidLinkage {
                reason: format!(
                    "block {index} ({}) does not link to {}",
                    block.hash,
                    expected_prev.map(|h| h.to_hex()).unwrap_or_else(|| "genesis".into()),
                ),
            });
        }
        previous = Some(block);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// `None` travels as the empty string on the wire.
/// `null` is accepted on input.
mod optional_hash {
    use chaintext_types::BlockHash;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        hash: &Option<BlockHash>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match hash {
            Some(h) => serializer.serialize_str(&h.to_hex()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BlockHash>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s.as_deref() {
            None | Some("") => Ok(None),
            Some(hex) => hex.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
