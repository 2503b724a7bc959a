//! Per-room block ledger with out-of-order merge.
//!
//! [`ChainStore`] holds every accepted block for one room in acceptance
//! order, indexed by hash for dedup. Two write paths exist:
//!
//! - [`append`](ChainStore::append): strict: the block must extend the
//!   current tail. Used for locally authored blocks.
//! - [`merge`](ChainStore::merge): tolerant: a block is accepted when
//!   its predecessor is *any* stored block, or it is genesis. Blocks
//!   whose predecessor is unknown wait in a bounded orphan buffer and
//!   are released, recursively, once the predecessor arrives.
//!
//! Every accepted block is written through the [`KeyValueStore`] under
//! `chain/<room>/<seq:016>` as its JSON wire shape.
//!
//! The store has a single writer (the node actor) and takes no locks.

use std::collections::HashMap;
use std::sync::Arc;

use chaintext_crypto::signing::SignatureVerifier;
use chaintext_types::{BlockHash, ChaintextError, Result, RoomId, Timestamp};

use crate::block::Block;
use crate::kv::KeyValueStore;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default maximum number of buffered orphans.
pub const DEFAULT_ORPHAN_CAPACITY: usize = 1024;

/// Default orphan lifetime in seconds.
pub const DEFAULT_ORPHAN_TTL_SECS: u64 = 600;

/// Builds the persistence key prefix for a room.
pub fn room_prefix(room: &RoomId) -> String {
    format!("chain/{}/", room.as_str())
}

fn row_key(room: &RoomId, seq: u64) -> String {
    format!("chain/{}/{seq:016}", room.as_str())
}

// ---------------------------------------------------------------------------
// OrphanPolicy
// ---------------------------------------------------------------------------

/// Limits on the orphan buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OrphanPolicy {
    /// Maximum buffered blocks. The oldest is evicted when full.
    pub capacity: usize,
    /// Seconds a block may wait for its predecessor.
    pub ttl_secs: u64,
}

impl Default for OrphanPolicy {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_ORPHAN_CAPACITY,
            ttl_secs: DEFAULT_ORPHAN_TTL_SECS,
        }
    }
}

#[derive(Debug)]
struct Orphan {
    block: Block,
    received_at: Timestamp,
    /// Already has a persisted row (replayed from storage).
    stored: bool,
}

// ---------------------------------------------------------------------------
// MergeOutcome
// ---------------------------------------------------------------------------

/// What a [`ChainStore::merge`] call did with its input.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MergeOutcome {
    /// Hashes of newly accepted blocks, in acceptance order. Includes
    /// orphans released by this call.
    pub accepted: Vec<BlockHash>,
    /// Blocks parked in the orphan buffer.
    pub buffered: usize,
    /// Blocks already stored or already buffered.
    pub duplicates: usize,
    /// Blocks failing hash or signature checks, or failing to persist.
    pub rejected: usize,
}

impl MergeOutcome {
    /// Number of newly accepted blocks.
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }
}

// ---------------------------------------------------------------------------
// ChainStore
// ---------------------------------------------------------------------------

/// Ordered, hash-indexed block ledger for one room.
pub struct ChainStore {
    room: RoomId,
    blocks: Vec<Block>,
    index: HashMap<BlockHash, usize>,
    orphans: HashMap<BlockHash, Orphan>,
    policy: OrphanPolicy,
    store: Arc<dyn KeyValueStore>,
    verifier: Arc<dyn SignatureVerifier>,
    next_seq: u64,
}

impl std::fmt::Debug for ChainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStore")
            .field("room", &self.room)
            .field("len", &self.blocks.len())
            .field("orphans", &self.orphans.len())
            .field("next_seq", &self.next_seq)
            .finish_non_exhaustive()
    }
}

impl ChainStore {
    /// Opens the chain for `room` with the default orphan policy.
    ///
    /// See [`open_with_policy`](Self::open_with_policy).
    pub fn open(
        room: RoomId,
        store: Arc<dyn KeyValueStore>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self> {
        Self::open_with_policy(room, store, verifier, OrphanPolicy::default())
    }

    /// Opens the chain for `room`, replaying persisted rows.
    ///
    /// Rows are replayed in key order through the merge path, so a
    /// corrupt or invalid row is logged and skipped rather than
    /// failing the open.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::StorageError`] if the backend cannot
    /// list or read rows.
    pub fn open_with_policy(
        room: RoomId,
        store: Arc<dyn KeyValueStore>,
        verifier: Arc<dyn SignatureVerifier>,
        policy: OrphanPolicy,
    ) -> Result<Self> {
        let prefix = room_prefix(&room);
        let keys = store.keys(&prefix)?;

        let mut next_seq = 0u64;
        let mut persisted = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(seq) = key.strip_prefix(&prefix).and_then(|s| s.parse::<u64>().ok()) {
                next_seq = next_seq.max(seq.saturating_add(1));
            }

            let Some(raw) = store.get(key)? else { continue };
            match serde_json::from_slice::<Block>(&raw) {
                Ok(block) => persisted.push(block),
                Err(e) => {
                    tracing::warn!(%key, error = %e, "skipping undecodable chain row");
                }
            }
        }

        let mut chain = Self {
            room,
            blocks: Vec::new(),
            index: HashMap::new(),
            orphans: HashMap::new(),
            policy,
            store,
            verifier,
            next_seq,
        };

        let now = Timestamp::now();
        let outcome = chain.merge_inner(persisted, now, true);
        tracing::info!(
            room = %chain.room,
            blocks = chain.blocks.len(),
            orphans = chain.orphans.len(),
            rejected = outcome.rejected,
            "chain loaded"
        );

        Ok(chain)
    }

    // -- Read side -------------------------------------------------------

    /// Room this chain belongs to.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Number of accepted blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if no block has been accepted.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Most recently accepted block.
    pub fn tail(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Returns `true` if a block with `hash` is stored.
    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.index.contains_key(hash)
    }

    /// Looks up a stored block by hash.
    pub fn get(&self, hash: &BlockHash) -> Option<&Block> {
        self.index.get(hash).and_then(|&i| self.blocks.get(i))
    }

    /// Borrowed view of all accepted blocks in acceptance order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Owned copy of all accepted blocks in acceptance order.
    pub fn snapshot(&self) -> Vec<Block> {
        self.blocks.clone()
    }

    /// Number of blocks waiting for a predecessor.
    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    // -- Write side ------------------------------------------------------

    /// Appends a block that must extend the current tail.
    ///
    /// Checks run in order: hash, duplicate, linkage, signature.
    ///
    /// # Errors
    ///
    /// - [`ChaintextError::InvalidHash`] if the hash does not match.
    /// - [`ChaintextError::Duplicate`] if already stored.
    /// - [`ChaintextError::InvalidLinkage`] if `previous_hash` is not
    ///   the tail's hash (or not empty on an empty chain).
    /// - [`ChaintextError::InvalidSignature`] if the signature fails.
    /// - [`ChaintextError::StorageError`] if the row cannot be written.
    pub fn append(&mut self, block: Block) -> Result<()> {
        block.verify_hash()?;

        if self.contains(&block.hash) {
            return Err(ChaintextError::Duplicate { hash: block.hash });
        }

        let expected = self.tail().map(|t| t.hash);
        if block.previous_hash != expected {
            return Err(ChaintextError::InvalidLinkage {
                reason: format!(
                    "previous hash {} does not match tail {}",
                    describe(block.previous_hash.as_ref()),
                    describe(expected.as_ref()),
                ),
            });
        }

        block.verify_signature(self.verifier.as_ref())?;

        self.insert(block, true)
    }

    /// Merges remote blocks, returning the number newly accepted.
    ///
    /// Invalid blocks are logged and skipped; nothing in the input can
    /// fail the merge as a whole.
    pub fn merge_remote(&mut self, blocks: Vec<Block>) -> usize {
        self.merge(blocks, Timestamp::now()).accepted_count()
    }

    /// Merges remote blocks at an explicit time, reporting the outcome.
    ///
    /// `now` stamps newly buffered orphans for TTL pruning.
    pub fn merge(&mut self, blocks: Vec<Block>, now: Timestamp) -> MergeOutcome {
        self.merge_inner(blocks, now, false)
    }

    /// Drops orphans older than the TTL, returning how many were
    /// dropped.
    pub fn prune_orphans(&mut self, now: Timestamp) -> usize {
        let ttl_ms = i64::try_from(self.policy.ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let before = self.orphans.len();
        self.orphans
            .retain(|_, o| o.received_at.millis_until(&now) < ttl_ms);
        let dropped = before - self.orphans.len();
        if dropped > 0 {
            tracing::debug!(room = %self.room, dropped, "pruned expired orphans");
        }
        dropped
    }

    // -- Internal --------------------------------------------------------

    fn merge_inner(&mut self, blocks: Vec<Block>, now: Timestamp, replay: bool) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for block in blocks {
            let hash = block.hash;
            if self.contains(&hash) || self.orphans.contains_key(&hash) {
                outcome.duplicates += 1;
                continue;
            }

            if let Err(e) = block
                .verify_hash()
                .and_then(|()| block.verify_signature(self.verifier.as_ref()))
            {
                tracing::warn!(room = %self.room, %hash, error = %e, "rejected remote block");
                outcome.rejected += 1;
                continue;
            }

            let linked = match &block.previous_hash {
                None => true,
                Some(prev) => self.contains(prev),
            };

            if !linked {
                self.buffer_orphan(block, now, replay);
                outcome.buffered += 1;
                continue;
            }

            match self.insert(block, !replay) {
                Ok(()) => {
                    outcome.accepted.push(hash);
                    self.release_orphans(hash, &mut outcome);
                }
                Err(e) => {
                    tracing::warn!(room = %self.room, %hash, error = %e, "failed to store block");
                    outcome.rejected += 1;
                }
            }
        }

        outcome
    }

    /// Accepts every buffered descendant of `root`, depth first.
    fn release_orphans(&mut self, root: BlockHash, outcome: &mut MergeOutcome) {
        let mut pending = vec![root];
        while let Some(parent) = pending.pop() {
            let children: Vec<BlockHash> = self
                .orphans
                .iter()
                .filter(|(_, o)| o.block.previous_hash == Some(parent))
                .map(|(h, _)| *h)
                .collect();

            for child in children {
                let Some(orphan) = self.orphans.remove(&child) else { continue };
                match self.insert(orphan.block, !orphan.stored) {
                    Ok(()) => {
                        outcome.accepted.push(child);
                        pending.push(child);
                    }
                    Err(e) => {
                        tracing::warn!(
                            room = %self.room,
                            hash = %child,
                            error = %e,
                            "failed to store released orphan"
                        );
                        outcome.rejected += 1;
                    }
                }
            }
        }
    }

    fn buffer_orphan(&mut self, block: Block, now: Timestamp, stored: bool) {
        if self.orphans.len() >= self.policy.capacity {
            let oldest = self
                .orphans
                .iter()
                .min_by_key(|(_, o)| o.received_at)
                .map(|(h, _)| *h);
            if let Some(evicted) = oldest {
                self.orphans.remove(&evicted);
                tracing::debug!(
                    room = %self.room,
                    hash = %evicted,
                    "orphan buffer full, evicted oldest"
                );
            }
        }

        tracing::debug!(
            room = %self.room,
            hash = %block.hash,
            waiting_for = %describe(block.previous_hash.as_ref()),
            "buffered orphan block"
        );
        self.orphans.insert(
            block.hash,
            Orphan {
                block,
                received_at: now,
                stored,
            },
        );
    }

    fn insert(&mut self, block: Block, persist: bool) -> Result<()> {
        if persist {
            let value = serde_json::to_vec(&block).map_err(|e| ChaintextError::StorageError {
                reason: format!("failed to encode block: {e}"),
            })?;
            self.store.put(&row_key(&self.room, self.next_seq), &value)?;
            self.next_seq += 1;
        }

        self.orphans.remove(&block.hash);
        self.index.insert(block.hash, self.blocks.len());
        self.blocks.push(block);
        Ok(())
    }
}

fn describe(hash: Option<&BlockHash>) -> String {
    hash.map(|h| h.to_hex()).unwrap_or_else(|| "<genesis>".into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
