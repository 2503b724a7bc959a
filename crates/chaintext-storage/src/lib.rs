//! Hash-chained message ledger for ChainText.
//!
//! Provides the [`Block`](block::Block) record and its validation rules,
//! the per-room [`ChainStore`](chain::ChainStore) with out-of-order
//! merge and an orphan buffer, and the key-value persistence backends
//! the store writes through: in-memory and sled.

pub mod block;
pub mod chain;
pub mod kv;
