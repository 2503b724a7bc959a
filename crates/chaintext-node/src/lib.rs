//! ChainText node runtime.
//!
//! Wires the ledger, the payload cipher, and the overlay together
//! behind a single actor.
//!
//! # Architecture
//!
//! - [`node`]: lifecycle, assembly, and the [`NodeHandle`](node::NodeHandle) API
//! - `event_loop`: the actor's `select!` loop
//! - [`command`]: commands and status snapshot
//! - [`authoring`]: sealing, signing, and appending local messages
//! - [`sync`]: full-snapshot reconciliation and relay decisions
//! - [`observer`]: chain-change callbacks
//! - [`maintenance`]: periodic expiry, pruning, and discovery

pub mod authoring;
pub mod command;
mod event_loop;
pub mod maintenance;
pub mod node;
pub mod observer;
pub mod sync;

pub use command::{NodeCommand, NodeStatus};
pub use node::{Node, NodeComponents, NodeHandle, NodeState};
