//! Chain-change observers.
//!
//! Callbacks registered through `on_chain_changed` are kept in
//! registration order and all invoked, in that order, every time the
//! local chain gains blocks or the node switches rooms. Each receives
//! the full chain, not a delta. A panicking observer is logged and
//! skipped; it neither stops the others nor the node.

use std::panic::{self, AssertUnwindSafe};

use chaintext_storage::block::Block;
use chaintext_types::RoomId;

/// Callback invoked with the room and its full chain.
pub type ChainObserver = Box<dyn Fn(&RoomId, &[Block]) + Send + 'static>;

/// Ordered list of [`ChainObserver`]s.
#[derive(Default)]
pub struct ChainObservers {
    observers: Vec<ChainObserver>,
}

impl std::fmt::Debug for ChainObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainObservers")
            .field("count", &self.observers.len())
            .finish()
    }
}

impl ChainObservers {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `observer`, first handing it the current chain.
    pub fn register(&mut self, observer: ChainObserver, room: &RoomId, chain: &[Block]) {
        invoke(self.observers.len(), &observer, room, chain);
        self.observers.push(observer);
    }

    /// Invokes every observer in registration order.
    pub fn notify(&self, room: &RoomId, chain: &[Block]) {
        for (index, observer) in self.observers.iter().enumerate() {
            invoke(index, observer, room, chain);
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

fn invoke(index: usize, observer: &ChainObserver, room: &RoomId, chain: &[Block]) {
    if panic::catch_unwind(AssertUnwindSafe(|| observer(room, chain))).is_err() {
        tracing::warn!(observer = index, %room, "chain observer panicked");
    }
}
