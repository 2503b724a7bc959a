//! Signaling bus: best-effort delivery of [`Signal`]s between nodes.
//!
//! The bus makes no ordering, delivery, confidentiality, or
//! authenticity promise. Callers recover from loss through periodic
//! re-announcement and renegotiation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use chaintext_types::{ChaintextError, PeerId, Result};

use crate::protocol::Signal;

// ---------------------------------------------------------------------------
// SignalBus
// ---------------------------------------------------------------------------

/// Transport-agnostic signaling channel.
pub trait SignalBus: Send + Sync {
    /// Hands `signal` to the bus. Returning `Ok` does not mean anyone
    /// received it.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::SignalDeliveryFailure`] if the signal
    /// could not even be handed off (socket error, encoding failure).
    fn publish(&self, signal: Signal) -> Result<()>;

    /// Registers `local` and returns the stream of signals for it:
    /// those addressed to `local`, plus announcements from others.
    ///
    /// Subscribing again replaces the previous subscription.
    fn subscribe(&self, local: PeerId) -> mpsc::UnboundedReceiver<Signal>;
}

// ---------------------------------------------------------------------------
// MemorySignalBus
// ---------------------------------------------------------------------------

/// In-process [`SignalBus`] shared by every node in one process.
///
/// Clones share the same routing table. Signals addressed to a peer
/// that is not subscribed are dropped silently.
#[derive(Clone, Debug, Default)]
pub struct MemorySignalBus {
    subscribers: Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<Signal>>>>,
}

impl MemorySignalBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl SignalBus for MemorySignalBus {
    fn publish(&self, signal: Signal) -> Result<()> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| ChaintextError::SignalDeliveryFailure {
                reason: "memory signal bus lock poisoned".into(),
            })?;

        // Drop subscribers whose receiver is gone.
        subscribers.retain(|_, tx| !tx.is_closed());

        match &signal.to {
            Some(to) => {
                if let Some(tx) = subscribers.get(to) {
                    let _ = tx.send(signal);
                } else {
                    tracing::trace!(%to, kind = %signal.kind, "no subscriber, signal dropped");
                }
            }
            None => {
                for (peer, tx) in subscribers.iter() {
                    if *peer != signal.from {
                        let _ = tx.send(signal.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn subscribe(&self, local: PeerId) -> mpsc::UnboundedReceiver<Signal> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.subscribers.lock() {
            Ok(mut subscribers) => {
                subscribers.insert(local, tx);
            }
            Err(_) => {
                tracing::error!(%local, "memory signal bus lock poisoned, subscription dropped");
            }
        }
        rx
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AnswerPayload;
    use chaintext_types::{RoomId, Timestamp};

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn announce_reaches_everyone_but_sender() -> TestResult {
        let bus = MemorySignalBus::new();
        let a = PeerId::new("aaa")?;
        let b = PeerId::new("bbb")?;
        let c = PeerId::new("ccc")?;
        let mut rx_a = bus.subscribe(a.clone());
        let mut rx_b = bus.subscribe(b);
        let mut rx_c = bus.subscribe(c);

        bus.publish(Signal::announce(a, RoomId::default(), Timestamp::now())?)?;

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn addressed_signal_reaches_only_addressee() -> TestResult {
        let bus = MemorySignalBus::new();
        let a = PeerId::new("aaa")?;
        let b = PeerId::new("bbb")?;
        let c = PeerId::new("ccc")?;
        let mut rx_b = bus.subscribe(b.clone());
        let mut rx_c = bus.subscribe(c);

        let answer = AnswerPayload { sdp: "x".into() };
        bus.publish(Signal::answer(a, b, &answer, Timestamp::now())?)?;

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn unsubscribed_addressee_is_dropped_silently() -> TestResult {
        let bus = MemorySignalBus::new();
        let answer = AnswerPayload { sdp: "x".into() };
        let signal =
            Signal::answer(PeerId::new("aaa")?, PeerId::new("zzz")?, &answer, Timestamp::now())?;
        assert!(bus.publish(signal).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn closed_receivers_are_forgotten() -> TestResult {
        let bus = MemorySignalBus::new();
        let rx = bus.subscribe(PeerId::new("aaa")?);
        let _rx_b = bus.subscribe(PeerId::new("bbb")?);
        drop(rx);

        bus.publish(Signal::announce(PeerId::new("ccc")?, RoomId::default(), Timestamp::now())?)?;
        assert_eq!(bus.subscriber_count(), 1);
        Ok(())
    }
}
