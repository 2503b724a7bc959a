//! Per-peer transport record and the negotiator seam.
//!
//! # Transport Architecture
//!
//! A [`Transport`] is the supervisor's bookkeeping for one remote peer:
//! its state, the negotiation attempt currently in flight, and, once
//! open, the [`ChannelHandle`] frames are queued on.
//!
//! How a channel actually gets built is the [`Negotiator`]'s business.
//! Its methods return immediately; progress is reported later as
//! [`TransportEvent`](crate::events::TransportEvent)s. Two negotiators
//! ship:
//!
//! - [`MemoryNegotiator`](crate::memory::MemoryNegotiator): paired
//!   in-process channels, for tests and single-process simulations.
//! - [`TcpNegotiator`](crate::tcp::TcpNegotiator): the answer carries
//!   a listen address; the initiator dials it.

use std::fmt;
use std::time::Instant;

use tokio::sync::mpsc;

use chaintext_types::{ChaintextError, NegotiationRole, PeerId, Result, TransportState};

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Identifier of one negotiation attempt.
///
/// A fresh id is allocated for every attempt, so completions from an
/// abandoned attempt can never be mistaken for its replacement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Wraps a raw id.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ChannelHandle
// ---------------------------------------------------------------------------

/// Outbound side of an open channel.
///
/// Backed by a bounded queue drained by the channel's writer task.
/// Sends never wait: a full queue is a send failure. Dropping the last
/// handle closes the channel.
#[derive(Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelHandle {
    /// Wraps the sending half of a frame queue.
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }

    /// Queues a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::TransportSendFailure`] if the queue is
    /// full or the channel is gone.
    pub fn try_send(&self, frame: Vec<u8>) -> Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChaintextError::TransportSendFailure {
                reason: "outbound queue full".into(),
            },
            mpsc::error::TrySendError::Closed(_) => ChaintextError::TransportSendFailure {
                reason: "channel closed".into(),
            },
        })
    }

    /// Returns `true` once the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("closed", &self.tx.is_closed())
            .field("free", &self.tx.capacity())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Negotiator
// ---------------------------------------------------------------------------

/// Builds channels through the offer/answer/candidate exchange.
///
/// Every method returns immediately. Results arrive as
/// [`TransportEvent`](crate::events::TransportEvent)s tagged with the
/// session passed in.
pub trait Negotiator: Send + Sync {
    /// Begins an attempt as initiator. Emits `LocalDescription` with the
    /// offer.
    fn start_offer(&self, session: SessionId, peer: &PeerId) -> Result<()>;

    /// Begins an attempt as responder to `offer`. Emits
    /// `LocalDescription` with the answer, possibly `LocalCandidate`s,
    /// and eventually `ChannelOpened`.
    fn accept_offer(&self, session: SessionId, peer: &PeerId, offer: &str) -> Result<()>;

    /// Applies the remote answer to an initiated attempt. Eventually
    /// emits `ChannelOpened` or `ChannelClosed`.
    fn apply_answer(&self, session: SessionId, answer: &str) -> Result<()>;

    /// Adds a remote candidate to an attempt.
    fn add_candidate(&self, session: SessionId, candidate: &str) -> Result<()>;

    /// Abandons an attempt and releases its resources. No further
    /// events for `session` are guaranteed.
    fn close(&self, session: SessionId);
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A remote candidate waiting for the remote description.
#[derive(Clone, Debug)]
pub(crate) struct BufferedCandidate {
    pub candidate: String,
    pub received_at: Instant,
}

/// Supervisor's record for one remote peer.
#[derive(Debug)]
pub struct Transport {
    peer: PeerId,
    state: TransportState,
    session: SessionId,
    channel: Option<ChannelHandle>,
    started_at: Instant,
    remote_described: bool,
    pub(crate) pending_candidates: Vec<BufferedCandidate>,
}

impl Transport {
    /// New transport in `Negotiating(role)`.
    pub(crate) fn negotiating(
        peer: PeerId,
        role: NegotiationRole,
        session: SessionId,
        now: Instant,
    ) -> Self {
        Self {
            peer,
            state: TransportState::Negotiating(role),
            session,
            channel: None,
            started_at: now,
            // A responder is created from the offer, so it already
            // knows the remote description.
            remote_described: role == NegotiationRole::Responder,
            pending_candidates: Vec::new(),
        }
    }

    /// Remote peer.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Current state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Negotiation attempt this transport belongs to.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// When the current attempt began.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns `true` when `Open`.
    pub fn is_open(&self) -> bool {
        self.state == TransportState::Open
    }

    /// Returns `true` when negotiating as `role`.
    pub fn is_negotiating_as(&self, role: NegotiationRole) -> bool {
        self.state == TransportState::Negotiating(role)
    }

    /// Returns `true` once the remote description has been applied.
    pub fn remote_described(&self) -> bool {
        self.remote_described
    }

    pub(crate) fn mark_remote_described(&mut self) {
        self.remote_described = true;
    }

    pub(crate) fn open(&mut self, channel: ChannelHandle) {
        self.state = TransportState::Open;
        self.channel = Some(channel);
    }

    /// Moves to `Closed`, dropping the channel handle.
    pub(crate) fn close(&mut self) {
        self.state = TransportState::Closed;
        self.channel = None;
        self.pending_candidates.clear();
    }

    /// Queues a frame on the open channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::TransportSendFailure`] if the
    /// transport is not open or the queue rejects the frame.
    pub fn send(&self, frame: Vec<u8>) -> Result<()> {
        match (&self.state, &self.channel) {
            (TransportState::Open, Some(channel)) => channel.try_send(frame),
            _ => Err(ChaintextError::TransportSendFailure {
                reason: format!("transport to {} is {}", self.peer, self.state),
            }),
        }
    }

    /// Returns `true` if the open channel's receiver is gone.
    pub fn channel_gone(&self) -> bool {
        self.channel.as_ref().map(ChannelHandle::is_closed).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn full_queue_is_send_failure() -> TestResult {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ChannelHandle::new(tx);
        handle.try_send(vec![1])?;
        assert!(matches!(
            handle.try_send(vec![2]),
            Err(ChaintextError::TransportSendFailure { .. })
        ));
        Ok(())
    }

    #[test]
    fn dropped_receiver_is_send_failure() {
        let (tx, rx) = mpsc::channel(4);
        let handle = ChannelHandle::new(tx);
        drop(rx);
        assert!(handle.is_closed());
        assert!(handle.try_send(vec![1]).is_err());
    }

    #[test]
    fn negotiating_transport_cannot_send() -> TestResult {
        let t = Transport::negotiating(
            PeerId::new("aaa")?,
            NegotiationRole::Initiator,
            SessionId::new(1),
            Instant::now(),
        );
        assert!(t.send(vec![0]).is_err());
        assert!(!t.remote_described());
        Ok(())
    }

    #[test]
    fn open_transport_sends() -> TestResult {
        let (tx, mut rx) = mpsc::channel(4);
        let mut t = Transport::negotiating(
            PeerId::new("aaa")?,
            NegotiationRole::Responder,
            SessionId::new(2),
            Instant::now(),
        );
        assert!(t.remote_described());
        t.open(ChannelHandle::new(tx));
        t.send(b"frame".to_vec())?;
        assert_eq!(rx.try_recv()?, b"frame".to_vec());

        t.close();
        assert_eq!(t.state(), TransportState::Closed);
        assert!(t.send(vec![0]).is_err());
        Ok(())
    }
}
