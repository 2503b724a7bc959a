//! Per-peer connection state machine.
//!
//! [`PeerSupervisor`] owns every [`Transport`] of a node and drives the
//! offer/answer/candidate exchange for each of them:
//!
//! ```text
//! connect(P)         ──▶ Negotiating(initiator) ── offer ──▶ P
//! offer from P       ──▶ Negotiating(responder) ── answer ─▶ P
//! answer from P      ──▶ apply, flush buffered candidates
//! ChannelOpened      ──▶ Open
//! ChannelClosed / timeout / gone channel ──▶ removed
//! ```
//!
//! The supervisor is not thread-safe and does not need to be: it is
//! owned by the node actor and every input reaches it sequentially.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chaintext_types::{
    ChaintextError, NegotiationRole, PeerId, Result, RoomId, Timestamp, TransportState,
};

use crate::config::NetworkConfig;
use crate::events::{SupervisorEvent, TransportEvent};
use crate::protocol::{AnswerPayload, CandidatePayload, OfferPayload, Signal, SignalKind};
use crate::signal::SignalBus;
use crate::transport::{BufferedCandidate, Negotiator, SessionId, Transport};

// ---------------------------------------------------------------------------
// BroadcastReport
// ---------------------------------------------------------------------------

/// Outcome of a broadcast.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BroadcastReport {
    /// Transports the frame was queued on.
    pub delivered: usize,
    /// Peers whose channel turned out to be gone and were closed.
    pub closed: Vec<PeerId>,
}

// ---------------------------------------------------------------------------
// PeerSupervisor
// ---------------------------------------------------------------------------

/// Owner of all transports of one node.
pub struct PeerSupervisor {
    local: PeerId,
    room: RoomId,
    config: NetworkConfig,
    bus: Arc<dyn SignalBus>,
    negotiator: Arc<dyn Negotiator>,
    transports: HashMap<PeerId, Transport>,
    sessions: HashMap<SessionId, PeerId>,
    next_session: u64,
}

impl std::fmt::Debug for PeerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSupervisor")
            .field("local", &self.local)
            .field("room", &self.room)
            .field("transports", &self.transports.len())
            .finish_non_exhaustive()
    }
}

impl PeerSupervisor {
    /// Creates a supervisor with no transports.
    pub fn new(
        local: PeerId,
        room: RoomId,
        config: NetworkConfig,
        bus: Arc<dyn SignalBus>,
        negotiator: Arc<dyn Negotiator>,
    ) -> Self {
        Self {
            local,
            room,
            config,
            bus,
            negotiator,
            transports: HashMap::new(),
            sessions: HashMap::new(),
            next_session: 0,
        }
    }

    /// Local peer id.
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// Room transports are negotiated for.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    fn allocate_session(&mut self) -> SessionId {
        self.next_session += 1;
        SessionId::new(self.next_session)
    }

    fn insert(&mut self, transport: Transport) {
        self.sessions
            .insert(transport.session(), transport.peer().clone());
        self.transports.insert(transport.peer().clone(), transport);
    }

    /// Removes the transport for `peer`, releasing its attempt.
    /// Returns whether it had been open.
    fn remove(&mut self, peer: &PeerId) -> Option<bool> {
        let mut transport = self.transports.remove(peer)?;
        self.sessions.remove(&transport.session());
        self.negotiator.close(transport.session());
        let was_open = transport.is_open();
        transport.close();
        Some(was_open)
    }

    fn publish(&self, signal: Result<Signal>) {
        let outcome = signal.and_then(|s| {
            let kind = s.kind;
            self.bus.publish(s).map(|()| kind)
        });
        match outcome {
            Ok(kind) => tracing::trace!(%kind, "signal published"),
            Err(e) => tracing::debug!(error = %e, "signal dropped"),
        }
    }

    // -----------------------------------------------------------------------
    // Connect
    // -----------------------------------------------------------------------

    /// Starts negotiating with `peer` as initiator.
    ///
    /// Returns `Ok(false)` without doing anything if a transport to
    /// `peer` is already negotiating or open.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::PeerConnectFailure`] for our own id or
    /// if the negotiator refuses to start.
    pub fn connect(&mut self, peer: &PeerId, now: Instant) -> Result<bool> {
        if *peer == self.local {
            return Err(ChaintextError::PeerConnectFailure {
                reason: "cannot connect to self".into(),
            });
        }
        if self.is_active(peer) {
            return Ok(false);
        }

        let session = self.allocate_session();
        self.insert(Transport::negotiating(
            peer.clone(),
            NegotiationRole::Initiator,
            session,
            now,
        ));

        if let Err(e) = self.negotiator.start_offer(session, peer) {
            self.remove(peer);
            return Err(ChaintextError::PeerConnectFailure {
                reason: format!("could not start negotiation with {peer}: {e}"),
            });
        }

        tracing::debug!(%peer, %session, "negotiating as initiator");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    /// Feeds a received signal into the state machine.
    ///
    /// Announcements and signals addressed elsewhere are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::ProtocolError`] for malformed payloads
    /// and [`ChaintextError::PeerConnectFailure`] if the negotiator
    /// rejects an offer or answer. The state machine stays consistent
    /// either way; callers log and carry on.
    pub fn handle_signal(&mut self, signal: Signal, now: Instant) -> Result<()> {
        if signal.to.as_ref() != Some(&self.local) || signal.from == self.local {
            return Ok(());
        }

        match signal.kind {
            SignalKind::Announce => Ok(()),
            SignalKind::Offer => self.on_offer(&signal, now),
            SignalKind::Answer => self.on_answer(&signal),
            SignalKind::IceCandidate => self.on_candidate(&signal, now),
        }
    }

    fn on_offer(&mut self, signal: &Signal, now: Instant) -> Result<()> {
        let offer: OfferPayload = signal.payload_as()?;
        let peer = &signal.from;

        if offer.room != self.room {
            tracing::debug!(%peer, room = %offer.room, "ignoring offer for another room");
            return Ok(());
        }

        if let Some(existing) = self.transports.get(peer) {
            if existing.is_negotiating_as(NegotiationRole::Initiator) {
                if self.local < *peer {
                    tracing::debug!(%peer, "glare: keeping our offer");
                    return Ok(());
                }
                tracing::debug!(%peer, "glare: yielding to remote offer");
                self.remove(peer);
            } else if existing.state().is_active() {
                tracing::debug!(%peer, state = %existing.state(), "ignoring offer");
                return Ok(());
            }
        }

        let session = self.allocate_session();
        self.insert(Transport::negotiating(
            peer.clone(),
            NegotiationRole::Responder,
            session,
            now,
        ));

        if let Err(e) = self.negotiator.accept_offer(session, peer, &offer.sdp) {
            self.remove(peer);
            return Err(ChaintextError::PeerConnectFailure {
                reason: format!("could not answer {peer}: {e}"),
            });
        }

        tracing::debug!(%peer, %session, "negotiating as responder");
        Ok(())
    }

    fn on_answer(&mut self, signal: &Signal) -> Result<()> {
        let answer: AnswerPayload = signal.payload_as()?;
        let peer = &signal.from;

        let Some(transport) = self.transports.get_mut(peer) else {
            tracing::debug!(%peer, "answer without transport");
            return Ok(());
        };
        if !transport.is_negotiating_as(NegotiationRole::Initiator)
            || transport.remote_described()
        {
            tracing::debug!(%peer, state = %transport.state(), "ignoring answer");
            return Ok(());
        }

        let session = transport.session();
        if let Err(e) = self.negotiator.apply_answer(session, &answer.sdp) {
            self.remove(peer);
            return Err(ChaintextError::PeerConnectFailure {
                reason: format!("could not apply answer from {peer}: {e}"),
            });
        }

        transport.mark_remote_described();
        let buffered = std::mem::take(&mut transport.pending_candidates);
        for entry in buffered {
            if let Err(e) = self.negotiator.add_candidate(session, &entry.candidate) {
                tracing::debug!(%peer, error = %e, "buffered candidate rejected");
            }
        }
        Ok(())
    }

    fn on_candidate(&mut self, signal: &Signal, now: Instant) -> Result<()> {
        let payload: CandidatePayload = signal.payload_as()?;
        let peer = &signal.from;

        let Some(transport) = self.transports.get_mut(peer) else {
            tracing::debug!(%peer, "candidate without transport dropped");
            return Ok(());
        };
        if !transport.state().is_active() {
            return Ok(());
        }

        if transport.remote_described() {
            self.negotiator
                .add_candidate(transport.session(), &payload.candidate)
        } else {
            tracing::trace!(%peer, "buffering early candidate");
            transport.pending_candidates.push(BufferedCandidate {
                candidate: payload.candidate,
                received_at: now,
            });
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Transport events
    // -----------------------------------------------------------------------

    /// Feeds a negotiator completion into the state machine.
    ///
    /// Events for sessions that are no longer current are discarded.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Option<SupervisorEvent> {
        let session = event.session();
        let Some(peer) = self.sessions.get(&session).cloned() else {
            tracing::trace!(%session, "event for stale session discarded");
            return None;
        };
        let transport = self.transports.get_mut(&peer)?;

        match event {
            TransportEvent::LocalDescription { sdp, .. } => {
                let now = Timestamp::now();
                let signal = match transport.state() {
                    TransportState::Negotiating(NegotiationRole::Initiator) => Signal::offer(
                        self.local.clone(),
                        peer,
                        &OfferPayload { room: self.room.clone(), sdp },
                        now,
                    ),
                    TransportState::Negotiating(NegotiationRole::Responder) => {
                        Signal::answer(self.local.clone(), peer, &AnswerPayload { sdp }, now)
                    }
                    _ => return None,
                };
                self.publish(signal);
                None
            }
            TransportEvent::LocalCandidate { candidate, .. } => {
                let signal = Signal::candidate(
                    self.local.clone(),
                    peer,
                    &CandidatePayload { candidate },
                    Timestamp::now(),
                );
                self.publish(signal);
                None
            }
            TransportEvent::ChannelOpened { channel, .. } => {
                if transport.is_open() {
                    return None;
                }
                transport.open(channel);
                tracing::info!(%peer, %session, "transport open");
                Some(SupervisorEvent::Opened(peer))
            }
            TransportEvent::ChannelClosed { reason, .. } => {
                let was_open = self.remove(&peer).unwrap_or(false);
                tracing::info!(%peer, %reason, "transport closed");
                Some(SupervisorEvent::Closed { peer, was_open })
            }
            TransportEvent::Frame { data, .. } => {
                if !transport.is_open() {
                    return None;
                }
                tracing::trace!(%peer, bytes = data.len(), "frame received");
                Some(SupervisorEvent::Frame { peer, data })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Queues `frame` on every open transport.
    pub fn broadcast(&mut self, frame: &[u8]) -> BroadcastReport {
        self.broadcast_except(frame, None)
    }

    /// Queues `frame` on every open transport except the one to `skip`.
    ///
    /// Sends never wait. A full queue drops the frame for that peer; a
    /// gone channel also closes the transport.
    pub fn broadcast_except(&mut self, frame: &[u8], skip: Option<&PeerId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (peer, transport) in &self.transports {
            if !transport.is_open() || Some(peer) == skip {
                continue;
            }
            match transport.send(frame.to_vec()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "broadcast send failed");
                    if transport.channel_gone() {
                        report.closed.push(peer.clone());
                    }
                }
            }
        }

        for peer in &report.closed {
            self.remove(peer);
        }
        report
    }

    /// Queues `frame` on the transport to `peer`.
    ///
    /// Returns `false` if there is no open transport or the send fails.
    pub fn send_to_peer(&mut self, peer: &PeerId, frame: Vec<u8>) -> bool {
        let Some(transport) = self.transports.get(peer) else {
            return false;
        };
        match transport.send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "send failed");
                if transport.channel_gone() {
                    self.remove(peer);
                }
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries and maintenance
    // -----------------------------------------------------------------------

    /// Returns `true` if a transport to `peer` is negotiating or open.
    pub fn is_active(&self, peer: &PeerId) -> bool {
        self.transports
            .get(peer)
            .map(|t| t.state().is_active())
            .unwrap_or(false)
    }

    /// Peers with an open transport, sorted.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .transports
            .values()
            .filter(|t| t.is_open())
            .map(|t| t.peer().clone())
            .collect();
        peers.sort();
        peers
    }

    /// Every transport's state, sorted by peer.
    pub fn status(&self) -> Vec<(PeerId, TransportState)> {
        let mut status: Vec<(PeerId, TransportState)> = self
            .transports
            .values()
            .map(|t| (t.peer().clone(), t.state()))
            .collect();
        status.sort_by(|a, b| a.0.cmp(&b.0));
        status
    }

    /// Closes transports stuck negotiating past the timeout and drops
    /// buffered candidates past their hold time. Returns the peers whose
    /// transports were closed.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<PeerId> {
        let timeout = self.config.negotiation_timeout();
        let hold = self.config.candidate_buffer();

        let mut expired = Vec::new();
        for transport in self.transports.values_mut() {
            transport
                .pending_candidates
                .retain(|c| now.saturating_duration_since(c.received_at) < hold);

            let negotiating = matches!(transport.state(), TransportState::Negotiating(_));
            if negotiating && now.saturating_duration_since(transport.started_at()) >= timeout {
                expired.push(transport.peer().clone());
            }
        }

        for peer in &expired {
            let error = ChaintextError::NegotiationTimeout { peer: peer.clone() };
            tracing::warn!(%peer, error = %error, "closing stalled transport");
            self.remove(peer);
        }
        expired
    }

    /// Closes every transport. Returns the peers that had been open.
    pub fn close_all(&mut self) -> Vec<PeerId> {
        let peers: Vec<PeerId> = self.transports.keys().cloned().collect();
        let mut was_open: Vec<PeerId> = peers
            .into_iter()
            .filter(|peer| self.remove(peer).unwrap_or(false))
            .collect();
        was_open.sort();
        was_open
    }

    /// Closes every transport and negotiates for `room` from now on.
    /// Returns the peers that had been open.
    pub fn set_room(&mut self, room: RoomId) -> Vec<PeerId> {
        let closed = self.close_all();
        self.room = room;
        closed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::signal::MemorySignalBus;
    use crate::transport::ChannelHandle;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    /// Records every negotiator call.
    #[derive(Default)]
    struct Script {
        calls: Mutex<Vec<String>>,
    }

    impl Script {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        fn push(&self, call: String) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
        }
    }

    impl Negotiator for Script {
        fn start_offer(&self, session: SessionId, peer: &PeerId) -> Result<()> {
            self.push(format!("offer {session} {peer}"));
            Ok(())
        }
        fn accept_offer(&self, session: SessionId, peer: &PeerId, offer: &str) -> Result<()> {
            self.push(format!("accept {session} {peer} {offer}"));
            Ok(())
        }
        fn apply_answer(&self, session: SessionId, answer: &str) -> Result<()> {
            self.push(format!("answer {session} {answer}"));
            Ok(())
        }
        fn add_candidate(&self, session: SessionId, candidate: &str) -> Result<()> {
            self.push(format!("candidate {session} {candidate}"));
            Ok(())
        }
        fn close(&self, session: SessionId) {
            self.push(format!("close {session}"));
        }
    }

    fn supervisor(
        local: &str,
        script: Arc<Script>,
    ) -> std::result::Result<PeerSupervisor, Box<dyn std::error::Error>> {
        Ok(PeerSupervisor::new(
            PeerId::new(local)?,
            RoomId::default(),
            NetworkConfig::default(),
            Arc::new(MemorySignalBus::new()),
            script,
        ))
    }

    fn offer_from(
        from: &str,
        to: &str,
        room: RoomId,
    ) -> std::result::Result<Signal, Box<dyn std::error::Error>> {
        Ok(Signal::offer(
            PeerId::new(from)?,
            PeerId::new(to)?,
            &OfferPayload { room, sdp: "remote-offer".into() },
            Timestamp::now(),
        )?)
    }

    fn open_channel() -> (ChannelHandle, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(4);
        (ChannelHandle::new(tx), rx)
    }

    #[test]
    fn connect_twice_creates_one_transport() -> TestResult {
        let script = Arc::new(Script::default());
        let mut sup = supervisor("aaa", script.clone())?;
        let bbb = PeerId::new("bbb")?;

        assert!(sup.connect(&bbb, Instant::now())?);
        assert!(!sup.connect(&bbb, Instant::now())?);
        assert_eq!(sup.status().len(), 1);
        assert_eq!(script.calls(), vec!["offer s1 bbb".to_string()]);
        Ok(())
    }

    #[test]
    fn connect_to_self_fails() -> TestResult {
        let mut sup = supervisor("aaa", Arc::new(Script::default()))?;
        let err = sup.connect(&PeerId::new("aaa")?, Instant::now());
        assert!(matches!(err, Err(ChaintextError::PeerConnectFailure { .. })));
        Ok(())
    }

    #[test]
    fn smaller_peer_keeps_its_offer_on_glare() -> TestResult {
        let script = Arc::new(Script::default());
        let mut sup = supervisor("aaa", script.clone())?;
        sup.connect(&PeerId::new("bbb")?, Instant::now())?;

        sup.handle_signal(offer_from("bbb", "aaa", RoomId::default())?, Instant::now())?;
        assert_eq!(
            sup.status(),
            vec![(PeerId::new("bbb")?, TransportState::Negotiating(NegotiationRole::Initiator))]
        );
        assert_eq!(script.calls().len(), 1);
        Ok(())
    }

    #[test]
    fn larger_peer_yields_on_glare() -> TestResult {
        let script = Arc::new(Script::default());
        let mut sup = supervisor("bbb", script.clone())?;
        sup.connect(&PeerId::new("aaa")?, Instant::now())?;

        sup.handle_signal(offer_from("aaa", "bbb", RoomId::default())?, Instant::now())?;
        assert_eq!(
            sup.status(),
            vec![(PeerId::new("aaa")?, TransportState::Negotiating(NegotiationRole::Responder))]
        );
        assert_eq!(
            script.calls(),
            vec![
                "offer s1 aaa".to_string(),
                "close s1".to_string(),
                "accept s2 aaa remote-offer".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn offer_for_other_room_ignored() -> TestResult {
        let script = Arc::new(Script::default());
        let mut sup = supervisor("aaa", script.clone())?;
        sup.handle_signal(offer_from("bbb", "aaa", RoomId::new("dev")?)?, Instant::now())?;
        assert!(sup.status().is_empty());
        assert!(script.calls().is_empty());
        Ok(())
    }

    #[test]
    fn candidates_buffered_until_answer() -> TestResult {
        let script = Arc::new(Script::default());
        let mut sup = supervisor("aaa", script.clone())?;
        let bbb = PeerId::new("bbb")?;
        let aaa = PeerId::new("aaa")?;
        sup.connect(&bbb, Instant::now())?;

        let candidate = Signal::candidate(
            bbb.clone(),
            aaa.clone(),
            &CandidatePayload { candidate: "10.0.0.2:1".into() },
            Timestamp::now(),
        )?;
        sup.handle_signal(candidate, Instant::now())?;
        assert_eq!(script.calls().len(), 1);

        let payload = AnswerPayload { sdp: "ans".into() };
        let answer = Signal::answer(bbb, aaa, &payload, Timestamp::now())?;
        sup.handle_signal(answer, Instant::now())?;
        assert_eq!(
            script.calls(),
            vec![
                "offer s1 bbb".to_string(),
                "answer s1 ans".to_string(),
                "candidate s1 10.0.0.2:1".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn stale_candidates_dropped() -> TestResult {
        let script = Arc::new(Script::default());
        let mut sup = supervisor("aaa", script.clone())?;
        let bbb = PeerId::new("bbb")?;
        let aaa = PeerId::new("aaa")?;
        let t0 = Instant::now();
        sup.connect(&bbb, t0)?;

        let candidate = Signal::candidate(
            bbb.clone(),
            aaa.clone(),
            &CandidatePayload { candidate: "10.0.0.2:1".into() },
            Timestamp::now(),
        )?;
        sup.handle_signal(candidate, t0)?;
        sup.expire_stale(t0 + Duration::from_secs(6));

        let payload = AnswerPayload { sdp: "ans".into() };
        let answer = Signal::answer(bbb, aaa, &payload, Timestamp::now())?;
        sup.handle_signal(answer, t0 + Duration::from_secs(6))?;
        assert!(!script.calls().iter().any(|c| c.starts_with("candidate")));
        Ok(())
    }

    #[test]
    fn negotiation_timeout_closes_transport() -> TestResult {
        let script = Arc::new(Script::default());
        let mut sup = supervisor("aaa", script.clone())?;
        let bbb = PeerId::new("bbb")?;
        let t0 = Instant::now();
        sup.connect(&bbb, t0)?;

        assert!(sup.expire_stale(t0 + Duration::from_secs(29)).is_empty());
        assert_eq!(sup.expire_stale(t0 + Duration::from_secs(30)), vec![bbb.clone()]);
        assert!(!sup.is_active(&bbb));
        assert!(script.calls().contains(&"close s1".to_string()));

        // Closed is re-enterable.
        assert!(sup.connect(&bbb, t0 + Duration::from_secs(31))?);
        Ok(())
    }

    #[test]
    fn open_send_and_broadcast() -> TestResult {
        let mut sup = supervisor("aaa", Arc::new(Script::default()))?;
        let bbb = PeerId::new("bbb")?;
        let ccc = PeerId::new("ccc")?;
        sup.connect(&bbb, Instant::now())?;
        sup.connect(&ccc, Instant::now())?;

        let (chan_b, mut rx_b) = open_channel();
        let (chan_c, rx_c) = open_channel();
        let opened = sup.handle_transport_event(TransportEvent::ChannelOpened {
            session: SessionId::new(1),
            channel: chan_b,
        });
        assert_eq!(opened, Some(SupervisorEvent::Opened(bbb.clone())));
        sup.handle_transport_event(TransportEvent::ChannelOpened {
            session: SessionId::new(2),
            channel: chan_c,
        });
        assert_eq!(sup.connected_peers(), vec![bbb.clone(), ccc.clone()]);

        assert!(sup.send_to_peer(&bbb, b"one".to_vec()));
        assert_eq!(rx_b.try_recv()?, b"one".to_vec());

        drop(rx_c);
        let report = sup.broadcast(b"two");
        assert_eq!(report.delivered, 1);
        assert_eq!(report.closed, vec![ccc.clone()]);
        assert_eq!(sup.connected_peers(), vec![bbb.clone()]);

        let report = sup.broadcast_except(b"three", Some(&bbb));
        assert_eq!(report.delivered, 0);
        Ok(())
    }

    #[test]
    fn send_to_unknown_peer_is_false() -> TestResult {
        let mut sup = supervisor("aaa", Arc::new(Script::default()))?;
        assert!(!sup.send_to_peer(&PeerId::new("zzz")?, vec![1]));
        Ok(())
    }

    #[test]
    fn events_for_abandoned_session_discarded() -> TestResult {
        let mut sup = supervisor("bbb", Arc::new(Script::default()))?;
        let aaa = PeerId::new("aaa")?;
        sup.connect(&aaa, Instant::now())?;
        sup.handle_signal(offer_from("aaa", "bbb", RoomId::default())?, Instant::now())?;

        let (chan, _rx) = open_channel();
        let stale = sup.handle_transport_event(TransportEvent::ChannelOpened {
            session: SessionId::new(1),
            channel: chan,
        });
        assert!(stale.is_none());
        assert!(sup.connected_peers().is_empty());
        Ok(())
    }

    #[test]
    fn channel_closed_removes_transport() -> TestResult {
        let mut sup = supervisor("aaa", Arc::new(Script::default()))?;
        let bbb = PeerId::new("bbb")?;
        sup.connect(&bbb, Instant::now())?;
        let (chan, _rx) = open_channel();
        sup.handle_transport_event(TransportEvent::ChannelOpened {
            session: SessionId::new(1),
            channel: chan,
        });

        let closed = sup.handle_transport_event(TransportEvent::ChannelClosed {
            session: SessionId::new(1),
            reason: "eof".into(),
        });
        assert_eq!(closed, Some(SupervisorEvent::Closed { peer: bbb.clone(), was_open: true }));
        assert!(sup.status().is_empty());
        Ok(())
    }

    #[test]
    fn set_room_closes_everything() -> TestResult {
        let mut sup = supervisor("aaa", Arc::new(Script::default()))?;
        let bbb = PeerId::new("bbb")?;
        sup.connect(&bbb, Instant::now())?;
        let (chan, _rx) = open_channel();
        sup.handle_transport_event(TransportEvent::ChannelOpened {
            session: SessionId::new(1),
            channel: chan,
        });

        assert_eq!(sup.set_room(RoomId::new("dev")?), vec![bbb]);
        assert!(sup.status().is_empty());
        assert_eq!(sup.room().as_str(), "dev");
        Ok(())
    }
}
