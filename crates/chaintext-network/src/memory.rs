//! In-process negotiator.
//!
//! A [`MemoryHub`] stands in for the network between nodes living in
//! one process. An offer is a token registered in the hub; answering
//! registers a second token; applying the answer wires two bounded
//! queues between the two sides and opens both channels at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chaintext_types::{ChaintextError, PeerId, Result};

use crate::events::TransportEvent;
use crate::transport::{ChannelHandle, Negotiator, SessionId};

// ---------------------------------------------------------------------------
// MemoryHub
// ---------------------------------------------------------------------------

struct Endpoint {
    peer: PeerId,
    session: SessionId,
    events: mpsc::UnboundedSender<TransportEvent>,
}

struct PendingAnswer {
    offer: String,
    responder: Endpoint,
}

#[derive(Default)]
struct HubState {
    next_token: u64,
    offers: HashMap<String, Endpoint>,
    answers: HashMap<String, PendingAnswer>,
    pumps: HashMap<(PeerId, SessionId), JoinHandle<()>>,
}

/// Shared switchboard for [`MemoryNegotiator`]s. Clones share state.
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
    capacity: usize,
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHub")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl MemoryHub {
    /// Creates a hub whose channels queue up to `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            capacity: capacity.max(1),
        }
    }

    /// Creates the negotiator for `local`, reporting on `events`.
    pub fn negotiator(
        &self,
        local: PeerId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> MemoryNegotiator {
        MemoryNegotiator {
            local,
            hub: self.clone(),
            events,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HubState>> {
        self.state.lock().map_err(|_| ChaintextError::NetworkError {
            reason: "memory hub lock poisoned".into(),
        })
    }
}

/// Forwards frames from `rx` to `to` until either side goes away.
fn spawn_pump(mut rx: mpsc::Receiver<Vec<u8>>, to: &Endpoint) -> JoinHandle<()> {
    let session = to.session;
    let events = to.events.clone();
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if events.send(TransportEvent::Frame { session, data }).is_err() {
                return;
            }
        }
        let _ = events.send(TransportEvent::ChannelClosed {
            session,
            reason: "remote closed the channel".into(),
        });
    })
}

// ---------------------------------------------------------------------------
// MemoryNegotiator
// ---------------------------------------------------------------------------

/// [`Negotiator`] for nodes attached to the same [`MemoryHub`].
pub struct MemoryNegotiator {
    local: PeerId,
    hub: MemoryHub,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl std::fmt::Debug for MemoryNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNegotiator")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl MemoryNegotiator {
    fn endpoint(&self, session: SessionId) -> Endpoint {
        Endpoint {
            peer: self.local.clone(),
            session,
            events: self.events.clone(),
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

impl Negotiator for MemoryNegotiator {
    fn start_offer(&self, session: SessionId, peer: &PeerId) -> Result<()> {
        let token = {
            let mut state = self.hub.lock()?;
            state.next_token += 1;
            let token = format!("mem-offer:{}:{}", self.local, state.next_token);
            state.offers.insert(token.clone(), self.endpoint(session));
            token
        };
        tracing::trace!(%peer, %session, "memory offer registered");
        self.emit(TransportEvent::LocalDescription { session, sdp: token });
        Ok(())
    }

    fn accept_offer(&self, session: SessionId, peer: &PeerId, offer: &str) -> Result<()> {
        let token = {
            let mut state = self.hub.lock()?;
            match state.offers.get(offer) {
                Some(initiator) if initiator.peer == *peer => {}
                _ => {
                    return Err(ChaintextError::NetworkError {
                        reason: format!("unknown offer from {peer}"),
                    })
                }
            }
            state.next_token += 1;
            let token = format!("mem-answer:{}:{}", self.local, state.next_token);
            state.answers.insert(
                token.clone(),
                PendingAnswer {
                    offer: offer.to_owned(),
                    responder: self.endpoint(session),
                },
            );
            token
        };
        self.emit(TransportEvent::LocalDescription { session, sdp: token });
        Ok(())
    }

    fn apply_answer(&self, session: SessionId, answer: &str) -> Result<()> {
        let mut state = self.hub.lock()?;

        let pending = state.answers.remove(answer).ok_or_else(|| ChaintextError::NetworkError {
            reason: "answer does not match any pending offer".into(),
        })?;
        let initiator = match state.offers.remove(&pending.offer) {
            Some(ep) if ep.peer == self.local && ep.session == session => ep,
            _ => {
                return Err(ChaintextError::NetworkError {
                    reason: "answer refers to an offer that is no longer pending".into(),
                })
            }
        };
        let responder = pending.responder;

        let (to_responder, from_initiator) = mpsc::channel(self.hub.capacity);
        let (to_initiator, from_responder) = mpsc::channel(self.hub.capacity);

        let initiator_pump = spawn_pump(from_responder, &initiator);
        let responder_pump = spawn_pump(from_initiator, &responder);
        state
            .pumps
            .insert((initiator.peer.clone(), initiator.session), initiator_pump);
        state
            .pumps
            .insert((responder.peer.clone(), responder.session), responder_pump);
        drop(state);

        let _ = responder.events.send(TransportEvent::ChannelOpened {
            session: responder.session,
            channel: ChannelHandle::new(to_initiator),
        });
        let _ = initiator.events.send(TransportEvent::ChannelOpened {
            session: initiator.session,
            channel: ChannelHandle::new(to_responder),
        });
        Ok(())
    }

    fn add_candidate(&self, session: SessionId, candidate: &str) -> Result<()> {
        // Memory channels have a single path; candidates carry nothing.
        tracing::trace!(%session, %candidate, "memory negotiator ignoring candidate");
        Ok(())
    }

    fn close(&self, session: SessionId) {
        let Ok(mut state) = self.hub.lock() else { return };
        let local = &self.local;
        state
            .offers
            .retain(|_, ep| !(ep.peer == *local && ep.session == session));
        state
            .answers
            .retain(|_, p| !(p.responder.peer == *local && p.responder.session == session));
        if let Some(pump) = state.pumps.remove(&(local.clone(), session)) {
            pump.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn sdp_of(
        event: Option<TransportEvent>,
    ) -> std::result::Result<String, Box<dyn std::error::Error>> {
        match event {
            Some(TransportEvent::LocalDescription { sdp, .. }) => Ok(sdp),
            other => Err(format!("expected LocalDescription, got {other:?}").into()),
        }
    }

    fn channel_of(
        event: Option<TransportEvent>,
    ) -> std::result::Result<ChannelHandle, Box<dyn std::error::Error>> {
        match event {
            Some(TransportEvent::ChannelOpened { channel, .. }) => Ok(channel),
            other => Err(format!("expected ChannelOpened, got {other:?}").into()),
        }
    }

    #[tokio::test]
    async fn offer_answer_opens_both_sides() -> TestResult {
        let hub = MemoryHub::new(8);
        let a = PeerId::new("aaa")?;
        let b = PeerId::new("bbb")?;
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let neg_a = hub.negotiator(a.clone(), tx_a);
        let neg_b = hub.negotiator(b.clone(), tx_b);

        neg_a.start_offer(SessionId::new(1), &b)?;
        let offer = sdp_of(rx_a.recv().await)?;
        neg_b.accept_offer(SessionId::new(7), &a, &offer)?;
        let answer = sdp_of(rx_b.recv().await)?;
        neg_a.apply_answer(SessionId::new(1), &answer)?;

        let chan_a = channel_of(rx_a.recv().await)?;
        let chan_b = channel_of(rx_b.recv().await)?;

        chan_a.try_send(b"ping".to_vec())?;
        match rx_b.recv().await {
            Some(TransportEvent::Frame { session, data }) => {
                assert_eq!(session, SessionId::new(7));
                assert_eq!(data, b"ping".to_vec());
            }
            other => return Err(format!("unexpected {other:?}").into()),
        }

        drop(chan_a);
        match rx_b.recv().await {
            Some(TransportEvent::ChannelClosed { session, .. }) => {
                assert_eq!(session, SessionId::new(7))
            }
            other => return Err(format!("unexpected {other:?}").into()),
        }
        drop(chan_b);
        Ok(())
    }

    #[tokio::test]
    async fn offer_from_wrong_peer_rejected() -> TestResult {
        let hub = MemoryHub::new(8);
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let neg_a = hub.negotiator(PeerId::new("aaa")?, tx_a);
        let neg_b = hub.negotiator(PeerId::new("bbb")?, tx_b);

        neg_a.start_offer(SessionId::new(1), &PeerId::new("bbb")?)?;
        let offer = sdp_of(rx_a.recv().await)?;
        assert!(neg_b.accept_offer(SessionId::new(2), &PeerId::new("ccc")?, &offer).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn closed_offer_cannot_be_answered() -> TestResult {
        let hub = MemoryHub::new(8);
        let a = PeerId::new("aaa")?;
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let neg_a = hub.negotiator(a.clone(), tx_a);
        let neg_b = hub.negotiator(PeerId::new("bbb")?, tx_b);

        neg_a.start_offer(SessionId::new(1), &PeerId::new("bbb")?)?;
        let offer = sdp_of(rx_a.recv().await)?;
        neg_a.close(SessionId::new(1));
        assert!(neg_b.accept_offer(SessionId::new(2), &a, &offer).is_err());
        Ok(())
    }
}
