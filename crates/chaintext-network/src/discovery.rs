//! Presence-based peer discovery.
//!
//! Live nodes broadcast an `announce` signal on a fixed interval. The
//! [`PeerDirectory`] keeps the freshest announcement per peer and
//! reports every peer heard from within the TTL. Entries that age out
//! disappear on the next [`prune`](PeerDirectory::prune); there is no
//! explicit departure message.

use std::collections::HashMap;
use std::time::Duration;

use chaintext_types::{PeerId, Result, RoomId, Timestamp};

use crate::protocol::{AnnouncePayload, Signal, SignalKind};
use crate::signal::SignalBus;

// ---------------------------------------------------------------------------
// Announcement
// ---------------------------------------------------------------------------

/// A decoded presence announcement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Announcement {
    /// Announcing peer.
    pub from: PeerId,
    /// Room the peer is in.
    pub room: RoomId,
    /// When the peer issued it.
    pub issued_at: Timestamp,
}

impl Announcement {
    /// Extracts an announcement from a signal.
    ///
    /// Returns `Ok(None)` for signals of other kinds.
    ///
    /// # Errors
    ///
    /// Returns [`chaintext_types::ChaintextError::ProtocolError`] if an
    /// `announce` signal carries a malformed payload or timestamp.
    pub fn from_signal(signal: &Signal) -> Result<Option<Self>> {
        if signal.kind != SignalKind::Announce {
            return Ok(None);
        }
        let payload: AnnouncePayload = signal.payload_as()?;
        Ok(Some(Self {
            from: signal.from.clone(),
            room: payload.room,
            issued_at: Timestamp::from_millis(signal.timestamp)?,
        }))
    }
}

// ---------------------------------------------------------------------------
// PeerDirectory
// ---------------------------------------------------------------------------

/// Set of peers recently heard from in the local room.
#[derive(Debug)]
pub struct PeerDirectory {
    local: PeerId,
    room: RoomId,
    ttl: Duration,
    entries: HashMap<PeerId, Timestamp>,
}

impl PeerDirectory {
    /// Creates an empty directory.
    pub fn new(local: PeerId, room: RoomId, ttl: Duration) -> Self {
        Self {
            local,
            room,
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Room this directory tracks.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Publishes our own announcement.
    ///
    /// # Errors
    ///
    /// Propagates the bus's
    /// [`SignalDeliveryFailure`](chaintext_types::ChaintextError::SignalDeliveryFailure).
    pub fn announce(&self, bus: &dyn SignalBus, now: Timestamp) -> Result<()> {
        let signal = Signal::announce(self.local.clone(), self.room.clone(), now)?;
        bus.publish(signal)
    }

    /// Records an announcement, returning `true` if it introduced a
    /// peer not currently present.
    ///
    /// Our own announcements, announcements for other rooms, already
    /// expired announcements, and announcements older than the one on
    /// file are ignored.
    pub fn record(&mut self, announcement: &Announcement, now: Timestamp) -> bool {
        if announcement.from == self.local || announcement.room != self.room {
            return false;
        }
        if !self.is_fresh(&announcement.issued_at, &now) {
            return false;
        }

        match self.entries.get_mut(&announcement.from) {
            Some(existing) => {
                if announcement.issued_at > *existing {
                    *existing = announcement.issued_at;
                }
                false
            }
            None => {
                tracing::debug!(peer = %announcement.from, room = %self.room, "peer discovered");
                self.entries
                    .insert(announcement.from.clone(), announcement.issued_at);
                true
            }
        }
    }

    /// Peers whose latest announcement is within the TTL, sorted.
    pub fn observe(&self, now: Timestamp) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .entries
            .iter()
            .filter(|(_, issued)| self.is_fresh(issued, &now))
            .map(|(peer, _)| peer.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Drops expired entries, returning how many were dropped.
    pub fn prune(&mut self, now: Timestamp) -> usize {
        let ttl = self.ttl_millis();
        let before = self.entries.len();
        self.entries
            .retain(|_, issued| issued.millis_until(&now) < ttl);
        before - self.entries.len()
    }

    /// Forgets every entry.
    pub fn withdraw(&mut self) {
        self.entries.clear();
    }

    /// Forgets every entry and starts tracking `room`.
    pub fn set_room(&mut self, room: RoomId) {
        self.entries.clear();
        self.room = room;
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    fn is_fresh(&self, issued: &Timestamp, now: &Timestamp) -> bool {
        issued.millis_until(now) < self.ttl_millis()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
