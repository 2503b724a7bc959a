//! Wire formats: signaling and chain sync.
//!
//! Both are JSON with a `type` tag.
//!
//! ```text
//! Signal:      { type: announce|offer|answer|ice-candidate,
//!                from, to|null, payload, timestamp (ms) }
//! SyncMessage: { type: message|sync-request|sync-response,
//!                room, data?, messages? }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use chaintext_storage::block::Block;
use chaintext_types::{ChaintextError, PeerId, Result, RoomId, Timestamp};

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Kind tag of a [`Signal`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// Presence announcement, addressed to everyone.
    Announce,
    /// Session offer from an initiator.
    Offer,
    /// Session answer from a responder.
    Answer,
    /// Additional connectivity candidate.
    IceCandidate,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Announce => write!(f, "announce"),
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
            Self::IceCandidate => write!(f, "ice-candidate"),
        }
    }
}

/// One signaling message. Transient; never persisted.
///
/// The payload is kept as raw JSON so that the bus can route signals
/// without understanding them; [`Signal::payload_as`] decodes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Kind tag.
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// Sending peer.
    pub from: PeerId,
    /// Addressee, `None` for announcements.
    pub to: Option<PeerId>,
    /// Kind-specific body.
    pub payload: serde_json::Value,
    /// Milliseconds since the Unix epoch at the sender.
    pub timestamp: i64,
}

impl Signal {
    fn build<P: Serialize>(
        kind: SignalKind,
        from: PeerId,
        to: Option<PeerId>,
        payload: &P,
        now: Timestamp,
    ) -> Result<Self> {
        let payload = serde_json::to_value(payload).map_err(|e| ChaintextError::ProtocolError {
            reason: format!("failed to encode {kind} payload: {e}"),
        })?;
        Ok(Self {
            kind,
            from,
            to,
            payload,
            timestamp: now.timestamp_millis(),
        })
    }

    /// Presence announcement for `room`.
    pub fn announce(from: PeerId, room: RoomId, now: Timestamp) -> Result<Self> {
        Self::build(SignalKind::Announce, from, None, &AnnouncePayload { room }, now)
    }

    /// Offer addressed to `to`.
    pub fn offer(from: PeerId, to: PeerId, payload: &OfferPayload, now: Timestamp) -> Result<Self> {
        Self::build(SignalKind::Offer, from, Some(to), payload, now)
    }

    /// Answer addressed to `to`.
    pub fn answer(
        from: PeerId,
        to: PeerId,
        payload: &AnswerPayload,
        now: Timestamp,
    ) -> Result<Self> {
        Self::build(SignalKind::Answer, from, Some(to), payload, now)
    }

    /// Ice-candidate addressed to `to`.
    pub fn candidate(
        from: PeerId,
        to: PeerId,
        payload: &CandidatePayload,
        now: Timestamp,
    ) -> Result<Self> {
        Self::build(SignalKind::IceCandidate, from, Some(to), payload, now)
    }

    /// Decodes the payload into its typed form.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::ProtocolError`] if the payload does
    /// not have the expected shape.
    pub fn payload_as<P: DeserializeOwned>(&self) -> Result<P> {
        serde_json::from_value(self.payload.clone()).map_err(|e| ChaintextError::ProtocolError {
            reason: format!("malformed {} payload from {}: {e}", self.kind, self.from),
        })
    }

    /// Returns `true` if a bus serving `local` should deliver this
    /// signal: addressed to `local`, or an announcement from someone
    /// else.
    pub fn is_for(&self, local: &PeerId) -> bool {
        match &self.to {
            Some(to) => to == local,
            None => &self.from != local,
        }
    }

    /// Encodes to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ChaintextError::ProtocolError {
            reason: format!("failed to encode signal: {e}"),
        })
    }

    /// Decodes from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ChaintextError::ProtocolError {
            reason: format!("failed to decode signal: {e}"),
        })
    }
}

/// Body of an `announce`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AnnouncePayload {
    /// Room the announcing node is in.
    pub room: RoomId,
}

/// Body of an `offer`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OfferPayload {
    /// Room the initiator wants a channel for.
    pub room: RoomId,
    /// Negotiator-specific session description.
    pub sdp: String,
}

/// Body of an `answer`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    /// Negotiator-specific session description.
    pub sdp: String,
}

/// Body of an `ice-candidate`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandidatePayload {
    /// Negotiator-specific candidate string.
    pub candidate: String,
}

// ---------------------------------------------------------------------------
// SyncMessage
// ---------------------------------------------------------------------------

/// Frame exchanged over an open transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncMessage {
    /// A single newly authored (or relayed) block.
    Message {
        /// Room the block belongs to.
        room: RoomId,
        /// The block.
        data: Block,
    },
    /// Asks the peer for its full chain.
    SyncRequest {
        /// Room whose chain is requested.
        room: RoomId,
    },
    /// Full chain snapshot.
    SyncResponse {
        /// Room the snapshot belongs to.
        room: RoomId,
        /// Every block, in the sender's acceptance order.
        messages: Vec<Block>,
    },
}

impl SyncMessage {
    /// Room this frame belongs to.
    pub fn room(&self) -> &RoomId {
        match self {
            Self::Message { room, .. }
            | Self::SyncRequest { room }
            | Self::SyncResponse { room, .. } => room,
        }
    }

    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::SyncRequest { .. } => "sync-request",
            Self::SyncResponse { .. } => "sync-response",
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ChaintextError::ProtocolError {
            reason: format!("failed to encode {}: {e}", self.kind()),
        })
    }

    /// Encodes `blocks` as one or more `sync-response` frames, each at
    /// most `max_frame_bytes` long.
    ///
    /// Blocks keep their order across frames. A block that cannot fit a
    /// frame on its own is logged and left out. An empty chain still
    /// yields one (empty) frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::ProtocolError`] if encoding fails.
    pub fn encode_snapshot(
        room: &RoomId,
        blocks: &[Block],
        max_frame_bytes: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let response = |messages: Vec<Block>| Self::SyncResponse {
            room: room.clone(),
            messages,
        };
        let overhead = response(Vec::new()).encode()?.len();

        let mut frames = Vec::new();
        let mut chunk: Vec<Block> = Vec::new();
        let mut chunk_len = overhead;

        for block in blocks {
            let len = serde_json::to_vec(block)
                .map_err(|e| ChaintextError::ProtocolError {
                    reason: format!("failed to encode block {}: {e}", block.hash),
                })?
                .len();

            if overhead + len > max_frame_bytes {
                tracing::warn!(
                    %room,
                    hash = %block.hash,
                    len,
                    max_frame_bytes,
                    "block does not fit a frame, left out of snapshot"
                );
                continue;
            }

            // Array elements after the first cost one extra byte for ','.
            if !chunk.is_empty() && chunk_len + 1 + len > max_frame_bytes {
                frames.push(response(std::mem::take(&mut chunk)).encode()?);
                chunk_len = overhead;
            }
            if !chunk.is_empty() {
                chunk_len += 1;
            }
            chunk_len += len;
            chunk.push(block.clone());
        }

        if !chunk.is_empty() || frames.is_empty() {
            frames.push(response(chunk).encode()?);
        }
        Ok(frames)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ChaintextError::ProtocolError {
            reason: format!("failed to decode sync frame: {e}"),
        })
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
    fn announce_wire_shape() -> TestResult {
        let signal =
            Signal::announce(PeerId::new("aaa")?, RoomId::default(), Timestamp::from_millis(42)?)?;
        let json: serde_json::Value = serde_json::from_slice(&signal.to_bytes()?)?;

        assert_eq!(json["type"], "announce");
        assert_eq!(json["from"], "aaa");
        assert!(json["to"].is_null());
        assert_eq!(json["payload"]["room"], "lobby");
        assert_eq!(json["timestamp"], 42);
        Ok(())
    }

    #[test]
    fn candidate_kind_is_kebab_case() -> TestResult {
        let signal = Signal::candidate(
            PeerId::new("aaa")?,
            PeerId::new("bbb")?,
            &CandidatePayload { candidate: "10.0.0.1:9".into() },
            Timestamp::from_millis(0)?,
        )?;
        let json = serde_json::to_value(&signal)?;
        assert_eq!(json["type"], "ice-candidate");
        assert_eq!(json["to"], "bbb");
        Ok(())
    }

    #[test]
    fn typed_payload_decode() -> TestResult {
        let offer = OfferPayload { room: RoomId::new("dev")?, sdp: "token".into() };
        let signal =
            Signal::offer(PeerId::new("aaa")?, PeerId::new("bbb")?, &offer, Timestamp::now())?;
        let back = Signal::from_bytes(&signal.to_bytes()?)?;
        assert_eq!(back.payload_as::<OfferPayload>()?, offer);
        assert!(back.payload_as::<CandidatePayload>().is_err());
        Ok(())
    }

    #[test]
    fn delivery_filter() -> TestResult {
        let a = PeerId::new("aaa")?;
        let b = PeerId::new("bbb")?;
        let announce = Signal::announce(a.clone(), RoomId::default(), Timestamp::now())?;
        assert!(announce.is_for(&b));
        assert!(!announce.is_for(&a));

        let payload = AnswerPayload { sdp: String::new() };
        let answer = Signal::answer(a.clone(), b.clone(), &payload, Timestamp::now())?;
        assert!(answer.is_for(&b));
        assert!(!answer.is_for(&PeerId::new("ccc")?));
        Ok(())
    }

    #[test]
    fn sync_request_wire_shape() -> TestResult {
        let msg = SyncMessage::SyncRequest { room: RoomId::default() };
        let json: serde_json::Value = serde_json::from_slice(&msg.encode()?)?;
        assert_eq!(json["type"], "sync-request");
        assert_eq!(json["room"], "lobby");
        Ok(())
    }

    #[test]
    fn sync_response_roundtrip() -> TestResult {
        let msg = SyncMessage::SyncResponse { room: RoomId::new("dev")?, messages: Vec::new() };
        let back = SyncMessage::decode(&msg.encode()?)?;
        assert_eq!(back, msg);
        assert_eq!(back.room().as_str(), "dev");
        Ok(())
    }

    #[test]
    fn unknown_sync_type_rejected() {
        assert!(SyncMessage::decode(br#"{"type":"gossip","room":"lobby"}"#).is_err());
    }
}
