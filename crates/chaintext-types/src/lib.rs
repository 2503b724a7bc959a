//! Core shared types for the ChainText peer overlay.
//!
//! This crate defines all fundamental types used across the workspace:
//! peer and room identifiers, block hashes, signer identities,
//! timestamps, node events, and the central error enum. No other crate
//! should define shared types; everything lives here.

pub mod config;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// ---------------------------------------------------------------------------
// PeerId
// ---------------------------------------------------------------------------

/// Opaque identifier of a node on the overlay.
///
/// Stable for the lifetime of a node session. Ordering is plain
/// lexicographic string ordering, which is what glare resolution
/// relies on: the smaller id keeps its own outbound attempt.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    /// Maximum byte length of a peer id.
    pub const MAX_LEN: usize = 128;

    /// Creates a `PeerId`, rejecting empty, oversized, or
    /// non-printable identifiers.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ChaintextError::ProtocolError {
                reason: "peer id must not be empty".into(),
            });
        }
        if id.len() > Self::MAX_LEN {
            return Err(ChaintextError::ProtocolError {
                reason: format!("peer id exceeds {} bytes", Self::MAX_LEN),
            });
        }
        if !id.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ChaintextError::ProtocolError {
                reason: "peer id must contain only printable ASCII".into(),
            });
        }
        Ok(Self(id))
    }

    /// Generates a fresh random peer id (16 random bytes, hex).
    pub fn random() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PeerId {
    type Error = ChaintextError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl FromStr for PeerId {
    type Err = ChaintextError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RoomId
// ---------------------------------------------------------------------------

/// Logical topic scoping an independent chain and peer set.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Maximum byte length of a room id.
    pub const MAX_LEN: usize = 64;

    /// Room joined when nothing else is configured.
    pub const DEFAULT: &'static str = "lobby";

    /// Creates a `RoomId`, rejecting empty or oversized names and
    /// names containing `/` (the persistence key separator).
    pub fn new(room: impl Into<String>) -> Result<Self> {
        let room = room.into();
        if room.is_empty() {
            return Err(ChaintextError::ConfigError {
                reason: "room id must not be empty".into(),
            });
        }
        if room.len() > Self::MAX_LEN {
            return Err(ChaintextError::ConfigError {
                reason: format!("room id exceeds {} bytes", Self::MAX_LEN),
            });
        }
        if room.contains('/') || room.chars().any(char::is_control) {
            return Err(ChaintextError::ConfigError {
                reason: "room id must not contain '/' or control characters".into(),
            });
        }
        Ok(Self(room))
    }

    /// Returns the room name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self(Self::DEFAULT.to_owned())
    }
}

impl TryFrom<String> for RoomId {
    type Error = ChaintextError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

impl FromStr for RoomId {
    type Err = ChaintextError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// BlockHash
// ---------------------------------------------------------------------------

/// SHA-256 digest identifying a block.
///
/// Rendered as 64 lowercase hex characters on the wire and in the
/// hash preimage of the next block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// The fixed byte length of a block hash.
    pub const LEN: usize = 32;

    /// Creates a new `BlockHash` from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for BlockHash {
    type Err = ChaintextError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| ChaintextError::ProtocolError {
            reason: "invalid hex encoding for block hash".into(),
        })?;
        if bytes.len() != Self::LEN {
            return Err(ChaintextError::ProtocolError {
                reason: format!("expected 32 bytes for block hash, got {}", bytes.len()),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity of a block author as understood by the signing provider.
///
/// Opaque to the overlay. With the default Ed25519 provider it is the
/// hex-encoded 32-byte verifying key.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wraps an identity string.
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// BlockSignature
// ---------------------------------------------------------------------------

/// Raw signature bytes produced by the signing provider over a block hash.
///
/// Hex-encoded on the wire. Length is not checked here; the verifier
/// decides what a well-formed signature is.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct BlockSignature(Vec<u8>);

impl BlockSignature {
    /// Wraps raw signature bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BlockSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl Serialize for BlockSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for BlockSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// UTC timestamp with millisecond precision.
///
/// The canonical rendering is `YYYY-MM-DDTHH:MM:SS.sssZ`, the same
/// shape JavaScript's `toISOString()` produces. Block hashes are
/// computed over this rendering, so a timestamp always serializes to
/// exactly the string it hashes as.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a `Timestamp` for the current UTC time, truncated to
    /// milliseconds.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Creates a `Timestamp` from a `DateTime<Utc>`, truncated to
    /// milliseconds.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let millis = dt.timestamp_millis();
        match Utc.timestamp_millis_opt(millis).single() {
            Some(truncated) => Self(truncated),
            None => Self(dt),
        }
    }

    /// Creates a `Timestamp` from milliseconds since the Unix epoch.
    pub fn from_millis(millis: i64) -> Result<Self> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Self)
            .ok_or_else(|| ChaintextError::ProtocolError {
                reason: format!("timestamp out of range: {millis}"),
            })
    }

    /// Returns the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Canonical ISO 8601 rendering (`...T..:..:..sssZ`).
    pub fn to_iso(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Milliseconds elapsed from `self` to `later` (negative if
    /// `later` is earlier).
    pub fn millis_until(&self, later: &Timestamp) -> i64 {
        later.timestamp_millis() - self.timestamp_millis()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso())
    }
}

impl FromStr for Timestamp {
    type Err = ChaintextError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| ChaintextError::ProtocolError {
                reason: format!("invalid ISO 8601 timestamp: {e}"),
            })?
            .with_timezone(&Utc);
        Ok(Self::from_datetime(dt))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// TransportState
// ---------------------------------------------------------------------------

/// Which side of the offer/answer exchange a transport is on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum NegotiationRole {
    /// We sent the offer.
    Initiator,
    /// We answered a remote offer.
    Responder,
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
        }
    }
}

/// Lifecycle state of a per-peer transport.
///
/// ```text
/// Negotiating(role) ──channel ready──▶ Open ──failure / close──▶ Closed
///        └───────────── timeout / abandoned ─────────────────────▲
/// ```
///
/// `Closed` is re-enterable: a rediscovered peer is renegotiated from
/// scratch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TransportState {
    /// Offer/answer exchange in progress.
    Negotiating(NegotiationRole),
    /// Channel confirmed ready; frames may flow.
    Open,
    /// Channel gone; the entry is about to be removed.
    Closed,
}

impl TransportState {
    /// Returns `true` for `Negotiating` and `Open`, the states that
    /// block a fresh `connect`.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Negotiating(role) => write!(f, "negotiating({role})"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeEvent
// ---------------------------------------------------------------------------

/// Events emitted by the node core to the UI layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NodeEvent {
    /// A transport to a peer reached `Open`.
    PeerConnected {
        /// The remote peer.
        peer: PeerId,
    },
    /// A transport to a peer closed.
    PeerDisconnected {
        /// The remote peer.
        peer: PeerId,
    },
    /// The local chain gained blocks.
    ChainChanged {
        /// Room whose chain changed.
        room: RoomId,
        /// Chain length after the change.
        length: usize,
        /// Hash of the newest block.
        tail: Option<BlockHash>,
    },
    /// The node re-initialized itself for another room.
    RoomSwitched {
        /// The room now active.
        room: RoomId,
    },
}

// ---------------------------------------------------------------------------
// ChaintextError
// ---------------------------------------------------------------------------

/// Central error type for the ChainText system.
///
/// All crates in the workspace convert their internal errors into
/// variants of this enum, ensuring a unified error handling surface.
#[derive(Debug, Error)]
pub enum ChaintextError {
    /// A block's hash does not match the digest of its contents.
    #[error("invalid hash: {reason}")]
    InvalidHash {
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// A block's `previousHash` does not link to the expected block.
    #[error("invalid linkage: {reason}")]
    InvalidLinkage {
        /// Human-readable description of the linkage failure.
        reason: String,
    },

    /// A block's signature does not verify against its hash and sender.
    #[error("invalid signature: {reason}")]
    InvalidSignature {
        /// Human-readable description of the verification failure.
        reason: String,
    },

    /// The block is already stored. Idempotent, never escalated.
    #[error("duplicate block {hash}")]
    Duplicate {
        /// Hash of the already-present block.
        hash: BlockHash,
    },

    /// A signal could not be handed to the signaling channel.
    #[error("signal delivery failed: {reason}")]
    SignalDeliveryFailure {
        /// Human-readable description of the delivery failure.
        reason: String,
    },

    /// A negotiation did not reach `Open` in time.
    #[error("negotiation with {peer} timed out")]
    NegotiationTimeout {
        /// Peer whose negotiation was abandoned.
        peer: PeerId,
    },

    /// A frame could not be queued on a transport.
    #[error("transport send failed: {reason}")]
    TransportSendFailure {
        /// Human-readable description of the send failure.
        reason: String,
    },

    /// An explicit connect request could not be started.
    #[error("peer connect failed: {reason}")]
    PeerConnectFailure {
        /// Human-readable description of why the connect failed.
        reason: String,
    },

    /// A local message could not be sealed, signed, or appended.
    #[error("message authoring failed: {reason}")]
    AuthoringFailure {
        /// Human-readable description of the authoring failure.
        reason: String,
    },

    /// A cryptographic operation failed (signing, sealing, opening).
    #[error("crypto error: {reason}")]
    CryptoError {
        /// Human-readable description of the cryptographic failure.
        reason: String,
    },

    /// A persistence operation failed.
    #[error("storage error: {reason}")]
    StorageError {
        /// Human-readable description of the storage failure.
        reason: String,
    },

    /// A networking or transport operation failed.
    #[error("network error: {reason}")]
    NetworkError {
        /// Human-readable description of the network failure.
        reason: String,
    },

    /// A wire-level error (malformed signal, frame, or identifier).
    #[error("protocol error: {reason}")]
    ProtocolError {
        /// Human-readable description of the protocol failure.
        reason: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable description of the configuration problem.
        reason: String,
    },
}

impl ChaintextError {
    /// Returns `true` for the failures surfaced to the UI layer as a
    /// single retryable error: local authoring and explicit connect.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AuthoringFailure { .. } | Self::PeerConnectFailure { .. }
        )
    }

    /// Returns `true` for the block-rejection kinds that are logged and
    /// contained at the merge boundary.
    pub fn is_block_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidHash { .. } | Self::InvalidLinkage { .. } | Self::InvalidSignature { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`ChaintextError`].
pub type Result<T> = std::result::Result<T, ChaintextError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_rejects_empty_and_whitespace() {
        assert!(PeerId::new("").is_err());
        assert!(PeerId::new("has space").is_err());
        assert!(PeerId::new("x".repeat(PeerId::MAX_LEN + 1)).is_err());
        assert!(PeerId::new("aaa").is_ok());
    }

    #[test]
    fn peer_id_orders_lexicographically() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let a = PeerId::new("aaa")?;
        let b = PeerId::new("bbb")?;
        assert!(a < b);
        Ok(())
    }

    #[test]
    fn random_peer_ids_differ() {
        assert_ne!(PeerId::random(), PeerId::random());
    }

    #[test]
    fn peer_id_serde_rejects_invalid() {
        let parsed: std::result::Result<PeerId, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn room_id_rejects_separator() {
        assert!(RoomId::new("a/b").is_err());
        assert!(RoomId::new("").is_err());
        assert_eq!(RoomId::default().as_str(), "lobby");
    }

    #[test]
    fn block_hash_roundtrip_hex() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let hash = BlockHash::new([0xAB; 32]);
        let parsed: BlockHash = hash.to_string().parse()?;
        assert_eq!(hash, parsed);
        Ok(())
    }

    #[test]
    fn block_hash_invalid_length() {
        let result: std::result::Result<BlockHash, _> = "abcd".parse();
        assert!(result.is_err());
    }

    #[test]
    fn timestamp_renders_js_iso_shape() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let ts = Timestamp::from_millis(1_700_000_000_123)?;
        assert_eq!(ts.to_iso(), "2023-11-14T22:13:20.123Z");
        Ok(())
    }

    #[test]
    fn timestamp_truncates_to_millis() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let parsed: Timestamp = "2024-05-01T10:00:00.123456789+00:00".parse()?;
        assert_eq!(parsed.to_iso(), "2024-05-01T10:00:00.123Z");
        Ok(())
    }

    #[test]
    fn timestamp_serde_is_canonical() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let ts = Timestamp::from_millis(0)?;
        let json = serde_json::to_string(&ts)?;
        assert_eq!(json, "\"1970-01-01T00:00:00.000Z\"");
        let back: Timestamp = serde_json::from_str(&json)?;
        assert_eq!(back, ts);
        Ok(())
    }

    #[test]
    fn transport_state_activity() {
        assert!(TransportState::Negotiating(NegotiationRole::Initiator).is_active());
        assert!(TransportState::Open.is_active());
        assert!(!TransportState::Closed.is_active());
        assert_eq!(
            TransportState::Negotiating(NegotiationRole::Responder).to_string(),
            "negotiating(responder)"
        );
    }

    #[test]
    fn retryable_kinds() {
        let authoring = ChaintextError::AuthoringFailure { reason: "no key".into() };
        let hash = ChaintextError::InvalidHash { reason: "mismatch".into() };
        assert!(authoring.is_retryable());
        assert!(!hash.is_retryable());
        assert!(hash.is_block_rejection());
    }

    #[test]
    fn error_display() {
        let err = ChaintextError::InvalidLinkage {
            reason: "previous hash unknown".into(),
        };
        assert!(err.to_string().contains("previous hash unknown"));
    }
}
