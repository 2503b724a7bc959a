//! Network configuration for the ChainText overlay.
//!
//! All values have documented defaults. Validation ensures no
//! zero-valued timeouts or capacities at startup.
//!
//! This config lives in `chaintext-network` rather than
//! `chaintext-types` so socket-level settings stay next to the code
//! that binds the sockets. Node-level settings live in `AppConfig`.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chaintext_types::{ChaintextError, Result};

/// Default UDP port for the signaling bus.
pub const DEFAULT_UDP_PORT: u16 = 27400;

/// Default TCP port for transport channels.
pub const DEFAULT_TCP_PORT: u16 = 27401;

/// Network-layer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    // -----------------------------------------------------------------------
    // Negotiation
    // -----------------------------------------------------------------------

    /// Seconds a transport may stay `Negotiating` before it is forced
    /// `Closed`.
    ///
    /// Default: `30`.
    pub negotiation_timeout_secs: u64,

    /// Seconds an ice-candidate that arrived before the remote
    /// description may wait to be applied.
    ///
    /// Default: `5`.
    pub candidate_buffer_secs: u64,

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    /// Per-peer outbound queue depth. A full queue makes sends to that
    /// peer fail rather than block.
    ///
    /// Default: `256`.
    pub channel_capacity: usize,

    /// Largest frame accepted on a TCP channel, in bytes.
    ///
    /// Default: 16 MiB.
    pub max_frame_bytes: usize,

    /// Forward newly accepted `message` blocks to the other open peers.
    ///
    /// Default: `true`.
    pub relay_messages: bool,

    // -----------------------------------------------------------------------
    // Sockets (daemon only)
    // -----------------------------------------------------------------------

    /// Local address of the UDP signaling socket.
    pub udp_bind: SocketAddr,

    /// Addresses every signal is sent to (other nodes' `udp_bind`, or a
    /// broadcast address).
    pub udp_targets: Vec<SocketAddr>,

    /// Local address the TCP negotiator listens on.
    pub tcp_listen: SocketAddr,

    /// Addresses advertised to peers for dialing us. The first is sent
    /// in the answer, the rest as ice-candidates. Empty means "the
    /// listen address".
    pub advertise_addrs: Vec<SocketAddr>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout_secs: 30,
            candidate_buffer_secs: 5,
            channel_capacity: 256,
            max_frame_bytes: 16 * 1024 * 1024,
            relay_messages: true,
            udp_bind: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_UDP_PORT)),
            udp_targets: Vec::new(),
            tcp_listen: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_TCP_PORT)),
            advertise_addrs: Vec::new(),
        }
    }
}

impl NetworkConfig {
    /// Negotiation timeout as a [`Duration`].
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    /// Candidate buffering window as a [`Duration`].
    pub fn candidate_buffer(&self) -> Duration {
        Duration::from_secs(self.candidate_buffer_secs)
    }

    /// Validates all configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::ConfigError`] naming the first bad
    /// field.
    pub fn validate(&self) -> Result<()> {
        if self.negotiation_timeout_secs == 0 {
            return Err(ChaintextError::ConfigError {
                reason: "negotiation_timeout_secs must be greater than 0".into(),
            });
        }
        if self.candidate_buffer_secs == 0 {
            return Err(ChaintextError::ConfigError {
                reason: "candidate_buffer_secs must be greater than 0".into(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(ChaintextError::ConfigError {
                reason: "channel_capacity must be greater than 0".into(),
            });
        }
        if self.max_frame_bytes == 0 {
            return Err(ChaintextError::ConfigError {
                reason: "max_frame_bytes must be greater than 0".into(),
            });
        }
        if u32::try_from(self.max_frame_bytes).is_err() {
            return Err(ChaintextError::ConfigError {
                reason: "max_frame_bytes must fit in a u32 length prefix".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
