//! ChainText overlay network layer.
//!
//! Everything a node needs to find peers and hold channels open to
//! them. None of it touches the chain; frames are opaque bytes here.
//!
//! # Architecture
//!
//! - [`protocol`]: signal and sync wire formats
//! - [`signal`]: the [`SignalBus`](signal::SignalBus) seam and its in-process bus
//! - [`udp`]: signal bus over UDP datagrams
//! - [`discovery`]: presence announcements and the peer directory
//! - [`transport`]: per-peer transport record and the negotiator seam
//! - [`memory`]: in-process negotiator
//! - [`tcp`]: TCP negotiator
//! - [`events`]: negotiator completions and supervisor outcomes
//! - [`supervisor`]: per-peer connection state machine
//! - [`config`]: network configuration with defaults

pub mod config;
pub mod discovery;
pub mod events;
pub mod memory;
pub mod protocol;
pub mod signal;
pub mod supervisor;
pub mod tcp;
pub mod transport;
pub mod udp;
