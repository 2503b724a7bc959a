//! Periodic maintenance tasks.
//!
//! Called by the event loop on `maintenance_interval_secs`. Every task
//! is idempotent.
//!
//! # Tasks
//!
//! 1. **Negotiation expiry**: transports stuck negotiating past the
//!    timeout are forced closed.
//! 2. **Directory pruning**: peers whose announcement aged out are
//!    forgotten.
//! 3. **Orphan pruning**: buffered blocks whose predecessor never
//!    arrived are dropped.
//! 4. **Discovery**: every announced peer without an active transport
//!    gets a connect attempt. This is the only reconnection path.

use std::time::Instant;

use chaintext_network::discovery::PeerDirectory;
use chaintext_network::supervisor::PeerSupervisor;
use chaintext_storage::chain::ChainStore;
use chaintext_types::{PeerId, Timestamp};

// ---------------------------------------------------------------------------
// MaintenanceReport
// ---------------------------------------------------------------------------

/// Summary of a maintenance run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MaintenanceReport {
    /// Peers whose negotiation timed out.
    pub expired: Vec<PeerId>,
    /// Directory entries dropped.
    pub peers_pruned: usize,
    /// Orphan blocks dropped.
    pub orphans_pruned: usize,
    /// Peers a new negotiation was started with.
    pub connect_attempts: Vec<PeerId>,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Runs all maintenance tasks.
pub fn run_maintenance(
    supervisor: &mut PeerSupervisor,
    directory: &mut PeerDirectory,
    chain: &mut ChainStore,
    now: Instant,
    wall: Timestamp,
) -> MaintenanceReport {
    let expired = supervisor.expire_stale(now);
    let peers_pruned = directory.prune(wall);
    let orphans_pruned = chain.prune_orphans(wall);
    let connect_attempts = discover(supervisor, directory, now, wall);

    MaintenanceReport {
        expired,
        peers_pruned,
        orphans_pruned,
        connect_attempts,
    }
}

/// Starts a negotiation with every observed peer that has no active
/// transport. Returns the peers a negotiation was started with.
pub fn discover(
    supervisor: &mut PeerSupervisor,
    directory: &PeerDirectory,
    now: Instant,
    wall: Timestamp,
) -> Vec<PeerId> {
    let mut started = Vec::new();
    for peer in directory.observe(wall) {
        if supervisor.is_active(&peer) {
            continue;
        }
        match supervisor.connect(&peer, now) {
            Ok(true) => started.push(peer),
            Ok(false) => {}
            Err(e) => tracing::debug!(%peer, error = %e, "discovery connect failed"),
        }
    }
    started
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chaintext_crypto::signing::Ed25519Verifier;
    use chaintext_network::config::NetworkConfig;
    use chaintext_network::discovery::Announcement;
    use chaintext_network::memory::MemoryHub;
    use chaintext_network::signal::MemorySignalBus;
    use chaintext_storage::kv::MemoryStore;
    use chaintext_types::RoomId;
    use tokio::sync::mpsc;

    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn discovery_connects_and_prunes() -> TestResult {
        let local = PeerId::new("aaa")?;
        let room = RoomId::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let hub = MemoryHub::new(8);
        let mut supervisor = PeerSupervisor::new(
            local.clone(),
            room.clone(),
            NetworkConfig::default(),
            Arc::new(MemorySignalBus::new()),
            Arc::new(hub.negotiator(local.clone(), tx)),
        );
        let mut directory = PeerDirectory::new(local, room.clone(), Duration::from_secs(60));
        let mut chain = ChainStore::open(
            room.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(Ed25519Verifier),
        )?;

        let t0 = Timestamp::from_millis(1_000_000)?;
        directory.record(
            &Announcement { from: PeerId::new("bbb")?, room: room.clone(), issued_at: t0 },
            t0,
        );

        let now = Instant::now();
        let report = run_maintenance(&mut supervisor, &mut directory, &mut chain, now, t0);
        assert_eq!(report.connect_attempts, vec![PeerId::new("bbb")?]);

        // Already negotiating: no second attempt.
        let report = run_maintenance(&mut supervisor, &mut directory, &mut chain, now, t0);
        assert!(report.connect_attempts.is_empty());

        // Past both the negotiation timeout and the announcement TTL.
        let later = Timestamp::from_millis(1_061_000)?;
        let report = run_maintenance(
            &mut supervisor,
            &mut directory,
            &mut chain,
            now + Duration::from_secs(31),
            later,
        );
        assert_eq!(report.expired, vec![PeerId::new("bbb")?]);
        assert_eq!(report.peers_pruned, 1);
        assert!(report.connect_attempts.is_empty());
        Ok(())
    }
}
