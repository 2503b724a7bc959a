//! Main event loop driving all node subsystems.
//!
//! [`run_event_loop`] is spawned as a tokio task by
//! [`Node::start`](crate::node::Node::start). It uses `tokio::select!`
//! to multiplex:
//!
//! 1. **Signals** from the bus: announcements feed the directory, the
//!    rest drive the supervisor's negotiations.
//! 2. **Transport events** from the negotiator: channel lifecycle and
//!    sync frames.
//! 3. **Commands** from [`NodeHandle`](crate::node::NodeHandle).
//! 4. **Announce tick**: publish presence in the current room.
//! 5. **Maintenance tick**: expiry, pruning, discovery.
//! 6. **Shutdown signal** via the `watch` channel.
//!
//! Every branch runs to completion before the next is polled, so the
//! chain and the supervisor only ever see one caller.

use std::sync::Arc;
use std::time::Instant;

use chaintext_crypto::aead::PayloadKey;
use chaintext_network::discovery::Announcement;
use chaintext_network::events::{SupervisorEvent, TransportEvent};
use chaintext_network::protocol::Signal;
use chaintext_network::supervisor::BroadcastReport;
use chaintext_storage::block::Block;
use chaintext_storage::chain::ChainStore;
use chaintext_types::{NodeEvent, PeerId, Result, RoomId, Timestamp};

use crate::authoring;
use crate::command::{NodeCommand, NodeStatus};
use crate::maintenance;
use crate::node::NodeRuntime;
use crate::sync::SyncCoordinator;

// ---------------------------------------------------------------------------
// Event loop entry point
// ---------------------------------------------------------------------------

/// Runs the node event loop until shutdown is signalled.
///
/// Takes ownership of the [`NodeRuntime`]. Exits on a `Shutdown`
/// command, on the shutdown watch firing, or when every command sender
/// is gone.
pub(crate) async fn run_event_loop(mut rt: NodeRuntime) {
    tracing::info!(peer = %rt.peer_id, room = %rt.chain.room(), "node event loop started");

    let mut announce_tick = tokio::time::interval(rt.announce_interval);
    let mut maintenance_tick = tokio::time::interval(rt.maintenance_interval);
    maintenance_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // ---------------------------------------------------------------
            // 1. Signals.
            // ---------------------------------------------------------------
            Some(signal) = rt.signal_rx.recv() => {
                handle_signal(&mut rt, signal);
            }

            // ---------------------------------------------------------------
            // 2. Transport events.
            // ---------------------------------------------------------------
            Some(event) = rt.transport_rx.recv() => {
                handle_transport_event(&mut rt, event);
            }

            // ---------------------------------------------------------------
            // 3. Commands.
            // ---------------------------------------------------------------
            cmd = rt.command_rx.recv() => {
                match cmd {
                    Some(cmd) => {
                        if handle_command(cmd, &mut rt) {
                            tracing::info!("shutdown command received -- exiting event loop");
                            break;
                        }
                    }
                    None => {
                        tracing::info!("all node handles dropped -- exiting event loop");
                        break;
                    }
                }
            }

            // ---------------------------------------------------------------
            // 4. Announce tick.
            // ---------------------------------------------------------------
            _ = announce_tick.tick() => {
                announce(&rt);
            }

            // ---------------------------------------------------------------
            // 5. Maintenance tick.
            // ---------------------------------------------------------------
            _ = maintenance_tick.tick() => {
                handle_maintenance_tick(&mut rt);
            }

            // ---------------------------------------------------------------
            // 6. Shutdown signal via watch channel.
            // ---------------------------------------------------------------
            changed = rt.shutdown_rx.changed() => {
                if changed.is_err() || *rt.shutdown_rx.borrow() {
                    tracing::info!("shutdown signal received -- exiting event loop");
                    break;
                }
            }
        }
    }

    shutdown_sequence(&mut rt);
    tracing::info!("node event loop exited");
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

fn handle_signal(rt: &mut NodeRuntime, signal: Signal) {
    match Announcement::from_signal(&signal) {
        Ok(Some(announcement)) => {
            if rt.directory.record(&announcement, Timestamp::now()) {
                connect(rt, &announcement.from);
            }
            return;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::debug!(from = %signal.from, error = %e, "malformed announcement");
            return;
        }
    }

    let from = signal.from.clone();
    let kind = signal.kind;
    if let Err(e) = rt.supervisor.handle_signal(signal, Instant::now()) {
        tracing::warn!(%from, %kind, error = %e, "signal handling failed");
    }
}

fn connect(rt: &mut NodeRuntime, peer: &PeerId) {
    match rt.supervisor.connect(peer, Instant::now()) {
        Ok(true) => tracing::debug!(%peer, "connecting to discovered peer"),
        Ok(false) => {}
        Err(e) => tracing::debug!(%peer, error = %e, "connect to discovered peer failed"),
    }
}

fn announce(rt: &NodeRuntime) {
    if let Err(e) = rt.directory.announce(rt.bus.as_ref(), Timestamp::now()) {
        tracing::debug!(room = %rt.directory.room(), error = %e, "announcement not delivered");
    }
}

// ---------------------------------------------------------------------------
// Transport events
// ---------------------------------------------------------------------------

fn handle_transport_event(rt: &mut NodeRuntime, event: TransportEvent) {
    let Some(event) = rt.supervisor.handle_transport_event(event) else {
        return;
    };

    match event {
        SupervisorEvent::Opened(peer) => {
            tracing::info!(%peer, "peer connected");
            rt.emit(NodeEvent::PeerConnected { peer: peer.clone() });
            send_sync_request(rt, &peer);
        }

        SupervisorEvent::Closed { peer, was_open } => {
            if was_open {
                tracing::info!(%peer, "peer disconnected");
                rt.emit(NodeEvent::PeerDisconnected { peer });
            }
        }

        SupervisorEvent::Frame { peer, data } => {
            let outcome = rt
                .sync
                .handle_frame(&mut rt.chain, &peer, &data, Timestamp::now());

            for reply in outcome.replies {
                if !rt.supervisor.send_to_peer(&peer, reply) {
                    tracing::debug!(%peer, "sync reply not delivered");
                    break;
                }
            }
            if let Some(relay) = outcome.relay {
                let report = rt.supervisor.broadcast_except(&relay, Some(&peer));
                tracing::trace!(%peer, delivered = report.delivered, "message relayed");
                report_closed(rt, report);
            }
            if outcome.accepted > 0 {
                rt.chain_changed();
            }
        }
    }
}

fn send_sync_request(rt: &mut NodeRuntime, peer: &PeerId) {
    match SyncCoordinator::sync_request(rt.chain.room()) {
        Ok(frame) => {
            if !rt.supervisor.send_to_peer(peer, frame) {
                tracing::debug!(%peer, "sync request not delivered");
            }
        }
        Err(e) => tracing::warn!(%peer, error = %e, "failed to encode sync request"),
    }
}

fn report_closed(rt: &NodeRuntime, report: BroadcastReport) {
    for peer in report.closed {
        rt.emit(NodeEvent::PeerDisconnected { peer });
    }
}

// ---------------------------------------------------------------------------
// Command handler
// ---------------------------------------------------------------------------

/// Dispatches a command. Returns `true` if the loop should exit.
fn handle_command(cmd: NodeCommand, rt: &mut NodeRuntime) -> bool {
    match cmd {
        NodeCommand::ConnectToPeer { peer, reply } => {
            let result = if rt.supervisor.connected_peers().contains(&peer) {
                send_sync_request(rt, &peer);
                Ok(false)
            } else {
                rt.supervisor.connect(&peer, Instant::now())
            };
            let _ = reply.send(result);
        }

        NodeCommand::AuthorMessage { plaintext, reply } => {
            let _ = reply.send(handle_author_message(rt, &plaintext));
        }

        NodeCommand::BroadcastMessage { block, reply } => {
            let _ = reply.send(handle_broadcast_message(rt, block));
        }

        NodeCommand::ReadMessage { block, reply } => {
            let _ = reply.send(authoring::read_payload(
                rt.cipher.as_ref(),
                &rt.room_key,
                &block,
            ));
        }

        NodeCommand::GetConnectedPeers { reply } => {
            let _ = reply.send(rt.supervisor.connected_peers());
        }

        NodeCommand::GetChain { reply } => {
            let _ = reply.send(rt.chain.snapshot());
        }

        NodeCommand::OnChainChanged { observer, reply } => {
            let room = rt.chain.room().clone();
            rt.observers.register(observer, &room, rt.chain.blocks());
            let _ = reply.send(());
        }

        NodeCommand::SwitchRoom { room, reply } => {
            let _ = reply.send(handle_switch_room(rt, room));
        }

        NodeCommand::RequestSync { reply } => {
            let peers = rt.supervisor.connected_peers();
            let mut sent = 0usize;
            for peer in &peers {
                if let Ok(frame) = SyncCoordinator::sync_request(rt.chain.room()) {
                    if rt.supervisor.send_to_peer(peer, frame) {
                        sent += 1;
                    }
                }
            }
            tracing::debug!(peers = peers.len(), sent, "sync requested");
            let _ = reply.send(sent);
        }

        NodeCommand::GetStatus { reply } => {
            let _ = reply.send(build_status(rt));
        }

        NodeCommand::Shutdown => return true,
    }
    false
}

fn handle_author_message(rt: &mut NodeRuntime, plaintext: &[u8]) -> Result<Block> {
    let block = authoring::author_block(
        &mut rt.chain,
        rt.signer.as_ref(),
        rt.cipher.as_ref(),
        &rt.room_key,
        plaintext,
        Timestamp::now(),
    )?;
    rt.chain_changed();

    match SyncCoordinator::message(rt.chain.room(), &block) {
        Ok(frame) => {
            let report = rt.supervisor.broadcast(&frame);
            tracing::debug!(hash = %block.hash, delivered = report.delivered, "message broadcast");
            report_closed(rt, report);
        }
        Err(e) => tracing::warn!(hash = %block.hash, error = %e, "failed to encode message"),
    }
    Ok(block)
}

fn handle_broadcast_message(rt: &mut NodeRuntime, block: Block) -> Result<usize> {
    block.verify_hash()?;
    block.verify_signature(rt.verifier.as_ref())?;

    let frame = SyncCoordinator::message(rt.chain.room(), &block)?;
    let outcome = rt.chain.merge(vec![block], Timestamp::now());
    if outcome.accepted_count() > 0 {
        rt.chain_changed();
    }

    let report = rt.supervisor.broadcast(&frame);
    let delivered = report.delivered;
    report_closed(rt, report);
    Ok(delivered)
}

fn handle_switch_room(rt: &mut NodeRuntime, room: RoomId) -> Result<()> {
    if &room == rt.chain.room() {
        return Ok(());
    }

    // Load first so a failure leaves the current room untouched.
    let chain = ChainStore::open_with_policy(
        room.clone(),
        Arc::clone(&rt.store),
        Arc::clone(&rt.verifier),
        rt.orphan_policy,
    )?;
    if let Err(e) = rt.store.flush() {
        tracing::warn!(error = %e, "flush before room switch failed");
    }

    let from = rt.chain.room().clone();
    for peer in rt.supervisor.set_room(room.clone()) {
        rt.emit(NodeEvent::PeerDisconnected { peer });
    }
    rt.directory.set_room(room.clone());
    rt.chain = chain;
    rt.room_key = PayloadKey::for_room(&room);

    tracing::info!(%from, to = %room, length = rt.chain.len(), "room switched");
    announce(rt);
    rt.emit(NodeEvent::RoomSwitched { room });
    rt.chain_changed();
    Ok(())
}

fn build_status(rt: &NodeRuntime) -> NodeStatus {
    NodeStatus {
        peer_id: rt.peer_id.clone(),
        identity: rt.signer.identity(),
        room: rt.chain.room().clone(),
        chain_length: rt.chain.len(),
        orphan_count: rt.chain.orphan_count(),
        discovered_peers: rt.directory.observe(Timestamp::now()),
        transports: rt.supervisor.status(),
    }
}

// ---------------------------------------------------------------------------
// Maintenance tick
// ---------------------------------------------------------------------------

fn handle_maintenance_tick(rt: &mut NodeRuntime) {
    let report = maintenance::run_maintenance(
        &mut rt.supervisor,
        &mut rt.directory,
        &mut rt.chain,
        Instant::now(),
        Timestamp::now(),
    );

    tracing::debug!(
        expired = report.expired.len(),
        peers_pruned = report.peers_pruned,
        orphans_pruned = report.orphans_pruned,
        connect_attempts = report.connect_attempts.len(),
        connected = rt.supervisor.connected_peers().len(),
        "maintenance: tick complete"
    );
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

fn shutdown_sequence(rt: &mut NodeRuntime) {
    let closed = rt.supervisor.close_all();
    for peer in closed {
        rt.emit(NodeEvent::PeerDisconnected { peer });
    }
    rt.directory.withdraw();

    match rt.store.flush() {
        Ok(()) => tracing::info!("shutdown: storage flushed"),
        Err(e) => tracing::error!(error = %e, "shutdown: storage flush failed"),
    }
}
