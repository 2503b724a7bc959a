//! Line-oriented chat front end.
//!
//! Plain lines read from stdin are authored as messages in the current
//! room. Lines starting with `/` are commands. Node events are printed
//! as they arrive, with new chain entries opened and shown as text.

use std::collections::HashSet;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use chaintext_node::NodeHandle;
use chaintext_types::{BlockHash, NodeEvent, PeerId, RoomId};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Reads stdin until EOF, `/quit`, or a read error.
pub async fn run(handle: NodeHandle) {
    println!("Commands: /room <ROOM> /connect <PEER> /peers /sync /status /quit");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("failed to read input: {e}");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with('/') {
            match handle_slash_command(trimmed, &handle).await {
                SlashResult::Continue => continue,
                SlashResult::Quit => break,
            }
        }

        if let Err(e) = handle.author_message(trimmed.as_bytes().to_vec()).await {
            let hint = if e.is_retryable() { " (try again)" } else { "" };
            eprintln!("  send failed: {e}{hint}");
        }
    }
}

enum SlashResult {
    Continue,
    Quit,
}

async fn handle_slash_command(input: &str, handle: &NodeHandle) -> SlashResult {
    let (cmd, arg) = match input.split_once(' ') {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (input, ""),
    };

    match cmd {
        "/quit" | "/exit" | "/q" => return SlashResult::Quit,

        "/room" => match RoomId::new(arg) {
            Ok(room) => {
                if let Err(e) = handle.switch_room(room).await {
                    eprintln!("  room switch failed: {e}");
                }
            }
            Err(e) => eprintln!("  usage: /room <ROOM> ({e})"),
        },

        "/connect" => match PeerId::new(arg) {
            Ok(peer) => match handle.connect_to_peer(peer.clone()).await {
                Ok(true) => println!("  connecting to {peer}"),
                Ok(false) => println!("  already connected to {peer}, re-syncing"),
                Err(e) => eprintln!("  connect failed: {e}"),
            },
            Err(e) => eprintln!("  usage: /connect <PEER> ({e})"),
        },

        "/peers" => match handle.get_connected_peers().await {
            Ok(peers) if peers.is_empty() => println!("  no connected peers"),
            Ok(peers) => {
                for peer in peers {
                    println!("  {peer}");
                }
            }
            Err(e) => eprintln!("  {e}"),
        },

        "/sync" => match handle.request_sync().await {
            Ok(n) => println!("  sync requested from {n} peer(s)"),
            Err(e) => eprintln!("  {e}"),
        },

        "/status" => match handle.status().await {
            Ok(status) => {
                println!("  Peer id:    {}", status.peer_id);
                println!("  Identity:   {}", status.identity);
                println!("  Room:       {}", status.room);
                println!(
                    "  Chain:      {} block(s), {} orphan(s)",
                    status.chain_length, status.orphan_count
                );
                println!("  Discovered: {}", status.discovered_peers.len());
                for (peer, state) in status.transports {
                    println!("    {peer}: {state}");
                }
            }
            Err(e) => eprintln!("  {e}"),
        },

        other => eprintln!("  unknown command: {other}"),
    }
    SlashResult::Continue
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Prints node events until the event channel closes.
pub async fn print_events(handle: NodeHandle, mut events: mpsc::Receiver<NodeEvent>) {
    let mut shown: HashSet<BlockHash> = HashSet::new();

    while let Some(event) = events.recv().await {
        match event {
            NodeEvent::PeerConnected { peer } => println!("* {peer} connected"),
            NodeEvent::PeerDisconnected { peer } => println!("* {peer} disconnected"),
            NodeEvent::RoomSwitched { room } => println!("* now in room {room}"),
            NodeEvent::ChainChanged { .. } => {
                let chain = match handle.get_chain().await {
                    Ok(chain) => chain,
                    Err(_) => break,
                };
                for block in chain {
                    if !shown.insert(block.hash) {
                        continue;
                    }
                    let sender = short(block.sender.as_str());
                    let time = block.timestamp.to_iso();
                    match handle.read_message(block).await {
                        Ok(text) => {
                            println!("[{time}] {sender}: {}", String::from_utf8_lossy(&text))
                        }
                        Err(_) => println!("[{time}] {sender}: <unreadable>"),
                    }
                }
            }
        }
    }
}

fn short(identity: &str) -> String {
    identity.chars().take(8).collect()
}
