//! ChainText Daemon -- headless node for servers and terminals.
//!
//! Usage:
//!
//!   chaintext-daemon [OPTIONS]
//!
//! Options:
//!
//!   --data-dir <PATH>       Data directory (default: platform-specific)
//!   --peer-id <ID>          Peer id for this session (default: random)
//!   --room <ROOM>           Room to join (default: lobby)
//!   --udp-bind <ADDR>       Signaling socket (default: 0.0.0.0:27400)
//!   --udp-target <ADDR>     Signal destination (repeatable)
//!   --tcp-listen <ADDR>     Transport listener (default: 0.0.0.0:27401)
//!   --config <PATH>         Load config from JSON file
//!
//! The daemon runs until interrupted with Ctrl+C or until stdin closes
//! in interactive mode.

use std::sync::Arc;

use tokio::sync::mpsc;

use chaintext_crypto::aead::XChaChaCipher;
use chaintext_crypto::signing::{Ed25519Signer, Ed25519Verifier};
use chaintext_network::tcp::TcpNegotiator;
use chaintext_network::udp::UdpSignalBus;
use chaintext_node::{Node, NodeComponents};
use chaintext_storage::kv::SledStore;

mod config;
mod identity_io;
mod interactive;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const STORAGE_DIR: &str = "chain";
const IDENTITY_FILE: &str = "identity.json";

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Tracing / logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Parse CLI arguments.
    let cli = config::CliArgs::parse_from_env();

    // Load or merge config file if provided.
    let daemon_config = match &cli.config_path {
        Some(path) => config::DaemonConfig::load(path).and_then(|cfg| cfg.merge_cli(&cli)),
        None => config::DaemonConfig::from_cli(&cli),
    };
    let daemon_config = match daemon_config {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    // Run the daemon.
    if let Err(e) = run_daemon(daemon_config).await {
        tracing::error!("daemon error: {e}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Daemon main logic
// ---------------------------------------------------------------------------

async fn run_daemon(cfg: config::DaemonConfig) -> Result<(), String> {
    let data_dir = &cfg.data_dir;
    let storage_path = data_dir.join(STORAGE_DIR);
    let identity_path = data_dir.join(IDENTITY_FILE);

    std::fs::create_dir_all(data_dir)
        .map_err(|e| format!("failed to create data directory: {e}"))?;

    tracing::info!(data_dir = %data_dir.display(), "data directory ready");

    // -----------------------------------------------------------------------
    // 1. Identity and storage
    // -----------------------------------------------------------------------

    let keypair = identity_io::load_or_create(&identity_path)?;
    let signer = Ed25519Signer::new(keypair);

    let store = SledStore::open(&storage_path)
        .map_err(|e| format!("failed to open storage: {e}"))?;

    tracing::info!(path = %storage_path.display(), "chain storage opened");

    // -----------------------------------------------------------------------
    // 2. Signaling and transports
    // -----------------------------------------------------------------------

    let bus = UdpSignalBus::bind(cfg.network.udp_bind, cfg.network.udp_targets.clone())
        .await
        .map_err(|e| format!("signaling setup failed: {e}"))?;

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let negotiator = TcpNegotiator::bind(cfg.peer_id.clone(), cfg.network.clone(), transport_tx)
        .await
        .map_err(|e| format!("transport setup failed: {e}"))?;

    let udp_addr = bus
        .local_addr()
        .map_err(|e| format!("signaling setup failed: {e}"))?;
    let tcp_addr = negotiator.listen_addr();

    tracing::info!(
        udp = %udp_addr,
        tcp = %tcp_addr,
        targets = cfg.network.udp_targets.len(),
        "network ready"
    );
    if cfg.network.udp_targets.is_empty() {
        tracing::warn!("no --udp-target configured; other nodes will not hear this one");
    }

    // -----------------------------------------------------------------------
    // 3. Start node
    // -----------------------------------------------------------------------

    let components = NodeComponents {
        peer_id: cfg.peer_id.clone(),
        signer: Arc::new(signer),
        verifier: Arc::new(Ed25519Verifier),
        cipher: Arc::new(XChaChaCipher),
        store: Arc::new(store),
        bus: Arc::new(bus),
        negotiator: Arc::new(negotiator),
        transport_events: transport_rx,
    };

    let mut node = Node::new(components, cfg.app.clone(), cfg.network.clone())
        .map_err(|e| format!("node creation failed: {e}"))?;
    let events = node
        .take_event_receiver()
        .ok_or_else(|| "node event receiver already taken".to_string())?;
    let handle = node.handle();

    let mut node_task = node.start()
        .map_err(|e| format!("node start failed: {e}"))?;

    let status = handle
        .status()
        .await
        .map_err(|e| format!("node did not answer: {e}"))?;

    // -----------------------------------------------------------------------
    // 4. Print status summary
    // -----------------------------------------------------------------------

    println!();
    println!("============================================================");
    println!("  ChainText Daemon running");
    println!("============================================================");
    println!("  Peer id:      {}", status.peer_id);
    println!("  Identity:     {}", status.identity);
    println!("  Room:         {}", status.room);
    println!("  Chain:        {} block(s)", status.chain_length);
    println!("  Signaling:    {udp_addr}");
    println!("  Transport:    {tcp_addr}");
    println!("  Data dir:     {}", cfg.data_dir.display());
    println!("============================================================");
    println!("  Press Ctrl+C to stop");
    println!("============================================================");
    println!();

    let printer = tokio::spawn(interactive::print_events(handle.clone(), events));

    // -----------------------------------------------------------------------
    // 5. Wait for shutdown
    // -----------------------------------------------------------------------

    let mut loop_exited = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down...");
        }
        _ = interactive::run(handle.clone()), if cfg.interactive => {
            tracing::info!("input closed, shutting down...");
        }
        result = &mut node_task => {
            loop_exited = true;
            match result {
                Ok(()) => tracing::error!("node event loop exited unexpectedly"),
                Err(e) => tracing::error!(%e, "node event loop panicked"),
            }
        }
    }

    if !loop_exited {
        node.shutdown()
            .map_err(|e| format!("node shutdown failed: {e}"))?;
        if let Err(e) = node_task.await {
            tracing::error!(%e, "node event loop panicked during shutdown");
        }
    }

    drop(handle);
    printer.abort();

    tracing::info!("daemon stopped");
    Ok(())
}
