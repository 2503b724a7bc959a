//! CLI argument parsing and config file support.
//!
//! The daemon can be configured via CLI flags, a JSON config file,
//! or a combination of both (CLI overrides config file).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use chaintext_network::config::NetworkConfig;
use chaintext_types::config::AppConfig;
use chaintext_types::{PeerId, RoomId};

// ---------------------------------------------------------------------------
// CLI arguments (manual parsing, no clap dependency)
// ---------------------------------------------------------------------------

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    pub data_dir: Option<PathBuf>,
    pub peer_id: Option<String>,
    pub room: Option<String>,
    pub udp_bind: Option<SocketAddr>,
    pub udp_targets: Vec<SocketAddr>,
    pub tcp_listen: Option<SocketAddr>,
    pub advertise: Vec<SocketAddr>,
    pub no_input: bool,
    pub config_path: Option<PathBuf>,
}

/// Outcome of parsing the command line.
#[derive(Debug)]
pub enum CliOutcome {
    Run(CliArgs),
    Help,
}

impl CliArgs {
    /// Parses CLI arguments from `std::env::args`.
    ///
    /// Prints help or an error and exits the process where parsing
    /// cannot continue.
    pub fn parse_from_env() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        match Self::parse(&args) {
            Ok(CliOutcome::Run(cli)) => cli,
            Ok(CliOutcome::Help) => {
                print_help();
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("{e}");
                eprintln!("use --help for usage information");
                std::process::exit(1);
            }
        }
    }

    /// Parses an argument list (without the program name).
    pub fn parse(args: &[String]) -> Result<CliOutcome, String> {
        let mut cli = Self::default();

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--data-dir" => cli.data_dir = Some(PathBuf::from(value(args, &mut i, flag)?)),
                "--peer-id" => cli.peer_id = Some(value(args, &mut i, flag)?.to_string()),
                "--room" => cli.room = Some(value(args, &mut i, flag)?.to_string()),
                "--udp-bind" => cli.udp_bind = Some(addr(args, &mut i, flag)?),
                "--udp-target" => cli.udp_targets.push(addr(args, &mut i, flag)?),
                "--tcp-listen" => cli.tcp_listen = Some(addr(args, &mut i, flag)?),
                "--advertise" => cli.advertise.push(addr(args, &mut i, flag)?),
                "--no-input" => cli.no_input = true,
                "--config" => cli.config_path = Some(PathBuf::from(value(args, &mut i, flag)?)),
                "--help" | "-h" => return Ok(CliOutcome::Help),
                other => return Err(format!("unknown argument: {other}")),
            }
            i += 1;
        }

        Ok(CliOutcome::Run(cli))
    }
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn addr(args: &[String], i: &mut usize, flag: &str) -> Result<SocketAddr, String> {
    let raw = value(args, i, flag)?;
    raw.parse()
        .map_err(|e| format!("invalid address '{raw}' for {flag}: {e}"))
}

// ---------------------------------------------------------------------------
// Config file (JSON)
// ---------------------------------------------------------------------------

/// JSON config file format.
///
/// Example `daemon.json`:
/// ```json
/// {
///   "data_dir": "/opt/chaintext/data",
///   "peer_id": "office-node",
///   "app": { "room": "dev", "announce_interval_secs": 15, "announce_ttl_secs": 45 },
///   "network": {
///     "udp_bind": "0.0.0.0:27400",
///     "udp_targets": ["192.168.1.255:27400"],
///     "tcp_listen": "0.0.0.0:27401",
///     "advertise_addrs": ["192.168.1.20:27401"]
///   }
/// }
/// ```
///
/// Omitted `app` and `network` fields keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfigFile {
    pub data_dir: Option<String>,
    pub peer_id: Option<String>,
    pub app: Option<AppConfig>,
    pub network: Option<NetworkConfig>,
}

// ---------------------------------------------------------------------------
// Resolved config (all defaults applied)
// ---------------------------------------------------------------------------

/// Fully resolved daemon configuration with all defaults applied.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub peer_id: PeerId,
    pub app: AppConfig,
    pub network: NetworkConfig,
    pub interactive: bool,
}

impl DaemonConfig {
    /// Build config purely from CLI args with defaults.
    pub fn from_cli(cli: &CliArgs) -> Result<Self, String> {
        Self::from_file(DaemonConfigFile::default()).merge_cli(cli)
    }

    /// Load config from a JSON file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file: {e}"))?;

        let file: DaemonConfigFile = serde_json::from_str(&text)
            .map_err(|e| format!("invalid config JSON: {e}"))?;

        let peer_id = file.peer_id.clone();
        let mut cfg = Self::from_file(file);
        if let Some(id) = peer_id {
            cfg.peer_id = PeerId::new(id).map_err(|e| format!("invalid peer_id in config: {e}"))?;
        }
        Ok(cfg)
    }

    fn from_file(file: DaemonConfigFile) -> Self {
        Self {
            data_dir: file
                .data_dir
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            peer_id: PeerId::random(),
            app: file.app.unwrap_or_default(),
            network: file.network.unwrap_or_default(),
            interactive: true,
        }
    }

    /// Merge CLI overrides onto a config-file base.
    pub fn merge_cli(mut self, cli: &CliArgs) -> Result<Self, String> {
        if let Some(ref dir) = cli.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(ref id) = cli.peer_id {
            self.peer_id = PeerId::new(id.as_str()).map_err(|e| format!("invalid --peer-id: {e}"))?;
        }
        if let Some(ref room) = cli.room {
            self.app.room = RoomId::new(room.as_str()).map_err(|e| format!("invalid --room: {e}"))?;
        }
        if let Some(bind) = cli.udp_bind {
            self.network.udp_bind = bind;
        }
        if !cli.udp_targets.is_empty() {
            self.network.udp_targets.extend(cli.udp_targets.iter().copied());
        }
        if let Some(listen) = cli.tcp_listen {
            self.network.tcp_listen = listen;
        }
        if !cli.advertise.is_empty() {
            self.network.advertise_addrs.extend(cli.advertise.iter().copied());
        }
        if cli.no_input {
            self.interactive = false;
        }

        self.app.validate().map_err(|e| e.to_string())?;
        self.network.validate().map_err(|e| e.to_string())?;
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Platform-specific default data directory.
fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        if let Some(home) = dirs::home_dir() {
            return home.join(".chaintext");
        }
    }
    if let Some(data) = dirs::data_dir() {
        return data.join("ChainText");
    }
    PathBuf::from("chaintext-data")
}

fn print_help() {
    println!(
        r#"ChainText Daemon - headless hash-chain chat node

USAGE:
    chaintext-daemon [OPTIONS]

OPTIONS:
    --data-dir <PATH>        Data directory (default: platform-specific)
    --peer-id <ID>           Peer id for this session (default: random)
    --room <ROOM>            Room to join (default: lobby)
    --udp-bind <ADDR>        Signaling socket (default: 0.0.0.0:27400)
    --udp-target <ADDR>      Send signals to this address (repeatable)
    --tcp-listen <ADDR>      Transport listener (default: 0.0.0.0:27401)
    --advertise <ADDR>       Address peers should dial us on (repeatable)
    --no-input               Do not read messages from stdin
    --config <PATH>          Load settings from JSON config file
    -h, --help               Show this help

EXAMPLES:
    # Two nodes on one machine
    chaintext-daemon --peer-id a --udp-bind 127.0.0.1:27400 --udp-target 127.0.0.1:27410 \
        --tcp-listen 127.0.0.1:27401 --data-dir /tmp/a
    chaintext-daemon --peer-id b --udp-bind 127.0.0.1:27410 --udp-target 127.0.0.1:27400 \
        --tcp-listen 127.0.0.1:27411 --data-dir /tmp/b

    # LAN broadcast
    chaintext-daemon --udp-target 192.168.1.255:27400 --advertise 192.168.1.20:27401

    # Use config file
    chaintext-daemon --config /etc/chaintext/daemon.json

INPUT:
    Lines typed on stdin are sent as messages. Commands:
    /room <ROOM>  /connect <PEER>  /peers  /sync  /status  /quit

ENVIRONMENT:
    RUST_LOG                 Log level filter (default: info)
"#
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn run(list: &[&str]) -> std::result::Result<CliArgs, Box<dyn std::error::Error>> {
        match CliArgs::parse(&args(list))? {
            CliOutcome::Run(cli) => Ok(cli),
            CliOutcome::Help => Err("unexpected help".into()),
        }
    }

    #[test]
    fn repeatable_flags_accumulate() -> TestResult {
        let cli = run(&[
            "--udp-target",
            "127.0.0.1:1",
            "--udp-target",
            "127.0.0.1:2",
            "--room",
            "dev",
        ])?;
        assert_eq!(cli.udp_targets.len(), 2);
        assert_eq!(cli.room.as_deref(), Some("dev"));
        Ok(())
    }

    #[test]
    fn missing_value_and_unknown_flag_rejected() {
        assert!(CliArgs::parse(&args(&["--room"])).is_err());
        assert!(CliArgs::parse(&args(&["--udp-bind", "nope"])).is_err());
        assert!(CliArgs::parse(&args(&["--bogus"])).is_err());
    }

    #[test]
    fn help_flag() -> TestResult {
        assert!(matches!(CliArgs::parse(&args(&["-h"]))?, CliOutcome::Help));
        Ok(())
    }

    #[test]
    fn cli_overrides_file() -> TestResult {
        let file: DaemonConfigFile = serde_json::from_str(
            r#"{
                "data_dir": "/tmp/from-file",
                "peer_id": "file-node",
                "app": { "room": "ops" },
                "network": { "udp_targets": ["10.0.0.1:27400"] }
            }"#,
        )?;
        let mut base = DaemonConfig::from_file(file);
        base.peer_id = PeerId::new("file-node")?;

        let cli = run(&["--room", "dev", "--udp-target", "10.0.0.2:27400", "--no-input"])?;
        let cfg = base.merge_cli(&cli)?;

        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/from-file"));
        assert_eq!(cfg.peer_id.as_str(), "file-node");
        assert_eq!(cfg.app.room, RoomId::new("dev")?);
        assert_eq!(cfg.network.udp_targets.len(), 2);
        assert!(!cfg.interactive);
        Ok(())
    }

    #[test]
    fn invalid_room_rejected() -> TestResult {
        let cli = run(&["--room", ""])?;
        assert!(DaemonConfig::from_cli(&cli).is_err());
        Ok(())
    }
}
