//! Signing identity persistence for the daemon.
//!
//! The daemon keeps one Ed25519 keypair across restarts so that blocks
//! it authored remain attributable to the same identity.
//!
//! # File format (v1)
//!
//! ```json
//! {
//!   "version": 1,
//!   "public_key": "<hex 32 bytes>",
//!   "seed": "<hex 32 bytes>"
//! }
//! ```
//!
//! The seed is stored in plaintext; the file is written with owner-only
//! permissions on Unix.

use std::path::Path;

use chaintext_crypto::signing::Keypair;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

const CURRENT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct IdentityFileData {
    version: u32,
    public_key: String,
    seed: String,
}

impl Drop for IdentityFileData {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

/// Loads the keypair at `path`, creating and saving a new one if the
/// file does not exist.
pub fn load_or_create(path: &Path) -> Result<Keypair, String> {
    if path.exists() {
        let keypair = load_identity(path)?;
        tracing::info!(path = %path.display(), "identity loaded");
        return Ok(keypair);
    }

    let keypair = Keypair::generate();
    save_identity(path, &keypair)?;
    Ok(keypair)
}

/// Saves a keypair to a JSON file, replacing it atomically.
pub fn save_identity(path: &Path, keypair: &Keypair) -> Result<(), String> {
    let data = IdentityFileData {
        version: CURRENT_VERSION,
        public_key: hex::encode(keypair.public_key()),
        seed: hex::encode(keypair.seed()),
    };

    let mut json = serde_json::to_string_pretty(&data)
        .map_err(|e| format!("JSON serialization failed: {e}"))?;

    let tmp_path = path.with_extension("json.tmp");
    let written = std::fs::write(&tmp_path, json.as_bytes());
    json.zeroize();
    written.map_err(|e| format!("failed to write identity file: {e}"))?;
    restrict_permissions(&tmp_path)?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        format!("failed to rename identity file: {e}")
    })?;

    tracing::info!(path = %path.display(), "identity saved");
    Ok(())
}

/// Loads a keypair from a JSON file, checking the stored public key
/// against the seed.
pub fn load_identity(path: &Path) -> Result<Keypair, String> {
    let mut json = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read identity file: {e}"))?;

    let parsed: Result<IdentityFileData, _> = serde_json::from_str(&json);
    json.zeroize();
    let data = parsed.map_err(|e| format!("failed to parse identity file: {e}"))?;

    if data.version != CURRENT_VERSION {
        return Err(format!(
            "unsupported identity version {} (expected {CURRENT_VERSION})",
            data.version,
        ));
    }

    let mut seed = hex_decode_fixed::<32>(&data.seed, "seed")?;
    let public_key = hex_decode_fixed::<32>(&data.public_key, "public_key")?;
    let keypair = Keypair::from_seed(&seed);
    seed.zeroize();

    if keypair.public_key() != public_key {
        return Err("identity file public_key does not match its seed".into());
    }
    Ok(keypair)
}

fn hex_decode_fixed<const N: usize>(hex_str: &str, field: &str) -> Result<[u8; N], String> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| format!("invalid {field} hex: {e}"))?;
    if bytes.len() != N {
        return Err(format!("{field} must be {N} bytes, got {}", bytes.len()));
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| format!("failed to restrict identity file permissions: {e}"))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), String> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_dir() -> std::io::Result<PathBuf> {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "chaintext_identity_test_{}_{}",
            std::process::id(),
            n,
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    #[test]
    fn created_identity_is_reloaded() -> TestResult {
        let dir = temp_dir()?;
        let path = dir.join("identity.json");

        let first = load_or_create(&path)?;
        let second = load_or_create(&path)?;
        assert_eq!(first.public_key(), second.public_key());

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[test]
    fn mismatched_public_key_rejected() -> TestResult {
        let dir = temp_dir()?;
        let path = dir.join("identity.json");
        let keypair = Keypair::generate();
        let other = Keypair::generate();

        let json = serde_json::json!({
            "version": 1,
            "public_key": hex::encode(other.public_key()),
            "seed": hex::encode(keypair.seed()),
        });
        std::fs::write(&path, json.to_string())?;
        assert!(load_identity(&path).is_err());

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[test]
    fn unknown_version_rejected() -> TestResult {
        let dir = temp_dir()?;
        let path = dir.join("identity.json");
        let keypair = Keypair::generate();

        let json = serde_json::json!({
            "version": 7,
            "public_key": hex::encode(keypair.public_key()),
            "seed": hex::encode(keypair.seed()),
        });
        std::fs::write(&path, json.to_string())?;
        assert!(load_identity(&path).is_err());

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }
}
