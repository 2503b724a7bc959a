//! XChaCha20-Poly1305 payload sealing.
//!
//! Message bodies are sealed before they enter a block; the overlay
//! itself only ever sees ciphertext. [`PayloadCipher`] is the pluggable
//! capability, [`XChaChaCipher`] the default. Sealed payloads are laid
//! out as `nonce (24) || ciphertext || tag (16)`.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use chaintext_types::{ChaintextError, Result, RoomId};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hash::derive_room_key;

// ---------------------------------------------------------------------------
// PayloadKey
// ---------------------------------------------------------------------------

/// 256-bit symmetric key used to seal and open payloads.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PayloadKey([u8; 32]);

impl PayloadKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The shared key for a room.
    pub fn for_room(room: &RoomId) -> Self {
        Self(derive_room_key(room))
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for PayloadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PayloadKey(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// AeadNonce
// ---------------------------------------------------------------------------

/// 192-bit (24-byte) nonce for XChaCha20-Poly1305.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AeadNonce([u8; 24]);

impl AeadNonce {
    /// Fixed byte length of an XChaCha20-Poly1305 nonce.
    pub const LEN: usize = 24;

    /// Creates an [`AeadNonce`] from raw bytes.
    pub fn from_bytes(bytes: [u8; 24]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying 24-byte array.
    pub fn as_bytes(&self) -> &[u8; 24] {
        &self.0
    }
}

/// Generates a fresh random nonce from OS entropy.
pub fn generate_aead_nonce() -> AeadNonce {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);
    AeadNonce(bytes)
}

// ---------------------------------------------------------------------------
// Encrypt / Decrypt
// ---------------------------------------------------------------------------

/// Encrypts `plaintext` with XChaCha20-Poly1305.
///
/// Returns the ciphertext with the 16-byte tag appended. The nonce is
/// not included; see [`XChaChaCipher`] for the framed layout.
///
/// # Errors
///
/// Returns [`ChaintextError::CryptoError`] if the cipher rejects the
/// input.
pub fn encrypt_xchacha20(
    key: &PayloadKey,
    nonce: &AeadNonce,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let xnonce = XNonce::from_slice(&nonce.0);

    cipher
        .encrypt(xnonce, Payload { msg: plaintext, aad })
        .map_err(|e| ChaintextError::CryptoError {
            reason: format!("XChaCha20-Poly1305 encryption failed: {e}"),
        })
}

/// Decrypts `ciphertext` (tag appended) with XChaCha20-Poly1305.
///
/// # Errors
///
/// Returns [`ChaintextError::CryptoError`] if tag verification fails:
/// wrong key, wrong nonce, tampered ciphertext, or wrong AAD.
pub fn decrypt_xchacha20(
    key: &PayloadKey,
    nonce: &AeadNonce,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let xnonce = XNonce::from_slice(&nonce.0);

    cipher
        .decrypt(xnonce, Payload { msg: ciphertext, aad })
        .map_err(|e| ChaintextError::CryptoError {
            reason: format!("XChaCha20-Poly1305 decryption failed: {e}"),
        })
}

// ---------------------------------------------------------------------------
// PayloadCipher
// ---------------------------------------------------------------------------

/// Seals message bodies before they are placed in a block and opens
/// them for display.
pub trait PayloadCipher: Send + Sync {
    /// Seals `plaintext` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::CryptoError`] on cipher failure.
    fn seal(&self, plaintext: &[u8], key: &PayloadKey) -> Result<Vec<u8>>;

    /// Opens a payload produced by [`PayloadCipher::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::CryptoError`] if the payload is
    /// truncated or does not authenticate under `key`.
    fn open(&self, sealed: &[u8], key: &PayloadKey) -> Result<Vec<u8>>;
}

/// Default [`PayloadCipher`]: XChaCha20-Poly1305 with a random nonce
/// prepended to the ciphertext.
#[derive(Clone, Copy, Debug, Default)]
pub struct XChaChaCipher;

/// Smallest valid sealed payload: nonce plus tag.
const MIN_SEALED_LEN: usize = AeadNonce::LEN + 16;

impl PayloadCipher for XChaChaCipher {
    fn seal(&self, plaintext: &[u8], key: &PayloadKey) -> Result<Vec<u8>> {
        let nonce = generate_aead_nonce();
        let ciphertext = encrypt_xchacha20(key, &nonce, plaintext, &[])?;

        let mut sealed = Vec::with_capacity(AeadNonce::LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_bytes());
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8], key: &PayloadKey) -> Result<Vec<u8>> {
        if sealed.len() < MIN_SEALED_LEN {
            return Err(ChaintextError::CryptoError {
                reason: format!(
                    "sealed payload too short: {} bytes, need at least {MIN_SEALED_LEN}",
                    sealed.len()
                ),
            });
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(AeadNonce::LEN);
        let mut nonce = [0u8; 24];
        nonce.copy_from_slice(nonce_bytes);
        decrypt_xchacha20(key, &AeadNonce::from_bytes(nonce), ciphertext, &[])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() -> Result<()> {
        let key = PayloadKey::from_bytes([0x42; 32]);
        let nonce = generate_aead_nonce();

        let ciphertext = encrypt_xchacha20(&key, &nonce, b"hello chaintext", b"aad")?;
        assert_eq!(ciphertext.len(), b"hello chaintext".len() + 16);

        let plaintext = decrypt_xchacha20(&key, &nonce, &ciphertext, b"aad")?;
        assert_eq!(plaintext, b"hello chaintext");
        Ok(())
    }

    #[test]
    fn wrong_aad_fails_decrypt() -> Result<()> {
        let key = PayloadKey::from_bytes([0x42; 32]);
        let nonce = generate_aead_nonce();

        let ciphertext = encrypt_xchacha20(&key, &nonce, b"secret", b"correct")?;
        assert!(decrypt_xchacha20(&key, &nonce, &ciphertext, b"wrong").is_err());
        Ok(())
    }

    #[test]
    fn sealed_layout_prefixes_nonce() -> Result<()> {
        let key = PayloadKey::from_bytes([1; 32]);
        let sealed = XChaChaCipher.seal(b"abc", &key)?;
        assert_eq!(sealed.len(), AeadNonce::LEN + 3 + 16);
        Ok(())
    }

    #[test]
    fn seal_open_with_room_key() -> Result<()> {
        let room = RoomId::new("lobby")?;
        let key = PayloadKey::for_room(&room);

        let sealed = XChaChaCipher.seal(b"hi from lobby", &key)?;
        assert_eq!(XChaChaCipher.open(&sealed, &key)?, b"hi from lobby");
        Ok(())
    }

    #[test]
    fn other_room_cannot_open() -> Result<()> {
        let lobby = PayloadKey::for_room(&RoomId::new("lobby")?);
        let dev = PayloadKey::for_room(&RoomId::new("dev")?);

        let sealed = XChaChaCipher.seal(b"private", &lobby)?;
        assert!(XChaChaCipher.open(&sealed, &dev).is_err());
        Ok(())
    }

    #[test]
    fn sealing_twice_differs() -> Result<()> {
        let key = PayloadKey::from_bytes([5; 32]);
        let a = XChaChaCipher.seal(b"same", &key)?;
        let b = XChaChaCipher.seal(b"same", &key)?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn truncated_payload_rejected() {
        let key = PayloadKey::from_bytes([5; 32]);
        assert!(XChaChaCipher.open(&[0u8; 20], &key).is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let key = PayloadKey::from_bytes([0xAB; 32]);
        assert!(!format!("{key:?}").contains("ab"));
    }
}
