//! Ed25519 block signing and verification.
//!
//! The overlay treats signing as a pluggable capability: [`BlockSigner`]
//! produces a signature over a block hash, [`SignatureVerifier`] checks
//! one against a claimed [`Identity`]. The Ed25519 implementations here
//! are the defaults. A block is signed over the lowercase hex rendering
//! of its hash, so any provider that signs strings interoperates.
//!
//! The private key is zeroized on drop via `ed25519-dalek`'s
//! `ZeroizeOnDrop`.

use chaintext_types::{BlockHash, BlockSignature, ChaintextError, Identity, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

// ---------------------------------------------------------------------------
// Provider traits
// ---------------------------------------------------------------------------

/// Produces signatures over block hashes on behalf of the local author.
pub trait BlockSigner: Send + Sync {
    /// Identity recorded as `sender` on blocks this signer authors.
    fn identity(&self) -> Identity;

    /// Signs `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`ChaintextError::CryptoError`] if the provider cannot
    /// produce a signature (locked key, unavailable device).
    fn sign(&self, hash: &BlockHash) -> Result<BlockSignature>;
}

/// Checks a block signature against the identity that claims it.
pub trait SignatureVerifier: Send + Sync {
    /// Returns `true` if `signature` is a valid signature by `sender`
    /// over `hash`. Malformed inputs verify as `false`.
    fn verify(&self, hash: &BlockHash, signature: &BlockSignature, sender: &Identity) -> bool;
}

// ---------------------------------------------------------------------------
// Keypair
// ---------------------------------------------------------------------------

/// Ed25519 signing keypair.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generates a new random keypair using OS-level entropy.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstructs a keypair deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Returns the secret seed. Callers persisting it are responsible
    /// for protecting the file.
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Returns the 32-byte verifying key.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Signs an arbitrary message. Deterministic per RFC 8032.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Verifies an Ed25519 signature over `message`.
///
/// Uses `verify_strict`, which rejects small-order and non-canonical
/// public keys.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
    let vk = VerifyingKey::from_bytes(public_key).map_err(|e| ChaintextError::CryptoError {
        reason: format!("invalid public key: {e}"),
    })?;
    let sig = Signature::from_bytes(signature);
    vk.verify_strict(message, &sig)
        .map_err(|e| ChaintextError::CryptoError {
            reason: format!("signature verification failed: {e}"),
        })
}

/// Parses an [`Identity`] produced by [`Ed25519Signer`] back into a
/// verifying key.
pub fn identity_to_public_key(identity: &Identity) -> Result<[u8; 32]> {
    let bytes = hex::decode(identity.as_str()).map_err(|e| ChaintextError::CryptoError {
        reason: format!("identity is not hex: {e}"),
    })?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| ChaintextError::CryptoError {
        reason: format!("identity must be 32 bytes, got {}", bytes.len()),
    })
}

// ---------------------------------------------------------------------------
// Ed25519 providers
// ---------------------------------------------------------------------------

/// Default [`BlockSigner`]: Ed25519 over the hex block hash.
///
/// The identity is the hex-encoded verifying key.
#[derive(Debug)]
pub struct Ed25519Signer {
    keypair: Keypair,
}

impl Ed25519Signer {
    /// Wraps an existing keypair.
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Creates a signer with a freshly generated keypair.
    pub fn generate() -> Self {
        Self::new(Keypair::generate())
    }

    /// Returns the underlying keypair.
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl BlockSigner for Ed25519Signer {
    fn identity(&self) -> Identity {
        Identity::new(hex::encode(self.keypair.public_key()))
    }

    fn sign(&self, hash: &BlockHash) -> Result<BlockSignature> {
        let sig = self.keypair.sign(hash.to_hex().as_bytes());
        Ok(BlockSignature::new(sig.to_vec()))
    }
}

/// Default [`SignatureVerifier`] matching [`Ed25519Signer`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, hash: &BlockHash, signature: &BlockSignature, sender: &Identity) -> bool {
        let public_key = match identity_to_public_key(sender) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let sig = match <[u8; 64]>::try_from(signature.as_bytes()) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        verify(&public_key, hash.to_hex().as_bytes(), &sig).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify() -> Result<()> {
        let kp = Keypair::generate();
        let sig = kp.sign(b"chaintext");
        verify(&kp.public_key(), b"chaintext", &sig)
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"original");
        assert!(verify(&kp.public_key(), b"tampered", &sig).is_err());
    }

    #[test]
    fn from_seed_is_deterministic() {
        let seed = [42u8; 32];
        let a = Keypair::from_seed(&seed);
        let b = Keypair::from_seed(&seed);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.seed(), seed);
    }

    #[test]
    fn block_signer_roundtrip() -> Result<()> {
        let signer = Ed25519Signer::generate();
        let hash = BlockHash::new([7u8; 32]);
        let sig = signer.sign(&hash)?;
        assert!(Ed25519Verifier.verify(&hash, &sig, &signer.identity()));
        Ok(())
    }

    #[test]
    fn verifier_rejects_other_identity() -> Result<()> {
        let alice = Ed25519Signer::generate();
        let mallory = Ed25519Signer::generate();
        let hash = BlockHash::new([1u8; 32]);
        let sig = alice.sign(&hash)?;
        assert!(!Ed25519Verifier.verify(&hash, &sig, &mallory.identity()));
        Ok(())
    }

    #[test]
    fn verifier_rejects_malformed_inputs() -> Result<()> {
        let signer = Ed25519Signer::generate();
        let hash = BlockHash::new([3u8; 32]);
        let sig = signer.sign(&hash)?;

        assert!(!Ed25519Verifier.verify(&hash, &sig, &Identity::new("not-hex")));
        let short = BlockSignature::new(vec![0u8; 10]);
        assert!(!Ed25519Verifier.verify(&hash, &short, &signer.identity()));
        Ok(())
    }

    #[test]
    fn identity_is_hex_public_key() -> Result<()> {
        let signer = Ed25519Signer::new(Keypair::from_seed(&[9u8; 32]));
        let pk = identity_to_public_key(&signer.identity())?;
        assert_eq!(pk, signer.keypair().public_key());
        Ok(())
    }
}
