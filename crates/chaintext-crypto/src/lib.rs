//! Cryptographic primitives for the ChainText overlay.
//!
//! This crate is the **sole** location for all cryptographic operations.
//! No other crate in the workspace may perform raw crypto directly.
//!
//! # Modules
//!
//! - [`hash`]: SHA-256 block hashing and room key derivation
//! - [`signing`]: Ed25519 keypairs and the signing/verification providers
//! - [`aead`]: XChaCha20-Poly1305 sealing and the payload cipher provider

pub mod aead;
pub mod hash;
pub mod signing;
