//! Known-vector tests for cryptographic primitives.
//!
//! Test vectors sourced from:
//! - Ed25519: RFC 8032 §7.1, TEST 1
//! - SHA-256: FIPS 180-2 examples
//! - Block hash: fixed two-block chain, preimages computed independently

use chaintext_crypto::aead::{PayloadCipher, PayloadKey, XChaChaCipher};
use chaintext_crypto::hash::{compute_block_hash, sha256};
use chaintext_crypto::signing::{
    verify, BlockSigner, Ed25519Signer, Ed25519Verifier, Keypair, SignatureVerifier,
};
use chaintext_types::{BlockHash, ChaintextError, RoomId, Timestamp};

// ===================================================================
// Ed25519: RFC 8032 §7.1, TEST 1 (empty message)
// ===================================================================

const RFC8032_SEED: [u8; 32] = [
    0x9d, 0x61, 0xb1, 0x9d, 0xef, 0xfd, 0x5a, 0x60,
    0xba, 0x84, 0x4a, 0xf4, 0x92, 0xec, 0x2c, 0xc4,
    0x44, 0x49, 0xc5, 0x69, 0x7b, 0x32, 0x69, 0x19,
    0x70, 0x3b, 0xac, 0x03, 0x1c, 0xae, 0x7f, 0x60,
];

#[test]
fn ed25519_rfc8032_test1_sign_verify() -> std::result::Result<(), ChaintextError> {
    let expected_pubkey: [u8; 32] = [
        0xd7, 0x5a, 0x98, 0x01, 0x82, 0xb1, 0x0a, 0xb7,
        0xd5, 0x4b, 0xfe, 0xd3, 0xc9, 0x64, 0x07, 0x3a,
        0x0e, 0xe1, 0x72, 0xf3, 0xda, 0xa6, 0x23, 0x25,
        0xaf, 0x02, 0x1a, 0x68, 0xf7, 0x07, 0x51, 0x1a,
    ];
    let expected_sig: [u8; 64] = [
        0xe5, 0x56, 0x43, 0x00, 0xc3, 0x60, 0xac, 0x72,
        0x90, 0x86, 0xe2, 0xcc, 0x80, 0x6e, 0x82, 0x8a,
        0x84, 0x87, 0x7f, 0x1e, 0xb8, 0xe5, 0xd9, 0x74,
        0xd8, 0x73, 0xe0, 0x65, 0x22, 0x49, 0x01, 0x55,
        0x5f, 0xb8, 0x82, 0x15, 0x90, 0xa3, 0x3b, 0xac,
        0xc6, 0x1e, 0x39, 0x70, 0x1c, 0xf9, 0xb4, 0x6b,
        0xd2, 0x5b, 0xf5, 0xf0, 0x59, 0x5b, 0xbe, 0x24,
        0x65, 0x51, 0x41, 0x43, 0x8e, 0x7a, 0x10, 0x0b,
    ];

    let kp = Keypair::from_seed(&RFC8032_SEED);
    assert_eq!(kp.public_key(), expected_pubkey);

    let sig = kp.sign(b"");
    assert_eq!(sig, expected_sig);

    verify(&kp.public_key(), b"", &sig)?;
    Ok(())
}

#[test]
fn ed25519_signer_identity_is_rfc_pubkey() {
    let signer = Ed25519Signer::new(Keypair::from_seed(&RFC8032_SEED));
    assert_eq!(
        signer.identity().as_str(),
        "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
    );
}

// ===================================================================
// SHA-256: FIPS 180-2
// ===================================================================

#[test]
fn sha256_empty() {
    assert_eq!(
        hex::encode(sha256(b"")),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

// ===================================================================
// Block hash: fixed two-block chain
// ===================================================================

#[test]
fn block_hash_fixed_chain() -> std::result::Result<(), ChaintextError> {
    let t0 = Timestamp::from_millis(1_700_000_000_000)?;
    let t1 = Timestamp::from_millis(1_700_000_001_000)?;

    let genesis = compute_block_hash(b"hello", &t0, None);
    assert_eq!(
        genesis.to_hex(),
        "e09fbba04c9810fd072fba840c105c0a3751ae9dd6d01745c21447fabfab7c34"
    );

    let second = compute_block_hash(b"world", &t1, Some(&genesis));
    assert_eq!(
        second.to_hex(),
        "7059538e533724937590ab18cbcf0b12b289f6262c60f95b7f680385a530c038"
    );
    Ok(())
}

#[test]
fn signature_over_block_hash_verifies() -> std::result::Result<(), ChaintextError> {
    let signer = Ed25519Signer::new(Keypair::from_seed(&RFC8032_SEED));
    let hash = BlockHash::new(sha256(b"block"));
    let sig = signer.sign(&hash)?;

    assert!(Ed25519Verifier.verify(&hash, &sig, &signer.identity()));
    assert!(!Ed25519Verifier.verify(&BlockHash::new([0; 32]), &sig, &signer.identity()));
    Ok(())
}

// ===================================================================
// Payload cipher
// ===================================================================

#[test]
fn payload_tamper_rejected() -> std::result::Result<(), ChaintextError> {
    let key = PayloadKey::for_room(&RoomId::default());
    let mut sealed = XChaChaCipher.seal(b"message body", &key)?;
    if let Some(byte) = sealed.last_mut() {
        *byte ^= 0xFF;
    }
    assert!(XChaChaCipher.open(&sealed, &key).is_err());
    Ok(())
}
