//! Client-side keypair generation and letter sealing.
//!
//! This is the one place the §6.3 "opaque encrypted envelope" boundary
//! is actually instantiated. The ledger never looks inside a sealed
//! letter; it only stores and returns the bytes this module produces.
//!
//! Sealing is an anonymous X25519 sealed box: an ephemeral keypair is
//! generated per letter, a shared secret is derived via Diffie-Hellman
//! against the recipient's static public key, and HKDF-SHA256 expands
//! that shared secret into an XChaCha20-Poly1305 key. The ephemeral
//! public key travels alongside the ciphertext so the recipient can
//! redo the same derivation with their secret key.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

const NONCE_LEN: usize = 24;
const HKDF_INFO: &[u8] = b"letter-seal-v1";

/// Errors from keypair generation, sealing, and opening.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The encrypted envelope was not valid base64/JSON.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A hex field inside the envelope was not valid hex.
    #[error("invalid hex in envelope: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// A key or nonce field had the wrong length.
    #[error("invalid field length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Decryption failed: wrong key, tampered ciphertext, or both.
    #[error("decryption failed (wrong key or tampered envelope)")]
    DecryptionFailed,
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// An X25519 identity: a long-lived keypair used to receive letters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Hex-encoded X25519 public key.
    pub public_key: String,
    /// Hex-encoded X25519 secret key.
    pub secret_key: String,
    /// Stable fingerprint derived from the public key (the ledger's `ownerFingerprint`).
    pub fingerprint: String,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let fp = fingerprint(public.as_bytes());
        Self {
            public_key: hex::encode(public.as_bytes()),
            secret_key: hex::encode(secret.to_bytes()),
            fingerprint: fp,
        }
    }

    fn public(&self) -> Result<PublicKey> {
        decode_key(&self.public_key).map(PublicKey::from)
    }

    fn secret(&self) -> Result<StaticSecret> {
        decode_key(&self.secret_key).map(StaticSecret::from)
    }
}

/// Hex digest of a recipient public key, used only for lookup
/// (SPEC §3 Letter Entry `ownerFingerprint`). Never used for crypto.
pub fn fingerprint(public_key_bytes: &[u8]) -> String {
    hex::encode(blake3::hash(public_key_bytes).as_bytes())
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    ephemeral_public: String,
    nonce: String,
    ciphertext: String,
}

/// Seal `plaintext` so only the holder of `recipient_public_key_hex` can open it.
///
/// Returns the opaque envelope as a base64 string — this is exactly the
/// `payload` field the ledger stores verbatim (§6.3).
pub fn seal(plaintext: &[u8], recipient_public_key_hex: &str) -> Result<String> {
    let recipient_public = PublicKey::from(decode_key(recipient_public_key_hex)?);

    let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);
    let shared = ephemeral_secret.diffie_hellman(&recipient_public);

    let key = derive_key(shared.as_bytes(), ephemeral_public.as_bytes());
    let cipher = XChaCha20Poly1305::new((&key).into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let envelope = Envelope {
        ephemeral_public: hex::encode(ephemeral_public.as_bytes()),
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    };

    let json = serde_json::to_string(&envelope)
        .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
    Ok(STANDARD.encode(json))
}

/// Open an envelope produced by [`seal`] using the recipient's identity.
pub fn open(envelope_b64: &str, recipient: &Identity) -> Result<Vec<u8>> {
    let json = STANDARD
        .decode(envelope_b64)
        .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
    let envelope: Envelope = serde_json::from_slice(&json)
        .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;

    let ephemeral_public_bytes = decode_key(&envelope.ephemeral_public)?;
    let ephemeral_public = PublicKey::from(ephemeral_public_bytes);

    let nonce_bytes = hex::decode(&envelope.nonce)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::InvalidLength {
            expected: NONCE_LEN,
            actual: nonce_bytes.len(),
        });
    }
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = hex::decode(&envelope.ciphertext)?;

    let secret = recipient.secret()?;
    let shared = secret.diffie_hellman(&ephemeral_public);
    let key = derive_key(shared.as_bytes(), &ephemeral_public_bytes);
    let cipher = XChaCha20Poly1305::new((&key).into());

    cipher
        .decrypt(nonce, ciphertext.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed)
}

fn derive_key(shared_secret: &[u8], ephemeral_public: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(ephemeral_public), shared_secret);
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

fn decode_key(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str)?;
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let recipient = Identity::generate();
        let plaintext = b"hello, letter";

        let sealed = seal(plaintext, &recipient.public_key).unwrap();
        let opened = open(&sealed, &recipient).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn wrong_recipient_fails_to_open() {
        let recipient = Identity::generate();
        let attacker = Identity::generate();

        let sealed = seal(b"secret", &recipient.public_key).unwrap();
        let result = open(&sealed, &attacker);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn tampered_envelope_fails_to_open() {
        let recipient = Identity::generate();
        let sealed = seal(b"secret", &recipient.public_key).unwrap();

        let mut json_bytes = STANDARD.decode(&sealed).unwrap();
        // Flip a byte inside the JSON ciphertext field.
        let flip_at = json_bytes.len() / 2;
        json_bytes[flip_at] ^= 0xFF;
        let tampered = STANDARD.encode(json_bytes);

        let result = open(&tampered, &recipient);
        assert!(result.is_err());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let identity = Identity::generate();
        let pub_bytes = hex::decode(&identity.public_key).unwrap();
        assert_eq!(fingerprint(&pub_bytes), identity.fingerprint);
        assert_eq!(fingerprint(&pub_bytes), fingerprint(&pub_bytes));
    }

    #[test]
    fn different_identities_have_different_fingerprints() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn seal_is_randomized() {
        let recipient = Identity::generate();
        let a = seal(b"same message", &recipient.public_key).unwrap();
        let b = seal(b"same message", &recipient.public_key).unwrap();
        assert_ne!(a, b, "fresh ephemeral keys must make ciphertexts differ");
    }
}
