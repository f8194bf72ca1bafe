//! Field encryption layer
//!
//! Selective per-field authenticated encryption keyed by a naming
//! convention: a field whose name ends with `!` is sensitive. Its value is
//! serialized to JSON, sealed, and re-emitted under the same name with `!`
//! swapped for `~`; the original key never appears in the output.
//!
//! The box construction is x25519 Diffie-Hellman (ephemeral local secret x
//! stable server public key) -> HKDF-SHA256 -> XChaCha20-Poly1305 with a
//! random 24-byte nonce prepended to the ciphertext, base64-encoded for
//! transport. The local keypair is regenerated every upload session, so a
//! compromised session key exposes only that session's bundles.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};

/// Suffix marking a field as sensitive
pub const SENSITIVE_MARKER: char = '!';

/// Suffix replacing the marker on encrypted output fields
pub const ENCRYPTED_MARKER: char = '~';

const NONCE_LEN: usize = 24;
const HKDF_INFO: &[u8] = b"drover-field-key";

/// Sealed-field cipher for one upload session.
///
/// Symmetric by construction: the server derives the same key from its
/// secret key and the session's public key, which is also what the
/// round-trip tests do.
pub struct FieldCrypto {
    cipher: XChaCha20Poly1305,
}

impl FieldCrypto {
    /// Derive the session cipher from one side's secret key and the other
    /// side's public key.
    pub fn new(secret: &StaticSecret, public: &PublicKey) -> Self {
        let shared = secret.diffie_hellman(public);
        let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut key = [0u8; 32];
        hkdf.expand(HKDF_INFO, &mut key)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// Recursively replace marker-tagged fields with sealed ciphertext.
    ///
    /// Pure transform: returns a new tree, never mutates the input. Plain
    /// nested objects and arrays are recursed into; scalars pass through.
    pub fn encrypt_fields(&self, payload: &serde_json::Value) -> Result<serde_json::Value> {
        match payload {
            serde_json::Value::Object(fields) => {
                let mut out = serde_json::Map::with_capacity(fields.len());
                for (key, value) in fields {
                    if let Some(stem) = key.strip_suffix(SENSITIVE_MARKER) {
                        let sealed = self.seal(value)?;
                        out.insert(
                            format!("{}{}", stem, ENCRYPTED_MARKER),
                            serde_json::Value::String(sealed),
                        );
                    } else if value.is_object() || value.is_array() {
                        out.insert(key.clone(), self.encrypt_fields(value)?);
                    } else {
                        out.insert(key.clone(), value.clone());
                    }
                }
                Ok(serde_json::Value::Object(out))
            }
            serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| self.encrypt_fields(item))
                    .collect::<Result<Vec<_>>>()?,
            )),
            scalar => Ok(scalar.clone()),
        }
    }

    /// Seal one value: base64(nonce || ciphertext) over its JSON encoding.
    fn seal(&self, value: &serde_json::Value) -> Result<String> {
        let plaintext = serde_json::to_vec(value)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from(nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| Error::Crypto("field encryption failed".to_string()))?;

        let mut boxed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        boxed.extend_from_slice(&nonce_bytes);
        boxed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(boxed))
    }

    /// Open a sealed field back to its original value.
    ///
    /// The decode side of the contract belongs to the server; this exists
    /// for diagnostics and round-trip verification.
    pub fn open(&self, sealed: &str) -> Result<serde_json::Value> {
        let boxed = BASE64
            .decode(sealed)
            .map_err(|e| Error::Crypto(format!("invalid sealed field encoding: {}", e)))?;
        if boxed.len() < NONCE_LEN {
            return Err(Error::Crypto("sealed field too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = boxed.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Crypto("field authentication failed".to_string()))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Generate a fresh session keypair.
pub fn generate_keypair() -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// Parse a base64-encoded 32-byte public key as published by the server.
pub fn parse_public_key(encoded: &str) -> Result<PublicKey> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| Error::Crypto(format!("invalid field key encoding: {}", e)))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Crypto("field key must decode to 32 bytes".to_string()))?;
    Ok(PublicKey::from(bytes))
}
