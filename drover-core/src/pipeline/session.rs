//! Upload session
//!
//! Derives the upload endpoint, device identity, and an ephemeral
//! encryption keypair from a pipeline configuration. A session is created
//! whenever configuration arrives and torn down on process restart; only
//! the queue store persists across sessions.

use x25519_dalek::{PublicKey, StaticSecret};

use crate::config::PipelineConfig;
use crate::error::Result;

use super::crypto::{generate_keypair, parse_public_key, FieldCrypto};

/// Per-session upload identity and key material
pub struct UploadSession {
    /// Collection endpoint URL
    pub endpoint: String,
    /// Device identifier stamped as metadata `source`
    pub identifier: String,
    /// Server-published public field key; encryption disabled when absent
    server_field_key: Option<PublicKey>,
    /// Fresh keypair per session: compromise of one session's secret does
    /// not expose earlier bundles
    local_secret: StaticSecret,
    local_public: PublicKey,
}

impl UploadSession {
    /// Build a session from a ready configuration.
    ///
    /// Returns `None` while the configuration lacks an endpoint or
    /// identifier; the caller retries. A malformed field key disables
    /// encryption for the session rather than blocking uploads, since the
    /// queue would otherwise grow without bound.
    pub fn from_config(config: &PipelineConfig) -> Result<Option<Self>> {
        if !config.is_ready() {
            return Ok(None);
        }

        let server_field_key = match config.field_key.as_deref() {
            Some(encoded) if !encoded.is_empty() => match parse_public_key(encoded) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed server field key");
                    None
                }
            },
            _ => None,
        };

        let (local_secret, local_public) = generate_keypair();

        tracing::info!(
            endpoint = %config.endpoint.as_deref().unwrap_or_default(),
            encryption = server_field_key.is_some(),
            "Upload session established"
        );

        Ok(Some(Self {
            endpoint: config.endpoint.clone().unwrap_or_default(),
            identifier: config.identifier.clone().unwrap_or_default(),
            server_field_key,
            local_secret,
            local_public,
        }))
    }

    /// Session cipher, or `None` when the server publishes no field key
    /// (marked fields then pass through as plaintext).
    pub fn field_crypto(&self) -> Option<FieldCrypto> {
        self.server_field_key
            .as_ref()
            .map(|server_key| FieldCrypto::new(&self.local_secret, server_key))
    }

    /// Public half of the session keypair. The server derives the same
    /// shared secret from this key and its own static field key.
    pub fn local_public(&self) -> &PublicKey {
        &self.local_public
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    fn ready_config(field_key: Option<String>) -> PipelineConfig {
        PipelineConfig {
            endpoint: Some("https://pdk.example.com/data/".to_string()),
            identifier: Some("device-123".to_string()),
            field_key,
        }
    }

    #[test]
    fn test_not_ready_config_yields_no_session() {
        let config = PipelineConfig::default();
        assert!(UploadSession::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_session_without_field_key_disables_encryption() {
        let session = UploadSession::from_config(&ready_config(None))
            .unwrap()
            .unwrap();
        assert!(session.field_crypto().is_none());
        assert_eq!(session.identifier, "device-123");
    }

    #[test]
    fn test_session_with_field_key_enables_encryption() {
        let (_, server_public) = generate_keypair();
        let encoded = BASE64.encode(server_public.as_bytes());

        let session = UploadSession::from_config(&ready_config(Some(encoded)))
            .unwrap()
            .unwrap();
        assert!(session.field_crypto().is_some());
    }

    #[test]
    fn test_malformed_field_key_falls_back_to_plaintext() {
        let session = UploadSession::from_config(&ready_config(Some("@@@".to_string())))
            .unwrap()
            .unwrap();
        assert!(session.field_crypto().is_none());
    }

    #[test]
    fn test_keypair_regenerated_per_session() {
        let config = ready_config(None);
        let a = UploadSession::from_config(&config).unwrap().unwrap();
        let b = UploadSession::from_config(&config).unwrap().unwrap();
        assert_ne!(a.local_public().as_bytes(), b.local_public().as_bytes());
    }
}
