//! TLS server configuration.
//!
//! Connections whose first byte is a TLS handshake record (`0x16`) get a
//! rustls server session built from this configuration. Decrypted bytes
//! then go through the usual HTTP / WebSocket negotiation.

use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::TransportError;

/// A ready-to-use rustls server configuration.
#[derive(Clone)]
pub struct TlsSettings {
    config: Arc<ServerConfig>,
}

impl TlsSettings {
    /// Loads a PEM certificate chain and private key.
    ///
    /// # Errors
    /// Fails if either file cannot be read, contains no usable entry, or
    /// rustls rejects the pair.
    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, TransportError> {
        let cert_pem = std::fs::read(cert_path.as_ref())?;
        let key_pem = std::fs::read(key_path.as_ref())?;

        let certs = rustls_pemfile::certs(&mut &cert_pem[..]).collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err(TransportError::Certificate(format!(
                "no certificates in {}",
                cert_path.as_ref().display()
            )));
        }
        let key = rustls_pemfile::private_key(&mut &key_pem[..])?.ok_or_else(|| {
            TransportError::Certificate(format!(
                "no private key in {}",
                key_path.as_ref().display()
            ))
        })?;

        Self::from_der(certs, key)
    }

    /// Generates a self-signed certificate for `names`. Development only.
    pub fn self_signed(names: &[&str]) -> Result<Self, TransportError> {
        let names: Vec<String> = names.iter().map(|n| (*n).to_owned()).collect();
        let cert = rcgen::generate_simple_self_signed(names)
            .map_err(|e| TransportError::Certificate(e.to_string()))?;
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
        Self::from_der(vec![cert_der], key_der.into())
    }

    /// Builds settings from DER-encoded material.
    pub fn from_der(
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, TransportError> {
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings").finish_non_exhaustive()
    }
}
