//! The `tls` module builds the transport-security configuration used to dial
//! the broker.
//!
//! Three modes exist, selected by the integers the relay has always accepted:
//!
//! - `0` disabled: no TLS configuration is produced. The broker URI still
//!   uses the `amqps` scheme; the AMQP client then falls back to its own
//!   defaults.
//! - `1` insecure: the server certificate is **not** verified. Intended for
//!   test brokers with self-signed certificates only.
//! - `2` secure: the server chain must resolve to one of the CA certificates
//!   supplied as PEM text.

mod errors;
mod verifier;

use std::fmt;
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::ServerCertVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::CertificateDer;
use rustls_pki_types::pem::PemObject;
use serde::Deserialize;
use tracing::{debug, warn};

pub use errors::TlsError;
use verifier::SkipServerVerification;

/// Transport-security mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(try_from = "u8")]
pub enum TlsMode {
    #[default]
    Disabled,
    Insecure,
    Secure,
}

impl TryFrom<u8> for TlsMode {
    type Error = TlsError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TlsMode::Disabled),
            1 => Ok(TlsMode::Insecure),
            2 => Ok(TlsMode::Secure),
            other => Err(TlsError::InvalidMode(other)),
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsMode::Disabled => write!(f, "disabled"),
            TlsMode::Insecure => write!(f, "insecure (no server verification)"),
            TlsMode::Secure => write!(f, "secure"),
        }
    }
}

/// A ready-to-use client TLS configuration.
///
/// The verifier is kept next to the `ClientConfig` so callers (and tests) can
/// check a certificate chain without performing a handshake.
#[derive(Debug, Clone)]
pub struct TransportSecurity {
    mode: TlsMode,
    config: Arc<ClientConfig>,
    verifier: Arc<dyn ServerCertVerifier>,
}

impl TransportSecurity {
    pub fn mode(&self) -> TlsMode {
        self.mode
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    pub fn verifier(&self) -> Arc<dyn ServerCertVerifier> {
        self.verifier.clone()
    }
}

/// The crypto provider every configuration is built with.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Builds the transport-security configuration for `mode`.
///
/// Returns `Ok(None)` for [`TlsMode::Disabled`]. `ca_pem` is ignored in
/// insecure mode and required in secure mode, where it must contain at least
/// one certificate.
pub fn build(mode: TlsMode, ca_pem: Option<&str>) -> Result<Option<TransportSecurity>, TlsError> {
    let provider = crypto_provider();

    match mode {
        TlsMode::Disabled => Ok(None),
        TlsMode::Insecure => {
            warn!("TLS server verification is DISABLED; do not use this mode in production");
            let verifier: Arc<dyn ServerCertVerifier> =
                Arc::new(SkipServerVerification::new(provider.clone()));
            let config = ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()?
                .dangerous()
                .with_custom_certificate_verifier(verifier.clone())
                .with_no_client_auth();

            Ok(Some(TransportSecurity {
                mode,
                config: Arc::new(config),
                verifier,
            }))
        }
        TlsMode::Secure => {
            let roots = root_store_from_pem(ca_pem.ok_or(TlsError::MissingCa)?)?;
            debug!(ca_certs = roots.len(), "built CA trust pool");

            let webpki =
                WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                    .build()?;
            let config = ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()?
                .with_webpki_verifier(webpki.clone())
                .with_no_client_auth();

            Ok(Some(TransportSecurity {
                mode,
                config: Arc::new(config),
                verifier: webpki,
            }))
        }
    }
}

/// Parses every certificate in `pem` into a root store.
///
/// An input without any certificate is an error rather than an empty store,
/// which would reject every server.
pub fn root_store_from_pem(pem: &str) -> Result<RootCertStore, TlsError> {
    let mut store = RootCertStore::empty();
    for item in CertificateDer::pem_slice_iter(pem.as_bytes()) {
        let cert = item?;
        store.add(cert)?;
    }

    if store.is_empty() {
        return Err(TlsError::NoCertificates);
    }
    Ok(store)
}

/// Reads CA material from a file.
pub fn read_ca_file(path: &str) -> Result<String, TlsError> {
    std::fs::read_to_string(path).map_err(|source| TlsError::CaFile {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests;
