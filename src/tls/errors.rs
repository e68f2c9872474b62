use rustls::server::VerifierBuilderError;
use thiserror::Error;

/// Errors raised while building the transport-security configuration.
#[derive(Error, Debug)]
pub enum TlsError {
    #[error("invalid tls mode {0}: expected 0 (disabled), 1 (insecure) or 2 (secure)")]
    InvalidMode(u8),
    #[error("secure tls mode requires CA certificate material")]
    MissingCa,
    #[error("CA material contains no certificates")]
    NoCertificates,
    #[error("invalid pem format: {0}")]
    InvalidPem(#[from] rustls_pki_types::pem::Error),
    #[error("error reading CA file {path}: {source}")]
    CaFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("verifier builder error: {0}")]
    VerifierBuilder(#[from] VerifierBuilderError),
}
