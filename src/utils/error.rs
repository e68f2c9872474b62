//! The `error` module defines the error taxonomy of the relay.
//!
//! Every failure is classified into an [`ErrorKind`]. The kind decides
//! whether the run must stop ([`RelayError::is_fatal`]) or whether the relay
//! logs the failure and moves on to the next message.

use std::time::Duration;

use thiserror::Error;

use crate::relay::annotations::AnnotationError;
use crate::tls::TlsError;

/// Coarse classification used by the relay's error policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad settings or certificate material. Prevents startup.
    Configuration,
    /// Dial, session or receiver-attach failure.
    Connection,
    /// Failure on the inbound link after it was established.
    Protocol,
    /// A single message carried unusable annotations or was dropped unacknowledged.
    Data,
    /// A single message could not be delivered to its sink.
    Forwarding,
    /// Closing a link, session or connection failed.
    Teardown,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("invalid settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("tls configuration error: {0}")]
    Tls(#[from] TlsError),

    #[error("failed to connect to {uri}: {reason}")]
    Connect { uri: String, reason: String },

    #[error("failed to begin session: {0}")]
    Session(String),

    #[error("failed to attach receiver to {address}: {reason}")]
    ReceiverAttach { address: String, reason: String },

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("failed to accept message: {0}")]
    Accept(String),

    #[error("message dropped after {0}")]
    AcceptSkipped(String),

    #[error("unusable annotations: {0}")]
    Annotations(#[from] AnnotationError),

    #[error("failed to attach sender to {address}: {reason}")]
    SenderAttach { address: String, reason: String },

    #[error("send to {address} failed: {reason}")]
    Send { address: String, reason: String },

    #[error("send to {address} timed out after {timeout:?}")]
    SendTimeout { address: String, timeout: Duration },

    #[error("forward to {address} abandoned on shutdown")]
    Cancelled { address: String },

    #[error("failed to close {resource}: {reason}")]
    Teardown {
        resource: &'static str,
        reason: String,
    },
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Settings(_) | RelayError::Config(_) | RelayError::Tls(_) => {
                ErrorKind::Configuration
            }
            RelayError::Connect { .. }
            | RelayError::Session(_)
            | RelayError::ReceiverAttach { .. } => ErrorKind::Connection,
            RelayError::Receive(_) | RelayError::Accept(_) => ErrorKind::Protocol,
            RelayError::Annotations(_) | RelayError::AcceptSkipped(_) => ErrorKind::Data,
            RelayError::SenderAttach { .. }
            | RelayError::Send { .. }
            | RelayError::SendTimeout { .. }
            | RelayError::Cancelled { .. } => ErrorKind::Forwarding,
            RelayError::Teardown { .. } => ErrorKind::Teardown,
        }
    }

    /// Only configuration, connection and inbound protocol failures end a run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::Connection | ErrorKind::Protocol
        )
    }

    pub(crate) fn teardown(resource: &'static str, reason: impl ToString) -> Self {
        RelayError::Teardown {
            resource,
            reason: reason.to_string(),
        }
    }
}
