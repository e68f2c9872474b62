use serde::Deserialize;

use crate::relay::address::MessageType;
use crate::relay::policy::{AcceptFailurePolicy, RetryPolicy};
use crate::tls::{self, TlsError, TlsMode, TransportSecurity};
use crate::utils::RelayError;

/// Top-level configuration settings for the relay.
///
/// Every section falls back to its defaults when absent, so a configuration
/// file only needs to name what differs.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub tls: TlsSettings,
    pub relay: RelaySettings,
    pub log: LogSettings,
}

/// Where and as whom to connect for inbound traffic.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub tenant: String,
    pub message_type: MessageType,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BrokerSettings {
    /// Username and password, only when both are non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5671,
            tenant: String::new(),
            message_type: MessageType::Telemetry,
            username: None,
            password: None,
        }
    }
}

/// Transport-security settings.
///
/// `mode` takes the integer selector: 0 disabled, 1 insecure, 2 secure.
/// Secure mode needs CA material, either inline (`ca_pem`) or from a file
/// (`ca_file`); inline text wins when both are set.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TlsSettings {
    pub mode: TlsMode,
    pub ca_pem: Option<String>,
    pub ca_file: Option<String>,
}

impl TlsSettings {
    pub fn ca_material(&self) -> Result<Option<String>, TlsError> {
        match (&self.ca_pem, &self.ca_file) {
            (Some(pem), _) => Ok(Some(pem.clone())),
            (None, Some(path)) => tls::read_ca_file(path).map(Some),
            (None, None) => Ok(None),
        }
    }

    pub fn build(&self) -> Result<Option<TransportSecurity>, TlsError> {
        let ca = match self.mode {
            TlsMode::Secure => self.ca_material()?,
            _ => None,
        };
        tls::build(self.mode, ca.as_deref())
    }
}

/// Forwarding behaviour.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RelaySettings {
    /// Base of every target address: `{sink_base}/topics/{device-id}`.
    pub sink_base: String,
    /// Accepted messages allowed to wait for the forwarder.
    pub queue_capacity: usize,
    pub send_timeout_ms: u64,
    /// Idle time after which a cached sender is closed; 0 closes every
    /// sender right after its send.
    pub link_idle_secs: u64,
    pub max_links: usize,
    pub accept_failure: AcceptFailurePolicy,
    pub accept_retries: usize,
    pub retry: RetryPolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            sink_base: String::new(),
            queue_capacity: 16,
            send_timeout_ms: 5_000,
            link_idle_secs: 30,
            max_links: 64,
            accept_failure: AcceptFailurePolicy::Terminate,
            accept_retries: 3,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Rejects settings the relay cannot start with.
    pub fn validate(&self) -> Result<(), RelayError> {
        let invalid = |msg: &str| Err(RelayError::Config(msg.to_string()));

        if self.broker.host.trim().is_empty() {
            return invalid("broker.host must not be empty");
        }
        if self.broker.tenant.trim().is_empty() {
            return invalid("broker.tenant must not be empty");
        }
        if self.relay.sink_base.trim().is_empty() {
            return invalid("relay.sink_base must not be empty");
        }
        if self.relay.queue_capacity == 0 {
            return invalid("relay.queue_capacity must be at least 1");
        }
        if self.relay.max_links == 0 {
            return invalid("relay.max_links must be at least 1");
        }
        if self.relay.send_timeout_ms == 0 {
            return invalid("relay.send_timeout_ms must be positive");
        }
        if self.tls.mode == TlsMode::Secure
            && self.tls.ca_pem.is_none()
            && self.tls.ca_file.is_none()
        {
            return Err(TlsError::MissingCa.into());
        }
        Ok(())
    }
}
