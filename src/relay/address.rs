use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Kind of traffic consumed from the tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Telemetry,
    Event,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Telemetry => "telemetry",
            MessageType::Event => "event",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "telemetry" => Ok(MessageType::Telemetry),
            "event" => Ok(MessageType::Event),
            other => Err(format!(
                "unknown message type '{other}', expected 'telemetry' or 'event'"
            )),
        }
    }
}

/// `amqps://{host}:{port}`. The scheme is always `amqps`.
pub fn connection_uri(host: &str, port: impl fmt::Display) -> String {
    format!("amqps://{host}:{port}")
}

/// `{messageType}/{tenant}`
pub fn source_address(message_type: MessageType, tenant: &str) -> String {
    format!("{message_type}/{tenant}")
}

/// `{sinkBase}/topics/{deviceId}`
pub fn target_address(sink_base: &str, device_id: &str) -> String {
    format!("{sink_base}/topics/{device_id}")
}
