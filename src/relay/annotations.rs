//! Typed decoding of broker-supplied message annotations.
//!
//! Annotation keys and values arrive as loosely typed AMQP data. Only text
//! keys with text values are kept; everything else is reported back in
//! [`Extracted::skipped`] instead of failing the message.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::transport::{AnnotationKey, AnnotationValue, RawAnnotations};

/// Annotation carrying the id of the device that produced the message.
pub const DEVICE_ID: &str = "device-id";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("message has no 'device-id' annotation")]
    MissingDeviceId,
    #[error("message has an empty 'device-id' annotation")]
    EmptyDeviceId,
}

/// An annotation entry that could not be represented as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skipped {
    NonTextKey(u64),
    NonTextValue { key: String, kind: &'static str },
}

impl fmt::Display for Skipped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skipped::NonTextKey(key) => write!(f, "numeric annotation key {key}"),
            Skipped::NonTextValue { key, kind } => {
                write!(f, "annotation '{key}' has a {kind} value")
            }
        }
    }
}

/// Result of decoding one message's annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    entries: HashMap<String, String>,
    skipped: Vec<Skipped>,
}

impl Extracted {
    pub fn entries(&self) -> &HashMap<String, String> {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn skipped(&self) -> &[Skipped] {
        &self.skipped
    }

    pub fn device_id(&self) -> Option<&str> {
        self.get(DEVICE_ID)
    }

    /// The device id, which every forwarded message needs.
    pub fn require_device_id(&self) -> Result<&str, AnnotationError> {
        match self.device_id() {
            None => Err(AnnotationError::MissingDeviceId),
            Some(id) if id.trim().is_empty() => Err(AnnotationError::EmptyDeviceId),
            Some(id) => Ok(id),
        }
    }
}

/// Decodes `raw` into a string map. Pure: the same input always yields the
/// same result. A repeated key keeps its last value, as a map would.
pub fn extract(raw: &RawAnnotations) -> Extracted {
    let mut extracted = Extracted::default();

    for (key, value) in raw {
        let key = match key {
            AnnotationKey::Symbol(key) => key,
            AnnotationKey::Ulong(n) => {
                extracted.skipped.push(Skipped::NonTextKey(*n));
                continue;
            }
        };

        match value {
            AnnotationValue::String(text) | AnnotationValue::Symbol(text) => {
                extracted.entries.insert(key.clone(), text.clone());
            }
            AnnotationValue::Other(kind) => extracted.skipped.push(Skipped::NonTextValue {
                key: key.clone(),
                kind,
            }),
        }
    }

    extracted
}
