//! Transport envelope carrying an opaque payload and string metadata

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// String-keyed metadata attached to a [`Message`]
pub type Metadata = HashMap<String, String>;

/// Unit of data moved by a [`Publisher`](crate::transport::Publisher)
///
/// Every message has a unique identifier, a set of metadata entries which may be
/// modified up until the message is handed to the transport, and a serialized payload
/// produced by a [`Marshaler`](crate::marshal::Marshaler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    uuid: String,
    #[serde(default)]
    metadata: Metadata,
    payload: Vec<u8>,
}

impl Message {
    /// Creates a new instance with a random v4 UUID
    pub fn new(payload: Vec<u8>) -> Self {
        Self::with_uuid(Uuid::new_v4().to_string(), payload)
    }

    /// Creates a new instance from raw parts
    pub fn with_uuid(uuid: String, payload: Vec<u8>) -> Self {
        Self {
            uuid,
            metadata: Metadata::new(),
            payload,
        }
    }

    /// Unique identifier of the message
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Serialized payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// All metadata entries
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Looks up a single metadata entry
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Inserts or overwrites a metadata entry
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }
}
