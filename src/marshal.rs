//! Conversion between strongly typed values and [`Messages`](Message)
//!
//! Both the [command bus](crate::command) and the [reply backend](crate::reply) rely on a
//! [`Marshaler`] to move data over the wire. The [`JsonMarshaler`] based on [`serde_json`] is
//! used by default, other formats can be plugged in by implementing the trait.

use crate::message::Message;
use crate::BoxedError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::type_name;
use tracing::{instrument, trace};

/// Translates between typed values and transport [`Messages`](Message)
pub trait Marshaler: Send + Sync {
    /// Serializes a value into the payload of a new message
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Message, BoxedError>;

    /// Deserializes the payload of a message
    fn unmarshal<T: DeserializeOwned>(&self, message: &Message) -> Result<T, BoxedError>;
}

/// [`Marshaler`] implementation using [`serde_json`]
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMarshaler;

impl Marshaler for JsonMarshaler {
    /// Serializes the value using [`serde_json::to_vec`]
    #[instrument(err, skip(self, value), fields(value = type_name::<T>()))]
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Message, BoxedError> {
        trace!("Serializing value");
        let payload = serde_json::to_vec(value)?;
        Ok(Message::new(payload))
    }

    /// Parses the payload using [`serde_json::from_slice`]
    #[instrument(err, skip(self, message), fields(message = message.uuid(), value = type_name::<T>()))]
    fn unmarshal<T: DeserializeOwned>(&self, message: &Message) -> Result<T, BoxedError> {
        trace!("Deserializing payload");
        serde_json::from_slice(message.payload()).map_err(Into::into)
    }
}
