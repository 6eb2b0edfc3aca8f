use super::error::{CommandHandlerError, ReplyError};
use chrono::{DateTime, Utc};
use serde::de::{value, DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};
use std::error::Error;

/// Message published once a command has been processed
///
/// The notification is correlated to its command through the metadata of the
/// surrounding [`Message`](crate::message::Message), not through any of its fields.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Notification<R> {
    has_error: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    error: String,
    result: Option<R>,
    published_at: DateTime<Utc>,
}

impl<R> Notification<R> {
    /// Creates a new instance from the outcome of a handler
    pub fn new(result: Option<R>, error: Option<&(dyn Error + Send + Sync + 'static)>) -> Self {
        Self {
            has_error: error.is_some(),
            error: error.map(ToString::to_string).unwrap_or_default(),
            result,
            published_at: Utc::now(),
        }
    }

    /// Whether the handler reported an error
    pub fn has_error(&self) -> bool {
        self.has_error
    }

    /// Instant at which the notification has been created
    pub fn publication_time(&self) -> &DateTime<Utc> {
        &self.published_at
    }
}

impl<R: DeserializeOwned> Notification<R> {
    /// Converts the notification into the outcome of the handler
    ///
    /// Handlers without a result value produce notifications with an empty result. For those,
    /// the result type is expected to be deserializable from a unit value (e.g. `()`).
    pub fn into_result(self) -> Result<R, ReplyError> {
        if self.has_error {
            return Err(CommandHandlerError::new(self.error).into());
        }

        match self.result {
            Some(result) => Ok(result),
            None => {
                let unit: value::UnitDeserializer<value::Error> = ().into_deserializer();
                R::deserialize(unit).map_err(|e| ReplyError::Protocol(Box::new(e)))
            }
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::marshal::{JsonMarshaler, Marshaler};
    use pretty_assertions::assert_eq;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Reservation {
        count: usize,
    }

    #[test]
    fn yield_successful_results() {
        let notification = Notification::new(Some(Reservation { count: 3 }), None);
        assert!(!notification.has_error());
        assert_eq!(notification.into_result().unwrap(), Reservation { count: 3 });
    }

    #[test]
    fn stamp_publication_time() {
        let before = Utc::now();
        let notification = Notification::<()>::new(None, None);
        let after = Utc::now();

        assert!(*notification.publication_time() >= before);
        assert!(*notification.publication_time() <= after);
    }

    #[test]
    fn yield_exact_handler_errors() {
        let error: crate::BoxedError = "insufficient funds".into();
        let notification = Notification::new(Some(Reservation { count: 1 }), Some(error.as_ref()));

        let error = notification.into_result().unwrap_err();

        assert_eq!(
            error.as_handler_error().map(CommandHandlerError::message),
            Some("insufficient funds")
        );
        assert_eq!(error.to_string(), "insufficient funds");
    }

    #[test]
    fn survive_the_wire_without_result() {
        let notification = Notification::<()>::new(Some(()), None);
        let message = JsonMarshaler.marshal(&notification).unwrap();
        let decoded: Notification<()> = JsonMarshaler.unmarshal(&message).unwrap();

        assert!(decoded.into_result().is_ok());
    }

    #[test]
    fn reject_missing_results() {
        let notification = Notification::<Reservation>::new(None, None);
        let error = notification.into_result().unwrap_err();

        assert!(matches!(error, ReplyError::Protocol(_)));
    }
}
