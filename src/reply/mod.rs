//! Structures to await the outcome of a command
//!
//! Sending a [`Command`](crate::command::Command) is a one-way operation. This module adds
//! a reply channel on top of it which works with any publish/subscribe transport.
//!
//! When talking about the request-reply pattern, there are two parties involved:
//!
//! - Requesting side
//! - Handling side
//!
//! On the requesting side, [`send_with_reply`] generates a unique [`OperationId`], asks a
//! [`Backend`] to start listening for a notification carrying this id and only then sends the
//! command tagged with the id. Subscribing first is important, a fast handler could otherwise
//! answer before anybody listens. The caller receives a [`ReplyReceiver`] which yields exactly
//! one [`Reply`] and a [`CancelHandle`] to abort waiting.
//!
//! On the handling side, a handler is wrapped using [`command_handler`] or
//! [`command_handler_with_result`]. Once the handler finishes, the wrapper asks the [`Backend`]
//! to publish a [`Notification`] with the outcome, correlated to the original command by its
//! operation id.
//!
//! The [`PubSubBackend`] implements the [`Backend`] using the [transport](crate::transport) traits.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use tokio::sync::mpsc;
use uuid::Uuid;

mod backend;
mod error;
mod handler;
mod notification;
mod pubsub;
mod requestor;
pub mod topic;

pub use backend::*;
pub use error::*;
pub use handler::*;
pub use notification::*;
pub use pubsub::*;
pub use requestor::*;

/// Unique identifier of one request/reply exchange
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(String);

impl OperationId {
    /// Creates a new random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// String representation of the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Receiving end of an exchange, yields one [`Reply`] and closes afterwards
pub type ReplyReceiver<R> = mpsc::Receiver<Reply<R>>;

/// Outcome of a request/reply exchange
#[derive(Debug)]
pub struct Reply<R> {
    result: Result<R, ReplyError>,
    notification: Option<Message>,
}

impl<R> Reply<R> {
    /// Creates a new instance from raw parts
    pub fn new(result: Result<R, ReplyError>, notification: Option<Message>) -> Self {
        Self {
            result,
            notification,
        }
    }

    /// Outcome of the handler or the reason why none has been received
    pub fn result(&self) -> Result<&R, &ReplyError> {
        self.result.as_ref()
    }

    /// Consumes the reply, returning the outcome
    pub fn into_result(self) -> Result<R, ReplyError> {
        self.result
    }

    /// Notification message the reply has been built from
    ///
    /// Absent for replies caused by timeouts or cancellation.
    pub fn notification(&self) -> Option<&Message> {
        self.notification.as_ref()
    }
}
