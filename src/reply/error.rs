use crate::BoxedError;
use std::time::Duration;
use thiserror::Error;

/// Business error reported by the handler which processed a command
///
/// Displays exactly as the message produced by the handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CommandHandlerError {
    message: String,
}

impl CommandHandlerError {
    /// Creates a new instance from the message reported by a handler
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Message reported by the handler
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Reason for giving up on waiting for a notification
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutCause {
    /// The operation has been cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,
    /// The configured listen timeout elapsed
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The transport closed the notification subscription
    #[error("notification subscription closed")]
    SubscriptionClosed,
}

/// No matching notification has been received
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no reply received after {elapsed:?}")]
pub struct ReplyTimeoutError {
    elapsed: Duration,
    #[source]
    cause: TimeoutCause,
}

impl ReplyTimeoutError {
    /// Creates a new instance from raw parts
    pub fn new(elapsed: Duration, cause: TimeoutCause) -> Self {
        Self { elapsed, cause }
    }

    /// Time that passed between starting to listen and giving up
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Reason for giving up
    pub fn cause(&self) -> TimeoutCause {
        self.cause
    }
}

/// Error carried by a [`Reply`](super::Reply)
#[derive(Error, Debug)]
pub enum ReplyError {
    /// The handler reported an error while processing the command
    #[error(transparent)]
    Handler(#[from] CommandHandlerError),
    /// Waiting for the notification has been aborted
    #[error(transparent)]
    Timeout(#[from] ReplyTimeoutError),
    /// A matching notification has been received but could not be decoded
    #[error("malformed notification")]
    Protocol(#[source] BoxedError),
}

impl ReplyError {
    /// Returns the handler error, if this is one
    pub fn as_handler_error(&self) -> Option<&CommandHandlerError> {
        match self {
            ReplyError::Handler(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the timeout error, if this is one
    pub fn as_timeout(&self) -> Option<&ReplyTimeoutError> {
        match self {
            ReplyError::Timeout(e) => Some(e),
            _ => None,
        }
    }
}

/// Error type for starting a request/reply exchange
#[derive(Error, Debug)]
pub enum RequestReplyError {
    /// The backend was unable to start listening for notifications, nothing has been sent
    #[error("cannot listen for reply")]
    Listen(#[source] BoxedError),
    /// The command could not be sent, listening has been cancelled
    #[error("cannot send command")]
    Send(#[source] BoxedError),
    /// The reply channel has been closed without delivering a reply
    #[error("reply channel closed without a reply")]
    NoReply,
}

/// Errors of the handler side completion hook
#[derive(Error, Debug)]
pub enum CompletionError {
    /// The handler context does not carry the command message
    ///
    /// This indicates that the handler has not been invoked by a
    /// [`CommandProcessor`](crate::command::CommandProcessor) or that a
    /// custom dispatcher did not attach the message to the context.
    #[error("original command message missing from handler context")]
    OriginalMessageMissing,
    /// The backend failed to emit the notification
    #[error("cannot emit notification")]
    Notification(#[source] BoxedError),
}
