use super::{OperationId, ReplyReceiver};
use crate::message::Message;
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::any::Any;
use std::error::Error;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Parameters for [`Backend::listen_for_notifications`]
#[derive(Debug, Clone, Copy)]
pub struct ListenParams<'a> {
    /// Command that is about to be sent
    pub command: &'a (dyn Any + Send + Sync),
    /// Name of the command that is about to be sent
    pub command_name: &'a str,
    /// Identifier of the exchange to listen for
    pub operation_id: &'a OperationId,
}

/// Parameters for [`Backend::on_command_processed`]
pub struct CommandProcessedParams<'a, R> {
    /// Command that has been processed
    pub command: &'a (dyn Any + Send + Sync),
    /// Name of the command that has been processed
    pub command_name: &'a str,
    /// Message the command has been received in
    pub command_message: &'a Message,
    /// Value returned by the handler, if any
    pub handler_result: Option<R>,
    /// Error returned by the handler, if any
    pub handler_error: Option<&'a (dyn Error + Send + Sync + 'static)>,
}

/// Replies of one operation along with the task producing them
#[derive(Debug)]
pub struct Listening<R> {
    replies: ReplyReceiver<R>,
    task: Option<JoinHandle<()>>,
}

impl<R> Listening<R> {
    /// Creates a new instance whose replies are not produced by a dedicated task
    pub fn new(replies: ReplyReceiver<R>) -> Self {
        Self {
            replies,
            task: None,
        }
    }

    /// Creates a new instance whose replies are produced by the given task
    pub fn with_task(replies: ReplyReceiver<R>, task: JoinHandle<()>) -> Self {
        Self {
            replies,
            task: Some(task),
        }
    }

    /// Splits the instance into the reply receiver and the listener task, if any
    pub fn into_parts(self) -> (ReplyReceiver<R>, Option<JoinHandle<()>>) {
        (self.replies, self.task)
    }
}

/// Strategy for transporting the outcome of a command back to its sender
///
/// Both sides of an exchange use the same backend: the requesting side listens for
/// notifications while the handling side emits them.
#[async_trait]
pub trait Backend<R>: Send + Sync
where
    R: Send + 'static,
{
    /// Starts listening for the notification of one operation
    ///
    /// Returns as soon as the listener has been set up, waiting happens in the background.
    /// The receiver of the returned [`Listening`] yields at most one [`Reply`](super::Reply).
    /// Listening ends once a matching notification has been received, the `cancellation` token
    /// has been cancelled or a backend specific timeout elapsed. In the latter cases, a timeout
    /// reply is delivered.
    async fn listen_for_notifications(
        &self,
        cancellation: CancellationToken,
        params: ListenParams<'_>,
    ) -> Result<Listening<R>, BoxedError>;

    /// Emits the notification for a processed command
    ///
    /// Does nothing if the sender of the command does not expect a notification. Errors of the
    /// handler are transported inside the notification, an `Err(_)` is only returned if the
    /// notification itself could not be delivered.
    async fn on_command_processed(&self, params: CommandProcessedParams<'_, R>) -> EmptyResult;
}

#[async_trait]
impl<R, B> Backend<R> for Arc<B>
where
    R: Send + 'static,
    B: Backend<R> + ?Sized,
{
    async fn listen_for_notifications(
        &self,
        cancellation: CancellationToken,
        params: ListenParams<'_>,
    ) -> Result<Listening<R>, BoxedError> {
        self.as_ref()
            .listen_for_notifications(cancellation, params)
            .await
    }

    async fn on_command_processed(&self, params: CommandProcessedParams<'_, R>) -> EmptyResult {
        self.as_ref().on_command_processed(params).await
    }
}
