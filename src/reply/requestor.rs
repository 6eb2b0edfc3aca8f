use super::{Backend, ListenParams, OperationId, Reply, ReplyReceiver, RequestReplyError};
use crate::command::{Command, CommandBus};
use crate::constants::{
    NOTIFY_WHEN_EXECUTED_METADATA_KEY, NOTIFY_WHEN_EXECUTED_VALUE, OPERATION_ID_METADATA_KEY,
};
use crate::message::Message;
use crate::EmptyResult;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Aborts waiting for a reply
///
/// Dropping the handle has the same effect as calling [`cancel`](CancelHandle::cancel).
#[derive(Debug)]
pub struct CancelHandle {
    token: CancellationToken,
    listener: Option<JoinHandle<()>>,
}

impl CancelHandle {
    /// Stops the listener, which then delivers a cancellation reply unless it already finished
    ///
    /// Calling this more than once has no further effect.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the exchange has been cancelled, either directly or through its parent token
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until the background listener of the exchange has terminated
    ///
    /// Does not cancel by itself, the listener terminates once it delivered its reply. Returns
    /// immediately if the backend did not run a dedicated listener task. Dropping the handle
    /// afterwards cancels as usual, which has no effect on a terminated listener.
    pub async fn join(mut self) {
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                warn!("Notification listener terminated abnormally: {}", e);
            }
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Sends a command and starts waiting for the outcome of its handler
///
/// The backend starts listening before the command is sent. If listening fails, nothing is sent.
/// If sending fails, the listener is cancelled again. Cancelling `cancellation` cancels the
/// exchange, but cancelling the returned handle leaves `cancellation` untouched.
#[instrument(err, skip(cancellation, bus, backend, command), fields(command = C::name()))]
pub async fn send_with_reply<R, C, B, K>(
    cancellation: &CancellationToken,
    bus: &B,
    backend: &K,
    command: &C,
) -> Result<(ReplyReceiver<R>, CancelHandle), RequestReplyError>
where
    R: Send + 'static,
    C: Command,
    B: CommandBus + Sync,
    K: Backend<R> + ?Sized,
{
    let operation_id = OperationId::generate();
    let token = cancellation.child_token();

    let params = ListenParams {
        command,
        command_name: C::name(),
        operation_id: &operation_id,
    };

    let (replies, listener) = backend
        .listen_for_notifications(token.clone(), params)
        .await
        .map_err(RequestReplyError::Listen)?
        .into_parts();

    let cancel = CancelHandle { token, listener };

    let mark = |message: &mut Message| -> EmptyResult {
        message.set_metadata(OPERATION_ID_METADATA_KEY, operation_id.as_str());
        message.set_metadata(NOTIFY_WHEN_EXECUTED_METADATA_KEY, NOTIFY_WHEN_EXECUTED_VALUE);
        Ok(())
    };

    if let Err(e) = bus.send_with_modified_message(command, &mark).await {
        cancel.cancel();
        return Err(RequestReplyError::Send(e));
    }

    debug!(%operation_id, "Command sent, waiting for reply");

    Ok((replies, cancel))
}

/// Sends a command and waits for its [`Reply`]
///
/// Shorthand for [`send_with_reply`] followed by receiving the single reply.
pub async fn await_reply<R, C, B, K>(
    cancellation: &CancellationToken,
    bus: &B,
    backend: &K,
    command: &C,
) -> Result<Reply<R>, RequestReplyError>
where
    R: Send + 'static,
    C: Command,
    B: CommandBus + Sync,
    K: Backend<R> + ?Sized,
{
    let (mut replies, cancel) = send_with_reply(cancellation, bus, backend, command).await?;
    let reply = replies.recv().await.ok_or(RequestReplyError::NoReply);
    cancel.cancel();
    reply
}
