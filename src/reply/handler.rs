use super::{Backend, CommandProcessedParams, CompletionError};
use crate::command::{Command, CommandHandler, HandlerContext};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use tracing::{debug, instrument};

/// [`CommandHandler`] which reports the outcome of a wrapped function through a [`Backend`]
///
/// Created by [`command_handler`] or [`command_handler_with_result`]. Errors of the wrapped
/// function end up in the notification and do not fail the handler. Only a failure to emit the
/// notification is returned to the [`CommandProcessor`](crate::command::CommandProcessor).
pub struct ReplyingCommandHandler<C, R, B, F> {
    name: String,
    backend: B,
    handle: F,
    types: PhantomData<fn(C) -> R>,
}

/// Wraps a handler function without result value
///
/// The command is cloned before it is handed to the function, the backend receives the original
/// to derive the notification topic from.
pub fn command_handler<C, B, F, Fut>(
    name: impl Into<String>,
    backend: B,
    handle: F,
) -> ReplyingCommandHandler<C, (), B, F>
where
    C: Command + Clone,
    B: Backend<()>,
    F: Fn(HandlerContext, C) -> Fut + Send + Sync,
    Fut: Future<Output = EmptyResult> + Send,
{
    command_handler_with_result(name, backend, handle)
}

/// Wraps a handler function which returns a result value
///
/// The value is transported to the sender of the command if the function succeeds. Like with
/// [`command_handler`], the function receives a clone of the command.
pub fn command_handler_with_result<C, R, B, F, Fut>(
    name: impl Into<String>,
    backend: B,
    handle: F,
) -> ReplyingCommandHandler<C, R, B, F>
where
    C: Command + Clone,
    R: Send + 'static,
    B: Backend<R>,
    F: Fn(HandlerContext, C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, BoxedError>> + Send,
{
    ReplyingCommandHandler {
        name: name.into(),
        backend,
        handle,
        types: PhantomData,
    }
}

#[async_trait]
impl<C, R, B, F, Fut> CommandHandler for ReplyingCommandHandler<C, R, B, F>
where
    C: Command + Clone,
    R: Send + 'static,
    B: Backend<R>,
    F: Fn(HandlerContext, C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, BoxedError>> + Send,
{
    type Command = C;

    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(err, skip(self, ctx, command), fields(handler = %self.name))]
    async fn handle(&self, ctx: &HandlerContext, command: C) -> EmptyResult {
        let outcome = (self.handle)(ctx.clone(), command.clone()).await;

        let message = ctx
            .original_message()
            .ok_or(CompletionError::OriginalMessageMissing)?;

        let (handler_result, handler_error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(e) => {
                debug!("Handler reported an error: {}", e);
                (None, Some(e))
            }
        };

        self.backend
            .on_command_processed(CommandProcessedParams {
                command: &command,
                command_name: C::name(),
                command_message: message,
                handler_result,
                handler_error: handler_error.as_deref(),
            })
            .await
            .map_err(CompletionError::Notification)?;

        Ok(())
    }
}
