use super::{Command, CommandTopicFn};
use crate::marshal::{JsonMarshaler, Marshaler};
use crate::message::Message;
use crate::transport::{Delivery, Subscriber};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

const DEFAULT_CONCURRENCY: usize = 10;

/// Information available to a [`CommandHandler`] while it processes a command
#[derive(Clone, Debug)]
pub struct HandlerContext {
    original_message: Option<Message>,
    cancellation: CancellationToken,
}

impl HandlerContext {
    /// Creates a new context without an original message
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            original_message: None,
            cancellation,
        }
    }

    /// Attaches the message the command has been decoded from
    pub fn with_original_message(mut self, message: Message) -> Self {
        self.original_message = Some(message);
        self
    }

    /// Message the command has been decoded from, if known
    pub fn original_message(&self) -> Option<&Message> {
        self.original_message.as_ref()
    }

    /// Token which is cancelled once the processor shuts down
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// Entity which processes [`Commands`](Command) of one type
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Command to process
    type Command: Command;

    /// Human readable name used for logging
    fn name(&self) -> &str;

    /// Processes a command and returns whether it succeeded or failed
    async fn handle(&self, ctx: &HandlerContext, command: Self::Command) -> EmptyResult;
}

#[async_trait]
trait ErasedHandler<M>: Send + Sync {
    fn handler_name(&self) -> &str;
    fn command_name(&self) -> &'static str;
    async fn dispatch(&self, marshaler: &M, ctx: &HandlerContext) -> EmptyResult;
}

struct Erased<H>(H);

#[async_trait]
impl<H, M> ErasedHandler<M> for Erased<H>
where
    H: CommandHandler,
    M: Marshaler,
{
    fn handler_name(&self) -> &str {
        self.0.name()
    }

    fn command_name(&self) -> &'static str {
        H::Command::name()
    }

    async fn dispatch(&self, marshaler: &M, ctx: &HandlerContext) -> EmptyResult {
        let message = ctx
            .original_message()
            .ok_or("handler context carries no message")?;
        let command: H::Command = marshaler.unmarshal(message)?;
        self.0.handle(ctx, command).await
    }
}

/// Consumes commands from their topics and routes them to [`CommandHandlers`](CommandHandler)
///
/// Every registered handler gets its own subscription on the topic derived from the name
/// of the command it processes. Commands are decoded and passed to the handler along with
/// a [`HandlerContext`] which carries the original message. Successfully processed messages
/// are acknowledged, failures are logged.
pub struct CommandProcessor<S, M = JsonMarshaler> {
    subscriber: S,
    marshaler: M,
    generate_topic: CommandTopicFn,
    handlers: Vec<Arc<dyn ErasedHandler<M>>>,
}

impl<S> CommandProcessor<S>
where
    S: Subscriber,
{
    /// Creates a new instance which deserializes commands using JSON
    pub fn new(
        subscriber: S,
        generate_topic: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            subscriber,
            marshaler: JsonMarshaler,
            generate_topic: Arc::new(generate_topic),
            handlers: Vec::new(),
        }
    }
}

impl<S, M> CommandProcessor<S, M>
where
    S: Subscriber + Send + Sync,
    M: Marshaler + 'static,
{
    /// Creates a new instance with a custom [`Marshaler`]
    pub fn with_marshaler(
        subscriber: S,
        marshaler: M,
        generate_topic: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            subscriber,
            marshaler,
            generate_topic: Arc::new(generate_topic),
            handlers: Vec::new(),
        }
    }

    /// Registers a handler
    pub fn add_handler<H: CommandHandler + 'static>(&mut self, handler: H) -> &mut Self {
        self.handlers.push(Arc::new(Erased(handler)));
        self
    }

    /// Subscribes to the topics of all handlers and processes commands until cancelled
    pub async fn run(&self, cancellation: CancellationToken) -> EmptyResult {
        self.subscribe().await?.process(cancellation).await;
        Ok(())
    }

    /// Subscribes to the topics of all handlers without processing anything yet
    ///
    /// Commands published after this returns are guaranteed to reach the handlers once
    /// [`SubscribedProcessor::process`] is called.
    #[instrument(err, skip(self), fields(handlers = self.handlers.len()))]
    pub async fn subscribe(&self) -> Result<SubscribedProcessor<'_, S, M>, BoxedError> {
        let mut streams = Vec::with_capacity(self.handlers.len());

        for handler in &self.handlers {
            let topic = (self.generate_topic)(handler.command_name());
            let deliveries = self.subscriber.subscribe(&topic).await?;
            debug!(%topic, handler = handler.handler_name(), "Subscribed to command topic");

            let handler = handler.clone();
            streams.push(deliveries.map(move |delivery| (handler.clone(), delivery)));
        }

        Ok(SubscribedProcessor {
            processor: self,
            commands: stream::select_all(streams).boxed(),
        })
    }

    async fn process(
        &self,
        handler: Arc<dyn ErasedHandler<M>>,
        item: Result<S::Delivery, BoxedError>,
        cancellation: CancellationToken,
    ) {
        let mut delivery = match item {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(handler = handler.handler_name(), "Failed to receive command: {}", e);
                return;
            }
        };

        let ctx =
            HandlerContext::new(cancellation).with_original_message(delivery.message().clone());

        match handler.dispatch(&self.marshaler, &ctx).await {
            Ok(_) => {
                if let Err(e) = delivery.acknowledge().await {
                    warn!(handler = handler.handler_name(), "Failed to acknowledge command: {}", e)
                }
            }
            Err(e) => warn!(handler = handler.handler_name(), "Failed to handle command: {}", e),
        }
    }
}

/// [`CommandProcessor`] whose subscriptions are established
pub struct SubscribedProcessor<'a, S: Subscriber, M> {
    processor: &'a CommandProcessor<S, M>,
    commands: BoxStream<'static, (Arc<dyn ErasedHandler<M>>, Result<S::Delivery, BoxedError>)>,
}

impl<'a, S, M> SubscribedProcessor<'a, S, M>
where
    S: Subscriber + Send + Sync,
    M: Marshaler + 'static,
{
    /// Processes commands until cancelled or all subscriptions end
    pub async fn process(self, cancellation: CancellationToken) {
        let processor = self.processor;

        self.commands
            .take_until(cancellation.cancelled())
            .for_each_concurrent(Some(DEFAULT_CONCURRENCY), |(handler, item)| {
                let cancellation = cancellation.child_token();
                async move { processor.process(handler, item, cancellation).await }
            })
            .await;

        debug!("Command processor stopped");
    }
}
