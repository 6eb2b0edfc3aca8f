//! Dispatching of commands to their handlers
//!
//! A [`Command`] is a request for some action to be taken. It is sent through a [`CommandBus`]
//! and eventually picked up by a [`CommandProcessor`] which hands it to the registered
//! [`CommandHandler`]. Neither side knows about the other, the only link is the topic derived
//! from the [name](Command::name) of the command.
//!
//! Sending a command is a fire-and-forget operation. Awaiting the outcome of the handler
//! is the job of the [`reply`](crate::reply) module.

use crate::constants::COMMAND_NAME_METADATA_KEY;
use crate::marshal::{JsonMarshaler, Marshaler};
use crate::message::Message;
use crate::transport::Publisher;
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{instrument, trace};

mod processor;

pub use processor::*;

/// Request for an action that will be processed asynchronously
pub trait Command: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name used to route the command to its handler
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Function which is applied to a command message right before it is published
pub type ModifyMessageFn<'a> = &'a (dyn Fn(&mut Message) -> EmptyResult + Send + Sync);

/// Function which maps a command name to the topic it is published on
pub type CommandTopicFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Error type for sending commands
#[derive(Error, Debug)]
pub enum CommandBusError {
    /// Command could not be serialized
    #[error("cannot marshal command")]
    Marshal(#[source] BoxedError),
    /// The message modifier rejected the command message
    #[error("cannot modify command message")]
    Modify(#[source] BoxedError),
    /// Publishing of the command failed
    #[error("cannot publish command")]
    Publish(#[source] BoxedError),
}

/// Entry point of the dispatch pipeline
#[async_trait]
pub trait CommandBus {
    /// Sends a command, allowing the caller to alter the message before it is published
    async fn send_with_modified_message<C: Command>(
        &self,
        command: &C,
        modify: ModifyMessageFn<'_>,
    ) -> EmptyResult;

    /// Sends a command as-is
    async fn send<C: Command>(&self, command: &C) -> EmptyResult {
        self.send_with_modified_message(command, &|_| Ok(())).await
    }
}

/// [`CommandBus`] implementation publishing commands through a [`Publisher`]
pub struct PubSubCommandBus<P, M = JsonMarshaler> {
    publisher: P,
    marshaler: M,
    generate_topic: CommandTopicFn,
}

impl<P> PubSubCommandBus<P>
where
    P: Publisher,
{
    /// Creates a new instance which serializes commands using JSON
    pub fn new(
        publisher: P,
        generate_topic: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            publisher,
            marshaler: JsonMarshaler,
            generate_topic: Arc::new(generate_topic),
        }
    }
}

impl<P, M> PubSubCommandBus<P, M> {
    /// Replaces the [`Marshaler`] used to serialize commands
    pub fn with_marshaler<N: Marshaler>(self, marshaler: N) -> PubSubCommandBus<P, N> {
        PubSubCommandBus {
            publisher: self.publisher,
            marshaler,
            generate_topic: self.generate_topic,
        }
    }
}

#[async_trait]
impl<P, M> CommandBus for PubSubCommandBus<P, M>
where
    P: Publisher + Send + Sync,
    M: Marshaler,
{
    #[instrument(err, skip(self, command, modify), fields(command = C::name()))]
    async fn send_with_modified_message<C: Command>(
        &self,
        command: &C,
        modify: ModifyMessageFn<'_>,
    ) -> EmptyResult {
        let mut message = self
            .marshaler
            .marshal(command)
            .map_err(CommandBusError::Marshal)?;

        message.set_metadata(COMMAND_NAME_METADATA_KEY, C::name());
        modify(&mut message).map_err(CommandBusError::Modify)?;

        let topic = (self.generate_topic)(C::name());
        trace!(%topic, message = message.uuid(), "Publishing command");

        self.publisher
            .publish(&topic, message)
            .await
            .map_err(CommandBusError::Publish)?;

        Ok(())
    }
}
