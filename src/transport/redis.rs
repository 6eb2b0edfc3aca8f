//! Trait implementations using [Redis PubSub](https://redis.io/topics/pubsub)
//!
//! Redis channels only transport opaque payloads, so each [`Message`] is framed as JSON
//! including its identifier and metadata. Redis has no notion of acknowledging a message,
//! thus [`RedisDelivery::acknowledge`] does nothing.

use super::{Delivery, DeliveryStream, Publisher, Subscriber};
use crate::message::Message;
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, trace};

/// [`Publisher`] and [`Subscriber`] implementation based on Redis PubSub channels
///
/// Publishing happens over one lazily established, shared connection while every
/// subscription gets a dedicated connection that is closed when the stream is dropped.
pub struct RedisPubSub {
    client: Client,
    publish_con: OnceCell<MultiplexedConnection>,
}

impl RedisPubSub {
    /// Creates a new instance connecting to the given redis URL
    pub fn open(url: &str) -> Result<Self, BoxedError> {
        Ok(Self::new(Client::open(url)?))
    }

    /// Creates a new instance from an existing client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            publish_con: OnceCell::new(),
        }
    }

    async fn publish_connection(&self) -> Result<MultiplexedConnection, BoxedError> {
        let con = self
            .publish_con
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await?;

        Ok(con.clone())
    }
}

#[async_trait]
impl Publisher for RedisPubSub {
    #[instrument(err, skip(self, message), fields(message = message.uuid()))]
    async fn publish(&self, topic: &str, message: Message) -> EmptyResult {
        let frame = encode_frame(&message)?;
        let mut con = self.publish_connection().await?;

        let receivers: usize = con.publish(topic, frame).await?;
        trace!(receivers, "Published message");

        Ok(())
    }
}

#[async_trait]
impl Subscriber for RedisPubSub {
    type Delivery = RedisDelivery;

    #[instrument(err, skip(self))]
    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream<Self::Delivery>, BoxedError> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(topic).await?;
        debug!("Subscribed to redis channel");

        let stream = pubsub
            .into_on_message()
            .map(|msg| decode_frame(msg.get_payload_bytes()).map(RedisDelivery))
            .boxed();

        Ok(stream)
    }
}

/// [`Delivery`] yielded by a [`RedisPubSub`] subscription
pub struct RedisDelivery(Message);

#[async_trait]
impl Delivery for RedisDelivery {
    fn message(&self) -> &Message {
        &self.0
    }

    fn into_message(self) -> Message {
        self.0
    }

    async fn acknowledge(&mut self) -> EmptyResult {
        Ok(())
    }
}

fn encode_frame(message: &Message) -> Result<Vec<u8>, BoxedError> {
    serde_json::to_vec(message).map_err(Into::into)
}

fn decode_frame(frame: &[u8]) -> Result<Message, BoxedError> {
    serde_json::from_slice(frame).map_err(Into::into)
}
