//! Topic addressed publish and subscribe primitives
//!
//! Everything in this crate builds on two capabilities of the underlying messaging system:
//! publishing a [`Message`] to a named topic, and subscribing to a topic to receive every
//! message published to it afterwards. Received messages are wrapped in a [`Delivery`] which
//! allows the consumer to acknowledge them.
//!
//! Topics may be shared by many subscribers, each of them receives its own copy of a message.
//! No ordering is guaranteed between different topics.

use crate::message::Message;
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

pub mod memory;
#[cfg(any(test, feature = "test"))]
pub mod mock;
#[cfg(feature = "redis")]
pub mod redis;

/// Stream of incoming deliveries returned by a [`Subscriber`]
///
/// The stream ends when the subscription is closed by the transport.
pub type DeliveryStream<D> = BoxStream<'static, Result<D, BoxedError>>;

/// Structure which allows publishing of messages to a topic
#[async_trait]
pub trait Publisher {
    /// Hands a message to the transport for delivery to all current subscribers of the topic
    async fn publish(&self, topic: &str, message: Message) -> EmptyResult;
}

/// Message received through a subscription
#[async_trait]
pub trait Delivery {
    /// Received message
    fn message(&self) -> &Message;

    /// Consumes the delivery, returning the received message
    fn into_message(self) -> Message;

    /// Acknowledge the message as processed
    async fn acknowledge(&mut self) -> EmptyResult;
}

/// Structure which allows subscribing to topics
#[async_trait]
pub trait Subscriber {
    /// Type of [`Delivery`] yielded by subscriptions
    type Delivery: Delivery + Send + Sync + 'static;

    /// Subscribes to a topic
    ///
    /// Once this function returns, every message published to the topic will be
    /// yielded by the returned stream. Dropping the stream ends the subscription.
    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream<Self::Delivery>, BoxedError>;
}

#[async_trait]
impl<P> Publisher for Arc<P>
where
    P: Publisher + Send + Sync + ?Sized,
{
    async fn publish(&self, topic: &str, message: Message) -> EmptyResult {
        self.as_ref().publish(topic, message).await
    }
}

#[async_trait]
impl<S> Subscriber for Arc<S>
where
    S: Subscriber + Send + Sync + ?Sized,
{
    type Delivery = S::Delivery;

    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream<Self::Delivery>, BoxedError> {
        self.as_ref().subscribe(topic).await
    }
}
