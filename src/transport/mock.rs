//! Test doubles for the transport traits

use super::{Delivery, DeliveryStream, Publisher, Subscriber};
use crate::message::Message;
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};

/// Publisher which records everything instead of sending it anywhere
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<(String, Message)>>>,
    failure: Option<String>,
}

impl RecordingPublisher {
    /// Creates a publisher that rejects every message with the given reason
    pub fn failing(reason: &str) -> Self {
        Self {
            published: Default::default(),
            failure: Some(reason.to_owned()),
        }
    }

    /// Topics and messages that have been published so far
    pub fn published(&self) -> Vec<(String, Message)> {
        self.published.lock().unwrap().clone()
    }

    /// Asserts that exactly one message has been published and returns it
    pub fn single(&self) -> (String, Message) {
        let mut published = self.published();
        pretty_assertions::assert_eq!(published.len(), 1, "expected exactly one message");
        published.remove(0)
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, message: Message) -> EmptyResult {
        if let Some(reason) = &self.failure {
            return Err(reason.clone().into());
        }

        self.published
            .lock()
            .unwrap()
            .push((topic.to_owned(), message));

        Ok(())
    }
}

/// Subscriber whose subscriptions either fail immediately or never yield anything
#[derive(Clone, Default)]
pub struct StaticSubscriber {
    failure: Option<String>,
}

impl StaticSubscriber {
    /// Creates a subscriber that rejects every subscription with the given reason
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_owned()),
        }
    }
}

#[async_trait]
impl Subscriber for StaticSubscriber {
    type Delivery = StaticDelivery;

    async fn subscribe(&self, _topic: &str) -> Result<DeliveryStream<Self::Delivery>, BoxedError> {
        match &self.failure {
            Some(reason) => Err(reason.clone().into()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Delivery type of the [`StaticSubscriber`], never actually yielded
pub struct StaticDelivery(Message);

#[async_trait]
impl Delivery for StaticDelivery {
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
