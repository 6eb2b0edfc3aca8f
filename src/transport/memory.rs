//! In-process transport based on [`tokio::sync::broadcast`] channels
//!
//! Every topic is backed by one broadcast channel which is created on first use. Messages
//! published to a topic without any subscribers are dropped, just like they would be with
//! most pub/sub systems that lack persistence.

use super::{Delivery, DeliveryStream, Publisher, Subscriber};
use crate::message::Message;
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{instrument, trace, warn};

const DEFAULT_TOPIC_CAPACITY: usize = 128;

/// Errors that may occur while using a [`MemoryPubSub`]
#[derive(Error, Debug)]
pub enum MemoryPubSubError {
    /// Transport has been closed
    #[error("pubsub has been closed")]
    Closed,
}

struct Shared {
    topics: Mutex<HashMap<String, broadcast::Sender<Message>>>,
    capacity: usize,
    closed: AtomicBool,
    acknowledged: AtomicUsize,
}

impl Shared {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Message>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`Publisher`] and [`Subscriber`] implementation living entirely in memory
///
/// Cloning yields a handle to the same set of topics. A topic exists as long as it has at
/// least one subscription, publishing to a topic without subscribers drops the message.
///
/// Each subscription buffers up to `capacity` messages. A subscriber that falls further behind
/// loses the oldest messages and logs a warning. On a topic shared by many listeners this may
/// include the one notification a listener is waiting for, which then only ends through its
/// timeout or cancellation. Size the capacity for the expected number of in-flight messages
/// per topic.
#[derive(Clone)]
pub struct MemoryPubSub {
    shared: Arc<Shared>,
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

impl MemoryPubSub {
    /// Creates a new instance where each topic buffers at most `capacity` messages per subscriber
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                topics: Mutex::new(HashMap::new()),
                capacity,
                closed: AtomicBool::new(false),
                acknowledged: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of deliveries that have been acknowledged so far
    pub fn acknowledged(&self) -> usize {
        self.shared.acknowledged.load(Ordering::SeqCst)
    }

    /// Number of topics which currently have subscribers
    pub fn topic_count(&self) -> usize {
        self.shared.topics().len()
    }

    /// Ends all subscriptions and rejects further use
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.topics().clear();
    }

    fn ensure_open(&self) -> Result<(), MemoryPubSubError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(MemoryPubSubError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Publisher for MemoryPubSub {
    #[instrument(err, skip(self, message), fields(message = message.uuid()))]
    async fn publish(&self, topic: &str, message: Message) -> EmptyResult {
        self.ensure_open()?;

        let delivered = match self.shared.topics().get(topic) {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        };

        if !delivered {
            trace!("Dropping message as nobody is subscribed");
        }

        Ok(())
    }
}

#[async_trait]
impl Subscriber for MemoryPubSub {
    type Delivery = MemoryDelivery;

    #[instrument(err, skip(self))]
    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream<Self::Delivery>, BoxedError> {
        self.ensure_open()?;

        // Subscribing under the lock keeps an ending subscription from removing the topic
        let receiver = self
            .shared
            .topics()
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.shared.capacity).0)
            .subscribe();

        let subscription = Subscription {
            receiver,
            topic: topic.to_owned(),
            shared: self.shared.clone(),
        };

        let stream = stream::unfold(subscription, |mut subscription| async move {
            loop {
                match subscription.receiver.recv().await {
                    Ok(message) => {
                        let delivery = MemoryDelivery {
                            message,
                            shared: subscription.shared.clone(),
                            acknowledged: false,
                        };
                        return Some((Ok(delivery), subscription));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            topic = %subscription.topic,
                            skipped,
                            "Subscriber lagged behind, messages were lost"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// Receiving end of one subscription, removes its topic once the last subscriber is gone
struct Subscription {
    receiver: broadcast::Receiver<Message>,
    topic: String,
    shared: Arc<Shared>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut topics = self.shared.topics();

        // The receiver of this subscription is still alive at this point
        let abandoned = topics
            .get(&self.topic)
            .map_or(false, |sender| sender.receiver_count() <= 1);

        if abandoned {
            topics.remove(&self.topic);
            trace!(topic = %self.topic, "Removed topic without subscribers");
        }
    }
}

/// [`Delivery`] yielded by a [`MemoryPubSub`] subscription
pub struct MemoryDelivery {
    message: Message,
    shared: Arc<Shared>,
    acknowledged: bool,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn message(&self) -> &Message {
        &self.message
    }

    fn into_message(self) -> Message {
        self.message
    }

    async fn acknowledge(&mut self) -> EmptyResult {
        if !self.acknowledged {
            self.acknowledged = true;
            self.shared.acknowledged.fetch_add(1, Ordering::SeqCst);
        }

        Ok(())
    }
}
