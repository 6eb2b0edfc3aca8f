use super::{
    Backend, CommandProcessedParams, ListenParams, Listening, Notification, OperationId, Reply,
    ReplyError, ReplyTimeoutError, TimeoutCause,
};
use crate::constants::{
    HANDLED_OPERATION_ID_METADATA_KEY, NOTIFY_WHEN_EXECUTED_METADATA_KEY,
    NOTIFY_WHEN_EXECUTED_VALUE, OPERATION_ID_METADATA_KEY,
};
use crate::marshal::{JsonMarshaler, Marshaler};
use crate::message::Message;
use crate::transport::{Delivery, DeliveryStream, Publisher, Subscriber};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::error::Error;
use std::future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, instrument, trace, warn, Instrument};

/// Parameters passed to the topic generator of a [`PubSubBackend`]
#[derive(Debug, Clone, Copy)]
pub struct TopicParams<'a> {
    /// Identifier of the exchange
    pub operation_id: &'a OperationId,
    /// Command of the exchange, may be downcast to route by its content
    pub command: &'a (dyn Any + Send + Sync),
    /// Name of the command
    pub command_name: &'a str,
    /// Message carrying the command, only known to the handling side
    pub command_message: Option<&'a Message>,
}

/// Function deriving the topic notifications of an operation are published on
pub type TopicGeneratorFn =
    Arc<dyn Fn(TopicParams<'_>) -> Result<String, BoxedError> + Send + Sync>;

/// Function which may alter a notification message before it is published
///
/// Receives the error of the handler, if there has been one.
pub type ModifyNotificationFn = Arc<
    dyn Fn(&mut Message, Option<&(dyn Error + Send + Sync + 'static)>) -> EmptyResult
        + Send
        + Sync,
>;

/// Errors that may occur while using a [`PubSubBackend`]
#[derive(Error, Debug)]
pub enum PubSubBackendError {
    /// The topic generator failed
    #[error("cannot generate notification topic")]
    TopicGeneration(#[source] BoxedError),
    /// Subscribing to the notification topic failed
    #[error("cannot subscribe to notification topic")]
    Subscribe(#[source] BoxedError),
    /// The command message is marked for notification but carries no operation id
    #[error("command message carries no operation id")]
    MissingOperationId,
    /// The notification could not be serialized
    #[error("cannot marshal notification")]
    Marshal(#[source] BoxedError),
    /// The notification modifier failed
    #[error("cannot modify notification message")]
    ModifyNotification(#[source] BoxedError),
    /// Publishing the notification failed
    #[error("cannot publish notification")]
    Publish(#[source] BoxedError),
}

/// [`Backend`] implementation transporting notifications through topics
///
/// The requesting side subscribes to the notification topic before the command is sent and
/// spawns a background task which waits for the notification carrying its operation id.
/// Topics may be shared between operations as every listener filters incoming notifications
/// by their operation id. Each received notification is acknowledged, regardless of whether
/// it matched.
///
/// One instance serves any number of concurrent operations and result types.
pub struct PubSubBackend<P, S, M = JsonMarshaler> {
    publisher: P,
    subscriber: S,
    marshaler: Arc<M>,
    generate_topic: TopicGeneratorFn,
    listen_timeout: Option<Duration>,
    modify_notification: Option<ModifyNotificationFn>,
}

impl<P, S> PubSubBackend<P, S>
where
    P: Publisher,
    S: Subscriber,
{
    /// Creates a new instance which serializes notifications using JSON and waits indefinitely
    pub fn new(
        publisher: P,
        subscriber: S,
        generate_topic: impl Fn(TopicParams<'_>) -> Result<String, BoxedError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            publisher,
            subscriber,
            marshaler: Arc::new(JsonMarshaler),
            generate_topic: Arc::new(generate_topic),
            listen_timeout: None,
            modify_notification: None,
        }
    }
}

impl<P, S, M> PubSubBackend<P, S, M> {
    /// Limits how long a listener waits for its notification
    pub fn with_listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout = Some(timeout);
        self
    }

    /// Installs a function which is applied to every notification message before publishing
    pub fn with_notification_modifier(
        mut self,
        modify: impl Fn(&mut Message, Option<&(dyn Error + Send + Sync + 'static)>) -> EmptyResult
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.modify_notification = Some(Arc::new(modify));
        self
    }

    /// Replaces the [`Marshaler`] used for notifications
    pub fn with_marshaler<N: Marshaler>(self, marshaler: N) -> PubSubBackend<P, S, N> {
        PubSubBackend {
            publisher: self.publisher,
            subscriber: self.subscriber,
            marshaler: Arc::new(marshaler),
            generate_topic: self.generate_topic,
            listen_timeout: self.listen_timeout,
            modify_notification: self.modify_notification,
        }
    }

    /// Configured upper bound for waiting on a notification
    pub fn listen_timeout(&self) -> Option<Duration> {
        self.listen_timeout
    }
}

#[async_trait]
impl<R, P, S, M> Backend<R> for PubSubBackend<P, S, M>
where
    R: Serialize + DeserializeOwned + Send + 'static,
    P: Publisher + Send + Sync,
    S: Subscriber + Send + Sync,
    M: Marshaler + 'static,
{
    #[instrument(err, skip(self, cancellation, params), fields(command = params.command_name, operation_id = %params.operation_id))]
    async fn listen_for_notifications(
        &self,
        cancellation: CancellationToken,
        params: ListenParams<'_>,
    ) -> Result<Listening<R>, BoxedError> {
        let started = Instant::now();

        let topic = (self.generate_topic)(TopicParams {
            operation_id: params.operation_id,
            command: params.command,
            command_name: params.command_name,
            command_message: None,
        })
        .map_err(PubSubBackendError::TopicGeneration)?;

        let notifications = self
            .subscriber
            .subscribe(&topic)
            .await
            .map_err(PubSubBackendError::Subscribe)?;

        debug!(%topic, "Subscribed to notification topic");

        let (replies, receiver) = mpsc::channel(1);
        let listener = NotificationListener {
            operation_id: params.operation_id.clone(),
            marshaler: self.marshaler.clone(),
            started,
            deadline: self.listen_timeout.map(|timeout| started + timeout),
            result: PhantomData,
        };

        let span = debug_span!("notification_listener", operation_id = %params.operation_id);
        let task = tokio::spawn(
            listener
                .run(notifications, cancellation, replies)
                .instrument(span),
        );

        Ok(Listening::with_task(receiver, task))
    }

    #[instrument(err, skip(self, params), fields(command = params.command_name, message = params.command_message.uuid()))]
    async fn on_command_processed(&self, params: CommandProcessedParams<'_, R>) -> EmptyResult {
        let command_message = params.command_message;

        if command_message.metadata_value(NOTIFY_WHEN_EXECUTED_METADATA_KEY)
            != Some(NOTIFY_WHEN_EXECUTED_VALUE)
        {
            debug!("Command does not expect a notification");
            return Ok(());
        }

        let operation_id: OperationId = command_message
            .metadata_value(OPERATION_ID_METADATA_KEY)
            .ok_or(PubSubBackendError::MissingOperationId)?
            .into();

        let notification = Notification::new(params.handler_result, params.handler_error);
        let has_error = notification.has_error();
        let mut message = self
            .marshaler
            .marshal(&notification)
            .map_err(PubSubBackendError::Marshal)?;
        drop(notification);

        message.set_metadata(HANDLED_OPERATION_ID_METADATA_KEY, operation_id.as_str());

        if let Some(modify) = &self.modify_notification {
            modify(&mut message, params.handler_error)
                .map_err(PubSubBackendError::ModifyNotification)?;
        }

        let topic = (self.generate_topic)(TopicParams {
            operation_id: &operation_id,
            command: params.command,
            command_name: params.command_name,
            command_message: Some(command_message),
        })
        .map_err(PubSubBackendError::TopicGeneration)?;

        debug!(%topic, %operation_id, has_error, "Publishing notification");

        self.publisher
            .publish(&topic, message)
            .await
            .map_err(PubSubBackendError::Publish)?;

        Ok(())
    }
}

/// Background task waiting for the notification of one operation
struct NotificationListener<R, M> {
    operation_id: OperationId,
    marshaler: Arc<M>,
    started: Instant,
    deadline: Option<Instant>,
    result: PhantomData<fn() -> R>,
}

impl<R, M> NotificationListener<R, M>
where
    R: DeserializeOwned + Send + 'static,
    M: Marshaler,
{
    async fn run<D>(
        self,
        mut notifications: DeliveryStream<D>,
        cancellation: CancellationToken,
        replies: mpsc::Sender<Reply<R>>,
    ) where
        D: Delivery + Send + Sync,
    {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => future::pending().await,
            }
        };
        tokio::pin!(expired);

        let reply = loop {
            tokio::select! {
                _ = cancellation.cancelled() => break self.timeout(TimeoutCause::Cancelled),
                _ = &mut expired => break self.timeout(TimeoutCause::DeadlineExceeded),
                delivery = notifications.next() => match delivery {
                    Some(Ok(delivery)) => {
                        if let Some(reply) = self.handle(delivery).await {
                            break reply;
                        }
                    }
                    Some(Err(e)) => warn!("Failed to receive notification: {}", e),
                    None => break self.timeout(TimeoutCause::SubscriptionClosed),
                },
            }
        };

        // The channel has room for exactly this one reply
        if replies.try_send(reply).is_err() {
            debug!("Reply receiver has been dropped before delivery");
        }
    }

    /// Returns a reply if the delivery is the notification this listener waits for
    async fn handle<D>(&self, mut delivery: D) -> Option<Reply<R>>
    where
        D: Delivery + Send + Sync,
    {
        // Notifications of other operations are acknowledged as well so they are not redelivered
        if let Err(e) = delivery.acknowledge().await {
            warn!("Failed to acknowledge notification: {}", e);
        }

        let message = delivery.into_message();
        let handled = message.metadata_value(HANDLED_OPERATION_ID_METADATA_KEY);

        if handled != Some(self.operation_id.as_str()) {
            trace!(?handled, "Skipping notification of a different operation");
            return None;
        }

        let result = match self.marshaler.unmarshal::<Notification<R>>(&message) {
            Ok(notification) => notification.into_result(),
            Err(e) => Err(ReplyError::Protocol(e)),
        };

        debug!(success = result.is_ok(), "Received notification");

        Some(Reply::new(result, Some(message)))
    }

    fn timeout(&self, cause: TimeoutCause) -> Reply<R> {
        let elapsed = self.started.elapsed();
        debug!(?elapsed, %cause, "Stopped waiting for notification");

        Reply::new(Err(ReplyTimeoutError::new(elapsed, cause).into()), None)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::reply::topic::shared_topic;
    use crate::reply::ReplyReceiver;
    use crate::transport::memory::MemoryPubSub;
    use crate::transport::mock::{RecordingPublisher, StaticSubscriber};
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use tokio::time::sleep;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Reservation {
        count: usize,
    }

    #[derive(Debug)]
    struct ReserveSeats {
        tenant: &'static str,
    }

    const COMMAND: ReserveSeats = ReserveSeats { tenant: "acme" };

    type MemoryBackend = Arc<PubSubBackend<MemoryPubSub, MemoryPubSub>>;

    const NOTIFICATION_TOPIC: &str = "notifications";

    fn memory_backend(pubsub: &MemoryPubSub, timeout: Option<Duration>) -> MemoryBackend {
        let backend = PubSubBackend::new(
            pubsub.clone(),
            pubsub.clone(),
            shared_topic(NOTIFICATION_TOPIC),
        );

        Arc::new(match timeout {
            Some(timeout) => backend.with_listen_timeout(timeout),
            None => backend,
        })
    }

    fn command_message(operation_id: &OperationId) -> Message {
        let mut message = Message::new(Vec::new());
        message.set_metadata(OPERATION_ID_METADATA_KEY, operation_id.as_str());
        message.set_metadata(NOTIFY_WHEN_EXECUTED_METADATA_KEY, NOTIFY_WHEN_EXECUTED_VALUE);
        message
    }

    async fn listen<R, B>(
        backend: &B,
        operation_id: &OperationId,
        cancellation: CancellationToken,
    ) -> ReplyReceiver<R>
    where
        R: Send + 'static,
        B: Backend<R>,
    {
        backend
            .listen_for_notifications(
                cancellation,
                ListenParams {
                    command: &COMMAND,
                    command_name: "reserve-seats",
                    operation_id,
                },
            )
            .await
            .unwrap()
            .into_parts()
            .0
    }

    async fn emit<R, B>(
        backend: &B,
        operation_id: &OperationId,
        result: Option<R>,
        error: Option<&str>,
    )
    where
        R: Send + 'static,
        B: Backend<R>,
    {
        let message = command_message(operation_id);
        let error: Option<BoxedError> = error.map(Into::into);

        backend
            .on_command_processed(CommandProcessedParams {
                command: &COMMAND,
                command_name: "reserve-seats",
                command_message: &message,
                handler_result: result,
                handler_error: error.as_deref(),
            })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_matching_notification_before_deadline() {
        let pubsub = MemoryPubSub::default();
        let backend = memory_backend(&pubsub, Some(Duration::from_millis(50)));
        let operation_id = OperationId::generate();
        let started = Instant::now();

        let mut replies: ReplyReceiver<Reservation> =
            listen(&backend, &operation_id, CancellationToken::new()).await;

        let handling_backend = backend.clone();
        let expected_id = operation_id.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            let unrelated = OperationId::generate();
            emit(&handling_backend, &unrelated, Some(Reservation { count: 1 }), None).await;

            sleep(Duration::from_millis(20)).await;
            emit(&handling_backend, &expected_id, Some(Reservation { count: 3 }), None).await;
        });

        let reply = replies.recv().await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(reply.result().unwrap(), &Reservation { count: 3 });
        assert_eq!(
            reply
                .notification()
                .unwrap()
                .metadata_value(HANDLED_OPERATION_ID_METADATA_KEY),
            Some(operation_id.as_str())
        );
        assert!(replies.recv().await.is_none());
        assert_eq!(pubsub.acknowledged(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn time_out_without_notification() {
        let pubsub = MemoryPubSub::default();
        let backend = memory_backend(&pubsub, Some(Duration::from_millis(50)));
        let operation_id = OperationId::generate();

        let mut replies: ReplyReceiver<Reservation> =
            listen(&backend, &operation_id, CancellationToken::new()).await;

        let reply = replies.recv().await.unwrap();
        let error = reply.into_result().unwrap_err();
        let timeout = error.as_timeout().unwrap();

        assert_eq!(timeout.cause(), TimeoutCause::DeadlineExceeded);
        assert!(timeout.elapsed() >= Duration::from_millis(50));
        assert!(replies.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn report_cancellation() {
        let pubsub = MemoryPubSub::default();
        let backend = memory_backend(&pubsub, None);
        let operation_id = OperationId::generate();
        let cancellation = CancellationToken::new();

        let mut replies: ReplyReceiver<Reservation> =
            listen(&backend, &operation_id, cancellation.clone()).await;

        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            cancellation.cancel();
            cancellation.cancel();
        });

        let reply = replies.recv().await.unwrap();
        let error = reply.into_result().unwrap_err();
        let timeout = error.as_timeout().unwrap();

        assert_eq!(timeout.cause(), TimeoutCause::Cancelled);
        assert!(timeout.elapsed() >= Duration::from_millis(20));
        assert!(timeout.elapsed() < Duration::from_millis(50));
        assert!(replies.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn skip_notifications_of_other_operations() {
        let pubsub = MemoryPubSub::default();
        let backend = memory_backend(&pubsub, Some(Duration::from_millis(50)));
        let operation_id = OperationId::generate();

        let mut replies: ReplyReceiver<Reservation> =
            listen(&backend, &operation_id, CancellationToken::new()).await;

        for count in 0..3 {
            emit(&backend, &OperationId::generate(), Some(Reservation { count }), None).await;
        }

        let reply = replies.recv().await.unwrap();

        assert_eq!(
            reply.result().unwrap_err().as_timeout().map(ReplyTimeoutError::cause),
            Some(TimeoutCause::DeadlineExceeded)
        );
        assert_eq!(pubsub.acknowledged(), 3);
    }

    #[tokio::test]
    async fn treat_closed_subscription_as_timeout() {
        let pubsub = MemoryPubSub::default();
        let backend = memory_backend(&pubsub, None);
        let operation_id = OperationId::generate();

        let mut replies: ReplyReceiver<Reservation> =
            listen(&backend, &operation_id, CancellationToken::new()).await;
        pubsub.close();

        let reply = replies.recv().await.unwrap();

        assert_eq!(
            reply.result().unwrap_err().as_timeout().map(ReplyTimeoutError::cause),
            Some(TimeoutCause::SubscriptionClosed)
        );
    }

    #[tokio::test]
    async fn deliver_handler_errors_verbatim() {
        let pubsub = MemoryPubSub::default();
        let backend = memory_backend(&pubsub, None);
        let operation_id = OperationId::generate();

        let mut replies: ReplyReceiver<Reservation> =
            listen(&backend, &operation_id, CancellationToken::new()).await;
        emit(
            &backend,
            &operation_id,
            Some(Reservation { count: 1 }),
            Some("insufficient funds"),
        )
        .await;

        let reply = replies.recv().await.unwrap();
        let error = reply.into_result().unwrap_err();

        assert_eq!(
            error.as_handler_error().map(|e| e.message().to_owned()),
            Some("insufficient funds".to_owned())
        );
        assert_eq!(error.to_string(), "insufficient funds");
    }

    #[tokio::test]
    async fn deliver_empty_results() {
        let pubsub = MemoryPubSub::default();
        let backend = memory_backend(&pubsub, None);
        let operation_id = OperationId::generate();

        let mut replies: ReplyReceiver<()> =
            listen(&backend, &operation_id, CancellationToken::new()).await;
        emit(&backend, &operation_id, Some(()), None).await;

        assert!(replies.recv().await.unwrap().into_result().is_ok());
    }

    #[tokio::test]
    async fn report_malformed_notifications() {
        let pubsub = MemoryPubSub::default();
        let backend = memory_backend(&pubsub, None);
        let operation_id = OperationId::generate();

        let mut replies: ReplyReceiver<Reservation> =
            listen(&backend, &operation_id, CancellationToken::new()).await;

        let mut garbage = Message::new(b"garbage".to_vec());
        garbage.set_metadata(HANDLED_OPERATION_ID_METADATA_KEY, operation_id.as_str());
        pubsub.publish(NOTIFICATION_TOPIC, garbage).await.unwrap();

        let reply = replies.recv().await.unwrap();

        assert!(matches!(reply.result(), Err(ReplyError::Protocol(_))));
        assert!(reply.notification().is_some());
    }

    #[tokio::test]
    async fn stay_silent_without_notification_marker() {
        let publisher = RecordingPublisher::default();
        let backend = PubSubBackend::new(
            publisher.clone(),
            StaticSubscriber::default(),
            shared_topic(NOTIFICATION_TOPIC),
        );

        let message = Message::new(Vec::new());
        Backend::<Reservation>::on_command_processed(
            &backend,
            CommandProcessedParams {
                command: &COMMAND,
                command_name: "reserve-seats",
                command_message: &message,
                handler_result: None,
                handler_error: None,
            },
        )
        .await
        .unwrap();

        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn apply_notification_modifier() {
        let publisher = RecordingPublisher::default();
        let backend = PubSubBackend::new(
            publisher.clone(),
            StaticSubscriber::default(),
            shared_topic(NOTIFICATION_TOPIC),
        )
        .with_notification_modifier(|message, error| {
            message.set_metadata("failed", error.is_some().to_string());
            Ok(())
        });

        let operation_id = OperationId::generate();
        emit(&backend, &operation_id, None::<Reservation>, Some("nope")).await;

        let (topic, message) = publisher.single();

        assert_eq!(topic, NOTIFICATION_TOPIC);
        assert_eq!(message.metadata_value("failed"), Some("true"));
        assert_eq!(
            message.metadata_value(HANDLED_OPERATION_ID_METADATA_KEY),
            Some(operation_id.as_str())
        );
    }

    #[tokio::test]
    async fn reject_marked_commands_without_operation_id() {
        let backend = PubSubBackend::new(
            RecordingPublisher::default(),
            StaticSubscriber::default(),
            shared_topic(NOTIFICATION_TOPIC),
        );

        let mut message = Message::new(Vec::new());
        message.set_metadata(NOTIFY_WHEN_EXECUTED_METADATA_KEY, NOTIFY_WHEN_EXECUTED_VALUE);

        let result = Backend::<Reservation>::on_command_processed(
            &backend,
            CommandProcessedParams {
                command: &COMMAND,
                command_name: "reserve-seats",
                command_message: &message,
                handler_result: None,
                handler_error: None,
            },
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn surface_publishing_failures() {
        let backend = PubSubBackend::new(
            RecordingPublisher::failing("offline"),
            StaticSubscriber::default(),
            shared_topic(NOTIFICATION_TOPIC),
        );

        let message = command_message(&OperationId::generate());
        let result = Backend::<Reservation>::on_command_processed(
            &backend,
            CommandProcessedParams {
                command: &COMMAND,
                command_name: "reserve-seats",
                command_message: &message,
                handler_result: Some(Reservation { count: 1 }),
                handler_error: None,
            },
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn surface_subscription_failures() {
        let backend = PubSubBackend::new(
            RecordingPublisher::default(),
            StaticSubscriber::failing("offline"),
            shared_topic(NOTIFICATION_TOPIC),
        );

        let result = Backend::<Reservation>::listen_for_notifications(
            &backend,
            CancellationToken::new(),
            ListenParams {
                command: &COMMAND,
                command_name: "reserve-seats",
                operation_id: &OperationId::generate(),
            },
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn surface_topic_generation_failures() {
        let backend = PubSubBackend::new(
            RecordingPublisher::default(),
            StaticSubscriber::default(),
            |_: TopicParams<'_>| Err("no topic for you".into()),
        );

        let result = Backend::<Reservation>::listen_for_notifications(
            &backend,
            CancellationToken::new(),
            ListenParams {
                command: &COMMAND,
                command_name: "reserve-seats",
                operation_id: &OperationId::generate(),
            },
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn deliver_to_each_of_many_concurrent_listeners() {
        let pubsub = MemoryPubSub::default();
        let backend = memory_backend(&pubsub, None);

        let mut exchanges = Vec::new();
        for _ in 0..20 {
            let operation_id = OperationId::generate();
            let replies: ReplyReceiver<Reservation> =
                listen(&backend, &operation_id, CancellationToken::new()).await;
            exchanges.push((operation_id, replies));
        }

        for (count, (operation_id, _)) in exchanges.iter().enumerate().rev() {
            emit(&backend, operation_id, Some(Reservation { count }), None).await;
        }

        for (count, (_, mut replies)) in exchanges.into_iter().enumerate() {
            let reply = replies.recv().await.unwrap();

            assert_eq!(reply.result().unwrap(), &Reservation { count });
            assert!(replies.recv().await.is_none());
        }
    }

    #[tokio::test]
    async fn route_by_command_content() {
        let publisher = RecordingPublisher::default();
        let backend = PubSubBackend::new(
            publisher.clone(),
            StaticSubscriber::default(),
            |params: TopicParams<'_>| {
                let command = params
                    .command
                    .downcast_ref::<ReserveSeats>()
                    .ok_or("unexpected command")?;
                Ok(format!("tenants.{}", command.tenant))
            },
        );

        let operation_id = OperationId::generate();
        emit(&backend, &operation_id, Some(Reservation { count: 1 }), None).await;

        let (topic, _) = publisher.single();
        assert_eq!(topic, "tenants.acme");

        let message = command_message(&operation_id);
        let result = Backend::<Reservation>::on_command_processed(
            &backend,
            CommandProcessedParams {
                command: &"not a reservation",
                command_name: "reserve-seats",
                command_message: &message,
                handler_result: None,
                handler_error: None,
            },
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn expose_listen_timeout() {
        let pubsub = MemoryPubSub::default();

        assert_eq!(memory_backend(&pubsub, None).listen_timeout(), None);
        assert_eq!(
            memory_backend(&pubsub, Some(Duration::from_millis(50))).listen_timeout(),
            Some(Duration::from_millis(50))
        );
    }

    #[tokio::test]
    async fn terminate_listener_task_after_reply() {
        let pubsub = MemoryPubSub::default();
        let backend = memory_backend(&pubsub, None);
        let operation_id = OperationId::generate();

        let (mut replies, task) = Backend::<Reservation>::listen_for_notifications(
            &*backend,
            CancellationToken::new(),
            ListenParams {
                command: &COMMAND,
                command_name: "reserve-seats",
                operation_id: &operation_id,
            },
        )
        .await
        .unwrap()
        .into_parts();
        emit(&backend, &operation_id, Some(Reservation { count: 2 }), None).await;

        task.unwrap().await.unwrap();

        assert!(replies.recv().await.unwrap().result().is_ok());
        assert!(replies.recv().await.is_none());
    }
}
