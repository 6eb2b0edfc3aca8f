use anyhow::{anyhow, Result};
use options::{LogFormat, MainOptions};
use replybus::command::{Command, CommandProcessor, PubSubCommandBus};
use replybus::reply::topic::per_operation_topic;
use replybus::reply::{await_reply, command_handler_with_result, PubSubBackend, Reply};
use replybus::transport::memory::MemoryPubSub;
#[cfg(feature = "redis")]
use replybus::transport::redis::RedisPubSub;
use replybus::transport::{Publisher, Subscriber};
use replybus::BoxedError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod options;

const NOTIFICATION_TOPIC_PREFIX: &str = "replybus.notifications";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReserveSeats {
    seats: usize,
}

impl Command for ReserveSeats {
    fn name() -> &'static str {
        "reserve-seats"
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Reservation {
    seats: usize,
    remaining: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = init();

    match &options.redis {
        #[cfg(feature = "redis")]
        Some(url) => {
            let transport = RedisPubSub::open(url).map_err(|e| anyhow!(e))?;
            run(Arc::new(transport), &options).await
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(anyhow!("built without redis support")),
        None => run(MemoryPubSub::default(), &options).await,
    }
}

fn init() -> MainOptions {
    let options = MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log.as_str());

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    info!("replybus {}", env!("CARGO_PKG_VERSION"));

    options
}

async fn run<T>(transport: T, options: &MainOptions) -> Result<()>
where
    T: Publisher + Subscriber + Clone + Send + Sync + 'static,
{
    let backend = Arc::new(
        PubSubBackend::new(
            transport.clone(),
            transport.clone(),
            per_operation_topic(NOTIFICATION_TOPIC_PREFIX),
        )
        .with_listen_timeout(Duration::from_millis(options.listen_timeout)),
    );

    let remaining = Arc::new(AtomicUsize::new(options.capacity));
    let mut processor = CommandProcessor::new(transport.clone(), command_topic);
    processor.add_handler(command_handler_with_result(
        "reserve-seats",
        backend.clone(),
        move |_ctx, command: ReserveSeats| {
            let remaining = remaining.clone();
            async move { reserve(&remaining, command.seats) }
        },
    ));

    let cancellation = CancellationToken::new();
    let processing = processor
        .subscribe()
        .await
        .map_err(|e| anyhow!(e))?
        .process(cancellation.child_token());

    let bus = PubSubCommandBus::new(transport, command_topic);
    let requesting = async {
        let mut outcome: Result<()> = Ok(());

        for seats in 1..=options.requests {
            let command = ReserveSeats { seats };
            let reply: Reply<Reservation> =
                match await_reply(&cancellation, &bus, &backend, &command).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        outcome = Err(e.into());
                        break;
                    }
                };

            match reply.into_result() {
                Ok(reservation) => info!(
                    seats = reservation.seats,
                    remaining = reservation.remaining,
                    "Reservation confirmed"
                ),
                Err(e) => warn!(seats, "Reservation rejected: {}", e),
            }
        }

        cancellation.cancel();
        outcome
    };

    let ((), outcome) = tokio::join!(processing, requesting);

    outcome
}

fn command_topic(name: &str) -> String {
    format!("replybus.commands.{}", name)
}

fn reserve(remaining: &AtomicUsize, seats: usize) -> Result<Reservation, BoxedError> {
    let available = remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |available| {
            available.checked_sub(seats)
        })
        .map_err(|_| "insufficient seats")?;

    Ok(Reservation {
        seats,
        remaining: available - seats,
    })
}
