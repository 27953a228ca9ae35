//! CLI for tracking-bus
//!
//! Subcommands:
//! - `listen` (default): run the vehicle ping subscriber until ctrl-c;
//!   `--memory` swaps RabbitMQ for an in-process broker fed with a ping per
//!   second, for local runs without a broker
//! - `ping`: publish one vehicle ping (useful for smoke tests)

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracking_bus::broker::{AmqpConnector, Connector, MemoryBroker};
use tracking_bus::config::{Settings, load_config};
use tracking_bus::model::{TrackedMessage, VehiclePing};
use tracking_bus::utils::error::HandlerError;
use tracking_bus::utils::logging;
use tracking_bus::{Incoming, MessagePublisher, MessageSubscriber};

const SOURCE: &str = "tracking-bus";

#[derive(Parser)]
#[command(name = "tracking-bus")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Consume vehicle pings and log them
    Listen {
        /// Use an in-process broker with a local ping feed instead of RabbitMQ
        #[arg(long)]
        memory: bool,
    },
    /// Publish a single vehicle ping on the configured publish route
    Ping {
        #[arg(long)]
        id: u64,
        /// Device timestamp in seconds (defaults to now)
        #[arg(long)]
        ts: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };
    logging::init(&settings.logging.level);

    let cli = Cli::parse();
    let outcome = match cli.command.unwrap_or(Command::Listen { memory: false }) {
        Command::Listen { memory } => run_listener(&settings, memory).await,
        Command::Ping { id, ts } => run_ping(&settings, id, ts).await,
    };

    if let Err(e) = outcome {
        error!("tracking-bus failed: {}", e);
        std::process::exit(1);
    }
}

async fn run_listener(settings: &Settings, memory: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = settings.broker_config()?;
    let mut feed = None;
    let connector: Arc<dyn Connector> = if memory {
        let broker = MemoryBroker::new();
        let publisher = MessagePublisher::new(settings.publisher_config()?, Arc::new(broker.clone()));
        info!("Using the in-process broker");
        feed = Some(tokio::spawn(local_feed(publisher)));
        Arc::new(broker)
    } else {
        Arc::new(AmqpConnector::new())
    };
    info!(
        "Subscribing to {} on {} ({})",
        config.exchange(),
        config.address(),
        config.routing_keys().join(", ")
    );

    let handler = |message: Incoming<TrackedMessage<VehiclePing>>| -> Result<(), HandlerError> {
        match message.decode() {
            Ok(tracked) => {
                info!(
                    route = message.routing_key(),
                    "{}",
                    serde_json::to_string(&tracked).unwrap_or_default()
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    route = message.routing_key(),
                    "{}",
                    serde_json::json!({ "error": e.to_string(), "body": message.text() })
                );
                Err(e.into())
            }
        }
    };

    let handle = MessageSubscriber::new(config, connector, handler)
        .with_retry_policy(settings.retry_policy())
        .spawn();
    let mut state = handle.state();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                if let Some(feed) = &feed {
                    feed.abort();
                }
                handle.shutdown().await?;
                return Ok(());
            }
            changed = state.changed() => {
                if changed.is_err() || handle.is_finished() {
                    break;
                }
                info!("Subscriber state: {:?}", *state.borrow_and_update());
            }
        }
    }

    if let Some(feed) = &feed {
        feed.abort();
    }
    handle.join().await?;
    Ok(())
}

/// Publishes a ping per second on the publish route of `publisher`.
async fn local_feed(publisher: MessagePublisher) {
    let route = publisher.config().routing_keys()[0].clone();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    for id in 1u64.. {
        ticker.tick().await;
        let ping = VehiclePing {
            id,
            ts: chrono::Utc::now().timestamp(),
        };
        let message = TrackedMessage::new(SOURCE, route.clone(), ping);
        if let Err(e) = publisher.publish(&route, &message).await {
            warn!("Local feed publish failed: {}", e);
        }
    }
}

async fn run_ping(
    settings: &Settings,
    id: u64,
    ts: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = settings.publisher_config()?;
    let route = config.routing_keys()[0].clone();
    let publisher = MessagePublisher::new(config, Arc::new(AmqpConnector::new()));

    let ping = VehiclePing {
        id,
        ts: ts.unwrap_or_else(|| chrono::Utc::now().timestamp()),
    };
    let message = TrackedMessage::new(SOURCE, route.clone(), ping);
    publisher
        .publish_with_retry(&route, &message, &settings.retry_policy())
        .await?;
    info!("Published ping for vehicle {} on {}", id, route);

    publisher.close().await?;
    Ok(())
}
