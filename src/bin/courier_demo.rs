//! courier-demo: send one command through the broker and watch the event
//! it produces reach its handler.
//!
//! ## Configuration
//! Loaded from `courier.yaml`, the file named by `COURIER_CONFIG`, then
//! `COURIER__*` environment variables. Log level comes from `COURIER_LOG`.
//!
//! ```yaml
//! retry:
//!   initial_interval_ms: 1000
//!   max_attempts: 5
//! pubsub:
//!   subscriber_buffer: 64
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier::config::Config;
use courier::cqrs::EventBus;
use courier::telemetry::init_tracing;
use courier::{BoxError, Broker, Command, CommandHandler, Context, Event, EventHandler, HandlerBinding};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{error, info};

#[derive(Debug, Serialize, Deserialize)]
struct Greet {
    message: String,
}

impl Command for Greet {
    fn name() -> String {
        "Greet".to_string()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Greeted {
    message: String,
}

impl Event for Greeted {
    fn name() -> String {
        "Greeted".to_string()
    }
}

struct GreetHandler {
    events: EventBus,
}

#[async_trait]
impl CommandHandler<Greet> for GreetHandler {
    fn handler_name(&self) -> String {
        "greeter".to_string()
    }

    async fn handle(&self, ctx: &Context, command: Greet) -> Result<(), BoxError> {
        info!(correlation_id = ctx.correlation_id().unwrap_or_default(), message = %command.message, "Greeting");
        let event = Greeted {
            message: command.message,
        };
        self.events.publish(ctx, &event).await?;
        Ok(())
    }
}

struct GreetedLogger {
    done: Arc<Notify>,
}

#[async_trait]
impl EventHandler<Greeted> for GreetedLogger {
    fn handler_name(&self) -> String {
        "greeted-logger".to_string()
    }

    async fn handle(&self, ctx: &Context, event: Greeted) -> Result<(), BoxError> {
        let baggage: Vec<String> = ctx.baggage().iter().map(|(k, v)| format!("{k}={v}")).collect();
        info!(
            correlation_id = ctx.correlation_id().unwrap_or_default(),
            baggage = ?baggage,
            message = %event.message,
            "Greeted"
        );
        self.done.notify_one();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    let broker = Arc::new(Broker::from_config(&config)?);

    let ctx = Context::new()
        .with_correlation_id(uuid::Uuid::new_v4().to_string())
        .with_baggage_item("foo", "foo")
        .with_baggage_item("bar", "bar");

    let done = Arc::new(Notify::new());
    broker.add_command_handlers(
        &ctx,
        vec![HandlerBinding::command(GreetHandler {
            events: broker.event_bus().clone(),
        })],
    )?;
    broker.add_event_handlers(
        &ctx,
        vec![HandlerBinding::event(GreetedLogger { done: done.clone() })],
    )?;

    let run = {
        let broker = broker.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { broker.start(&ctx).await })
    };
    broker.running(&ctx).await;

    broker
        .send_command(
            &ctx,
            &Greet {
                message: "Hello, World!".to_string(),
            },
        )
        .await?;
    info!("Command sent");

    if tokio::time::timeout(Duration::from_secs(5), done.notified()).await.is_err() {
        error!("Timed out waiting for the event");
    }

    broker.stop(&ctx).await?;
    run.await??;
    Ok(())
}
