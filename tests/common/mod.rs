//! Shared utilities for integration tests.
//!
//! Provides payload types, a configurable recording handler and a tracing layer
//! that counts critical log events.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use courier::errors::{validation, BoxError, CustomError};
use courier::{Broker, Command, CommandHandler, Context, Event, EventHandler};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{Event as TracingEvent, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, Layer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: String,
}

impl Command for PlaceOrder {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: String,
}

impl Event for OrderPlaced {
    fn name() -> String {
        "OrderPlaced".to_string()
    }
}

/// What a recorder does on each invocation.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    /// Fail retryably for the first N invocations, then succeed.
    FailRetryably(usize),
    AlwaysFailRetryably,
    FailPermanently,
    /// Panic on the first invocation, then succeed.
    PanicOnce,
}

/// One observed invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub order_id: String,
    pub correlation_id: Option<String>,
    pub baggage: Vec<(String, String)>,
}

/// Handler recording every invocation, usable for commands and events.
#[derive(Clone)]
pub struct Recorder {
    name: String,
    behavior: Behavior,
    calls: Arc<Mutex<Vec<Call>>>,
    count: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn order_ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.order_id).collect()
    }

    fn record(&self, ctx: &Context, order_id: &str) -> Result<(), BoxError> {
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(Call {
            at: Instant::now(),
            order_id: order_id.to_string(),
            correlation_id: ctx.correlation_id().map(str::to_string),
            baggage: ctx
                .baggage()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });

        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::FailRetryably(k) if n < k => Err(transient()),
            Behavior::FailRetryably(_) => Ok(()),
            Behavior::AlwaysFailRetryably => Err(transient()),
            Behavior::FailPermanently => Err(validation("order rejected").into()),
            Behavior::PanicOnce if n == 0 => panic!("handler {} panicked", self.name),
            Behavior::PanicOnce => Ok(()),
        }
    }
}

fn transient() -> BoxError {
    CustomError::new("store unavailable")
        .with_code("STORE_UNAVAILABLE")
        .retryable()
        .into()
}

#[async_trait]
impl CommandHandler<PlaceOrder> for Recorder {
    fn handler_name(&self) -> String {
        self.name.clone()
    }

    async fn handle(&self, ctx: &Context, command: PlaceOrder) -> Result<(), BoxError> {
        self.record(ctx, &command.order_id)
    }
}

#[async_trait]
impl EventHandler<OrderPlaced> for Recorder {
    fn handler_name(&self) -> String {
        self.name.clone()
    }

    async fn handle(&self, ctx: &Context, event: OrderPlaced) -> Result<(), BoxError> {
        self.record(ctx, &event.order_id)
    }
}

/// Run the broker in a background task and wait until it is running.
pub async fn start(broker: &Arc<Broker>, ctx: &Context) -> JoinHandle<Result<(), courier::BrokerError>> {
    let handle = {
        let broker = broker.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { broker.start(&ctx).await })
    };
    broker.running(ctx).await;
    handle
}

/// Poll `condition` until it holds. Works under paused time.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(3600), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Run `fut` with `layer` installed as the thread's default subscriber.
/// Only observes events emitted on this thread, so pair it with a
/// current-thread runtime.
pub async fn with_layer<L, F>(layer: L, fut: F) -> F::Output
where
    L: Layer<tracing_subscriber::Registry> + Send + Sync + 'static,
    F: Future,
{
    use tracing_subscriber::layer::SubscriberExt;
    let subscriber = tracing_subscriber::registry().with(layer);
    let _guard = tracing::subscriber::set_default(subscriber);
    fut.await
}

/// Counts events logged with `severity = "CRITICAL"`, by code.
#[derive(Clone, Default)]
pub struct CriticalCounter {
    codes: Arc<Mutex<Vec<String>>>,
}

impl CriticalCounter {
    pub fn count(&self, code: &str) -> usize {
        self.codes.lock().unwrap().iter().filter(|c| *c == code).count()
    }
}

#[derive(Default)]
struct FieldGrab {
    severity: Option<String>,
    code: Option<String>,
}

impl Visit for FieldGrab {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "severity" => self.severity = Some(value.to_string()),
            "code" => self.code = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if matches!(field.name(), "severity" | "code") {
            let rendered = format!("{value:?}").trim_matches('"').to_string();
            self.record_str(field, &rendered);
        }
    }
}

impl<S: Subscriber> Layer<S> for CriticalCounter {
    fn on_event(&self, event: &TracingEvent<'_>, _ctx: LayerContext<'_, S>) {
        let mut grab = FieldGrab::default();
        event.record(&mut grab);
        if grab.severity.as_deref() == Some("CRITICAL") {
            self.codes
                .lock()
                .unwrap()
                .push(grab.code.unwrap_or_default());
        }
    }
}
