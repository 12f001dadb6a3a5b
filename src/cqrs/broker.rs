//! Broker facade.
//!
//! Assembles pubsub, router, buses and processors. The router gets the
//! default chain `Recoverer -> CorrelationId -> Propagation -> Retry`;
//! extra middlewares run inside it, closest to the handler.

use std::sync::Arc;

use tracing::{error, info};

use super::bus::{CommandBus, EventBus};
use super::handler::{Command, Event, HandlerBinding};
use super::processor::{CommandProcessor, EventProcessor};
use super::BrokerError;
use crate::config::{Config, PubSubConfig, RetryConfig};
use crate::context::Context;
use crate::middleware::{CorrelationId, Middleware, Propagation, Recoverer, Retry, RetryStats};
use crate::pubsub::{ChannelPubSub, PubSub};
use crate::router::{Router, RouterState};
use crate::telemetry::{Tracer, TracingTracer};

/// Builder for [`Broker`].
#[derive(Default)]
pub struct BrokerBuilder {
    pubsub: Option<Arc<dyn PubSub>>,
    pubsub_config: PubSubConfig,
    tracer: Option<Arc<dyn Tracer>>,
    retry: RetryConfig,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl BrokerBuilder {
    /// Use this pubsub instead of a fresh in-memory one.
    pub fn pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    /// Settings for the default in-memory pubsub.
    pub fn pubsub_config(mut self, config: PubSubConfig) -> Self {
        self.pubsub_config = config;
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Append a middleware after the default chain.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> Result<Broker, BrokerError> {
        let pubsub = self
            .pubsub
            .unwrap_or_else(|| Arc::new(ChannelPubSub::new(self.pubsub_config.clone())));
        let tracer = self.tracer.unwrap_or_else(|| Arc::new(TracingTracer));

        let (router, retry_stats) = build_router(self.retry, self.middlewares).map_err(|e| {
            let err = BrokerError::BuildRouter(e);
            error!(severity = "CRITICAL", code = "BUILD_ROUTER_ERROR", error = %err, "Failed to build broker");
            err
        })?;

        Ok(Broker {
            command_bus: CommandBus::new(pubsub.clone(), tracer.clone()),
            event_bus: EventBus::new(pubsub.clone(), tracer.clone()),
            command_processor: CommandProcessor::new(router.clone(), tracer.clone()),
            event_processor: EventProcessor::new(router.clone(), tracer),
            pubsub,
            router,
            retry_stats,
        })
    }
}

fn build_router(
    retry: RetryConfig,
    extra: Vec<Arc<dyn Middleware>>,
) -> Result<(Arc<Router>, RetryStats), crate::errors::BoxError> {
    retry.validate()?;

    let router = Router::new();
    let retry = Retry::new(retry);
    let stats = retry.stats();

    router.add_middleware(Recoverer)?;
    router.add_middleware(CorrelationId)?;
    router.add_middleware(Propagation::default())?;
    router.add_middleware(retry)?;
    for middleware in extra {
        router.add_middleware(SharedMiddleware(middleware))?;
    }

    Ok((Arc::new(router), stats))
}

struct SharedMiddleware(Arc<dyn Middleware>);

impl Middleware for SharedMiddleware {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn wrap(&self, next: crate::middleware::HandlerFn) -> crate::middleware::HandlerFn {
        self.0.wrap(next)
    }
}

/// In-process CQRS broker.
pub struct Broker {
    pubsub: Arc<dyn PubSub>,
    router: Arc<Router>,
    command_bus: CommandBus,
    event_bus: EventBus,
    command_processor: CommandProcessor,
    event_processor: EventProcessor,
    retry_stats: RetryStats,
}

impl Broker {
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::default()
    }

    /// Build with the default chain from configuration.
    pub fn from_config(config: &Config) -> Result<Self, BrokerError> {
        if let Err(e) = config.validate() {
            let err = BrokerError::BuildRouter(e.into());
            error!(severity = "CRITICAL", code = "BUILD_ROUTER_ERROR", error = %err, "Invalid broker configuration");
            return Err(err);
        }
        Self::builder()
            .retry(config.retry.clone())
            .pubsub_config(config.pubsub.clone())
            .build()
    }

    /// Run the broker. Blocks until `ctx` is cancelled or [`Broker::stop`]
    /// is called. All handlers must be added before.
    pub async fn start(&self, ctx: &Context) -> Result<(), BrokerError> {
        info!(correlation_id = ctx.correlation_id().unwrap_or_default(), "Starting cqrs broker");
        self.router
            .run(self.pubsub.clone(), ctx)
            .await
            .map_err(|e| self.run_router_error(e))
    }

    /// Stop consuming and wait for in-flight messages.
    pub async fn stop(&self, ctx: &Context) -> Result<(), BrokerError> {
        info!(correlation_id = ctx.correlation_id().unwrap_or_default(), "Stopping cqrs broker");
        self.router.close().await.map_err(|e| self.run_router_error(e))
    }

    /// Resolves once the broker is running.
    pub async fn running(&self, ctx: &Context) {
        self.router.running().await;
        if self.router.state() == RouterState::Running {
            info!(correlation_id = ctx.correlation_id().unwrap_or_default(), "Cqrs broker is running");
        }
    }

    pub fn state(&self) -> RouterState {
        self.router.state()
    }

    pub fn add_command_handlers(
        &self,
        ctx: &Context,
        handlers: Vec<HandlerBinding>,
    ) -> Result<(), BrokerError> {
        self.command_processor.add_handlers(handlers).map_err(|e| {
            let err = BrokerError::AddCommandHandlers(e);
            error!(correlation_id = ctx.correlation_id().unwrap_or_default(), error = %err, cause = ?err_source(&err), "Failed to add command handlers");
            err
        })
    }

    pub fn add_event_handlers(
        &self,
        ctx: &Context,
        handlers: Vec<HandlerBinding>,
    ) -> Result<(), BrokerError> {
        self.event_processor.add_handlers(handlers).map_err(|e| {
            let err = BrokerError::AddEventHandlers(e);
            error!(correlation_id = ctx.correlation_id().unwrap_or_default(), error = %err, cause = ?err_source(&err), "Failed to add event handlers");
            err
        })
    }

    pub async fn send_command<C: Command>(&self, ctx: &Context, command: &C) -> Result<(), BrokerError> {
        self.command_bus.send(ctx, command).await.map_err(|e| {
            let err = BrokerError::SendCommand(e);
            error!(
                correlation_id = ctx.correlation_id().unwrap_or_default(),
                command = %C::name(),
                error = %err,
                cause = ?err_source(&err),
                "Failed to send command"
            );
            err
        })
    }

    pub async fn send_event<E: Event>(&self, ctx: &Context, event: &E) -> Result<(), BrokerError> {
        self.event_bus.publish(ctx, event).await.map_err(|e| {
            let err = BrokerError::SendEvent(e);
            error!(
                correlation_id = ctx.correlation_id().unwrap_or_default(),
                event = %E::name(),
                error = %err,
                cause = ?err_source(&err),
                "Failed to send event"
            );
            err
        })
    }

    /// Counters of the retry stage.
    pub fn retry_stats(&self) -> RetryStats {
        self.retry_stats.clone()
    }

    pub fn command_bus(&self) -> &CommandBus {
        &self.command_bus
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    fn run_router_error(&self, e: crate::router::RouterError) -> BrokerError {
        let err = BrokerError::RunRouter(e);
        error!(error = %err, cause = ?err_source(&err), "Message router failed");
        err
    }
}

fn err_source(err: &BrokerError) -> Option<String> {
    std::error::Error::source(err).map(|s| s.to_string())
}
