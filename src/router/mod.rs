//! Message router: middleware chain plus one consumption worker per handler.
//!
//! Lifecycle:
//!
//! ```text
//! NotStarted --run()--> Running --(close() | ctx cancel)--> Draining --> Closed
//! ```
//!
//! Registration is only accepted while `NotStarted`; `run` snapshots the
//! registry, so the set of handlers is read-only for the rest of the
//! router's life.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{FutureExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::context::Context;
use crate::errors::{self, Classify, ErrorKind};
use crate::middleware::{chain, HandlerFn, Middleware};
use crate::pubsub::{MessageStream, PubSub, PubSubError};

/// Router lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    NotStarted,
    Running,
    Draining,
    Closed,
}

/// Registration rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddHandlerError {
    #[error("handler '{0}' is already registered")]
    DuplicateHandlerName(String),

    #[error("router is already running, handlers must be added before run")]
    RouterRunning,

    #[error("command topic '{topic}' already has handler '{existing}'")]
    DuplicateCommandHandler { topic: String, existing: String },
}

impl Classify for AddHandlerError {
    fn code(&self) -> &str {
        match self {
            AddHandlerError::DuplicateHandlerName(_) => "DUPLICATE_HANDLER_NAME",
            AddHandlerError::RouterRunning => "ROUTER_RUNNING",
            AddHandlerError::DuplicateCommandHandler { .. } => "DUPLICATE_COMMAND_HANDLER",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            AddHandlerError::RouterRunning => ErrorKind::Internal,
            _ => ErrorKind::Conflict,
        }
    }

    fn is_retryable(&self) -> bool {
        false
    }
}

/// Router lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("router is already running")]
    AlreadyRunning,

    #[error("router is not started")]
    NotStarted,

    #[error("failed to subscribe to topic '{topic}'")]
    Subscribe {
        topic: String,
        #[source]
        source: PubSubError,
    },

    #[error("router workers failed: {}", .0.join("; "))]
    WorkerFailures(Vec<String>),
}

impl Classify for RouterError {
    fn code(&self) -> &str {
        match self {
            RouterError::AlreadyRunning => "ROUTER_ALREADY_RUNNING",
            RouterError::NotStarted => "ROUTER_NOT_STARTED",
            RouterError::Subscribe { .. } => "SUBSCRIBE_ERROR",
            RouterError::WorkerFailures(_) => "WORKER_FAILURES",
        }
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }

    fn is_retryable(&self) -> bool {
        false
    }
}

/// A handler bound to a topic under a unique name.
#[derive(Clone)]
pub struct HandlerRoute {
    pub name: String,
    pub topic: String,
    pub handler: HandlerFn,
}

impl HandlerRoute {
    pub fn new(name: impl Into<String>, topic: impl Into<String>, handler: HandlerFn) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            handler,
        }
    }
}

impl std::fmt::Debug for HandlerRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRoute")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Registry {
    middlewares: Vec<Arc<dyn Middleware>>,
    routes: Vec<HandlerRoute>,
}

/// Routes messages from pubsub subscriptions through the middleware chain
/// to handlers.
pub struct Router {
    registry: Mutex<Registry>,
    /// Set under the registry lock by `run`.
    started: AtomicBool,
    state: watch::Sender<RouterState>,
    shutdown: CancellationToken,
    failures: Mutex<Vec<String>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RouterState::NotStarted);
        Self {
            registry: Mutex::new(Registry::default()),
            started: AtomicBool::new(false),
            state,
            shutdown: CancellationToken::new(),
            failures: Mutex::new(Vec::new()),
        }
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_failures(&self) -> MutexGuard<'_, Vec<String>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a pipeline stage. The first one added runs outermost.
    pub fn add_middleware(&self, middleware: impl Middleware + 'static) -> Result<(), RouterError> {
        let mut registry = self.lock_registry();
        if self.started.load(Ordering::SeqCst) {
            return Err(RouterError::AlreadyRunning);
        }
        debug!(middleware = middleware.name(), "Adding middleware");
        registry.middlewares.push(Arc::new(middleware));
        Ok(())
    }

    /// Register one handler.
    pub fn add_handler(
        &self,
        name: impl Into<String>,
        topic: impl Into<String>,
        handler: HandlerFn,
    ) -> Result<(), AddHandlerError> {
        self.add_handlers(vec![HandlerRoute::new(name, topic, handler)])
    }

    /// Register several handlers. Either all are added or none is.
    pub fn add_handlers(&self, routes: Vec<HandlerRoute>) -> Result<(), AddHandlerError> {
        let mut registry = self.lock_registry();
        if self.started.load(Ordering::SeqCst) {
            return Err(AddHandlerError::RouterRunning);
        }

        let mut names: HashSet<&str> = registry.routes.iter().map(|r| r.name.as_str()).collect();
        for route in &routes {
            if !names.insert(route.name.as_str()) {
                return Err(AddHandlerError::DuplicateHandlerName(route.name.clone()));
            }
        }

        for route in &routes {
            info!(handler = %route.name, topic = %route.topic, "Adding handler");
        }
        registry.routes.extend(routes);
        Ok(())
    }

    /// Whether `run` has been called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Registered handler names, sorted.
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock_registry()
            .routes
            .iter()
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn state(&self) -> RouterState {
        *self.state.borrow()
    }

    /// Resolves once every subscription is established, or once the router
    /// has stopped.
    pub async fn running(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|s| *s != RouterState::NotStarted).await;
    }

    /// Subscribe every handler, then consume until `ctx` is cancelled or
    /// [`Router::close`] is called. Returns after in-flight messages drain.
    pub async fn run(&self, pubsub: Arc<dyn PubSub>, ctx: &Context) -> Result<(), RouterError> {
        let (middlewares, routes) = {
            let registry = self.lock_registry();
            if self.started.swap(true, Ordering::SeqCst) {
                return Err(RouterError::AlreadyRunning);
            }
            (registry.middlewares.clone(), registry.routes.clone())
        };

        info!(handlers = routes.len(), "Starting router");
        let run_ctx = ctx.child();

        // Readiness barrier: every subscription exists before Running.
        let mut subscriptions: Vec<(HandlerRoute, MessageStream)> = Vec::with_capacity(routes.len());
        for route in routes {
            let stream = match pubsub
                .subscribe(run_ctx.cancellation_token().clone(), &route.topic)
                .await
            {
                Ok(stream) => stream,
                Err(source) => {
                    error!(
                        handler = %route.name,
                        topic = %route.topic,
                        error = %source,
                        "Failed to subscribe"
                    );
                    run_ctx.cancel();
                    self.state.send_replace(RouterState::Closed);
                    return Err(RouterError::Subscribe {
                        topic: route.topic,
                        source,
                    });
                }
            };
            debug!(handler = %route.name, topic = %route.topic, "Subscribed");
            subscriptions.push((route, stream));
        }

        let mut workers = JoinSet::new();
        for (route, stream) in subscriptions {
            let handler = chain(&middlewares, route.handler.clone());
            workers.spawn(consume(route, handler, stream, run_ctx.clone()));
        }
        let had_workers = !workers.is_empty();

        self.state.send_replace(RouterState::Running);
        info!("Router is running");

        let mut failures = Vec::new();
        loop {
            tokio::select! {
                _ = run_ctx.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                Some(joined) = workers.join_next() => record(joined, &mut failures),
            }
            if had_workers && workers.is_empty() {
                info!("All subscriptions ended");
                break;
            }
        }

        self.state.send_replace(RouterState::Draining);
        info!("Router draining");
        run_ctx.cancel();
        while let Some(joined) = workers.join_next().await {
            record(joined, &mut failures);
        }

        if !failures.is_empty() {
            error!(failures = ?failures, "Router workers reported failures");
        }
        self.lock_failures().extend(failures);
        self.state.send_replace(RouterState::Closed);
        info!("Router closed");
        Ok(())
    }

    /// Stop consumption and wait for in-flight messages to drain.
    pub async fn close(&self) -> Result<(), RouterError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(RouterError::NotStarted);
        }

        self.shutdown.cancel();
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == RouterState::Closed).await;

        let failures = std::mem::take(&mut *self.lock_failures());
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RouterError::WorkerFailures(failures))
        }
    }
}

fn record(joined: Result<Option<String>, tokio::task::JoinError>, failures: &mut Vec<String>) {
    match joined {
        Ok(None) => {}
        Ok(Some(failure)) => failures.push(failure),
        Err(e) => failures.push(format!("worker task failed: {e}")),
    }
}

/// One subscription's consumption loop. Messages are handled one at a time,
/// in arrival order. Returns a failure description when the worker panicked
/// or its last message ended with a retryable error.
async fn consume(
    route: HandlerRoute,
    handler: HandlerFn,
    mut stream: MessageStream,
    ctx: Context,
) -> Option<String> {
    let name = route.name.clone();
    let worker = async move {
        let mut last_error: Option<String> = None;
        while let Some(message) = stream.next().await {
            let message_id = message.id().to_string();
            debug!(handler = %route.name, topic = %route.topic, message_id = %message_id, "Handling message");

            match handler(ctx.clone(), message).await {
                Ok(()) => last_error = None,
                Err(e) => {
                    // Delivery is at-most-once: the message is not redelivered.
                    let retryable = errors::is_retryable(&*e);
                    error!(
                        handler = %route.name,
                        topic = %route.topic,
                        message_id = %message_id,
                        code = %errors::code(&*e),
                        kind = %errors::kind(&*e),
                        retryable,
                        error = %e,
                        "Handler returned error, message dropped"
                    );
                    // A non-retryable error (a recovered panic included) still
                    // counts as handled. Only an unfinished retry is a failure.
                    last_error = retryable.then(|| format!("{}: {}", route.name, e));
                }
            }
        }
        debug!(handler = %route.name, "Subscription ended");
        last_error
    };

    match AssertUnwindSafe(worker).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            error!(handler = %name, "Worker panicked");
            Some(format!("{name}: worker panicked"))
        }
    }
}
