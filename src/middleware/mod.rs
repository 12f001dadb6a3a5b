//! Handler pipeline stages.
//!
//! A middleware wraps the next handler in the chain and returns a new one.
//! The router composes them so that the first middleware added is the
//! outermost. The default broker chain is:
//!
//! ```text
//! Recoverer -> CorrelationId -> Propagation -> Retry -> processor handler
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::Context;
use crate::errors::BoxError;
use crate::message::Message;

pub mod correlation;
pub mod propagation;
pub mod recoverer;
pub mod retry;

pub use correlation::CorrelationId;
pub use propagation::Propagation;
pub use recoverer::{Recoverer, PANIC_RECOVERED};
pub use retry::{Retry, RetryStats, MAX_RETRIES_REACHED_ERROR};

/// Future returned by a [`HandlerFn`].
pub type HandlerFuture = BoxFuture<'static, Result<(), BoxError>>;

/// Type-erased message handler: the unit the router consumes with and the
/// middlewares wrap.
pub type HandlerFn = Arc<dyn Fn(Context, Message) -> HandlerFuture + Send + Sync>;

/// Build a [`HandlerFn`] from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Context, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |ctx, msg| Box::pin(f(ctx, msg)))
}

/// A pipeline stage.
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Wrap `next`, returning the handler that runs this stage first.
    fn wrap(&self, next: HandlerFn) -> HandlerFn;
}

impl<F> Middleware for F
where
    F: Fn(HandlerFn) -> HandlerFn + Send + Sync,
{
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        self(next)
    }
}

/// Compose `middlewares` around `handler`; the first one ends up outermost.
pub fn chain(middlewares: &[Arc<dyn Middleware>], handler: HandlerFn) -> HandlerFn {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, middleware| middleware.wrap(next))
}
