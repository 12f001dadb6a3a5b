//! Tracing setup and the span collaborator used by buses and processors.
//!
//! Spans are plain `tracing` spans; the W3C trace parent that travels in
//! message metadata is derived alongside each span so that a consumer span
//! continues the producer's trace.

use std::error::Error as StdError;

use tracing::field::Empty;
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;
use crate::context::Context;
use crate::errors;
use crate::propagation::TraceParent;

/// Initialize tracing with COURIER_LOG environment variable.
///
/// Defaults to "info" level if COURIER_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Same as [`init_tracing`], with JSON-formatted output.
pub fn init_tracing_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Role of a span in a message exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// Publishing a message.
    Producer,
    /// Handling a received message.
    Consumer,
    Internal,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
            SpanKind::Internal => "internal",
        }
    }
}

/// An open span. Dropping it closes the span.
#[derive(Debug, Clone)]
pub struct SpanHandle {
    span: Span,
}

impl SpanHandle {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    pub fn disabled() -> Self {
        Self {
            span: Span::none(),
        }
    }

    /// Underlying span, for `Instrument`.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn record_ok(&self) {
        self.span.record("otel.status_code", "OK");
    }

    pub fn record_error(&self, err: &(dyn StdError + 'static)) {
        self.span.record("otel.status_code", "ERROR");
        self.span.record("error", tracing::field::display(err));
        self.span.record("error.code", errors::code(err).as_str());
    }
}

/// Starts spans around publish and handle operations.
pub trait Tracer: Send + Sync {
    /// Open a span named `name` as a child of `ctx`'s trace, returning the
    /// context to pass downstream (carrying the new span's trace parent).
    fn start(&self, ctx: &Context, name: &str, kind: SpanKind) -> (Context, SpanHandle);
}

/// [`Tracer`] backed by the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn start(&self, ctx: &Context, name: &str, kind: SpanKind) -> (Context, SpanHandle) {
        let trace_parent = match ctx.trace_parent() {
            Some(parent) => parent.child(),
            None => TraceParent::new_root(),
        };
        let parent_span_id = ctx.trace_parent().map(|p| p.span_id().to_string());

        let span = tracing::info_span!(
            "courier",
            otel.name = %name,
            otel.kind = kind.as_str(),
            otel.status_code = Empty,
            trace_id = %trace_parent.trace_id(),
            span_id = %trace_parent.span_id(),
            parent_span_id = parent_span_id.as_deref().unwrap_or(""),
            correlation_id = ctx.correlation_id().unwrap_or(""),
            error = Empty,
            error.code = Empty,
        );

        (ctx.clone().with_trace_parent(trace_parent), SpanHandle::new(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_span_starts_new_trace() {
        let (ctx, _span) = TracingTracer.start(&Context::new(), "orders.send", SpanKind::Producer);
        assert!(ctx.trace_parent().is_some());
    }

    #[test]
    fn test_child_span_continues_trace() {
        let parent = TraceParent::new_root();
        let ctx = Context::new()
            .with_correlation_id("corr-1")
            .with_trace_parent(parent.clone());

        let (child, _span) = TracingTracer.start(&ctx, "orders.handle", SpanKind::Consumer);
        let child_parent = child.trace_parent().unwrap();

        assert_eq!(child_parent.trace_id(), parent.trace_id());
        assert_ne!(child_parent.span_id(), parent.span_id());
        assert_eq!(child.correlation_id(), Some("corr-1"));
    }

    #[test]
    fn test_child_context_shares_cancellation() {
        let ctx = Context::new();
        let (child, _span) = TracingTracer.start(&ctx, "x", SpanKind::Internal);
        ctx.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_record_on_disabled_span_is_noop() {
        let span = SpanHandle::disabled();
        span.record_ok();
        span.record_error(&errors::not_found());
    }
}
