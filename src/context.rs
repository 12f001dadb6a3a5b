//! Execution context passed to every bus, processor and handler call.
//!
//! Carries cancellation plus the causal fields that must survive the hop
//! through the pubsub: correlation id, W3C trace parent and baggage.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::propagation::{Baggage, TraceParent};

/// Explicit execution context. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    correlation_id: Option<String>,
    trace_parent: Option<TraceParent>,
    baggage: Baggage,
}

impl Context {
    /// Fresh context with its own cancellation token and no causal fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cancellation token, keeping the causal fields.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Copy of this context whose token is a child of ours: cancelling
    /// `self` cancels the child, not the other way round.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_trace_parent(mut self, trace_parent: TraceParent) -> Self {
        self.trace_parent = Some(trace_parent);
        self
    }

    pub fn with_baggage(mut self, baggage: Baggage) -> Self {
        self.baggage = baggage;
        self
    }

    pub fn with_baggage_item(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key, value);
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn trace_parent(&self) -> Option<&TraceParent> {
        self.trace_parent.as_ref()
    }

    pub fn baggage(&self) -> &Baggage {
        &self.baggage
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once this context is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}
