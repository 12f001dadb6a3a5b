//! Restores causal context from inbound message metadata.

use std::sync::Arc;

use super::{HandlerFn, Middleware};
use crate::context::Context;
use crate::propagation::Propagator;

/// Extracts correlation id, trace parent and baggage from the message
/// metadata into the context handed downstream.
///
/// The downstream context keeps only the inbound cancellation token; causal
/// fields come from the message alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct Propagation {
    propagator: Propagator,
}

impl Propagation {
    pub fn new(propagator: Propagator) -> Self {
        Self { propagator }
    }
}

impl Middleware for Propagation {
    fn name(&self) -> &'static str {
        "propagation"
    }

    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        let propagator = self.propagator;
        Arc::new(move |ctx, msg| {
            let base = Context::new().with_cancellation(ctx.cancellation_token().clone());
            let ctx = propagator.extract(&base, &msg.metadata);
            next(ctx, msg)
        })
    }
}
