//! Correlation id assignment for inbound messages.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::{HandlerFn, Middleware};
use crate::propagation::CORRELATION_ID_KEY;

/// Assigns a fresh UUID v4 correlation id to messages that arrive without
/// one. An existing id is never replaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationId;

impl Middleware for CorrelationId {
    fn name(&self) -> &'static str {
        "correlation_id"
    }

    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        Arc::new(move |ctx, mut msg| {
            let missing = msg
                .metadata
                .get(CORRELATION_ID_KEY)
                .map_or(true, str::is_empty);
            if missing {
                let correlation_id = Uuid::new_v4().to_string();
                debug!(
                    message_id = %msg.id(),
                    correlation_id = %correlation_id,
                    "Assigned correlation id"
                );
                msg.metadata.set(CORRELATION_ID_KEY, correlation_id);
            }
            next(ctx, msg)
        })
    }
}
