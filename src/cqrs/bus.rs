//! Command and event buses: resolve the topic, encode, inject causal
//! context, publish.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, Instrument};

use super::handler::{Command, Event};
use super::marshaler::{JsonMarshaler, MarshalError};
use crate::context::Context;
use crate::propagation::Propagator;
use crate::pubsub::{PubSub, PubSubError};
use crate::telemetry::{SpanKind, Tracer};

/// Publishing failed before or at the transport.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    PubSub(#[from] PubSubError),
}

#[derive(Clone)]
struct Publisher {
    pubsub: Arc<dyn PubSub>,
    tracer: Arc<dyn Tracer>,
    marshaler: JsonMarshaler,
    propagator: Propagator,
}

impl Publisher {
    async fn publish<T: Serialize>(
        &self,
        ctx: &Context,
        topic: String,
        payload: &T,
        operation: &str,
    ) -> Result<(), PublishError> {
        let (ctx, span) = self
            .tracer
            .start(ctx, &format!("{topic} {operation}"), SpanKind::Producer);

        let result = async {
            let mut message = self.marshaler.marshal(&topic, payload)?;
            self.propagator.inject(&ctx, &mut message.metadata);
            let message_id = message.id().to_string();

            self.pubsub.publish(&topic, vec![message]).await?;
            debug!(topic = %topic, message_id = %message_id, "Published {operation}");
            Ok::<(), PublishError>(())
        }
        .instrument(span.span().clone())
        .await;

        match &result {
            Ok(()) => span.record_ok(),
            Err(e) => span.record_error(e),
        }
        result
    }
}

/// Sends commands. Returns once the transport accepted the message, not
/// once it was handled.
#[derive(Clone)]
pub struct CommandBus {
    publisher: Publisher,
}

impl CommandBus {
    pub fn new(pubsub: Arc<dyn PubSub>, tracer: Arc<dyn Tracer>) -> Self {
        Self {
            publisher: Publisher {
                pubsub,
                tracer,
                marshaler: JsonMarshaler,
                propagator: Propagator,
            },
        }
    }

    pub async fn send<C: Command>(&self, ctx: &Context, command: &C) -> Result<(), PublishError> {
        self.publisher.publish(ctx, C::name(), command, "send").await
    }
}

/// Publishes events to every subscribed handler.
#[derive(Clone)]
pub struct EventBus {
    publisher: Publisher,
}

impl EventBus {
    pub fn new(pubsub: Arc<dyn PubSub>, tracer: Arc<dyn Tracer>) -> Self {
        Self {
            publisher: Publisher {
                pubsub,
                tracer,
                marshaler: JsonMarshaler,
                propagator: Propagator,
            },
        }
    }

    pub async fn publish<E: Event>(&self, ctx: &Context, event: &E) -> Result<(), PublishError> {
        self.publisher.publish(ctx, E::name(), event, "publish").await
    }
}
