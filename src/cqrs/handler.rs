//! Typed commands, events and their handlers.
//!
//! Handlers are typed by the payload they accept. [`HandlerBinding`] erases
//! that type once, at registration, into a closure that decodes the payload
//! and calls the handler; dispatch never inspects types at runtime.

use std::any::type_name;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::marshaler::JsonMarshaler;
use crate::context::Context;
use crate::errors::BoxError;
use crate::message::Message;

/// A request handled by exactly one handler.
pub trait Command: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Topic name. Defaults to the full Rust type name.
    fn name() -> String {
        type_name::<Self>().to_string()
    }
}

/// A fact broadcast to every subscribed handler.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Topic name. Defaults to the full Rust type name.
    fn name() -> String {
        type_name::<Self>().to_string()
    }
}

#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    /// Unique name, used for the router route and the handling span.
    fn handler_name(&self) -> String;

    async fn handle(&self, ctx: &Context, command: C) -> Result<(), BoxError>;
}

#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    /// Unique name, used for the router route and the handling span.
    fn handler_name(&self) -> String;

    async fn handle(&self, ctx: &Context, event: E) -> Result<(), BoxError>;
}

/// What a binding consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Command,
    Event,
}

impl BindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingKind::Command => "command",
            BindingKind::Event => "event",
        }
    }
}

type Invoke = Arc<dyn Fn(Context, Message) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A handler with its payload type erased.
#[derive(Clone)]
pub struct HandlerBinding {
    handler_name: String,
    topic: String,
    payload_type: &'static str,
    kind: BindingKind,
    invoke: Invoke,
}

impl HandlerBinding {
    /// Bind a command handler to the topic of `C`.
    pub fn command<C, H>(handler: H) -> Self
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let handler_name = handler.handler_name();
        let handler = Arc::new(handler);
        let invoke: Invoke = Arc::new(move |ctx, msg| {
            let handler = handler.clone();
            Box::pin(async move {
                let command: C = JsonMarshaler.unmarshal(&msg).map_err(super::marshaler::decode_error)?;
                handler.handle(&ctx, command).await
            })
        });

        Self {
            handler_name,
            topic: C::name(),
            payload_type: type_name::<C>(),
            kind: BindingKind::Command,
            invoke,
        }
    }

    /// Bind an event handler to the topic of `E`.
    pub fn event<E, H>(handler: H) -> Self
    where
        E: Event,
        H: EventHandler<E>,
    {
        let handler_name = handler.handler_name();
        let handler = Arc::new(handler);
        let invoke: Invoke = Arc::new(move |ctx, msg| {
            let handler = handler.clone();
            Box::pin(async move {
                let event: E = JsonMarshaler.unmarshal(&msg).map_err(super::marshaler::decode_error)?;
                handler.handle(&ctx, event).await
            })
        });

        Self {
            handler_name,
            topic: E::name(),
            payload_type: type_name::<E>(),
            kind: BindingKind::Event,
            invoke,
        }
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Rust type name of the expected payload.
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    /// Decode the message payload and run the handler.
    pub async fn invoke(&self, ctx: Context, msg: Message) -> Result<(), BoxError> {
        (self.invoke)(ctx, msg).await
    }
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("handler_name", &self.handler_name)
            .field("topic", &self.topic)
            .field("payload_type", &self.payload_type)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
