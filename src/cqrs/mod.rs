//! CQRS layer over the router.
//!
//! This module contains:
//! - `Command`/`Event` payload traits and their typed handlers
//! - `HandlerBinding`: type-erased handler registration
//! - `CommandBus`/`EventBus`: send commands and publish events
//! - `CommandProcessor`/`EventProcessor`: bind handlers to router routes
//! - `Broker`: facade assembling all of the above
//!
//! The topic of a command or event is its `name()`.

mod broker;
mod bus;
mod dispatch;
mod handler;
mod marshaler;
mod processor;

pub use broker::{Broker, BrokerBuilder};
pub use bus::{CommandBus, EventBus, PublishError};
pub use handler::{BindingKind, Command, CommandHandler, Event, EventHandler, HandlerBinding};
pub use marshaler::{JsonMarshaler, MarshalError, DECODE_ERROR};
pub use processor::{CommandProcessor, EventProcessor};

use crate::errors::{BoxError, Classify, ErrorKind};
use crate::router::{AddHandlerError, RouterError};

/// Broker-level errors. Each carries a stable code; all are internal.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("failed to build router")]
    BuildRouter(#[source] BoxError),

    #[error("failed to build command bus")]
    BuildCommandBus(#[source] BoxError),

    #[error("failed to build command processor")]
    BuildCommandProcessor(#[source] BoxError),

    #[error("failed to build event bus")]
    BuildEventBus(#[source] BoxError),

    #[error("failed to build event processor")]
    BuildEventProcessor(#[source] BoxError),

    #[error("failed to add command handlers into command processor")]
    AddCommandHandlers(#[source] AddHandlerError),

    #[error("failed to add event handlers into event processor")]
    AddEventHandlers(#[source] AddHandlerError),

    #[error("something went wrong with message router")]
    RunRouter(#[source] RouterError),

    #[error("failed to send command to the command bus")]
    SendCommand(#[source] PublishError),

    #[error("failed to send event to the event bus")]
    SendEvent(#[source] PublishError),
}

impl Classify for BrokerError {
    fn code(&self) -> &str {
        match self {
            BrokerError::BuildRouter(_) => "BUILD_ROUTER_ERROR",
            BrokerError::BuildCommandBus(_) => "BUILD_COMMAND_BUS_ERROR",
            BrokerError::BuildCommandProcessor(_) => "BUILD_COMMAND_PROCESSOR_ERROR",
            BrokerError::BuildEventBus(_) => "BUILD_EVENT_BUS_ERROR",
            BrokerError::BuildEventProcessor(_) => "BUILD_EVENT_PROCESSOR_ERROR",
            BrokerError::AddCommandHandlers(_) => "ADD_COMMAND_HANDLERS_ERROR",
            BrokerError::AddEventHandlers(_) => "ADD_EVENT_HANDLERS_ERROR",
            BrokerError::RunRouter(_) => "RUN_ROUTER_ERROR",
            BrokerError::SendCommand(_) => "SEND_COMMAND_ERROR",
            BrokerError::SendEvent(_) => "SEND_EVENT_ERROR",
        }
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }

    fn is_retryable(&self) -> bool {
        false
    }
}
