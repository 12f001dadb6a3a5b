//! Courier - in-process CQRS broker
//!
//! Topic-based command and event routing over an in-memory pubsub, with a
//! middleware pipeline (panic recovery, correlation, context propagation,
//! bounded exponential-backoff retry) in front of every handler.

pub mod config;
pub mod context;
pub mod cqrs;
pub mod errors;
pub mod message;
pub mod middleware;
pub mod propagation;
pub mod pubsub;
pub mod router;
pub mod telemetry;
pub mod utils;

pub use context::Context;
pub use cqrs::{
    Broker, BrokerBuilder, BrokerError, Command, CommandHandler, Event, EventHandler,
    HandlerBinding,
};
pub use errors::{BoxError, CustomError, ErrorKind};
pub use message::{Message, Metadata};
