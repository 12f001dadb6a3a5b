//! Command and event processors: bind handlers to router routes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::dispatch::on_handle;
use super::handler::HandlerBinding;
use crate::router::{AddHandlerError, HandlerRoute, Router};
use crate::telemetry::Tracer;

fn routes(bindings: Vec<HandlerBinding>, tracer: &Arc<dyn Tracer>) -> Vec<HandlerRoute> {
    bindings
        .into_iter()
        .map(|binding| {
            let name = binding.handler_name().to_string();
            let topic = binding.topic().to_string();
            HandlerRoute::new(name, topic, on_handle(binding, tracer.clone()))
        })
        .collect()
}

/// Binds command handlers: at most one handler per command topic.
pub struct CommandProcessor {
    router: Arc<Router>,
    tracer: Arc<dyn Tracer>,
    /// Bound topic -> handler name.
    bound: Mutex<HashMap<String, String>>,
}

impl CommandProcessor {
    pub fn new(router: Arc<Router>, tracer: Arc<dyn Tracer>) -> Self {
        Self {
            router,
            tracer,
            bound: Mutex::new(HashMap::new()),
        }
    }

    /// Register handlers. Either all are added or none is.
    pub fn add_handlers(&self, bindings: Vec<HandlerBinding>) -> Result<(), AddHandlerError> {
        let mut bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
        if self.router.is_started() {
            return Err(AddHandlerError::RouterRunning);
        }

        let mut batch: HashMap<&str, &str> = HashMap::new();
        for binding in &bindings {
            let topic = binding.topic();
            let existing = bound
                .get(topic)
                .map(String::as_str)
                .or_else(|| batch.get(topic).copied());
            if let Some(existing) = existing {
                return Err(AddHandlerError::DuplicateCommandHandler {
                    topic: topic.to_string(),
                    existing: existing.to_string(),
                });
            }
            batch.insert(topic, binding.handler_name());
        }
        let added: Vec<(String, String)> = batch
            .into_iter()
            .map(|(topic, name)| (topic.to_string(), name.to_string()))
            .collect();

        self.router.add_handlers(routes(bindings, &self.tracer))?;

        for (topic, name) in added {
            debug!(handler = %name, topic = %topic, "Command handler bound");
            bound.insert(topic, name);
        }
        Ok(())
    }

    /// Handler name bound to a command topic.
    pub fn handler_for(&self, topic: &str) -> Option<String> {
        self.bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
    }
}

/// Binds event handlers: any number per event topic.
pub struct EventProcessor {
    router: Arc<Router>,
    tracer: Arc<dyn Tracer>,
    /// Bound topic -> handler names.
    bound: Mutex<HashMap<String, HashSet<String>>>,
}

impl EventProcessor {
    pub fn new(router: Arc<Router>, tracer: Arc<dyn Tracer>) -> Self {
        Self {
            router,
            tracer,
            bound: Mutex::new(HashMap::new()),
        }
    }

    /// Register handlers. Either all are added or none is.
    pub fn add_handlers(&self, bindings: Vec<HandlerBinding>) -> Result<(), AddHandlerError> {
        let mut bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
        let added: Vec<(String, String)> = bindings
            .iter()
            .map(|b| (b.topic().to_string(), b.handler_name().to_string()))
            .collect();

        self.router.add_handlers(routes(bindings, &self.tracer))?;

        for (topic, name) in added {
            debug!(handler = %name, topic = %topic, "Event handler bound");
            bound.entry(topic).or_default().insert(name);
        }
        Ok(())
    }

    /// Handler names bound to an event topic, sorted.
    pub fn handlers_for(&self, topic: &str) -> Vec<String> {
        let bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = bound
            .get(topic)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}
