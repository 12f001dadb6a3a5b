//! Converts handler panics into errors.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::error;

use super::{HandlerFn, Middleware};
use crate::errors::{CustomError, ErrorKind};

/// Code of the error produced from a recovered panic.
pub const PANIC_RECOVERED: &str = "PANIC_RECOVERED";

/// Catches a panic anywhere downstream and returns it as an internal,
/// non-retryable error, so one failing handler cannot take down its worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recoverer;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Middleware for Recoverer {
    fn name(&self) -> &'static str {
        "recoverer"
    }

    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        Arc::new(move |ctx, msg| {
            let next = next.clone();
            Box::pin(async move {
                let message_id = msg.id().to_string();
                let topic = msg.topic().to_string();

                // The downstream call happens inside the guarded future, so a
                // panic while building the future is caught as well.
                match AssertUnwindSafe(async move { next(ctx, msg).await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(payload) => {
                        let reason = panic_message(payload.as_ref());
                        error!(
                            message_id = %message_id,
                            topic = %topic,
                            panic = %reason,
                            "Recovered from handler panic"
                        );
                        Err(CustomError::new(format!("panic recovered: {reason}"))
                            .with_kind(ErrorKind::Internal)
                            .with_code(PANIC_RECOVERED)
                            .into())
                    }
                }
            })
        })
    }
}
