//! Per-message handling shared by both processors.
//!
//! Opens a consumer span named after the handler, runs the binding and
//! classifies the outcome:
//! - `Ok`: span marked ok
//! - retryable error: returned to the retry stage
//! - anything else: logged and swallowed, the message counts as delivered

use std::sync::Arc;

use tracing::{debug, error, Instrument};

use super::handler::HandlerBinding;
use crate::context::Context;
use crate::errors;
use crate::message::Message;
use crate::middleware::HandlerFn;
use crate::telemetry::{SpanKind, Tracer};

pub(crate) fn on_handle(binding: HandlerBinding, tracer: Arc<dyn Tracer>) -> HandlerFn {
    let binding = Arc::new(binding);
    Arc::new(move |ctx: Context, msg: Message| {
        let binding = binding.clone();
        let tracer = tracer.clone();
        Box::pin(async move {
            let (ctx, span) = tracer.start(&ctx, binding.handler_name(), SpanKind::Consumer);
            let role = binding.kind().as_str();
            let message_id = msg.id().to_string();

            async {
                debug!(
                    handler = %binding.handler_name(),
                    message_id = %message_id,
                    "{role} handling started"
                );

                let result = binding.invoke(ctx, msg).await;

                debug!(
                    handler = %binding.handler_name(),
                    message_id = %message_id,
                    "{role} handling ended"
                );

                match result {
                    Ok(()) => {
                        span.record_ok();
                        Ok(())
                    }
                    Err(e) => {
                        span.record_error(&*e);
                        if errors::is_retryable(&*e) {
                            return Err(e);
                        }
                        error!(
                            handler = %binding.handler_name(),
                            message_id = %message_id,
                            code = %errors::code(&*e),
                            kind = %errors::kind(&*e),
                            retryable = false,
                            error = %e,
                            "{role} handling failed, message dropped"
                        );
                        Ok(())
                    }
                }
            }
            .instrument(span.span().clone())
            .await
        })
    })
}
