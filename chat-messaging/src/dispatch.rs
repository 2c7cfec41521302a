use chat_core::ClientEvent;
use std::panic::{self, AssertUnwindSafe};
use tracing;

use crate::service::MessagingService;

/// Decode one inbound text frame and route it. Failures are reported to the
/// sending socket as an `error` event; the connection is never dropped here.
pub fn handle_frame(service: &MessagingService, socket_id: &str, frame: &str) {
    match ClientEvent::parse(frame) {
        Ok(event) => dispatch(service, socket_id, event),
        Err(e) => {
            tracing::warn!(socket_id = %socket_id, "Rejected inbound frame: {}", e);
            service.reply_error(socket_id, e.to_string());
        }
    }
}

pub fn dispatch(service: &MessagingService, socket_id: &str, event: ClientEvent) {
    let name = event.name();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| service.handle(socket_id, event)));

    match outcome {
        Ok(Ok(())) => {
            tracing::trace!(socket_id = %socket_id, event = name, "Handled event");
        }
        Ok(Err(e)) => {
            tracing::warn!(socket_id = %socket_id, event = name, "Event failed: {}", e);
            service.reply_error(socket_id, e.to_string());
        }
        Err(_) => {
            tracing::error!(socket_id = %socket_id, event = name, "Handler panicked");
            service.reply_error(socket_id, format!("Failed to process {}", name));
        }
    }
}
