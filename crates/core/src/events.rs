/// Upward-facing hooks and the supervisor/server handshake

use async_trait::async_trait;
use darkmsg_common::{ContactRequest, IncomingMessage};

/// Callbacks the host application provides.
///
/// Called synchronously from the supervisor's log task and from request
/// handlers; implementations hand work off to their own execution context
/// instead of blocking.
pub trait EventSink: Send + Sync {
    fn on_message_received(&self, message: &IncomingMessage);

    fn on_contact_request_received(&self, request: &ContactRequest);

    fn on_onion_address_changed(&self, address: &str);

    fn on_log_line(&self, line: &str);
}

/// Something the supervisor starts once the hidden service is live
#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    /// Bind and start serving. `false` on failure.
    async fn start_service(&self) -> bool;

    async fn stop_service(&self);
}
