use async_trait::async_trait;

use crate::types::{GroupUpdate, InboundMessage, SessionOrigin};

/// Sink for session events — the Telegram side provides the concrete
/// implementation and routes everything back to the chat in `origin`
/// (via the admin bot when the origin is privileged).
#[async_trait]
pub trait SessionEventSink: Send + Sync {
    /// Deliver a status/pairing notification.
    async fn notify(&self, origin: &SessionOrigin, text: &str);

    /// A regular inbound message arrived on a session.
    async fn inbound_message(&self, origin: &SessionOrigin, number: &str, message: InboundMessage);

    /// A status ("stories") broadcast update arrived on a session.
    async fn status_update(&self, origin: &SessionOrigin, number: &str, message: InboundMessage);

    /// Group membership changed on a session.
    async fn group_update(&self, origin: &SessionOrigin, number: &str, update: GroupUpdate);
}
