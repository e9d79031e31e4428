//! Adapter forwarding WhatsApp session events into Telegram chats.

use std::sync::Arc;

use {async_trait::async_trait, tracing::warn};

use pontis_whatsapp::{GroupUpdate, InboundMessage, SessionEventSink, SessionOrigin};

use crate::{
    outbound::TelegramOutbound,
    state::{ADMIN_ACCOUNT, PUBLIC_ACCOUNT},
};

/// Routes session events back to the chat that owns the session, through
/// the bot account it was opened with.
pub struct BridgeSink {
    outbound: Arc<TelegramOutbound>,
}

impl BridgeSink {
    pub fn new(outbound: Arc<TelegramOutbound>) -> Self {
        Self { outbound }
    }

    fn account_for(origin: &SessionOrigin) -> &'static str {
        if origin.privileged {
            ADMIN_ACCOUNT
        } else {
            PUBLIC_ACCOUNT
        }
    }

    async fn deliver(&self, origin: &SessionOrigin, text: &str) {
        let account = Self::account_for(origin);
        if let Err(e) = self.outbound.send_text(account, &origin.chat_id, text).await {
            warn!(
                account,
                chat_id = origin.chat_id,
                error = %e,
                "failed to deliver session event"
            );
        }
    }
}

#[async_trait]
impl SessionEventSink for BridgeSink {
    async fn notify(&self, origin: &SessionOrigin, text: &str) {
        self.deliver(origin, text).await;
    }

    async fn inbound_message(&self, origin: &SessionOrigin, number: &str, message: InboundMessage) {
        let sender = message
            .sender_name
            .unwrap_or_else(|| message.sender.clone());
        let text = format!("💬 [+{number}] {sender}:\n{}", message.body);
        self.deliver(origin, &text).await;
    }

    async fn status_update(&self, origin: &SessionOrigin, number: &str, message: InboundMessage) {
        let sender = message
            .sender_name
            .unwrap_or_else(|| message.sender.clone());
        let text = format!("📰 [+{number}] status from {sender}:\n{}", message.body);
        self.deliver(origin, &text).await;
    }

    async fn group_update(&self, origin: &SessionOrigin, number: &str, update: GroupUpdate) {
        let text = format!(
            "👥 [+{number}] group {}: {} {}",
            update.group,
            update.action,
            update.participants.join(", ")
        );
        self.deliver(origin, &text).await;
    }
}
