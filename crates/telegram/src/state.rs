use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use tokio_util::sync::CancellationToken;

use {pontis_media::SongClient, pontis_registry::UserRegistry, pontis_whatsapp::SessionManager};

use crate::{admin::AdminGate, config::BotAccountConfig, outbound::TelegramOutbound};

/// Account ID of the public bot.
pub const PUBLIC_ACCOUNT: &str = "public";
/// Account ID of the admin bot.
pub const ADMIN_ACCOUNT: &str = "admin";

/// Shared account state map.
pub type AccountStateMap = Arc<RwLock<HashMap<String, AccountState>>>;

/// Shared collaborators both bot accounts dispatch into.
pub struct Services {
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<UserRegistry>,
    pub songs: Arc<SongClient>,
}

/// Per-account runtime state.
pub struct AccountState {
    pub bot: teloxide::Bot,
    pub bot_username: Option<String>,
    pub account_id: String,
    pub config: BotAccountConfig,
    pub outbound: Arc<TelegramOutbound>,
    pub services: Arc<Services>,
    pub cancel: CancellationToken,
    /// PIN gate (std::sync::Mutex because every gate operation is a
    /// synchronous map lookup, never held across `.await` points).
    pub gate: Mutex<AdminGate>,
}
