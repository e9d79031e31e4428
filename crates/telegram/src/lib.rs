//! Telegram front end for the pontis bridge.
//!
//! Runs the public and admin bot accounts on teloxide: a manual
//! long-polling loop, a typed command grammar, the admin PIN gate, and the
//! outbound sender that also carries WhatsApp session events back to chats.

pub mod admin;
pub mod bot;
pub mod command;
pub mod config;
pub mod error;
pub mod handlers;
pub mod outbound;
pub mod sink;
pub mod state;

pub use {
    bot::start_polling,
    config::{BotAccountConfig, BotRole},
    outbound::TelegramOutbound,
    sink::BridgeSink,
    state::{ADMIN_ACCOUNT, AccountState, AccountStateMap, PUBLIC_ACCOUNT, Services},
};
