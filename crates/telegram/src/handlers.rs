//! Message and callback-query handlers shared by both bot accounts.

use std::sync::Arc;

use {
    teloxide::{
        payloads::{AnswerCallbackQuerySetters, EditMessageTextSetters, SendMessageSetters},
        prelude::*,
        types::{
            CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, MediaKind, MessageKind,
        },
    },
    tracing::{debug, warn},
    url::Url,
};

use {
    pontis_common::time::format_epoch_millis,
    pontis_registry::LinkRecord,
    pontis_whatsapp::UnlinkOutcome,
};

use crate::{
    admin::{AdminGate, PinKey, PressOutcome},
    command::{self, Command, ControlAction, ParseError},
    config::BotRole,
    outbound::TelegramOutbound,
    state::{AccountStateMap, PUBLIC_ACCOUNT, Services},
};

/// The one reply every `/song` failure collapses into.
const SONG_FAILURE_REPLY: &str = "Download failed. Please try again later.";
const UNAUTHORIZED_REPLY: &str = "❌ This command is only available for super admins.";
const PIN_PROMPT: &str = "🔒 Super Admin Login\n\nPlease enter the 6-digit PIN:";

/// Handle a single inbound Telegram message.
pub async fn handle_message(
    msg: Message,
    account_id: &str,
    accounts: &AccountStateMap,
) -> anyhow::Result<()> {
    let Some(text) = extract_text(&msg) else {
        debug!(account_id, "ignoring non-text message");
        return Ok(());
    };

    let (role, outbound, services) = {
        let accts = accounts.read().unwrap_or_else(|e| e.into_inner());
        let Some(state) = accts.get(account_id) else {
            warn!(account_id, "handler: account not found in state map");
            return Ok(());
        };
        (
            state.config.role,
            Arc::clone(&state.outbound),
            Arc::clone(&state.services),
        )
    };

    let chat_id = msg.chat.id.0.to_string();
    let user_id = msg
        .from
        .as_ref()
        .map(|u| u.id.0.to_string())
        .unwrap_or_default();

    let cmd = match command::parse(&text) {
        Ok(cmd) => cmd,
        Err(ParseError::NotACommand) => return Ok(()),
        Err(e) => {
            outbound.send_text(account_id, &chat_id, &e.to_string()).await?;
            return Ok(());
        },
    };

    execute(
        cmd, role, account_id, &chat_id, &user_id, &outbound, &services, accounts,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn execute(
    cmd: Command,
    role: BotRole,
    account_id: &str,
    chat_id: &str,
    user_id: &str,
    outbound: &TelegramOutbound,
    services: &Services,
    accounts: &AccountStateMap,
) -> anyhow::Result<()> {
    // Everything privileged is rejected outright on the public bot; on the
    // admin bot it additionally needs a gate check below.
    if is_admin_command(&cmd) && role != BotRole::Admin {
        outbound
            .send_text(account_id, chat_id, UNAUTHORIZED_REPLY)
            .await?;
        return Ok(());
    }

    match cmd {
        Command::Start | Command::Help => {
            outbound
                .send_text(account_id, chat_id, &help_text(role))
                .await?;
        },

        Command::Link { number } => {
            let privileged = role == BotRole::Admin;
            link_number(&number, privileged, account_id, chat_id, outbound, services).await?;
        },

        Command::Status => {
            let links = services.registry.links(chat_id);
            let reply = render_status(&links, |n| services.sessions.is_online(n));
            outbound.send_text(account_id, chat_id, &reply).await?;
        },

        Command::Broadcast { text } => {
            if services.registry.links(chat_id).is_empty() {
                outbound
                    .send_text(
                        account_id,
                        chat_id,
                        "😕 You have no WhatsApp sessions. Use /link to add one.",
                    )
                    .await?;
                return Ok(());
            }
            let report = services.sessions.broadcast(chat_id, &text).await;
            let reply = format!(
                "📢 Broadcast finished.\n📩 Sent: {}\n❌ Failed: {}",
                report.sent, report.failed
            );
            outbound.send_text(account_id, chat_id, &reply).await?;
        },

        Command::Unlink { number } => {
            let reply = match services.sessions.unlink(chat_id, &number).await {
                Ok(UnlinkOutcome::NotLinked) => {
                    format!("❌ No session found for +{number}.")
                },
                Ok(UnlinkOutcome::Removed {
                    auth_dir_error: None,
                }) => format!("🗑 Session for +{number} deleted."),
                Ok(UnlinkOutcome::Removed {
                    auth_dir_error: Some(e),
                }) => format!(
                    "🗑 Session for +{number} deleted, but credential cleanup failed: {e}"
                ),
                Err(e) => format!("❌ Failed: {e}"),
            };
            outbound.send_text(account_id, chat_id, &reply).await?;
        },

        Command::Song { query } => {
            song(&query, account_id, chat_id, outbound, services).await?;
        },

        Command::Admin => {
            let authorized = with_gate(accounts, account_id, |g| g.is_authorized(user_id));
            if authorized == Some(true) {
                outbound
                    .send_text(account_id, chat_id, &dashboard_text(services))
                    .await?;
            } else {
                with_gate(accounts, account_id, |g| g.begin(user_id));
                send_pin_keypad(account_id, chat_id, accounts).await?;
            }
        },

        Command::AdminLogout => {
            let logged_out = with_gate(accounts, account_id, |g| g.logout(user_id));
            let reply = if logged_out == Some(true) {
                "🔒 You have been logged out from admin mode."
            } else {
                "❌ You're not in admin mode."
            };
            outbound.send_text(account_id, chat_id, reply).await?;
        },

        // The rest require an authenticated identity.
        other => {
            let authorized = with_gate(accounts, account_id, |g| g.is_authorized(user_id));
            if authorized != Some(true) {
                outbound
                    .send_text(account_id, chat_id, UNAUTHORIZED_REPLY)
                    .await?;
                return Ok(());
            }
            execute_admin(other, account_id, chat_id, outbound, services).await?;
        },
    }

    Ok(())
}

async fn execute_admin(
    cmd: Command,
    account_id: &str,
    chat_id: &str,
    outbound: &TelegramOutbound,
    services: &Services,
) -> anyhow::Result<()> {
    match cmd {
        Command::AdminUsers => {
            let reply = render_admin_users(&services.registry.chats());
            outbound.send_text(account_id, chat_id, &reply).await?;
        },

        Command::AdminSessions => {
            let entries: Vec<(String, String, bool)> = services
                .sessions
                .active_sessions()
                .iter()
                .map(|h| {
                    let owner = services
                        .registry
                        .owner_of(&h.number)
                        .unwrap_or_else(|| "unknown".into());
                    (h.number.clone(), owner, h.is_online())
                })
                .collect();
            let reply = render_admin_sessions(&entries);
            outbound.send_text(account_id, chat_id, &reply).await?;
        },

        Command::AdminBroadcast { text } => {
            let chats = services.registry.chats();
            let total = chats.len();
            outbound
                .send_text(
                    account_id,
                    chat_id,
                    &format!("📢 Starting broadcast to {total} users..."),
                )
                .await?;

            let body = format!(
                "📢 Admin Broadcast:\n\n{text}\n\nThis is an official message from the bot admin."
            );
            let mut sent = 0usize;
            for (target_chat, _) in &chats {
                // Announcements go out through the public bot, where the
                // users are.
                match outbound.send_text(PUBLIC_ACCOUNT, target_chat, &body).await {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        warn!(chat_id = target_chat.as_str(), error = %e, "admin broadcast send failed");
                    },
                }
            }

            let reply = format!(
                "✅ Broadcast completed!\n📩 Sent to: {sent} users\n❌ Failed: {} users",
                total - sent
            );
            outbound.send_text(account_id, chat_id, &reply).await?;
        },

        Command::AdminPair { number } => {
            link_number(&number, true, account_id, chat_id, outbound, services).await?;
        },

        Command::AdminControl { number, action } => {
            let reply = match action {
                ControlAction::Send { to, text } => {
                    match services.sessions.send_text(&number, &to, &text).await {
                        Ok(()) => format!("✅ Message sent via +{number} to {to}"),
                        Err(e) => format!("❌ Error: {e}"),
                    }
                },
                ControlAction::Restart => {
                    match services.sessions.open_session(&number, chat_id, true).await {
                        Ok(()) => format!("✅ Session for +{number} restarted"),
                        Err(e) => format!("❌ Error: {e}"),
                    }
                },
            };
            outbound.send_text(account_id, chat_id, &reply).await?;
        },

        other => {
            debug!(?other, "non-admin command routed to execute_admin");
        },
    }

    Ok(())
}

async fn link_number(
    number: &str,
    privileged: bool,
    account_id: &str,
    chat_id: &str,
    outbound: &TelegramOutbound,
    services: &Services,
) -> anyhow::Result<()> {
    outbound
        .send_text(
            account_id,
            chat_id,
            &format!("⏳ Starting WhatsApp session for +{number}..."),
        )
        .await?;

    let reply = match services
        .sessions
        .open_session(number, chat_id, privileged)
        .await
    {
        Ok(()) => format!(
            "✅ Session ready for +{number}. A pairing code follows if the number is new."
        ),
        Err(e) => format!("❌ Failed: {e}"),
    };
    outbound.send_text(account_id, chat_id, &reply).await?;
    Ok(())
}

async fn song(
    query: &str,
    account_id: &str,
    chat_id: &str,
    outbound: &TelegramOutbound,
    services: &Services,
) -> anyhow::Result<()> {
    let hit = match services.songs.search_first(query).await {
        Ok(Some(hit)) => hit,
        Ok(None) => {
            outbound.send_text(account_id, chat_id, "No songs found!").await?;
            return Ok(());
        },
        Err(e) => {
            warn!(query, error = %e, "song search failed");
            outbound
                .send_text(account_id, chat_id, SONG_FAILURE_REPLY)
                .await?;
            return Ok(());
        },
    };

    outbound
        .send_text(account_id, chat_id, "⏳ Downloading, please wait...")
        .await?;

    let link = match services.songs.resolve(&hit).await {
        Ok(link) => link,
        Err(e) => {
            warn!(query, error = %e, "song resolve failed");
            outbound
                .send_text(account_id, chat_id, SONG_FAILURE_REPLY)
                .await?;
            return Ok(());
        },
    };

    let Ok(audio_url) = Url::parse(&link.download_url) else {
        warn!(url = link.download_url, "song API returned a non-URL");
        outbound
            .send_text(account_id, chat_id, SONG_FAILURE_REPLY)
            .await?;
        return Ok(());
    };

    // Once as a voice note, once as a regular file.
    let delivered = match outbound.send_voice(account_id, chat_id, &audio_url).await {
        Ok(()) => {
            outbound
                .send_document(
                    account_id,
                    chat_id,
                    &audio_url,
                    &format!("{}.mp3", link.title),
                )
                .await
        },
        Err(e) => Err(e),
    };
    if let Err(e) = delivered {
        warn!(query, error = %e, "song delivery failed");
        outbound
            .send_text(account_id, chat_id, SONG_FAILURE_REPLY)
            .await?;
    }

    Ok(())
}

/// Handle a Telegram callback query (PIN keypad press).
pub async fn handle_callback_query(
    query: CallbackQuery,
    account_id: &str,
    accounts: &AccountStateMap,
) -> anyhow::Result<()> {
    let (bot, role, outbound, services) = {
        let accts = accounts.read().unwrap_or_else(|e| e.into_inner());
        let Some(state) = accts.get(account_id) else {
            return Ok(());
        };
        (
            state.bot.clone(),
            state.config.role,
            Arc::clone(&state.outbound),
            Arc::clone(&state.services),
        )
    };

    let Some(data) = query.data.as_deref() else {
        let _ = bot.answer_callback_query(&query.id).await;
        return Ok(());
    };

    let Some(key_data) = data.strip_prefix("pin:") else {
        let _ = bot.answer_callback_query(&query.id).await;
        return Ok(());
    };

    if role != BotRole::Admin {
        let _ = bot.answer_callback_query(&query.id).await;
        return Ok(());
    }

    let Some(key) = PinKey::from_callback(key_data) else {
        let _ = bot.answer_callback_query(&query.id).await;
        return Ok(());
    };

    let user_id = query.from.id.0.to_string();
    let Some(outcome) = with_gate(accounts, account_id, |g| g.press(&user_id, key)) else {
        return Ok(());
    };

    let (chat_id, message_id) = match query.message.as_ref() {
        Some(m) => (m.chat().id, m.id()),
        None => {
            let _ = bot.answer_callback_query(&query.id).await;
            return Ok(());
        },
    };

    match outcome {
        PressOutcome::Updated { entered } => {
            let _ = bot.answer_callback_query(&query.id).await;
            let text = format!("🔒 Super Admin Login\n\nPIN: {}", "•".repeat(entered));
            if let Err(e) = bot
                .edit_message_text(chat_id, message_id, text)
                .reply_markup(pin_keyboard())
                .await
            {
                debug!(account_id, error = %e, "keypad edit failed");
            }
        },
        PressOutcome::Authenticated => {
            let _ = bot.answer_callback_query(&query.id).await;
            // The keypad message has served its purpose.
            let _ = bot.delete_message(chat_id, message_id).await;
            outbound
                .send_text(account_id, &chat_id.0.to_string(), &dashboard_text(&services))
                .await?;
        },
        PressOutcome::WrongPin => {
            let _ = bot
                .answer_callback_query(&query.id)
                .text("❌ Incorrect PIN. Try again.")
                .await;
        },
    }

    Ok(())
}

async fn send_pin_keypad(
    account_id: &str,
    chat_id: &str,
    accounts: &AccountStateMap,
) -> anyhow::Result<()> {
    let bot = {
        let accts = accounts.read().unwrap_or_else(|e| e.into_inner());
        accts.get(account_id).map(|s| s.bot.clone())
    };
    let Some(bot) = bot else { return Ok(()) };

    let chat = ChatId(chat_id.parse::<i64>().unwrap_or(0));
    bot.send_message(chat, PIN_PROMPT)
        .reply_markup(pin_keyboard())
        .await?;
    Ok(())
}

/// 3×3 digit grid plus a 0/delete/submit row.
fn pin_keyboard() -> InlineKeyboardMarkup {
    let digit = |d: u8| {
        InlineKeyboardButton::callback(d.to_string(), format!("pin:{d}"))
    };
    InlineKeyboardMarkup::new(vec![
        vec![digit(1), digit(2), digit(3)],
        vec![digit(4), digit(5), digit(6)],
        vec![digit(7), digit(8), digit(9)],
        vec![
            digit(0),
            InlineKeyboardButton::callback("⌫ Delete", "pin:del"),
            InlineKeyboardButton::callback("✅ Submit", "pin:submit"),
        ],
    ])
}

fn with_gate<R>(
    accounts: &AccountStateMap,
    account_id: &str,
    f: impl FnOnce(&mut AdminGate) -> R,
) -> Option<R> {
    let accts = accounts.read().unwrap_or_else(|e| e.into_inner());
    let state = accts.get(account_id)?;
    let mut gate = state.gate.lock().unwrap_or_else(|e| e.into_inner());
    Some(f(&mut gate))
}

fn extract_text(msg: &Message) -> Option<String> {
    match &msg.kind {
        MessageKind::Common(common) => match &common.media_kind {
            MediaKind::Text(t) => Some(t.text.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn help_text(role: BotRole) -> String {
    let mut text = String::from(
        "🌟 WhatsApp Bridge 🌟\n\n\
         Control a WhatsApp account through this chat.\n\n\
         📌 Commands:\n\
         /link <number> — pair a WhatsApp number\n\
         /status — show your active sessions\n\
         /broadcast <text> — send a message through all your sessions\n\
         /unlink <number> — remove a session\n\
         /song <name> — fetch a song as audio\n\
         /help — this menu",
    );
    if role == BotRole::Admin {
        text.push_str("\n/admin — super admin dashboard");
    }
    text
}

fn dashboard_text(services: &Services) -> String {
    format!(
        "🛠 Super Admin Dashboard\n\n\
         📊 Statistics\n\
         👥 Users: {}\n\
         📱 Linked numbers: {}\n\
         🟢 Active sessions: {}\n\n\
         ⚙️ Commands\n\
         /admin_users — list all bot users\n\
         /admin_sessions — list active sessions\n\
         /admin_broadcast <text> — message every user\n\
         /admin_pair <number> — pair a number\n\
         /admin_control <number> <send|restart> — control a session\n\
         /admin_logout — exit admin mode",
        services.registry.chat_count(),
        services.registry.link_count(),
        services.sessions.active_count(),
    )
}

fn render_status(links: &[LinkRecord], is_online: impl Fn(&str) -> bool) -> String {
    if links.is_empty() {
        return "😕 You have no active WhatsApp sessions. Use /link to add one.".into();
    }

    let entries: Vec<String> = links
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let state = if is_online(&record.phone_number) {
                "Online"
            } else {
                "Offline"
            };
            format!(
                "🔢 {}. +{}\n   📶 {}\n   ⏱ {}",
                i + 1,
                record.phone_number,
                state,
                format_epoch_millis(record.connected_at),
            )
        })
        .collect();

    format!("📋 Your WhatsApp sessions\n\n{}", entries.join("\n\n"))
}

fn render_admin_users(chats: &[(String, Vec<LinkRecord>)]) -> String {
    if chats.is_empty() {
        return "📋 All bot users\n\nNo users found.".into();
    }

    let entries: Vec<String> = chats
        .iter()
        .map(|(chat_id, records)| {
            let numbers: Vec<String> = records
                .iter()
                .map(|r| format!("+{}", r.phone_number))
                .collect();
            format!(
                "👤 {chat_id} — {} session(s)\n🔗 {}",
                records.len(),
                numbers.join(", ")
            )
        })
        .collect();

    format!("📋 All bot users\n\n{}", entries.join("\n\n"))
}

fn render_admin_sessions(entries: &[(String, String, bool)]) -> String {
    if entries.is_empty() {
        return "📋 Active WhatsApp sessions\n\nNo active sessions.".into();
    }

    let lines: Vec<String> = entries
        .iter()
        .map(|(number, owner, online)| {
            format!(
                "📱 +{number}\n   👤 Owner: {owner}\n   📶 {}",
                if *online { "Online" } else { "Offline" }
            )
        })
        .collect();

    format!("📋 Active WhatsApp sessions\n\n{}", lines.join("\n\n"))
}

fn is_admin_command(cmd: &Command) -> bool {
    matches!(
        cmd,
        Command::Admin
            | Command::AdminUsers
            | Command::AdminSessions
            | Command::AdminBroadcast { .. }
            | Command::AdminPair { .. }
            | Command::AdminControl { .. }
            | Command::AdminLogout
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(number: &str) -> LinkRecord {
        LinkRecord {
            phone_number: number.into(),
            connected_at: 1_705_321_800_000,
        }
    }

    #[test]
    fn status_empty_points_at_link() {
        let text = render_status(&[], |_| false);
        assert!(text.contains("/link"));
    }

    #[test]
    fn status_lists_numbers_with_liveness() {
        let links = vec![record("19876543210"), record("447700900123")];
        let text = render_status(&links, |n| n == "19876543210");

        assert!(text.contains("1. +19876543210"));
        assert!(text.contains("2. +447700900123"));
        assert_eq!(text.matches("Online").count(), 1);
        assert_eq!(text.matches("Offline").count(), 1);
        assert!(text.contains("2024-01-15"));
    }

    #[test]
    fn admin_users_rendering() {
        let chats = vec![
            ("chat1".to_string(), vec![record("111111111111")]),
            (
                "chat2".to_string(),
                vec![record("222222222222"), record("333333333333")],
            ),
        ];
        let text = render_admin_users(&chats);
        assert!(text.contains("👤 chat1 — 1 session(s)"));
        assert!(text.contains("+222222222222, +333333333333"));

        assert!(render_admin_users(&[]).contains("No users found."));
    }

    #[test]
    fn admin_sessions_rendering() {
        let entries = vec![
            ("111111111111".to_string(), "chat1".to_string(), true),
            ("222222222222".to_string(), "unknown".to_string(), false),
        ];
        let text = render_admin_sessions(&entries);
        assert!(text.contains("+111111111111"));
        assert!(text.contains("Owner: chat1"));
        assert!(text.contains("Offline"));

        assert!(render_admin_sessions(&[]).contains("No active sessions."));
    }

    #[test]
    fn help_text_mentions_admin_only_for_admin_role() {
        assert!(!help_text(BotRole::Public).contains("/admin"));
        assert!(help_text(BotRole::Admin).contains("/admin"));
    }

    #[test]
    fn keypad_has_twelve_keys() {
        let kb = pin_keyboard();
        let count: usize = kb.inline_keyboard.iter().map(Vec::len).sum();
        assert_eq!(count, 12);
    }

    #[test]
    fn admin_commands_classified() {
        assert!(is_admin_command(&Command::Admin));
        assert!(is_admin_command(&Command::AdminLogout));
        assert!(!is_admin_command(&Command::Status));
        assert!(!is_admin_command(&Command::Link {
            number: "1".into()
        }));
    }
}
