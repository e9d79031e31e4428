use std::sync::{Arc, Mutex};

use {
    secrecy::ExposeSecret,
    teloxide::{
        ApiError, RequestError,
        prelude::*,
        types::{AllowedUpdate, BotCommand, UpdateKind},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    admin::AdminGate,
    config::{BotAccountConfig, BotRole},
    handlers,
    outbound::TelegramOutbound,
    state::{AccountState, AccountStateMap, Services},
};

/// Start polling for a single bot account.
///
/// Spawns a background task that processes updates until the returned
/// `CancellationToken` is cancelled.
pub async fn start_polling(
    account_id: String,
    config: BotAccountConfig,
    accounts: AccountStateMap,
    services: Arc<Services>,
) -> anyhow::Result<CancellationToken> {
    // Build bot with a client timeout longer than the long-polling timeout
    // (30s) so the HTTP client doesn't abort before Telegram responds.
    let client = teloxide::net::default_reqwest_settings()
        .timeout(std::time::Duration::from_secs(45))
        .build()?;
    let bot = Bot::with_client(config.token.expose_secret(), client);

    // Verify credentials and get the bot username.
    let me = bot.get_me().await?;
    let bot_username = me.username.clone();

    // Delete any existing webhook so long polling works.
    bot.delete_webhook().send().await?;

    // Register slash commands for autocomplete in Telegram clients.
    let mut commands = vec![
        BotCommand::new("link", "Pair a WhatsApp number"),
        BotCommand::new("status", "Show your sessions"),
        BotCommand::new("broadcast", "Send a message through all your sessions"),
        BotCommand::new("unlink", "Remove a session"),
        BotCommand::new("song", "Fetch a song as audio"),
        BotCommand::new("help", "Show available commands"),
    ];
    if config.role == BotRole::Admin {
        commands.push(BotCommand::new("admin", "Open the admin dashboard"));
    }
    if let Err(e) = bot.set_my_commands(commands).await {
        warn!(account_id, "failed to register bot commands: {e}");
    }

    info!(
        account_id,
        username = ?bot_username,
        "telegram bot connected (webhook cleared)"
    );

    let cancel = CancellationToken::new();

    let outbound = Arc::new(TelegramOutbound::new(Arc::clone(&accounts)));
    let gate = AdminGate::new(
        config.admin_pin.expose_secret().clone(),
        config.owner_id.clone(),
    );

    let state = AccountState {
        bot: bot.clone(),
        bot_username,
        account_id: account_id.clone(),
        config,
        outbound,
        services,
        cancel: cancel.clone(),
        gate: Mutex::new(gate),
    };

    {
        let mut map = accounts.write().unwrap_or_else(|e| e.into_inner());
        map.insert(account_id.clone(), state);
    }

    let cancel_clone = cancel.clone();
    let aid = account_id.clone();
    let poll_accounts = Arc::clone(&accounts);
    tokio::spawn(async move {
        info!(account_id = aid, "starting telegram polling loop");
        let mut offset: i32 = 0;

        loop {
            if cancel_clone.is_cancelled() {
                info!(account_id = aid, "telegram polling stopped");
                break;
            }

            let result = bot
                .get_updates()
                .offset(offset)
                .timeout(30)
                .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
                .await;

            match result {
                Ok(updates) => {
                    debug!(
                        account_id = aid,
                        count = updates.len(),
                        "got telegram updates"
                    );
                    for update in updates {
                        offset = update.id.as_offset();
                        match update.kind {
                            UpdateKind::Message(msg) => {
                                if let Err(e) =
                                    handlers::handle_message(msg, &aid, &poll_accounts).await
                                {
                                    error!(
                                        account_id = aid,
                                        error = %e,
                                        "error handling telegram message"
                                    );
                                }
                            },
                            UpdateKind::CallbackQuery(query) => {
                                if let Err(e) =
                                    handlers::handle_callback_query(query, &aid, &poll_accounts)
                                        .await
                                {
                                    error!(
                                        account_id = aid,
                                        error = %e,
                                        "error handling telegram callback query"
                                    );
                                }
                            },
                            other => {
                                debug!(account_id = aid, "ignoring non-message update: {other:?}");
                            },
                        }
                    }
                },
                Err(e) => {
                    // Another instance is polling with the same token —
                    // keeping both alive just flip-flops updates between
                    // them, so this loop stands down.
                    let is_conflict =
                        matches!(&e, RequestError::Api(ApiError::TerminatedByOtherGetUpdates));

                    if is_conflict {
                        warn!(
                            account_id = aid,
                            "telegram bot disabled: another instance is already running with this token"
                        );
                        cancel_clone.cancel();
                        break;
                    }

                    warn!(account_id = aid, error = %e, "telegram getUpdates failed");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                },
            }
        }
    });

    Ok(cancel)
}
