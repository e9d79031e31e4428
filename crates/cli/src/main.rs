mod health;

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    clap::Parser,
    secrecy::ExposeSecret,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    pontis_config::BridgeConfig,
    pontis_media::SongClient,
    pontis_registry::UserRegistry,
    pontis_telegram::{
        ADMIN_ACCOUNT, AccountStateMap, BotAccountConfig, BotRole, BridgeSink, PUBLIC_ACCOUNT,
        Services, TelegramOutbound, start_polling,
    },
    pontis_whatsapp::{ReconnectPolicy, SessionManager, SidecarClient, WhatsAppConfig},
};

#[derive(Parser)]
#[command(name = "pontis", about = "Pontis — Telegram ⇄ WhatsApp bridge")]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Config file path (overrides discovery).
    #[arg(long, env = "PONTIS_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Liveness listener port. Hosting platforms inject this as `PORT`.
    #[arg(long, env = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = match &cli.config {
        Some(path) => pontis_config::load_config(path)?,
        None => pontis_config::discover_and_load(),
    };

    let registry = Arc::new(UserRegistry::load(config.registry.path.clone())?);

    let wa_config = whatsapp_config(&config);
    let client = Arc::new(SidecarClient::new(wa_config.clone()));
    let sessions = Arc::new(SessionManager::new(wa_config, client, Arc::clone(&registry)));

    let songs = Arc::new(SongClient::new(
        config.media.search_url.clone(),
        config.media.download_url.clone(),
    ));
    let services = Arc::new(Services {
        sessions: Arc::clone(&sessions),
        registry: Arc::clone(&registry),
        songs,
    });

    let accounts: AccountStateMap = Arc::new(std::sync::RwLock::new(HashMap::new()));

    // Liveness listener first — hosting platforms probe the port early.
    let port = cli.port.unwrap_or(config.http.port);
    let bind = config.http.bind.clone();
    let health_task = tokio::spawn(async move {
        if let Err(e) = health::serve(&bind, port).await {
            warn!(error = %e, "liveness listener failed");
        }
    });

    let mut cancels = Vec::new();
    for (account_id, token, role) in [
        (PUBLIC_ACCOUNT, &config.telegram.public_token, BotRole::Public),
        (ADMIN_ACCOUNT, &config.telegram.admin_token, BotRole::Admin),
    ] {
        if token.expose_secret().is_empty() {
            warn!(account_id, "no bot token configured; account disabled");
            continue;
        }
        let account_config = BotAccountConfig {
            token: token.clone(),
            role,
            owner_id: config.telegram.owner_id.clone(),
            admin_pin: config.telegram.admin_pin.clone(),
        };
        let cancel = start_polling(
            account_id.to_string(),
            account_config,
            Arc::clone(&accounts),
            Arc::clone(&services),
        )
        .await?;
        cancels.push(cancel);
    }

    if cancels.is_empty() {
        anyhow::bail!("no bot tokens configured — set telegram.public_token or telegram.admin_token");
    }

    // Session events flow back through whichever bot the session was
    // opened with; wire that up now that the accounts exist.
    let outbound = Arc::new(TelegramOutbound::new(Arc::clone(&accounts)));
    sessions.set_event_sink(Arc::new(BridgeSink::new(outbound)));

    info!("pontis bridge is up");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for cancel in cancels {
        cancel.cancel();
    }
    health_task.abort();
    Ok(())
}

fn whatsapp_config(config: &BridgeConfig) -> WhatsAppConfig {
    let reconnect = &config.whatsapp.reconnect;
    WhatsAppConfig {
        auth_dir: config.whatsapp.auth_dir.clone(),
        sidecar_dir: config.whatsapp.sidecar_dir.clone(),
        sidecar_port: config.whatsapp.sidecar_port,
        pairing_delay: Duration::from_secs(config.whatsapp.pairing_delay_secs),
        reconnect: ReconnectPolicy {
            max_attempts: reconnect.max_attempts,
            base_delay: Duration::from_millis(reconnect.base_delay_ms),
            max_delay: Duration::from_millis(reconnect.max_delay_ms),
            multiplier: reconnect.multiplier,
        },
    }
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
