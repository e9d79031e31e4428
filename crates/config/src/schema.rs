use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub telegram: TelegramSection,
    pub whatsapp: WhatsAppSection,
    pub registry: RegistrySection,
    pub media: MediaSection,
    pub http: HttpSection,
}

/// Telegram bot accounts and the admin gate.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    /// Public bot token from @BotFather.
    #[serde(serialize_with = "serialize_secret")]
    pub public_token: Secret<String>,

    /// Admin bot token from @BotFather.
    #[serde(serialize_with = "serialize_secret")]
    pub admin_token: Secret<String>,

    /// Telegram user ID that bypasses the PIN gate.
    pub owner_id: String,

    /// Six-digit PIN for the admin gate.
    #[serde(serialize_with = "serialize_secret")]
    pub admin_pin: Secret<String>,
}

impl std::fmt::Debug for TelegramSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSection")
            .field("public_token", &"[REDACTED]")
            .field("admin_token", &"[REDACTED]")
            .field("owner_id", &self.owner_id)
            .field("admin_pin", &"[REDACTED]")
            .finish()
    }
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            public_token: Secret::new(String::new()),
            admin_token: Secret::new(String::new()),
            owner_id: String::new(),
            admin_pin: Secret::new(String::new()),
        }
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// WhatsApp sidecar and session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppSection {
    /// Base directory for per-number credential directories.
    pub auth_dir: PathBuf,

    /// Directory containing the Baileys sidecar (package.json).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar_dir: Option<PathBuf>,

    /// Port for the sidecar WebSocket server.
    pub sidecar_port: u16,

    /// Delay before requesting a pairing code for an unregistered number.
    pub pairing_delay_secs: u64,

    pub reconnect: ReconnectSection,
}

impl Default for WhatsAppSection {
    fn default() -> Self {
        Self {
            auth_dir: PathBuf::from("session"),
            sidecar_dir: None,
            sidecar_port: 3061,
            pairing_delay_secs: 3,
            reconnect: ReconnectSection::default(),
        }
    }
}

/// Reconnect policy for dropped sessions. `max_attempts = 0` retries forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

/// Where the link registry is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub path: PathBuf,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("connected_users.json"),
        }
    }
}

/// Song search and download APIs for the `/song` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSection {
    pub search_url: String,
    pub download_url: String,
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            search_url: "https://apis-keith.vercel.app/search/yts".into(),
            download_url: "https://apis-keith.vercel.app/download/spotify".into(),
        }
    }
}

/// Liveness HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
        }
    }
}
