use secrecy::Secret;

/// Which command surface a bot account exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotRole {
    /// Pairing, status, broadcast, unlink, song.
    Public,
    /// Everything the public bot has plus the PIN-gated admin commands.
    Admin,
}

/// Configuration for one bot account.
#[derive(Clone)]
pub struct BotAccountConfig {
    /// Bot token from @BotFather.
    pub token: Secret<String>,
    pub role: BotRole,
    /// Telegram user ID that bypasses the PIN gate.
    pub owner_id: String,
    /// Configured admin PIN. An empty PIN authenticates nobody.
    pub admin_pin: Secret<String>,
}

impl std::fmt::Debug for BotAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotAccountConfig")
            .field("token", &"[REDACTED]")
            .field("role", &self.role)
            .field("owner_id", &self.owner_id)
            .field("admin_pin", &"[REDACTED]")
            .finish()
    }
}
