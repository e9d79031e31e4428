use std::{path::PathBuf, time::Duration};

use crate::{reconnect::ReconnectPolicy, sidecar::DEFAULT_SIDECAR_PORT};

/// Runtime settings for the session lifecycle controller and the sidecar.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    /// Base directory holding one credential directory per number.
    pub auth_dir: PathBuf,
    /// Directory containing the sidecar (`package.json`); discovered when
    /// unset.
    pub sidecar_dir: Option<PathBuf>,
    pub sidecar_port: u16,
    /// Delay before requesting a pairing code for an unregistered number.
    pub pairing_delay: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            auth_dir: PathBuf::from("session"),
            sidecar_dir: None,
            sidecar_port: DEFAULT_SIDECAR_PORT,
            pairing_delay: Duration::from_secs(3),
            reconnect: ReconnectPolicy::default(),
        }
    }
}
