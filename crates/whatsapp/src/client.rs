use std::path::Path;

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

use crate::types::ConnectionEvent;

/// A freshly opened connection: whether the number already holds
/// credentials, and the connection's event stream.
pub struct OpenedSession {
    pub registered: bool,
    pub events: mpsc::Receiver<ConnectionEvent>,
}

/// Seam to the external WhatsApp protocol implementation.
///
/// The production implementation is [`crate::sidecar::SidecarClient`];
/// tests substitute their own.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Construct a connection for `number`, using credentials under
    /// `auth_dir` when present. A second open for the same number replaces
    /// the previous connection's event routing.
    async fn open(&self, number: &str, auth_dir: &Path) -> Result<OpenedSession>;

    /// Request a device-pairing code for an unregistered number.
    async fn request_pairing_code(&self, number: &str) -> Result<String>;

    /// Send a text message through the session for `number`.
    async fn send_text(&self, number: &str, to: &str, body: &str) -> Result<()>;
}
