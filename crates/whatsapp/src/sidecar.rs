//! WebSocket client for the Baileys sidecar.
//!
//! One connection carries tagged-JSON traffic for every session. Requests
//! are correlated by `request_id`; everything else is routed by phone
//! number into the owning session's event channel.

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    tokio::sync::{RwLock, mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use crate::{
    client::{OpenedSession, ProtocolClient},
    config::WhatsAppConfig,
    process::{SidecarProcess, find_sidecar_dir, start_sidecar},
    types::{ConnectionEvent, GatewayMessage, GroupUpdate, InboundMessage, SidecarMessage},
};

pub const DEFAULT_SIDECAR_PORT: u16 = 3061;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);
const EVENT_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<StdMutex<HashMap<String, oneshot::Sender<SidecarMessage>>>>;
type RouteMap = Arc<StdMutex<HashMap<String, mpsc::Sender<ConnectionEvent>>>>;

/// Callback invoked for sidecar messages that are not request replies.
pub type MessageCallback = Arc<dyn Fn(SidecarMessage) + Send + Sync>;

/// Handle to a live sidecar WebSocket connection.
pub struct SidecarHandle {
    out_tx: mpsc::Sender<String>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
}

impl SidecarHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Fire-and-forget send.
    pub async fn send(&self, msg: &GatewayMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.out_tx
            .send(json)
            .await
            .map_err(|_| anyhow::anyhow!("sidecar connection closed"))
    }

    /// Send and await the reply with the same `request_id`.
    pub async fn request(&self, msg: &GatewayMessage) -> Result<SidecarMessage> {
        let request_id = msg.request_id().to_string();
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(request_id.clone(), tx);

        if let Err(e) = self.send(msg).await {
            self.lock_pending().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => bail!("sidecar connection dropped mid-request"),
            Err(_) => {
                self.lock_pending().remove(&request_id);
                bail!("sidecar request timed out")
            },
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<SidecarMessage>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Open a WebSocket connection to the sidecar and spawn its reader/writer
/// tasks. Non-reply messages go to `callback`.
pub async fn connect(port: u16, callback: MessageCallback) -> Result<SidecarHandle> {
    let url = format!("ws://127.0.0.1:{port}");
    let (ws, _) = connect_async(&url)
        .await
        .with_context(|| format!("connecting to sidecar at {url}"))?;
    let (mut write, mut read) = ws.split();

    let (out_tx, mut out_rx) = mpsc::channel::<String>(32);
    let connected = Arc::new(AtomicBool::new(true));
    let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));

    let writer_connected = Arc::clone(&connected);
    tokio::spawn(async move {
        while let Some(json) = out_rx.recv().await {
            if let Err(e) = write.send(Message::text(json)).await {
                warn!(error = %e, "sidecar write failed");
                break;
            }
        }
        writer_connected.store(false, Ordering::SeqCst);
    });

    let reader_connected = Arc::clone(&connected);
    let reader_pending = Arc::clone(&pending);
    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "sidecar read failed");
                    break;
                },
            };
            let Message::Text(text) = frame else {
                continue;
            };
            let msg: SidecarMessage = match serde_json::from_str(text.as_str()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "unparseable sidecar frame");
                    continue;
                },
            };
            if let Some(id) = msg.request_id() {
                let waiter = reader_pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(id);
                if let Some(tx) = waiter {
                    let _ = tx.send(msg);
                    continue;
                }
                debug!(request_id = id, "reply with no pending waiter");
                continue;
            }
            callback(msg);
        }
        reader_connected.store(false, Ordering::SeqCst);
        info!("sidecar connection closed");
    });

    Ok(SidecarHandle {
        out_tx,
        pending,
        connected,
    })
}

/// Connect with bounded retries — the sidecar process may still be starting.
pub async fn connect_with_retry(
    port: u16,
    callback: MessageCallback,
    attempts: u32,
) -> Result<SidecarHandle> {
    let mut last_err = None;
    for attempt in 1..=attempts {
        match connect(port, Arc::clone(&callback)).await {
            Ok(handle) => return Ok(handle),
            Err(e) => {
                debug!(attempt, error = %e, "sidecar not reachable yet");
                last_err = Some(e);
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            },
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("sidecar connect failed")))
}

/// Production [`ProtocolClient`]: drives the sidecar process and one shared
/// WebSocket connection, routing per-number events into session channels.
pub struct SidecarClient {
    config: WhatsAppConfig,
    handle: RwLock<Option<SidecarHandle>>,
    process: RwLock<Option<SidecarProcess>>,
    routes: RouteMap,
    auto_start: bool,
}

impl SidecarClient {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            handle: RwLock::new(None),
            process: RwLock::new(None),
            routes: Arc::new(StdMutex::new(HashMap::new())),
            auto_start: true,
        }
    }

    /// Disable automatic sidecar process management — for running the
    /// sidecar by hand during development.
    pub fn without_auto_start(mut self) -> Self {
        self.auto_start = false;
        self
    }

    async fn ensure_connected(&self) -> Result<()> {
        {
            let handle = self.handle.read().await;
            if let Some(h) = handle.as_ref()
                && h.is_connected()
            {
                return Ok(());
            }
        }

        if self.auto_start {
            self.ensure_process_running().await?;
        }

        let mut slot = self.handle.write().await;
        // Double-check after acquiring the write lock.
        if let Some(h) = slot.as_ref()
            && h.is_connected()
        {
            return Ok(());
        }

        let routes = Arc::clone(&self.routes);
        let callback: MessageCallback = Arc::new(move |msg| route_event(msg, &routes));
        let handle = connect_with_retry(self.config.sidecar_port, callback, 10).await?;
        *slot = Some(handle);
        Ok(())
    }

    async fn ensure_process_running(&self) -> Result<()> {
        let mut process = self.process.write().await;

        if let Some(proc) = process.as_mut() {
            if proc.is_running() {
                return Ok(());
            }
            warn!("sidecar process died, restarting");
        }

        let dir = find_sidecar_dir(self.config.sidecar_dir.as_deref())?;
        let proc = start_sidecar(&dir, self.config.sidecar_port, Some(self.config.auth_dir.clone())).await?;
        *process = Some(proc);
        Ok(())
    }

    async fn request(&self, msg: &GatewayMessage) -> Result<SidecarMessage> {
        self.ensure_connected().await?;
        let guard = self.handle.read().await;
        let handle = guard.as_ref().context("sidecar not connected")?;
        handle.request(msg).await
    }

    fn remove_route(&self, number: &str) {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(number);
    }

    /// Stop the sidecar process and drop the connection.
    pub async fn shutdown(&self) -> Result<()> {
        let mut process = self.process.write().await;
        if let Some(proc) = process.as_mut() {
            proc.stop().await?;
        }
        *process = None;
        *self.handle.write().await = None;
        Ok(())
    }
}

#[async_trait]
impl ProtocolClient for SidecarClient {
    async fn open(&self, number: &str, auth_dir: &Path) -> Result<OpenedSession> {
        self.ensure_connected().await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(number.to_string(), tx);

        let msg = GatewayMessage::Login {
            request_id: Uuid::new_v4().to_string(),
            number: number.to_string(),
            auth_dir: auth_dir.display().to_string(),
        };
        let reply = match self.request(&msg).await {
            Ok(reply) => reply,
            Err(e) => {
                self.remove_route(number);
                return Err(e);
            },
        };

        match reply {
            SidecarMessage::LoginResult {
                success: true,
                registered,
                ..
            } => Ok(OpenedSession {
                registered,
                events: rx,
            }),
            SidecarMessage::LoginResult { error, .. } => {
                self.remove_route(number);
                bail!(
                    "sidecar login failed: {}",
                    error.unwrap_or_else(|| "unknown error".into())
                )
            },
            other => {
                self.remove_route(number);
                bail!("unexpected sidecar reply: {other:?}")
            },
        }
    }

    async fn request_pairing_code(&self, number: &str) -> Result<String> {
        let msg = GatewayMessage::RequestPairingCode {
            request_id: Uuid::new_v4().to_string(),
            number: number.to_string(),
        };
        match self.request(&msg).await? {
            SidecarMessage::PairingCode {
                code: Some(code), ..
            } => Ok(code),
            SidecarMessage::PairingCode { error, .. } => bail!(
                "pairing code unavailable: {}",
                error.unwrap_or_else(|| "unknown error".into())
            ),
            other => bail!("unexpected sidecar reply: {other:?}"),
        }
    }

    async fn send_text(&self, number: &str, to: &str, body: &str) -> Result<()> {
        let msg = GatewayMessage::SendText {
            request_id: Uuid::new_v4().to_string(),
            number: number.to_string(),
            to: to.to_string(),
            body: body.to_string(),
        };
        match self.request(&msg).await? {
            SidecarMessage::SendResult { success: true, .. } => Ok(()),
            SidecarMessage::SendResult { error, .. } => bail!(
                "send failed: {}",
                error.unwrap_or_else(|| "unknown error".into())
            ),
            other => bail!("unexpected sidecar reply: {other:?}"),
        }
    }
}

/// Route a sidecar event to the session channel for its number.
fn route_event(msg: SidecarMessage, routes: &StdMutex<HashMap<String, mpsc::Sender<ConnectionEvent>>>) {
    let (number, event) = match msg {
        SidecarMessage::Connected { number } => (number, ConnectionEvent::Open),
        SidecarMessage::Disconnected {
            number,
            reason,
            logged_out,
        } => (number, ConnectionEvent::Closed { reason, logged_out }),
        SidecarMessage::Message {
            number,
            chat,
            sender,
            sender_name,
            body,
        } => (
            number,
            ConnectionEvent::Message(InboundMessage {
                chat,
                sender,
                sender_name,
                body,
            }),
        ),
        SidecarMessage::GroupUpdate {
            number,
            group,
            action,
            participants,
        } => (
            number,
            ConnectionEvent::GroupUpdate(GroupUpdate {
                group,
                action,
                participants,
            }),
        ),
        SidecarMessage::CredsSaved { number } => (number, ConnectionEvent::CredentialsSaved),
        SidecarMessage::Error { number, error } => {
            warn!(?number, error, "sidecar error");
            return;
        },
        other => {
            debug!(?other, "unroutable sidecar message");
            return;
        },
    };

    let sender = routes
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(&number)
        .cloned();
    match sender {
        Some(tx) => {
            if let Err(e) = tx.try_send(event) {
                warn!(number, "session event dropped: {e}");
            }
        },
        None => debug!(number, "event for unknown session"),
    }
}
