//! Session table and lifecycle controller.
//!
//! `SessionManager` opens connections through a [`ProtocolClient`], keeps
//! the volatile number → handle table, delivers pairing codes, forwards
//! connection events to the [`SessionEventSink`], and reconnects dropped
//! sessions under the configured [`ReconnectPolicy`](crate::ReconnectPolicy).

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock as StdRwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    anyhow::{Result, bail},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {pontis_common::time::epoch_millis, pontis_registry::UserRegistry};

use crate::{
    client::ProtocolClient,
    config::WhatsAppConfig,
    sink::SessionEventSink,
    types::{ConnectionEvent, SessionOrigin},
};

/// One live session in the table.
pub struct SessionHandle {
    pub number: String,
    pub origin: SessionOrigin,
    pub opened_at: i64,
    online: AtomicBool,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Outcome of a broadcast across a chat's linked sessions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// Outcome of an unlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlinkOutcome {
    /// The chat never linked this number; nothing changed.
    NotLinked,
    /// Registry entry removed and session dropped. The registry mutation
    /// sticks even when the credential directory could not be deleted —
    /// `auth_dir_error` reports that case.
    Removed { auth_dir_error: Option<String> },
}

/// Session lifecycle controller. Share as `Arc<SessionManager>`.
pub struct SessionManager {
    config: WhatsAppConfig,
    client: Arc<dyn ProtocolClient>,
    registry: Arc<UserRegistry>,
    sessions: StdRwLock<HashMap<String, Arc<SessionHandle>>>,
    sink: StdRwLock<Option<Arc<dyn SessionEventSink>>>,
}

impl SessionManager {
    pub fn new(
        config: WhatsAppConfig,
        client: Arc<dyn ProtocolClient>,
        registry: Arc<UserRegistry>,
    ) -> Self {
        Self {
            config,
            client,
            registry,
            sessions: StdRwLock::new(HashMap::new()),
            sink: StdRwLock::new(None),
        }
    }

    /// Wire the notification sink. Must happen before the first
    /// `open_session`; sessions opened without a sink only log.
    pub fn set_event_sink(&self, sink: Arc<dyn SessionEventSink>) {
        *self.sink.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    fn sink(&self) -> Option<Arc<dyn SessionEventSink>> {
        self.sink.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn notify(&self, origin: &SessionOrigin, text: &str) {
        match self.sink() {
            Some(sink) => sink.notify(origin, text).await,
            None => debug!(chat_id = origin.chat_id, text, "no sink wired, dropping notification"),
        }
    }

    /// Open (or reopen) a session for `number`, delivering status and
    /// pairing messages to `chat_id`.
    ///
    /// Returns once the connection is constructed and wired; pairing-code
    /// delivery happens in the background.
    pub async fn open_session(
        self: &Arc<Self>,
        number: &str,
        chat_id: &str,
        privileged: bool,
    ) -> Result<()> {
        let origin = SessionOrigin {
            chat_id: chat_id.to_string(),
            privileged,
        };
        self.open_with_attempt(number, origin, 0).await
    }

    async fn open_with_attempt(
        self: &Arc<Self>,
        number: &str,
        origin: SessionOrigin,
        attempt: u32,
    ) -> Result<()> {
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            bail!("invalid phone number: {number:?}");
        }

        let auth_dir = self.config.auth_dir.join(number);
        tokio::fs::create_dir_all(&auth_dir).await?;

        let opened = self.client.open(number, &auth_dir).await?;

        let handle = Arc::new(SessionHandle {
            number: number.to_string(),
            origin: origin.clone(),
            opened_at: epoch_millis(),
            online: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        // One handle per number: a replaced session's tasks are cancelled
        // so it can't deliver stale pairing codes or double-forward events.
        let replaced = self
            .lock_sessions()
            .insert(number.to_string(), Arc::clone(&handle));
        if let Some(old) = replaced {
            debug!(number, "replacing existing session");
            old.cancel.cancel();
        }

        if !opened.registered {
            self.spawn_pairing_task(Arc::clone(&handle));
        }

        if self.registry.link(&origin.chat_id, number).await? {
            info!(number, chat_id = origin.chat_id, "linked number to chat");
        }

        self.spawn_event_pump(handle, opened.events, attempt);

        Ok(())
    }

    /// Request a pairing code after the configured delay and deliver it to
    /// the owning chat. Fire-and-forget; dies with the session token.
    fn spawn_pairing_task(self: &Arc<Self>, handle: Arc<SessionHandle>) {
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = handle.cancel.cancelled() => return,
                _ = tokio::time::sleep(mgr.config.pairing_delay) => {},
            }

            let number = handle.number.as_str();
            match mgr.client.request_pairing_code(number).await {
                Ok(code) => {
                    let formatted = format_pairing_code(&code);
                    mgr.notify(
                        &handle.origin,
                        &format!("🔑 Pairing code for +{number}:\n{formatted}"),
                    )
                    .await;
                },
                Err(e) => {
                    warn!(number, error = %e, "pairing code request failed");
                    mgr.notify(
                        &handle.origin,
                        &format!("❌ Could not generate pairing code for +{number}:\n{e}"),
                    )
                    .await;
                },
            }
        });
    }

    /// Forward connection events to the sink and drive reconnects.
    fn spawn_event_pump(
        self: &Arc<Self>,
        handle: Arc<SessionHandle>,
        mut events: mpsc::Receiver<ConnectionEvent>,
        mut attempt: u32,
    ) {
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            let number = handle.number.clone();
            loop {
                let event = tokio::select! {
                    _ = handle.cancel.cancelled() => break,
                    ev = events.recv() => match ev {
                        Some(ev) => ev,
                        None => break,
                    },
                };

                match event {
                    ConnectionEvent::Open => {
                        handle.online.store(true, Ordering::SeqCst);
                        attempt = 0;
                        info!(number, "session connected");
                        mgr.notify(
                            &handle.origin,
                            &format!("✅ WhatsApp session for +{number} is now connected."),
                        )
                        .await;
                    },
                    ConnectionEvent::Message(msg) if msg.is_status() => {
                        if let Some(sink) = mgr.sink() {
                            sink.status_update(&handle.origin, &number, msg).await;
                        }
                    },
                    ConnectionEvent::Message(msg) => {
                        if let Some(sink) = mgr.sink() {
                            sink.inbound_message(&handle.origin, &number, msg).await;
                        }
                    },
                    ConnectionEvent::GroupUpdate(update) => {
                        if let Some(sink) = mgr.sink() {
                            sink.group_update(&handle.origin, &number, update).await;
                        }
                    },
                    ConnectionEvent::CredentialsSaved => {
                        // Persisted sidecar-side; nothing to do here.
                        debug!(number, "credentials refreshed");
                    },
                    ConnectionEvent::Closed { reason, logged_out } => {
                        handle.online.store(false, Ordering::SeqCst);

                        if logged_out {
                            info!(number, "session logged out, not reconnecting");
                            mgr.notify(
                                &handle.origin,
                                &format!(
                                    "🔒 Session for +{number} was logged out. \
                                     Use /link to pair it again."
                                ),
                            )
                            .await;
                            break;
                        }

                        attempt += 1;
                        let policy = &mgr.config.reconnect;
                        if !policy.should_retry(attempt) {
                            warn!(number, attempt, "giving up on session");
                            mgr.notify(
                                &handle.origin,
                                &format!(
                                    "❌ Session for +{number} kept failing; giving up after \
                                     {} attempts. Use /link to retry.",
                                    attempt - 1
                                ),
                            )
                            .await;
                            break;
                        }

                        let delay = policy.delay_for(attempt);
                        warn!(number, reason, attempt, delay_ms = delay.as_millis() as u64, "session closed, reconnecting");
                        mgr.notify(
                            &handle.origin,
                            &format!(
                                "⚠️ Session for +{number} disconnected ({reason}). \
                                 Reconnecting in {}s...",
                                delay.as_secs().max(1)
                            ),
                        )
                        .await;

                        tokio::select! {
                            _ = handle.cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {},
                        }

                        // Exactly one reconnection attempt per close event;
                        // the replacement session gets its own pump.
                        let mgr2 = Arc::clone(&mgr);
                        let origin = handle.origin.clone();
                        let num = number.clone();
                        tokio::spawn(async move {
                            if let Err(e) = mgr2.open_with_attempt(&num, origin.clone(), attempt).await {
                                warn!(number = num, error = %e, "reconnect failed");
                                mgr2.notify(
                                    &origin,
                                    &format!("❌ Reconnect for +{num} failed: {e}"),
                                )
                                .await;
                            }
                        });
                        break;
                    },
                }
            }
            debug!(number = handle.number, "event pump finished");
        });
    }

    /// Whether a live, connected session exists for `number`.
    pub fn is_online(&self, number: &str) -> bool {
        self.lock_sessions()
            .get(number)
            .is_some_and(|h| h.is_online())
    }

    /// Live session handles, sorted by number for stable display.
    pub fn active_sessions(&self) -> Vec<Arc<SessionHandle>> {
        let mut all: Vec<_> = self.lock_sessions().values().cloned().collect();
        all.sort_by(|a, b| a.number.cmp(&b.number));
        all
    }

    pub fn active_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Send `text` through every live session linked to `chat_id`.
    ///
    /// Sessions that are missing, offline, or fail to send count as
    /// failures; the loop never aborts early.
    pub async fn broadcast(&self, chat_id: &str, text: &str) -> BroadcastReport {
        let body = format!("📢 Broadcast:\n\n{text}");
        let mut report = BroadcastReport::default();

        for record in self.registry.links(chat_id) {
            let number = record.phone_number;
            if !self.is_online(&number) {
                report.failed += 1;
                continue;
            }
            let to = format!("{number}@s.whatsapp.net");
            match self.client.send_text(&number, &to, &body).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!(number, error = %e, "broadcast send failed");
                    report.failed += 1;
                },
            }
        }

        report
    }

    /// Send a text through the session for `number` (admin control path).
    pub async fn send_text(&self, number: &str, to: &str, body: &str) -> Result<()> {
        if !self.lock_sessions().contains_key(number) {
            bail!("no active session for +{number}");
        }
        self.client.send_text(number, to, body).await
    }

    /// Remove a link: registry first (persisted), then the table entry,
    /// then the credential directory.
    pub async fn unlink(&self, chat_id: &str, number: &str) -> Result<UnlinkOutcome> {
        if self.registry.unlink(chat_id, number).await?.is_none() {
            return Ok(UnlinkOutcome::NotLinked);
        }

        if let Some(handle) = self.lock_sessions().remove(number) {
            handle.cancel.cancel();
        }

        let auth_dir = self.config.auth_dir.join(number);
        let auth_dir_error = match tokio::fs::remove_dir_all(&auth_dir).await {
            Ok(()) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                // Registry is already mutated at this point; report rather
                // than roll back.
                warn!(number, error = %e, "failed to delete credential directory");
                Some(e.to_string())
            },
        };

        Ok(UnlinkOutcome::Removed { auth_dir_error })
    }

    pub fn registry(&self) -> &Arc<UserRegistry> {
        &self.registry
    }

    fn lock_sessions(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<SessionHandle>>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Group a pairing code into blocks of four joined by `-`
/// (`"ABCD1234"` → `"ABCD-1234"`).
pub fn format_pairing_code(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    chars
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}
