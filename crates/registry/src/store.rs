use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::Mutex,
};

use {
    fd_lock::RwLock,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use pontis_common::time::epoch_millis;

use crate::error::{Context, Error, Result};

/// One linked WhatsApp number under a chat.
///
/// Field names match the on-disk JSON produced since the first release, so
/// existing registry files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    pub phone_number: String,
    pub connected_at: i64,
}

type LinkMap = HashMap<String, Vec<LinkRecord>>;

/// Durable chat → linked-numbers registry.
///
/// The whole map is rewritten to one JSON file on every mutation and loaded
/// once at startup. Interior sync mutex only — never held across `.await`;
/// share as `Arc<UserRegistry>`.
pub struct UserRegistry {
    path: PathBuf,
    inner: Mutex<LinkMap>,
}

impl UserRegistry {
    /// Load the registry from `path`. A missing file is an empty registry;
    /// a malformed file is an error.
    pub fn load(path: PathBuf) -> Result<Self> {
        let map: LinkMap = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("malformed registry {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LinkMap::new(),
            Err(e) => {
                return Err(Error::Message(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            },
        };
        debug!(path = %path.display(), chats = map.len(), "registry loaded");
        Ok(Self {
            path,
            inner: Mutex::new(map),
        })
    }

    /// Append a link iff the chat does not already hold this number.
    ///
    /// Returns `true` when a record was inserted (and persisted), `false`
    /// when the link already existed (no write).
    pub async fn link(&self, chat_id: &str, number: &str) -> Result<bool> {
        {
            let mut map = self.lock();
            let records = map.entry(chat_id.to_string()).or_default();
            if records.iter().any(|r| r.phone_number == number) {
                return Ok(false);
            }
            records.push(LinkRecord {
                phone_number: number.to_string(),
                connected_at: epoch_millis(),
            });
        }
        self.persist().await?;
        Ok(true)
    }

    /// Remove a link. Returns the removed record, or `None` (without a
    /// write) when the chat holds no such number.
    pub async fn unlink(&self, chat_id: &str, number: &str) -> Result<Option<LinkRecord>> {
        let removed = {
            let mut map = self.lock();
            let Some(records) = map.get_mut(chat_id) else {
                return Ok(None);
            };
            let Some(idx) = records.iter().position(|r| r.phone_number == number) else {
                return Ok(None);
            };
            let record = records.remove(idx);
            if records.is_empty() {
                map.remove(chat_id);
            }
            record
        };
        self.persist().await?;
        Ok(Some(removed))
    }

    /// Linked records for one chat, in insertion (display) order.
    pub fn links(&self, chat_id: &str) -> Vec<LinkRecord> {
        self.lock().get(chat_id).cloned().unwrap_or_default()
    }

    /// The chat owning `number`, if any.
    pub fn owner_of(&self, number: &str) -> Option<String> {
        self.lock()
            .iter()
            .find(|(_, records)| records.iter().any(|r| r.phone_number == number))
            .map(|(chat_id, _)| chat_id.clone())
    }

    /// All chats with their records, sorted by chat ID for stable display.
    pub fn chats(&self) -> Vec<(String, Vec<LinkRecord>)> {
        let mut all: Vec<_> = self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn chat_count(&self) -> usize {
        self.lock().len()
    }

    pub fn link_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Rewrite the backing file from the current in-memory state.
    async fn persist(&self) -> Result<()> {
        let snapshot = self.lock().clone();
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_vec_pretty(&snapshot)?;
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)?;
            let mut lock = RwLock::new(file);
            let mut guard = lock.write().context("registry file lock failed")?;
            guard.write_all(&json)?;
            Ok(())
        })
        .await??;

        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LinkMap> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_registry() -> (UserRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connected_users.json");
        (UserRegistry::load(path).unwrap(), dir)
    }

    #[tokio::test]
    async fn link_is_idempotent() {
        let (reg, _dir) = temp_registry();

        assert!(reg.link("chat1", "19876543210").await.unwrap());
        assert!(!reg.link("chat1", "19876543210").await.unwrap());

        let links = reg.links("chat1");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].phone_number, "19876543210");
    }

    #[tokio::test]
    async fn same_number_under_two_chats() {
        let (reg, _dir) = temp_registry();

        assert!(reg.link("chat1", "111111111111").await.unwrap());
        assert!(reg.link("chat2", "111111111111").await.unwrap());
        assert_eq!(reg.link_count(), 2);
        assert_eq!(reg.chat_count(), 2);
    }

    #[tokio::test]
    async fn unlink_missing_is_none_without_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connected_users.json");
        let reg = UserRegistry::load(path.clone()).unwrap();

        assert!(reg.unlink("chat1", "123").await.unwrap().is_none());
        // No mutation happened, so nothing was persisted.
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unlink_removes_and_drops_empty_chat() {
        let (reg, _dir) = temp_registry();

        reg.link("chat1", "123456789012").await.unwrap();
        let removed = reg.unlink("chat1", "123456789012").await.unwrap();
        assert_eq!(removed.unwrap().phone_number, "123456789012");
        assert_eq!(reg.chat_count(), 0);
    }

    #[tokio::test]
    async fn insertion_order_preserved() {
        let (reg, _dir) = temp_registry();

        for n in ["3331", "1112", "2223"] {
            reg.link("chat1", n).await.unwrap();
        }
        let numbers: Vec<_> = reg
            .links("chat1")
            .into_iter()
            .map(|r| r.phone_number)
            .collect();
        assert_eq!(numbers, vec!["3331", "1112", "2223"]);
    }

    #[tokio::test]
    async fn file_round_trips_after_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connected_users.json");
        let reg = UserRegistry::load(path.clone()).unwrap();

        reg.link("chat1", "19876543210").await.unwrap();
        reg.link("chat1", "14155551234").await.unwrap();
        reg.link("chat2", "447700900123").await.unwrap();
        reg.unlink("chat1", "19876543210").await.unwrap();

        let reloaded = UserRegistry::load(path).unwrap();
        assert_eq!(reloaded.chats(), reg.chats());
    }

    #[tokio::test]
    async fn owner_of_finds_chat() {
        let (reg, _dir) = temp_registry();

        reg.link("chat9", "555000111222").await.unwrap();
        assert_eq!(reg.owner_of("555000111222").as_deref(), Some("chat9"));
        assert!(reg.owner_of("000000000000").is_none());
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = UserRegistry::load(dir.path().join("nope.json")).unwrap();
        assert_eq!(reg.chat_count(), 0);
    }

    #[test]
    fn load_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connected_users.json");
        fs::write(&path, "{not json").unwrap();
        assert!(UserRegistry::load(path).is_err());
    }

    #[test]
    fn record_json_shape() {
        let record = LinkRecord {
            phone_number: "19876543210".into(),
            connected_at: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["phoneNumber"], "19876543210");
        assert_eq!(json["connectedAt"], 1_700_000_000_000i64);
    }
}
