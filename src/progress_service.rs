use crate::error::PlayerError;
use crate::models::ProgressEntry;
use crate::server::{MediaServer, PushEvent};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

#[derive(Error, Debug)]
pub enum ProgressStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shared listening-progress cache, keyed by item id or episode id.
///
/// Writers are the push listener, bulk refreshes and successful syncs. Every
/// write goes through the same last-writer-wins rule on `updated_at`, so the
/// order in which concurrent writers land does not matter.
#[derive(Clone, Default)]
pub struct ProgressService {
    entries: Arc<RwLock<HashMap<String, ProgressEntry>>>,
    store_path: Option<Arc<PathBuf>>,
}

impl ProgressService {
    /// In-memory cache with no backing file
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the cache persisted at `path`, starting empty if the file does not exist yet
    pub async fn open(path: PathBuf) -> Result<Self, ProgressStoreError> {
        let entries = match fs::read(&path).await {
            Ok(data) => serde_json::from_slice::<HashMap<String, ProgressEntry>>(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            "ProgressService: loaded {} entries from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
            store_path: Some(Arc::new(path)),
        })
    }

    /// Write the whole cache to its backing file, if it has one
    pub async fn save(&self) -> Result<(), ProgressStoreError> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };

        let data = {
            let entries = self.entries.read().unwrap();
            serde_json::to_vec_pretty(&*entries)?
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, path.as_path()).await?;

        debug!("ProgressService: saved cache to {}", path.display());
        Ok(())
    }

    fn should_replace(stored: Option<&ProgressEntry>, incoming: &ProgressEntry) -> bool {
        match stored {
            None => true,
            // Equal timestamps overwrite so replays are accepted
            Some(stored) => stored.updated_at <= incoming.updated_at,
        }
    }

    fn merge_into(
        entries: &mut HashMap<String, ProgressEntry>,
        key: &str,
        entry: ProgressEntry,
    ) -> bool {
        if Self::should_replace(entries.get(key), &entry) {
            entries.insert(key.to_string(), entry);
            true
        } else {
            trace!("ProgressService: dropping stale entry for {}", key);
            false
        }
    }

    /// Apply one entry; returns whether it replaced the stored state
    pub fn merge_one(&self, key: &str, entry: ProgressEntry) -> bool {
        let mut entries = self.entries.write().unwrap();
        Self::merge_into(&mut entries, key, entry)
    }

    /// Apply many entries under the same rule as `merge_one`; returns how many were applied
    pub fn merge_batch<I>(&self, batch: I) -> usize
    where
        I: IntoIterator<Item = ProgressEntry>,
    {
        let mut entries = self.entries.write().unwrap();
        let mut applied = 0;
        for entry in batch {
            let key = entry.key();
            if Self::merge_into(&mut entries, &key, entry) {
                applied += 1;
            }
        }
        applied
    }

    pub fn get(&self, key: &str) -> Option<ProgressEntry> {
        self.entries.read().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, including the persisted copy. Called on logout.
    pub async fn clear(&self) -> Result<(), ProgressStoreError> {
        self.entries.write().unwrap().clear();

        if let Some(path) = &self.store_path {
            match fs::remove_file(path.as_path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!("ProgressService: cleared progress cache");
        Ok(())
    }

    /// Merge a push event; returns whether the cache changed
    pub fn apply_push(&self, event: &PushEvent) -> bool {
        match event.entry() {
            Some(entry) => self.merge_one(&entry.key(), entry.clone()),
            None => false,
        }
    }

    /// Seed or refresh the cache from the server's bulk progress listing
    pub async fn refresh_from_server(&self, server: &dyn MediaServer) -> Result<usize, PlayerError> {
        let entries = server.fetch_all_progress().await?;
        let fetched = entries.len();
        let applied = self.merge_batch(entries);
        info!(
            "ProgressService: refreshed {} of {} entries from server",
            applied, fetched
        );
        Ok(applied)
    }

    /// Consume push events on a background task until the stream ends
    pub fn spawn_listener<S>(&self, events: S, runtime_handle: tokio::runtime::Handle) -> JoinHandle<()>
    where
        S: Stream<Item = PushEvent> + Send + 'static,
    {
        let service = self.clone();
        runtime_handle.spawn(async move {
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                if let PushEvent::Ignored(name) = &event {
                    trace!("ProgressService: ignoring push event {}", name);
                    continue;
                }
                service.apply_push(&event);
            }
            info!("ProgressService: push channel closed, exiting");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn entry(key: &str, progress: f64, updated_at: i64) -> ProgressEntry {
        ProgressEntry {
            id: format!("p-{}", key),
            item_id: key.to_string(),
            episode_id: None,
            progress,
            is_finished: false,
            current_time: progress * 1000.0,
            duration: 1000.0,
            updated_at,
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let service = ProgressService::new();
        let a = entry("book", 0.1, 100);
        assert!(service.merge_one("book", a.clone()));
        let once = service.get("book");
        assert!(service.merge_one("book", a));
        assert_eq!(service.get("book"), once);
        assert_eq!(service.len(), 1);
    }

    #[test]
    fn test_older_entry_is_ignored() {
        let service = ProgressService::new();
        let a = entry("book", 0.1, 100);
        let b = entry("book", 0.2, 200);

        service.merge_one("book", a.clone());
        service.merge_one("book", b.clone());
        assert!(!service.merge_one("book", a));
        assert_eq!(service.get("book"), Some(b));
    }

    #[test]
    fn test_batch_uses_same_rule() {
        let service = ProgressService::new();
        service.merge_one("book", entry("book", 0.5, 500));

        let applied = service.merge_batch(vec![
            entry("book", 0.1, 100),
            entry("other", 0.3, 50),
            entry("other", 0.4, 60),
        ]);

        assert_eq!(applied, 2);
        assert_eq!(service.get("book").unwrap().progress, 0.5);
        assert_eq!(service.get("other").unwrap().progress, 0.4);
    }

    #[test]
    fn test_equal_timestamp_overwrites() {
        let service = ProgressService::new();
        service.merge_one("book", entry("book", 0.1, 100));
        assert!(service.merge_one("book", entry("book", 0.9, 100)));
        assert_eq!(service.get("book").unwrap().progress, 0.9);
    }

    #[tokio::test]
    async fn test_persists_across_restart_and_clear_removes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache").join("progress.json");

        let service = ProgressService::open(path.clone()).await.unwrap();
        assert!(service.is_empty());
        service.merge_one("book", entry("book", 0.7, 700));
        service.save().await.unwrap();

        let reopened = ProgressService::open(path.clone()).await.unwrap();
        assert_eq!(reopened.get("book").unwrap().progress, 0.7);

        reopened.clear().await.unwrap();
        assert!(reopened.is_empty());
        assert!(!path.exists());
        assert!(ProgressService::open(path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listener_applies_push_events() {
        let service = ProgressService::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let listener = service.spawn_listener(
            UnboundedReceiverStream::new(rx),
            tokio::runtime::Handle::current(),
        );

        tx.send(PushEvent::ProgressUpdated(entry("book", 0.2, 200)))
            .unwrap();
        tx.send(PushEvent::Ignored("item_added".to_string())).unwrap();
        tx.send(PushEvent::ProgressUpdated(entry("book", 0.1, 100)))
            .unwrap();
        drop(tx);
        listener.await.unwrap();

        assert_eq!(service.get("book").unwrap().progress, 0.2);
    }
}
