//! File-backed store for display instances running as separate processes.
//!
//! One JSON document per channel under a shared directory. Change
//! notification is a polling watcher: each pass re-reads the directory and
//! raises a [`StoreEvent`] for every record whose content changed since the
//! previous pass. Same-content rewrites do not re-raise; assignment writes
//! are idempotent by value so nothing is lost. The watcher seeds its
//! snapshot at startup without emitting, so an instance created after a
//! write catches up via `read_last`, never via a replayed event.

use crate::{BusError, BusResult, StoreBackend, StoreEvent, StoredRecord};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::warn;

const WATCH_INTERVAL: Duration = Duration::from_millis(250);

/// On-disk shape. The channel name travels inside the document so the
/// watcher never has to reverse the filename sanitization.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    key: String,
    #[serde(flatten)]
    record: StoredRecord,
    /// True for transient notifications; excluded from `get`.
    #[serde(default)]
    transient: bool,
}

struct Inner {
    dir: PathBuf,
    events: broadcast::Sender<StoreEvent>,
    seen: Mutex<HashMap<PathBuf, String>>,
}

pub struct FileStore {
    inner: Arc<Inner>,
}

impl FileStore {
    /// Opens (creating if needed) the shared storage directory and starts
    /// the change watcher. Must be called within a tokio runtime.
    pub fn open(dir: impl Into<PathBuf>) -> BusResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let inner = Arc::new(Inner {
            dir,
            events: broadcast::channel(64).0,
            seen: Mutex::new(HashMap::new()),
        });
        inner.seed();
        tokio::spawn(watch(Arc::downgrade(&inner)));
        Ok(Self { inner })
    }

    fn write(&self, key: &str, record: StoredRecord, transient: bool) -> BusResult<()> {
        let path = self.inner.path_for(key, transient);
        let doc = FileRecord {
            key: key.to_string(),
            record,
            transient,
        };
        let serialized = serde_json::to_vec(&doc)?;
        // Write-then-rename so readers never observe a torn document.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl StoreBackend for FileStore {
    fn put(&self, key: &str, record: StoredRecord) -> BusResult<()> {
        self.write(key, record, false)
    }

    fn get(&self, key: &str) -> BusResult<Option<StoredRecord>> {
        let path = self.inner.path_for(key, false);
        match fs::read(&path) {
            Ok(bytes) => {
                let doc: FileRecord = serde_json::from_slice(&bytes)?;
                Ok(Some(doc.record))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(BusError::Io(err)),
        }
    }

    fn notify(&self, key: &str, record: StoredRecord) -> BusResult<()> {
        self.write(key, record, true)
    }

    fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn path_for(&self, key: &str, transient: bool) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let suffix = if transient { "event.json" } else { "json" };
        self.dir.join(format!("{safe}.{suffix}"))
    }

    /// Records current directory contents without emitting, so startup
    /// never replays history.
    fn seed(&self) {
        let mut seen = self.seen.lock();
        for (path, content) in read_records(&self.dir) {
            seen.insert(path, content);
        }
    }

    fn scan(&self) {
        for (path, content) in read_records(&self.dir) {
            let changed = {
                let mut seen = self.seen.lock();
                match seen.get(&path) {
                    Some(prev) if *prev == content => false,
                    _ => {
                        seen.insert(path.clone(), content.clone());
                        true
                    }
                }
            };
            if !changed {
                continue;
            }
            match serde_json::from_str::<FileRecord>(&content) {
                Ok(doc) => {
                    let _ = self.events.send(StoreEvent {
                        key: doc.key,
                        record: doc.record,
                    });
                }
                Err(err) => {
                    warn!(target: "display.bus", path = %path.display(), %err, "unreadable store record")
                }
            }
        }
    }
}

fn read_records(dir: &Path) -> Vec<(PathBuf, String)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(target: "display.bus", dir = %dir.display(), %err, "store directory unreadable");
            return Vec::new();
        }
    };
    entries
        .flatten()
        .filter(|entry| entry.path().extension().map_or(false, |ext| ext == "json"))
        .filter_map(|entry| {
            let path = entry.path();
            fs::read_to_string(&path).ok().map(|content| (path, content))
        })
        .collect()
}

async fn watch(inner: Weak<Inner>) {
    loop {
        sleep(WATCH_INTERVAL).await;
        match inner.upgrade() {
            Some(inner) => inner.scan(),
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DisplayBus;
    use serde_json::json;
    use tokio::time::timeout;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("display-bus-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn publish_crosses_store_handles() {
        let dir = scratch_dir();
        let writer = DisplayBus::new(Arc::new(FileStore::open(&dir).expect("open")));
        let reader = DisplayBus::new(Arc::new(FileStore::open(&dir).expect("open")));
        let mut sub = reader.subscribe("content.assignment");

        writer
            .publish("content.assignment", json!({"urls": ["a", "b"]}))
            .expect("publish");

        let msg = timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("delivery")
            .expect("message");
        assert_eq!(msg.payload["urls"][1], "b");
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn late_attach_reads_persisted_but_not_transient() {
        let dir = scratch_dir();
        let writer = DisplayBus::new(Arc::new(FileStore::open(&dir).expect("open")));
        writer
            .publish("content.assignment", json!({"urls": ["a"]}))
            .expect("publish");
        writer
            .publish_transient("identify", json!({"show": true}))
            .expect("publish");

        let late = DisplayBus::new(Arc::new(FileStore::open(&dir).expect("open")));
        assert!(late
            .read_last("content.assignment")
            .expect("read")
            .is_some());
        assert!(late.read_last("identify").expect("read").is_none());
        let _ = fs::remove_dir_all(&dir);
    }
}
