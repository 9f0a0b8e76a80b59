//! Pub/sub between display instances of one device, riding on a shared
//! key-value store with change notification.
//!
//! Display instances are independent processes (or tasks) sharing the same
//! persistent storage. Coordination between them happens only through this
//! bus: a writer persists (or transiently raises) a payload under a channel
//! name, the store's change notification fans it out, and every *other*
//! instance subscribed to that channel sees it. The writer never receives
//! its own publish; callers that need self-delivery update local state at
//! the publish call site. Last value wins, no history.

mod file_store;

pub use file_store::FileStore;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Identifies one display instance for the lifetime of its process.
pub type InstanceId = Uuid;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store payload invalid: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("store notification channel closed")]
    Closed,
}

pub type BusResult<T> = Result<T, BusError>;

/// What a subscriber receives for one publish on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Value,
    pub timestamp: u64,
}

/// Record held in (or raised through) the shared store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub payload: Value,
    pub timestamp: u64,
    pub writer: InstanceId,
}

/// Change event raised by a store backend. Carries the writer so readers
/// can drop their own writes.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub key: String,
    pub record: StoredRecord,
}

/// Shared key-value substrate visible to every display instance of the
/// same device.
pub trait StoreBackend: Send + Sync {
    /// Persists `record` under `key` and raises a change event.
    fn put(&self, key: &str, record: StoredRecord) -> BusResult<()>;

    /// Point-in-time read of the last persisted record.
    fn get(&self, key: &str) -> BusResult<Option<StoredRecord>>;

    /// Raises a change event without persisting anything. Instances that
    /// start later will never observe it.
    fn notify(&self, key: &str, record: StoredRecord) -> BusResult<()>;

    fn watch(&self) -> broadcast::Receiver<StoreEvent>;
}

/// In-memory backend for tests and single-process hosting of multiple
/// display instances.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, StoredRecord>>,
    events: RwLock<Option<broadcast::Sender<StoreEvent>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self) -> broadcast::Sender<StoreEvent> {
        if let Some(tx) = self.events.read().as_ref() {
            return tx.clone();
        }
        let mut guard = self.events.write();
        guard
            .get_or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    fn emit(&self, key: &str, record: StoredRecord) {
        // A send error just means nobody is watching yet.
        let _ = self.sender().send(StoreEvent {
            key: key.to_string(),
            record,
        });
    }
}

impl StoreBackend for MemoryStore {
    fn put(&self, key: &str, record: StoredRecord) -> BusResult<()> {
        self.values.write().insert(key.to_string(), record.clone());
        self.emit(key, record);
        Ok(())
    }

    fn get(&self, key: &str) -> BusResult<Option<StoredRecord>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn notify(&self, key: &str, record: StoredRecord) -> BusResult<()> {
        self.emit(key, record);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender().subscribe()
    }
}

/// One display instance's handle onto the shared store.
#[derive(Clone)]
pub struct DisplayBus {
    store: Arc<dyn StoreBackend>,
    instance: InstanceId,
}

impl DisplayBus {
    pub fn new(store: Arc<dyn StoreBackend>) -> Self {
        Self {
            store,
            instance: Uuid::new_v4(),
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    /// Persists `payload` under `channel` and notifies other instances.
    pub fn publish(&self, channel: &str, payload: Value) -> BusResult<()> {
        self.store.put(channel, self.record(payload))
    }

    /// Notifies other instances without persisting. Instances started
    /// after this call will never see the payload.
    pub fn publish_transient(&self, channel: &str, payload: Value) -> BusResult<()> {
        self.store.notify(channel, self.record(payload))
    }

    /// Last persisted payload on `channel`, for instances that start after
    /// a publish already happened.
    pub fn read_last(&self, channel: &str) -> BusResult<Option<BusMessage>> {
        Ok(self.store.get(channel)?.map(|record| BusMessage {
            channel: channel.to_string(),
            payload: record.payload,
            timestamp: record.timestamp,
        }))
    }

    /// Subscribes to `channel`. Messages written by this instance are
    /// filtered out; within one channel, messages arrive in write order.
    pub fn subscribe(&self, channel: &str) -> BusSubscription {
        BusSubscription {
            rx: self.store.watch(),
            channel: channel.to_string(),
            instance: self.instance,
        }
    }

    fn record(&self, payload: Value) -> StoredRecord {
        StoredRecord {
            payload,
            timestamp: now_millis(),
            writer: self.instance,
        }
    }
}

/// Receiving half of a channel subscription.
pub struct BusSubscription {
    rx: broadcast::Receiver<StoreEvent>,
    channel: String,
    instance: InstanceId,
}

impl BusSubscription {
    /// Next message on this channel from another instance, or `None` once
    /// the store's notification stream is closed. Skips over lagged slots
    /// rather than failing; last-value-wins makes dropped intermediates
    /// harmless.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.key != self.channel || event.record.writer == self.instance {
                        continue;
                    }
                    return Some(BusMessage {
                        channel: event.key,
                        payload: event.record.payload,
                        timestamp: event.record.timestamp,
                    });
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
