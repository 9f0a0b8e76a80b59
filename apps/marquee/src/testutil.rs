//! Recording fakes shared by the unit tests in this crate.

use async_trait::async_trait;
use marquee_core::{ConnectionStatus, ScreenDescriptor};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::platform::{
    DeviceAttributes, Renderer, SpawnError, SpawnedWindow, SystemProbe, WindowSpawner,
};

/// Renderer that records every contract call as a flat string.
#[derive(Default)]
pub struct RecordingRenderer {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingRenderer {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl Renderer for RecordingRenderer {
    fn load_content_url(&self, url: Option<&str>) {
        self.calls
            .lock()
            .push(format!("load:{}", url.unwrap_or("<none>")));
    }
    fn set_orientation(&self, degrees: u16) {
        self.calls.lock().push(format!("orientation:{degrees}"));
    }
    fn set_overscan(&self, enabled: bool) {
        self.calls.lock().push(format!("overscan:{enabled}"));
    }
    fn show_identify(&self, seconds: u64) {
        self.calls.lock().push(format!("identify:{seconds}"));
    }
    fn hide_identify(&self) {
        self.calls.lock().push("clear-identify".into());
    }
    fn show_unallocated_device(&self, _attrs: &DeviceAttributes) {
        self.calls.lock().push("unallocated".into());
    }
    fn set_connection_status(&self, status: ConnectionStatus) {
        self.calls.lock().push(format!("status:{status:?}"));
    }
    fn reload(&self) {
        self.calls.lock().push("reload".into());
    }
    fn show_spawn_blocked(&self, slot: u32) {
        self.calls.lock().push(format!("spawn-blocked:{slot}"));
    }
}

/// Probe with no capabilities; `clear_cache` optionally fails.
pub struct NullProbe {
    pub cache_error: Option<String>,
}

impl Default for NullProbe {
    fn default() -> Self {
        Self { cache_error: None }
    }
}

#[async_trait]
impl SystemProbe for NullProbe {
    async fn system_status(&self) -> Value {
        json!({"online": true})
    }
    async fn location(&self) -> Option<marquee_api::GeoPoint> {
        None
    }
    async fn ip_address(&self) -> Option<String> {
        None
    }
    async fn clear_cache(&self) -> Result<(), String> {
        match &self.cache_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub struct CountingWindow {
    closes: Arc<AtomicUsize>,
}

impl SpawnedWindow for CountingWindow {
    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Spawner that counts opens/closes instead of launching anything.
pub struct CountingSpawner {
    pub opens: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub blocked: bool,
    pub last_target: Mutex<Option<Option<ScreenDescriptor>>>,
}

impl Default for CountingSpawner {
    fn default() -> Self {
        Self {
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            blocked: false,
            last_target: Mutex::new(None),
        }
    }
}

impl CountingSpawner {
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl WindowSpawner for CountingSpawner {
    fn spawn(
        &self,
        _slot: u32,
        target: Option<&ScreenDescriptor>,
    ) -> Result<Box<dyn SpawnedWindow>, SpawnError> {
        if self.blocked {
            return Err(SpawnError::Blocked);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_target.lock() = Some(target.copied());
        Ok(Box::new(CountingWindow {
            closes: self.closes.clone(),
        }))
    }
}
