use display_bus::DisplayBus;
use marquee_core::{channels, ScreenTopology};
use parking_lot::Mutex;
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use std::sync::Arc;
use tracing::{info, warn};

use crate::platform::{Renderer, SpawnError, SpawnedWindow, WindowSpawner};

/// Opens, positions, and closes the secondary display instance.
///
/// A close signal is broadcast before every open so a stale secondary left
/// over from an earlier topology never keeps running; close re-broadcasts
/// the signal to cover secondaries this instance did not spawn itself.
pub struct SecondaryInstanceManager {
    bus: DisplayBus,
    spawner: Arc<dyn WindowSpawner>,
    renderer: Arc<dyn Renderer>,
    window: Mutex<Option<Box<dyn SpawnedWindow>>>,
}

impl SecondaryInstanceManager {
    pub fn new(
        bus: DisplayBus,
        spawner: Arc<dyn WindowSpawner>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            bus,
            spawner,
            renderer,
            window: Mutex::new(None),
        }
    }

    pub fn open(&self, topology: Option<&ScreenTopology>) {
        self.signal_close();

        let target = topology.and_then(ScreenTopology::second);
        match self.spawner.spawn(2, target) {
            Ok(window) => {
                info!(
                    target: "marquee.secondary",
                    positioned = target.is_some(),
                    "opened secondary display instance"
                );
                *self.window.lock() = Some(window);
            }
            Err(SpawnError::Blocked) => {
                warn!(target: "marquee.secondary", "secondary spawn blocked; offering manual retry");
                self.renderer.show_spawn_blocked(2);
            }
        }
    }

    pub fn close(&self) {
        if let Some(window) = self.window.lock().take() {
            window.close();
        }
        // Also covers secondaries spawned by an earlier instance of this
        // device that we never held a handle to.
        self.signal_close();
        info!(target: "marquee.secondary", "closed secondary display instances");
    }

    fn signal_close(&self) {
        let closed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        if let Err(err) = self
            .bus
            .publish(channels::SECONDARY_CLOSE, json!({ "closed_at": closed_at }))
        {
            warn!(target: "marquee.secondary", %err, "close signal publish failed");
        }
    }
}
