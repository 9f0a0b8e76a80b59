use marquee_core::ScreenTopology;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::platform::ScreenHost;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("screen enumeration not supported on this platform")]
    Unsupported,
    #[error("screen enumeration permission not granted")]
    PermissionDenied,
}

pub type TopologyCallback = Arc<dyn Fn(Option<ScreenTopology>, ScreenTopology) + Send + Sync>;

/// Owns the current screen topology and watches for configuration
/// changes.
///
/// `detect` replaces the owned topology wholesale; the change listener is
/// armed at most once per monitor lifetime so a repeat detection never
/// doubles up reconciliation runs.
pub struct ScreenTopologyMonitor {
    host: Arc<dyn ScreenHost>,
    topology: RwLock<Option<ScreenTopology>>,
    listener_armed: AtomicBool,
    on_change: RwLock<Option<TopologyCallback>>,
}

impl ScreenTopologyMonitor {
    pub fn new(host: Arc<dyn ScreenHost>) -> Arc<Self> {
        Arc::new(Self {
            host,
            topology: RwLock::new(None),
            listener_armed: AtomicBool::new(false),
            on_change: RwLock::new(None),
        })
    }

    pub fn set_on_change(&self, callback: TopologyCallback) {
        *self.on_change.write() = Some(callback);
    }

    pub fn current(&self) -> Option<ScreenTopology> {
        self.topology.read().clone()
    }

    /// Geometry of the screen this instance occupies; the fallback record
    /// reported when enumeration is unsupported.
    pub fn primary_screen(&self) -> marquee_core::ScreenDescriptor {
        self.host.primary()
    }

    /// Enumerates attached screens. With `require_permission`, an
    /// ungranted permission aborts without attempting enumeration rather
    /// than prompting on every cycle; the caller treats the device as
    /// single-screen either way.
    pub fn detect(self: &Arc<Self>, require_permission: bool) -> Result<ScreenTopology, TopologyError> {
        if !self.host.supported() {
            debug!(target: "marquee.screens", "screen enumeration unsupported");
            return Err(TopologyError::Unsupported);
        }
        if require_permission && !self.host.permission_granted() {
            warn!(target: "marquee.screens", "screen enumeration permission not granted; skipping detection");
            return Err(TopologyError::PermissionDenied);
        }

        let topology = ScreenTopology(self.host.enumerate());
        info!(
            target: "marquee.screens",
            screens = topology.screen_count(),
            "detected screen topology"
        );
        *self.topology.write() = Some(topology.clone());
        self.arm_listener();
        Ok(topology)
    }

    fn arm_listener(self: &Arc<Self>) {
        if self.listener_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = Arc::clone(self);
        let mut changes = self.host.changes();
        tokio::spawn(async move {
            while changes.recv().await.is_ok() {
                let previous = monitor.current();
                // Permission was established by the initial detection;
                // re-detections skip the gate.
                let current = match monitor.detect(false) {
                    Ok(current) => current,
                    Err(err) => {
                        // Every screen gone (or enumeration lost) still has
                        // to reconcile, as a single-screen device.
                        warn!(target: "marquee.screens", %err, "re-detection after screen change failed; assuming single screen");
                        let fallback = ScreenTopology(vec![monitor.host.primary()]);
                        *monitor.topology.write() = Some(fallback.clone());
                        fallback
                    }
                };
                info!(
                    target: "marquee.screens",
                    previous = previous.as_ref().map_or(1, ScreenTopology::screen_count),
                    current = current.screen_count(),
                    "screen configuration changed"
                );
                let callback = monitor.on_change.read().clone();
                if let Some(callback) = callback {
                    callback(previous, current);
                }
            }
        });
    }
}
