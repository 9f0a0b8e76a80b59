//! Collaborator contracts consumed by the coordination engine, plus the
//! implementations used when running as a plain process.
//!
//! Rendering, identity, screen enumeration, window spawning, and system
//! probing all live behind traits so the engine never touches a platform
//! API directly. Tests substitute recording fakes for the same traits.

use async_trait::async_trait;
use marquee_core::{ConnectionStatus, ScreenDescriptor};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::process::Child;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{Config, CLIENT_VERSION};

/// Best-effort attributes shown on the unallocated-device screen.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceAttributes {
    pub serial_number: Option<String>,
    pub ip_address: Option<String>,
    pub os_version: String,
    pub client_version: String,
    pub slot: u32,
}

/// Rendering collaborator. Calls never fail the engine; implementations
/// own their own error handling. `show_identify` is expected to hide
/// itself after the given number of seconds.
pub trait Renderer: Send + Sync {
    fn load_content_url(&self, url: Option<&str>);
    fn set_orientation(&self, degrees: u16);
    fn set_overscan(&self, enabled: bool);
    fn show_identify(&self, seconds: u64);
    fn hide_identify(&self);
    fn show_unallocated_device(&self, attrs: &DeviceAttributes);
    fn set_connection_status(&self, status: ConnectionStatus);
    /// Full reload of this display instance (reboot action).
    fn reload(&self);
    /// Dismissible notice that the secondary instance could not be
    /// spawned and must be opened manually.
    fn show_spawn_blocked(&self, slot: u32);
}

/// Managed-platform identity query. `Ok(None)` (unsupported or empty) and
/// `Err` both mean "no answer"; the resolver falls through either way.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn serial_number(&self) -> Result<Option<String>, String>;
}

/// Physical screen enumeration and change signaling.
pub trait ScreenHost: Send + Sync {
    fn supported(&self) -> bool;
    fn permission_granted(&self) -> bool;
    fn enumerate(&self) -> Vec<ScreenDescriptor>;
    fn changes(&self) -> broadcast::Receiver<()>;
    /// Geometry of the screen this instance occupies, for the
    /// single-full-screen fallback when enumeration is unsupported.
    fn primary(&self) -> ScreenDescriptor;
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("window spawn blocked by hosting platform")]
    Blocked,
}

pub trait SpawnedWindow: Send + Sync {
    fn close(&self);
}

/// Opens a new display instance targeted at a slot.
pub trait WindowSpawner: Send + Sync {
    fn spawn(
        &self,
        slot: u32,
        target: Option<&ScreenDescriptor>,
    ) -> Result<Box<dyn SpawnedWindow>, SpawnError>;
}

/// System status, location, and cache probes, each individually
/// best-effort. Location and IP discovery time out internally and return
/// `None` on expiry.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn system_status(&self) -> Value;
    async fn location(&self) -> Option<marquee_api::GeoPoint>;
    async fn ip_address(&self) -> Option<String>;
    async fn clear_cache(&self) -> Result<(), String>;
}

// ---------------------------------------------------------------------------
// Process-host implementations
// ---------------------------------------------------------------------------

/// Renderer used when no embedding UI is attached: every contract call
/// becomes a structured log line an embedder can tail.
#[derive(Debug, Default)]
pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn load_content_url(&self, url: Option<&str>) {
        info!(target: "marquee.render", url = url.unwrap_or("<none>"), "load content url");
    }

    fn set_orientation(&self, degrees: u16) {
        info!(target: "marquee.render", degrees, "set orientation");
    }

    fn set_overscan(&self, enabled: bool) {
        info!(target: "marquee.render", enabled, "set overscan");
    }

    fn show_identify(&self, seconds: u64) {
        info!(target: "marquee.render", seconds, "show identify overlay");
    }

    fn hide_identify(&self) {
        info!(target: "marquee.render", "hide identify overlay");
    }

    fn show_unallocated_device(&self, attrs: &DeviceAttributes) {
        info!(target: "marquee.render", ?attrs, "show unallocated device screen");
    }

    fn set_connection_status(&self, status: ConnectionStatus) {
        info!(target: "marquee.render", ?status, "connection status");
    }

    fn reload(&self) {
        info!(target: "marquee.render", "reload requested");
    }

    fn show_spawn_blocked(&self, slot: u32) {
        warn!(target: "marquee.render", slot, "secondary window blocked; manual open required");
    }
}

/// Identity provider for hosts without a managed-device API.
pub struct UnmanagedIdentity;

#[async_trait]
impl IdentityProvider for UnmanagedIdentity {
    async fn serial_number(&self) -> Result<Option<String>, String> {
        Ok(None)
    }
}

/// Screen host driven by configuration: the embedding environment
/// describes attached screens via `MARQUEE_SCREENS`. Without that, the
/// platform counts as lacking enumeration capability.
pub struct ConfiguredScreens {
    screens: Mutex<Vec<ScreenDescriptor>>,
    fallback: ScreenDescriptor,
    changes: broadcast::Sender<()>,
}

impl ConfiguredScreens {
    pub fn from_config(config: &Config) -> Self {
        Self {
            screens: Mutex::new(config.screens.clone().unwrap_or_default()),
            fallback: config.fallback_screen,
            changes: broadcast::channel(8).0,
        }
    }

    /// Replaces the screen list and raises a change event. Used by
    /// embedders reacting to hotplug.
    pub fn update(&self, screens: Vec<ScreenDescriptor>) {
        *self.screens.lock() = screens;
        let _ = self.changes.send(());
    }
}

impl ScreenHost for ConfiguredScreens {
    fn supported(&self) -> bool {
        !self.screens.lock().is_empty()
    }

    fn permission_granted(&self) -> bool {
        true
    }

    fn enumerate(&self) -> Vec<ScreenDescriptor> {
        self.screens.lock().clone()
    }

    fn changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    fn primary(&self) -> ScreenDescriptor {
        self.screens.lock().first().copied().unwrap_or(self.fallback)
    }
}

struct ChildWindow {
    child: Mutex<Option<Child>>,
}

impl SpawnedWindow for ChildWindow {
    fn close(&self) {
        if let Some(mut child) = self.child.lock().take() {
            if let Err(err) = child.kill() {
                warn!(target: "marquee.spawn", %err, "failed to stop secondary process");
            }
            let _ = child.wait();
        }
    }
}

/// Spawns a secondary display instance as another process of this binary,
/// pointed at the same shared store.
pub struct ProcessSpawner {
    config: Config,
}

impl ProcessSpawner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl WindowSpawner for ProcessSpawner {
    fn spawn(
        &self,
        slot: u32,
        target: Option<&ScreenDescriptor>,
    ) -> Result<Box<dyn SpawnedWindow>, SpawnError> {
        let exe = std::env::current_exe().map_err(|err| {
            warn!(target: "marquee.spawn", %err, "current executable path unavailable");
            SpawnError::Blocked
        })?;
        let mut command = std::process::Command::new(exe);
        command
            .arg("--slot")
            .arg(slot.to_string())
            .arg("--store-dir")
            .arg(&self.config.store_dir);
        if let Some(screen) = target {
            command.env(
                "MARQUEE_PRIMARY_SCREEN",
                format!(
                    "{}x{}+{}+{}",
                    screen.width, screen.height, screen.left, screen.top
                ),
            );
        }
        match command.spawn() {
            Ok(child) => {
                info!(target: "marquee.spawn", slot, "spawned secondary display instance");
                Ok(Box::new(ChildWindow {
                    child: Mutex::new(Some(child)),
                }))
            }
            Err(err) => {
                warn!(target: "marquee.spawn", slot, %err, "secondary spawn failed");
                Err(SpawnError::Blocked)
            }
        }
    }
}

/// Probe for plain-process hosts: OS details from the standard library, IP
/// via a routed-socket lookup with a short timeout, no geolocation
/// capability.
pub struct HostProbe {
    screen: ScreenDescriptor,
}

impl HostProbe {
    pub fn new(screen: ScreenDescriptor) -> Self {
        Self { screen }
    }

    pub fn os_version() -> String {
        format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
    }
}

#[async_trait]
impl SystemProbe for HostProbe {
    async fn system_status(&self) -> Value {
        json!({
            "os": Self::os_version(),
            "screenWidth": self.screen.width,
            "screenHeight": self.screen.height,
            "clientVersion": CLIENT_VERSION,
            "ipAddress": self.ip_address().await,
        })
    }

    async fn location(&self) -> Option<marquee_api::GeoPoint> {
        None
    }

    async fn ip_address(&self) -> Option<String> {
        discover_local_ip().await
    }

    async fn clear_cache(&self) -> Result<(), String> {
        // Nothing cached at the process level.
        Ok(())
    }
}

/// Finds the outbound interface address by opening a routed UDP socket.
/// No packets are sent; expiry or failure yields `None`.
pub async fn discover_local_ip() -> Option<String> {
    let probe = async {
        let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await.ok()?;
        socket.connect("8.8.8.8:80").await.ok()?;
        socket.local_addr().ok().map(|addr| addr.ip().to_string())
    };
    tokio::time::timeout(std::time::Duration::from_secs(3), probe)
        .await
        .ok()
        .flatten()
}

/// Gathers the best-effort attribute set for the unallocated screen.
pub async fn device_attributes(
    identity: &Arc<dyn IdentityProvider>,
    probe: &Arc<dyn SystemProbe>,
    slot: u32,
) -> DeviceAttributes {
    let serial_number = match identity.serial_number().await {
        Ok(serial) => serial,
        Err(err) => {
            warn!(target: "marquee.platform", %err, "serial number unavailable");
            None
        }
    };
    DeviceAttributes {
        serial_number,
        ip_address: probe.ip_address().await,
        os_version: HostProbe::os_version(),
        client_version: CLIENT_VERSION.to_string(),
        slot,
    }
}
