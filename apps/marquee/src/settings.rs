use display_bus::DisplayBus;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;

const SETTINGS_CHANNEL: &str = "settings";

pub const KEY_INVENUE_HOST: &str = "invenue_host";
pub const KEY_CHECK_USB_INTERVAL: &str = "check_usb_interval";
pub const KEY_START_RESTART_WINDOW: &str = "start_restart_window";
pub const KEY_END_RESTART_WINDOW: &str = "end_restart_window";
/// Written from the connect response, read by embedders.
pub const KEY_TERMINAL_NUMBER: &str = "terminal_number";
pub const KEY_ASSET_ID: &str = "asset_id";

type ChangeListener = Box<dyn Fn(&str, &Value) + Send + Sync>;

/// Device settings persisted as one JSON document in shared storage.
///
/// Defaults are filled for keys never explicitly set. Every `set`
/// persists the whole document and notifies registered listeners.
pub struct Settings {
    bus: DisplayBus,
    values: RwLock<Map<String, Value>>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl Settings {
    /// Loads persisted settings (if any) and overlays defaults.
    pub fn load(bus: DisplayBus) -> Arc<Self> {
        let mut values = match bus.read_last(SETTINGS_CHANNEL) {
            Ok(Some(msg)) => match msg.payload {
                Value::Object(map) => map,
                other => {
                    warn!(target: "marquee.settings", ?other, "persisted settings malformed; using defaults");
                    Map::new()
                }
            },
            Ok(None) => Map::new(),
            Err(err) => {
                warn!(target: "marquee.settings", %err, "settings read failed; using defaults");
                Map::new()
            }
        };
        for (key, value) in defaults() {
            values.entry(key).or_insert(value);
        }
        Arc::new(Self {
            bus,
            values: RwLock::new(values),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(|value| value.as_str().map(str::to_string))
    }

    pub fn set(&self, key: &str, value: Value) {
        let snapshot = {
            let mut values = self.values.write();
            values.insert(key.to_string(), value.clone());
            values.clone()
        };
        if let Err(err) = self.bus.publish(SETTINGS_CHANNEL, Value::Object(snapshot)) {
            warn!(target: "marquee.settings", %err, "settings persist failed");
        }
        for listener in self.listeners.read().iter() {
            listener(key, &value);
        }
    }

    pub fn on_change(&self, listener: impl Fn(&str, &Value) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }
}

fn defaults() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(KEY_INVENUE_HOST.into(), Value::Null);
    map.insert(KEY_CHECK_USB_INTERVAL.into(), json!(30_000));
    map.insert(KEY_START_RESTART_WINDOW.into(), json!(2));
    map.insert(KEY_END_RESTART_WINDOW.into(), json!(6));
    map.insert(KEY_TERMINAL_NUMBER.into(), Value::Null);
    map.insert(KEY_ASSET_ID.into(), Value::Null);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use display_bus::{MemoryStore, StoreBackend};
    use parking_lot::Mutex;

    fn store() -> Arc<dyn StoreBackend> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn defaults_apply_when_nothing_persisted() {
        let settings = Settings::load(DisplayBus::new(store()));
        assert_eq!(settings.get(KEY_CHECK_USB_INTERVAL), Some(json!(30_000)));
        assert_eq!(settings.get(KEY_INVENUE_HOST), Some(Value::Null));
    }

    #[tokio::test]
    async fn set_persists_and_survives_reload() {
        let store = store();
        let settings = Settings::load(DisplayBus::new(store.clone()));
        settings.set(KEY_INVENUE_HOST, json!("https://venue.example"));

        let reloaded = Settings::load(DisplayBus::new(store));
        assert_eq!(
            reloaded.get_str(KEY_INVENUE_HOST),
            Some("https://venue.example".to_string())
        );
        // Untouched defaults remain.
        assert_eq!(reloaded.get(KEY_START_RESTART_WINDOW), Some(json!(2)));
    }

    #[tokio::test]
    async fn listeners_observe_changes() {
        let settings = Settings::load(DisplayBus::new(store()));
        let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        settings.on_change(move |key, value| {
            sink.lock().push((key.to_string(), value.clone()));
        });

        settings.set(KEY_INVENUE_HOST, json!("https://venue.example"));
        assert_eq!(
            seen.lock().as_slice(),
            [(
                KEY_INVENUE_HOST.to_string(),
                json!("https://venue.example")
            )]
        );
    }
}
