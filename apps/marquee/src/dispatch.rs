use async_trait::async_trait;
use display_bus::DisplayBus;
use marquee_core::{channels, parse_actions, PollAction};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::platform::{Renderer, SystemProbe};

/// Re-runs the connect exchange with current geometry. Implemented by the
/// primary session.
#[async_trait]
pub trait Reconnector: Send + Sync {
    async fn reconnect(&self);
}

/// Executes commands from a poll response, in order, each unconditionally;
/// one action failing never short-circuits the rest.
pub struct ActionDispatcher {
    bus: DisplayBus,
    renderer: Arc<dyn Renderer>,
    probe: Arc<dyn SystemProbe>,
    reconnector: Arc<dyn Reconnector>,
}

impl ActionDispatcher {
    pub fn new(
        bus: DisplayBus,
        renderer: Arc<dyn Renderer>,
        probe: Arc<dyn SystemProbe>,
        reconnector: Arc<dyn Reconnector>,
    ) -> Self {
        Self {
            bus,
            renderer,
            probe,
            reconnector,
        }
    }

    pub async fn dispatch(&self, raw: &[Value]) {
        for action in parse_actions(raw) {
            info!(target: "marquee.actions", ?action, "executing poll action");
            match action {
                PollAction::Reconnect => self.reconnector.reconnect().await,
                PollAction::Reboot => self.renderer.reload(),
                PollAction::Identify { display_time } => {
                    // Identify is instantaneous-only: broadcast to sibling
                    // instances, then apply locally (the bus never
                    // self-delivers).
                    self.broadcast_identify(json!({
                        "show": true,
                        "display_time": display_time,
                    }));
                    self.renderer.show_identify(display_time);
                }
                PollAction::ClearIdentify => {
                    self.broadcast_identify(json!({ "show": false }));
                    self.renderer.hide_identify();
                }
                PollAction::ClearCache => {
                    if let Err(err) = self.probe.clear_cache().await {
                        warn!(target: "marquee.actions", %err, "cache purge failed");
                    }
                }
            }
        }
    }

    fn broadcast_identify(&self, payload: Value) {
        if let Err(err) = self.bus.publish_transient(channels::IDENTIFY, payload) {
            warn!(target: "marquee.actions", %err, "identify broadcast failed");
        }
    }
}
