//! Top-level session state machine.
//!
//! `Starting` branches once, on launch parameters, into one of three
//! terminal roles: the primary instance that owns registration and
//! polling, a secondary instance that only renders what the bus tells it,
//! or the unallocated-device screen. No transitions happen between those
//! roles for the lifetime of an instance.

use async_trait::async_trait;
use display_bus::DisplayBus;
use marquee_api::{ApiError, ConnectResponse, PollResponse, RegistrationClient};
use marquee_core::{
    channels, select_url, ConnectionState, ConnectionStatus, ContentAssignment, ScreenTopology,
    SessionRole,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dispatch::{ActionDispatcher, Reconnector};
use crate::identity::IdentityResolver;
use crate::platform::{device_attributes, IdentityProvider, Renderer, SystemProbe, WindowSpawner};
use crate::poll::{PollLoop, PollSink};
use crate::screens::ScreenTopologyMonitor;
use crate::secondary::SecondaryInstanceManager;
use crate::settings::{Settings, KEY_ASSET_ID, KEY_INVENUE_HOST, KEY_TERMINAL_NUMBER};

/// Everything a session needs, constructed once at startup and passed by
/// reference. No component reaches for ambient globals.
pub struct SessionContext {
    pub config: Config,
    pub bus: DisplayBus,
    pub client: Arc<RegistrationClient>,
    pub renderer: Arc<dyn Renderer>,
    pub probe: Arc<dyn SystemProbe>,
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub screens: Arc<ScreenTopologyMonitor>,
    pub spawner: Arc<dyn WindowSpawner>,
    pub settings: Arc<Settings>,
    /// Raised when the instance returns to the foreground; the primary
    /// answers with an immediate out-of-band poll.
    pub resume: Arc<Notify>,
}

pub struct SessionCoordinator {
    role: SessionRole,
    ctx: Arc<SessionContext>,
}

impl SessionCoordinator {
    pub fn new(role: SessionRole, ctx: Arc<SessionContext>) -> Self {
        Self { role, ctx }
    }

    pub async fn run(self) {
        info!(target: "marquee.session", role = ?self.role, "starting display instance");
        match self.role {
            SessionRole::Unallocated => {
                show_unallocated(&self.ctx, self.role.slot()).await;
                // The unallocated screen stays up until the device is
                // provisioned out of band.
                std::future::pending::<()>().await;
            }
            SessionRole::Secondary { slot } => run_secondary(self.ctx, slot).await,
            SessionRole::Primary => run_primary(self.ctx).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Primary role
// ---------------------------------------------------------------------------

/// State owned by the primary instance once registration succeeds.
pub(crate) struct PrimarySession {
    ctx: Arc<SessionContext>,
    secondary: SecondaryInstanceManager,
    identifier: String,
    assignment: RwLock<Option<ContentAssignment>>,
    connection: RwLock<ConnectionState>,
    /// One-shot latch: set when a secondary is opened, reset only by an
    /// explicit close. Stays set even when the spawn was blocked, so a
    /// blocked popup is not retried on every reconciliation.
    secondary_opened: AtomicBool,
    dispatcher: OnceLock<ActionDispatcher>,
}

impl PrimarySession {
    fn new(ctx: Arc<SessionContext>, identifier: String) -> Arc<Self> {
        let secondary = SecondaryInstanceManager::new(
            ctx.bus.clone(),
            ctx.spawner.clone(),
            ctx.renderer.clone(),
        );
        let session = Arc::new(Self {
            ctx,
            secondary,
            identifier,
            assignment: RwLock::new(None),
            connection: RwLock::new(ConnectionState::default()),
            secondary_opened: AtomicBool::new(false),
            dispatcher: OnceLock::new(),
        });
        let dispatcher = ActionDispatcher::new(
            session.ctx.bus.clone(),
            session.ctx.renderer.clone(),
            session.ctx.probe.clone(),
            session.clone() as Arc<dyn Reconnector>,
        );
        let _ = session.dispatcher.set(dispatcher);
        session
    }

    /// Geometry reported to the service: the detected topology, or a
    /// single full-screen record when detection is unsupported.
    fn display_geometry(&self) -> Vec<marquee_core::ScreenDescriptor> {
        match self.ctx.screens.current() {
            Some(topology) if topology.screen_count() > 0 => topology.screens().to_vec(),
            _ => vec![self.ctx.screens.primary_screen()],
        }
    }

    async fn connect_and_apply(&self) -> Result<ConnectResponse, ApiError> {
        let displays = self.display_geometry();
        let response = self.ctx.client.connect(&self.identifier, &displays).await?;
        self.apply_connect(&response);
        Ok(response)
    }

    fn apply_connect(&self, response: &ConnectResponse) {
        {
            let mut connection = self.connection.write();
            connection.status = ConnectionStatus::Connected;
            connection.poll_interval = Duration::from_millis(response.poll_interval_ms);
        }
        self.ctx
            .renderer
            .set_connection_status(ConnectionStatus::Connected);

        if let Some(profile) = response.displays.first() {
            if let Some(orientation) = profile.orientation {
                self.ctx.renderer.set_orientation(orientation);
            }
            if let Some(overscan) = profile.overscan {
                self.ctx.renderer.set_overscan(overscan);
            }
        }

        // Venue bookkeeping the service hands back; embedders read these
        // from the settings document.
        if let Some(terminal) = &response.terminal_number {
            self.ctx.settings.set(KEY_TERMINAL_NUMBER, Value::from(terminal.clone()));
        }
        if let Some(asset) = &response.asset_id {
            self.ctx.settings.set(KEY_ASSET_ID, Value::from(asset.clone()));
        }

        if !response.urls.is_empty() {
            self.apply_assignment(ContentAssignment::from_service_urls(&response.urls));
            self.maybe_open_secondary();
        }
    }

    /// Stores and publishes a fresh assignment, and applies this
    /// instance's own slot directly (the bus never self-delivers).
    fn apply_assignment(&self, assignment: ContentAssignment) {
        self.ctx
            .renderer
            .load_content_url(select_url(&assignment, 1));
        match serde_json::to_value(&assignment) {
            Ok(payload) => {
                if let Err(err) = self.ctx.bus.publish(channels::CONTENT_ASSIGNMENT, payload) {
                    warn!(target: "marquee.session", %err, "assignment publish failed");
                }
            }
            Err(err) => warn!(target: "marquee.session", %err, "assignment serialize failed"),
        }
        *self.assignment.write() = Some(assignment);
    }

    /// Opens the secondary instance when a multi-URL assignment and a
    /// second screen are both present, at most once until explicitly
    /// closed.
    fn maybe_open_secondary(&self) {
        let multi_assignment = self
            .assignment
            .read()
            .as_ref()
            .map_or(false, ContentAssignment::is_multi_display);
        let topology = self.ctx.screens.current();
        let multi_screen = topology
            .as_ref()
            .map_or(false, |t| t.screen_count() > 1);

        if !multi_assignment || !multi_screen {
            return;
        }
        if self.secondary_opened.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(target: "marquee.session", "multi-url assignment on multi-screen device; opening secondary");
        self.secondary.open(topology.as_ref());
    }

    /// Re-derives secondary open/closed state from a topology change and
    /// refreshes the server's geometry record either way.
    async fn reconcile(&self, old: Option<ScreenTopology>, new: ScreenTopology) {
        let old_count = old.as_ref().map_or(1, ScreenTopology::screen_count);
        let new_count = new.screen_count();
        info!(
            target: "marquee.session",
            old_count, new_count, "reconciling screen topology"
        );

        if new_count > 1 {
            self.maybe_open_secondary();
        }
        if new_count <= 1 && old_count > 1 {
            self.secondary.close();
            self.secondary_opened.store(false, Ordering::SeqCst);
        }

        if let Err(err) = self.connect_and_apply().await {
            warn!(target: "marquee.session", %err, "geometry refresh failed after topology change");
        }
    }
}

#[async_trait]
impl Reconnector for PrimarySession {
    async fn reconnect(&self) {
        if let Err(err) = self.connect_and_apply().await {
            warn!(target: "marquee.session", %err, "reconnect action failed");
        }
    }
}

#[async_trait]
impl PollSink for PrimarySession {
    fn connection_changed(&self, state: ConnectionState) {
        let mut connection = self.connection.write();
        if connection.status != state.status {
            self.ctx.renderer.set_connection_status(state.status);
        }
        connection.status = state.status;
    }

    async fn poll_succeeded(&self, response: PollResponse) {
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.dispatch(&response.actions).await;
        }
        if let Some(urls) = response.urls {
            self.apply_assignment(ContentAssignment::from_service_urls(&urls));
        }
    }
}

async fn run_primary(ctx: Arc<SessionContext>) {
    let resolver = IdentityResolver::new(
        ctx.config.device_id_override.clone(),
        ctx.identity_provider.clone(),
    );
    let retry_delay = ctx.config.retry_delay;

    loop {
        // Identity is the one non-retryable prerequisite: without it there
        // is nothing to register.
        let Some(identity) = resolver.resolve().await else {
            error!(target: "marquee.session", "no device identity available; instance stays idle");
            return;
        };
        // Every request carries the resolved id, whichever identifier ends
        // up in the request path.
        ctx.client.set_device_header(identity.canonical_id());

        match establish(ctx.clone(), identity).await {
            Ok((session, poll)) => {
                {
                    let resume = ctx.resume.clone();
                    let poll = poll.clone();
                    tokio::spawn(async move {
                        loop {
                            resume.notified().await;
                            poll.wake();
                        }
                    });
                }
                poll.run(session as Arc<dyn PollSink>).await;
                unreachable!("poll loop never returns");
            }
            Err(err) => {
                warn!(
                    target: "marquee.session",
                    %err,
                    delay_seconds = retry_delay.as_secs(),
                    "registration chain failed; retrying"
                );
                ctx.renderer
                    .set_connection_status(ConnectionStatus::Disconnected);
                sleep(retry_delay).await;
            }
        }
    }
}

/// Runs the registration chain once: detect topology, find, connect, arm
/// reconciliation, build the poll loop. Any failure aborts the whole
/// chain; the caller retries from identity resolution.
pub(crate) async fn establish(
    ctx: Arc<SessionContext>,
    mut identity: marquee_core::DeviceIdentity,
) -> Result<(Arc<PrimarySession>, Arc<PollLoop>), ApiError> {
    // Permission-gated on the initial pass so a denied grant does not turn
    // into a prompt loop; the device degrades to single-screen.
    if let Err(err) = ctx.screens.detect(true) {
        warn!(target: "marquee.session", %err, "screen detection unavailable; assuming single screen");
    }

    let record = ctx.client.find(identity.canonical_id()).await?;
    if let Some(serial) = record.serial_number {
        info!(target: "marquee.session", %serial, "device found; serial number learned");
        identity.serial_number = Some(serial);
    }

    let session = PrimarySession::new(ctx.clone(), identity.canonical_id().to_string());
    let response = session.connect_and_apply().await?;

    // Topology changes flow through a channel so reconciliation runs on
    // the session task, not inside the monitor's listener.
    let (tx, mut rx) = mpsc::unbounded_channel();
    ctx.screens.set_on_change(Arc::new(move |old, new| {
        let _ = tx.send((old, new));
    }));
    {
        let session = session.clone();
        tokio::spawn(async move {
            while let Some((old, new)) = rx.recv().await {
                session.reconcile(old, new).await;
            }
        });
    }

    // A zero interval from the service would spin; fall back to the
    // configured default.
    let interval = match response.poll_interval_ms {
        0 => ctx.config.default_poll_interval,
        ms => Duration::from_millis(ms),
    };
    let poll = PollLoop::new(
        ctx.client.clone(),
        ctx.probe.clone(),
        session.identifier.clone(),
        interval,
    );
    Ok((session, poll))
}

// ---------------------------------------------------------------------------
// Secondary role
// ---------------------------------------------------------------------------

async fn run_secondary(ctx: Arc<SessionContext>, slot: u32) {
    info!(target: "marquee.session", slot, "secondary instance listening for updates");
    let mut assignments = ctx.bus.subscribe(channels::CONTENT_ASSIGNMENT);
    let mut closes = ctx.bus.subscribe(channels::SECONDARY_CLOSE);
    let mut identifies = ctx.bus.subscribe(channels::IDENTIFY);

    let mut current: Option<ContentAssignment> = None;

    // Catch up on an assignment published before this instance existed.
    match ctx.bus.read_last(channels::CONTENT_ASSIGNMENT) {
        Ok(Some(msg)) => apply_assignment_payload(&ctx, slot, &msg.payload, &mut current),
        Ok(None) => {}
        Err(err) => warn!(target: "marquee.session", %err, "assignment catch-up read failed"),
    }

    loop {
        tokio::select! {
            msg = assignments.recv() => match msg {
                Some(msg) => apply_assignment_payload(&ctx, slot, &msg.payload, &mut current),
                None => break,
            },
            msg = closes.recv() => {
                if msg.is_some() {
                    info!(target: "marquee.session", slot, "close signal received; shutting down");
                }
                return;
            }
            msg = identifies.recv() => match msg {
                Some(msg) => apply_identify_payload(&ctx, &msg.payload),
                None => break,
            },
        }
    }
}

fn apply_assignment_payload(
    ctx: &SessionContext,
    slot: u32,
    payload: &Value,
    current: &mut Option<ContentAssignment>,
) {
    match serde_json::from_value::<ContentAssignment>(payload.clone()) {
        Ok(assignment) => {
            // The file watcher can surface a write this instance already
            // caught up on; revisions keep stale payloads out.
            if !assignment.is_newer_than(current.as_ref()) {
                return;
            }
            let url = select_url(&assignment, slot);
            info!(target: "marquee.session", slot, url = url.unwrap_or("<none>"), "assignment update");
            ctx.renderer.load_content_url(url);
            *current = Some(assignment);
        }
        Err(err) => warn!(target: "marquee.session", %err, "malformed assignment payload"),
    }
}

fn apply_identify_payload(ctx: &SessionContext, payload: &Value) {
    let show = payload
        .get("show")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if show {
        let seconds = payload
            .get("display_time")
            .and_then(Value::as_u64)
            .unwrap_or(10);
        ctx.renderer.show_identify(seconds);
    } else {
        ctx.renderer.hide_identify();
    }
}

// ---------------------------------------------------------------------------
// Unallocated role
// ---------------------------------------------------------------------------

pub(crate) async fn show_unallocated(ctx: &SessionContext, slot: u32) {
    let attrs = device_attributes(&ctx.identity_provider, &ctx.probe, slot).await;
    info!(target: "marquee.session", ?attrs, "device unallocated; showing attribute screen");
    ctx.renderer.show_unallocated_device(&attrs);
}

/// Wires the settings listener that re-points the venue client when the
/// configured host changes.
pub fn watch_host_setting(settings: &Settings, client: Arc<RegistrationClient>) {
    settings.on_change(move |key, value| {
        if key == KEY_INVENUE_HOST {
            if let Some(host) = value.as_str() {
                info!(target: "marquee.session", %host, "venue host updated");
                client.set_base_url(host);
            }
        }
    });
}
