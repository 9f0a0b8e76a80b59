use async_trait::async_trait;
use marquee_api::{PollResponse, RegistrationClient};
use marquee_core::{ConnectionState, ConnectionStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::platform::SystemProbe;

/// Consumes poll outcomes. Implemented by the primary session.
#[async_trait]
pub trait PollSink: Send + Sync {
    fn connection_changed(&self, state: ConnectionState);
    async fn poll_succeeded(&self, response: PollResponse);
}

/// Recurring heartbeat against the venue service.
///
/// At most one poll is ever in flight; a tick that lands while one is
/// outstanding is dropped, not queued. Failures flip the connection state
/// but never stop the loop. `wake` delivers one extra immediate tick, used
/// when the instance returns to the foreground after being throttled.
pub struct PollLoop {
    client: Arc<RegistrationClient>,
    probe: Arc<dyn SystemProbe>,
    identifier: String,
    interval: Duration,
    in_flight: AtomicBool,
    wake: Notify,
}

impl PollLoop {
    pub fn new(
        client: Arc<RegistrationClient>,
        probe: Arc<dyn SystemProbe>,
        identifier: impl Into<String>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            probe,
            identifier: identifier.into(),
            interval,
            in_flight: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Requests an immediate out-of-band tick (instance became active).
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// One poll round trip. A no-op while a previous tick is still in
    /// flight.
    pub async fn tick(&self, sink: &dyn PollSink) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(target: "marquee.poll", "previous poll still in flight; skipping tick");
            return;
        }

        let status = self.probe.system_status().await;
        let location = self.probe.location().await;
        let outcome = self
            .client
            .poll(&self.identifier, status, location)
            .await;
        self.in_flight.store(false, Ordering::SeqCst);

        match outcome {
            Ok(response) => {
                sink.connection_changed(ConnectionState {
                    status: ConnectionStatus::Connected,
                    poll_interval: self.interval,
                });
                sink.poll_succeeded(response).await;
            }
            Err(err) => {
                warn!(target: "marquee.poll", %err, "poll failed");
                sink.connection_changed(ConnectionState {
                    status: ConnectionStatus::Disconnected,
                    poll_interval: self.interval,
                });
            }
        }
    }

    /// Drives ticks forever: one immediately, then one per interval, plus
    /// an extra whenever `wake` fires.
    pub async fn run(self: Arc<Self>, sink: Arc<dyn PollSink>) {
        self.tick(sink.as_ref()).await;
        loop {
            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = self.wake.notified() => {
                    debug!(target: "marquee.poll", "instance active; polling immediately");
                }
            }
            self.tick(sink.as_ref()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::NullProbe;
    use async_trait::async_trait;
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingSink {
        states: Mutex<Vec<ConnectionStatus>>,
        responses: Mutex<Vec<PollResponse>>,
    }

    #[async_trait]
    impl PollSink for RecordingSink {
        fn connection_changed(&self, state: ConnectionState) {
            self.states.lock().push(state.status);
        }

        async fn poll_succeeded(&self, response: PollResponse) {
            self.responses.lock().push(response);
        }
    }

    async fn slow_poll_server(hits: Arc<AtomicUsize>, delay: Duration) -> String {
        let app = Router::new().route(
            "/v1/invenue-service/display-devices/:id/poll",
            post(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    sleep(delay).await;
                    Json(json!({}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn overlapping_tick_is_a_no_op() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = slow_poll_server(hits.clone(), Duration::from_millis(300)).await;

        let client = Arc::new(RegistrationClient::new(base, "device-1"));
        let poll = PollLoop::new(client, Arc::new(NullProbe::default()), "SN-1", Duration::from_secs(30));
        let sink = Arc::new(RecordingSink::default());

        let first = {
            let poll = poll.clone();
            let sink = sink.clone();
            tokio::spawn(async move { poll.tick(sink.as_ref()).await })
        };
        // Give the first tick time to go in flight, then overlap it.
        sleep(Duration::from_millis(100)).await;
        poll.tick(sink.as_ref()).await;
        first.await.expect("first tick");

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sink.states.lock().as_slice(), [ConnectionStatus::Connected]);
    }

    #[tokio::test]
    async fn failure_flips_state_but_does_not_stop_ticking() {
        // Nothing listens on this port; every poll fails.
        let client = Arc::new(RegistrationClient::new("http://127.0.0.1:9", "device-1"));
        let poll = PollLoop::new(client, Arc::new(NullProbe::default()), "SN-1", Duration::from_secs(30));
        let sink = Arc::new(RecordingSink::default());

        poll.tick(sink.as_ref()).await;
        poll.tick(sink.as_ref()).await;

        assert_eq!(
            sink.states.lock().as_slice(),
            [ConnectionStatus::Disconnected, ConnectionStatus::Disconnected]
        );
        assert!(sink.responses.lock().is_empty());
    }

    #[tokio::test]
    async fn wake_triggers_immediate_tick() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = slow_poll_server(hits.clone(), Duration::from_millis(0)).await;

        let client = Arc::new(RegistrationClient::new(base, "device-1"));
        // Interval long enough that only the startup tick and the wake
        // tick can account for observed hits.
        let poll = PollLoop::new(client, Arc::new(NullProbe::default()), "SN-1", Duration::from_secs(60));
        let sink = Arc::new(RecordingSink::default());

        let runner = tokio::spawn(poll.clone().run(sink));
        sleep(Duration::from_millis(150)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        poll.wake();
        sleep(Duration::from_millis(150)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        runner.abort();
    }
}
