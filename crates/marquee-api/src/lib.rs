//! Asynchronous client for the in-venue display-device service.
//!
//! Three stateless round-trips: `find` (device lookup by identifier),
//! `connect` (register current screen geometry, receive content URLs), and
//! `poll` (liveness heartbeat, receive commands). Retries are the caller's
//! responsibility; every call is a single request.

use marquee_core::ScreenDescriptor;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const SERVICE_PREFIX: &str = "v1/invenue-service/display-devices";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("device not registered with the venue service")]
    NotFound,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: StatusCode, body: String },
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Best-effort device coordinates reported with each poll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Response to `find`: the service's record of this device.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
}

/// Per-display render settings the service may attach to a connect
/// response.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DisplayProfile {
    #[serde(default)]
    pub orientation: Option<u16>,
    #[serde(default)]
    pub overscan: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub displays: Vec<DisplayProfile>,
    #[serde(default)]
    pub terminal_number: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollResponse {
    /// Raw action objects; decoded individually by the dispatcher so one
    /// unknown action never poisons the batch.
    #[serde(default)]
    pub actions: Vec<Value>,
    #[serde(default)]
    pub urls: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ConnectRequest<'a> {
    displays: &'a [ScreenDescriptor],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PollRequest {
    system_status: Value,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Client for the venue service. The base URL can be re-pointed at runtime
/// when the configured host changes, and the device header is filled in
/// once identity resolution finishes.
pub struct RegistrationClient {
    http: Client,
    base_url: RwLock<String>,
    device_header: RwLock<String>,
}

impl RegistrationClient {
    /// `device_header` is the resolved device id, sent as `X-Device-ID` on
    /// every request regardless of which identifier appears in the path.
    pub fn new(base_url: impl Into<String>, device_header: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: RwLock::new(trim_base(base_url.into())),
            device_header: RwLock::new(device_header.into()),
        }
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) {
        *self.base_url.write() = trim_base(base_url.into());
    }

    pub fn base_url(&self) -> String {
        self.base_url.read().clone()
    }

    pub fn set_device_header(&self, device_id: impl Into<String>) {
        *self.device_header.write() = device_id.into();
    }

    fn device_header(&self) -> String {
        self.device_header.read().clone()
    }

    /// Looks the device up by its resolved identifier. 404 means the
    /// device exists but is not registered with the venue service.
    pub async fn find(&self, device_id: &str) -> ApiResult<DeviceRecord> {
        let url = format!("{}/{}/google/{}", self.base_url(), SERVICE_PREFIX, device_id);
        debug!(target: "marquee.api", %url, "find device");
        let res = self
            .http
            .get(url)
            .header("X-Device-ID", self.device_header())
            .send()
            .await?;
        decode(res).await
    }

    /// Registers the device's current screen geometry. Idempotent server
    /// side; repeated calls with the same geometry yield the same
    /// assignment.
    pub async fn connect(
        &self,
        identifier: &str,
        displays: &[ScreenDescriptor],
    ) -> ApiResult<ConnectResponse> {
        let url = format!(
            "{}/{}/{}/connect",
            self.base_url(),
            SERVICE_PREFIX,
            identifier
        );
        debug!(target: "marquee.api", %url, display_count = displays.len(), "connect");
        let res = self
            .http
            .post(url)
            .header("X-Device-ID", self.device_header())
            .json(&ConnectRequest { displays })
            .send()
            .await?;
        decode(res).await
    }

    /// Heartbeat. A null location is valid input; the service treats both
    /// coordinates as optional.
    pub async fn poll(
        &self,
        identifier: &str,
        system_status: Value,
        location: Option<GeoPoint>,
    ) -> ApiResult<PollResponse> {
        let url = format!("{}/{}/{}/poll", self.base_url(), SERVICE_PREFIX, identifier);
        let body = PollRequest {
            system_status,
            latitude: location.map(|p| p.latitude),
            longitude: location.map(|p| p.longitude),
        };
        let res = self
            .http
            .post(url)
            .header("X-Device-ID", self.device_header())
            .json(&body)
            .send()
            .await?;
        decode(res).await
    }
}

fn trim_base(mut base: String) -> String {
    while base.ends_with('/') {
        base.pop();
    }
    base
}

async fn decode<T: DeserializeOwned>(res: reqwest::Response) -> ApiResult<T> {
    let status = res.status();
    if status.is_success() {
        Ok(res.json::<T>().await?)
    } else if status == StatusCode::NOT_FOUND {
        Err(ApiError::NotFound)
    } else {
        let body = res.text().await.unwrap_or_default();
        Err(ApiError::UnexpectedStatus { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured {
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    async fn serve(app: Router) -> String {
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
    async fn find_maps_404_to_not_found() {
        // axum speaks http 1.x; the assertions below stay on the
        // reqwest-side StatusCode.
        let app = Router::new().route(
            "/v1/invenue-service/display-devices/google/:id",
            get(|| async { (axum::http::StatusCode::NOT_FOUND, "no such device") }),
        );
        let base = serve(app).await;

        let client = RegistrationClient::new(base, "device-1");
        match client.find("device-1").await {
            Err(ApiError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_posts_geometry_verbatim() {
        let captured = Captured::default();
        let app = Router::new()
            .route(
                "/v1/invenue-service/display-devices/:id/connect",
                post(
                    |State(captured): State<Captured>, Json(body): Json<Value>| async move {
                        captured.bodies.lock().unwrap().push(body);
                        Json(json!({
                            "urls": ["http://a", "http://b"],
                            "pollIntervalMs": 15000,
                            "displays": [{"orientation": 90, "overscan": true}]
                        }))
                    },
                ),
            )
            .with_state(captured.clone());
        let base = serve(app).await;

        let client = RegistrationClient::new(base, "device-1");
        let displays = vec![
            ScreenDescriptor {
                width: 1920,
                height: 1080,
                left: 0,
                top: 0,
            },
            ScreenDescriptor {
                width: 1280,
                height: 720,
                left: 1920,
                top: 0,
            },
        ];
        let res = client.connect("SN-1", &displays).await.expect("connect");

        assert_eq!(res.urls, vec!["http://a", "http://b"]);
        assert_eq!(res.poll_interval_ms, 15_000);
        assert_eq!(res.displays[0].orientation, Some(90));

        let bodies = captured.bodies.lock().unwrap();
        assert_eq!(
            bodies[0],
            json!({"displays": [
                {"width": 1920, "height": 1080, "left": 0, "top": 0},
                {"width": 1280, "height": 720, "left": 1920, "top": 0},
            ]})
        );
    }

    #[tokio::test]
    async fn device_header_is_sent_and_updatable() {
        let captured = Captured::default();
        let app = Router::new()
            .route(
                "/v1/invenue-service/display-devices/google/:id",
                get(
                    |State(captured): State<Captured>,
                     headers: axum::http::HeaderMap| async move {
                        let value = headers
                            .get("x-device-id")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default();
                        captured.bodies.lock().unwrap().push(json!(value));
                        Json(json!({}))
                    },
                ),
            )
            .with_state(captured.clone());
        let base = serve(app).await;

        let client = RegistrationClient::new(base, "boot-id");
        client.find("device-1").await.expect("find");
        client.set_device_header("SN-9");
        client.find("device-1").await.expect("find");

        let bodies = captured.bodies.lock().unwrap();
        assert_eq!(bodies.as_slice(), [json!("boot-id"), json!("SN-9")]);
    }

    #[tokio::test]
    async fn poll_carries_nullable_coordinates() {
        let captured = Captured::default();
        let app = Router::new()
            .route(
                "/v1/invenue-service/display-devices/:id/poll",
                post(
                    |State(captured): State<Captured>, Json(body): Json<Value>| async move {
                        captured.bodies.lock().unwrap().push(body);
                        Json(json!({"actions": [{"action": "reboot"}]}))
                    },
                ),
            )
            .with_state(captured.clone());
        let base = serve(app).await;

        let client = RegistrationClient::new(base, "device-1");
        let res = client
            .poll("SN-1", json!({"online": true}), None)
            .await
            .expect("poll");
        assert_eq!(res.actions.len(), 1);
        assert!(res.urls.is_none());

        let bodies = captured.bodies.lock().unwrap();
        assert_eq!(bodies[0]["latitude"], Value::Null);
        assert_eq!(bodies[0]["longitude"], Value::Null);
        assert_eq!(bodies[0]["systemStatus"]["online"], true);
    }

    #[tokio::test]
    async fn non_2xx_carries_status_and_body() {
        let app = Router::new().route(
            "/v1/invenue-service/display-devices/google/:id",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        );
        let base = serve(app).await;

        let client = RegistrationClient::new(base, "device-1");
        match client.find("device-1").await {
            Err(ApiError::UnexpectedStatus { status, body }) => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected UnexpectedStatus, got {other:?}"),
        }
    }
}
