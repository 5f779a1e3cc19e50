//! HTTP surface for printing text labels remotely.
//!
//! `GET /devices` reports what the printer transport can see and
//! `POST /print` renders `{"text": ...}` as a text label and prints it.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use log::{error, info};
use serde_json::{json, Value};

use crate::config::Settings;
use crate::error::Error;
use crate::printer::Transport;
use crate::raster::RasterEncoder;
use crate::text::{render_text_label, title_case, FontBook};

pub type SharedTransport = Arc<dyn Transport + Send + Sync>;
pub type SharedState = Arc<AppState>;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

const AVAILABLE_BACKENDS: [&str; 1] = ["usb"];

pub struct AppState {
    pub settings: Settings,
    pub fonts: FontBook,
    pub transport: SharedTransport,
}

impl AppState {
    pub fn new(settings: Settings, transport: SharedTransport) -> Self {
        let fonts = match &settings.font {
            Some(path) => FontBook::system().with_override(path),
            None => FontBook::system(),
        };
        AppState {
            settings,
            fonts,
            transport,
        }
    }
}

/// Standard error response.
fn err_json(status: StatusCode, body: Value) -> (StatusCode, Json<Value>) {
    (status, Json(body))
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/print", post(print_label))
        .with_state(state)
}

/// Bind to `settings.bind` and serve until the process is stopped.
pub async fn serve(settings: Settings, transport: SharedTransport) -> Result<(), Error> {
    let bind = settings.bind.clone();
    let state = Arc::new(AppState::new(settings, transport));
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Label printer server running on http://{}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// GET /devices
async fn list_devices(State(state): State<SharedState>) -> ApiResult {
    let transport = state.transport.clone();
    let (devices, connection_status) =
        tokio::task::spawn_blocking(move || (transport.devices(), transport.probe()))
            .await
            .map_err(|e| err_json(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })))?;

    Ok(Json(json!({
        "devices": devices,
        "available_backends": AVAILABLE_BACKENDS,
        "connection_status": connection_status,
    })))
}

enum Failure {
    Render(Error),
    Send(Error),
}

/// POST /print
async fn print_label(State(state): State<SharedState>, body: Bytes) -> ApiResult {
    let text = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("text").and_then(Value::as_str).map(str::to_string))
        .ok_or_else(|| {
            err_json(
                StatusCode::BAD_REQUEST,
                json!({ "error": "Missing 'text' in request body" }),
            )
        })?;

    let text = title_case(&text);
    info!("Creating label for: {}", text);

    let worker = state.clone();
    let label = text.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let status = worker.transport.probe();
        if !status.connected {
            return Ok(Err(status.message));
        }
        print_text(&worker, &label).map(Ok)
    })
    .await
    .map_err(|e| err_json(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })))?;

    match outcome {
        Ok(Ok(())) => {
            info!("Label printed successfully.");
            Ok(Json(json!({ "status": "printed", "text": text })))
        }
        Ok(Err(details)) => Err(err_json(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "Printer not connected", "details": details }),
        )),
        Err(Failure::Send(e)) => {
            error!("Printer error: {}", e);
            Err(err_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": format!("Printer error: {}", e) }),
            ))
        }
        Err(Failure::Render(e)) => {
            error!("Error during printing: {}", e);
            Err(err_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": e.to_string() }),
            ))
        }
    }
}

fn print_text(state: &AppState, text: &str) -> Result<(), Failure> {
    let now = chrono::Local::now().naive_local();
    let image = render_text_label(text, now, &state.fonts, state.settings.geometry)
        .map_err(Failure::Render)?;
    let encoder = RasterEncoder::new(state.settings.printer.clone()).map_err(Failure::Render)?;
    let instructions = encoder.encode(&image).map_err(Failure::Render)?;
    state.transport.send(&instructions).map_err(Failure::Send)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::ConnectionStatus;
    use std::sync::Mutex;

    struct FakeTransport {
        connected: bool,
        fail: bool,
        jobs: Mutex<usize>,
    }

    impl FakeTransport {
        fn new(connected: bool, fail: bool) -> Arc<Self> {
            Arc::new(FakeTransport {
                connected,
                fail,
                jobs: Mutex::new(0),
            })
        }
    }

    impl Transport for FakeTransport {
        fn send(&self, _instructions: &[u8]) -> Result<(), Error> {
            if self.fail {
                return Err(Error::DeviceOffline);
            }
            *self.jobs.lock().unwrap() += 1;
            Ok(())
        }

        fn probe(&self) -> ConnectionStatus {
            ConnectionStatus {
                connected: self.connected,
                message: if self.connected {
                    "Printer found: Vendor 0x04f9, Product 0x209b".to_string()
                } else {
                    "No Brother devices found.".to_string()
                },
                available_devices: vec![],
            }
        }

        fn devices(&self) -> Vec<String> {
            vec!["usb://0x04f9:0x209b".to_string()]
        }
    }

    fn state(transport: Arc<FakeTransport>) -> SharedState {
        Arc::new(AppState::new(Settings::default(), transport))
    }

    #[tokio::test]
    async fn missing_text_is_bad_request() {
        let state = state(FakeTransport::new(true, false));

        for body in [&b"{}"[..], &b"not json"[..], &b"{\"text\": 12}"[..]] {
            let (status, Json(body)) = print_label(State(state.clone()), Bytes::from_static(body))
                .await
                .unwrap_err();
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "Missing 'text' in request body");
        }
    }

    #[tokio::test]
    async fn disconnected_printer_is_unavailable() {
        let transport = FakeTransport::new(false, false);
        let state = state(transport.clone());

        let (status, Json(body)) =
            print_label(State(state), Bytes::from_static(b"{\"text\": \"apple juice\"}"))
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Printer not connected");
        assert_eq!(body["details"], "No Brother devices found.");
        assert_eq!(*transport.jobs.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn prints_title_cased_text() {
        let transport = FakeTransport::new(true, false);
        // none of the font files exist, the bundled face is used
        let state = Arc::new(AppState {
            settings: Settings::default(),
            fonts: FontBook::new(vec!["/no/such/font.ttf".into()], vec![]),
            transport: transport.clone(),
        });

        let Json(body) = print_label(State(state), Bytes::from_static(b"{\"text\": \"apple juice\"}"))
            .await
            .unwrap();
        assert_eq!(body["status"], "printed");
        assert_eq!(body["text"], "Apple Juice");
        assert_eq!(*transport.jobs.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn send_failure_is_printer_error() {
        let state = state(FakeTransport::new(true, true));

        let (status, Json(body)) =
            print_label(State(state), Bytes::from_static(b"{\"text\": \"tea\"}"))
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Printer error: Device is offline");
    }

    #[tokio::test]
    async fn lists_devices() {
        let state = state(FakeTransport::new(true, false));

        let Json(body) = list_devices(State(state)).await.unwrap();
        assert_eq!(body["devices"][0], "usb://0x04f9:0x209b");
        assert_eq!(body["available_backends"][0], "usb");
        assert_eq!(body["connection_status"]["connected"], true);
    }
}
