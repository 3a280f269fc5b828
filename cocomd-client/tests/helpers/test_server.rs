//! In-process mock of the inference server
//!
//! Serves the same endpoints as the real server on an ephemeral port:
//! - `GET /ws`: pushes whatever the test queues with `push`/`push_raw`
//! - `POST /start-counting`, `POST /stop-counting`: configurable status
//! - `POST /upload/maturity`, `POST /upload/disease`: echo the uploaded
//!   file back as the annotated image, with configurable counts,
//!   classifications, error body and per-request delay

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use cocomd_common::api::encode_image;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// One multipart upload as the server saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub endpoint: String,
    pub file: Vec<u8>,
    pub file_name: Option<String>,
    pub location: String,
    pub device: String,
}

#[derive(Debug, Clone)]
enum Push {
    Text(String),
    Close,
}

struct Inner {
    push: broadcast::Sender<Push>,
    ws_accepted: AtomicUsize,
    ws_open: AtomicUsize,
    ws_peak: AtomicUsize,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    counting_status: Mutex<StatusCode>,
    upload_status: Mutex<StatusCode>,
    maturity_counts: Mutex<Option<Value>>,
    maturity_detections: Mutex<Option<Value>>,
    classifications: Mutex<Value>,
    upload_error: Mutex<Option<String>>,
    upload_delays: Mutex<VecDeque<Duration>>,
    uploads: Mutex<Vec<RecordedUpload>>,
}

type Shared = Arc<Inner>;

/// Mock inference server bound to 127.0.0.1
pub struct TestServer {
    addr: SocketAddr,
    inner: Shared,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let (push, _) = broadcast::channel(256);
        let inner = Arc::new(Inner {
            push,
            ws_accepted: AtomicUsize::new(0),
            ws_open: AtomicUsize::new(0),
            ws_peak: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            counting_status: Mutex::new(StatusCode::OK),
            upload_status: Mutex::new(StatusCode::OK),
            maturity_counts: Mutex::new(None),
            maturity_detections: Mutex::new(None),
            classifications: Mutex::new(json!([])),
            upload_error: Mutex::new(None),
            upload_delays: Mutex::new(VecDeque::new()),
            uploads: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/start-counting", post(start_counting))
            .route("/stop-counting", post(stop_counting))
            .route("/upload/maturity", post(upload_maturity))
            .route("/upload/disease", post(upload_disease))
            .with_state(Arc::clone(&inner));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, inner, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Push a detection message to every open `/ws` connection
    pub fn push(&self, message: Value) {
        self.push_raw(&message.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.inner.push.send(Push::Text(text.to_string()));
    }

    /// Close every open `/ws` connection from the server side
    pub fn close_streams(&self) {
        let _ = self.inner.push.send(Push::Close);
    }

    pub fn ws_accepted(&self) -> usize {
        self.inner.ws_accepted.load(Ordering::SeqCst)
    }

    pub fn ws_open(&self) -> usize {
        self.inner.ws_open.load(Ordering::SeqCst)
    }

    /// Most `/ws` connections ever open at the same time
    pub fn ws_peak(&self) -> usize {
        self.inner.ws_peak.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.inner.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.inner.stop_calls.load(Ordering::SeqCst)
    }

    pub fn set_counting_status(&self, status: StatusCode) {
        *self.inner.counting_status.lock().unwrap() = status;
    }

    pub fn set_upload_status(&self, status: StatusCode) {
        *self.inner.upload_status.lock().unwrap() = status;
    }

    /// `counts` returned by maturity uploads (`None` omits the field)
    pub fn set_maturity_counts(&self, counts: Option<Value>) {
        *self.inner.maturity_counts.lock().unwrap() = counts;
    }

    pub fn set_maturity_detections(&self, detections: Option<Value>) {
        *self.inner.maturity_detections.lock().unwrap() = detections;
    }

    pub fn set_classifications(&self, classifications: Value) {
        *self.inner.classifications.lock().unwrap() = classifications;
    }

    /// Answer uploads with 200 `{"error": message}`
    pub fn set_upload_error(&self, message: Option<&str>) {
        *self.inner.upload_error.lock().unwrap() = message.map(str::to_string);
    }

    /// Delay the next uploads, one entry per request in arrival order
    pub fn queue_upload_delays(&self, delays: &[Duration]) {
        self.inner.upload_delays.lock().unwrap().extend(delays);
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.inner.uploads.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A detection message as the real server sends it
pub fn detection_message(image: &[u8], counts: Option<Value>) -> Value {
    let mut message = json!({ "image": encode_image(image) });
    if let Some(counts) = counts {
        message["counts"] = counts;
    }
    message
}

async fn ws_handler(ws: WebSocketUpgrade, State(inner): State<Shared>) -> impl IntoResponse {
    // Subscribe before the handshake completes so nothing pushed after the
    // client sees the connection is missed
    let rx = inner.push.subscribe();
    inner.ws_accepted.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| ws_connection(socket, rx, inner))
}

async fn ws_connection(mut socket: WebSocket, mut rx: broadcast::Receiver<Push>, inner: Shared) {
    let open = inner.ws_open.fetch_add(1, Ordering::SeqCst) + 1;
    inner.ws_peak.fetch_max(open, Ordering::SeqCst);

    loop {
        tokio::select! {
            push = rx.recv() => match push {
                Ok(Push::Text(text)) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Push::Close) | Err(_) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    inner.ws_open.fetch_sub(1, Ordering::SeqCst);
}

async fn start_counting(State(inner): State<Shared>) -> StatusCode {
    inner.start_calls.fetch_add(1, Ordering::SeqCst);
    *inner.counting_status.lock().unwrap()
}

async fn stop_counting(State(inner): State<Shared>) -> StatusCode {
    inner.stop_calls.fetch_add(1, Ordering::SeqCst);
    *inner.counting_status.lock().unwrap()
}

async fn read_upload(endpoint: &str, mut multipart: Multipart) -> RecordedUpload {
    let mut upload = RecordedUpload {
        endpoint: endpoint.to_string(),
        file: Vec::new(),
        file_name: None,
        location: String::new(),
        device: String::new(),
    };

    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                upload.file_name = field.file_name().map(str::to_string);
                upload.file = field.bytes().await.unwrap().to_vec();
            }
            "location" => upload.location = field.text().await.unwrap(),
            "device" => upload.device = field.text().await.unwrap(),
            _ => {}
        }
    }

    upload
}

/// Record the upload and wait out its delay; `Err` carries the reply to
/// send instead of a classification
async fn accept_upload(
    inner: &Shared,
    endpoint: &str,
    multipart: Multipart,
) -> Result<Vec<u8>, (StatusCode, Json<Value>)> {
    let upload = read_upload(endpoint, multipart).await;
    let file = upload.file.clone();
    inner.uploads.lock().unwrap().push(upload);

    let delay = inner.upload_delays.lock().unwrap().pop_front();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let status = *inner.upload_status.lock().unwrap();
    if !status.is_success() {
        return Err((status, Json(json!({ "detail": "model unavailable" }))));
    }

    let error = inner.upload_error.lock().unwrap().clone();
    if let Some(error) = error {
        return Err((StatusCode::OK, Json(json!({ "error": error }))));
    }

    Ok(file)
}

async fn upload_maturity(
    State(inner): State<Shared>,
    multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let file = match accept_upload(&inner, "/upload/maturity", multipart).await {
        Ok(file) => file,
        Err(reply) => return reply,
    };

    let mut reply = json!({ "image": encode_image(&file) });
    if let Some(counts) = inner.maturity_counts.lock().unwrap().clone() {
        reply["counts"] = counts;
    }
    if let Some(detections) = inner.maturity_detections.lock().unwrap().clone() {
        reply["detections"] = detections;
    }
    (StatusCode::OK, Json(reply))
}

async fn upload_disease(
    State(inner): State<Shared>,
    multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let file = match accept_upload(&inner, "/upload/disease", multipart).await {
        Ok(file) => file,
        Err(reply) => return reply,
    };

    let classifications = inner.classifications.lock().unwrap().clone();
    (
        StatusCode::OK,
        Json(json!({
            "image": encode_image(&file),
            "classifications": classifications,
        })),
    )
}
