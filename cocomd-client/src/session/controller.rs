//! Session controller
//!
//! One task owns `SessionState`. Operator commands arrive on a bounded
//! channel; results of network work (stream messages, counting replies,
//! upload replies) come back as `SessionEvent`s on an internal channel.
//! Both are processed one at a time, so every state change is a single
//! `apply` call and no two events interleave.

use chrono::Utc;
use cocomd_common::api::{Mode, UploadContext, UploadKind};
use cocomd_common::config::ClientConfig;
use cocomd_common::events::{ClientEvent, EventBus};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{Admission, SessionState, SessionView};
use super::transition::{apply, changes, SessionEvent};
use crate::counting::{CountingClient, CountingRequest};
use crate::endpoints::ServerEndpoints;
use crate::error::{ClientError, Result};
use crate::export::FrameExporter;
use crate::stream::{self, StreamConsumer, StreamEvent};
use crate::upload::{UploadClassifier, UploadImage};

/// Operator command queue depth
const COMMAND_BUFFER: usize = 64;

/// Operator commands accepted by the controller
#[derive(Debug)]
pub enum Command {
    SelectMode(Mode),
    DeselectMode,
    StartStream,
    StopStream,
    StartCounting,
    StopCounting,
    Upload { kind: UploadKind, image: UploadImage },
    SetUploadContext(UploadContext),
    CaptureFrame,
    Snapshot(oneshot::Sender<SessionView>),
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SelectMode(_) => "selectMode",
            Command::DeselectMode => "deselectMode",
            Command::StartStream => "startStream",
            Command::StopStream => "stopStream",
            Command::StartCounting => "startCounting",
            Command::StopCounting => "stopCounting",
            Command::Upload {
                kind: UploadKind::Maturity,
                ..
            } => "uploadMaturity",
            Command::Upload {
                kind: UploadKind::Disease,
                ..
            } => "uploadDisease",
            Command::SetUploadContext(_) => "setUploadContext",
            Command::CaptureFrame => "captureFrame",
            Command::Snapshot(_) => "snapshot",
            Command::Shutdown => "shutdown",
        }
    }
}

/// The open push-channel connection, if any
struct LiveStream {
    connection: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owner of the session state
pub struct SessionController {
    state: SessionState,
    context: UploadContext,
    counting: CountingClient,
    counting_in_flight: bool,
    maturity: UploadClassifier,
    disease: UploadClassifier,
    stream: StreamConsumer,
    exporter: Box<dyn FrameExporter>,
    bus: Arc<EventBus>,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    live: Option<LiveStream>,
    /// Pump of the last stopped connection, possibly still closing
    retired: Option<JoinHandle<()>>,
    next_connection: u64,
}

impl SessionController {
    /// Build a controller and the handle used to drive it
    pub fn new(
        config: &ClientConfig,
        exporter: Box<dyn FrameExporter>,
        bus: Arc<EventBus>,
    ) -> Result<(Self, SessionHandle)> {
        let endpoints = ServerEndpoints::new(&config.server_url)?;
        let http = reqwest::Client::builder().build()?;

        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let controller = Self {
            state: SessionState::new(config.tally_detections),
            context: config.upload_context.clone(),
            counting: CountingClient::new(http.clone(), &endpoints),
            counting_in_flight: false,
            maturity: UploadClassifier::maturity(http.clone(), &endpoints),
            disease: UploadClassifier::disease(http, &endpoints),
            stream: StreamConsumer::from_endpoints(&endpoints),
            exporter,
            bus: Arc::clone(&bus),
            commands,
            events_tx,
            events_rx,
            live: None,
            retired: None,
            next_connection: 1,
        };

        let handle = SessionHandle {
            commands: commands_tx,
            bus,
        };

        Ok((controller, handle))
    }

    /// Build a controller and run it on its own task
    pub fn spawn(
        config: &ClientConfig,
        exporter: Box<dyn FrameExporter>,
        bus: Arc<EventBus>,
    ) -> Result<(SessionHandle, JoinHandle<()>)> {
        let (controller, handle) = Self::new(config, exporter, bus)?;
        let task = tokio::spawn(controller.run());
        Ok((handle, task))
    }

    /// Process commands and events until shutdown or every handle is dropped
    pub async fn run(mut self) {
        info!(
            server = %self.stream.url(),
            location = %self.context.location,
            device = %self.context.device,
            "Session controller started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.events_rx.recv() => self.dispatch(event),
            }
        }

        // A live pump waits for the retired one, so awaiting it covers both
        self.close_stream();
        if let Some(task) = self.retired.take() {
            if let Err(e) = task.await {
                warn!("Push channel task ended abnormally: {}", e);
            }
        }

        info!("Session controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let name = command.name();

        let admission = match &command {
            Command::SelectMode(mode) => self.state.admit_select_mode(*mode),
            Command::DeselectMode => self.state.admit_deselect_mode(),
            Command::StartStream => self.state.admit_start_stream(),
            Command::StopStream => self.state.admit_stop_stream(),
            Command::StartCounting | Command::StopCounting if self.counting_in_flight => {
                Admission::Skip("counting request in flight")
            }
            Command::StartCounting => self.state.admit_start_counting(),
            Command::StopCounting => self.state.admit_stop_counting(),
            Command::Upload { kind, .. } => self.state.admit_upload(*kind),
            Command::CaptureFrame => self.state.admit_capture_frame(),
            Command::SetUploadContext(_) | Command::Snapshot(_) | Command::Shutdown => {
                Admission::Proceed
            }
        };

        match admission {
            Admission::Proceed => {}
            Admission::Skip(reason) => {
                debug!(command = name, "Ignoring command: {}", reason);
                return;
            }
            Admission::Reject(reason) => {
                let err = ClientError::InvalidState(reason);
                warn!(command = name, "{}", err);
                self.bus.emit_lossy(ClientEvent::CommandRejected {
                    command: name.to_string(),
                    reason: err.to_string(),
                    timestamp: Utc::now(),
                });
                return;
            }
        }

        debug!(command = name, "Handling command");

        match command {
            Command::SelectMode(mode) => {
                info!("Mode selected: {}", mode);
                self.transition(SessionEvent::ModeSelected(mode));
            }
            Command::DeselectMode => {
                if self.state.streaming {
                    self.close_stream();
                }
                info!("Mode cleared");
                self.transition(SessionEvent::ModeCleared);
            }
            Command::StartStream => self.open_stream(),
            Command::StopStream => {
                self.close_stream();
                self.transition(SessionEvent::StreamStopped);
            }
            Command::StartCounting => self.send_counting(CountingRequest::Start),
            Command::StopCounting => self.send_counting(CountingRequest::Stop),
            Command::Upload { kind, image } => self.send_upload(kind, image),
            Command::SetUploadContext(context) => {
                info!(
                    location = %context.location,
                    device = %context.device,
                    "Upload context updated"
                );
                self.context = context;
            }
            Command::CaptureFrame => self.capture_frame(),
            Command::Snapshot(reply) => {
                // Requester may have given up waiting
                let _ = reply.send(SessionView::from(&self.state));
            }
            Command::Shutdown => {}
        }
    }

    fn open_stream(&mut self) {
        let connection = self.next_connection;
        self.next_connection += 1;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(stream::pump(
            self.stream.clone(),
            connection,
            self.retired.take(),
            self.events_tx.clone(),
            cancel.clone(),
        ));

        info!(connection, url = %self.stream.url(), "Starting stream");
        self.live = Some(LiveStream {
            connection,
            cancel,
            task,
        });
        self.transition(SessionEvent::StreamRequested { connection });
    }

    /// Cancel the pump; anything it already queued is dropped by `apply`
    ///
    /// The pump keeps running until its close handshake is done. The next
    /// connection waits for it.
    fn close_stream(&mut self) {
        if let Some(live) = self.live.take() {
            info!(connection = live.connection, "Stopping stream");
            live.cancel.cancel();
            self.retired = Some(live.task);
        }
    }

    fn send_counting(&mut self, request: CountingRequest) {
        self.counting_in_flight = true;
        let client = self.counting.clone();
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let event = match client.send(request).await {
                Ok(()) => match request {
                    CountingRequest::Start => SessionEvent::CountingStarted,
                    CountingRequest::Stop => SessionEvent::CountingStopped,
                },
                Err(e) => {
                    let (status, message) = describe_failure(e);
                    SessionEvent::CountingFailed {
                        request,
                        status,
                        message,
                    }
                }
            };
            let _ = events.send(event);
        });
    }

    fn send_upload(&mut self, kind: UploadKind, image: UploadImage) {
        self.transition(SessionEvent::UploadDispatched(kind));
        let generation = self.state.generations.get(kind);

        info!(%kind, generation, file = %image.file_name, "Uploading image");
        self.bus.emit_lossy(ClientEvent::UploadDispatched {
            kind,
            generation,
            timestamp: Utc::now(),
        });

        let classifier = match kind {
            UploadKind::Maturity => self.maturity.clone(),
            UploadKind::Disease => self.disease.clone(),
        };
        let context = self.context.clone();
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let endpoint = classifier.endpoint();
            let event = match classifier.submit(image, &context).await {
                Ok(outcome) => SessionEvent::UploadCompleted {
                    generation,
                    outcome,
                },
                Err(e) => failure(&endpoint, e),
            };
            let _ = events.send(event);
        });
    }

    fn capture_frame(&mut self) {
        let Some(frame) = &self.state.frame else {
            return;
        };

        match self.exporter.export(&frame.image) {
            Ok(path) => {
                info!(path = %path.display(), "Frame exported");
                self.bus.emit_lossy(ClientEvent::FrameExported {
                    path,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                error!("Frame export failed: {}", e);
                self.bus.emit_lossy(ClientEvent::ExportFailed {
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Report side effects of an event, then apply it
    fn dispatch(&mut self, event: SessionEvent) {
        let now = Utc::now();

        match &event {
            SessionEvent::CountingStarted | SessionEvent::CountingStopped => {
                self.counting_in_flight = false;
            }
            SessionEvent::CountingFailed {
                request,
                status,
                message,
            } => {
                self.counting_in_flight = false;
                self.report_failure(request.endpoint(), *status, message);
            }
            SessionEvent::RequestFailed {
                endpoint,
                status,
                message,
            } => self.report_failure(endpoint, *status, message),
            SessionEvent::UploadCompleted {
                generation,
                outcome,
            } => {
                let kind = outcome.kind();
                let current = self.state.generations.get(kind);
                if current != *generation {
                    debug!(%kind, generation, current, "Discarding stale upload response");
                    self.bus.emit_lossy(ClientEvent::StaleResponseDiscarded {
                        kind,
                        generation: *generation,
                        current,
                        timestamp: now,
                    });
                }
            }
            SessionEvent::Stream { connection, event } if self.is_live(*connection) => {
                match event {
                    StreamEvent::Dropped(reason) => {
                        self.bus.emit_lossy(ClientEvent::MessageDropped {
                            connection: *connection,
                            message: reason.clone(),
                            timestamp: now,
                        });
                    }
                    StreamEvent::Failed(reason) => {
                        self.bus.emit_lossy(ClientEvent::StreamError {
                            connection: *connection,
                            message: reason.clone(),
                            timestamp: now,
                        });
                    }
                    StreamEvent::Connected | StreamEvent::Frame(_) => {}
                }
            }
            _ => {}
        }

        self.transition(event);
    }

    fn report_failure(&self, endpoint: &str, status: Option<u16>, message: &str) {
        warn!(%endpoint, ?status, "Request failed: {}", message);
        self.bus.emit_lossy(ClientEvent::RequestFailed {
            endpoint: endpoint.to_string(),
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn is_live(&self, connection: u64) -> bool {
        self.state.streaming && self.state.connection == connection
    }

    fn transition(&mut self, event: SessionEvent) {
        let next = apply(&self.state, &event);
        for change in changes(&self.state, &next) {
            debug!(event = change.event_type(), "Session changed");
            self.bus.emit_lossy(change);
        }
        self.state = next;
    }
}

/// Status and operator-facing message of a failed request
fn describe_failure(e: ClientError) -> (Option<u16>, String) {
    let status = e.status();
    let message = match e {
        ClientError::Request { message, .. } => message,
        other => other.to_string(),
    };
    (status, message)
}

fn failure(endpoint: &str, e: ClientError) -> SessionEvent {
    let (status, message) = describe_failure(e);
    SessionEvent::RequestFailed {
        endpoint: endpoint.to_string(),
        status,
        message,
    }
}

/// Cloneable sender side of the session controller
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    bus: Arc<EventBus>,
}

impl SessionHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }

    pub async fn select_mode(&self, mode: Mode) -> Result<()> {
        self.send(Command::SelectMode(mode)).await
    }

    pub async fn deselect_mode(&self) -> Result<()> {
        self.send(Command::DeselectMode).await
    }

    pub async fn start_stream(&self) -> Result<()> {
        self.send(Command::StartStream).await
    }

    pub async fn stop_stream(&self) -> Result<()> {
        self.send(Command::StopStream).await
    }

    pub async fn start_counting(&self) -> Result<()> {
        self.send(Command::StartCounting).await
    }

    pub async fn stop_counting(&self) -> Result<()> {
        self.send(Command::StopCounting).await
    }

    pub async fn upload(&self, kind: UploadKind, image: UploadImage) -> Result<()> {
        self.send(Command::Upload { kind, image }).await
    }

    pub async fn set_upload_context(&self, context: UploadContext) -> Result<()> {
        self.send(Command::SetUploadContext(context)).await
    }

    pub async fn capture_frame(&self) -> Result<()> {
        self.send(Command::CaptureFrame).await
    }

    /// Current state, after every command sent before this call
    pub async fn snapshot(&self) -> Result<SessionView> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| ClientError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.bus.subscribe()
    }
}
