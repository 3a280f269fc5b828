//! Event types for the CocoMD event system
//!
//! The session controller publishes a `ClientEvent` for every change the
//! presentation layer may want to reflect. Events carry metadata only; the
//! frame bytes themselves are read from a session snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::api::{LinkState, Mode, UploadKind};
use crate::counts::MaturityCounts;

/// Where the currently displayed frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSource {
    Stream,
    Upload,
}

/// CocoMD client event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Operating mode selected or cleared
    ModeChanged {
        mode: Mode,
        timestamp: DateTime<Utc>,
    },

    /// Streaming flag or link health changed
    StreamStateChanged {
        streaming: bool,
        link: LinkState,
        connection: u64,
        timestamp: DateTime<Utc>,
    },

    /// Counting session turned on or off
    CountingStateChanged {
        counting: bool,
        timestamp: DateTime<Utc>,
    },

    /// Running maturity totals changed (including resets)
    CountsUpdated {
        counts: MaturityCounts,
        timestamp: DateTime<Utc>,
    },

    /// A new annotated frame is on display, or the display was cleared
    FrameUpdated {
        source: Option<FrameSource>,
        size_bytes: usize,
        timestamp: DateTime<Utc>,
    },

    /// Disease diagnosis changed
    DiagnosisUpdated {
        label: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Upload request sent to the server
    UploadDispatched {
        kind: UploadKind,
        generation: u64,
        timestamp: DateTime<Utc>,
    },

    /// Upload response arrived after being superseded and was dropped
    StaleResponseDiscarded {
        kind: UploadKind,
        generation: u64,
        current: u64,
        timestamp: DateTime<Utc>,
    },

    /// Displayed frame written to disk
    FrameExported {
        path: PathBuf,
        timestamp: DateTime<Utc>,
    },

    /// Operator command refused in the current state
    CommandRejected {
        command: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An endpoint call failed (non-success status or transport error)
    RequestFailed {
        endpoint: String,
        status: Option<u16>,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Live channel failed; streaming stays on until stopped
    StreamError {
        connection: u64,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Inbound stream message could not be decoded and was dropped
    MessageDropped {
        connection: u64,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Frame export failed
    ExportFailed {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ClientEvent {
    /// Event name, for logging and the operator console
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::ModeChanged { .. } => "ModeChanged",
            ClientEvent::StreamStateChanged { .. } => "StreamStateChanged",
            ClientEvent::CountingStateChanged { .. } => "CountingStateChanged",
            ClientEvent::CountsUpdated { .. } => "CountsUpdated",
            ClientEvent::FrameUpdated { .. } => "FrameUpdated",
            ClientEvent::DiagnosisUpdated { .. } => "DiagnosisUpdated",
            ClientEvent::UploadDispatched { .. } => "UploadDispatched",
            ClientEvent::StaleResponseDiscarded { .. } => "StaleResponseDiscarded",
            ClientEvent::FrameExported { .. } => "FrameExported",
            ClientEvent::CommandRejected { .. } => "CommandRejected",
            ClientEvent::RequestFailed { .. } => "RequestFailed",
            ClientEvent::StreamError { .. } => "StreamError",
            ClientEvent::MessageDropped { .. } => "MessageDropped",
            ClientEvent::ExportFailed { .. } => "ExportFailed",
        }
    }
}

/// Central event distribution bus for the client
///
/// Wraps `tokio::sync::broadcast`. Slow subscribers lose the oldest events
/// (`RecvError::Lagged`) rather than blocking the session controller.
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use cocomd_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ClientEvent,
    ) -> Result<usize, broadcast::error::SendError<ClientEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ClientEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("Event {} published with no subscribers", e.0.event_type());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
