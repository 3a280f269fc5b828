//! CocoMD client library
//!
//! Operator-side client for the coconut maturity and disease inference
//! server. The server streams annotated frames over a WebSocket and
//! classifies uploaded images; this crate keeps the session state
//! (mode, streaming, counting, running maturity totals, displayed frame,
//! diagnosis) consistent while those messages arrive concurrently.
//!
//! Components:
//! - `stream`: push-channel consumer for live detection events
//! - `upload`: one-shot maturity and disease classification requests
//! - `counting`: server counting-session toggles
//! - `export`: writes the displayed frame to disk
//! - `session`: the state machine and the controller task that owns it
//! - `commands`: operator console grammar

pub mod commands;
pub mod counting;
pub mod endpoints;
pub mod error;
pub mod export;
pub mod session;
pub mod stream;
pub mod upload;

pub use counting::CountingClient;
pub use endpoints::ServerEndpoints;
pub use error::{ClientError, Result};
pub use export::{DirectoryExporter, FrameExporter};
pub use session::{Command, SessionController, SessionHandle, SessionView};
pub use stream::{StreamConsumer, StreamEvent};
pub use upload::{UploadClassifier, UploadImage, UploadOutcome};
