//! Shared domain and wire types for the inference server API
//!
//! Wire structs mirror the JSON the server sends over the `/ws` push channel
//! and in upload responses. Images arrive base64-encoded and are decoded
//! into raw bytes here so that nothing downstream handles base64.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::counts::MaturityCounts;
use crate::{Error, Result};

/// Diagnosis shown when the disease model returns no classification
pub const NO_DISEASE_LABEL: &str = "No disease detected";

/// Operating mode of the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// No mode selected yet (landing screen)
    #[default]
    Unselected,
    /// Maturity detection: live stream, counting, maturity uploads
    Maturity,
    /// Disease classification: disease uploads
    Disease,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Unselected => write!(f, "unselected"),
            Mode::Maturity => write!(f, "maturity"),
            Mode::Disease => write!(f, "disease"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "maturity" => Ok(Mode::Maturity),
            "disease" => Ok(Mode::Disease),
            other => Err(Error::InvalidInput(format!("unknown mode: {}", other))),
        }
    }
}

/// Health of the live push-channel connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// No connection requested
    #[default]
    Down,
    /// Connection requested, handshake not finished
    Connecting,
    /// Connected and receiving
    Up,
    /// Failed or closed by the server; not retried
    Broken,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Down => write!(f, "down"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Up => write!(f, "up"),
            LinkState::Broken => write!(f, "broken"),
        }
    }
}

/// Which single-shot classifier an upload goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Maturity,
    Disease,
}

impl UploadKind {
    /// Mode in which uploads of this kind are accepted
    pub fn mode(&self) -> Mode {
        match self {
            UploadKind::Maturity => Mode::Maturity,
            UploadKind::Disease => Mode::Disease,
        }
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadKind::Maturity => write!(f, "maturity"),
            UploadKind::Disease => write!(f, "disease"),
        }
    }
}

impl std::str::FromStr for UploadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "maturity" => Ok(UploadKind::Maturity),
            "disease" => Ok(UploadKind::Disease),
            other => Err(Error::InvalidInput(format!("unknown upload kind: {}", other))),
        }
    }
}

/// Metadata attached verbatim to every upload request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadContext {
    pub location: String,
    pub device: String,
}

impl UploadContext {
    pub fn new(location: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            device: device.into(),
        }
    }
}

/// One bounding-box detection drawn on an annotated frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// `[x1, y1, x2, y2]` in frame pixels
    #[serde(default)]
    pub bbox: Option<[i64; 4]>,
}

/// One disease classification, ranked best-first by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    #[serde(default, alias = "confidence")]
    pub score: Option<f64>,
}

/// Effective diagnosis for a ranked classification list
pub fn diagnosis_label(classifications: &[Classification]) -> String {
    classifications
        .first()
        .map(|c| c.label.clone())
        .unwrap_or_else(|| NO_DISEASE_LABEL.to_string())
}

/// Decoded detection event: an annotated image plus an optional increment
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionFrame {
    /// Annotated JPEG bytes
    pub image: Vec<u8>,
    /// Counts increment carried by the message, if any
    pub counts: Option<MaturityCounts>,
    pub detections: Vec<Detection>,
}

impl DetectionFrame {
    /// Counts increment to apply for this frame
    ///
    /// With `tally_detections`, a frame lacking explicit counts contributes
    /// one per detection whose label names a maturity category.
    pub fn increment(&self, tally_detections: bool) -> Option<MaturityCounts> {
        match self.counts {
            Some(counts) => Some(counts),
            None if tally_detections && !self.detections.is_empty() => Some(
                MaturityCounts::from_labels(self.detections.iter().map(|d| d.label.as_str())),
            ),
            None => None,
        }
    }
}

/// Message pushed over the `/ws` channel (also the maturity upload reply)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectionMessage {
    /// Base64-encoded annotated JPEG
    pub image: String,
    #[serde(default)]
    pub counts: Option<MaturityCounts>,
    #[serde(default)]
    pub detections: Option<Vec<Detection>>,
}

impl DetectionMessage {
    /// Parse and decode one push-channel message
    pub fn decode(raw: &[u8]) -> Result<DetectionFrame> {
        let message: DetectionMessage = serde_json::from_slice(raw)?;
        message.into_frame()
    }

    pub fn into_frame(self) -> Result<DetectionFrame> {
        Ok(DetectionFrame {
            image: decode_image(&self.image)?,
            counts: self.counts,
            detections: self.detections.unwrap_or_default(),
        })
    }
}

/// Reply of `POST /upload/disease`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiseaseResponse {
    pub image: String,
    #[serde(default)]
    pub classifications: Vec<Classification>,
}

/// Body returned with a 2xx status when the server rejects an upload
#[derive(Debug, Clone, Deserialize)]
pub struct ServerErrorBody {
    pub error: String,
}

/// Decode a base64 image payload into raw bytes
pub fn decode_image(encoded: &str) -> Result<Vec<u8>> {
    // Tolerate data URLs ("data:image/jpeg;base64,...")
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    Ok(BASE64.decode(payload.trim())?)
}

/// Encode raw image bytes as base64 (used when echoing frames)
pub fn encode_image(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}
