//! Single-shot image classification uploads
//!
//! Two instances exist at runtime, one per `UploadKind`. Each call posts a
//! multipart form (`file`, `location`, `device`) and waits for exactly one
//! response. Requests are never cancelled; the session controller decides
//! afterwards whether a response is still current (generation check).

use cocomd_common::api::{
    Classification, DetectionFrame, DetectionMessage, DiseaseResponse, ServerErrorBody,
    UploadContext, UploadKind,
};
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use std::path::Path;
use tracing::{debug, info};

use crate::endpoints::ServerEndpoints;
use crate::error::{ClientError, Result};

/// Image file submitted for classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadImage {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

impl UploadImage {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
        }
    }

    /// Read an image from disk, keeping its file name for the form part
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.jpg".to_string());
        Ok(Self { bytes, file_name })
    }

    /// Content type inferred from the file extension
    pub fn mime_type(&self) -> &'static str {
        let ext = Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("png") => "image/png",
            Some("bmp") => "image/bmp",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            _ => "image/jpeg",
        }
    }
}

/// Decoded reply of one upload
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Annotated frame plus optional counts increment
    Maturity(DetectionFrame),
    /// Annotated frame plus ranked classifications
    Disease {
        image: Vec<u8>,
        classifications: Vec<Classification>,
    },
}

impl UploadOutcome {
    pub fn kind(&self) -> UploadKind {
        match self {
            UploadOutcome::Maturity(_) => UploadKind::Maturity,
            UploadOutcome::Disease { .. } => UploadKind::Disease,
        }
    }

    pub fn image(&self) -> &[u8] {
        match self {
            UploadOutcome::Maturity(frame) => &frame.image,
            UploadOutcome::Disease { image, .. } => image,
        }
    }
}

/// Request/response classifier for one upload kind
#[derive(Debug, Clone)]
pub struct UploadClassifier {
    kind: UploadKind,
    http: reqwest::Client,
    url: Url,
}

impl UploadClassifier {
    pub fn new(kind: UploadKind, http: reqwest::Client, endpoints: &ServerEndpoints) -> Self {
        let url = match kind {
            UploadKind::Maturity => endpoints.upload_maturity.clone(),
            UploadKind::Disease => endpoints.upload_disease.clone(),
        };
        Self { kind, http, url }
    }

    pub fn maturity(http: reqwest::Client, endpoints: &ServerEndpoints) -> Self {
        Self::new(UploadKind::Maturity, http, endpoints)
    }

    pub fn disease(http: reqwest::Client, endpoints: &ServerEndpoints) -> Self {
        Self::new(UploadKind::Disease, http, endpoints)
    }

    pub fn kind(&self) -> UploadKind {
        self.kind
    }

    /// Request path, used to label failures
    pub fn endpoint(&self) -> String {
        self.url.path().to_string()
    }

    /// Submit one image and decode the server's reply
    pub async fn submit(&self, image: UploadImage, context: &UploadContext) -> Result<UploadOutcome> {
        let size = image.bytes.len();
        let mime = image.mime_type();
        let form = Form::new()
            .part(
                "file",
                Part::bytes(image.bytes)
                    .file_name(image.file_name)
                    .mime_str(mime)?,
            )
            .text("location", context.location.clone())
            .text("device", context.device.clone());

        debug!(kind = %self.kind, url = %self.url, size, "Submitting upload");

        let response = self.http.post(self.url.clone()).multipart(form).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(ClientError::Request {
                endpoint: self.endpoint(),
                status: Some(status.as_u16()),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| ClientError::Decode(format!("{} response: {}", self.kind, e)))?;

        // The server reports unreadable images as 200 with {"error": ...}
        if let Ok(rejected) = serde_json::from_value::<ServerErrorBody>(value.clone()) {
            return Err(ClientError::Request {
                endpoint: self.endpoint(),
                status: Some(status.as_u16()),
                message: rejected.error,
            });
        }

        let outcome = match self.kind {
            UploadKind::Maturity => {
                let message: DetectionMessage = serde_json::from_value(value)
                    .map_err(|e| ClientError::Decode(format!("maturity response: {}", e)))?;
                UploadOutcome::Maturity(message.into_frame()?)
            }
            UploadKind::Disease => {
                let reply: DiseaseResponse = serde_json::from_value(value)
                    .map_err(|e| ClientError::Decode(format!("disease response: {}", e)))?;
                UploadOutcome::Disease {
                    image: cocomd_common::api::decode_image(&reply.image)?,
                    classifications: reply.classifications,
                }
            }
        };

        info!(
            kind = %self.kind,
            image_bytes = outcome.image().len(),
            "Upload classified"
        );

        Ok(outcome)
    }
}
