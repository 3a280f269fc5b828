//! Inference server endpoint URLs
//!
//! All endpoints hang off one base URL. The push channel is same-origin:
//! `ws://` when the base is `http://`, `wss://` when it is `https://`.

use reqwest::Url;

use crate::error::{ClientError, Result};

pub const WS_PATH: &str = "ws";
pub const START_COUNTING_PATH: &str = "start-counting";
pub const STOP_COUNTING_PATH: &str = "stop-counting";
pub const UPLOAD_MATURITY_PATH: &str = "upload/maturity";
pub const UPLOAD_DISEASE_PATH: &str = "upload/disease";

/// Resolved URLs of every endpoint the client talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoints {
    pub base: Url,
    pub stream: Url,
    pub start_counting: Url,
    pub stop_counting: Url,
    pub upload_maturity: Url,
    pub upload_disease: Url,
}

impl ServerEndpoints {
    pub fn new(server_url: &str) -> Result<Self> {
        let mut base = Url::parse(server_url)
            .map_err(|e| ClientError::Config(format!("invalid server url {}: {}", server_url, e)))?;

        // Url::join replaces the last segment unless the path ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let join = |path: &str| {
            base.join(path)
                .map_err(|e| ClientError::Config(format!("invalid endpoint {}: {}", path, e)))
        };

        let mut stream = join(WS_PATH)?;
        let ws_scheme = match base.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ClientError::Config(format!(
                    "unsupported server scheme: {}",
                    other
                )))
            }
        };
        stream
            .set_scheme(ws_scheme)
            .map_err(|_| ClientError::Config(format!("cannot derive {} url", ws_scheme)))?;

        Ok(Self {
            stream,
            start_counting: join(START_COUNTING_PATH)?,
            stop_counting: join(STOP_COUNTING_PATH)?,
            upload_maturity: join(UPLOAD_MATURITY_PATH)?,
            upload_disease: join(UPLOAD_DISEASE_PATH)?,
            base,
        })
    }
}
