//! Counting-session endpoint client
//!
//! The server keeps its own notion of an active counting session; the
//! client only flips its local `counting` flag after the server accepted
//! the request. Neither call carries a body.

use reqwest::Url;
use tracing::{debug, warn};

use crate::endpoints::ServerEndpoints;
use crate::error::{ClientError, Result};

/// Which counting endpoint a request went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountingRequest {
    Start,
    Stop,
}

impl CountingRequest {
    pub fn endpoint(&self) -> &'static str {
        match self {
            CountingRequest::Start => "/start-counting",
            CountingRequest::Stop => "/stop-counting",
        }
    }
}

/// Client for `POST /start-counting` and `POST /stop-counting`
#[derive(Debug, Clone)]
pub struct CountingClient {
    http: reqwest::Client,
    start_url: Url,
    stop_url: Url,
}

impl CountingClient {
    pub fn new(http: reqwest::Client, endpoints: &ServerEndpoints) -> Self {
        Self {
            http,
            start_url: endpoints.start_counting.clone(),
            stop_url: endpoints.stop_counting.clone(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.send(CountingRequest::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(CountingRequest::Stop).await
    }

    /// Issue one counting request; any non-2xx status is a failure
    pub async fn send(&self, request: CountingRequest) -> Result<()> {
        let url = match request {
            CountingRequest::Start => &self.start_url,
            CountingRequest::Stop => &self.stop_url,
        };

        debug!(url = %url, "Sending counting request");

        let response = self.http.post(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint = request.endpoint(), status = status.as_u16(), "Counting request rejected");
            return Err(ClientError::Request {
                endpoint: request.endpoint().to_string(),
                status: Some(status.as_u16()),
                message: if body.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    body
                },
            });
        }

        Ok(())
    }
}
