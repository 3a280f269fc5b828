//! Push-channel consumer for live annotated frames
//!
//! One WebSocket per `startStream`. The client sends nothing after the
//! handshake; every inbound message is a self-contained detection event.
//! A `StreamSubscription` yields those events in arrival order and ends on
//! close or transport error. There is no reconnect.
//!
//! At most one connection is open at a time: a new pump waits for the
//! previous one to finish its close handshake before connecting.

use std::time::Duration;

use cocomd_common::api::{DetectionFrame, DetectionMessage};
use futures::StreamExt;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoints::ServerEndpoints;
use crate::error::{ClientError, Result};
use crate::session::SessionEvent;

/// How long a client-side close waits for the server to answer
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// What the pump task reports about one connection
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Handshake finished
    Connected,
    /// Decoded detection message
    Frame(DetectionFrame),
    /// Message could not be decoded; the connection stays up
    Dropped(String),
    /// Connection failed or was closed by the server
    Failed(String),
}

/// Opens push-channel connections to the server's `/ws` endpoint
#[derive(Debug, Clone)]
pub struct StreamConsumer {
    url: Url,
}

impl StreamConsumer {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn from_endpoints(endpoints: &ServerEndpoints) -> Self {
        Self::new(endpoints.stream.clone())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Open one connection (no handshake payload is sent)
    pub async fn connect(&self) -> Result<StreamSubscription> {
        debug!(url = %self.url, "Opening push channel");
        let (socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Connection(format!("{}: {}", self.url, e)))?;
        info!(url = %self.url, "Push channel connected");
        Ok(StreamSubscription {
            socket,
            received: 0,
        })
    }
}

/// Sequence of detection events from one live connection
pub struct StreamSubscription {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    received: u64,
}

impl StreamSubscription {
    /// Next detection event
    ///
    /// `None` once the server closes the channel. `Some(Err(Decode))` for a
    /// malformed message, after which the subscription can keep going; any
    /// other error means the connection is gone.
    pub async fn next(&mut self) -> Option<Result<DetectionFrame>> {
        loop {
            let message = match self.socket.next().await {
                None => return None,
                Some(Err(e)) => return Some(Err(e.into())),
                Some(Ok(message)) => message,
            };

            let payload = match message {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(bytes) => bytes,
                Message::Close(frame) => {
                    debug!(?frame, "Server closed push channel");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };

            self.received += 1;
            return Some(DetectionMessage::decode(&payload).map_err(ClientError::from));
        }
    }

    /// Number of data messages received so far
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Close the channel from the client side
    ///
    /// Returns once the server has answered the close (or gone away), so
    /// the connection is finished on both ends.
    pub async fn close(mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!("Push channel close: {}", e);
            return;
        }

        let drain = async { while let Some(Ok(_)) = self.socket.next().await {} };
        if tokio::time::timeout(CLOSE_TIMEOUT, drain).await.is_err() {
            warn!("Push channel close not acknowledged within {:?}", CLOSE_TIMEOUT);
        }
    }
}

/// Drive one connection, forwarding its events to the session controller
///
/// `previous` is the pump of the connection this one replaces; it has
/// already been cancelled and is awaited before connecting. Runs until the
/// connection ends or `cancel` fires. After cancellation nothing more is
/// sent for this connection.
pub(crate) async fn pump(
    consumer: StreamConsumer,
    connection: u64,
    previous: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
) {
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            warn!(connection, "Previous push channel task ended abnormally: {}", e);
        }
    }

    let send = |event: StreamEvent| {
        // Receiver gone means the controller shut down
        let _ = events.send(SessionEvent::Stream { connection, event });
    };

    let mut subscription = tokio::select! {
        _ = cancel.cancelled() => return,
        result = consumer.connect() => match result {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(connection, "Push channel failed to open: {}", e);
                send(StreamEvent::Failed(e.to_string()));
                return;
            }
        },
    };

    send(StreamEvent::Connected);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(connection, received = subscription.received(), "Closing push channel");
                subscription.close().await;
                return;
            }
            item = subscription.next() => match item {
                Some(Ok(frame)) => send(StreamEvent::Frame(frame)),
                Some(Err(ClientError::Decode(reason))) => {
                    warn!(connection, "Dropping malformed stream message: {}", reason);
                    send(StreamEvent::Dropped(reason));
                }
                Some(Err(e)) => {
                    warn!(connection, "Push channel error: {}", e);
                    send(StreamEvent::Failed(e.to_string()));
                    return;
                }
                None => {
                    warn!(connection, "Push channel closed by server");
                    send(StreamEvent::Failed("connection closed by server".to_string()));
                    return;
                }
            },
        }
    }
}
