//! WebSocket client for the signaling server.
//!
//! The server relays `{type, payload}` messages between named clients. Besides
//! exchanging negotiation data it doubles as the fallback data relay.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rtcmesh_core::{MeshError, Result, SignalingMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

/// What the signaling connection reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Open,
    Message(SignalingMessage),
    Closed,
}

/// Cloneable sender for outbound signaling messages.
#[derive(Debug, Clone)]
pub struct SignalingHandle {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl SignalingHandle {
    pub fn new(tx: mpsc::UnboundedSender<SignalingMessage>) -> Self {
        Self { tx }
    }

    pub fn send(&self, message: SignalingMessage) -> Result<()> {
        let kind = message.type_name();
        self.tx
            .send(message)
            .map_err(|_| MeshError::signaling(format!("signaling connection closed, dropped '{kind}'")))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Decode one text frame. Unknown types and malformed frames yield `None`.
pub fn decode_message(text: &str) -> Option<SignalingMessage> {
    match serde_json::from_str::<SignalingMessage>(text) {
        Ok(message) => Some(message),
        Err(e) => {
            let kind = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from));
            match kind {
                Some(kind) if !SignalingMessage::TYPES.contains(&kind.as_str()) => {
                    debug!(kind = %kind, "ignoring unknown signaling message type");
                }
                _ => warn!(error = %e, "malformed signaling message"),
            }
            None
        }
    }
}

/// Connect to `url` and start the reader and writer tasks.
///
/// `Open` is the first event on the returned stream, `Closed` the last. A
/// `ping` is written every `keepalive` while the socket is up.
pub async fn connect(
    url: &str,
    keepalive: Duration,
) -> Result<(SignalingHandle, mpsc::UnboundedReceiver<SignalingEvent>)> {
    info!(url = %url, "connecting to signaling server");
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| MeshError::signaling(format!("failed to connect to {url}: {e}")))?;
    let (mut write, mut read) = stream.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalingMessage>();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let _ = event_tx.send(SignalingEvent::Open);
    info!(url = %url, "signaling connected");

    let keepalive = keepalive_period(keepalive);
    tokio::spawn(async move {
        let mut keepalive_timer = tokio::time::interval(keepalive);
        keepalive_timer.tick().await; // consume initial tick

        loop {
            let message = tokio::select! {
                outbound = out_rx.recv() => match outbound {
                    Some(message) => message,
                    None => break,
                },
                _ = keepalive_timer.tick() => SignalingMessage::Ping,
            };
            let text = match message.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, kind = message.type_name(), "failed to encode signaling message");
                    continue;
                }
            };
            trace!(kind = message.type_name(), "signaling send");
            if let Err(e) = write.send(Message::Text(text.into())).await {
                warn!(error = %e, "signaling send failed");
                break;
            }
        }
        let _ = write.close().await;
        debug!("signaling writer finished");
    });

    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(message) = decode_message(text.as_str()) {
                        trace!(kind = message.type_name(), "signaling recv");
                        if event_tx.send(SignalingEvent::Message(message)).is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("signaling server closed connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "signaling socket error");
                    break;
                }
            }
        }
        let _ = event_tx.send(SignalingEvent::Closed);
    });

    Ok((SignalingHandle::new(out_tx), event_rx))
}

/// `interval` rejects a zero period.
fn keepalive_period(keepalive: Duration) -> Duration {
    keepalive.max(Duration::from_millis(1))
}

/// In-memory signaling endpoint: the handle a client writes to plus the
/// receiver the test or router reads from.
pub fn pair() -> (SignalingHandle, mpsc::UnboundedReceiver<SignalingMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalingHandle::new(tx), rx)
}
