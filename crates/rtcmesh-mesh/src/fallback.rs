use std::time::Duration;

use rtcmesh_core::{MeshError, Result};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::negotiation::{ChannelEvent, NegotiationChannel, NegotiationState};
use crate::transport::TransportEvent;

/// Wraps a [`NegotiationChannel`] and degrades it to the signaling relay when
/// direct negotiation stalls.
///
/// Every `Signal` queued while not yet connected (re)arms a deadline of
/// `delay`. `Connect` or `Close` disarms it. When the deadline passes the
/// transport primitive is released and a synthetic `Connect` is queued; from
/// then on `send` queues `RelaySend` and relayed data arrives through
/// [`FallbackChannel::inject_relay_data`]. The switch is one-way.
pub struct FallbackChannel {
    inner: NegotiationChannel,
    delay: Duration,
    deadline: Option<Instant>,
    relayed: bool,
}

impl FallbackChannel {
    pub fn new(inner: NegotiationChannel, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            deadline: None,
            relayed: false,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    pub fn is_relayed(&self) -> bool {
        self.relayed && !self.inner.is_destroyed()
    }

    /// When the relay switch is due, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub async fn signal(&mut self, data: Value) -> Result<()> {
        if self.relayed && !self.inner.is_destroyed() {
            debug!("relayed channel ignoring signal");
            return Ok(());
        }
        self.inner.signal(data).await
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        if !self.relayed {
            self.inner.handle_transport_event(event).await;
        }
    }

    pub async fn send(&mut self, text: String) -> Result<()> {
        if !self.relayed {
            return self.inner.send(text).await;
        }
        if self.inner.is_destroyed() {
            return Err(MeshError::destroyed("cannot call send after peer is destroyed"));
        }
        self.inner.push_event(ChannelEvent::RelaySend(text));
        Ok(())
    }

    /// Switch to relay mode if the deadline is still armed.
    pub async fn on_deadline(&mut self) {
        if self.deadline.take().is_none() || self.relayed || self.inner.is_destroyed() {
            return;
        }
        info!(delay_ms = self.delay.as_millis() as u64, "direct negotiation stalled, falling back to relay");
        self.relayed = true;
        if let Some(connection) = self.inner.release_transport() {
            connection.close().await;
        }
        self.inner.open();
    }

    /// Data that arrived through the signaling relay.
    pub fn inject_relay_data(&mut self, text: String) {
        self.inner.push_event(ChannelEvent::Data(text));
    }

    /// The relay transport went away. Fatal only once this channel depends on it.
    pub async fn relay_disconnected(&mut self) {
        if self.relayed {
            info!("relay disconnected");
            self.inner.destroy(None).await;
        }
    }

    pub async fn destroy(&mut self, err: Option<MeshError>) {
        self.deadline = None;
        self.inner.destroy(err).await;
    }

    /// Drain queued events, updating the countdown from what they report.
    ///
    /// Only signals emitted before `Connect` re-arm the countdown; a
    /// renegotiation on an open channel never triggers the relay switch.
    pub fn take_events(&mut self) -> Vec<ChannelEvent> {
        let events = self.inner.take_events();
        for event in &events {
            match event {
                ChannelEvent::Signal(_) if !self.relayed && !self.inner.is_connected() => {
                    self.deadline = Some(Instant::now() + self.delay);
                }
                ChannelEvent::Connect | ChannelEvent::Close => self.deadline = None,
                _ => {}
            }
        }
        events
    }
}
