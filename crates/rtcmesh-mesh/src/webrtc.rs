//! [`PeerConnectionFactory`] backed by the `webrtc` crate.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rtcmesh_core::{
    DataChannelConfig, ErrorKind, IceCandidate, MeshError, PeerConnectionConfig, Result, SdpType,
    SessionDescription,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

use crate::transport::{
    ConnectionOptions, IceConnectionState, IceGatheringState, PeerConnection,
    PeerConnectionFactory, SignalingState, TransportError, TransportEvent, TransportParts,
    TransportResult,
};

type Events = mpsc::UnboundedSender<TransportEvent>;
type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WebRtcConnectionFactory;

impl WebRtcConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcConnectionFactory {
    async fn create(&self, options: &ConnectionOptions) -> Result<TransportParts> {
        let unsupported = |e: webrtc::Error| {
            MeshError::new(ErrorKind::UnsupportedTransport, format!("webrtc: {e}"))
        };

        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media).map_err(unsupported)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        let pc = Arc::new(
            api.new_peer_connection(rtc_configuration(&options.peer_connection))
                .await
                .map_err(unsupported)?,
        );
        if !options.streams.is_empty() {
            debug!(streams = options.streams.len(), "media streams are not attached");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let slot: ChannelSlot = Arc::new(Mutex::new(None));
        wire_connection(&pc, &tx, &slot);

        if options.is_initiator {
            let dc = pc
                .create_data_channel(
                    &options.data_channel.label,
                    Some(data_channel_init(&options.data_channel)),
                )
                .await
                .map_err(unsupported)?;
            wire_data_channel(&dc, &tx);
            *slot.lock() = Some(dc);
        }

        Ok(TransportParts {
            connection: Arc::new(WebRtcConnection { pc, channel: slot }),
            events: rx,
        })
    }
}

fn rtc_configuration(config: &PeerConnectionConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config
            .ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn data_channel_init(config: &DataChannelConfig) -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(config.ordered),
        max_retransmits: config.max_retransmits,
        ..Default::default()
    }
}

// ── Callback wiring ────────────────────────────────────────────

fn wire_connection(pc: &Arc<RTCPeerConnection>, tx: &Events, slot: &ChannelSlot) {
    let events = tx.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = events.clone();
        Box::pin(async move {
            let candidate = match candidate {
                Some(c) => match c.to_json() {
                    Ok(init) => Some(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Err(e) => {
                        warn!(error = %e, "dropping unserializable candidate");
                        return;
                    }
                },
                None => None,
            };
            let _ = events.send(TransportEvent::IceCandidate(candidate));
        })
    }));

    let events = tx.clone();
    pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        let events = events.clone();
        Box::pin(async move {
            let state = match state {
                RTCIceGathererState::New => IceGatheringState::New,
                RTCIceGathererState::Gathering => IceGatheringState::Gathering,
                RTCIceGathererState::Complete => IceGatheringState::Complete,
                _ => return,
            };
            let _ = events.send(TransportEvent::IceGatheringStateChange(state));
        })
    }));

    let events = tx.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let events = events.clone();
        Box::pin(async move {
            let state = match state {
                RTCIceConnectionState::New => IceConnectionState::New,
                RTCIceConnectionState::Checking => IceConnectionState::Checking,
                RTCIceConnectionState::Connected => IceConnectionState::Connected,
                RTCIceConnectionState::Completed => IceConnectionState::Completed,
                RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
                RTCIceConnectionState::Failed => IceConnectionState::Failed,
                RTCIceConnectionState::Closed => IceConnectionState::Closed,
                _ => return,
            };
            let _ = events.send(TransportEvent::IceConnectionStateChange(state));
        })
    }));

    let events = tx.clone();
    pc.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
        let events = events.clone();
        Box::pin(async move {
            let state = match state {
                RTCSignalingState::Stable => SignalingState::Stable,
                RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
                RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
                RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
                RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
                RTCSignalingState::Closed => SignalingState::Closed,
                _ => return,
            };
            let _ = events.send(TransportEvent::SignalingStateChange(state));
        })
    }));

    let events = tx.clone();
    pc.on_negotiation_needed(Box::new(move || {
        let events = events.clone();
        Box::pin(async move {
            let _ = events.send(TransportEvent::NegotiationNeeded);
        })
    }));

    // Responders receive the initiator's channel.
    let events = tx.clone();
    let slot = Arc::clone(slot);
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let events = events.clone();
        let slot = Arc::clone(&slot);
        Box::pin(async move {
            info!(label = %dc.label(), "remote data channel announced");
            wire_data_channel(&dc, &events);
            *slot.lock() = Some(dc);
        })
    }));
}

fn wire_data_channel(dc: &Arc<RTCDataChannel>, tx: &Events) {
    let events = tx.clone();
    dc.on_open(Box::new(move || {
        let events = events.clone();
        Box::pin(async move {
            let _ = events.send(TransportEvent::DataChannelOpen);
        })
    }));

    let events = tx.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events.clone();
        Box::pin(async move {
            if !msg.is_string {
                debug!(bytes = msg.data.len(), "ignoring binary data-channel message");
                return;
            }
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = events.send(TransportEvent::DataChannelMessage(text));
                }
                Err(e) => warn!(error = %e, "data-channel text is not valid UTF-8"),
            }
        })
    }));

    let events = tx.clone();
    dc.on_close(Box::new(move || {
        let events = events.clone();
        Box::pin(async move {
            let _ = events.send(TransportEvent::DataChannelClose);
        })
    }));

    let events = tx.clone();
    dc.on_error(Box::new(move |err| {
        let events = events.clone();
        Box::pin(async move {
            let _ = events.send(TransportEvent::DataChannelError(err.to_string()));
        })
    }));
}

// ── Connection ─────────────────────────────────────────────────

struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    channel: ChannelSlot,
}

fn transport_err(e: webrtc::Error) -> TransportError {
    TransportError::new(e.to_string())
}

fn to_rtc(desc: SessionDescription) -> TransportResult<RTCSessionDescription> {
    let desc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(TransportError::new("rollback descriptions are not supported"));
        }
    };
    desc.map_err(transport_err)
}

fn from_rtc(desc: RTCSessionDescription) -> TransportResult<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => return Err(TransportError::new(format!("unexpected sdp type {other}"))),
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn create_offer(&self) -> TransportResult<SessionDescription> {
        from_rtc(self.pc.create_offer(None).await.map_err(transport_err)?)
    }

    async fn create_answer(&self) -> TransportResult<SessionDescription> {
        from_rtc(self.pc.create_answer(None).await.map_err(transport_err)?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> TransportResult<()> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(transport_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> TransportResult<()> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(transport_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportResult<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(transport_err)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc
            .local_description()
            .await
            .and_then(|desc| from_rtc(desc).ok())
    }

    async fn send(&self, text: String) -> TransportResult<()> {
        let dc = self.channel.lock().clone();
        let dc = dc.ok_or_else(|| TransportError::new("data channel not open"))?;
        dc.send_text(text).await.map(|_| ()).map_err(transport_err)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!(error = %e, "error closing peer connection");
        }
    }
}
