//! # rtcmesh-mesh
//!
//! Application-level peer mesh over negotiated point-to-point channels.
//!
//! Peers find each other through a signaling server, negotiate a direct
//! data channel (offer/answer plus ICE candidates), and fall back to relaying
//! through the signaling server when negotiation stalls. On top of the
//! channels sit request/response RPC, first-success broadcast and topic
//! pub/sub.
//!
pub mod channel;
pub mod client;
pub mod correlation;
pub mod fallback;
pub mod mock;
pub mod negotiation;
pub mod peer;
pub mod race;
pub mod signaling;
pub mod transport;
#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use channel::{Channel, ChannelHandle};
pub use client::{MeshClient, MeshEvent, MeshOptions};
pub use correlation::CorrelationRegistry;
pub use fallback::FallbackChannel;
pub use negotiation::{ChannelEvent, ChannelOptions, NegotiationChannel, NegotiationState, SdpTransformer};
pub use peer::{InboundRequest, Peer, PeerEvent, PeerOptions, Responder};
pub use race::{all_successes, race_to_success};
pub use signaling::{SignalingEvent, SignalingHandle};
pub use transport::{ConnectionOptions, PeerConnection, PeerConnectionFactory, RelayOnlyFactory, TransportEvent};
