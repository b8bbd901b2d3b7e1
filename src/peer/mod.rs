pub mod connection;
pub mod ice;
pub mod state;
pub mod types;

#[cfg(test)]
pub mod fake;

pub use connection::{
    MediaTransport, PeerContext, PeerEvent, PeerEventSink, PeerFactory, WebRtcFactory,
};
pub use state::NegotiationState;
pub use types::{IceCandidate, PeerState, Role, ServerConfig, SessionDescription, SignalingState};
