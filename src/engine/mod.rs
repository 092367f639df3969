//! Capability boundary around the peer-connection engine.
//!
//! Everything above this module speaks in the crate-local types below; the
//! engine's callbacks are re-expressed as an [`EngineEvent`] stream so the
//! connection state machine consumes them on its own task instead of being
//! re-entered from arbitrary engine threads.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SignalError;

pub mod mock;
pub mod webrtc;

pub use mock::{MockEngine, MockEngineFactory};
pub use webrtc::WebRtcEngineFactory;

/// Which half of the offer/answer exchange a description is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description ready to apply or to send over signaling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

/// A proposed network path for direct connectivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendOnly,
    RecvOnly,
    SendRecv,
}

/// A media track announced by the remote peer. Rendering is out of scope;
/// embedders get the identity and pull frames from the engine themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub kind: MediaKind,
    pub id: String,
}

/// Connection state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl EngineConnectionState {
    /// Terminal states allow a fresh engine handle to be installed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineConnectionState::Failed | EngineConnectionState::Closed
        )
    }
}

/// Events the engine surfaces to the connection state machine.
pub enum EngineEvent {
    IceCandidate(IceCandidate),
    ConnectionState(EngineConnectionState),
    NegotiationNeeded,
    DataChannel(Arc<dyn DataChannel>),
    TrackAdded(RemoteTrack),
    ChannelOpen,
    ChannelClosed,
    ChannelMessage(Bytes),
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::IceCandidate(candidate) => {
                f.debug_tuple("IceCandidate").field(candidate).finish()
            }
            EngineEvent::ConnectionState(state) => {
                f.debug_tuple("ConnectionState").field(state).finish()
            }
            EngineEvent::NegotiationNeeded => f.write_str("NegotiationNeeded"),
            EngineEvent::DataChannel(channel) => {
                f.debug_tuple("DataChannel").field(&channel.label()).finish()
            }
            EngineEvent::TrackAdded(track) => f.debug_tuple("TrackAdded").field(track).finish(),
            EngineEvent::ChannelOpen => f.write_str("ChannelOpen"),
            EngineEvent::ChannelClosed => f.write_str("ChannelClosed"),
            EngineEvent::ChannelMessage(payload) => f
                .debug_tuple("ChannelMessage")
                .field(&payload.len())
                .finish(),
        }
    }
}

/// An open data channel between the peers.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    async fn send(&self, payload: Bytes) -> Result<(), SignalError>;
}

/// The asynchronous operations this crate needs from a peer-connection
/// engine. Every operation may fail independently.
#[async_trait]
pub trait PeerEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, SignalError>;
    async fn create_answer(&self) -> Result<SessionDescription, SignalError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SignalError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SignalError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SignalError>;
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, SignalError>;
    async fn add_transceiver(
        &self,
        kind: MediaKind,
        direction: TransceiverDirection,
    ) -> Result<(), SignalError>;

    /// Whether the signaling exchange is settled; renegotiation must not
    /// start while an offer/answer round is in flight.
    fn signaling_stable(&self) -> bool;

    fn connection_state(&self) -> EngineConnectionState;

    /// Release every engine resource. Safe to call more than once.
    async fn close(&self) -> Result<(), SignalError>;

    /// Hand over the event stream. Yields `Some` exactly once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>>;
}

/// Builds one fresh engine handle per connection attempt.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self) -> Result<Arc<dyn PeerEngine>, SignalError>;
}
