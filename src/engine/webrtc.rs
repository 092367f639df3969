//! [`PeerEngine`] implementation backed by the `webrtc` crate.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::{
    DataChannel, EngineConnectionState, EngineEvent, EngineFactory, IceCandidate, MediaKind,
    PeerEngine, RemoteTrack, SdpKind, SessionDescription, TransceiverDirection,
};
use crate::config::IceServer;
use crate::error::SignalError;

fn engine_error<E: std::fmt::Display>(err: E) -> SignalError {
    SignalError::Engine(err.to_string())
}

fn negotiation_error<E: std::fmt::Display>(err: E) -> SignalError {
    SignalError::Negotiation(err.to_string())
}

fn map_connection_state(state: RTCPeerConnectionState) -> EngineConnectionState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
            EngineConnectionState::New
        }
        RTCPeerConnectionState::Connecting => EngineConnectionState::Connecting,
        RTCPeerConnectionState::Connected => EngineConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => EngineConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => EngineConnectionState::Failed,
        RTCPeerConnectionState::Closed => EngineConnectionState::Closed,
    }
}

fn map_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone(),
            credential: server.credential.clone(),
            ..Default::default()
        })
        .collect()
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription, SignalError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()).map_err(negotiation_error),
        SdpKind::Answer => {
            RTCSessionDescription::answer(desc.sdp.clone()).map_err(negotiation_error)
        }
    }
}

struct WebRtcDataChannel {
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> String {
        self.inner.label().to_string()
    }

    async fn send(&self, payload: Bytes) -> Result<(), SignalError> {
        self.inner
            .send(&payload)
            .await
            .map(|_| ())
            .map_err(engine_error)
    }
}

/// Forward open/close/message callbacks of one data channel into the engine
/// event stream.
fn wire_data_channel(channel: &Arc<RTCDataChannel>, events: mpsc::UnboundedSender<EngineEvent>) {
    let open_events = events.clone();
    channel.on_open(Box::new(move || {
        let events = open_events.clone();
        Box::pin(async move {
            let _ = events.send(EngineEvent::ChannelOpen);
        })
    }));

    let close_events = events.clone();
    channel.on_close(Box::new(move || {
        let events = close_events.clone();
        Box::pin(async move {
            let _ = events.send(EngineEvent::ChannelClosed);
        })
    }));

    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let events = events.clone();
        Box::pin(async move {
            let _ = events.send(EngineEvent::ChannelMessage(message.data));
        })
    }));
}

/// One `RTCPeerConnection` exposed through the [`PeerEngine`] boundary.
pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl WebRtcEngine {
    pub async fn new(ice_servers: &[IceServer]) -> Result<Self, SignalError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(engine_error)?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(engine_error)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: map_ice_servers(ice_servers),
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(engine_error)?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = Self {
            pc,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        };
        engine.register_handlers();
        Ok(engine)
    }

    fn register_handlers(&self) {
        let candidate_events = self.events_tx.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = candidate_events.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(json) => {
                            let _ = events.send(EngineEvent::IceCandidate(IceCandidate {
                                candidate: json.candidate,
                                sdp_mid: json.sdp_mid,
                                sdp_mline_index: json.sdp_mline_index,
                            }));
                        }
                        Err(err) => {
                            tracing::warn!(target = "webrtc", error = %err, "candidate encode failed");
                        }
                    }
                })
            }));

        let state_events = self.events_tx.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let events = state_events.clone();
                Box::pin(async move {
                    tracing::debug!(target = "webrtc", ?state, "connection state change");
                    let _ = events.send(EngineEvent::ConnectionState(map_connection_state(state)));
                })
            }));

        let negotiation_events = self.events_tx.clone();
        self.pc.on_negotiation_needed(Box::new(move || {
            let events = negotiation_events.clone();
            Box::pin(async move {
                let _ = events.send(EngineEvent::NegotiationNeeded);
            })
        }));

        let channel_events = self.events_tx.clone();
        self.pc
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let events = channel_events.clone();
                Box::pin(async move {
                    tracing::debug!(target = "webrtc", label = %channel.label(), "data channel announced");
                    wire_data_channel(&channel, events.clone());
                    let _ = events.send(EngineEvent::DataChannel(Arc::new(WebRtcDataChannel {
                        inner: channel,
                    })));
                })
            }));

        let track_events = self.events_tx.clone();
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    _ => MediaKind::Video,
                };
                let _ = events.send(EngineEvent::TrackAdded(RemoteTrack {
                    kind,
                    id: track.id(),
                }));
            })
        }));
    }
}

#[async_trait]
impl PeerEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription, SignalError> {
        let offer = self.pc.create_offer(None).await.map_err(negotiation_error)?;
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, SignalError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(negotiation_error)?;
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SignalError> {
        let desc = to_rtc_description(&desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(negotiation_error)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SignalError> {
        let desc = to_rtc_description(&desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(negotiation_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SignalError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(negotiation_error)
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, SignalError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let channel = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(engine_error)?;
        wire_data_channel(&channel, self.events_tx.clone());
        Ok(Arc::new(WebRtcDataChannel { inner: channel }))
    }

    async fn add_transceiver(
        &self,
        kind: MediaKind,
        direction: TransceiverDirection,
    ) -> Result<(), SignalError> {
        let codec_type = match kind {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        };
        let direction = match direction {
            TransceiverDirection::SendOnly => RTCRtpTransceiverDirection::Sendonly,
            TransceiverDirection::RecvOnly => RTCRtpTransceiverDirection::Recvonly,
            TransceiverDirection::SendRecv => RTCRtpTransceiverDirection::Sendrecv,
        };
        let init = RTCRtpTransceiverInit {
            direction,
            send_encodings: Vec::new(),
        };
        self.pc
            .add_transceiver_from_kind(codec_type, Some(init))
            .await
            .map(|_| ())
            .map_err(engine_error)
    }

    fn signaling_stable(&self) -> bool {
        self.pc.signaling_state() == RTCSignalingState::Stable
    }

    fn connection_state(&self) -> EngineConnectionState {
        map_connection_state(self.pc.connection_state())
    }

    async fn close(&self) -> Result<(), SignalError> {
        self.pc.close().await.map_err(engine_error)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events_rx.lock().take()
    }
}

/// Builds [`WebRtcEngine`]s for a fixed ICE server set.
pub struct WebRtcEngineFactory {
    ice_servers: Vec<IceServer>,
}

impl WebRtcEngineFactory {
    pub fn new(ice_servers: Vec<IceServer>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    async fn build(&self) -> Result<Arc<dyn PeerEngine>, SignalError> {
        let engine = WebRtcEngine::new(&self.ice_servers).await?;
        Ok(Arc::new(engine))
    }
}
