//! Scriptable engine double used by the test suite.
//!
//! Records every operation the state machine performs and lets a test inject
//! [`EngineEvent`]s, so handshake sequences can run without ICE or sockets.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    DataChannel, EngineConnectionState, EngineEvent, EngineFactory, IceCandidate, MediaKind,
    PeerEngine, SdpKind, SessionDescription, TransceiverDirection,
};
use crate::error::SignalError;

/// In-memory data channel that records sent payloads.
pub struct MockDataChannel {
    label: String,
    sent: Mutex<Vec<Bytes>>,
}

impl MockDataChannel {
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send(&self, payload: Bytes) -> Result<(), SignalError> {
        self.sent.lock().push(payload);
        Ok(())
    }
}

pub struct MockEngine {
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
    state: Mutex<EngineConnectionState>,
    remote_description: Mutex<Option<SessionDescription>>,
    applied_candidates: Mutex<Vec<IceCandidate>>,
    transceivers: Mutex<Vec<(MediaKind, TransceiverDirection)>>,
    stable: AtomicBool,
    close_calls: AtomicUsize,
    /// Report `Connected` as soon as a remote description lands, which is
    /// enough to drive a handshake to completion without ICE.
    connect_on_remote_description: bool,
    live_gauge: Arc<AtomicUsize>,
}

impl MockEngine {
    fn new(connect_on_remote_description: bool, live_gauge: Arc<AtomicUsize>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            state: Mutex::new(EngineConnectionState::New),
            remote_description: Mutex::new(None),
            applied_candidates: Mutex::new(Vec::new()),
            transceivers: Mutex::new(Vec::new()),
            stable: AtomicBool::new(true),
            close_calls: AtomicUsize::new(0),
            connect_on_remote_description,
            live_gauge,
        }
    }

    /// Inject an event as if the engine had raised it.
    pub fn push_event(&self, event: EngineEvent) {
        if let EngineEvent::ConnectionState(state) = &event {
            *self.state.lock() = *state;
        }
        let _ = self.events_tx.send(event);
    }

    pub fn set_stable(&self, stable: bool) {
        self.stable.store(stable, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote_description.lock().clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.applied_candidates.lock().clone()
    }

    pub fn transceivers(&self) -> Vec<(MediaKind, TransceiverDirection)> {
        self.transceivers.lock().clone()
    }
}

#[async_trait]
impl PeerEngine for MockEngine {
    async fn create_offer(&self) -> Result<SessionDescription, SignalError> {
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: "v=0\r\ns=mock offer\r\n".to_string(),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, SignalError> {
        if self.remote_description.lock().is_none() {
            return Err(SignalError::Negotiation(
                "answer requested without a remote offer".into(),
            ));
        }
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: "v=0\r\ns=mock answer\r\n".to_string(),
        })
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), SignalError> {
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SignalError> {
        *self.remote_description.lock() = Some(desc);
        if self.connect_on_remote_description {
            self.push_event(EngineEvent::ConnectionState(
                EngineConnectionState::Connected,
            ));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SignalError> {
        if self.remote_description.lock().is_none() {
            return Err(SignalError::Negotiation(
                "candidate applied before remote description".into(),
            ));
        }
        self.applied_candidates.lock().push(candidate);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, SignalError> {
        Ok(Arc::new(MockDataChannel {
            label: label.to_string(),
            sent: Mutex::new(Vec::new()),
        }))
    }

    async fn add_transceiver(
        &self,
        kind: MediaKind,
        direction: TransceiverDirection,
    ) -> Result<(), SignalError> {
        self.transceivers.lock().push((kind, direction));
        Ok(())
    }

    fn signaling_stable(&self) -> bool {
        self.stable.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> EngineConnectionState {
        *self.state.lock()
    }

    async fn close(&self) -> Result<(), SignalError> {
        if self.close_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.live_gauge.fetch_sub(1, Ordering::SeqCst);
            self.push_event(EngineEvent::ConnectionState(EngineConnectionState::Closed));
        }
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events_rx.lock().take()
    }
}

/// Factory that tracks every engine it built and whether two handles were
/// ever live at once.
pub struct MockEngineFactory {
    engines: Mutex<Vec<Arc<MockEngine>>>,
    live_gauge: Arc<AtomicUsize>,
    overlap_detected: AtomicBool,
    connect_on_remote_description: bool,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::with_auto_connect(true)
    }

    pub fn with_auto_connect(connect_on_remote_description: bool) -> Self {
        Self {
            engines: Mutex::new(Vec::new()),
            live_gauge: Arc::new(AtomicUsize::new(0)),
            overlap_detected: AtomicBool::new(false),
            connect_on_remote_description,
        }
    }

    pub fn engines(&self) -> Vec<Arc<MockEngine>> {
        self.engines.lock().clone()
    }

    pub fn built_count(&self) -> usize {
        self.engines.lock().len()
    }

    pub fn live_count(&self) -> usize {
        self.live_gauge.load(Ordering::SeqCst)
    }

    /// True if a second engine was ever built while another was still live.
    pub fn saw_overlapping_handles(&self) -> bool {
        self.overlap_detected.load(Ordering::SeqCst)
    }
}

impl Default for MockEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    async fn build(&self) -> Result<Arc<dyn PeerEngine>, SignalError> {
        if self.live_gauge.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlap_detected.store(true, Ordering::SeqCst);
        }
        let engine = Arc::new(MockEngine::new(
            self.connect_on_remote_description,
            self.live_gauge.clone(),
        ));
        self.engines.lock().push(engine.clone());
        Ok(engine)
    }
}
