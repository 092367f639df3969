use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use super::profile::{ConnectionProfile, DataChannelOnly};
use super::ConnectionState;
use crate::config::ConnectorConfig;
use crate::engine::{
    DataChannel, EngineConnectionState, EngineEvent, EngineFactory, IceCandidate, PeerEngine,
};
use crate::error::SignalError;
use crate::protocol::{SignalKind, SignalMessage};
use crate::relay::MailboxClient;
use crate::signaling::{ephemeral_mailbox, SignalChannel};

type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// Why a connected session ended.
enum SessionEnd {
    /// The engine reported failure, disconnection, or closure.
    EngineDown,
    /// The data channel or the signal channel went away.
    ChannelClosed,
    Cancelled,
}

struct ConnectorInner {
    config: ConnectorConfig,
    relay: MailboxClient,
    factory: Arc<dyn EngineFactory>,
    profile: Arc<dyn ConnectionProfile>,
    state_tx: watch::Sender<ConnectionState>,
    payload_tx: mpsc::UnboundedSender<Option<Bytes>>,
    payload_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Option<Bytes>>>>,
    engine: AsyncMutex<Option<Arc<dyn PeerEngine>>>,
    data_channel: AsyncMutex<Option<Arc<dyn DataChannel>>>,
    channel_open: AtomicBool,
    cancel: CancellationToken,
}

/// Orchestrates one logical connection: invitation or accept handshake over
/// the mailbox relay, offer/answer negotiation, the connected session, and
/// teardown with optional keep-alive reconnection.
///
/// The attempt task is the only writer of connection state; engine callbacks
/// and relay traffic reach it as messages. At most one engine handle is live
/// per connector at any time.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

impl Connector {
    /// Connector with the default data-channel-only profile, labelled per
    /// the config.
    pub fn new(relay: MailboxClient, config: ConnectorConfig, factory: Arc<dyn EngineFactory>) -> Self {
        let profile = Arc::new(DataChannelOnly::new(config.data_channel_label.clone()));
        Self::with_profile(relay, config, factory, profile)
    }

    pub fn with_profile(
        relay: MailboxClient,
        config: ConnectorConfig,
        factory: Arc<dyn EngineFactory>,
        profile: Arc<dyn ConnectionProfile>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (payload_tx, payload_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ConnectorInner {
                config,
                relay,
                factory,
                profile,
                state_tx,
                payload_tx,
                payload_rx: parking_lot::Mutex::new(Some(payload_rx)),
                engine: AsyncMutex::new(None),
                data_channel: AsyncMutex::new(None),
                channel_open: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// The inbound payload stream: `Some(bytes)` per data-channel message,
    /// `None` when the session closes. Yields `Some` exactly once.
    pub fn messages(&self) -> Result<mpsc::UnboundedReceiver<Option<Bytes>>, SignalError> {
        self.inner
            .payload_rx
            .lock()
            .take()
            .ok_or_else(|| SignalError::Setup("payload stream already taken".into()))
    }

    pub fn data_channel_open(&self) -> bool {
        self.inner.channel_open.load(Ordering::SeqCst)
    }

    /// Send bytes over the data channel.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), SignalError> {
        let channel = self.inner.data_channel.lock().await.clone();
        match channel {
            Some(channel) => channel.send(payload.into()).await,
            None => Err(SignalError::NotConnected),
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<(), SignalError> {
        self.send(Bytes::from(text.to_owned())).await
    }

    /// Dial `remote_id` and drive the attempt to a connected session.
    ///
    /// Returns once the engine reports connected; the session then runs on a
    /// background task until it ends (and, with keep-alive, re-dials after
    /// the cooldown). On failure every partial resource is released and the
    /// state returns to `Idle` (handshake failures) or `Failed` (negotiation
    /// and engine errors).
    pub async fn initiate(&self, remote_id: &str) -> Result<(), SignalError> {
        match self.run_initiate(remote_id).await {
            Ok((channel, engine, events)) => {
                let connector = self.clone();
                let remote = remote_id.to_string();
                tokio::spawn(async move {
                    connector
                        .run_session(channel, engine, events, Some(remote))
                        .await;
                });
                Ok(())
            }
            Err(err) => {
                self.fail_attempt(&err).await;
                Err(err)
            }
        }
    }

    /// Accept calls on the well-known `local_id` mailbox, one session at a
    /// time, forever. Listening resumes when a session ends; the loop exits
    /// only on cancellation (via [`Connector::shutdown`]) or a setup error.
    pub async fn listen(&self) -> Result<(), SignalError> {
        loop {
            if self.inner.cancel.is_cancelled() {
                return Ok(());
            }
            self.set_state(ConnectionState::Idle);
            let mut channel = match SignalChannel::listen(
                &self.inner.relay,
                &self.inner.config.local_id,
                self.inner.cancel.child_token(),
            )
            .await
            {
                Ok(channel) => channel,
                Err(SignalError::Cancelled) => return Ok(()),
                Err(err) => return Err(err),
            };

            match self.respond(&mut channel).await {
                Ok((engine, mut events)) => {
                    let end = self.connected_phase(&mut channel, &engine, &mut events).await;
                    channel.close();
                    drop(channel);
                    self.hangup().await;
                    if matches!(end, SessionEnd::Cancelled) {
                        return Ok(());
                    }
                }
                Err(SignalError::Cancelled) => {
                    self.fail_attempt(&SignalError::Cancelled).await;
                    return Ok(());
                }
                Err(err) => {
                    tracing::debug!(
                        target = "connector",
                        error = %err,
                        "accepted call never connected, listening again"
                    );
                    self.fail_attempt(&err).await;
                }
            }

            tokio::select! {
                _ = self.inner.cancel.cancelled() => return Ok(()),
                _ = sleep(self.inner.config.reconnect_cooldown) => {}
            }
        }
    }

    /// Release the engine handle, its tracks and data channel, exactly once.
    /// Safe to call at any time and from any state.
    pub async fn hangup(&self) {
        let engine = self.inner.engine.lock().await.take();
        let Some(engine) = engine else {
            return;
        };
        let previous = self.current_state();
        tracing::info!(target = "connector", ?previous, "hanging up");
        if let Err(err) = engine.close().await {
            tracing::warn!(target = "connector", error = %err, "engine close failed");
        }
        *self.inner.data_channel.lock().await = None;
        self.inner.channel_open.store(false, Ordering::SeqCst);
        let _ = self.inner.payload_tx.send(None);
        self.set_state(ConnectionState::Closed);
    }

    /// Cancel listening, retries, and keep-alive, then hang up.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.hangup().await;
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.inner.state_tx.send_replace(next);
        if previous != next {
            tracing::debug!(target = "connector", ?previous, ?next, "state transition");
        }
    }

    /// Invitation loop: fresh ephemeral mailbox per round, `connect` to the
    /// remote well-known mailbox, then await the `ok` switch. Relay failures
    /// and silent rounds retry until the configured deadline (if any).
    async fn invite(&self, remote_id: &str) -> Result<SignalChannel, SignalError> {
        let config = &self.inner.config;
        let cutoff = config.invite_deadline.map(|deadline| Instant::now() + deadline);
        let mut relay_reached = false;
        let mut first = true;

        loop {
            if self.inner.cancel.is_cancelled() {
                return Err(SignalError::Cancelled);
            }
            if let Some(cutoff) = cutoff {
                if Instant::now() >= cutoff {
                    return Err(if relay_reached {
                        SignalError::HandshakeTimeout(format!("invitation to {remote_id}"))
                    } else {
                        SignalError::RelayUnreachable(format!(
                            "relay never answered while inviting {remote_id}"
                        ))
                    });
                }
            }
            if !first {
                sleep(config.invite_retry).await;
            }
            first = false;

            let local_mailbox = ephemeral_mailbox(&config.local_id);
            self.set_state(ConnectionState::Inviting);
            if let Err(err) = self
                .inner
                .relay
                .put(remote_id, &SignalMessage::connect(local_mailbox.clone()))
                .await
            {
                tracing::debug!(target = "connector", error = %err, "invitation not delivered");
                continue;
            }
            relay_reached = true;

            self.set_state(ConnectionState::AwaitingAccept);
            let reply = match self
                .inner
                .relay
                .get(&local_mailbox, config.accept_timeout)
                .await
            {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::debug!(target = "connector", error = %err, "no acceptance this round");
                    continue;
                }
            };
            if reply.kind != SignalKind::Ok {
                tracing::debug!(target = "connector", msg = %reply, "unexpected invitation reply");
                continue;
            }
            let Some(remote_mailbox) = reply
                .switch_channel
                .or(reply.from)
                .filter(|mailbox| !mailbox.is_empty())
            else {
                tracing::debug!(target = "connector", "acceptance named no reply mailbox");
                continue;
            };
            tracing::info!(
                target = "connector",
                remote = %remote_mailbox,
                "call accepted, switching channel"
            );
            return Ok(SignalChannel::bind(
                self.inner.relay.clone(),
                local_mailbox,
                remote_mailbox,
            ));
        }
    }

    async fn run_initiate(
        &self,
        remote_id: &str,
    ) -> Result<(SignalChannel, Arc<dyn PeerEngine>, EngineEvents), SignalError> {
        let mut channel = self.invite(remote_id).await?;

        self.set_state(ConnectionState::Negotiating);
        let (engine, mut events) = self.install_engine().await?;
        if let Some(data_channel) = self.inner.profile.apply(engine.as_ref()).await? {
            *self.inner.data_channel.lock().await = Some(data_channel);
        }
        let offer = engine.create_offer().await?;
        engine.set_local_description(offer.clone()).await?;
        channel.send(&SignalMessage::from_description(&offer)).await?;

        let mut pending = Vec::new();
        self.drive_to_connected(&mut channel, &engine, &mut events, &mut pending, false)
            .await?;
        Ok((channel, engine, events))
    }

    /// Listener-side negotiation on a freshly switched channel: wait for the
    /// offer (buffering early candidates), answer it, then drive to
    /// connected. The engine is built only once the offer is in hand.
    async fn respond(
        &self,
        channel: &mut SignalChannel,
    ) -> Result<(Arc<dyn PeerEngine>, EngineEvents), SignalError> {
        self.set_state(ConnectionState::Negotiating);
        let config = &self.inner.config;
        let mut pending: Vec<IceCandidate> = Vec::new();

        let idle = sleep(config.idle_timeout);
        tokio::pin!(idle);
        let offer = loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => return Err(SignalError::Cancelled),
                _ = &mut idle => {
                    return Err(SignalError::HandshakeTimeout(
                        "offer on the switched channel".into(),
                    ));
                }
                message = channel.recv() => {
                    let Some(message) = message else {
                        return Err(SignalError::ChannelClosed);
                    };
                    idle.as_mut().reset(Instant::now() + config.idle_timeout);
                    match message.kind {
                        SignalKind::Offer => match message.to_description() {
                            Ok(offer) => break offer,
                            Err(err) => {
                                tracing::warn!(target = "connector", error = %err, "dropping bad offer");
                            }
                        },
                        SignalKind::Candidate => match message.to_candidate() {
                            Ok(candidate) => pending.push(candidate),
                            Err(err) => {
                                tracing::warn!(target = "connector", error = %err, "dropping bad candidate");
                            }
                        },
                        _ => {
                            tracing::debug!(target = "connector", msg = %message, "ignoring message");
                        }
                    }
                }
            }
        };

        let (engine, mut events) = self.install_engine().await?;
        if let Some(data_channel) = self.inner.profile.apply(engine.as_ref()).await? {
            *self.inner.data_channel.lock().await = Some(data_channel);
        }
        engine.set_remote_description(offer).await?;
        self.flush_pending(&engine, &mut pending).await;
        let answer = engine.create_answer().await?;
        engine.set_local_description(answer.clone()).await?;
        channel.send(&SignalMessage::from_description(&answer)).await?;

        self.drive_to_connected(channel, &engine, &mut events, &mut pending, true)
            .await?;
        Ok((engine, events))
    }

    /// Build and install a fresh engine handle. Refuses while a previous
    /// handle is still live and non-terminal.
    async fn install_engine(
        &self,
    ) -> Result<(Arc<dyn PeerEngine>, EngineEvents), SignalError> {
        let mut slot = self.inner.engine.lock().await;
        if let Some(existing) = slot.take() {
            if !existing.connection_state().is_terminal() {
                *slot = Some(existing);
                return Err(SignalError::AttemptInProgress);
            }
            let _ = existing.close().await;
        }
        let engine = self.inner.factory.build().await?;
        let events = engine
            .take_events()
            .ok_or_else(|| SignalError::Engine("engine event stream unavailable".into()))?;
        *slot = Some(engine.clone());
        Ok((engine, events))
    }

    /// Apply buffered candidates in receipt order. Failures are logged; a
    /// rejected candidate does not doom the attempt.
    async fn flush_pending(&self, engine: &Arc<dyn PeerEngine>, pending: &mut Vec<IceCandidate>) {
        for candidate in pending.drain(..) {
            if let Err(err) = engine.add_ice_candidate(candidate).await {
                tracing::warn!(target = "connector", error = %err, "buffered candidate rejected");
            }
        }
    }

    /// Pump the signal channel and the engine event stream until the engine
    /// reports connected, bounded by `connect_deadline`.
    async fn drive_to_connected(
        &self,
        channel: &mut SignalChannel,
        engine: &Arc<dyn PeerEngine>,
        events: &mut EngineEvents,
        pending: &mut Vec<IceCandidate>,
        mut remote_set: bool,
    ) -> Result<(), SignalError> {
        let deadline = sleep(self.inner.config.connect_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => return Err(SignalError::Cancelled),
                _ = &mut deadline => {
                    return Err(SignalError::HandshakeTimeout(
                        "connection establishment".into(),
                    ));
                }
                message = channel.recv() => {
                    let Some(message) = message else {
                        return Err(SignalError::ChannelClosed);
                    };
                    match message.kind {
                        SignalKind::Answer if !remote_set => match message.to_description() {
                            Ok(answer) => {
                                engine.set_remote_description(answer).await?;
                                remote_set = true;
                                self.flush_pending(engine, pending).await;
                            }
                            Err(err) => {
                                tracing::warn!(target = "connector", error = %err, "dropping bad answer");
                            }
                        },
                        SignalKind::Candidate => match message.to_candidate() {
                            Ok(candidate) => {
                                if remote_set {
                                    if let Err(err) = engine.add_ice_candidate(candidate).await {
                                        tracing::warn!(
                                            target = "connector",
                                            error = %err,
                                            "candidate rejected"
                                        );
                                    }
                                } else {
                                    pending.push(candidate);
                                }
                            }
                            Err(err) => {
                                tracing::warn!(target = "connector", error = %err, "dropping bad candidate");
                            }
                        },
                        _ => {
                            tracing::debug!(target = "connector", msg = %message, "ignoring message");
                        }
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return Err(SignalError::Engine("engine event stream ended".into()));
                    };
                    match event {
                        EngineEvent::IceCandidate(candidate) => {
                            if let Err(err) = channel.send(&SignalMessage::candidate(&candidate)).await {
                                tracing::warn!(
                                    target = "connector",
                                    error = %err,
                                    "local candidate not delivered"
                                );
                            }
                        }
                        EngineEvent::ConnectionState(EngineConnectionState::Connected) => {
                            debug_assert!(pending.is_empty() || !remote_set);
                            self.set_state(ConnectionState::Connected);
                            tracing::info!(target = "connector", "peer connection established");
                            return Ok(());
                        }
                        EngineEvent::ConnectionState(EngineConnectionState::Failed) => {
                            return Err(SignalError::Engine(
                                "engine failed during negotiation".into(),
                            ));
                        }
                        EngineEvent::ConnectionState(state) => {
                            tracing::trace!(target = "connector", ?state, "engine state");
                        }
                        EngineEvent::DataChannel(data_channel) => {
                            *self.inner.data_channel.lock().await = Some(data_channel);
                        }
                        EngineEvent::ChannelOpen => {
                            self.inner.channel_open.store(true, Ordering::SeqCst);
                        }
                        EngineEvent::ChannelClosed => {
                            tracing::debug!(target = "connector", "data channel closed mid-negotiation");
                        }
                        EngineEvent::ChannelMessage(payload) => {
                            let _ = self.inner.payload_tx.send(Some(payload));
                        }
                        EngineEvent::TrackAdded(track) => self.inner.profile.on_track(track),
                        EngineEvent::NegotiationNeeded => {
                            // An offer/answer round is already in flight.
                            tracing::trace!(target = "connector", "negotiation-needed dropped");
                        }
                    }
                }
            }
        }
    }

    /// The established session: forward payloads, exchange late candidates,
    /// renegotiate when the engine asks for it, and end on failure.
    async fn connected_phase(
        &self,
        channel: &mut SignalChannel,
        engine: &Arc<dyn PeerEngine>,
        events: &mut EngineEvents,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => return SessionEnd::Cancelled,
                message = channel.recv() => {
                    let Some(message) = message else {
                        return SessionEnd::ChannelClosed;
                    };
                    self.handle_connected_signal(channel, engine, message).await;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return SessionEnd::EngineDown;
                    };
                    match event {
                        EngineEvent::IceCandidate(candidate) => {
                            if let Err(err) = channel.send(&SignalMessage::candidate(&candidate)).await {
                                tracing::warn!(
                                    target = "connector",
                                    error = %err,
                                    "local candidate not delivered"
                                );
                            }
                        }
                        EngineEvent::NegotiationNeeded => {
                            self.renegotiate(channel, engine).await;
                        }
                        EngineEvent::ConnectionState(EngineConnectionState::Disconnected) => {
                            self.set_state(ConnectionState::Disconnected);
                            return SessionEnd::EngineDown;
                        }
                        EngineEvent::ConnectionState(EngineConnectionState::Failed) => {
                            self.set_state(ConnectionState::Failed);
                            return SessionEnd::EngineDown;
                        }
                        EngineEvent::ConnectionState(EngineConnectionState::Closed) => {
                            return SessionEnd::EngineDown;
                        }
                        EngineEvent::ConnectionState(state) => {
                            tracing::trace!(target = "connector", ?state, "engine state");
                        }
                        EngineEvent::DataChannel(data_channel) => {
                            *self.inner.data_channel.lock().await = Some(data_channel);
                        }
                        EngineEvent::ChannelOpen => {
                            self.inner.channel_open.store(true, Ordering::SeqCst);
                            tracing::debug!(target = "connector", "data channel open");
                        }
                        EngineEvent::ChannelClosed => {
                            return SessionEnd::ChannelClosed;
                        }
                        EngineEvent::ChannelMessage(payload) => {
                            let _ = self.inner.payload_tx.send(Some(payload));
                        }
                        EngineEvent::TrackAdded(track) => self.inner.profile.on_track(track),
                    }
                }
            }
        }
    }

    async fn handle_connected_signal(
        &self,
        channel: &SignalChannel,
        engine: &Arc<dyn PeerEngine>,
        message: SignalMessage,
    ) {
        match message.kind {
            SignalKind::Candidate => match message.to_candidate() {
                Ok(candidate) => {
                    if let Err(err) = engine.add_ice_candidate(candidate).await {
                        tracing::warn!(target = "connector", error = %err, "late candidate rejected");
                    }
                }
                Err(err) => {
                    tracing::warn!(target = "connector", error = %err, "dropping bad candidate");
                }
            },
            // The remote started a renegotiation on the existing channel.
            SignalKind::Offer => match message.to_description() {
                Ok(offer) => {
                    if let Err(err) = self.answer_renegotiation(channel, engine, offer).await {
                        tracing::warn!(target = "connector", error = %err, "renegotiation answer failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(target = "connector", error = %err, "dropping bad offer");
                }
            },
            SignalKind::Answer => {
                if engine.signaling_stable() {
                    tracing::debug!(target = "connector", "unsolicited answer dropped");
                } else {
                    match message.to_description() {
                        Ok(answer) => {
                            if let Err(err) = engine.set_remote_description(answer).await {
                                tracing::warn!(
                                    target = "connector",
                                    error = %err,
                                    "renegotiation answer rejected"
                                );
                            }
                        }
                        Err(err) => {
                            tracing::warn!(target = "connector", error = %err, "dropping bad answer");
                        }
                    }
                }
            }
            _ => {
                tracing::debug!(target = "connector", msg = %message, "ignoring message");
            }
        }
    }

    /// Re-run the offer step on the existing channel. Skipped unless the
    /// engine's signaling state is settled.
    async fn renegotiate(&self, channel: &SignalChannel, engine: &Arc<dyn PeerEngine>) {
        if !engine.signaling_stable() {
            tracing::trace!(target = "connector", "negotiation-needed dropped, exchange in flight");
            return;
        }
        let result = async {
            let offer = engine.create_offer().await?;
            engine.set_local_description(offer.clone()).await?;
            channel.send(&SignalMessage::from_description(&offer)).await
        }
        .await;
        match result {
            Ok(()) => tracing::debug!(target = "connector", "renegotiation offer sent"),
            Err(err) => {
                tracing::warn!(target = "connector", error = %err, "renegotiation failed");
            }
        }
    }

    async fn answer_renegotiation(
        &self,
        channel: &SignalChannel,
        engine: &Arc<dyn PeerEngine>,
        offer: crate::engine::SessionDescription,
    ) -> Result<(), SignalError> {
        engine.set_remote_description(offer).await?;
        let answer = engine.create_answer().await?;
        engine.set_local_description(answer.clone()).await?;
        channel.send(&SignalMessage::from_description(&answer)).await
    }

    /// Run one connected session to its end, then hang up and — for callers
    /// with keep-alive — re-dial after the cooldown until a new session is
    /// established or the connector is cancelled.
    async fn run_session(
        &self,
        mut channel: SignalChannel,
        mut engine: Arc<dyn PeerEngine>,
        mut events: EngineEvents,
        reconnect_remote: Option<String>,
    ) {
        loop {
            let end = self.connected_phase(&mut channel, &engine, &mut events).await;
            channel.close();
            self.hangup().await;
            if matches!(end, SessionEnd::Cancelled) {
                return;
            }
            let Some(remote_id) = reconnect_remote.as_deref() else {
                return;
            };
            if !self.inner.config.keep_alive {
                return;
            }

            tracing::info!(
                target = "connector",
                remote = remote_id,
                cooldown_ms = self.inner.config.reconnect_cooldown.as_millis() as u64,
                "keep-alive reconnecting"
            );
            let reconnected = loop {
                tokio::select! {
                    _ = self.inner.cancel.cancelled() => return,
                    _ = sleep(self.inner.config.reconnect_cooldown) => {}
                }
                match self.run_initiate(remote_id).await {
                    Ok(parts) => break parts,
                    Err(SignalError::Cancelled) => return,
                    Err(err) => {
                        self.fail_attempt(&err).await;
                        tracing::debug!(
                            target = "connector",
                            error = %err,
                            "keep-alive attempt failed, retrying"
                        );
                    }
                }
            };
            (channel, engine, events) = reconnected;
        }
    }

    /// Release partial resources after a failed attempt and park the state
    /// machine in the state the failure calls for.
    async fn fail_attempt(&self, err: &SignalError) {
        // A refused second attempt must not touch the live attempt's engine.
        if matches!(err, SignalError::AttemptInProgress) {
            return;
        }
        let engine = self.inner.engine.lock().await.take();
        if let Some(engine) = engine {
            if let Err(close_err) = engine.close().await {
                tracing::warn!(target = "connector", error = %close_err, "engine close failed");
            }
        }
        *self.inner.data_channel.lock().await = None;
        self.inner.channel_open.store(false, Ordering::SeqCst);
        let next = match err {
            SignalError::HandshakeTimeout(_)
            | SignalError::RelayUnreachable(_)
            | SignalError::CallRejected(_) => ConnectionState::Idle,
            SignalError::Cancelled => ConnectionState::Closed,
            _ => ConnectionState::Failed,
        };
        self.set_state(next);
    }
}
