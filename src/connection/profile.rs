use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::{DataChannel, MediaKind, PeerEngine, RemoteTrack, TransceiverDirection};
use crate::error::SignalError;

/// What one endpoint contributes to a connection: which transceivers it
/// declares before negotiation, whether it creates the data channel, and
/// where remote tracks go.
///
/// Variants are picked by value at construction; both sides of a call may
/// run different profiles.
#[async_trait]
pub trait ConnectionProfile: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare a freshly built engine handle. Returns the data channel if
    /// this profile creates one locally.
    async fn apply(
        &self,
        engine: &dyn PeerEngine,
    ) -> Result<Option<Arc<dyn DataChannel>>, SignalError>;

    /// Called for every track the remote announces.
    fn on_track(&self, track: RemoteTrack) {
        tracing::debug!(target = "connector", ?track, "remote track ignored by profile");
    }
}

/// Pure data-channel endpoint; no media.
pub struct DataChannelOnly {
    label: String,
}

impl DataChannelOnly {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl ConnectionProfile for DataChannelOnly {
    fn name(&self) -> &str {
        "data-channel"
    }

    async fn apply(
        &self,
        engine: &dyn PeerEngine,
    ) -> Result<Option<Arc<dyn DataChannel>>, SignalError> {
        engine.create_data_channel(&self.label).await.map(Some)
    }
}

/// Sends media to the remote, optionally alongside a data channel.
pub struct MediaSender {
    kinds: Vec<MediaKind>,
    data_channel_label: Option<String>,
}

impl MediaSender {
    pub fn new(kinds: Vec<MediaKind>) -> Self {
        Self {
            kinds,
            data_channel_label: None,
        }
    }

    pub fn with_data_channel(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = Some(label.into());
        self
    }
}

#[async_trait]
impl ConnectionProfile for MediaSender {
    fn name(&self) -> &str {
        "media-sender"
    }

    async fn apply(
        &self,
        engine: &dyn PeerEngine,
    ) -> Result<Option<Arc<dyn DataChannel>>, SignalError> {
        for kind in &self.kinds {
            engine
                .add_transceiver(*kind, TransceiverDirection::SendOnly)
                .await?;
        }
        match &self.data_channel_label {
            Some(label) => engine.create_data_channel(label).await.map(Some),
            None => Ok(None),
        }
    }

    fn on_track(&self, track: RemoteTrack) {
        // A send-only endpoint should never be offered media.
        tracing::warn!(target = "connector", ?track, "unexpected remote track");
    }
}

/// Receives media from the remote, optionally alongside a data channel.
/// Remote tracks are forwarded to the receiver handed out at construction.
pub struct MediaReceiver {
    kinds: Vec<MediaKind>,
    data_channel_label: Option<String>,
    track_tx: mpsc::UnboundedSender<RemoteTrack>,
}

impl MediaReceiver {
    pub fn new(kinds: Vec<MediaKind>) -> (Self, mpsc::UnboundedReceiver<RemoteTrack>) {
        let (track_tx, track_rx) = mpsc::unbounded_channel();
        (
            Self {
                kinds,
                data_channel_label: None,
                track_tx,
            },
            track_rx,
        )
    }

    pub fn with_data_channel(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = Some(label.into());
        self
    }
}

#[async_trait]
impl ConnectionProfile for MediaReceiver {
    fn name(&self) -> &str {
        "media-receiver"
    }

    async fn apply(
        &self,
        engine: &dyn PeerEngine,
    ) -> Result<Option<Arc<dyn DataChannel>>, SignalError> {
        for kind in &self.kinds {
            engine
                .add_transceiver(*kind, TransceiverDirection::RecvOnly)
                .await?;
        }
        match &self.data_channel_label {
            Some(label) => engine.create_data_channel(label).await.map(Some),
            None => Ok(None),
        }
    }

    fn on_track(&self, track: RemoteTrack) {
        tracing::info!(target = "connector", ?track, "remote track added");
        let _ = self.track_tx.send(track);
    }
}

/// Bidirectional media plus a data channel.
pub struct SendReceive {
    kinds: Vec<MediaKind>,
    data_channel_label: String,
    track_tx: mpsc::UnboundedSender<RemoteTrack>,
}

impl SendReceive {
    pub fn new(
        kinds: Vec<MediaKind>,
        data_channel_label: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<RemoteTrack>) {
        let (track_tx, track_rx) = mpsc::unbounded_channel();
        (
            Self {
                kinds,
                data_channel_label: data_channel_label.into(),
                track_tx,
            },
            track_rx,
        )
    }
}

#[async_trait]
impl ConnectionProfile for SendReceive {
    fn name(&self) -> &str {
        "send-receive"
    }

    async fn apply(
        &self,
        engine: &dyn PeerEngine,
    ) -> Result<Option<Arc<dyn DataChannel>>, SignalError> {
        for kind in &self.kinds {
            engine
                .add_transceiver(*kind, TransceiverDirection::SendRecv)
                .await?;
        }
        engine
            .create_data_channel(&self.data_channel_label)
            .await
            .map(Some)
    }

    fn on_track(&self, track: RemoteTrack) {
        let _ = self.track_tx.send(track);
    }
}
