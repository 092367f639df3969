//! Peer-to-peer WebRTC connections negotiated through a stateless HTTP
//! mailbox relay.
//!
//! Two endpoints that cannot address each other directly exchange a small
//! handshake vocabulary (`connect`, `ok`, `offer`, `answer`, `candidate`)
//! through per-address mailboxes on a dumb HTTP relay, then hand the session
//! to a peer-connection engine for the actual media and data transport.
//!
//! The moving parts, bottom up:
//!
//! * [`protocol::SignalMessage`] — the tolerant wire envelope;
//! * [`relay::MailboxClient`] — blocking PUT and polling GET against the
//!   relay;
//! * [`signaling::SignalChannel`] — a call/listen handshake that binds a
//!   mailbox pair, plus a background poll loop feeding an ordered queue;
//! * [`engine`] — the capability boundary over the peer-connection engine,
//!   with a production `webrtc` adapter and an in-tree mock;
//! * [`connection::Connector`] — the state machine driving invitation,
//!   negotiation, the connected session, teardown, and keep-alive.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mailcall::{Connector, ConnectorConfig, MailboxClient, RelayConfig, WebRtcEngineFactory};
//!
//! # async fn run() -> Result<(), mailcall::SignalError> {
//! let relay = MailboxClient::new(&RelayConfig::new("http://relay.example:3000"))?;
//! let config = ConnectorConfig::builder().local_id("studio").build()?;
//! let factory = Arc::new(WebRtcEngineFactory::new(config.ice_servers.clone()));
//! let connector = Connector::new(relay, config, factory);
//! connector.initiate("front-desk").await?;
//! connector.send_text("hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod signaling;

pub use config::{ConnectorConfig, ConnectorConfigBuilder, IceServer, RelayConfig};
pub use connection::{
    ConnectionProfile, ConnectionState, Connector, DataChannelOnly, MediaReceiver, MediaSender,
    SendReceive,
};
pub use engine::{
    DataChannel, EngineConnectionState, EngineEvent, EngineFactory, IceCandidate, MediaKind,
    PeerEngine, RemoteTrack, SdpKind, SessionDescription, TransceiverDirection,
    WebRtcEngineFactory,
};
pub use error::SignalError;
pub use protocol::{SignalKind, SignalMessage};
pub use relay::MailboxClient;
pub use signaling::SignalChannel;

#[cfg(test)]
mod tests;
