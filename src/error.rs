use thiserror::Error;

/// Errors surfaced by the signaling and connection layers.
///
/// Relay-level failures (`RelayUnreachable`, `HandshakeTimeout`) are
/// recoverable and retried by the callers that own the retry policy; engine
/// and negotiation errors terminate the current attempt.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The mailbox relay could not be reached at the transport level
    /// (DNS, connect, or persistent 5xx). Distinct from a silent peer.
    #[error("mailbox relay unreachable: {0}")]
    RelayUnreachable(String),

    /// The relay answered but the awaited message never arrived before the
    /// deadline.
    #[error("timed out waiting for {0}")]
    HandshakeTimeout(String),

    /// The remote replied to an invitation with something other than an
    /// acceptance.
    #[error("call rejected: {0}")]
    CallRejected(String),

    /// The peer-connection engine rejected an offer, answer, or description.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The peer-connection engine reported a failure outside negotiation.
    #[error("peer connection engine failure: {0}")]
    Engine(String),

    /// A message could not be interpreted. Consumers drop these; they are
    /// never fatal on a live channel.
    #[error("malformed signaling message: {0}")]
    Malformed(String),

    /// The signal channel or its inbound queue has shut down.
    #[error("signal channel closed")]
    ChannelClosed,

    /// An operation that needs an open data channel ran before one existed.
    #[error("not connected")]
    NotConnected,

    /// A new negotiation was requested while a previous engine handle was
    /// still live and non-terminal.
    #[error("a connection attempt is already in progress")]
    AttemptInProgress,

    /// Empty or otherwise unusable mailbox address.
    #[error("invalid mailbox address: {0:?}")]
    InvalidMailbox(String),

    /// The owning attempt was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Construction-time configuration problem.
    #[error("setup failed: {0}")]
    Setup(String),
}
