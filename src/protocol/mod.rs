//! Wire format shared with the mailbox relay.

mod message;

pub use message::{SignalKind, SignalMessage};
