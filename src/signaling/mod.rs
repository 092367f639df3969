//! Logical signaling links built on top of relay mailboxes.

mod channel;

pub(crate) use channel::ephemeral_mailbox;
pub use channel::SignalChannel;
