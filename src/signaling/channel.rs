use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::SignalError;
use crate::protocol::{SignalKind, SignalMessage};
use crate::relay::MailboxClient;

/// Window for each blocking GET issued by the poll loop. Expiry is the
/// long-poll tick, not a failure.
const POLL_WINDOW: Duration = Duration::from_secs(10);

/// Pause before retrying after the relay stopped answering.
const RELAY_BACKOFF: Duration = Duration::from_secs(1);

/// Mint a fresh single-attempt mailbox address.
pub(crate) fn ephemeral_mailbox(local_id: &str) -> String {
    format!("{local_id}_{}", Uuid::new_v4())
}

/// A bidirectional signaling link between two mailboxes.
///
/// Constructed only after a successful call/listen handshake. A background
/// poll task drains the local mailbox into an ordered queue for the whole
/// lifetime of the channel; the owner is the only consumer.
pub struct SignalChannel {
    local_mailbox: String,
    remote_mailbox: String,
    relay: MailboxClient,
    incoming: mpsc::UnboundedReceiver<SignalMessage>,
    cancel: CancellationToken,
    poll_task: JoinHandle<()>,
}

impl SignalChannel {
    /// Dial the well-known mailbox of a listening peer.
    ///
    /// Mints an ephemeral mailbox, leaves a `connect` invitation, then waits
    /// up to `timeout` for the `ok` acceptance. The bound channel talks to
    /// the mailbox the acceptor switched us to (falling back to its `from`
    /// mailbox when no switch was given).
    pub async fn call(
        relay: &MailboxClient,
        remote_id: &str,
        local_id: &str,
        timeout: Duration,
    ) -> Result<Self, SignalError> {
        let local_mailbox = ephemeral_mailbox(local_id);
        relay
            .put(remote_id, &SignalMessage::connect(local_mailbox.clone()))
            .await?;
        tracing::debug!(
            target = "signaling",
            remote = remote_id,
            local = %local_mailbox,
            "invitation delivered, waiting for acceptance"
        );

        let reply = relay.get(&local_mailbox, timeout).await?;
        if reply.kind != SignalKind::Ok {
            return Err(SignalError::CallRejected(format!(
                "expected ok, remote sent {reply}"
            )));
        }
        let remote_mailbox = reply
            .switch_channel
            .or(reply.from)
            .filter(|mailbox| !mailbox.is_empty())
            .ok_or_else(|| {
                SignalError::CallRejected("acceptance named no reply mailbox".into())
            })?;
        Ok(Self::bind(relay.clone(), local_mailbox, remote_mailbox))
    }

    /// Wait on a well-known mailbox for one incoming call and accept it.
    ///
    /// Retries indefinitely (with a backoff after relay failures) until
    /// `cancel` fires. Accepting switches the caller to a fresh ephemeral
    /// mailbox so the well-known address is immediately free again.
    pub async fn listen(
        relay: &MailboxClient,
        local_id: &str,
        cancel: CancellationToken,
    ) -> Result<Self, SignalError> {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Err(SignalError::Cancelled),
                result = relay.get(local_id, POLL_WINDOW) => result,
            };
            let message = match message {
                Ok(message) => message,
                Err(SignalError::HandshakeTimeout(_)) => continue,
                Err(err) => {
                    tracing::debug!(target = "signaling", error = %err, "listen poll failed");
                    sleep(RELAY_BACKOFF).await;
                    continue;
                }
            };

            let (SignalKind::Connect, Some(caller)) = (message.kind, message.from.clone()) else {
                tracing::debug!(target = "signaling", msg = %message, "ignoring non-connect message");
                continue;
            };
            let local_mailbox = ephemeral_mailbox(local_id);
            tracing::info!(
                target = "signaling",
                caller = %caller,
                switched = %local_mailbox,
                "accepting incoming call"
            );
            match relay
                .put(&caller, &SignalMessage::ok(local_mailbox.clone()))
                .await
            {
                Ok(()) => return Ok(Self::bind(relay.clone(), local_mailbox, caller)),
                Err(err) => {
                    // The caller may already be gone; keep the mailbox open.
                    tracing::warn!(target = "signaling", error = %err, "acceptance not delivered");
                }
            }
        }
    }

    /// Bind an already-negotiated mailbox pair and start the poll loop.
    pub fn bind(relay: MailboxClient, local_mailbox: String, remote_mailbox: String) -> Self {
        let (queue_tx, incoming) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let poll_relay = relay.clone();
        let poll_mailbox = local_mailbox.clone();
        let poll_cancel = cancel.clone();
        let poll_task = tokio::spawn(async move {
            loop {
                let result = tokio::select! {
                    _ = poll_cancel.cancelled() => break,
                    result = poll_relay.get(&poll_mailbox, POLL_WINDOW) => result,
                };
                match result {
                    Ok(message) => {
                        if queue_tx.send(message).is_err() {
                            break;
                        }
                    }
                    // Long-poll expiry: reissue immediately.
                    Err(SignalError::HandshakeTimeout(_)) => continue,
                    Err(err) => {
                        tracing::debug!(
                            target = "signaling",
                            mailbox = %poll_mailbox,
                            error = %err,
                            "poll failed, backing off"
                        );
                        sleep(RELAY_BACKOFF).await;
                    }
                }
            }
            tracing::trace!(target = "signaling", mailbox = %poll_mailbox, "poll loop stopped");
        });

        Self {
            local_mailbox,
            remote_mailbox,
            relay,
            incoming,
            cancel,
            poll_task,
        }
    }

    pub fn local_mailbox(&self) -> &str {
        &self.local_mailbox
    }

    pub fn remote_mailbox(&self) -> &str {
        &self.remote_mailbox
    }

    /// Deliver a message to the bound remote mailbox.
    pub async fn send(&self, message: &SignalMessage) -> Result<(), SignalError> {
        self.relay.put(&self.remote_mailbox, message).await
    }

    /// Non-blocking pop of the inbound queue.
    pub fn try_recv(&mut self) -> Option<SignalMessage> {
        self.incoming.try_recv().ok()
    }

    /// Await the next inbound message. `None` means the poll loop is gone.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        self.incoming.recv().await
    }

    /// Stop the poll loop. The channel cannot receive afterwards.
    pub fn close(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.poll_task.abort();
    }
}
