//! HTTP client for the stateless mailbox relay.
//!
//! The relay keeps at most one message per mailbox id: `PUT /{mailbox}`
//! stores a message, `GET /{mailbox}` hands it out or answers non-2xx while
//! the mailbox is empty. The relay has no notion of sessions; everything
//! above this module is built from these two operations.

use std::time::Duration;

use reqwest::Client;
use tokio::time::{sleep, Instant};

use crate::config::RelayConfig;
use crate::error::SignalError;
use crate::protocol::SignalMessage;

/// Thin wrapper over PUT/GET against one relay.
///
/// `put` is a single best-effort request; retry policy belongs to callers.
/// `get` polls until a message shows up or the deadline passes, and reports
/// "relay down" distinctly from "peer silent".
#[derive(Clone)]
pub struct MailboxClient {
    http: Client,
    base: String,
    poll_interval: Duration,
}

impl MailboxClient {
    pub fn new(config: &RelayConfig) -> Result<Self, SignalError> {
        let base = config.validated_base()?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| SignalError::Setup(format!("http client: {err}")))?;
        Ok(Self {
            http,
            base,
            poll_interval: config.poll_interval,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn endpoint(&self, mailbox: &str) -> String {
        format!("{}/{}", self.base, mailbox)
    }

    fn check_mailbox(mailbox: &str) -> Result<(), SignalError> {
        if mailbox.is_empty() {
            return Err(SignalError::InvalidMailbox(mailbox.to_string()));
        }
        Ok(())
    }

    /// Store `message` in `mailbox`. One attempt, no retry.
    pub async fn put(&self, mailbox: &str, message: &SignalMessage) -> Result<(), SignalError> {
        Self::check_mailbox(mailbox)?;
        let url = self.endpoint(mailbox);
        let response = self
            .http
            .put(&url)
            .json(message)
            .send()
            .await
            .map_err(|err| SignalError::RelayUnreachable(err.to_string()))?;
        if response.status().is_success() {
            tracing::trace!(target = "relay", mailbox, kind = %message, "put");
            Ok(())
        } else {
            Err(SignalError::RelayUnreachable(format!(
                "put {mailbox} returned {}",
                response.status()
            )))
        }
    }

    /// Poll `mailbox` until a message is available or `deadline` elapses.
    ///
    /// Non-2xx responses mean "nothing yet" and undecodable bodies are
    /// skipped; both keep polling. When the deadline passes the error says
    /// whether the relay was ever reached.
    pub async fn get(&self, mailbox: &str, deadline: Duration) -> Result<SignalMessage, SignalError> {
        Self::check_mailbox(mailbox)?;
        let url = self.endpoint(mailbox);
        let cutoff = Instant::now() + deadline;
        let mut relay_reached = false;

        loop {
            match self.http.get(&url).send().await {
                Ok(response) => {
                    relay_reached = true;
                    if response.status().is_success() {
                        match response.json::<SignalMessage>().await {
                            Ok(message) => {
                                tracing::trace!(target = "relay", mailbox, kind = %message, "got");
                                return Ok(message);
                            }
                            Err(err) => {
                                tracing::debug!(
                                    target = "relay",
                                    mailbox,
                                    error = %err,
                                    "dropping undecodable mailbox body"
                                );
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::trace!(target = "relay", mailbox, error = %err, "get attempt failed");
                }
            }

            if Instant::now() + self.poll_interval > cutoff {
                return Err(if relay_reached {
                    SignalError::HandshakeTimeout(format!("mailbox {mailbox}"))
                } else {
                    SignalError::RelayUnreachable(format!("mailbox {mailbox} never answered"))
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}
