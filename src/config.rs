use std::time::Duration;

use url::Url;

use crate::error::SignalError;

/// A STUN or TURN server handed to the peer-connection engine.
#[derive(Debug, Clone, Default)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: username.into(),
            credential: credential.into(),
        }
    }
}

/// How to talk to the mailbox relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL of the relay; mailbox ids are appended as path segments.
    pub base_url: String,
    /// Delay between consecutive GET attempts while polling a mailbox.
    pub poll_interval: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl RelayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub(crate) fn validated_base(&self) -> Result<String, SignalError> {
        let trimmed = self.base_url.trim_end_matches('/').to_string();
        Url::parse(&trimmed)
            .map_err(|err| SignalError::Setup(format!("invalid relay url {trimmed}: {err}")))?;
        Ok(trimmed)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            poll_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(3),
        }
    }
}

/// Timeouts and identity for one connection orchestrator.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Stable well-known id of this endpoint. Ephemeral mailboxes are minted
    /// as `{local_id}_{uuid}`.
    pub local_id: String,
    /// STUN/TURN servers for the engine.
    pub ice_servers: Vec<IceServer>,
    /// Label used when this side creates the data channel.
    pub data_channel_label: String,
    /// Re-initiate automatically after an established connection drops.
    pub keep_alive: bool,
    /// Delay between invitation rounds when the relay or the peer does not
    /// respond.
    pub invite_retry: Duration,
    /// How long one invitation round waits for the `ok` acceptance.
    pub accept_timeout: Duration,
    /// Overall bound on the invitation phase. `None` keeps inviting until
    /// cancelled.
    pub invite_deadline: Option<Duration>,
    /// Listener-side: abandon the attempt when the switched channel stays
    /// silent this long.
    pub idle_timeout: Duration,
    /// Overall bound on reaching a connected engine once negotiation starts.
    pub connect_deadline: Duration,
    /// Minimum pause before a keep-alive reconnection attempt.
    pub reconnect_cooldown: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            local_id: String::new(),
            ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
            data_channel_label: "data".to_string(),
            keep_alive: false,
            invite_retry: Duration::from_secs(1),
            accept_timeout: Duration::from_secs(10),
            invite_deadline: None,
            idle_timeout: Duration::from_secs(10),
            connect_deadline: Duration::from_secs(60),
            reconnect_cooldown: Duration::from_secs(1),
        }
    }
}

impl ConnectorConfig {
    pub fn builder() -> ConnectorConfigBuilder {
        ConnectorConfigBuilder::default()
    }
}

/// Builder for [`ConnectorConfig`].
#[derive(Debug, Default)]
pub struct ConnectorConfigBuilder {
    local_id: Option<String>,
    ice_servers: Vec<IceServer>,
    data_channel_label: Option<String>,
    keep_alive: Option<bool>,
    invite_retry: Option<Duration>,
    accept_timeout: Option<Duration>,
    invite_deadline: Option<Duration>,
    idle_timeout: Option<Duration>,
    connect_deadline: Option<Duration>,
    reconnect_cooldown: Option<Duration>,
}

impl ConnectorConfigBuilder {
    pub fn local_id(mut self, id: impl Into<String>) -> Self {
        self.local_id = Some(id.into());
        self
    }

    pub fn add_ice_server(mut self, server: IceServer) -> Self {
        self.ice_servers.push(server);
        self
    }

    pub fn data_channel_label(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = Some(label.into());
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn invite_retry(mut self, delay: Duration) -> Self {
        self.invite_retry = Some(delay);
        self
    }

    pub fn accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = Some(timeout);
        self
    }

    pub fn invite_deadline(mut self, deadline: Duration) -> Self {
        self.invite_deadline = Some(deadline);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn connect_deadline(mut self, deadline: Duration) -> Self {
        self.connect_deadline = Some(deadline);
        self
    }

    pub fn reconnect_cooldown(mut self, cooldown: Duration) -> Self {
        self.reconnect_cooldown = Some(cooldown);
        self
    }

    pub fn build(self) -> Result<ConnectorConfig, SignalError> {
        let local_id = self
            .local_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SignalError::Setup("local_id is required".into()))?;

        let mut config = ConnectorConfig {
            local_id,
            ..Default::default()
        };
        if !self.ice_servers.is_empty() {
            config.ice_servers = self.ice_servers;
        }
        if let Some(label) = self.data_channel_label {
            config.data_channel_label = label;
        }
        if let Some(keep_alive) = self.keep_alive {
            config.keep_alive = keep_alive;
        }
        if let Some(delay) = self.invite_retry {
            config.invite_retry = delay;
        }
        if let Some(timeout) = self.accept_timeout {
            config.accept_timeout = timeout;
        }
        if let Some(deadline) = self.invite_deadline {
            config.invite_deadline = Some(deadline);
        }
        if let Some(timeout) = self.idle_timeout {
            config.idle_timeout = timeout;
        }
        if let Some(deadline) = self.connect_deadline {
            config.connect_deadline = deadline;
        }
        if let Some(cooldown) = self.reconnect_cooldown {
            config.reconnect_cooldown = cooldown;
        }
        Ok(config)
    }
}
