use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};

use crate::engine::{IceCandidate, SdpKind, SessionDescription};
use crate::error::SignalError;

/// Discriminator for [`SignalMessage`]. Kinds this build does not know are
/// mapped to [`SignalKind::Unknown`] instead of failing the decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Connect,
    Ok,
    Offer,
    Answer,
    Candidate,
    Unknown,
}

impl Default for SignalKind {
    fn default() -> Self {
        SignalKind::Unknown
    }
}

impl<'de> Deserialize<'de> for SignalKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(match tag.as_str() {
            "connect" => SignalKind::Connect,
            "ok" => SignalKind::Ok,
            "offer" => SignalKind::Offer,
            "answer" => SignalKind::Answer,
            "candidate" => SignalKind::Candidate,
            _ => SignalKind::Unknown,
        })
    }
}

/// The flat envelope exchanged through relay mailboxes.
///
/// Every field is optional on the wire; a decoder never fails because a
/// field is missing or because the sender added one we do not know.
/// Exactly one semantic payload is populated per kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    #[serde(default)]
    pub kind: SignalKind,
    /// Mailbox the sender is reachable on (populated by `connect`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Replacement mailbox the accepting side switched the call to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
    #[serde(default)]
    pub timestamp: i64,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

impl SignalMessage {
    fn stamped(kind: SignalKind) -> Self {
        Self {
            kind,
            timestamp: unix_now(),
            ..Default::default()
        }
    }

    /// Invitation sent to a well-known mailbox; `from` is the ephemeral
    /// mailbox the caller listens on.
    pub fn connect(from: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            ..Self::stamped(SignalKind::Connect)
        }
    }

    /// Acceptance of an invitation, directing the caller to a fresh mailbox.
    pub fn ok(switch_channel: impl Into<String>) -> Self {
        Self {
            switch_channel: Some(switch_channel.into()),
            ..Self::stamped(SignalKind::Ok)
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: Some(sdp.into()),
            ..Self::stamped(SignalKind::Offer)
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: Some(sdp.into()),
            ..Self::stamped(SignalKind::Answer)
        }
    }

    pub fn candidate(candidate: &IceCandidate) -> Self {
        Self {
            candidate: Some(candidate.candidate.clone()),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_m_line_index: candidate.sdp_mline_index.map(u32::from),
            ..Self::stamped(SignalKind::Candidate)
        }
    }

    pub fn from_description(desc: &SessionDescription) -> Self {
        match desc.kind {
            SdpKind::Offer => Self::offer(desc.sdp.clone()),
            SdpKind::Answer => Self::answer(desc.sdp.clone()),
        }
    }

    /// Interpret an `offer`/`answer` message as a session description.
    pub fn to_description(&self) -> Result<SessionDescription, SignalError> {
        let kind = match self.kind {
            SignalKind::Offer => SdpKind::Offer,
            SignalKind::Answer => SdpKind::Answer,
            other => {
                return Err(SignalError::Malformed(format!(
                    "{other:?} message carries no session description"
                )))
            }
        };
        let sdp = self
            .sdp
            .as_ref()
            .filter(|sdp| !sdp.is_empty())
            .ok_or_else(|| SignalError::Malformed("description message without sdp".into()))?;
        Ok(SessionDescription {
            kind,
            sdp: sdp.clone(),
        })
    }

    /// Interpret a `candidate` message as an ICE candidate.
    pub fn to_candidate(&self) -> Result<IceCandidate, SignalError> {
        if self.kind != SignalKind::Candidate {
            return Err(SignalError::Malformed(format!(
                "{:?} message carries no candidate",
                self.kind
            )));
        }
        let candidate = self
            .candidate
            .as_ref()
            .ok_or_else(|| SignalError::Malformed("candidate message without candidate".into()))?;
        Ok(IceCandidate {
            candidate: candidate.clone(),
            sdp_mid: self.sdp_mid.clone(),
            sdp_mline_index: self.sdp_m_line_index.map(|index| index as u16),
        })
    }
}

impl fmt::Display for SignalMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SignalKind::Connect => write!(
                f,
                "connect request from {}",
                self.from.as_deref().unwrap_or("<unset>")
            ),
            SignalKind::Ok => write!(
                f,
                "connection accepted on {}",
                self.switch_channel.as_deref().unwrap_or("<caller mailbox>")
            ),
            SignalKind::Offer => write!(f, "offer"),
            SignalKind::Answer => write!(f, "answer"),
            SignalKind::Candidate => write!(f, "ice candidate"),
            SignalKind::Unknown => write!(f, "unknown message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_kind() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 UDP 2130706431 10.0.0.7 50000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        };
        let messages = [
            SignalMessage::connect("studio_f00d"),
            SignalMessage::ok("host_beef"),
            SignalMessage::offer("v=0\r\n"),
            SignalMessage::answer("v=0\r\n"),
            SignalMessage::candidate(&candidate),
        ];
        for message in &messages {
            let json = serde_json::to_string(message).expect("encode");
            let decoded: SignalMessage = serde_json::from_str(&json).expect("decode");
            assert_eq!(&decoded, message);
        }
    }

    #[test]
    fn decoding_tolerates_extra_and_missing_fields() {
        let decoded: SignalMessage = serde_json::from_str("{}").expect("empty object");
        assert_eq!(decoded.kind, SignalKind::Unknown);
        assert!(decoded.from.is_none());

        let decoded: SignalMessage = serde_json::from_str(
            r#"{"kind":"offer","sdp":"v=0","futureField":{"nested":true},"label":3}"#,
        )
        .expect("extra fields");
        assert_eq!(decoded.kind, SignalKind::Offer);
        assert_eq!(decoded.sdp.as_deref(), Some("v=0"));

        let decoded: SignalMessage =
            serde_json::from_str(r#"{"kind":"hangup-v2"}"#).expect("unknown kind");
        assert_eq!(decoded.kind, SignalKind::Unknown);
    }

    #[test]
    fn candidate_conversion_is_lossless() {
        let candidate = IceCandidate {
            candidate: "candidate:2 1 UDP 1694498815 198.51.100.4 61000 typ srflx".into(),
            sdp_mid: Some("audio".into()),
            sdp_mline_index: Some(1),
        };
        let message = SignalMessage::candidate(&candidate);
        assert_eq!(message.to_candidate().expect("candidate"), candidate);
    }

    #[test]
    fn description_conversion_rejects_wrong_kinds() {
        let offer = SignalMessage::offer("v=0\r\n");
        let desc = offer.to_description().expect("offer");
        assert_eq!(desc.kind, SdpKind::Offer);

        assert!(SignalMessage::connect("a").to_description().is_err());
        assert!(SignalMessage::offer("v=0").to_candidate().is_err());
    }
}
