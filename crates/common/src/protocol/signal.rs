// Peer-call signaling envelope relayed between clients of one room.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Negotiation step carried by a signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    Join,
}

impl SignalKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::Join => "join",
        }
    }
}

/// A signaling message.
///
/// `from` is filled in by the relay with the sender's client identity, so a
/// value supplied by the client is never trusted. When `to` is set the relay
/// delivers the envelope to that single peer, otherwise to the whole room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalEnvelope {
    pub kind: SignalKind,
    #[serde(default)]
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Offer/answer SDP or ICE candidate, opaque to the relay.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl SignalEnvelope {
    pub fn new(kind: SignalKind, payload: Value) -> Self {
        Self { kind, from: String::new(), to: None, payload }
    }

    pub fn addressed_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Target peer, treating a blank `to` as absent.
    pub fn target(&self) -> Option<&str> {
        self.to.as_deref().map(str::trim).filter(|to| !to.is_empty())
    }

    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_targeted_offer() {
        let raw = json!({
            "kind": "offer",
            "from": "peer-a",
            "to": "peer-b",
            "payload": { "type": "offer", "sdp": "v=0" }
        });
        let envelope =
            SignalEnvelope::from_json(raw.to_string().as_bytes()).expect("offer should parse");

        assert_eq!(envelope.kind, SignalKind::Offer);
        assert_eq!(envelope.from, "peer-a");
        assert_eq!(envelope.target(), Some("peer-b"));
        assert_eq!(envelope.payload["sdp"], "v=0");
    }

    #[test]
    fn from_and_payload_are_optional() {
        let envelope = SignalEnvelope::from_json(br#"{"kind":"join"}"#).expect("join should parse");

        assert_eq!(envelope.kind, SignalKind::Join);
        assert!(envelope.from.is_empty());
        assert!(envelope.target().is_none());
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn blank_target_counts_as_broadcast() {
        let envelope = SignalEnvelope::new(SignalKind::Candidate, json!({})).addressed_to("  ");
        assert!(envelope.target().is_none());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(SignalEnvelope::from_json(br#"{"kind":"hangup","from":"a"}"#).is_err());
    }

    #[test]
    fn missing_kind_is_rejected() {
        assert!(SignalEnvelope::from_json(br#"{"from":"a","to":"b"}"#).is_err());
    }

    #[test]
    fn serialization_omits_absent_fields() {
        let envelope = SignalEnvelope {
            kind: SignalKind::Join,
            from: "peer-a".into(),
            to: None,
            payload: Value::Null,
        };
        let value: Value =
            serde_json::from_slice(&envelope.to_json().expect("envelope should encode"))
                .expect("encoded envelope should be json");

        assert_eq!(value, json!({ "kind": "join", "from": "peer-a" }));
    }
}
