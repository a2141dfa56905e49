//! Control-message vocabulary and codec.
//!
//! Two kinds of payload travel on the channel:
//!
//! - **Control messages** — small tagged JSON records (`header`, `end`,
//!   `cancel`, `ping`, `bye`) that drive the transfer state machine.
//! - **Binary frames** — raw chunk bytes, never wrapped in the control
//!   envelope. The transport distinguishes the two by payload type
//!   (structured message vs. binary), so no framing byte is needed here.
//!
//! The channel preserves send order, so a `Header` always arrives before
//! its binary frames and before its `End`/`Cancel`. The protocol relies on
//! that ordering and carries no sequence numbers or per-chunk acks.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A structured control message, correlated to a transfer by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Announces a new transfer; always precedes its binary frames.
    Header { id: Uuid, name: String, size: u64 },
    /// Marks successful completion of transfer `id`.
    End { id: Uuid },
    /// Aborts transfer `id`; sent by whichever side initiates cancellation.
    Cancel { id: Uuid },
    /// Liveness heartbeat. The receiver takes no action beyond noting it.
    Ping,
    /// Graceful-disconnect notice, sent before the channel is torn down.
    Bye,
}

impl ControlMessage {
    /// The transfer this message refers to, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            ControlMessage::Header { id, .. }
            | ControlMessage::End { id }
            | ControlMessage::Cancel { id } => Some(*id),
            ControlMessage::Ping | ControlMessage::Bye => None,
        }
    }
}

/// Encode a control message to its JSON wire form.
pub fn encode_control(msg: &ControlMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(msg)?)
}

/// Decode a control message from its JSON wire form.
pub fn decode_control(payload: &[u8]) -> Result<ControlMessage> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_with_lowercase_tag() {
        let id = Uuid::new_v4();
        let msg = ControlMessage::Header {
            id,
            name: "photo.jpg".into(),
            size: 1_048_576,
        };
        let wire = encode_control(&msg).unwrap();
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.contains(r#""type":"header""#));
        assert!(text.contains(r#""size":1048576"#));
        assert_eq!(decode_control(&wire).unwrap(), msg);
    }

    #[test]
    fn tagless_messages_encode_bare() {
        let wire = encode_control(&ControlMessage::Ping).unwrap();
        assert_eq!(std::str::from_utf8(&wire).unwrap(), r#"{"type":"ping"}"#);
        let wire = encode_control(&ControlMessage::Bye).unwrap();
        assert_eq!(std::str::from_utf8(&wire).unwrap(), r#"{"type":"bye"}"#);
    }

    #[test]
    fn task_id_present_only_on_transfer_messages() {
        let id = Uuid::new_v4();
        assert_eq!(ControlMessage::End { id }.task_id(), Some(id));
        assert_eq!(ControlMessage::Cancel { id }.task_id(), Some(id));
        assert_eq!(ControlMessage::Ping.task_id(), None);
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        assert!(decode_control(b"{\"type\":\"warp\"}").is_err());
        assert!(decode_control(b"not json").is_err());
    }
}
