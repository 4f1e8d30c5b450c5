//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! The messages we send over the signaling channel to establish a call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{CallId, UserId};
use crate::core::util::now_millis;
use crate::webrtc::ice_candidate::IceCandidate;
use crate::webrtc::sdp::SessionDescription;

/// Message body, a closed tagged variant: the payload shape is bound to the
/// tag at the serde boundary, so nothing malformed reaches the state
/// machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Payload {
    /// The caller sends this first to ring the callee.
    IncomingCall,
    /// The caller's session description.
    Offer(SessionDescription),
    /// The callee's session description.
    Answer(SessionDescription),
    /// A network path endpoint, sent by either side as gathered.
    IceCandidate(IceCandidate),
    /// The callee accepted; the answer follows once media is up.
    CallAccepted,
    /// The callee declined the call.
    CallRejected,
    /// Either side hung up or is cleaning up a dead call.
    CallEnded,
}

impl Payload {
    pub fn typ(&self) -> MessageType {
        match self {
            Self::IncomingCall => MessageType::IncomingCall,
            Self::Offer(_) => MessageType::Offer,
            Self::Answer(_) => MessageType::Answer,
            Self::IceCandidate(_) => MessageType::IceCandidate,
            Self::CallAccepted => MessageType::CallAccepted,
            Self::CallRejected => MessageType::CallRejected,
            Self::CallEnded => MessageType::CallEnded,
        }
    }
}

/// It's convenient to know the type of a message without holding an entire
/// message, so we have the related MessageType enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    IncomingCall,
    Offer,
    Answer,
    IceCandidate,
    CallAccepted,
    CallRejected,
    CallEnded,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::IncomingCall => "incoming-call",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::CallAccepted => "call-accepted",
            Self::CallRejected => "call-rejected",
            Self::CallEnded => "call-ended",
        };
        write!(f, "{}", name)
    }
}

/// The wire unit of the protocol: one row on the per-recipient feed.
///
/// Delivery is at-least-once and only best-effort ordered, so consumers
/// must be idempotent by `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    /// Unique per message, the de-duplication key.
    pub id: String,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub call_id: CallId,
    #[serde(flatten)]
    pub payload: Payload,
    /// Wall-clock send time, epoch milliseconds.
    pub created_at: u64,
}

impl SignalMessage {
    pub fn new(from: UserId, to: UserId, call_id: CallId, payload: Payload) -> Self {
        Self {
            id: random_message_id(),
            from_user_id: from,
            to_user_id: to,
            call_id,
            payload,
            created_at: now_millis(),
        }
    }

    pub fn typ(&self) -> MessageType {
        self.payload.typ()
    }

    /// Message age relative to `now` in milliseconds; clock skew between
    /// peers can make `created_at` land in the future, which counts as zero.
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    /// Decodes and validates one raw feed row. Returns `None` for anything
    /// that doesn't parse or fails the field checks; the caller logs and
    /// drops it.
    pub fn decode(row: serde_json::Value) -> Option<Self> {
        let message: SignalMessage = serde_json::from_value(row).ok()?;
        if message.id.is_empty()
            || message.from_user_id.is_empty()
            || message.to_user_id.is_empty()
        {
            return None;
        }
        Some(message)
    }

    pub fn encode(&self) -> serde_json::Value {
        // SignalMessage contains nothing a Value can't represent.
        serde_json::to_value(self).expect("SignalMessage is always representable as JSON")
    }
}

impl fmt::Display for SignalMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({}, {} -> {})",
            self.typ(),
            self.call_id,
            self.from_user_id,
            self.to_user_id
        )
    }
}

fn random_message_id() -> String {
    format!("{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(payload: Payload) -> SignalMessage {
        SignalMessage::new(
            "userA".to_string(),
            "userB".to_string(),
            CallId::new(42),
            payload,
        )
    }

    #[test]
    fn round_trip_all_types() {
        let payloads = [
            Payload::IncomingCall,
            Payload::Offer(SessionDescription::offer("v=0")),
            Payload::Answer(SessionDescription::answer("v=0")),
            Payload::IceCandidate(IceCandidate::new("candidate:1 1 udp 1 h 1 typ host")),
            Payload::CallAccepted,
            Payload::CallRejected,
            Payload::CallEnded,
        ];
        for payload in payloads {
            let original = message(payload);
            let decoded = SignalMessage::decode(original.encode()).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn wire_shape_is_tagged() {
        let row = message(Payload::Offer(SessionDescription::offer("v=0"))).encode();
        assert_eq!(row["type"], "offer");
        assert_eq!(row["payload"]["type"], "offer");
        assert_eq!(row["payload"]["sdp"], "v=0");
        assert_eq!(row["fromUserId"], "userA");
        assert_eq!(row["callId"], "000000000000002a");
    }

    #[test]
    fn decode_rejects_missing_fields() {
        assert!(SignalMessage::decode(json!({})).is_none());
        assert!(SignalMessage::decode(json!("not an object")).is_none());
        assert!(SignalMessage::decode(json!({
            "id": "", "fromUserId": "a", "toUserId": "b",
            "callId": "000000000000002a", "type": "incoming-call",
            "createdAt": 0,
        }))
        .is_none());
        // Payload shape must match the tag.
        assert!(SignalMessage::decode(json!({
            "id": "m1", "fromUserId": "a", "toUserId": "b",
            "callId": "000000000000002a", "type": "offer",
            "payload": { "bogus": true },
            "createdAt": 0,
        }))
        .is_none());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(SignalMessage::decode(json!({
            "id": "m1", "fromUserId": "a", "toUserId": "b",
            "callId": "000000000000002a", "type": "group-invite",
            "createdAt": 0,
        }))
        .is_none());
    }

    #[test]
    fn age_saturates_on_clock_skew() {
        let mut m = message(Payload::IncomingCall);
        m.created_at = 1_000;
        assert_eq!(m.age_millis(4_000), 3_000);
        assert_eq!(m.age_millis(500), 0);
    }
}
