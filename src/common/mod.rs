//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! Common types used throughout the library.

use std::fmt;

/// Common Result type, using `anyhow::Error` for Error.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Application level user identity, as issued by the app's auth layer.
pub type UserId = String;

/// Unique call identification number.
///
/// Rendered on the wire as fixed-width lowercase hex so that the
/// lexicographic order used by the glare tie-break matches numeric order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallId {
    id: u64,
}

impl CallId {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn random() -> Self {
        Self::new(rand::random())
    }

    pub fn as_u64(self) -> u64 {
        self.id
    }

    /// The wire form: 16 lowercase hex digits, no prefix.
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.id)
    }

    pub fn from_hex(text: &str) -> Option<Self> {
        if text.len() != 16 {
            return None;
        }
        u64::from_str_radix(text, 16).ok().map(Self::new)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.id)
    }
}

impl From<u64> for CallId {
    fn from(item: u64) -> Self {
        CallId::new(item)
    }
}

impl serde::Serialize for CallId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for CallId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        CallId::from_hex(&text)
            .ok_or_else(|| serde::de::Error::custom("callId must be 16 hex digits"))
    }
}

/// Tracks the state of a call session.
///
/// Transitions are monotonic: the manager only ever moves rightwards
/// through `Idle -> Calling|Receiving -> Connecting -> Active -> Ending ->
/// Ended`, with `Failed` reachable from any pre-`Active` state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// No call in progress.
    Idle,

    /// Outgoing call, ringing the remote user.
    Calling,

    /// Incoming call, ringing locally.
    Receiving,

    /// Offer/answer exchanged, media path connecting.
    Connecting,

    /// Remote media observed, call is up.
    Active,

    /// The call is in the process of terminating (hanging up).
    Ending,

    /// The call ended normally (either side hung up or declined).
    Ended,

    /// The call ended on a fatal condition; `error` carries the reason.
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    /// Rank used to check that transitions never move backwards.
    pub fn rank(self) -> u8 {
        match self {
            CallState::Idle => 0,
            CallState::Calling | CallState::Receiving => 1,
            CallState::Connecting => 2,
            CallState::Active => 3,
            CallState::Ending => 4,
            CallState::Ended | CallState::Failed => 5,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The call direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallDirection {
    /// We are the callee.
    Incoming,

    /// We are the caller.
    Outgoing,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Status notifications delivered to the presentation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    /// Inbound call only: an incoming call is ringing locally.
    LocalRinging,

    /// Outbound call only: our offer went out, the remote side is ringing.
    RemoteRinging,

    /// The first remote track arrived; the call is up.
    Connected,

    /// The call ended because of a local hangup.
    EndedLocalHangup,

    /// The call ended because of a remote hangup.
    EndedRemoteHangup,

    /// The call ended because we declined it.
    EndedLocalDeclined,

    /// The call ended because the remote side declined it.
    EndedRemoteDeclined,

    /// The call ended because nobody answered within the ringing window.
    EndedNoAnswer,

    /// The call ended because the media path never connected.
    EndedConnectTimeout,

    /// The call attempt lost a glare tie-break and was silently dropped.
    EndedGlare,

    /// The call ended because local media could not be acquired.
    EndedMediaFailure,

    /// The call ended because offer/answer/ICE negotiation failed.
    EndedNegotiationFailure,

    /// The call ended because the local identity went away mid-call.
    EndedIdentityLost,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// Call-flow trace component list.
pub enum CallFlow {
    Application,
    SessionManager,
    Connection,
    Signaling,
    Network,
}

impl fmt::Display for CallFlow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                CallFlow::Application => "app",
                CallFlow::SessionManager => "sm",
                CallFlow::Connection => "conn",
                CallFlow::Signaling => "sig",
                CallFlow::Network => "net",
            }
        )
    }
}

/// One-line call-flow trace, greppable as `nightcall!`.
#[macro_export]
macro_rules! callflow {
    ($source:expr, $destination:expr, $operation:expr) => {
        info!(
            "nightcall!\t{}\t{} -> {}: {}",
            match std::time::SystemTime::now().duration_since(std::time::SystemTime::UNIX_EPOCH) {
                Ok(v) => v.as_millis(),
                Err(_) => 0,
            },
            $source,
            $destination,
            $operation
        );
    };
}
