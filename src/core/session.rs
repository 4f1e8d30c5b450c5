//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! One call attempt, from creation to terminal state.

use std::time::{Duration, Instant};

use crate::common::{CallDirection, CallId, CallState, UserId};
use crate::core::connection::Connection;
use crate::core::platform::Platform;
use crate::core::util::format_duration;
use crate::error::CallError;
use crate::webrtc::ice_candidate::IceCandidate;
use crate::webrtc::sdp::SessionDescription;

/// The single unit of call state. Exactly one non-terminal session exists
/// per manager at any time; everything here is owned by the session until
/// released at teardown.
pub struct CallSession<T>
where
    T: Platform,
{
    pub call_id: CallId,
    pub remote_user: UserId,
    pub direction: CallDirection,

    state: CallState,

    pub started_at: Instant,
    pub connected_at: Option<Instant>,
    pub ended_at: Option<Instant>,

    pub local_stream: Option<T::MediaStream>,
    pub remote_stream: Option<T::MediaStream>,

    /// Local-only flags; v1 does not notify the peer of mute state.
    pub muted: bool,
    pub video_enabled: bool,

    /// Candidates received before a connection exists, arrival order.
    /// Once the connection is created they move into its own buffer.
    pub pending_ice_queue: Vec<IceCandidate>,

    /// Callee only: the offer is cached until the user accepts.
    pub cached_offer: Option<SessionDescription>,

    /// Callee only: the user accepted before the offer arrived; run the
    /// accept as soon as it does.
    pub accept_pending: bool,

    pub connection: Option<Connection<T>>,

    /// Ringing or connect deadline, depending on state.
    pub deadline: Option<Instant>,

    /// Frozen duration of the active portion of the call.
    duration: Duration,

    pub error: Option<CallError>,
}

impl<T> CallSession<T>
where
    T: Platform,
{
    pub fn outgoing(call_id: CallId, remote_user: UserId, now: Instant) -> Self {
        Self::new(call_id, remote_user, CallDirection::Outgoing, CallState::Calling, now)
    }

    pub fn incoming(call_id: CallId, remote_user: UserId, now: Instant) -> Self {
        Self::new(call_id, remote_user, CallDirection::Incoming, CallState::Receiving, now)
    }

    fn new(
        call_id: CallId,
        remote_user: UserId,
        direction: CallDirection,
        state: CallState,
        now: Instant,
    ) -> Self {
        Self {
            call_id,
            remote_user,
            direction,
            state,
            started_at: now,
            connected_at: None,
            ended_at: None,
            local_stream: None,
            remote_stream: None,
            muted: false,
            video_enabled: true,
            pending_ice_queue: Vec::new(),
            cached_offer: None,
            accept_pending: false,
            connection: None,
            deadline: None,
            duration: Duration::ZERO,
            error: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Monotonic state update. A backwards move is a bug in the state
    /// machine, loudly logged and refused.
    pub fn set_state(&mut self, next: CallState) {
        if next.rank() < self.state.rank() {
            error!(
                "refusing backwards transition {} -> {} for {}",
                self.state, next, self.call_id
            );
            return;
        }
        if next != self.state {
            info!("call {}: state {} -> {}", self.call_id, self.state, next);
            self.state = next;
        }
    }

    /// Duration ticks only while `Active`; it starts at the first remote
    /// track and freezes at `ended_at`.
    pub fn tick_duration(&mut self, now: Instant) {
        if self.state == CallState::Active {
            if let Some(connected_at) = self.connected_at {
                self.duration = now.saturating_duration_since(connected_at);
            }
        }
    }

    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration)
    }
}

/// Read-only state for the presentation layer, cheap to clone out of the
/// manager on every render.
#[derive(Clone, Debug)]
pub struct SessionSnapshot<S> {
    pub call_state: CallState,
    pub call_id: Option<CallId>,
    pub remote_user: Option<UserId>,
    pub direction: Option<CallDirection>,
    pub local_stream: Option<S>,
    pub remote_stream: Option<S>,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_connected: bool,
    pub formatted_duration: String,
    pub error: Option<CallError>,
}

impl<S> SessionSnapshot<S> {
    pub fn idle() -> Self {
        Self {
            call_state: CallState::Idle,
            call_id: None,
            remote_user: None,
            direction: None,
            local_stream: None,
            remote_stream: None,
            is_muted: false,
            is_video_off: false,
            is_connected: false,
            formatted_duration: format_duration(Duration::ZERO),
            error: None,
        }
    }
}
