//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! The call session manager: the finite state machine governing one call's
//! lifecycle and the only component holding call state.
//!
//! # Inputs
//!
//! ## Intents from the presentation layer
//! - start_call / accept_call / reject_call / end_call
//! - toggle_mute / toggle_video / switch_camera
//!
//! ## Signaling messages from the channel (via `poll()`)
//! - incoming-call, offer, answer, ice-candidate,
//!   call-accepted, call-rejected, call-ended
//!
//! ## Capability completions from the platform glue
//! - media_acquired, local_ice_candidate, remote_track
//!
//! ## Time
//! - tick(now): ringing/connect timeouts and duration tracking
//!
//! All mutation is serialized through this object; asynchronous capability
//! completions re-enter with a generation number so that anything resolving
//! after the call moved on releases its resources and touches nothing else.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::common::{CallFlow, CallId, CallState, Result, SessionEvent, UserId};
use crate::core::channel::{SignalChannel, SignalTransport};
use crate::core::connection::Connection;
use crate::core::platform::Platform;
use crate::core::session::{CallSession, SessionSnapshot};
use crate::core::signaling::{MessageType, Payload, SignalMessage};
use crate::core::util::now_millis;
use crate::error::CallError;
use crate::webrtc::ice_candidate::IceCandidate;

/// Named, overridable call policies.
#[derive(Clone, Debug)]
pub struct CallConfig {
    /// How long an unanswered call rings, on both sides.
    pub ringing_timeout: Duration,
    /// How long the media path may take to connect after offer/answer.
    pub connect_timeout: Duration,
    /// Inbound `incoming-call` older than this never rings.
    pub max_message_age: Duration,
    /// Deterministic tie-break for simultaneous mutual call attempts.
    pub glare: GlareTieBreak,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ringing_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(30),
            max_message_age: Duration::from_secs(120),
            glare: GlareTieBreak::LowerCallIdWins,
        }
    }
}

/// Both peers apply the same rule to their (local, remote) pair, so exactly
/// one of two concurrent attempts survives on both sides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlareTieBreak {
    /// The lexicographically smaller call id wins (the default).
    LowerCallIdWins,
    HigherCallIdWins,
}

impl GlareTieBreak {
    pub fn local_wins(self, local: CallId, remote: CallId) -> bool {
        match self {
            Self::LowerCallIdWins => local < remote,
            Self::HigherCallIdWins => local > remote,
        }
    }
}

/// What an in-flight media acquisition is for.
#[derive(Clone, Copy, Debug)]
enum PendingKind {
    StartCall,
    AcceptCall,
}

#[derive(Clone, Copy, Debug)]
struct PendingStep {
    generation: u64,
    kind: PendingKind,
    call_id: CallId,
}

pub struct SessionManager<T, C>
where
    T: Platform,
    C: SignalTransport,
{
    platform: T,
    channel: SignalChannel<C>,
    local_user: Option<UserId>,
    config: CallConfig,

    /// The one session, live or terminal-awaiting-conclusion.
    session: Option<CallSession<T>>,

    /// Monotonic generation gating async capability completions.
    generation: u64,
    pending_step: Option<PendingStep>,

    /// Inbound messages for the active call, parked while a step is in
    /// flight, replayed in order once it resolves.
    deferred: VecDeque<SignalMessage>,

    /// At-least-once delivery means replays; consume each id once.
    seen_messages: DedupCache,

    /// Recently concluded calls, so stragglers for them don't ring again.
    concluded: RecentCallIds,
}

impl<T, C> SessionManager<T, C>
where
    T: Platform,
    C: SignalTransport,
{
    pub fn new(platform: T, transport: C, local_user: UserId, config: CallConfig) -> Self {
        info!(
            "nightcall v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        Self {
            platform,
            channel: SignalChannel::new(local_user.clone(), transport),
            local_user: Some(local_user),
            config,
            session: None,
            generation: 0,
            pending_step: None,
            deferred: VecDeque::new(),
            seen_messages: DedupCache::new(2048),
            concluded: RecentCallIds::new(32),
        }
    }

    pub fn platform(&self) -> &T {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut T {
        &mut self.platform
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    ////////////////////////////////////////////////////////////////////////
    // Intents from the presentation layer
    ////////////////////////////////////////////////////////////////////////

    /// Start an outgoing call. Valid only with no live session.
    pub fn start_call(&mut self, target: UserId) -> Result<CallId> {
        callflow!(
            CallFlow::Application,
            CallFlow::SessionManager,
            format!("start_call({})", target)
        );
        let local = self.local_user.clone().ok_or(CallError::NoIdentity)?;
        if let Some(session) = &self.session {
            if !session.is_terminal() {
                return Err(CallError::CallAlreadyInProgress(session.call_id).into());
            }
            self.conclude();
        }

        let call_id = CallId::random();
        let now = Instant::now();
        let mut session = CallSession::outgoing(call_id, target.clone(), now);
        session.deadline = Some(now + self.config.ringing_timeout);
        self.session = Some(session);

        self.channel.publish(&SignalMessage::new(
            local,
            target,
            call_id,
            Payload::IncomingCall,
        ));
        self.begin_media_acquisition(call_id, PendingKind::StartCall);
        Ok(call_id)
    }

    /// Accept the ringing incoming call.
    pub fn accept_call(&mut self, call_id: CallId) -> Result<()> {
        callflow!(
            CallFlow::Application,
            CallFlow::SessionManager,
            format!("accept_call({})", call_id)
        );
        let local = self.local_user.clone().ok_or(CallError::NoIdentity)?;
        let remote = {
            let session = self.session.as_ref().ok_or(CallError::NoActiveCall)?;
            if session.state() != CallState::Receiving {
                return Err(CallError::InvalidState {
                    intent: "accept_call",
                    state: session.state(),
                }
                .into());
            }
            if session.call_id != call_id {
                return Err(CallError::CallIdMismatch {
                    expected: session.call_id,
                    got: call_id,
                }
                .into());
            }
            session.remote_user.clone()
        };

        // Stop the caller's ring right away; the answer follows once local
        // media and the cached offer are both in hand.
        self.channel.publish(&SignalMessage::new(
            local,
            remote,
            call_id,
            Payload::CallAccepted,
        ));
        self.begin_media_acquisition(call_id, PendingKind::AcceptCall);
        Ok(())
    }

    /// Decline the ringing incoming call.
    pub fn reject_call(&mut self, call_id: CallId) -> Result<()> {
        callflow!(
            CallFlow::Application,
            CallFlow::SessionManager,
            format!("reject_call({})", call_id)
        );
        let local = self.local_user.clone().ok_or(CallError::NoIdentity)?;
        let remote = {
            let session = self.session.as_ref().ok_or(CallError::NoActiveCall)?;
            if session.state() != CallState::Receiving {
                return Err(CallError::InvalidState {
                    intent: "reject_call",
                    state: session.state(),
                }
                .into());
            }
            if session.call_id != call_id {
                return Err(CallError::CallIdMismatch {
                    expected: session.call_id,
                    got: call_id,
                }
                .into());
            }
            session.remote_user.clone()
        };

        self.channel.publish(&SignalMessage::new(
            local,
            remote,
            call_id,
            Payload::CallRejected,
        ));
        self.teardown(CallState::Ended, None, SessionEvent::EndedLocalDeclined);
        Ok(())
    }

    /// Hang up. Valid from any non-terminal state, including while an
    /// asynchronous step is still pending.
    pub fn end_call(&mut self) -> Result<()> {
        callflow!(
            CallFlow::Application,
            CallFlow::SessionManager,
            "end_call()"
        );
        match &self.session {
            Some(session) if !session.is_terminal() => {}
            _ => {
                info!("end_call(): no active call");
                return Ok(());
            }
        }
        self.publish_to_remote(Payload::CallEnded);
        if let Some(session) = self.session.as_mut() {
            session.set_state(CallState::Ending);
        }
        self.teardown(CallState::Ended, None, SessionEvent::EndedLocalHangup);
        Ok(())
    }

    /// Flip the local audio mute flag. Purely local; the peer is not
    /// notified. Returns the new `is_muted` value.
    pub fn toggle_mute(&mut self) -> Result<bool> {
        let session = Self::connected_session(&mut self.session, "toggle_mute")?;
        session.muted = !session.muted;
        let muted = session.muted;
        if let Some(stream) = session.local_stream.as_ref() {
            self.platform.set_audio_enabled(stream, !muted);
        }
        Ok(muted)
    }

    /// Flip the local video flag. Returns the new `is_video_off` value.
    pub fn toggle_video(&mut self) -> Result<bool> {
        let session = Self::connected_session(&mut self.session, "toggle_video")?;
        session.video_enabled = !session.video_enabled;
        let enabled = session.video_enabled;
        if let Some(stream) = session.local_stream.as_ref() {
            self.platform.set_video_enabled(stream, enabled);
        }
        Ok(!enabled)
    }

    /// Swap the capture device, replacing the outgoing video track in
    /// place. No SDP round-trip.
    pub fn switch_camera(&mut self) -> Result<()> {
        let session = Self::connected_session(&mut self.session, "switch_camera")?;
        let stream = session
            .local_stream
            .as_ref()
            .ok_or(CallError::NoActiveCall)?;
        let track = self.platform.switch_camera(stream)?;
        match session.connection.as_mut() {
            Some(connection) => connection.replace_video_track(track),
            None => Err(CallError::NoActiveCall.into()),
        }
    }

    fn connected_session<'a>(
        session: &'a mut Option<CallSession<T>>,
        intent: &'static str,
    ) -> std::result::Result<&'a mut CallSession<T>, CallError> {
        let session = session.as_mut().ok_or(CallError::NoActiveCall)?;
        match session.state() {
            CallState::Connecting | CallState::Active => Ok(session),
            state => Err(CallError::InvalidState { intent, state }),
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Identity
    ////////////////////////////////////////////////////////////////////////

    /// Follow the identity source. Losing (or changing) the identity
    /// mid-call forces an implicit hangup.
    pub fn set_identity(&mut self, identity: Option<UserId>) {
        let changed = self.local_user != identity;
        if changed {
            let mid_call = self
                .session
                .as_ref()
                .map(|s| !s.is_terminal())
                .unwrap_or(false);
            if mid_call {
                info!("identity changed mid-call; hanging up");
                self.publish_to_remote(Payload::CallEnded);
                self.teardown(CallState::Ended, None, SessionEvent::EndedIdentityLost);
            }
        }
        match &identity {
            Some(user) => self.channel.set_local_user(user.clone()),
            None => self.channel.unsubscribe(),
        }
        self.local_user = identity;
    }

    ////////////////////////////////////////////////////////////////////////
    // Capability completions from the platform glue
    ////////////////////////////////////////////////////////////////////////

    /// Completion of an `acquire_media` request. A stale generation means
    /// the call moved on while the acquisition was in flight: the stream
    /// is stopped and nothing else happens.
    pub fn media_acquired(
        &mut self,
        generation: u64,
        result: std::result::Result<T::MediaStream, CallError>,
    ) {
        let step = match self.pending_step {
            Some(step) if step.generation == generation => step,
            _ => {
                if let Ok(stream) = result {
                    info!("stale media acquisition (generation {}); releasing", generation);
                    self.platform.stop_media(&stream);
                }
                return;
            }
        };
        self.pending_step = None;

        let session_matches = self
            .session
            .as_ref()
            .map(|s| s.call_id == step.call_id && !s.is_terminal())
            .unwrap_or(false);
        if !session_matches {
            if let Ok(stream) = result {
                self.platform.stop_media(&stream);
            }
            return;
        }

        match result {
            Err(error) => {
                warn!("media acquisition failed for {}: {}", step.call_id, error);
                self.publish_to_remote(Payload::CallEnded);
                self.teardown(
                    CallState::Failed,
                    Some(error),
                    SessionEvent::EndedMediaFailure,
                );
            }
            Ok(stream) => match step.kind {
                PendingKind::StartCall => self.continue_start(step.call_id, stream),
                PendingKind::AcceptCall => self.continue_accept(stream),
            },
        }

        self.pump_deferred();
    }

    /// A locally gathered ICE candidate from the peer connection glue.
    pub fn local_ice_candidate(&mut self, candidate: IceCandidate) {
        match &self.session {
            Some(session) if !session.is_terminal() => {
                self.publish_to_remote(Payload::IceCandidate(candidate));
            }
            _ => debug!("dropping local candidate with no live call"),
        }
    }

    /// The first remote track moves the call to `Active` and starts the
    /// duration clock.
    pub fn remote_track(&mut self, stream: T::MediaStream) {
        let session = match self.session.as_mut() {
            Some(session) if !session.is_terminal() => session,
            _ => {
                debug!("dropping remote track with no live call");
                return;
            }
        };
        if session.remote_stream.is_some() {
            return;
        }
        session.remote_stream = Some(stream);
        if session.state() == CallState::Connecting {
            session.connected_at = Some(Instant::now());
            session.deadline = None;
            session.set_state(CallState::Active);
            self.platform.on_event(SessionEvent::Connected);
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Channel pump and time
    ////////////////////////////////////////////////////////////////////////

    /// Drain and apply everything currently delivered on the channel.
    pub fn poll(&mut self) {
        for message in self.channel.poll() {
            self.handle_signal(message);
        }
    }

    /// Drive timeouts and duration. An explicit `end_call()` always
    /// preempts a timeout because teardown clears the deadline.
    pub fn tick(&mut self, now: Instant) {
        let expired_state = match &self.session {
            Some(session) if !session.is_terminal() => match session.deadline {
                Some(deadline) if now >= deadline => Some(session.state()),
                _ => None,
            },
            _ => None,
        };

        match expired_state {
            Some(CallState::Calling) => {
                info!("ringing timeout: no answer");
                self.publish_to_remote(Payload::CallEnded);
                self.teardown(
                    CallState::Failed,
                    Some(CallError::NoAnswer),
                    SessionEvent::EndedNoAnswer,
                );
            }
            Some(CallState::Receiving) => {
                // Missed call; the caller times out on its own side.
                info!("ringing timeout: not accepted");
                self.teardown(
                    CallState::Failed,
                    Some(CallError::NoAnswer),
                    SessionEvent::EndedNoAnswer,
                );
            }
            Some(CallState::Connecting) => {
                info!("connect timeout: media path never came up");
                self.publish_to_remote(Payload::CallEnded);
                self.teardown(
                    CallState::Failed,
                    Some(CallError::ConnectTimeout),
                    SessionEvent::EndedConnectTimeout,
                );
            }
            _ => {}
        }

        if let Some(session) = self.session.as_mut() {
            session.tick_duration(now);
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Presentation surface
    ////////////////////////////////////////////////////////////////////////

    /// Read-only state for rendering.
    pub fn snapshot(&self) -> SessionSnapshot<T::MediaStream> {
        match &self.session {
            None => SessionSnapshot::idle(),
            Some(session) => SessionSnapshot {
                call_state: session.state(),
                call_id: Some(session.call_id),
                remote_user: Some(session.remote_user.clone()),
                direction: Some(session.direction),
                local_stream: session.local_stream.clone(),
                remote_stream: session.remote_stream.clone(),
                is_muted: session.muted,
                is_video_off: !session.video_enabled,
                is_connected: session.state() == CallState::Active,
                formatted_duration: session.formatted_duration(),
                error: session.error.clone(),
            },
        }
    }

    /// The presentation layer has observed the terminal state; return to
    /// `Idle`. A no-op for a live call.
    pub fn conclude(&mut self) {
        match &self.session {
            Some(session) if session.is_terminal() => {
                info!("call {} concluded", session.call_id);
                self.session = None;
            }
            Some(session) => {
                warn!("conclude() with live call {}; ignoring", session.call_id);
            }
            None => {}
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Inbound signaling
    ////////////////////////////////////////////////////////////////////////

    fn handle_signal(&mut self, message: SignalMessage) {
        if !self.seen_messages.insert(&message.id) {
            debug!("dropping duplicate message {}", message);
            return;
        }
        if self.concluded.contains(message.call_id) {
            debug!("dropping {} for concluded call", message);
            return;
        }
        if let Some(step) = &self.pending_step {
            if step.call_id == message.call_id {
                debug!("deferring {} behind in-flight step", message);
                self.deferred.push_back(message);
                return;
            }
        }
        self.dispatch_signal(message);
    }

    /// Replay deferred messages in order; stop if one of them starts a new
    /// in-flight step.
    fn pump_deferred(&mut self) {
        while self.pending_step.is_none() {
            match self.deferred.pop_front() {
                Some(message) => self.dispatch_signal(message),
                None => break,
            }
        }
    }

    fn dispatch_signal(&mut self, message: SignalMessage) {
        match message.typ() {
            MessageType::IncomingCall => self.handle_incoming_call(message),
            MessageType::Offer => self.handle_offer(message),
            MessageType::Answer => self.handle_answer(message),
            MessageType::IceCandidate => self.handle_ice_candidate(message),
            MessageType::CallAccepted => self.handle_call_accepted(message),
            MessageType::CallRejected => self.handle_call_rejected(message),
            MessageType::CallEnded => self.handle_call_ended(message),
        }
    }

    fn handle_incoming_call(&mut self, message: SignalMessage) {
        let age = Duration::from_millis(message.age_millis(now_millis()));
        if age > self.config.max_message_age {
            info!("ignoring expired {} (age {:?})", message, age);
            return;
        }

        if self
            .session
            .as_ref()
            .map(|s| s.is_terminal())
            .unwrap_or(false)
        {
            self.conclude();
        }

        let session = match &self.session {
            None => {
                self.ring_incoming(message);
                return;
            }
            Some(session) => session,
        };

        if session.call_id == message.call_id {
            debug!("duplicate ring for current call {}", session.call_id);
            return;
        }

        let glare = session.direction == crate::common::CallDirection::Outgoing
            && session.state() == CallState::Calling
            && session.remote_user == message.from_user_id;
        if glare {
            let ours = session.call_id;
            let theirs = message.call_id;
            if self.config.glare.local_wins(ours, theirs) {
                info!("glare: local attempt {} wins over {}", ours, theirs);
                // The peer applies the same rule and cancels its attempt.
                return;
            }
            info!("glare: local attempt {} loses to {}", ours, theirs);
            self.cancel_local_attempt();
            self.platform.on_event(SessionEvent::EndedGlare);
            self.ring_incoming(message);
            return;
        }

        // Busy: decline the new call without touching the live session.
        info!("busy: declining {} during {}", message, session.call_id);
        if let Some(local) = self.local_user.clone() {
            self.channel.publish(&SignalMessage::new(
                local,
                message.from_user_id,
                message.call_id,
                Payload::CallRejected,
            ));
        }
    }

    fn ring_incoming(&mut self, message: SignalMessage) {
        let now = Instant::now();
        let mut session = CallSession::incoming(message.call_id, message.from_user_id, now);
        session.deadline = Some(now + self.config.ringing_timeout);
        self.session = Some(session);
        self.platform.on_event(SessionEvent::LocalRinging);
    }

    fn handle_offer(&mut self, message: SignalMessage) {
        let sdp = match message.payload {
            Payload::Offer(sdp) => sdp,
            _ => return,
        };
        let run_accept = {
            let session = match self.session.as_mut() {
                Some(session) if session.call_id == message.call_id => session,
                _ => {
                    warn!("dropping offer for unknown call {}", message.call_id);
                    return;
                }
            };
            if session.state() != CallState::Receiving {
                // Already negotiating or beyond; a replayed offer is noise.
                debug!("ignoring offer in state {}", session.state());
                return;
            }
            session.cached_offer = Some(sdp);
            session.accept_pending && session.local_stream.is_some()
        };
        if run_accept {
            self.negotiate_answer();
        }
    }

    fn handle_answer(&mut self, message: SignalMessage) {
        let sdp = match message.payload {
            Payload::Answer(sdp) => sdp,
            _ => return,
        };
        let applied = {
            let session = match self.session.as_mut() {
                Some(session) if session.call_id == message.call_id => session,
                _ => {
                    warn!("dropping answer for unknown call {}", message.call_id);
                    return;
                }
            };
            if !matches!(session.state(), CallState::Calling | CallState::Connecting) {
                debug!("ignoring answer in state {}", session.state());
                return;
            }
            match session.connection.as_mut() {
                Some(connection) => connection.apply_answer(&sdp),
                None => {
                    warn!("answer before offer was sent for {}", message.call_id);
                    return;
                }
            }
        };
        match applied {
            Ok(()) => self.enter_connecting(),
            Err(e) => {
                warn!("failed to apply answer: {}", e);
                self.fail_negotiation(format!("remote answer rejected: {}", e));
            }
        }
    }

    fn handle_ice_candidate(&mut self, message: SignalMessage) {
        let candidate = match message.payload {
            Payload::IceCandidate(candidate) => candidate,
            _ => return,
        };
        let session = match self.session.as_mut() {
            Some(session)
                if session.call_id == message.call_id && !session.is_terminal() =>
            {
                session
            }
            _ => {
                debug!("dropping candidate for unknown call {}", message.call_id);
                return;
            }
        };
        match session.connection.as_mut() {
            Some(connection) => connection.add_remote_candidate(candidate),
            None => session.pending_ice_queue.push(candidate),
        }
    }

    fn handle_call_accepted(&mut self, message: SignalMessage) {
        match self.session.as_ref() {
            Some(session)
                if session.call_id == message.call_id
                    && session.state() == CallState::Calling => {}
            _ => {
                debug!("ignoring call-accepted {}", message);
                return;
            }
        }
        self.enter_connecting();
    }

    fn handle_call_rejected(&mut self, message: SignalMessage) {
        match self.session.as_ref() {
            Some(session)
                if session.call_id == message.call_id && !session.is_terminal() => {}
            _ => {
                debug!("ignoring call-rejected {}", message);
                return;
            }
        }
        info!("remote declined call {}", message.call_id);
        self.teardown(CallState::Ended, None, SessionEvent::EndedRemoteDeclined);
    }

    fn handle_call_ended(&mut self, message: SignalMessage) {
        match self.session.as_ref() {
            Some(session)
                if session.call_id == message.call_id && !session.is_terminal() => {}
            _ => {
                debug!("ignoring call-ended {}", message);
                return;
            }
        }
        info!("remote hung up call {}", message.call_id);
        self.teardown(CallState::Ended, None, SessionEvent::EndedRemoteHangup);
    }

    ////////////////////////////////////////////////////////////////////////
    // Internal transitions
    ////////////////////////////////////////////////////////////////////////

    fn begin_media_acquisition(&mut self, call_id: CallId, kind: PendingKind) {
        self.generation += 1;
        let generation = self.generation;
        self.pending_step = Some(PendingStep {
            generation,
            kind,
            call_id,
        });
        if let Err(e) = self.platform.acquire_media(call_id, generation) {
            warn!("media acquisition could not start: {}", e);
            self.pending_step = None;
            self.publish_to_remote(Payload::CallEnded);
            self.teardown(
                CallState::Failed,
                Some(CallError::DeviceUnavailable),
                SessionEvent::EndedMediaFailure,
            );
        }
    }

    /// Caller side, media in hand: negotiate and send the offer.
    fn continue_start(&mut self, call_id: CallId, stream: T::MediaStream) {
        let pc = match self.platform.create_peer_connection(call_id) {
            Ok(pc) => pc,
            Err(e) => {
                self.fail_negotiation(format!("peer connection creation failed: {}", e));
                return;
            }
        };
        let offer = {
            let session = match self.session.as_mut() {
                Some(session) => session,
                None => return,
            };
            session.local_stream = Some(stream.clone());
            let mut connection = Connection::<T>::new(call_id, pc);
            connection.preload_candidates(std::mem::take(&mut session.pending_ice_queue));
            let offer = connection.create_offer(&stream);
            session.connection = Some(connection);
            offer
        };
        match offer {
            Ok(offer) => {
                self.publish_to_remote(Payload::Offer(offer));
                self.platform.on_event(SessionEvent::RemoteRinging);
            }
            Err(e) => self.fail_negotiation(format!("offer creation failed: {}", e)),
        }
    }

    /// Callee side, media in hand: answer now if the offer is cached,
    /// otherwise wait for it (per-sender FIFO makes that a short wait).
    fn continue_accept(&mut self, stream: T::MediaStream) {
        let ready = {
            let session = match self.session.as_mut() {
                Some(session) => session,
                None => return,
            };
            session.local_stream = Some(stream);
            if session.cached_offer.is_none() {
                info!("accepted before offer arrived; waiting for it");
                session.accept_pending = true;
                false
            } else {
                true
            }
        };
        if ready {
            self.negotiate_answer();
        }
    }

    /// Callee side with both media and the cached offer: build the
    /// connection, apply the offer, publish the answer.
    fn negotiate_answer(&mut self) {
        let (call_id, stream, offer) = {
            let session = match self.session.as_mut() {
                Some(session) => session,
                None => return,
            };
            session.accept_pending = false;
            match (session.local_stream.clone(), session.cached_offer.clone()) {
                (Some(stream), Some(offer)) => (session.call_id, stream, offer),
                _ => return,
            }
        };
        let pc = match self.platform.create_peer_connection(call_id) {
            Ok(pc) => pc,
            Err(e) => {
                self.fail_negotiation(format!("peer connection creation failed: {}", e));
                return;
            }
        };
        let answer = {
            let session = match self.session.as_mut() {
                Some(session) => session,
                None => return,
            };
            let mut connection = Connection::<T>::new(call_id, pc);
            connection.preload_candidates(std::mem::take(&mut session.pending_ice_queue));
            let answer = connection.accept_offer(&stream, &offer);
            session.connection = Some(connection);
            answer
        };
        match answer {
            Ok(answer) => {
                self.publish_to_remote(Payload::Answer(answer));
                self.enter_connecting();
            }
            Err(e) => self.fail_negotiation(format!("answer creation failed: {}", e)),
        }
    }

    /// Ringing is over on this side; the media path is now on the clock.
    fn enter_connecting(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if session.state().rank() < CallState::Connecting.rank() {
                session.set_state(CallState::Connecting);
                session.deadline = Some(Instant::now() + self.config.connect_timeout);
            }
        }
    }

    /// Glare loss: drop the local attempt without signaling. The peer
    /// never learns our call id existed.
    fn cancel_local_attempt(&mut self) {
        self.generation += 1;
        self.pending_step = None;
        self.deferred.clear();
        if let Some(session) = self.session.take() {
            if let Some(stream) = session.local_stream.as_ref() {
                self.platform.stop_media(stream);
            }
            // Connection close happens on drop; nothing has been sent yet
            // beyond incoming-call/offer, which the peer discards.
            self.concluded.remember(session.call_id);
        }
    }

    fn fail_negotiation(&mut self, detail: String) {
        self.publish_to_remote(Payload::CallEnded);
        self.teardown(
            CallState::Failed,
            Some(CallError::Negotiation(detail)),
            SessionEvent::EndedNegotiationFailure,
        );
    }

    fn publish_to_remote(&mut self, payload: Payload) {
        let (local, session) = match (self.local_user.clone(), self.session.as_ref()) {
            (Some(local), Some(session)) => (local, session),
            _ => return,
        };
        self.channel.publish(&SignalMessage::new(
            local,
            session.remote_user.clone(),
            session.call_id,
            payload,
        ));
    }

    /// The one exit path. Releases every resource the session owns and
    /// invalidates any in-flight asynchronous step; a stale completion can
    /// only release its own resource afterwards.
    fn teardown(&mut self, final_state: CallState, error: Option<CallError>, event: SessionEvent) {
        self.generation += 1;
        self.pending_step = None;
        self.deferred.clear();
        if let Some(session) = self.session.as_mut() {
            if let Some(stream) = session.local_stream.as_ref() {
                self.platform.stop_media(stream);
            }
            session.remote_stream = None;
            if let Some(connection) = session.connection.as_mut() {
                connection.close();
            }
            session.pending_ice_queue.clear();
            session.cached_offer = None;
            session.accept_pending = false;
            session.deadline = None;
            session.ended_at = Some(Instant::now());
            session.error = error;
            session.set_state(final_state);
            self.concluded.remember(session.call_id);
        }
        self.platform.on_event(event);
    }
}

/// Bounded first-seen cache over message ids.
struct DedupCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupCache {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns true the first time an id is seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

/// Bounded ring of recently concluded call ids.
struct RecentCallIds {
    order: VecDeque<CallId>,
    capacity: usize,
}

impl RecentCallIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            capacity,
        }
    }

    fn remember(&mut self, call_id: CallId) {
        if self.contains(call_id) {
            return;
        }
        self.order.push_back(call_id);
        while self.order.len() > self.capacity {
            self.order.pop_front();
        }
    }

    fn contains(&self, call_id: CallId) -> bool {
        self.order.contains(&call_id)
    }
}
