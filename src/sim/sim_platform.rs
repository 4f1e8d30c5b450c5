//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! Simulation platform: an instrumented, in-memory implementation of the
//! platform capabilities, for testing the session manager without real
//! devices or a real peer connection stack.
//!
//! The platform records every capability request. Media acquisition never
//! completes on its own; the test observes the request via
//! `take_pending_acquire()` and completes it through
//! `SessionManager::media_acquired()`, which is exactly the seam the real
//! glue uses and the one that makes cancellation races reproducible.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::{CallId, Result, SessionEvent};
use crate::core::platform::{Platform, PlatformItem};
use crate::error::CallError;
use crate::webrtc::ice_candidate::IceCandidate;
use crate::webrtc::peer_connection::PeerConnection;
use crate::webrtc::sdp::SessionDescription;

/// Simulation stream handle. Identity is the label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimMediaStream {
    pub label: String,
}

impl SimMediaStream {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl PlatformItem for SimMediaStream {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimVideoTrack {
    pub source: String,
}

impl PlatformItem for SimVideoTrack {}

/// Everything a simulated peer connection was asked to do, for assertions.
#[derive(Clone, Debug, Default)]
pub struct PcObservations {
    pub outgoing_streams: Vec<SimMediaStream>,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    /// Candidates in the order they were applied.
    pub added_candidates: Vec<IceCandidate>,
    pub replaced_tracks: Vec<SimVideoTrack>,
    pub close_count: u32,
}

pub struct SimPeerConnection {
    call_id: CallId,
    fail_negotiation: bool,
    observations: Arc<Mutex<PcObservations>>,
}

impl SimPeerConnection {
    fn lock(&self) -> MutexGuard<'_, PcObservations> {
        self.observations.lock().expect("poisoned pc lock")
    }
}

impl PeerConnection for SimPeerConnection {
    type MediaStream = SimMediaStream;
    type VideoTrack = SimVideoTrack;

    fn add_outgoing_media(&mut self, stream: &SimMediaStream) -> Result<()> {
        self.lock().outgoing_streams.push(stream.clone());
        Ok(())
    }

    fn create_offer(&mut self) -> Result<SessionDescription> {
        if self.fail_negotiation {
            return Err(anyhow::anyhow!("simulated offer failure"));
        }
        Ok(SessionDescription::offer(format!(
            "v=0 sim offer {}",
            self.call_id.to_hex()
        )))
    }

    fn create_answer(&mut self) -> Result<SessionDescription> {
        if self.fail_negotiation {
            return Err(anyhow::anyhow!("simulated answer failure"));
        }
        Ok(SessionDescription::answer(format!(
            "v=0 sim answer {}",
            self.call_id.to_hex()
        )))
    }

    fn set_local_description(&mut self, desc: &SessionDescription) -> Result<()> {
        self.lock().local_description = Some(desc.clone());
        Ok(())
    }

    fn set_remote_description(&mut self, desc: &SessionDescription) -> Result<()> {
        if self.fail_negotiation {
            return Err(anyhow::anyhow!("simulated remote description failure"));
        }
        self.lock().remote_description = Some(desc.clone());
        Ok(())
    }

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<()> {
        // A candidate body starting with "bad" simulates stack rejection.
        if candidate.candidate.starts_with("bad") {
            return Err(anyhow::anyhow!("simulated candidate rejection"));
        }
        self.lock().added_candidates.push(candidate.clone());
        Ok(())
    }

    fn replace_video_track(&mut self, track: SimVideoTrack) -> Result<()> {
        self.lock().replaced_tracks.push(track);
        Ok(())
    }

    fn close(&mut self) {
        self.lock().close_count += 1;
    }
}

impl fmt::Debug for SimPeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SimPeerConnection({})", self.call_id)
    }
}

#[derive(Default)]
struct PlatformState {
    pending_acquires: Vec<(CallId, u64)>,
    stopped_streams: Vec<SimMediaStream>,
    audio_settings: Vec<(SimMediaStream, bool)>,
    video_settings: Vec<(SimMediaStream, bool)>,
    camera_switches: u32,
    events: Vec<SessionEvent>,
    peer_connections: Vec<Arc<Mutex<PcObservations>>>,
    fail_acquire: bool,
    fail_negotiation: bool,
}

/// Clones share state, so a test can keep a handle while the manager owns
/// the platform.
#[derive(Clone, Default)]
pub struct SimPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().expect("poisoned platform lock")
    }

    /// Next `acquire_media` request, oldest first.
    pub fn take_pending_acquire(&self) -> Option<(CallId, u64)> {
        let mut state = self.lock();
        if state.pending_acquires.is_empty() {
            None
        } else {
            Some(state.pending_acquires.remove(0))
        }
    }

    /// The stream the glue would hand back for a completed acquisition.
    pub fn stream_for(&self, call_id: CallId) -> SimMediaStream {
        SimMediaStream::new(format!("local-{}", call_id.to_hex()))
    }

    /// Make `acquire_media` fail synchronously.
    pub fn set_fail_acquire(&self, fail: bool) {
        self.lock().fail_acquire = fail;
    }

    /// Make peer connections created from now on fail negotiation calls.
    pub fn set_fail_negotiation(&self, fail: bool) {
        self.lock().fail_negotiation = fail;
    }

    pub fn stopped_streams(&self) -> Vec<SimMediaStream> {
        self.lock().stopped_streams.clone()
    }

    pub fn audio_settings(&self) -> Vec<(SimMediaStream, bool)> {
        self.lock().audio_settings.clone()
    }

    pub fn video_settings(&self) -> Vec<(SimMediaStream, bool)> {
        self.lock().video_settings.clone()
    }

    pub fn camera_switches(&self) -> u32 {
        self.lock().camera_switches
    }

    /// Drain the event log.
    pub fn take_events(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.lock().events)
    }

    pub fn event_count(&self, event: SessionEvent) -> usize {
        self.lock().events.iter().filter(|e| **e == event).count()
    }

    /// Observations of the most recently created peer connection.
    pub fn last_pc(&self) -> Option<PcObservations> {
        self.lock()
            .peer_connections
            .last()
            .map(|pc| pc.lock().expect("poisoned pc lock").clone())
    }

    pub fn peer_connection_count(&self) -> usize {
        self.lock().peer_connections.len()
    }
}

impl fmt::Debug for SimPlatform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.lock();
        write!(
            f,
            "SimPlatform(pending: {}, pcs: {}, events: {})",
            state.pending_acquires.len(),
            state.peer_connections.len(),
            state.events.len()
        )
    }
}

impl Platform for SimPlatform {
    type MediaStream = SimMediaStream;
    type VideoTrack = SimVideoTrack;
    type PeerConnection = SimPeerConnection;

    fn acquire_media(&mut self, call_id: CallId, generation: u64) -> Result<()> {
        let mut state = self.lock();
        if state.fail_acquire {
            return Err(CallError::DeviceUnavailable.into());
        }
        info!("sim: acquire_media({}, generation {})", call_id, generation);
        state.pending_acquires.push((call_id, generation));
        Ok(())
    }

    fn stop_media(&mut self, stream: &SimMediaStream) {
        info!("sim: stop_media({})", stream.label);
        self.lock().stopped_streams.push(stream.clone());
    }

    fn set_audio_enabled(&mut self, stream: &SimMediaStream, enabled: bool) {
        self.lock().audio_settings.push((stream.clone(), enabled));
    }

    fn set_video_enabled(&mut self, stream: &SimMediaStream, enabled: bool) {
        self.lock().video_settings.push((stream.clone(), enabled));
    }

    fn switch_camera(&mut self, stream: &SimMediaStream) -> Result<SimVideoTrack> {
        let mut state = self.lock();
        state.camera_switches += 1;
        Ok(SimVideoTrack {
            source: format!("camera-{}-{}", state.camera_switches, stream.label),
        })
    }

    fn create_peer_connection(&mut self, call_id: CallId) -> Result<SimPeerConnection> {
        let mut state = self.lock();
        let observations = Arc::new(Mutex::new(PcObservations::default()));
        state.peer_connections.push(observations.clone());
        Ok(SimPeerConnection {
            call_id,
            fail_negotiation: state.fail_negotiation,
            observations,
        })
    }

    fn on_event(&self, event: SessionEvent) {
        info!("sim: on_event({})", event);
        self.lock().events.push(event);
    }
}
