//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! Peer connection orchestrator.
//!
//! Owns the peer connection capability for one call and the ordering rules
//! around it: offers/answers are created and applied here, and inbound ICE
//! candidates that arrive before a remote description exists are buffered
//! and flushed in arrival order the moment it is set.

use crate::common::{CallFlow, CallId, Result};
use crate::core::platform::Platform;
use crate::webrtc::ice_candidate::IceCandidate;
use crate::webrtc::peer_connection::PeerConnection;
use crate::webrtc::sdp::SessionDescription;

pub struct Connection<T>
where
    T: Platform,
{
    call_id: CallId,
    pc: Option<T::PeerConnection>,
    have_remote_description: bool,
    /// Candidates received before the remote description, arrival order.
    pending_remote_candidates: Vec<IceCandidate>,
}

impl<T> Connection<T>
where
    T: Platform,
{
    pub fn new(call_id: CallId, pc: T::PeerConnection) -> Self {
        Self {
            call_id,
            pc: Some(pc),
            have_remote_description: false,
            pending_remote_candidates: Vec::new(),
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn have_remote_description(&self) -> bool {
        self.have_remote_description
    }

    pub fn pending_remote_candidates(&self) -> usize {
        self.pending_remote_candidates.len()
    }

    fn pc(&mut self) -> Result<&mut T::PeerConnection> {
        self.pc
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("peer connection already closed"))
    }

    /// Caller side: attach local media, create the offer, set it locally.
    pub fn create_offer(&mut self, stream: &T::MediaStream) -> Result<SessionDescription> {
        callflow!(
            CallFlow::Connection,
            CallFlow::Signaling,
            format!("create_offer({})", self.call_id)
        );
        let pc = self.pc()?;
        pc.add_outgoing_media(stream)?;
        let offer = pc.create_offer()?;
        pc.set_local_description(&offer)?;
        Ok(offer)
    }

    /// Callee side: attach local media, apply the cached offer, answer.
    /// Buffered candidates flush as soon as the remote description lands.
    pub fn accept_offer(
        &mut self,
        stream: &T::MediaStream,
        offer: &SessionDescription,
    ) -> Result<SessionDescription> {
        callflow!(
            CallFlow::Connection,
            CallFlow::Signaling,
            format!("accept_offer({})", self.call_id)
        );
        self.pc()?.add_outgoing_media(stream)?;
        self.apply_remote_description(offer)?;
        let pc = self.pc()?;
        let answer = pc.create_answer()?;
        pc.set_local_description(&answer)?;
        Ok(answer)
    }

    /// Caller side: apply the answer as the remote description.
    pub fn apply_answer(&mut self, answer: &SessionDescription) -> Result<()> {
        callflow!(
            CallFlow::Connection,
            CallFlow::Signaling,
            format!("apply_answer({})", self.call_id)
        );
        self.apply_remote_description(answer)
    }

    fn apply_remote_description(&mut self, desc: &SessionDescription) -> Result<()> {
        self.pc()?.set_remote_description(desc)?;
        self.have_remote_description = true;
        self.flush_pending_candidates();
        Ok(())
    }

    /// Accept one inbound candidate: applied immediately once a remote
    /// description is set, buffered until then.
    pub fn add_remote_candidate(&mut self, candidate: IceCandidate) {
        if !self.have_remote_description {
            self.pending_remote_candidates.push(candidate);
            return;
        }
        self.apply_candidate(&candidate);
    }

    /// Take over candidates the session buffered before this connection
    /// existed, keeping their original arrival order ahead of anything
    /// received since.
    pub fn preload_candidates(&mut self, candidates: Vec<IceCandidate>) {
        let received_since = std::mem::replace(&mut self.pending_remote_candidates, candidates);
        self.pending_remote_candidates.extend(received_since);
        if self.have_remote_description {
            self.flush_pending_candidates();
        }
    }

    fn flush_pending_candidates(&mut self) {
        let pending = std::mem::take(&mut self.pending_remote_candidates);
        if !pending.is_empty() {
            debug!(
                "flushing {} buffered candidate(s) for {}",
                pending.len(),
                self.call_id
            );
        }
        for candidate in &pending {
            self.apply_candidate(candidate);
        }
    }

    fn apply_candidate(&mut self, candidate: &IceCandidate) {
        // A single bad candidate is not worth failing the call over; the
        // remaining candidates can still complete the path.
        let call_id = self.call_id;
        match self.pc() {
            Ok(pc) => {
                if let Err(e) = pc.add_ice_candidate(candidate) {
                    warn!("dropping rejected candidate for {}: {}", call_id, e);
                }
            }
            Err(_) => warn!("dropping candidate for closed connection {}", call_id),
        }
    }

    pub fn replace_video_track(&mut self, track: T::VideoTrack) -> Result<()> {
        self.pc()?.replace_video_track(track)
    }

    /// Idempotent teardown. Dropping the handle here is what guarantees no
    /// capability callback can land in a destroyed session.
    pub fn close(&mut self) {
        if let Some(mut pc) = self.pc.take() {
            callflow!(
                CallFlow::Connection,
                CallFlow::Signaling,
                format!("close({})", self.call_id)
            );
            pc.close();
        }
        self.pending_remote_candidates.clear();
    }
}

impl<T> Drop for Connection<T>
where
    T: Platform,
{
    fn drop(&mut self) {
        self.close();
    }
}
