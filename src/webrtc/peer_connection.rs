//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! The peer connection capability consumed by the core.
//!
//! The embedding application supplies an implementation backed by its real
//! WebRTC stack; the `sim` feature supplies one for tests. The core drives
//! this interface and never reaches around it.

use crate::common::Result;
use crate::webrtc::ice_candidate::IceCandidate;
use crate::webrtc::sdp::SessionDescription;

/// One peer connection, scoped to a single call.
///
/// Locally gathered candidates and incoming remote tracks are reported by
/// the embedding glue through `SessionManager::local_ice_candidate()` and
/// `SessionManager::remote_track()` rather than callbacks held here, so
/// that closing the connection is all it takes to silence it.
pub trait PeerConnection {
    /// Handle to a local media stream (audio + video tracks).
    type MediaStream;

    /// Handle to a single outgoing video track.
    type VideoTrack;

    /// Attach the local stream's tracks before negotiation starts.
    fn add_outgoing_media(&mut self, stream: &Self::MediaStream) -> Result<()>;

    fn create_offer(&mut self) -> Result<SessionDescription>;

    fn create_answer(&mut self) -> Result<SessionDescription>;

    fn set_local_description(&mut self, desc: &SessionDescription) -> Result<()>;

    fn set_remote_description(&mut self, desc: &SessionDescription) -> Result<()>;

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<()>;

    /// Swap the outgoing video track in place, without renegotiation.
    fn replace_video_track(&mut self, track: Self::VideoTrack) -> Result<()>;

    /// Tear down the connection. Must be safe to call more than once.
    fn close(&mut self);
}
