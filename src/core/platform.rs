//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! Platform trait describing the capabilities the embedding application
//! must supply for calling: media devices, peer connections, and the
//! presentation-facing notification surface.

use std::fmt;

use crate::common::{CallId, Result, SessionEvent};
use crate::webrtc::peer_connection::PeerConnection;

/// A trait encompassing the traits the platform associated types must
/// implement.
pub trait PlatformItem: Clone + fmt::Debug + 'static {}

/// The capability surface of the embedding application.
///
/// Media acquisition is asynchronous by nature (permission prompts, device
/// warm-up): `acquire_media` only starts the acquisition, and the platform
/// glue later completes it by calling
/// `SessionManager::media_acquired(generation, result)` with the same
/// generation number. Everything else is a direct call.
pub trait Platform: fmt::Debug + Sized + 'static {
    /// Handle to a local or remote media stream (audio + video tracks).
    type MediaStream: PlatformItem + PartialEq;

    /// Handle to one outgoing video track, for camera switching.
    type VideoTrack: PlatformItem;

    /// The peer connection primitive this platform drives.
    type PeerConnection: PeerConnection<
        MediaStream = Self::MediaStream,
        VideoTrack = Self::VideoTrack,
    >;

    /// Begin acquiring the local audio+video stream for `call_id`.
    ///
    /// The completion must carry `generation` back so that a result
    /// arriving after the call moved on is recognized as stale.
    fn acquire_media(&mut self, call_id: CallId, generation: u64) -> Result<()>;

    /// Stop all tracks of a stream and release the devices.
    fn stop_media(&mut self, stream: &Self::MediaStream);

    /// Enable/disable the audio track in place.
    fn set_audio_enabled(&mut self, stream: &Self::MediaStream, enabled: bool);

    /// Enable/disable the video track in place.
    fn set_video_enabled(&mut self, stream: &Self::MediaStream, enabled: bool);

    /// Switch the capture device and hand back the replacement track. The
    /// stream keeps its identity; only the video source changes.
    fn switch_camera(&mut self, stream: &Self::MediaStream) -> Result<Self::VideoTrack>;

    /// Create a peer connection for `call_id`.
    fn create_peer_connection(&mut self, call_id: CallId) -> Result<Self::PeerConnection>;

    /// Notify the presentation layer about a session event.
    fn on_event(&self, event: SessionEvent);
}
