//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! # Nightcall -- real-time call signaling for Velvet Room
//!
//! This crate owns the client-side half of a 1:1 audio/video call: the
//! signaling protocol spoken over the app's pub/sub feed and the state
//! machine governing one call's lifecycle, from `start_call()` through
//! media negotiation to teardown.
//!
//! The WebRTC-like peer connection itself and the device layer are
//! *capabilities* supplied by the embedding application through the
//! [`core::platform::Platform`] trait; nightcall drives them but never
//! reimplements them.

#[macro_use]
extern crate log;

#[macro_use]
pub mod common;

mod error;

pub use error::CallError;

/// Core, platform independent functionality.
pub mod core {
    pub mod channel;
    pub mod connection;
    pub mod platform;
    pub mod session;
    pub mod session_manager;
    pub mod signaling;
    pub mod util;
}

/// Types for the peer connection capability consumed by the core.
pub mod webrtc {
    pub mod ice_candidate;
    pub mod peer_connection;
    pub mod sdp;
}

#[cfg(feature = "sim")]
pub mod sim {
    pub mod router;
    pub mod sim_platform;
}
