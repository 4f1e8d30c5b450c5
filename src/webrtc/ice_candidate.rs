//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! ICE candidate type passed between peers through signaling.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A discovered network path endpoint.
///
/// Mirrors the shape the peer connection capability produces; the core
/// treats the `candidate` body as opaque.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_mline_index: Option<u32>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }
}

impl fmt::Debug for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Candidate bodies carry addresses; keep them out of logs.
        write!(
            f,
            "IceCandidate(mid: {:?}, mline: {:?}, {} bytes)",
            self.sdp_mid,
            self.sdp_mline_index,
            self.candidate.len()
        )
    }
}
