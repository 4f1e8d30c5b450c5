//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! Common error codes.

use thiserror::Error;

use crate::common::{CallId, CallState};

/// Platform independent error conditions.
///
/// The `Failed` terminal state always carries one of these; everything the
/// presentation layer may need to message about is represented here.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum CallError {
    // Fatal conditions surfaced on the session.
    #[error("camera/microphone permission denied")]
    PermissionDenied,
    #[error("media device unavailable")]
    DeviceUnavailable,
    #[error("negotiation failure: {0}")]
    Negotiation(String),
    #[error("no answer within the ringing window")]
    NoAnswer,
    #[error("media path failed to connect in time")]
    ConnectTimeout,

    // Non-fatal; logged, transport is responsible for retry.
    #[error("signal delivery failure: {0}")]
    SignalDelivery(String),

    // Session manager misuse codes, returned to the caller of an intent.
    #[error("call already in progress, id: {0}")]
    CallAlreadyInProgress(CallId),
    #[error("no active call")]
    NoActiveCall,
    #[error("call id mismatch, expected: {expected}, got: {got}")]
    CallIdMismatch { expected: CallId, got: CallId },
    #[error("intent {intent} is not valid in state {state}")]
    InvalidState {
        intent: &'static str,
        state: CallState,
    },
    #[error("no local identity")]
    NoIdentity,
}
