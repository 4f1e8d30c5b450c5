//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! Signal channel adapter.
//!
//! Thin wrapper around the app's append-only per-recipient feed. The
//! transport owns retry and gives at-least-once delivery in best-effort
//! arrival order; this layer owns encoding, validation, and filtering, and
//! guarantees that a bad row never reaches the state machine.

use crate::common::{CallFlow, Result, UserId};
use crate::core::signaling::SignalMessage;
use crate::error::CallError;

/// The external pub/sub transport capability.
///
/// `try_recv` yields rows already delivered to the local queue; rows
/// delivered but not yet drained must survive an unsubscribe, which is why
/// draining and unsubscribing are separate operations.
pub trait SignalTransport {
    /// Fire-and-forget append of one row. The transport retries delivery.
    fn publish(&mut self, row: serde_json::Value) -> Result<()>;

    /// Next raw row addressed to the subscribed identity, if any.
    fn try_recv(&mut self) -> Option<serde_json::Value>;

    /// Stop receiving new rows. Already-delivered rows stay drainable.
    fn unsubscribe(&mut self) {}
}

pub struct SignalChannel<T>
where
    T: SignalTransport,
{
    local_user: UserId,
    transport: T,
}

impl<T> SignalChannel<T>
where
    T: SignalTransport,
{
    pub fn new(local_user: UserId, transport: T) -> Self {
        Self {
            local_user,
            transport,
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// The subscription follows the identity source.
    pub fn set_local_user(&mut self, local_user: UserId) {
        self.local_user = local_user;
    }

    /// Publish one message, fire-and-forget. A delivery failure is logged
    /// and swallowed; the transport's retry is the recovery path and the
    /// call must not fail because one send bounced.
    pub fn publish(&mut self, message: &SignalMessage) {
        callflow!(
            CallFlow::SessionManager,
            CallFlow::Network,
            format!("send {}", message)
        );
        if let Err(e) = self.transport.publish(message.encode()) {
            warn!("{} for {}", CallError::SignalDelivery(e.to_string()), message);
        }
    }

    /// Drain everything currently delivered, decoded and filtered to the
    /// local identity. Malformed rows are dropped with a warning.
    pub fn poll(&mut self) -> Vec<SignalMessage> {
        let mut messages = Vec::new();
        while let Some(row) = self.transport.try_recv() {
            match SignalMessage::decode(row) {
                Some(message) if message.to_user_id == self.local_user => {
                    callflow!(
                        CallFlow::Network,
                        CallFlow::SessionManager,
                        format!("recv {}", message)
                    );
                    messages.push(message);
                }
                Some(message) => {
                    debug!(
                        "dropping message addressed to {} (local: {})",
                        message.to_user_id, self.local_user
                    );
                }
                None => {
                    warn!("dropping malformed signaling row");
                }
            }
        }
        messages
    }

    pub fn unsubscribe(&mut self) {
        self.transport.unsubscribe();
    }
}
