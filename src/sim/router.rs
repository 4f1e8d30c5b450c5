//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! Simulation signaling router: an in-memory stand-in for the app's
//! per-recipient pub/sub feed.
//!
//! Rows are routed by their `toUserId` field into per-user queues, in
//! publish order. The router can also misbehave on demand the way the real
//! feed does: duplicate deliveries (at-least-once), injected malformed
//! rows, and delivery failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::{Result, UserId};
use crate::core::channel::SignalTransport;

#[derive(Default)]
struct RouterState {
    queues: HashMap<UserId, VecDeque<serde_json::Value>>,
    /// Deliver the next N published rows twice.
    duplicate_budget: u32,
    fail_publish: bool,
    published: u64,
}

#[derive(Clone, Default)]
pub struct Router {
    state: Arc<Mutex<RouterState>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().expect("poisoned router lock")
    }

    /// A transport handle draining `user`'s queue.
    pub fn transport(&self, user: impl Into<UserId>) -> SimTransport {
        SimTransport {
            router: self.clone(),
            user: user.into(),
            subscribed: true,
        }
    }

    /// Queue an arbitrary row directly, bypassing publish. For malformed
    /// or hand-crafted input.
    pub fn inject(&self, to: &str, row: serde_json::Value) {
        self.lock()
            .queues
            .entry(to.to_string())
            .or_default()
            .push_back(row);
    }

    /// The next `n` published rows are each delivered twice.
    pub fn duplicate_next(&self, n: u32) {
        self.lock().duplicate_budget = n;
    }

    /// Make publishes fail until turned off. Delivery is fire-and-forget
    /// upstream, so this exercises the swallow-and-log path.
    pub fn set_fail_publish(&self, fail: bool) {
        self.lock().fail_publish = fail;
    }

    pub fn published_count(&self) -> u64 {
        self.lock().published
    }

    /// Rows currently queued for `user`, without draining them.
    pub fn queued_for(&self, user: &str) -> usize {
        self.lock().queues.get(user).map(|q| q.len()).unwrap_or(0)
    }

    fn route(&self, row: serde_json::Value) -> Result<()> {
        let mut state = self.lock();
        if state.fail_publish {
            return Err(anyhow::anyhow!("simulated delivery failure"));
        }
        state.published += 1;
        let to = row
            .get("toUserId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let copies = if state.duplicate_budget > 0 {
            state.duplicate_budget -= 1;
            2
        } else {
            1
        };
        let queue = state.queues.entry(to).or_default();
        for _ in 0..copies {
            queue.push_back(row.clone());
        }
        Ok(())
    }

    fn next_for(&self, user: &str) -> Option<serde_json::Value> {
        self.lock().queues.get_mut(user)?.pop_front()
    }
}

pub struct SimTransport {
    router: Router,
    user: UserId,
    subscribed: bool,
}

impl SignalTransport for SimTransport {
    fn publish(&mut self, row: serde_json::Value) -> Result<()> {
        self.router.route(row)
    }

    fn try_recv(&mut self) -> Option<serde_json::Value> {
        // Already-delivered rows stay drainable after unsubscribe.
        self.router.next_for(&self.user)
    }

    fn unsubscribe(&mut self) {
        self.subscribed = false;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn routes_by_recipient_in_order() {
        let router = Router::new();
        let mut a = router.transport("alice");
        let mut b = router.transport("bob");

        a.publish(json!({"toUserId": "bob", "n": 1})).unwrap();
        a.publish(json!({"toUserId": "bob", "n": 2})).unwrap();
        a.publish(json!({"toUserId": "alice", "n": 3})).unwrap();

        assert_eq!(b.try_recv().unwrap()["n"], 1);
        assert_eq!(b.try_recv().unwrap()["n"], 2);
        assert!(b.try_recv().is_none());
        assert_eq!(a.try_recv().unwrap()["n"], 3);
    }

    #[test]
    fn duplicate_budget_delivers_twice() {
        let router = Router::new();
        let mut a = router.transport("alice");
        let mut b = router.transport("bob");

        router.duplicate_next(1);
        a.publish(json!({"toUserId": "bob", "n": 1})).unwrap();
        a.publish(json!({"toUserId": "bob", "n": 2})).unwrap();

        assert_eq!(b.try_recv().unwrap()["n"], 1);
        assert_eq!(b.try_recv().unwrap()["n"], 1);
        assert_eq!(b.try_recv().unwrap()["n"], 2);
        assert!(b.try_recv().is_none());
    }

    #[test]
    fn failed_publish_delivers_nothing() {
        let router = Router::new();
        let mut a = router.transport("alice");

        router.set_fail_publish(true);
        assert!(a.publish(json!({"toUserId": "bob"})).is_err());
        assert_eq!(router.queued_for("bob"), 0);
    }
}
