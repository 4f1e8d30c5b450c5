//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! Common test utilities

// Requires the 'sim' feature

use std::env;
use std::sync::Mutex;

use lazy_static::lazy_static;
use log::LevelFilter;
use rand::distributions::{Distribution, Standard};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use nightcall::common::{CallId, CallState, SessionEvent, UserId};
use nightcall::core::session::SessionSnapshot;
use nightcall::core::session_manager::{CallConfig, SessionManager};
use nightcall::core::signaling::{Payload, SignalMessage};
use nightcall::sim::router::{Router, SimTransport};
use nightcall::sim::sim_platform::{SimMediaStream, SimPlatform};
use nightcall::CallError;

macro_rules! error_line {
    () => {
        concat!(module_path!(), ":", line!())
    };
}

pub struct Prng {
    seed: u64,
    rng: Mutex<Option<ChaCha20Rng>>,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Mutex::new(None),
        }
    }

    // Use a freshly seeded PRNG for each test
    pub fn init(&self) {
        let mut opt = self.rng.lock().unwrap();
        let _ = opt.replace(ChaCha20Rng::seed_from_u64(self.seed));
    }

    pub fn gen<T>(&self) -> T
    where
        Standard: Distribution<T>,
    {
        self.rng.lock().unwrap().as_mut().unwrap().gen::<T>()
    }
}

lazy_static! {
    pub static ref PRNG: Prng = {
        let rand_seed = match env::var("RANDOM_SEED") {
            Ok(v) => v.parse().unwrap(),
            Err(_) => 0,
        };

        println!("\n*** Using random seed: {}", rand_seed);
        Prng::new(rand_seed)
    };
}

pub fn test_init() {
    let log_level = if env::var("DEBUG_TESTS").is_ok() {
        LevelFilter::Info
    } else {
        LevelFilter::Error
    };
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log_level)
        .try_init();

    PRNG.init();
}

/// One simulated endpoint: a session manager wired to a shared router,
/// with a handle on its platform for observations.
pub struct TestContext {
    pub router: Router,
    pub platform: SimPlatform,
    pub manager: SessionManager<SimPlatform, SimTransport>,
    pub local_user: UserId,
}

impl TestContext {
    pub fn new(user: &str) -> Self {
        Self::with_router(Router::new(), user)
    }

    /// Endpoints sharing a router can actually signal each other.
    pub fn with_router(router: Router, user: &str) -> Self {
        Self::with_config(router, user, CallConfig::default())
    }

    pub fn with_config(router: Router, user: &str, config: CallConfig) -> Self {
        info!("test: creating context for {}", user);
        let platform = SimPlatform::new();
        let manager = SessionManager::new(
            platform.clone(),
            router.transport(user),
            user.to_string(),
            config,
        );
        Self {
            router,
            platform,
            manager,
            local_user: user.to_string(),
        }
    }

    pub fn state(&self) -> CallState {
        self.manager.snapshot().call_state
    }

    pub fn snapshot(&self) -> SessionSnapshot<SimMediaStream> {
        self.manager.snapshot()
    }

    pub fn event_count(&self, event: SessionEvent) -> usize {
        self.platform.event_count(event)
    }

    /// Complete the oldest pending media acquisition successfully,
    /// returning the stream that was handed to the manager.
    pub fn complete_media(&mut self) -> SimMediaStream {
        let (call_id, generation) = self
            .platform
            .take_pending_acquire()
            .expect(error_line!());
        let stream = self.platform.stream_for(call_id);
        self.manager.media_acquired(generation, Ok(stream.clone()));
        stream
    }

    /// Complete the oldest pending media acquisition with an error.
    pub fn fail_media(&mut self, error: CallError) {
        let (_, generation) = self
            .platform
            .take_pending_acquire()
            .expect(error_line!());
        self.manager.media_acquired(generation, Err(error));
    }

    /// Deliver one well-formed message from a simulated peer and poll.
    pub fn remote_send(&mut self, from: &str, call_id: CallId, payload: Payload) -> SignalMessage {
        let message = SignalMessage::new(
            from.to_string(),
            self.local_user.clone(),
            call_id,
            payload,
        );
        self.router.inject(&self.local_user, message.encode());
        self.manager.poll();
        message
    }

    /// Deliver one raw row (possibly malformed) and poll.
    pub fn deliver_raw(&mut self, row: serde_json::Value) {
        self.router.inject(&self.local_user, row);
        self.manager.poll();
    }

    /// Drain and decode everything queued for `user` on the router.
    /// For inspecting what this endpoint published to a simulated peer.
    pub fn drain_outbound(&mut self, user: &str) -> Vec<SignalMessage> {
        use nightcall::core::channel::SignalTransport;
        let mut transport = self.router.transport(user);
        let mut messages = Vec::new();
        while let Some(row) = transport.try_recv() {
            if let Some(message) = SignalMessage::decode(row) {
                messages.push(message);
            }
        }
        messages
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        info!("test: dropping context for {}", self.local_user);
    }
}

/// Poll two endpoints until neither has anything left to deliver.
pub fn pump_pair(a: &mut TestContext, b: &mut TestContext) {
    for _ in 0..10 {
        a.manager.poll();
        b.manager.poll();
        if a.router.queued_for(&a.local_user) == 0 && b.router.queued_for(&b.local_user) == 0 {
            break;
        }
    }
}
