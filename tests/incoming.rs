//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! Tests for incoming calls

extern crate nightcall;

#[macro_use]
extern crate log;

use std::time::Instant;

use serde_json::json;

use nightcall::common::{CallDirection, CallId, CallState, SessionEvent};
use nightcall::core::signaling::{MessageType, Payload, SignalMessage};
use nightcall::core::util::now_millis;
use nightcall::webrtc::ice_candidate::IceCandidate;
use nightcall::webrtc::sdp::SessionDescription;
use nightcall::CallError;

#[macro_use]
mod common;
use common::{test_init, TestContext, PRNG};

// Ring an incoming call from "alice" and deliver her offer.
fn ring_incoming_call() -> (TestContext, CallId, SessionDescription) {
    let mut context = TestContext::new("bob");
    let call_id = CallId::new(PRNG.gen::<u64>());

    context.remote_send("alice", call_id, Payload::IncomingCall);
    assert_eq!(context.state(), CallState::Receiving);
    assert_eq!(context.snapshot().direction, Some(CallDirection::Incoming));
    assert_eq!(context.snapshot().remote_user, Some("alice".to_string()));
    assert_eq!(context.event_count(SessionEvent::LocalRinging), 1);

    let offer = SessionDescription::offer(format!("v=0 offer {}", PRNG.gen::<u16>()));
    context.remote_send("alice", call_id, Payload::Offer(offer.clone()));

    (context, call_id, offer)
}

// Accept the ringing call through media acquisition and the answer.
fn accept_ringing_call(context: &mut TestContext, call_id: CallId, offer: &SessionDescription) {
    context.manager.accept_call(call_id).expect(error_line!());

    // call-accepted goes out before media is even up, to stop the ring.
    let sent = context.drain_outbound("alice");
    assert_eq!(sent.last().map(|m| m.typ()), Some(MessageType::CallAccepted));

    context.complete_media();
    assert_eq!(context.state(), CallState::Connecting);

    let pc = context.platform.last_pc().expect(error_line!());
    assert_eq!(pc.remote_description.as_ref(), Some(offer));
    assert!(pc.local_description.is_some());

    let sent = context.drain_outbound("alice");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].typ(), MessageType::Answer);
    assert_eq!(sent[0].call_id, call_id);
}

#[test]
fn incoming_call_rings_until_accepted() {
    test_init();

    let (mut context, call_id, offer) = ring_incoming_call();

    // The offer is cached; nothing is negotiated before the user accepts.
    assert_eq!(context.state(), CallState::Receiving);
    assert_eq!(context.platform.peer_connection_count(), 0);

    accept_ringing_call(&mut context, call_id, &offer);

    context
        .manager
        .remote_track(context.platform.stream_for(call_id));
    assert_eq!(context.state(), CallState::Active);
    assert_eq!(context.event_count(SessionEvent::Connected), 1);
}

#[test]
fn accept_before_offer_arrives() {
    test_init();

    let mut context = TestContext::new("bob");
    let call_id = CallId::new(PRNG.gen::<u64>());
    context.remote_send("alice", call_id, Payload::IncomingCall);

    // Accept immediately; the offer is still in flight.
    context.manager.accept_call(call_id).expect(error_line!());
    context.complete_media();

    // Still ringing state-wise; no answer can exist without the offer.
    assert_eq!(context.state(), CallState::Receiving);
    let sent = context.drain_outbound("alice");
    assert!(sent.iter().all(|m| m.typ() != MessageType::Answer));

    // The offer lands and the accept resumes on its own.
    let offer = SessionDescription::offer("v=0");
    context.remote_send("alice", call_id, Payload::Offer(offer.clone()));
    assert_eq!(context.state(), CallState::Connecting);

    let sent = context.drain_outbound("alice");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].typ(), MessageType::Answer);
    let pc = context.platform.last_pc().expect(error_line!());
    assert_eq!(pc.remote_description, Some(offer));
}

#[test]
fn expired_incoming_call_never_rings() {
    test_init();

    let mut context = TestContext::new("bob");
    let mut message = SignalMessage::new(
        "alice".to_string(),
        "bob".to_string(),
        CallId::new(PRNG.gen::<u64>()),
        Payload::IncomingCall,
    );
    message.created_at = now_millis().saturating_sub(121_000);
    context.deliver_raw(message.encode());

    assert_eq!(context.state(), CallState::Idle);
    assert_eq!(context.event_count(SessionEvent::LocalRinging), 0);
}

#[test]
fn reject_declines_and_concludes() {
    test_init();

    let (mut context, call_id, _offer) = ring_incoming_call();
    context.manager.reject_call(call_id).expect(error_line!());

    assert_eq!(context.state(), CallState::Ended);
    assert_eq!(context.event_count(SessionEvent::EndedLocalDeclined), 1);
    let sent = context.drain_outbound("alice");
    assert_eq!(sent.last().map(|m| m.typ()), Some(MessageType::CallRejected));

    context.manager.conclude();
    assert_eq!(context.state(), CallState::Idle);
    assert_eq!(context.snapshot().call_id, None);
}

#[test]
fn accept_validates_call_id_and_state() {
    test_init();

    let mut context = TestContext::new("bob");

    // No call at all.
    let err = context.manager.accept_call(CallId::new(1)).unwrap_err();
    assert_eq!(
        err.downcast_ref::<CallError>(),
        Some(&CallError::NoActiveCall)
    );

    let call_id = CallId::new(7);
    context.remote_send("alice", call_id, Payload::IncomingCall);

    // Wrong id.
    let err = context.manager.accept_call(CallId::new(8)).unwrap_err();
    assert_eq!(
        err.downcast_ref::<CallError>(),
        Some(&CallError::CallIdMismatch {
            expected: call_id,
            got: CallId::new(8),
        })
    );

    // Still ringing; the bad intent changed nothing.
    assert_eq!(context.state(), CallState::Receiving);
}

#[test]
fn ringing_timeout_is_a_missed_call() {
    test_init();

    let (mut context, _call_id, _offer) = ring_incoming_call();
    let timeout = context.manager.config().ringing_timeout;

    context.manager.tick(Instant::now() + timeout);
    assert_eq!(context.state(), CallState::Failed);
    assert_eq!(context.snapshot().error, Some(CallError::NoAnswer));
    assert_eq!(context.event_count(SessionEvent::EndedNoAnswer), 1);

    // The callee stays silent; the caller times out on its own side.
    assert!(context.drain_outbound("alice").is_empty());
}

#[test]
fn remote_cancel_stops_the_ring() {
    test_init();

    let (mut context, call_id, _offer) = ring_incoming_call();
    context.remote_send("alice", call_id, Payload::CallEnded);

    assert_eq!(context.state(), CallState::Ended);
    assert_eq!(context.event_count(SessionEvent::EndedRemoteHangup), 1);
}

#[test]
fn second_caller_gets_busy_decline() {
    test_init();

    let (mut context, call_id, _offer) = ring_incoming_call();
    context.drain_outbound("alice");

    let mallory_call = CallId::new(PRNG.gen::<u64>());
    context.remote_send("mallory", mallory_call, Payload::IncomingCall);

    assert_eq!(context.state(), CallState::Receiving);
    assert_eq!(context.snapshot().call_id, Some(call_id));
    assert_eq!(context.event_count(SessionEvent::LocalRinging), 1);

    let sent = context.drain_outbound("mallory");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].typ(), MessageType::CallRejected);
    assert_eq!(sent[0].call_id, mallory_call);
}

#[test]
fn replayed_ring_for_current_call_is_ignored() {
    test_init();

    let (mut context, call_id, _offer) = ring_incoming_call();
    context.remote_send("alice", call_id, Payload::IncomingCall);

    assert_eq!(context.state(), CallState::Receiving);
    assert_eq!(context.event_count(SessionEvent::LocalRinging), 1);
}

#[test]
fn candidates_before_accept_apply_in_arrival_order() {
    test_init();

    let (mut context, call_id, offer) = ring_incoming_call();

    let first = IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 1 typ host");
    let second = IceCandidate::new("candidate:2 1 udp 2 10.0.0.2 2 typ host");
    context.remote_send("alice", call_id, Payload::IceCandidate(first.clone()));
    context.remote_send("alice", call_id, Payload::IceCandidate(second.clone()));

    accept_ringing_call(&mut context, call_id, &offer);

    let third = IceCandidate::new("candidate:3 1 udp 3 10.0.0.3 3 typ host");
    context.remote_send("alice", call_id, Payload::IceCandidate(third.clone()));

    let pc = context.platform.last_pc().expect(error_line!());
    assert_eq!(pc.added_candidates, vec![first, second, third]);
}

#[test]
fn stragglers_after_conclusion_do_not_ring() {
    test_init();

    let (mut context, call_id, _offer) = ring_incoming_call();
    context.manager.reject_call(call_id).expect(error_line!());
    context.manager.conclude();

    context.remote_send(
        "alice",
        call_id,
        Payload::IceCandidate(IceCandidate::new("candidate:1 1 udp 1 h 1 typ host")),
    );
    context.remote_send("alice", call_id, Payload::CallEnded);
    context.remote_send("alice", call_id, Payload::IncomingCall);

    assert_eq!(context.state(), CallState::Idle);
    assert_eq!(context.event_count(SessionEvent::LocalRinging), 1);
}

#[test]
fn connect_timeout_fails_the_call() {
    test_init();

    let (mut context, call_id, offer) = ring_incoming_call();
    accept_ringing_call(&mut context, call_id, &offer);
    let timeout = context.manager.config().connect_timeout;

    // No remote track ever arrives.
    context.manager.tick(Instant::now() + timeout);
    assert_eq!(context.state(), CallState::Failed);
    assert_eq!(context.snapshot().error, Some(CallError::ConnectTimeout));
    assert_eq!(context.event_count(SessionEvent::EndedConnectTimeout), 1);

    let sent = context.drain_outbound("alice");
    assert_eq!(sent.last().map(|m| m.typ()), Some(MessageType::CallEnded));
}

#[test]
fn malformed_rows_are_dropped() {
    test_init();

    let mut context = TestContext::new("bob");
    context.deliver_raw(json!({"garbage": true}));
    context.deliver_raw(json!(42));
    context.deliver_raw(json!({
        "id": "m1", "fromUserId": "alice", "toUserId": "bob",
        "callId": "not-hex", "type": "incoming-call", "createdAt": 0,
    }));
    context.deliver_raw(json!({
        "id": "m2", "fromUserId": "alice", "toUserId": "bob",
        "callId": "0000000000000001", "type": "group-invite", "createdAt": 0,
    }));

    assert_eq!(context.state(), CallState::Idle);

    // A well-formed ring afterwards still works.
    context.remote_send("alice", CallId::new(1), Payload::IncomingCall);
    assert_eq!(context.state(), CallState::Receiving);
}

#[test]
fn mute_and_video_toggles_are_local_only() {
    test_init();

    let (mut context, call_id, offer) = ring_incoming_call();

    // Not valid while still ringing.
    let err = context.manager.toggle_mute().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CallError>(),
        Some(CallError::InvalidState { .. })
    ));

    accept_ringing_call(&mut context, call_id, &offer);
    context
        .manager
        .remote_track(context.platform.stream_for(call_id));
    context.drain_outbound("alice");

    let stream = context.snapshot().local_stream.expect(error_line!());
    assert!(context.manager.toggle_mute().expect(error_line!()));
    assert!(context.snapshot().is_muted);
    assert_eq!(
        context.platform.audio_settings().last(),
        Some(&(stream.clone(), false))
    );
    assert!(!context.manager.toggle_mute().expect(error_line!()));
    assert!(!context.snapshot().is_muted);

    assert!(context.manager.toggle_video().expect(error_line!()));
    assert!(context.snapshot().is_video_off);
    assert_eq!(
        context.platform.video_settings().last(),
        Some(&(stream, false))
    );

    // Nothing about mute or video goes over the wire.
    assert!(context.drain_outbound("alice").is_empty());
}

#[test]
fn switch_camera_replaces_the_track_in_place() {
    test_init();

    let (mut context, call_id, offer) = ring_incoming_call();
    accept_ringing_call(&mut context, call_id, &offer);

    context.manager.switch_camera().expect(error_line!());
    assert_eq!(context.platform.camera_switches(), 1);
    let pc = context.platform.last_pc().expect(error_line!());
    assert_eq!(pc.replaced_tracks.len(), 1);

    // No renegotiation: the local description is untouched and nothing
    // new goes over the wire.
    context.drain_outbound("alice");
    context.manager.switch_camera().expect(error_line!());
    assert!(context.drain_outbound("alice").is_empty());
}
