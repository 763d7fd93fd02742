//! Tests for settings and per-stream watchdog expiry

use std::time::Duration;

use h2_session_engine::codec::{frame, frame_type, settings_id, ErrorCode, Header, CONNECTION_PREFACE};
use h2_session_engine::session::{recv_watchdog_id, send_watchdog_id, SETTINGS_WATCHDOG};
use h2_session_engine::{Channel, Event, SessionConfig, SessionState};

use super::support::{request, u32_at, Harness, SESSION};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[test]
fn test_settings_timeout_terminates_session() {
    let h = Harness::new();
    let mut bytes = CONNECTION_PREFACE.to_vec();
    bytes.extend_from_slice(&frame::settings(&[]));
    h.client_sends(&bytes);
    h.pump();
    h.sent_frames();

    assert_eq!(h.advance(secs(9)), 0);
    assert_eq!(h.session.borrow().state(), SessionState::Active);

    assert_eq!(h.advance(secs(2)), 1);
    let frames = h.sent_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0.frame_type, frame_type::GOAWAY);
    assert_eq!(u32_at(&frames[0].1, 4), ErrorCode::SettingsTimeout.as_u32());

    assert_eq!(h.session.borrow().state(), SessionState::Closed);
    assert!(h.wire.borrow().closed);
    assert!(h.saw(Channel::SessionDeleted, Event::Session(SESSION)));
    assert!(h.session.borrow().next_deadline().is_none());
}

#[test]
fn test_settings_timeout_from_config() {
    let h = Harness::with_config(SessionConfig {
        settings_timeout_ms: 500,
        ..SessionConfig::default()
    });
    h.pump();

    assert_eq!(
        h.session.borrow().watchdogs().deadline(SETTINGS_WATCHDOG),
        h.session.borrow().next_deadline()
    );
    h.advance(Duration::from_millis(600));
    assert_eq!(h.session.borrow().state(), SessionState::Closed);
}

#[test]
fn test_recv_timeout_resets_only_that_stream() {
    let h = Harness::handshake(&[]);
    let mut bytes = request(1, false);
    bytes.extend_from_slice(&request(3, true));
    h.client_sends(&bytes);
    h.pump();

    assert!(h.session.borrow().watchdogs().is_armed(recv_watchdog_id(1)));
    assert!(!h.session.borrow().watchdogs().is_armed(recv_watchdog_id(3)));

    assert_eq!(h.advance(secs(31)), 1);
    let frames = h.sent_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0.frame_type, frame_type::RST_STREAM);
    assert_eq!(frames[0].0.stream_id, 1);
    assert_eq!(u32_at(&frames[0].1, 0), ErrorCode::Cancel.as_u32());

    {
        let session = h.session.borrow();
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.stream(1).is_none());
        assert!(!session.watchdogs().exists(recv_watchdog_id(1)));
        assert!(session.stream(3).is_some());
    }

    h.session
        .borrow_mut()
        .submit_response(3, &[Header::new(":status", "200")], None)
        .unwrap();
    h.pump();
    assert_eq!(h.sent_frames()[0].0.stream_id, 3);
}

#[test]
fn test_blocked_response_times_out() {
    let h = Harness::handshake(&[(settings_id::INITIAL_WINDOW_SIZE, 10)]);
    h.client_sends(&request(1, true));
    h.pump();

    h.session
        .borrow_mut()
        .submit_response(1, &[Header::new(":status", "200")], Some(vec![b'x'; 100]))
        .unwrap();
    h.pump();

    let frames = h.sent_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].0.frame_type, frame_type::DATA);
    assert_eq!(frames[1].1.len(), 10);
    assert!(h.session.borrow().watchdogs().is_armed(send_watchdog_id(1)));

    assert_eq!(h.advance(secs(31)), 1);
    let frames = h.sent_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0.frame_type, frame_type::RST_STREAM);
    assert_eq!(u32_at(&frames[0].1, 0), ErrorCode::Cancel.as_u32());

    let session = h.session.borrow();
    assert_eq!(session.state(), SessionState::Active);
    assert!(session.stream(1).is_none());
    assert!(!session.watchdogs().exists(send_watchdog_id(1)));
}

#[test]
fn test_window_update_disarms_send_watchdog() {
    let h = Harness::handshake(&[(settings_id::INITIAL_WINDOW_SIZE, 10)]);
    let mut bytes = request(1, true);
    bytes.extend_from_slice(&request(3, false));
    h.client_sends(&bytes);
    h.pump();
    h.session
        .borrow_mut()
        .submit_response(1, &[Header::new(":status", "200")], Some(vec![b'x'; 15]))
        .unwrap();
    h.pump();
    h.sent_frames();
    assert!(h.session.borrow().watchdogs().is_armed(send_watchdog_id(1)));

    h.advance(secs(20));
    h.client_sends(&frame::window_update(1, 100));
    h.pump();

    let frames = h.sent_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].1.len(), 5);
    assert!(h.session.borrow().stream(1).is_none());

    // the other stream's recv watchdog is still running on its own deadline
    assert_eq!(h.advance(secs(11)), 1);
    assert!(h.session.borrow().stream(3).is_none());
    assert_eq!(h.session.borrow().state(), SessionState::Active);
}
