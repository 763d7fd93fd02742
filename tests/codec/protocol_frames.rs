//! Tests for connection-level frames: SETTINGS, PING and GOAWAY

use h2_session_engine::codec::{
    flags, frame, frame_type, settings_id, EngineSettings, ErrorCode, Header, MAX_QUEUED_FRAMES,
};

use super::support::{request, server, server_with, Recorder};

#[test]
fn test_ping_is_acknowledged() {
    let mut engine = server();
    let mut cb = Recorder::default();
    let opaque = [1, 2, 3, 4, 5, 6, 7, 8];

    engine.mem_recv(&frame::ping(opaque), &mut cb).unwrap();
    assert_eq!(cb.frames_recv(), vec![(frame_type::PING, 0, 0)]);

    engine.send(&mut cb).unwrap();
    assert_eq!(cb.wire, frame::ping_ack(opaque));
}

#[test]
fn test_ping_ack_is_not_echoed() {
    let mut engine = server();
    let mut cb = Recorder::default();

    engine.mem_recv(&frame::ping_ack([0; 8]), &mut cb).unwrap();
    assert_eq!(cb.frames_recv(), vec![(frame_type::PING, 0, flags::ACK)]);
    assert!(!engine.want_write());
}

#[test]
fn test_settings_ack_is_reported() {
    let mut engine = server();
    let mut cb = Recorder::default();

    engine.mem_recv(&frame::settings_ack(), &mut cb).unwrap();
    assert_eq!(cb.frames_recv(), vec![(frame_type::SETTINGS, 0, flags::ACK)]);
    assert!(!engine.want_write());
}

#[test]
fn test_submit_settings_advertises_limits() {
    let mut engine = server_with(EngineSettings {
        max_concurrent_streams: 50,
        ..EngineSettings::default()
    });
    let mut cb = Recorder::default();

    engine.submit_settings(&[]);
    engine.send(&mut cb).unwrap();
    assert_eq!(
        cb.wire,
        frame::settings(&[(settings_id::MAX_CONCURRENT_STREAMS, 50)])
    );
}

#[test]
fn test_submit_settings_with_custom_window() {
    let mut engine = server_with(EngineSettings {
        initial_window_size: 1_000,
        ..EngineSettings::default()
    });
    let mut cb = Recorder::default();

    engine.submit_settings(&[(settings_id::MAX_HEADER_LIST_SIZE, 8_192)]);
    engine.send(&mut cb).unwrap();
    assert_eq!(
        cb.wire,
        frame::settings(&[
            (settings_id::MAX_CONCURRENT_STREAMS, 100),
            (settings_id::INITIAL_WINDOW_SIZE, 1_000),
            (settings_id::MAX_HEADER_LIST_SIZE, 8_192),
        ])
    );
}

#[test]
fn test_invalid_enable_push_is_error() {
    let mut engine = server();
    let mut cb = Recorder::default();
    let err = engine
        .mem_recv(&frame::settings(&[(settings_id::ENABLE_PUSH, 2)]), &mut cb)
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::ProtocolError);
}

#[test]
fn test_peer_goaway_is_recorded() {
    let mut engine = server();
    let mut cb = Recorder::default();

    engine
        .mem_recv(&frame::goaway(0, ErrorCode::EnhanceYourCalm), &mut cb)
        .unwrap();
    assert_eq!(engine.peer_goaway(), Some(ErrorCode::EnhanceYourCalm));
    assert_eq!(cb.frames_recv(), vec![(frame_type::GOAWAY, 0, 0)]);
    // receiving GOAWAY does not make us send one
    assert!(!engine.is_going_away());
}

#[test]
fn test_terminate_session_is_idempotent() {
    let mut engine = server();
    let mut cb = Recorder::default();
    engine.mem_recv(&request(1, true), &mut cb).unwrap();

    engine.terminate_session(ErrorCode::NoError);
    engine.terminate_session(ErrorCode::InternalError);
    assert!(!engine.want_read());

    engine.send(&mut cb).unwrap();
    assert_eq!(cb.wire, frame::goaway(1, ErrorCode::NoError));
    assert!(!engine.want_write());

    cb.calls.clear();
    let input = request(3, true);
    assert_eq!(engine.mem_recv(&input, &mut cb).unwrap(), input.len());
    assert!(cb.calls.is_empty());
}

#[test]
fn test_no_data_after_goaway() {
    let mut engine = server();
    let mut cb = Recorder::default();
    engine.mem_recv(&request(1, true), &mut cb).unwrap();
    engine
        .submit_response(1, &[Header::new(":status", "200")], Some(b"late".to_vec()))
        .unwrap();
    engine.terminate_session(ErrorCode::NoError);

    engine.send(&mut cb).unwrap();
    let frames = cb.take_frames();
    let types: Vec<u8> = frames.iter().map(|(h, _)| h.frame_type).collect();
    assert_eq!(types, vec![frame_type::HEADERS, frame_type::GOAWAY]);
    assert!(!engine.want_write());
}

#[test]
fn test_ping_flood_from_non_reading_peer() {
    let mut engine = server();
    let mut cb = Recorder::default();

    let mut input = Vec::new();
    for i in 0..=MAX_QUEUED_FRAMES {
        input.extend_from_slice(&frame::ping((i as u64).to_be_bytes()));
    }
    let err = engine.mem_recv(&input, &mut cb).unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::EnhanceYourCalm);
    assert!(engine.is_going_away());

    engine.send(&mut cb).unwrap();
    let frames = cb.take_frames();
    assert_eq!(frames.len(), MAX_QUEUED_FRAMES + 1);
    assert!(frames[..MAX_QUEUED_FRAMES]
        .iter()
        .all(|(h, _)| h.frame_type == frame_type::PING && h.flags == flags::ACK));
    let (goaway, payload) = &frames[MAX_QUEUED_FRAMES];
    assert_eq!(goaway.frame_type, frame_type::GOAWAY);
    assert_eq!(
        ErrorCode::from_u32(u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]])),
        ErrorCode::EnhanceYourCalm
    );
}

#[test]
fn test_pings_below_queue_limit_are_all_answered() {
    let mut engine = server();
    let mut cb = Recorder::default();

    for _ in 0..MAX_QUEUED_FRAMES {
        engine.mem_recv(&frame::ping([0; 8]), &mut cb).unwrap();
    }
    engine.send(&mut cb).unwrap();
    // draining the queue lifts the limit
    engine.mem_recv(&frame::ping([1; 8]), &mut cb).unwrap();
    engine.send(&mut cb).unwrap();

    assert_eq!(cb.take_frames().len(), MAX_QUEUED_FRAMES + 1);
    assert!(!engine.is_going_away());
}
