//! Tests for connection and stream flow control windows

use assert_matches::assert_matches;
use h2_session_engine::codec::{
    flags, frame, frame_type, settings_id, EngineSettings, ErrorCode, Header,
    DEFAULT_WINDOW_SIZE,
};
use h2_session_engine::Error;

use super::support::{request, server, server_with, u32_at, Call, Recorder};

#[test]
fn test_body_limited_by_connection_window() {
    let mut engine = server();
    let mut cb = Recorder::default();

    let mut input = frame::settings(&[(settings_id::INITIAL_WINDOW_SIZE, 100_000)]);
    input.extend_from_slice(&request(1, true));
    engine.mem_recv(&input, &mut cb).unwrap();
    engine
        .submit_response(1, &[Header::new(":status", "200")], Some(vec![b'x'; 70_000]))
        .unwrap();
    engine.send(&mut cb).unwrap();

    let frames = cb.take_frames();
    let data: Vec<_> = frames
        .iter()
        .filter(|(h, _)| h.frame_type == frame_type::DATA)
        .collect();
    assert_eq!(data.len(), 4);
    assert!(data.iter().all(|(h, _)| h.flags & flags::END_STREAM == 0));
    let sent: usize = data.iter().map(|(_, p)| p.len()).sum();
    assert_eq!(sent, 65_535);

    assert_eq!(engine.remote_window_size(), 0);
    assert_eq!(engine.stream_remote_window_size(1), Some(34_465));
    assert!(!engine.want_write());

    engine.mem_recv(&frame::window_update(0, 10_000), &mut cb).unwrap();
    assert!(engine.want_write());
    cb.calls.clear();
    engine.send(&mut cb).unwrap();

    let frames = cb.take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0.flags, flags::END_STREAM);
    assert_eq!(frames[0].1.len(), 4_465);
    assert_eq!(cb.calls.last(), Some(&Call::StreamClose(1, ErrorCode::NoError)));
}

#[test]
fn test_receive_window_is_replenished() {
    let mut engine = server();
    let mut cb = Recorder::default();
    engine.mem_recv(&request(1, false), &mut cb).unwrap();

    let chunk = vec![0u8; 16_384];
    engine.mem_recv(&frame::data(1, &chunk, false), &mut cb).unwrap();
    assert!(!engine.want_write());
    engine.mem_recv(&frame::data(1, &chunk, false), &mut cb).unwrap();

    engine.send(&mut cb).unwrap();
    let mut expected = frame::window_update(0, 32_768);
    expected.extend_from_slice(&frame::window_update(1, 32_768));
    assert_eq!(cb.wire, expected);
}

#[test]
fn test_stream_receive_window_exceeded_resets_stream() {
    let mut engine = server_with(EngineSettings {
        initial_window_size: 100,
        ..EngineSettings::default()
    });
    let mut cb = Recorder::default();
    engine.mem_recv(&request(1, false), &mut cb).unwrap();
    cb.calls.clear();

    engine.mem_recv(&frame::data(1, &[0; 200], false), &mut cb).unwrap();
    assert!(cb.calls.is_empty());

    engine.send(&mut cb).unwrap();
    assert_eq!(cb.wire, frame::rst_stream(1, ErrorCode::FlowControlError));
}

#[test]
fn test_initial_window_setting_adjusts_open_streams() {
    let mut engine = server();
    let mut cb = Recorder::default();
    engine.mem_recv(&request(1, false), &mut cb).unwrap();
    assert_eq!(engine.stream_remote_window_size(1), Some(DEFAULT_WINDOW_SIZE));

    engine
        .mem_recv(
            &frame::settings(&[(settings_id::INITIAL_WINDOW_SIZE, 1_000)]),
            &mut cb,
        )
        .unwrap();
    assert_eq!(engine.stream_remote_window_size(1), Some(1_000));

    engine.mem_recv(&request(3, false), &mut cb).unwrap();
    assert_eq!(engine.stream_remote_window_size(3), Some(1_000));
    assert_eq!(engine.remote_window_size(), DEFAULT_WINDOW_SIZE);
}

#[test]
fn test_initial_window_too_large_is_error() {
    let mut engine = server();
    let mut cb = Recorder::default();
    let err = engine
        .mem_recv(
            &frame::settings(&[(settings_id::INITIAL_WINDOW_SIZE, 0x8000_0000)]),
            &mut cb,
        )
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::FlowControlError);
}

#[test]
fn test_zero_connection_window_update_is_error() {
    let mut engine = server();
    let mut cb = Recorder::default();
    let err = engine
        .mem_recv(&frame::window_update(0, 0), &mut cb)
        .unwrap_err();
    assert_matches!(
        err,
        Error::Protocol {
            code: ErrorCode::ProtocolError,
            ..
        }
    );
}

#[test]
fn test_zero_stream_window_update_resets_stream() {
    let mut engine = server();
    let mut cb = Recorder::default();
    engine.mem_recv(&request(1, false), &mut cb).unwrap();

    engine.mem_recv(&frame::window_update(1, 0), &mut cb).unwrap();
    engine.send(&mut cb).unwrap();
    assert_eq!(cb.wire, frame::rst_stream(1, ErrorCode::ProtocolError));
    assert!(!engine.is_stream_open(1));
}

#[test]
fn test_connection_window_overflow_is_error() {
    let mut engine = server();
    let mut cb = Recorder::default();
    let err = engine
        .mem_recv(&frame::window_update(0, 0x7fff_ffff), &mut cb)
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::FlowControlError);
}

#[test]
fn test_partial_write_resumes() {
    let mut engine = server();
    let mut cb = Recorder {
        budget: Some(5),
        ..Recorder::default()
    };
    engine.submit_settings(&[]);

    engine.send(&mut cb).unwrap();
    assert_eq!(cb.wire.len(), 5);
    assert!(cb.calls.is_empty());
    assert!(engine.want_write());

    cb.budget = None;
    engine.send(&mut cb).unwrap();
    assert_eq!(
        cb.wire,
        frame::settings(&[(settings_id::MAX_CONCURRENT_STREAMS, 100)])
    );
    assert_eq!(
        cb.calls,
        vec![Call::FrameSend {
            frame_type: frame_type::SETTINGS,
            stream_id: 0,
            flags: 0,
        }]
    );
    assert!(!engine.want_write());
}

#[test]
fn test_blocked_data_keeps_window() {
    let mut engine = server();
    let mut cb = Recorder::default();
    engine.mem_recv(&request(1, true), &mut cb).unwrap();
    engine
        .submit_response(1, &[Header::new(":status", "200")], Some(b"hello".to_vec()))
        .unwrap();

    // room for the HEADERS frame only
    cb.budget = Some(10);
    engine.send(&mut cb).unwrap();
    assert_eq!(cb.wire.len(), 10);
    assert_eq!(engine.stream_remote_window_size(1), Some(DEFAULT_WINDOW_SIZE));
    assert_eq!(engine.remote_window_size(), DEFAULT_WINDOW_SIZE);
    assert!(engine.want_write());

    cb.budget = None;
    engine.send(&mut cb).unwrap();
    let frames = cb.take_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].1, b"hello");
    assert!(!engine.is_stream_open(1));
}

#[test]
fn test_window_update_frame_payload() {
    let bytes = frame::window_update(3, 0x8000_0010);
    let frames = super::support::parse_frames(&bytes);
    assert_eq!(frames[0].0.stream_id, 3);
    assert_eq!(u32_at(&frames[0].1, 0), 0x10);
}
