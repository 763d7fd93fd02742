//! Tests for response header block encoding

use h2_session_engine::codec::{Header, HpackDecoder, HpackEncoder};

#[test]
fn test_encode_status_uses_static_table() {
    let mut encoder = HpackEncoder::new();

    // :status: 200 is static index 8
    let encoded = encoder.encode(&[Header::new(":status", "200")]);
    assert_eq!(encoded, vec![0x88]);
}

#[test]
fn test_encode_response_headers_decode_back() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();

    let headers = vec![
        Header::new(":status", "200"),
        Header::new("content-type", "application/json"),
        Header::new("set-cookie", "session=xyz"),
        Header::new("set-cookie", "theme=dark"),
    ];

    let decoded = decoder.decode(&encoder.encode(&headers)).unwrap();
    assert_eq!(decoded, headers);
}

#[test]
fn test_encoder_and_decoder_stay_in_sync_across_blocks() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();

    for i in 0..5 {
        let headers = vec![
            Header::new(":status", "200"),
            Header::new("x-request-id", format!("req-{i}")),
            Header::new("server", "h2-session-engine"),
        ];
        let decoded = decoder.decode(&encoder.encode(&headers)).unwrap();
        assert_eq!(decoded, headers, "block {i}");
    }
}

#[test]
fn test_encode_empty_header_list() {
    let mut encoder = HpackEncoder::new();
    assert!(encoder.encode(&[]).is_empty());
}

#[test]
fn test_header_is_pseudo() {
    assert!(Header::new(":status", "204").is_pseudo());
    assert!(!Header::new("content-length", "0").is_pseudo());
}
