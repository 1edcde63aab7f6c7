//! Unit tests for the MAVLink frame codec.
//!
//! Covers golden v2 bytes, trailing-zero truncation, v1 decoding, garbage
//! and checksum resync, unknown ids, and partial buffers.

use bytes::{BufMut, BytesMut};
use mavlink::common::{
    MavAutopilot, MavMessage, MavParamType, MavState, MavType, HEARTBEAT_DATA,
    MISSION_COUNT_DATA,
};
use mavlink::{MavHeader, MavlinkVersion};
use tokio_util::codec::{Decoder, Encoder};

use sitl_fleet::mavlink::codec::{MavCodec, GCS_COMPONENT_ID, GCS_SYSTEM_ID};
use sitl_fleet::mavlink::messages::{param_name, param_set_real32};

const GOLDEN_HEARTBEAT: [u8; 21] = [
    0xfd, 0x09, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02,
    0x0c, 0x00, 0x04, 0x03, 0xb6, 0xbd,
];

fn heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_QUADROTOR,
        autopilot: MavAutopilot::MAV_AUTOPILOT_PX4,
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
        ..HEARTBEAT_DATA::default()
    })
}

fn mission_count(count: u16) -> MavMessage {
    MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
        count,
        ..MISSION_COUNT_DATA::default()
    })
}

fn encode(codec: &mut MavCodec, message: MavMessage) -> BytesMut {
    let mut buf = BytesMut::new();
    codec.encode(message, &mut buf).expect("encode");
    buf
}

// ── Encoding ────────────────────────────────────────────────

#[test]
fn heartbeat_encodes_to_golden_bytes() {
    let mut codec = MavCodec::with_identity(1, 1);
    let buf = encode(&mut codec, heartbeat());
    assert_eq!(&buf[..], &GOLDEN_HEARTBEAT[..]);
}

#[test]
fn encoder_increments_sequence() {
    let mut codec = MavCodec::new();
    let first = encode(&mut codec, heartbeat());
    let second = encode(&mut codec, heartbeat());
    assert_eq!(first[4], 0);
    assert_eq!(second[4], 1);
    assert_eq!(first[5], GCS_SYSTEM_ID);
    assert_eq!(first[6], GCS_COMPONENT_ID);
}

#[test]
fn trailing_zero_payload_is_truncated() {
    let mut codec = MavCodec::new();
    let buf = encode(&mut codec, mission_count(2));
    assert_eq!(buf[1], 1, "only the non-zero count byte remains");

    let all_zero = encode(&mut codec, mission_count(0));
    assert_eq!(all_zero[1], 1, "at least one payload byte is kept");
}

#[test]
fn truncated_payload_decodes_zero_extended() {
    let mut codec = MavCodec::new();
    let mut buf = encode(&mut codec, mission_count(2));

    let frame = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(frame.message, mission_count(2));
    assert!(buf.is_empty());
}

#[test]
fn param_set_keeps_name_and_type() {
    let mut codec = MavCodec::new();
    let message = MavMessage::PARAM_SET(param_set_real32(1, 1, "MC_ROLLRATE_P", 0.2));
    let mut buf = encode(&mut codec, message);

    let frame = codec.decode(&mut buf).expect("decode").expect("frame");
    let MavMessage::PARAM_SET(param) = frame.message else {
        panic!("expected PARAM_SET, got {:?}", frame.message);
    };
    assert_eq!(param_name(&param.param_id), "MC_ROLLRATE_P");
    assert_eq!(param.param_type, MavParamType::MAV_PARAM_TYPE_REAL32);
    assert!((param.param_value - 0.2).abs() < f32::EPSILON);
}

#[test]
fn long_param_names_are_cut_to_sixteen_bytes() {
    let param = param_set_real32(1, 1, "A_VERY_LONG_PARAMETER_NAME", 1.0);
    assert_eq!(param_name(&param.param_id), "A_VERY_LONG_PARA");
}

// ── Decoding ────────────────────────────────────────────────

#[test]
fn golden_heartbeat_decodes() {
    let mut codec = MavCodec::new();
    let mut buf = BytesMut::from(&GOLDEN_HEARTBEAT[..]);

    let frame = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(frame.system_id, 1);
    assert_eq!(frame.component_id, 1);
    assert_eq!(frame.sequence, 0);
    assert_eq!(frame.message, heartbeat());
}

#[test]
fn v1_frame_decodes() {
    let header = MavHeader {
        system_id: 42,
        component_id: 1,
        sequence: 7,
    };
    let mut raw = Vec::new();
    mavlink::write_versioned_msg(&mut raw, MavlinkVersion::V1, header, &heartbeat())
        .expect("write v1");
    assert_eq!(raw[0], mavlink::MAV_STX);

    let mut codec = MavCodec::new();
    let mut buf = BytesMut::from(&raw[..]);
    let frame = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(frame.sequence, 7);
    assert_eq!(frame.system_id, 42);
    assert_eq!(frame.message, heartbeat());
    assert!(buf.is_empty());
}

#[test]
fn leading_garbage_is_skipped() {
    let mut codec = MavCodec::new();
    let mut buf = BytesMut::new();
    buf.put_slice(&[0x00, 0x11, 0x22, 0x33]);
    buf.put_slice(&GOLDEN_HEARTBEAT);

    let frame = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(frame.message, heartbeat());
}

#[test]
fn corrupted_frame_is_dropped_and_next_frame_decodes() {
    let mut corrupted = GOLDEN_HEARTBEAT;
    corrupted[14] = 0x07;
    let mut codec = MavCodec::new();
    let mut buf = BytesMut::new();
    buf.put_slice(&corrupted);
    buf.put_slice(&GOLDEN_HEARTBEAT);

    let frame = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(frame.message, heartbeat());
    assert!(buf.is_empty());
}

#[test]
fn unknown_message_id_is_dropped() {
    let mut raw = vec![0xfd, 3, 0, 0, 5, 1, 1, 0x0f, 0x27, 0x00, 1, 2, 3, 0x12, 0x34];
    raw.extend_from_slice(&GOLDEN_HEARTBEAT);

    let mut codec = MavCodec::new();
    let mut buf = BytesMut::from(&raw[..]);
    let frame = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(frame.message, heartbeat());
    assert!(buf.is_empty());
}

#[test]
fn partial_frame_waits_for_more_bytes() {
    let mut codec = MavCodec::new();
    let mut buf = BytesMut::from(&GOLDEN_HEARTBEAT[..12]);

    assert!(codec.decode(&mut buf).expect("decode").is_none());
    assert_eq!(buf.len(), 12, "partial frame retained");

    buf.put_slice(&GOLDEN_HEARTBEAT[12..]);
    let frame = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(frame.message, heartbeat());
}

#[test]
fn decode_eof_discards_partial_frame() {
    let mut codec = MavCodec::new();
    let mut buf = BytesMut::from(&GOLDEN_HEARTBEAT[..12]);

    assert!(codec.decode_eof(&mut buf).expect("decode").is_none());
    assert!(buf.is_empty());
}

#[test]
fn buffer_without_start_byte_is_cleared() {
    let mut codec = MavCodec::new();
    let mut buf = BytesMut::from(&[0x01u8, 0x02, 0x03][..]);

    assert!(codec.decode(&mut buf).expect("decode").is_none());
    assert!(buf.is_empty());
}
