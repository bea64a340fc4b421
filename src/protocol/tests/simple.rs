use crate::error::PacketError;
use crate::protocol::simple::{SIMPLE_PACKET_SIZE, SimplePacket};
use crate::protocol::timestamp::Timestamp;

#[test]
fn test_round_trip_exact() {
    let packet = SimplePacket {
        local_time: Timestamp::from_nanos(123_456_789),
        remote_time: Timestamp::from_nanos(987_654_321),
    };
    let decoded = SimplePacket::decode(&packet.encode()).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn test_request_leaves_remote_unset() {
    let request = SimplePacket::request(Timestamp::from_nanos(42));
    assert_eq!(request.local_time, Timestamp::from_nanos(42));
    assert!(request.remote_time.is_none());

    // The sentinel survives the wire.
    let decoded = SimplePacket::decode(&request.encode()).unwrap();
    assert!(decoded.remote_time.is_none());
}

#[test]
fn test_wire_is_big_endian() {
    let packet = SimplePacket {
        local_time: Timestamp::from_nanos(0x0102_0304_0506_0708),
        remote_time: Timestamp::ZERO,
    };
    let buf = packet.encode();
    assert_eq!(&buf[0..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_short_buffer_rejected() {
    let err = SimplePacket::decode(&[0u8; SIMPLE_PACKET_SIZE - 1]).unwrap_err();
    assert_eq!(
        err,
        PacketError::ShortPacket {
            needed: SIMPLE_PACKET_SIZE,
            have: SIMPLE_PACKET_SIZE - 1,
        }
    );
}

#[test]
fn test_trailing_bytes_tolerated() {
    let mut buf = [0u8; SIMPLE_PACKET_SIZE + 8];
    let packet = SimplePacket::request(Timestamp::from_nanos(7));
    buf[..SIMPLE_PACKET_SIZE].copy_from_slice(&packet.encode());
    assert_eq!(SimplePacket::decode(&buf).unwrap(), packet);
}
