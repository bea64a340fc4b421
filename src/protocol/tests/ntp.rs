use std::time::Duration;

use byteorder::{ByteOrder, NetworkEndian};

use crate::error::PacketError;
use crate::protocol::ntp::{NTP_PACKET_SIZE, NtpPacket};
use crate::protocol::timestamp::Timestamp;

/// Build a plausible server response.
fn response(stratum: u8, poll: u8, origin: Timestamp, receive: Timestamp, transmit: Timestamp) -> [u8; NTP_PACKET_SIZE] {
    let mut buf = [0u8; NTP_PACKET_SIZE];
    buf[0] = (4 << 3) | 4; // version 4, mode server
    buf[1] = stratum;
    buf[2] = poll;
    NetworkEndian::write_u64(&mut buf[24..32], origin.to_ntp_fixed());
    NetworkEndian::write_u64(&mut buf[32..40], receive.to_ntp_fixed());
    NetworkEndian::write_u64(&mut buf[40..48], transmit.to_ntp_fixed());
    buf
}

fn kod(code: &[u8; 4]) -> [u8; NTP_PACKET_SIZE] {
    let mut buf = response(0, 3, Timestamp::ZERO, Timestamp::ZERO, Timestamp::ZERO);
    buf[12..16].copy_from_slice(code);
    buf
}

#[test]
fn test_request_header() {
    let buf = NtpPacket::request(Timestamp::from_nanos(1)).encode();
    assert_eq!(buf.len(), NTP_PACKET_SIZE);
    // leap=unknown(3), version=4, mode=client(3).
    assert_eq!(buf[0], 0xE3);
    // Unsynchronized client stratum, no usable poll interval.
    assert_eq!(buf[1], 16);
    assert_eq!(buf[2], 3);
    // Root delay/dispersion/reference fields zero-filled.
    assert!(buf[4..24].iter().all(|&b| b == 0));
}

#[test]
fn test_request_carries_send_time_in_transmit() {
    let send_time = Timestamp::from_nanos(5_000_000_123);
    let buf = NtpPacket::request(send_time).encode();
    let transmit = Timestamp::from_ntp_fixed(NetworkEndian::read_u64(&buf[40..48]));
    assert!(send_time.as_nanos().abs_diff(transmit.as_nanos()) <= 1);
}

#[test]
fn test_decode_response_timestamps() {
    let origin = Timestamp::from_nanos(1_000_000_000);
    let receive = Timestamp::from_nanos(2_000_000_500);
    let transmit = Timestamp::from_nanos(2_000_001_500);
    let packet = NtpPacket::decode(&response(2, 6, origin, receive, transmit)).unwrap();

    assert!(packet.origin_time.as_nanos().abs_diff(origin.as_nanos()) <= 1);
    assert!(packet.receive_time.as_nanos().abs_diff(receive.as_nanos()) <= 1);
    assert!(packet.transmit_time.as_nanos().abs_diff(transmit.as_nanos()) <= 1);
}

#[test]
fn test_poll_exponent_decoding() {
    let ts = Timestamp::ZERO;
    let decode_poll = |poll: u8| NtpPacket::decode(&response(2, poll, ts, ts, ts)).unwrap().poll_interval;

    // >= 3 carries no usable interval.
    assert_eq!(decode_poll(3), None);
    assert_eq!(decode_poll(10), None);
    // 0..=2 are 1s << exp.
    assert_eq!(decode_poll(0), Some(Duration::from_secs(1)));
    assert_eq!(decode_poll(2), Some(Duration::from_secs(4)));
    // Negative exponents are sub-second.
    #[allow(clippy::cast_sign_loss)]
    let minus_two = -2i8 as u8;
    assert_eq!(decode_poll(minus_two), Some(Duration::from_millis(250)));
}

#[test]
fn test_wrong_version_rejected() {
    let mut buf = response(2, 6, Timestamp::ZERO, Timestamp::ZERO, Timestamp::ZERO);
    buf[0] = (3 << 3) | 4; // version 3
    assert_eq!(NtpPacket::decode(&buf).unwrap_err(), PacketError::WrongVersion(3));
}

#[test]
fn test_short_packet_rejected() {
    let err = NtpPacket::decode(&[0u8; NTP_PACKET_SIZE - 1]).unwrap_err();
    assert_eq!(
        err,
        PacketError::ShortPacket {
            needed: NTP_PACKET_SIZE,
            have: NTP_PACKET_SIZE - 1,
        }
    );
}

#[test]
fn test_kod_rate() {
    let mut buf = kod(b"RATE");
    buf[2] = 1; // server suggests a 2 s poll interval
    assert_eq!(
        NtpPacket::decode(&buf).unwrap_err(),
        PacketError::KodRate {
            poll_interval: Some(Duration::from_secs(2)),
        }
    );
}

#[test]
fn test_kod_deny_codes() {
    for code in [b"AUTH", b"AUTO", b"CRYP", b"DENY", b"RSTR", b"NKEY"] {
        let err = NtpPacket::decode(&kod(code)).unwrap_err();
        assert_eq!(err, PacketError::KodDeny { code: *code }, "code {:?}", code);
        assert!(err.is_fatal());
    }
}

#[test]
fn test_kod_unknown_code() {
    let err = NtpPacket::decode(&kod(b"XXXX")).unwrap_err();
    assert_eq!(err, PacketError::KodUnknown { code: *b"XXXX" });
    assert!(err.is_fatal());
}

#[test]
fn test_nonzero_stratum_never_kod() {
    // A "RATE" reference id on a real time reading is not a KoD.
    let mut buf = response(2, 6, Timestamp::ZERO, Timestamp::ZERO, Timestamp::ZERO);
    buf[12..16].copy_from_slice(b"RATE");
    assert!(NtpPacket::decode(&buf).is_ok());
}
