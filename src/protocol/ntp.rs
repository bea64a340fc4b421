//! NTP-like 48-byte time packet.
//!
//! Follows the NTPv4 layout (RFC 5905) closely enough to talk to a
//! real NTP server, but the timestamps this engine puts on the wire
//! are its own monotonic nanosecond counts converted to 32.32 fixed
//! point, not wall-clock NTP-era values. RTT and offset arithmetic
//! only ever differences timestamps from the same side, so the epoch
//! never matters.
//!
//! ```text
//! 0       1       2       3
//! flags   stratum poll    precision
//! root delay (4)
//! root dispersion (4)
//! reference id (4)          <- carries the KoD code when stratum == 0
//! reference timestamp (8)
//! origin timestamp (8)      <- echo of the client's transmit time
//! receive timestamp (8)     <- server receive time
//! transmit timestamp (8)    <- server send time / client send time
//! ```

use std::time::Duration;

use byteorder::{ByteOrder, NetworkEndian};
use bytes::{BufMut, BytesMut};

use crate::error::PacketError;

use super::timestamp::Timestamp;

/// Wire size of an NTP packet (no extension fields).
pub const NTP_PACKET_SIZE: usize = 48;

/// Header flags for a client request: leap=unknown(3), version=4, mode=client(3).
const REQUEST_FLAGS: u8 = (3 << 6) | (4 << 3) | 3;

/// Stratum of an unsynchronized client request.
const REQUEST_STRATUM: u8 = 16;

/// Poll exponent sent in requests; >= 3 is "no usable interval".
const REQUEST_POLL: u8 = 3;

/// Kiss-of-Death codes that permanently deny service.
const KOD_DENY_CODES: [&[u8; 4]; 6] = [b"AUTH", b"AUTO", b"CRYP", b"DENY", b"RSTR", b"NKEY"];

/// Decoded NTP time packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpPacket {
    /// Client send time, echoed back by the server.
    pub origin_time: Timestamp,
    /// Server receive time.
    pub receive_time: Timestamp,
    /// Server send time (client send time in a request).
    pub transmit_time: Timestamp,
    /// Poll interval advertised by the server, if any.
    pub poll_interval: Option<Duration>,
}

impl NtpPacket {
    /// Build a client request. The send time travels in the transmit
    /// field; a conforming server echoes it into the response's origin.
    #[must_use]
    pub fn request(transmit_time: Timestamp) -> Self {
        Self {
            origin_time: Timestamp::ZERO,
            receive_time: Timestamp::ZERO,
            transmit_time,
            poll_interval: None,
        }
    }

    /// Encode to the fixed 48-byte wire form.
    #[must_use]
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(NTP_PACKET_SIZE);
        buf.put_u8(REQUEST_FLAGS);
        buf.put_u8(REQUEST_STRATUM);
        buf.put_u8(REQUEST_POLL);
        buf.put_u8(0); // precision
        buf.put_u32(0); // root delay
        buf.put_u32(0); // root dispersion
        buf.put_u32(0); // reference id
        buf.put_u64(0); // reference timestamp
        buf.put_u64(self.origin_time.to_ntp_fixed());
        buf.put_u64(self.receive_time.to_ntp_fixed());
        buf.put_u64(self.transmit_time.to_ntp_fixed());
        buf
    }

    /// Decode a received datagram.
    ///
    /// # Errors
    /// - [`PacketError::ShortPacket`] for anything under 48 bytes.
    /// - [`PacketError::WrongVersion`] for any version other than 4.
    /// - A [`PacketError::KodDeny`]/[`PacketError::KodRate`]/
    ///   [`PacketError::KodUnknown`] when stratum is 0: the packet is a
    ///   Kiss-of-Death control message, not a time reading.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < NTP_PACKET_SIZE {
            return Err(PacketError::ShortPacket {
                needed: NTP_PACKET_SIZE,
                have: buf.len(),
            });
        }

        let version = (buf[0] >> 3) & 0x07;
        if version != 4 {
            return Err(PacketError::WrongVersion(version));
        }

        let poll_interval = decode_poll_exponent(buf[2]);

        let stratum = buf[1];
        if stratum == 0 {
            // Kiss-of-Death: reference id carries a 4-char ASCII code.
            let code: [u8; 4] = [buf[12], buf[13], buf[14], buf[15]];
            if &code == b"RATE" {
                return Err(PacketError::KodRate { poll_interval });
            }
            if KOD_DENY_CODES.iter().any(|deny| **deny == code) {
                return Err(PacketError::KodDeny { code });
            }
            return Err(PacketError::KodUnknown { code });
        }

        Ok(Self {
            origin_time: Timestamp::from_ntp_fixed(NetworkEndian::read_u64(&buf[24..32])),
            receive_time: Timestamp::from_ntp_fixed(NetworkEndian::read_u64(&buf[32..40])),
            transmit_time: Timestamp::from_ntp_fixed(NetworkEndian::read_u64(&buf[40..48])),
            poll_interval,
        })
    }
}

/// Decode the signed poll-interval exponent from the header.
///
/// Exponents of 3 and above carry no usable interval (the request
/// itself sends 3). 0..=2 mean `1s << exp`; negative exponents mean
/// sub-second intervals `1s >> -exp`.
fn decode_poll_exponent(raw: u8) -> Option<Duration> {
    #[allow(clippy::cast_possible_wrap, reason = "poll exponent is a signed byte on the wire")]
    let exp = raw as i8;
    if exp >= 3 {
        None
    } else if exp >= 0 {
        Some(Duration::from_secs(1 << exp))
    } else {
        let shift = u32::from(exp.unsigned_abs()).min(30);
        Some(Duration::from_nanos(1_000_000_000 >> shift))
    }
}
