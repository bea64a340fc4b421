//! Simple two-field time packet.
//!
//! The request carries the client's local send time; the server fills
//! in its own time and echoes the packet back unchanged otherwise.
//! Both fields are raw big-endian nanosecond counts, no header.

use byteorder::{ByteOrder, NetworkEndian};

use crate::error::PacketError;

use super::timestamp::Timestamp;

/// Wire size of a simple time packet.
pub const SIMPLE_PACKET_SIZE: usize = 16;

/// A simple time packet: one local-time and one remote-time field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimplePacket {
    /// Client time: set by the client on send, echoed by the server.
    pub local_time: Timestamp,
    /// Server time: `NONE` in a request, filled in by the server.
    pub remote_time: Timestamp,
}

impl SimplePacket {
    /// Build a request carrying the client's send time.
    #[must_use]
    pub fn request(local_time: Timestamp) -> Self {
        Self {
            local_time,
            remote_time: Timestamp::NONE,
        }
    }

    /// Encode to the fixed 16-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; SIMPLE_PACKET_SIZE] {
        let mut buf = [0u8; SIMPLE_PACKET_SIZE];
        NetworkEndian::write_u64(&mut buf[0..8], self.local_time.as_nanos());
        NetworkEndian::write_u64(&mut buf[8..16], self.remote_time.as_nanos());
        buf
    }

    /// Decode from a received datagram.
    ///
    /// # Errors
    /// Returns [`PacketError::ShortPacket`] if the buffer is smaller
    /// than [`SIMPLE_PACKET_SIZE`]. No other validation is performed.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < SIMPLE_PACKET_SIZE {
            return Err(PacketError::ShortPacket {
                needed: SIMPLE_PACKET_SIZE,
                have: buf.len(),
            });
        }
        Ok(Self {
            local_time: Timestamp::from_nanos(NetworkEndian::read_u64(&buf[0..8])),
            remote_time: Timestamp::from_nanos(NetworkEndian::read_u64(&buf[8..16])),
        })
    }
}
