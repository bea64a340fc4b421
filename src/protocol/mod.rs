//! Wire formats for the time exchange.
//!
//! Two packet variants fill the same semantic role: a bare two-field
//! packet ([`SimplePacket`]) and an NTP-like 48-byte packet
//! ([`NtpPacket`]). Both codecs are pure transforms over fixed-size
//! big-endian buffers; all validation errors come back as
//! [`crate::error::PacketError`].

pub mod ntp;
pub mod simple;
pub mod timestamp;

#[cfg(test)]
mod tests;

// Re-exports for convenient access.
pub use ntp::{NTP_PACKET_SIZE, NtpPacket};
pub use simple::{SIMPLE_PACKET_SIZE, SimplePacket};
pub use timestamp::Timestamp;

/// Which wire format an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVariant {
    /// Two raw nanosecond fields, no header.
    #[default]
    Simple,
    /// NTP-like 48-byte packets with Kiss-of-Death handling.
    Ntp,
}
