use std::io;

use thiserror::Error;

/// Errors produced by the wire packet codecs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer was too small for the expected fixed-size packet.
    #[error("short packet: needed {needed} bytes, have {have}")]
    ShortPacket {
        /// Bytes required by the wire format.
        needed: usize,
        /// Bytes actually available.
        have: usize,
    },

    /// Response carried an NTP version other than 4.
    #[error("wrong NTP version: {0}")]
    WrongVersion(u8),

    /// Kiss-of-Death: the server refuses to serve this client.
    ///
    /// Covers the AUTH, AUTO, CRYP, DENY, RSTR and NKEY codes. The
    /// polling loop for the endpoint must terminate permanently.
    #[error("kiss-of-death deny, code \"{}\"", String::from_utf8_lossy(.code))]
    KodDeny {
        /// Four-character ASCII reason code from the reference-id field.
        code: [u8; 4],
    },

    /// Kiss-of-Death: the server asks the client to slow down (RATE).
    #[error("kiss-of-death rate limit")]
    KodRate {
        /// Poll interval suggested by the server, when decodable.
        poll_interval: Option<std::time::Duration>,
    },

    /// Kiss-of-Death with a code this client does not recognize.
    ///
    /// Treated as fatal, like a deny.
    #[error("kiss-of-death with unknown code \"{}\"", String::from_utf8_lossy(.code))]
    KodUnknown {
        /// Four-character ASCII reason code from the reference-id field.
        code: [u8; 4],
    },
}

impl PacketError {
    /// Whether this error permanently disqualifies the remote endpoint.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::KodDeny { .. } | Self::KodUnknown { .. })
    }
}

/// Errors surfaced by the public clock API.
#[derive(Debug, Error)]
pub enum NetSyncError {
    /// Socket setup or I/O failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// A wire packet could not be decoded.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
}
