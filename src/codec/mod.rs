//! Wire-format codecs.
//!
//! Every frame type in this module exposes `build() -> Vec<u8>` and
//! `disassemble(&[u8]) -> Result<Self, DecodeError>`. The codecs never
//! touch sockets; the servers feed them bytes through [`crate::netio`].

pub mod ber;
pub mod checksum;
pub mod complement;
pub mod ethernet;
pub mod ipv4;
pub mod ldap;
pub mod tcp;
pub mod udp;

use thiserror::Error;

/// Errors produced while disassembling raw frames.
///
/// Servers treat these as recoverable: the offending packet is dropped
/// and the receive loop continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated frame: needed {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("not an IPv4 header (version {0})")]
    NotIpv4(u8),

    #[error("invalid header length {0}")]
    InvalidHeaderLength(u8),

    #[error("header checksum mismatch")]
    BadChecksum,
}

impl DecodeError {
    /// Bounds check used by the frame disassemblers.
    pub(crate) fn need(data: &[u8], needed: usize) -> Result<(), DecodeError> {
        if data.len() < needed {
            Err(DecodeError::Truncated {
                needed,
                have: data.len(),
            })
        } else {
            Ok(())
        }
    }
}
