//! The DNS resolver/server: message codec, record storage with cache
//! and blocklists, and one protocol core served over UDP, TCP and
//! TCP-over-TLS.

pub mod message;
pub mod server;
pub mod storage;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("truncated message: needed {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("label length byte {0:#04x} is neither a length nor a pointer")]
    InvalidLabel(u8),

    #[error("compression pointer to offset {0} outside the message")]
    PointerOutOfRange(usize),

    #[error("compression pointer chain exceeds the depth limit")]
    PointerLoop,
}
