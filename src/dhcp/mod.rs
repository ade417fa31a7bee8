//! The DHCPv4 server: option registry, BOOTP packet codec, address
//! pool, expiry scheduler, and the message handler tying them together
//! over a raw Ethernet socket.

pub mod config;
pub mod options;
pub mod packet;
pub mod persist;
pub mod pool;
pub mod scheduler;
pub mod server;

use thiserror::Error;

/// Errors raised while decoding DHCP payloads. Servers drop the packet
/// and keep listening; library callers get the typed cause.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DhcpError {
    #[error("truncated packet: needed {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("hardware length {0} is not an Ethernet address")]
    InvalidHlen(u8),

    #[error("magic cookie not found")]
    MissingCookie,

    #[error("option {code} runs past the end of the stream")]
    OptionOverrun { code: u8 },
}
