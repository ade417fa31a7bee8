//! Ethernet II frame assembly and disassembly.

use mac_address::MacAddress;

use super::DecodeError;

/// EtherType carried by IPv4 payloads.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// Tag protocol identifier for customer VLAN tags (802.1Q).
pub const TPID_VLAN: u16 = 0x8100;
/// Tag protocol identifier for service VLAN tags (802.1ad, Q-in-Q).
pub const TPID_SERVICE_VLAN: u16 = 0x88A8;

/// The broadcast hardware address.
pub fn broadcast_mac() -> MacAddress {
    MacAddress::new([0xFF; 6])
}

/// An 802.1Q/802.1ad tag: the protocol identifier that announced it plus
/// the 16-bit tag control word (PCP/DEI/VID).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    pub tpid: u16,
    pub tci: u16,
}

/// An Ethernet II frame.
///
/// A tagged frame is four bytes longer than an untagged one; the tag is
/// detected from the two bytes at offset 12 on the wire, never from a
/// flag supplied by the caller. The CRC trailer is neither expected on
/// ingress (the kernel strips it on raw sockets) nor emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub destination: MacAddress,
    pub source: MacAddress,
    pub tag: Option<VlanTag>,
    pub ethertype: u16,
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    const HEADER_LEN: usize = 14;

    /// An untagged frame carrying `payload` under `ethertype`.
    pub fn new(
        destination: MacAddress,
        source: MacAddress,
        ethertype: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            destination,
            source,
            tag: None,
            ethertype,
            payload,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + 4 + self.payload.len());

        out.extend_from_slice(&self.destination.bytes());
        out.extend_from_slice(&self.source.bytes());
        if let Some(tag) = self.tag {
            out.extend_from_slice(&tag.tpid.to_be_bytes());
            out.extend_from_slice(&tag.tci.to_be_bytes());
        }
        out.extend_from_slice(&self.ethertype.to_be_bytes());
        out.extend_from_slice(&self.payload);

        out
    }

    pub fn disassemble(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::need(data, Self::HEADER_LEN)?;

        let destination = MacAddress::new(data[0..6].try_into().unwrap());
        let source = MacAddress::new(data[6..12].try_into().unwrap());

        let tpid = u16::from_be_bytes([data[12], data[13]]);
        let (tag, type_at) = if tpid == TPID_VLAN || tpid == TPID_SERVICE_VLAN {
            DecodeError::need(data, Self::HEADER_LEN + 4)?;
            let tci = u16::from_be_bytes([data[14], data[15]]);
            (Some(VlanTag { tpid, tci }), 16)
        } else {
            (None, 12)
        };

        let ethertype = u16::from_be_bytes([data[type_at], data[type_at + 1]]);
        let payload = data[type_at + 2..].to_vec();

        Ok(Self {
            destination,
            source,
            tag,
            ethertype,
            payload,
        })
    }
}
