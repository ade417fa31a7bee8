//! TCP segment assembly and disassembly.

use std::net::Ipv4Addr;

use super::udp::pseudo_header;
use super::{checksum, ipv4, DecodeError};

/// The nine TCP flag bits, NS included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub ns: bool,
    pub cwr: bool,
    pub ece: bool,
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,
}

impl TcpFlags {
    fn low_byte(&self) -> u8 {
        let mut out = 0u8;
        for (shift, bit) in [
            self.fin, self.syn, self.rst, self.psh, self.ack, self.urg, self.ece, self.cwr,
        ]
        .into_iter()
        .enumerate()
        {
            out |= (bit as u8) << shift;
        }
        out
    }

    fn from_wire(ns: bool, low: u8) -> Self {
        Self {
            ns,
            cwr: low & 0x80 != 0,
            ece: low & 0x40 != 0,
            urg: low & 0x20 != 0,
            ack: low & 0x10 != 0,
            psh: low & 0x08 != 0,
            rst: low & 0x04 != 0,
            syn: low & 0x02 != 0,
            fin: low & 0x01 != 0,
        }
    }
}

/// A TCP segment. `data_offset` is in 32-bit words; option bytes occupy
/// `(data_offset - 5) * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub source: u16,
    pub destination: u16,
    pub sequence: u32,
    pub acknowledgment: u32,
    pub data_offset: u8,
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    pub const MIN_HEADER_LEN: usize = 20;

    pub fn new(source: u16, destination: u16, flags: TcpFlags, payload: Vec<u8>) -> Self {
        Self {
            source,
            destination,
            sequence: 0,
            acknowledgment: 0,
            data_offset: 5,
            flags,
            window: 5840,
            checksum: 0,
            urgent: 0,
            options: Vec::new(),
            payload,
        }
    }

    /// Computes the checksum over the pseudo-header and the segment.
    pub fn calc_checksum(&mut self, source: Ipv4Addr, destination: Ipv4Addr) {
        self.data_offset = 5 + (self.options.len() / 4) as u8;
        self.checksum = 0;

        let segment = self.build();
        let sum = checksum::accumulate(
            &pseudo_header(source, destination, ipv4::PROTOCOL_TCP, segment.len() as u16),
            0,
        );
        self.checksum = checksum::checksum_transport(checksum::accumulate(&segment, sum));
    }

    pub fn verify_checksum(&self, source: Ipv4Addr, destination: Ipv4Addr) -> bool {
        let mut segment = self.build();
        segment[16] = 0;
        segment[17] = 0;

        let sum = checksum::accumulate(
            &pseudo_header(source, destination, ipv4::PROTOCOL_TCP, segment.len() as u16),
            0,
        );
        checksum::checksum_transport(checksum::accumulate(&segment, sum)) == self.checksum
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::MIN_HEADER_LEN + self.options.len() + self.payload.len());

        out.extend_from_slice(&self.source.to_be_bytes());
        out.extend_from_slice(&self.destination.to_be_bytes());
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.acknowledgment.to_be_bytes());
        out.push((self.data_offset << 4) | (self.flags.ns as u8));
        out.push(self.flags.low_byte());
        out.extend_from_slice(&self.window.to_be_bytes());
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.urgent.to_be_bytes());
        out.extend_from_slice(&self.options);
        out.extend_from_slice(&self.payload);

        out
    }

    pub fn disassemble(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::need(data, Self::MIN_HEADER_LEN)?;

        let data_offset = data[12] >> 4;
        if data_offset < 5 {
            return Err(DecodeError::InvalidHeaderLength(data_offset));
        }
        let header_len = data_offset as usize * 4;
        DecodeError::need(data, header_len)?;

        Ok(Self {
            source: u16::from_be_bytes([data[0], data[1]]),
            destination: u16::from_be_bytes([data[2], data[3]]),
            sequence: u32::from_be_bytes(data[4..8].try_into().unwrap()),
            acknowledgment: u32::from_be_bytes(data[8..12].try_into().unwrap()),
            data_offset,
            flags: TcpFlags::from_wire(data[12] & 0x01 != 0, data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
            checksum: u16::from_be_bytes([data[16], data[17]]),
            urgent: u16::from_be_bytes([data[18], data[19]]),
            options: data[Self::MIN_HEADER_LEN..header_len].to_vec(),
            payload: data[header_len..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 1, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(10, 1, 1, 2);

    #[test]
    fn round_trip() {
        let mut segment = TcpSegment::new(
            30000,
            8080,
            TcpFlags {
                syn: true,
                ..Default::default()
            },
            vec![1, 2, 3],
        );
        segment.sequence = 0x01020304;
        segment.calc_checksum(SRC, DST);

        assert_eq!(TcpSegment::disassemble(&segment.build()).unwrap(), segment);
    }

    #[test]
    fn all_nine_flags_survive() {
        let flags = TcpFlags {
            ns: true,
            cwr: true,
            ece: true,
            urg: true,
            ack: true,
            psh: true,
            rst: true,
            syn: true,
            fin: true,
        };
        let segment = TcpSegment::new(1, 2, flags, vec![]);
        let parsed = TcpSegment::disassemble(&segment.build()).unwrap();
        assert_eq!(parsed.flags, flags);
    }

    #[test]
    fn options_round_trip() {
        let mut segment = TcpSegment::new(5, 6, TcpFlags::default(), vec![0xAA; 7]);
        segment.options = vec![0x02, 0x04, 0x05, 0xB4]; // MSS 1460
        segment.calc_checksum(SRC, DST);

        let parsed = TcpSegment::disassemble(&segment.build()).unwrap();
        assert_eq!(parsed.data_offset, 6);
        assert_eq!(parsed.options, segment.options);
        assert!(parsed.verify_checksum(SRC, DST));
    }

    #[test]
    fn corruption_detected() {
        let mut segment = TcpSegment::new(80, 443, TcpFlags::default(), b"abc".to_vec());
        segment.calc_checksum(SRC, DST);

        let mut parsed = TcpSegment::disassemble(&segment.build()).unwrap();
        parsed.sequence ^= 1;
        assert!(!parsed.verify_checksum(SRC, DST));
    }
}
