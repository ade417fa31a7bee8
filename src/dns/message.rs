//! The DNS message codec (RFC 1035): header, questions and resource
//! records, with name compression honored on decode.
//!
//! Decoding keeps a reference to the whole original message, since
//! compression pointers are absolute offsets into it. Outgoing names
//! are written as plain labels; no compression is emitted.

use std::net::{Ipv4Addr, Ipv6Addr};

use super::DnsError;

/// Pointer chains longer than this are treated as malformed. Any
/// legitimate name fits in far fewer jumps; a cycle never terminates.
const MAX_POINTER_DEPTH: usize = 128;

/// A resource record type. Known values get names and typed rdata
/// interpretation; everything else is carried numerically with its
/// rdata opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordType(pub u16);

impl RecordType {
    pub const A: Self = Self(1);
    pub const NS: Self = Self(2);
    pub const CNAME: Self = Self(5);
    pub const SOA: Self = Self(6);
    pub const PTR: Self = Self(12);
    pub const MX: Self = Self(15);
    pub const TXT: Self = Self(16);
    pub const AAAA: Self = Self(28);
    pub const SRV: Self = Self(33);
    pub const ANY: Self = Self(255);
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::A => write!(f, "A"),
            Self::NS => write!(f, "NS"),
            Self::CNAME => write!(f, "CNAME"),
            Self::SOA => write!(f, "SOA"),
            Self::PTR => write!(f, "PTR"),
            Self::MX => write!(f, "MX"),
            Self::TXT => write!(f, "TXT"),
            Self::AAAA => write!(f, "AAAA"),
            Self::SRV => write!(f, "SRV"),
            Self::ANY => write!(f, "ANY"),
            Self(other) => write!(f, "TYPE{other}"),
        }
    }
}

/// A resource record class; practically always `IN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordClass(pub u16);

impl RecordClass {
    pub const IN: Self = Self(1);
    pub const CH: Self = Self(3);
    pub const HS: Self = Self(4);
    pub const NONE: Self = Self(254);
    pub const ANY: Self = Self(255);
}

/// The header flag word, bit by bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: bool,
    pub ad: bool,
    pub cd: bool,
    pub rcode: u8,
}

impl Flags {
    fn decode(word: u16) -> Self {
        Self {
            qr: word & 0x8000 != 0,
            opcode: ((word >> 11) & 0x0F) as u8,
            aa: word & 0x0400 != 0,
            tc: word & 0x0200 != 0,
            rd: word & 0x0100 != 0,
            ra: word & 0x0080 != 0,
            z: word & 0x0040 != 0,
            ad: word & 0x0020 != 0,
            cd: word & 0x0010 != 0,
            rcode: (word & 0x000F) as u8,
        }
    }

    fn encode(&self) -> u16 {
        (self.qr as u16) << 15
            | u16::from(self.opcode & 0x0F) << 11
            | (self.aa as u16) << 10
            | (self.tc as u16) << 9
            | (self.rd as u16) << 8
            | (self.ra as u16) << 7
            | (self.z as u16) << 6
            | (self.ad as u16) << 5
            | (self.cd as u16) << 4
            | u16::from(self.rcode & 0x0F)
    }
}

/// One question: name, type, class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl Question {
    pub fn new(name: impl Into<String>, qtype: RecordType) -> Self {
        Self {
            name: name.into(),
            qtype,
            qclass: RecordClass::IN,
        }
    }
}

/// Typed view over a record's rdata, produced by the type factory at
/// decode time (PTR-style names need the whole message to expand).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    /// PTR, NS and CNAME carry a (possibly compressed) name.
    Name(String),
    Raw(Vec<u8>),
}

/// A resource record. `rdata` holds the wire bytes; `data` the typed
/// interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: RecordType,
    pub rclass: RecordClass,
    pub ttl: u32,
    pub rdata: Vec<u8>,
    pub data: RData,
}

impl ResourceRecord {
    /// An A record pointing at `addr`.
    pub fn a(name: impl Into<String>, ttl: u32, addr: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            rtype: RecordType::A,
            rclass: RecordClass::IN,
            ttl,
            rdata: addr.octets().to_vec(),
            data: RData::A(addr),
        }
    }

    pub fn aaaa(name: impl Into<String>, ttl: u32, addr: Ipv6Addr) -> Self {
        Self {
            name: name.into(),
            rtype: RecordType::AAAA,
            rclass: RecordClass::IN,
            ttl,
            rdata: addr.octets().to_vec(),
            data: RData::Aaaa(addr),
        }
    }

    /// A PTR record whose rdata is the target name, uncompressed.
    pub fn ptr(name: impl Into<String>, ttl: u32, target: &str) -> Self {
        Self {
            name: name.into(),
            rtype: RecordType::PTR,
            rclass: RecordClass::IN,
            ttl,
            rdata: encode_name(target),
            data: RData::Name(target.to_string()),
        }
    }

    fn interpret(rtype: RecordType, rdata: &[u8], message: &[u8], rdata_at: usize) -> RData {
        match rtype {
            RecordType::A => match <[u8; 4]>::try_from(rdata) {
                Ok(octets) => RData::A(Ipv4Addr::from(octets)),
                Err(_) => RData::Raw(rdata.to_vec()),
            },
            RecordType::AAAA => match <[u8; 16]>::try_from(rdata) {
                Ok(octets) => RData::Aaaa(Ipv6Addr::from(octets)),
                Err(_) => RData::Raw(rdata.to_vec()),
            },
            RecordType::PTR | RecordType::NS | RecordType::CNAME => {
                let mut cursor = rdata_at;
                match decode_name(message, &mut cursor) {
                    Ok(name) => RData::Name(name),
                    Err(_) => RData::Raw(rdata.to_vec()),
                }
            }
            _ => RData::Raw(rdata.to_vec()),
        }
    }
}

/// A whole DNS message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub id: u16,
    pub flags: Flags,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl Message {
    /// A recursive query for one question.
    pub fn query(id: u16, question: Question) -> Self {
        Self {
            id,
            flags: Flags {
                rd: true,
                ..Flags::default()
            },
            questions: vec![question],
            ..Self::default()
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, DnsError> {
        if data.len() < 12 {
            return Err(DnsError::Truncated {
                needed: 12,
                have: data.len(),
            });
        }

        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = Flags::decode(u16::from_be_bytes([data[2], data[3]]));
        let counts: Vec<usize> = (0..4)
            .map(|i| u16::from_be_bytes([data[4 + 2 * i], data[5 + 2 * i]]) as usize)
            .collect();

        let mut cursor = 12;

        let mut questions = Vec::with_capacity(counts[0].min(64));
        for _ in 0..counts[0] {
            questions.push(decode_question(data, &mut cursor)?);
        }

        let mut sections: [Vec<ResourceRecord>; 3] = Default::default();
        for (section, count) in sections.iter_mut().zip(&counts[1..]) {
            for _ in 0..*count {
                section.push(decode_record(data, &mut cursor)?);
            }
        }
        let [answers, authorities, additionals] = sections;

        Ok(Self {
            id,
            flags,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);

        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.flags.encode().to_be_bytes());
        for count in [
            self.questions.len(),
            self.answers.len(),
            self.authorities.len(),
            self.additionals.len(),
        ] {
            out.extend_from_slice(&(count as u16).to_be_bytes());
        }

        for question in &self.questions {
            out.extend(encode_name(&question.name));
            out.extend_from_slice(&question.qtype.0.to_be_bytes());
            out.extend_from_slice(&question.qclass.0.to_be_bytes());
        }

        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            out.extend(encode_name(&record.name));
            out.extend_from_slice(&record.rtype.0.to_be_bytes());
            out.extend_from_slice(&record.rclass.0.to_be_bytes());
            out.extend_from_slice(&record.ttl.to_be_bytes());
            out.extend_from_slice(&(record.rdata.len() as u16).to_be_bytes());
            out.extend_from_slice(&record.rdata);
        }

        out
    }
}

fn need(data: &[u8], cursor: usize, len: usize) -> Result<(), DnsError> {
    if data.len() < cursor + len {
        Err(DnsError::Truncated {
            needed: cursor + len,
            have: data.len(),
        })
    } else {
        Ok(())
    }
}

fn decode_question(data: &[u8], cursor: &mut usize) -> Result<Question, DnsError> {
    let name = decode_name(data, cursor)?;
    need(data, *cursor, 4)?;

    let qtype = RecordType(u16::from_be_bytes([data[*cursor], data[*cursor + 1]]));
    let qclass = RecordClass(u16::from_be_bytes([data[*cursor + 2], data[*cursor + 3]]));
    *cursor += 4;

    Ok(Question {
        name,
        qtype,
        qclass,
    })
}

fn decode_record(data: &[u8], cursor: &mut usize) -> Result<ResourceRecord, DnsError> {
    let name = decode_name(data, cursor)?;
    need(data, *cursor, 10)?;

    let rtype = RecordType(u16::from_be_bytes([data[*cursor], data[*cursor + 1]]));
    let rclass = RecordClass(u16::from_be_bytes([data[*cursor + 2], data[*cursor + 3]]));
    let ttl = u32::from_be_bytes(data[*cursor + 4..*cursor + 8].try_into().unwrap());
    let rdata_len = u16::from_be_bytes([data[*cursor + 8], data[*cursor + 9]]) as usize;
    *cursor += 10;

    need(data, *cursor, rdata_len)?;
    let rdata_at = *cursor;
    let rdata = data[*cursor..*cursor + rdata_len].to_vec();
    *cursor += rdata_len;

    let data_view = ResourceRecord::interpret(rtype, &rdata, data, rdata_at);

    Ok(ResourceRecord {
        name,
        rtype,
        rclass,
        ttl,
        rdata,
        data: data_view,
    })
}

/// Walks one name starting at `cursor`, following compression pointers
/// into `message` with a bounded depth.
pub fn decode_name(message: &[u8], cursor: &mut usize) -> Result<String, DnsError> {
    let mut labels = Vec::new();
    decode_name_at(message, cursor, 0, &mut labels)?;
    Ok(labels.join("."))
}

fn decode_name_at(
    message: &[u8],
    cursor: &mut usize,
    depth: usize,
    labels: &mut Vec<String>,
) -> Result<(), DnsError> {
    if depth > MAX_POINTER_DEPTH {
        return Err(DnsError::PointerLoop);
    }

    loop {
        need(message, *cursor, 1)?;
        let length = message[*cursor];

        if length & 0xC0 == 0xC0 {
            need(message, *cursor, 2)?;
            let offset =
                (usize::from(length & 0x3F) << 8) | usize::from(message[*cursor + 1]);
            *cursor += 2;

            if offset >= message.len() {
                return Err(DnsError::PointerOutOfRange(offset));
            }

            // The pointer ends this name; the referenced suffix is
            // decoded in place with its own cursor.
            let mut target = offset;
            return decode_name_at(message, &mut target, depth + 1, labels);
        }

        if length & 0xC0 != 0 {
            return Err(DnsError::InvalidLabel(length));
        }

        *cursor += 1;
        if length == 0 {
            return Ok(());
        }

        let length = usize::from(length);
        need(message, *cursor, length)?;
        labels.push(String::from_utf8_lossy(&message[*cursor..*cursor + length]).into_owned());
        *cursor += length;
    }
}

/// Length-prefixed labels, zero-terminated, no compression.
pub fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    for label in name.split('.').filter(|label| !label.is_empty()) {
        let bytes = label.as_bytes();
        out.push(bytes.len().min(63) as u8);
        out.extend_from_slice(&bytes[..bytes.len().min(63)]);
    }
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_round_trip() {
        let wire = encode_name("foo.example.com");
        assert_eq!(wire[0], 3);
        let mut cursor = 0;
        assert_eq!(decode_name(&wire, &mut cursor).unwrap(), "foo.example.com");
        assert_eq!(cursor, wire.len());
    }

    #[test]
    fn root_name_is_single_zero() {
        assert_eq!(encode_name(""), vec![0]);
        let mut cursor = 0;
        assert_eq!(decode_name(&[0], &mut cursor).unwrap(), "");
    }

    #[test]
    fn message_round_trip_without_compression() {
        let message = Message {
            id: 0xBEEF,
            flags: Flags {
                qr: true,
                rd: true,
                ra: true,
                ..Flags::default()
            },
            questions: vec![Question::new("example.com", RecordType::A)],
            answers: vec![ResourceRecord::a(
                "example.com",
                3600,
                Ipv4Addr::new(93, 184, 216, 34),
            )],
            ..Message::default()
        };

        let wire = message.encode();
        assert_eq!(Message::decode(&wire).unwrap(), message);
    }

    #[test]
    fn flag_bits_sit_where_rfc1035_says() {
        let flags = Flags {
            qr: true,
            opcode: 2,
            aa: true,
            rd: true,
            rcode: 3,
        ..Flags::default()
        };
        // QR(15) + opcode 2 (11..14) + AA(10) + RD(8) + RCODE 3.
        assert_eq!(flags.encode(), 0x9503);
        assert_eq!(Flags::decode(0x9503), flags);
    }

    #[test]
    fn pointer_expands_to_referenced_name() {
        // A query for example.com followed by an answer whose name is
        // the pointer C0 0C (offset 12, the question's name).
        let mut wire = Vec::new();
        wire.extend_from_slice(&0x1234u16.to_be_bytes());
        wire.extend_from_slice(&0x8180u16.to_be_bytes());
        wire.extend_from_slice(&1u16.to_be_bytes()); // qd
        wire.extend_from_slice(&1u16.to_be_bytes()); // an
        wire.extend_from_slice(&0u16.to_be_bytes());
        wire.extend_from_slice(&0u16.to_be_bytes());
        wire.extend(encode_name("example.com")); // at offset 12
        wire.extend_from_slice(&RecordType::A.0.to_be_bytes());
        wire.extend_from_slice(&RecordClass::IN.0.to_be_bytes());
        wire.extend_from_slice(&[0xC0, 0x0C]); // answer name: pointer
        wire.extend_from_slice(&RecordType::A.0.to_be_bytes());
        wire.extend_from_slice(&RecordClass::IN.0.to_be_bytes());
        wire.extend_from_slice(&60u32.to_be_bytes());
        wire.extend_from_slice(&4u16.to_be_bytes());
        wire.extend_from_slice(&[1, 2, 3, 4]);

        let message = Message::decode(&wire).unwrap();
        assert_eq!(message.answers[0].name, "example.com");
        assert_eq!(message.answers[0].data, RData::A(Ipv4Addr::new(1, 2, 3, 4)));

        // Re-encoding produces an equivalent, uncompressed message.
        let reencoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(reencoded.answers[0].name, "example.com");
    }

    #[test]
    fn ptr_rdata_follows_compression() {
        // PTR answer whose rdata points back at a name stored in the
        // question section.
        let mut wire = Vec::new();
        wire.extend_from_slice(&0x0001u16.to_be_bytes());
        wire.extend_from_slice(&0x8000u16.to_be_bytes());
        wire.extend_from_slice(&1u16.to_be_bytes());
        wire.extend_from_slice(&1u16.to_be_bytes());
        wire.extend_from_slice(&0u16.to_be_bytes());
        wire.extend_from_slice(&0u16.to_be_bytes());
        wire.extend(encode_name("4.3.2.1.in-addr.arpa")); // offset 12
        wire.extend_from_slice(&RecordType::PTR.0.to_be_bytes());
        wire.extend_from_slice(&RecordClass::IN.0.to_be_bytes());

        let target_at = wire.len();
        wire.extend(encode_name("host.example.com"));
        // Pad the record around the stored target name.
        wire.extend_from_slice(&[0xC0, 0x0C]);
        wire.extend_from_slice(&RecordType::PTR.0.to_be_bytes());
        wire.extend_from_slice(&RecordClass::IN.0.to_be_bytes());
        wire.extend_from_slice(&30u32.to_be_bytes());
        wire.extend_from_slice(&2u16.to_be_bytes());
        wire.extend_from_slice(&[0xC0, target_at as u8]);

        // The stray name between sections breaks section math, so
        // decode the record by hand.
        let mut cursor = 12;
        let _question = super::decode_question(&wire, &mut cursor).unwrap();
        let mut cursor = target_at + encode_name("host.example.com").len();
        let record = super::decode_record(&wire, &mut cursor).unwrap();
        assert_eq!(record.data, RData::Name("host.example.com".to_string()));
    }

    #[test]
    fn pointer_cycle_is_rejected() {
        // Two pointers referencing each other.
        let wire = [0xC0, 0x02, 0xC0, 0x00];
        let mut cursor = 0;
        assert_eq!(
            decode_name(&wire, &mut cursor).unwrap_err(),
            DnsError::PointerLoop
        );
    }

    #[test]
    fn pointer_past_end_is_rejected() {
        let wire = [0xC0, 0x50];
        let mut cursor = 0;
        assert_eq!(
            decode_name(&wire, &mut cursor).unwrap_err(),
            DnsError::PointerOutOfRange(0x50)
        );
    }

    #[test]
    fn reserved_label_bits_rejected() {
        let wire = [0x80, 0x00];
        let mut cursor = 0;
        assert_eq!(
            decode_name(&wire, &mut cursor).unwrap_err(),
            DnsError::InvalidLabel(0x80)
        );
    }

    #[test]
    fn truncated_header_rejected() {
        assert_eq!(
            Message::decode(&[0; 5]).unwrap_err(),
            DnsError::Truncated { needed: 12, have: 5 }
        );
    }
}
