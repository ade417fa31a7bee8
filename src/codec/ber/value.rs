//! Typed content for BER values: the [`BerValue`] sum type and the
//! per-tag content codecs it dispatches to.

use crate::codec::complement::from_complement;

use super::{real, Ber, BerClass, BerError, BerPc, Identity, Reader, UniversalTag};

/// Decoded BER content, dispatched on the identity's `(class, tag)`.
///
/// Values of non-universal classes, and universal tags without a
/// dedicated formatter, land in [`BerValue::Unknown`] with their content
/// bytes preserved verbatim.
#[derive(Debug, Clone)]
pub enum BerValue {
    Boolean(bool),
    Integer(i128),
    Enumerated(u128),
    BitString(BitStr),
    OctetString(Vec<u8>),
    Null,
    ObjectIdentifier(Vec<u64>),
    Real(f64),
    Sequence(Vec<Ber>),
    Set(Vec<Ber>),
    /// A string or time type carried as raw bytes under its own tag. A
    /// UTF-8 view is available through [`BerValue::as_text`]; the wire
    /// representation is untouched either way.
    Text { tag: UniversalTag, bytes: Vec<u8> },
    Unknown(Vec<u8>),
}

impl BerValue {
    pub(crate) fn decode(identity: &Identity, content: &[u8]) -> Result<Self, BerError> {
        let Some(tag) = identity.universal_tag() else {
            return Ok(Self::Unknown(content.to_vec()));
        };

        if identity.pc == BerPc::Constructed {
            return Self::decode_constructed(tag, content);
        }

        match tag {
            UniversalTag::Boolean => {
                if content.is_empty() {
                    Err(BerError::EmptyBoolean)
                } else {
                    Ok(Self::Boolean(content.iter().any(|b| *b != 0)))
                }
            }
            UniversalTag::Integer => Ok(Self::Integer(decode_integer(content)?)),
            UniversalTag::Enumerated => Ok(Self::Enumerated(decode_unsigned(content)?)),
            UniversalTag::BitString => Ok(Self::BitString(decode_bit_string(content)?)),
            UniversalTag::OctetString => Ok(Self::OctetString(content.to_vec())),
            UniversalTag::Null => {
                if content.is_empty() {
                    Ok(Self::Null)
                } else {
                    Err(BerError::NonEmptyNull)
                }
            }
            UniversalTag::ObjectIdentifier => Ok(Self::ObjectIdentifier(decode_oid(content)?)),
            UniversalTag::Real => Ok(Self::Real(real::decode(content)?)),
            tag if tag.is_text() => Ok(Self::Text {
                tag,
                bytes: content.to_vec(),
            }),
            _ => Ok(Self::Unknown(content.to_vec())),
        }
    }

    fn decode_constructed(tag: UniversalTag, content: &[u8]) -> Result<Self, BerError> {
        match tag {
            UniversalTag::Sequence => Ok(Self::Sequence(decode_children(content)?)),
            UniversalTag::Set => Ok(Self::Set(decode_children(content)?)),
            tag if tag.is_string_like() => {
                let identity = Identity::universal(tag, BerPc::Constructed);
                Self::from_segments(&identity, decode_children(content)?)
            }
            _ => Ok(Self::Unknown(content.to_vec())),
        }
    }

    /// Folds the child values of an indefinite (or constructed definite)
    /// encoding into one value: string-like children concatenate,
    /// sequences and sets keep their children.
    pub(crate) fn from_segments(
        identity: &Identity,
        children: Vec<Ber>,
    ) -> Result<Self, BerError> {
        match identity.universal_tag() {
            Some(UniversalTag::Sequence) => Ok(Self::Sequence(children)),
            Some(UniversalTag::Set) => Ok(Self::Set(children)),
            Some(UniversalTag::OctetString) => {
                let mut bytes = Vec::new();
                for child in children {
                    match child.value {
                        Self::OctetString(segment) => bytes.extend(segment),
                        _ => return Err(BerError::InvalidSegment),
                    }
                }
                Ok(Self::OctetString(bytes))
            }
            Some(UniversalTag::BitString) => {
                let mut bits: Option<BitStr> = None;
                for child in children {
                    match child.value {
                        Self::BitString(segment) => {
                            bits = Some(match bits {
                                Some(head) => head.concat(&segment),
                                None => segment,
                            });
                        }
                        _ => return Err(BerError::InvalidSegment),
                    }
                }
                Ok(Self::BitString(bits.unwrap_or_else(BitStr::empty)))
            }
            Some(tag) if tag.is_text() => {
                let mut bytes = Vec::new();
                for child in children {
                    match child.value {
                        Self::Text { tag: seg_tag, bytes: segment } if seg_tag == tag => {
                            bytes.extend(segment)
                        }
                        _ => return Err(BerError::InvalidSegment),
                    }
                }
                Ok(Self::Text { tag, bytes })
            }
            _ => {
                // No universal interpretation: keep the re-encoded child
                // stream as opaque content.
                let mut bytes = Vec::new();
                for child in children {
                    bytes.extend(child.encode());
                }
                Ok(Self::Unknown(bytes))
            }
        }
    }

    pub(crate) fn encode_content(&self) -> Vec<u8> {
        match self {
            Self::Boolean(false) => vec![0x00],
            Self::Boolean(true) => vec![0xFF],
            Self::Integer(value) => encode_integer(*value),
            Self::Enumerated(value) => encode_unsigned(*value),
            Self::BitString(bits) => {
                let mut out = Vec::with_capacity(1 + bits.bytes().len());
                out.push(bits.unused());
                out.extend_from_slice(bits.bytes());
                out
            }
            Self::OctetString(bytes) => bytes.clone(),
            Self::Null => Vec::new(),
            Self::ObjectIdentifier(arcs) => encode_oid(arcs),
            Self::Real(value) => real::encode(*value),
            Self::Sequence(children) | Self::Set(children) => {
                children.iter().flat_map(Ber::encode).collect()
            }
            Self::Text { bytes, .. } => bytes.clone(),
            Self::Unknown(bytes) => bytes.clone(),
        }
    }

    /// UTF-8 view over [`BerValue::Text`] content.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { bytes, .. } => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

impl PartialEq for BerValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Enumerated(a), Self::Enumerated(b)) => a == b,
            (Self::BitString(a), Self::BitString(b)) => a == b,
            (Self::OctetString(a), Self::OctetString(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::ObjectIdentifier(a), Self::ObjectIdentifier(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a == b,
            (Self::Sequence(a), Self::Sequence(b)) => a == b,
            // A set is unordered: same wire form, multiset semantics.
            (Self::Set(a), Self::Set(b)) => multiset_eq(a, b),
            (
                Self::Text { tag: tag_a, bytes: bytes_a },
                Self::Text { tag: tag_b, bytes: bytes_b },
            ) => tag_a == tag_b && bytes_a == bytes_b,
            (Self::Unknown(a), Self::Unknown(b)) => a == b,
            _ => false,
        }
    }
}

fn multiset_eq(a: &[Ber], b: &[Ber]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut matched = vec![false; b.len()];
    'outer: for item in a {
        for (candidate, used) in b.iter().zip(matched.iter_mut()) {
            if !*used && candidate == item {
                *used = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

fn decode_children(content: &[u8]) -> Result<Vec<Ber>, BerError> {
    let mut reader = Reader::new(content);
    let mut children = Vec::new();
    while !reader.is_empty() {
        children.push(Ber::decode_one(&mut reader)?);
    }
    Ok(children)
}

fn decode_integer(content: &[u8]) -> Result<i128, BerError> {
    if content.is_empty() {
        return Ok(0);
    }
    if content.len() > 16 {
        return Err(BerError::IntegerOverflow);
    }

    let mut raw: u128 = 0;
    for byte in content {
        raw = (raw << 8) | u128::from(*byte);
    }
    Ok(from_complement(raw, content.len() as u32 * 8))
}

/// Minimum-length two's-complement encoding of a signed integer.
pub(crate) fn encode_integer(value: i128) -> Vec<u8> {
    let bytes = value.to_be_bytes();

    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }

    bytes[start..].to_vec()
}

fn decode_unsigned(content: &[u8]) -> Result<u128, BerError> {
    if content.len() > 16 {
        return Err(BerError::IntegerOverflow);
    }

    let mut raw: u128 = 0;
    for byte in content {
        raw = (raw << 8) | u128::from(*byte);
    }
    Ok(raw)
}

pub(crate) fn encode_unsigned(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(15);
    bytes[skip..].to_vec()
}

fn decode_bit_string(content: &[u8]) -> Result<BitStr, BerError> {
    let (unused, bits) = content.split_first().ok_or(BerError::EmptyBitString)?;
    BitStr::new(bits.to_vec(), *unused)
}

fn decode_oid(content: &[u8]) -> Result<Vec<u64>, BerError> {
    let mut arcs = Vec::new();
    let mut current: u64 = 0;
    let mut mid_arc = false;

    for byte in content {
        if current > (u64::MAX >> 7) {
            return Err(BerError::OidOverflow);
        }
        current = (current << 7) | u64::from(byte & 0x7F);

        if byte & 0x80 == 0 {
            arcs.push(current);
            current = 0;
            mid_arc = false;
        } else {
            mid_arc = true;
        }
    }

    if mid_arc {
        return Err(BerError::OidTruncated);
    }
    Ok(arcs)
}

fn encode_oid(arcs: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(arcs.len() * 2);

    for arc in arcs {
        let mut chunks = [0u8; 10];
        let mut count = 0;
        let mut value = *arc;
        loop {
            chunks[count] = (value & 0x7F) as u8;
            count += 1;
            value >>= 7;
            if value == 0 {
                break;
            }
        }
        for i in (0..count).rev() {
            let continuation = if i == 0 { 0 } else { 0x80 };
            out.push(chunks[i] | continuation);
        }
    }

    out
}

/// A bit string: payload bytes MSB-first plus the count of unused bits
/// in the final octet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitStr {
    bytes: Vec<u8>,
    unused: u8,
}

impl BitStr {
    pub fn new(bytes: Vec<u8>, unused: u8) -> Result<Self, BerError> {
        if unused > 7 || (bytes.is_empty() && unused != 0) {
            return Err(BerError::InvalidUnusedBits(unused));
        }
        Ok(Self { bytes, unused })
    }

    pub fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            unused: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn unused(&self) -> u8 {
        self.unused
    }

    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8 - self.unused as usize
    }

    /// The `index`-th bit, MSB-first.
    pub fn bit(&self, index: usize) -> bool {
        debug_assert!(index < self.bit_len());
        self.bytes[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Appends `other`'s bits after this value's bits: the left operand
    /// is shifted up by the right operand's bit count.
    pub fn concat(&self, other: &BitStr) -> BitStr {
        let total = self.bit_len() + other.bit_len();
        let mut bytes = vec![0u8; (total + 7) / 8];

        for index in 0..total {
            let bit = if index < self.bit_len() {
                self.bit(index)
            } else {
                other.bit(index - self.bit_len())
            };
            if bit {
                bytes[index / 8] |= 0x80 >> (index % 8);
            }
        }

        BitStr {
            bytes,
            unused: ((8 - total % 8) % 8) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_minimal_lengths() {
        assert_eq!(encode_integer(0), [0x00]);
        assert_eq!(encode_integer(-1), [0xFF]);
        assert_eq!(encode_integer(255), [0x00, 0xFF]);
        assert_eq!(encode_integer(-256), [0xFF, 0x00]);
        assert_eq!(encode_integer(65536), [0x01, 0x00, 0x00]);
    }

    #[test]
    fn integer_decode_sign_extension() {
        assert_eq!(decode_integer(&[0xFF]).unwrap(), -1);
        assert_eq!(decode_integer(&[0x00, 0xFF]).unwrap(), 255);
        assert_eq!(decode_integer(&[0x80, 0x00]).unwrap(), -32768);
    }

    #[test]
    fn oid_multi_byte_arcs() {
        // 311 = 0b10_0110111 -> 0x82 0x37.
        assert_eq!(encode_oid(&[1, 311]), [0x01, 0x82, 0x37]);
        assert_eq!(decode_oid(&[0x01, 0x82, 0x37]).unwrap(), vec![1, 311]);
    }

    #[test]
    fn oid_truncated_arc() {
        assert_eq!(decode_oid(&[0x82]).unwrap_err(), BerError::OidTruncated);
    }

    #[test]
    fn bit_string_concat_shifts_left() {
        // 0b101 ++ 0b01 == 0b10101.
        let a = BitStr::new(vec![0b1010_0000], 5).unwrap();
        let b = BitStr::new(vec![0b0100_0000], 6).unwrap();
        let joined = a.concat(&b);
        assert_eq!(joined.bit_len(), 5);
        assert_eq!(joined.bytes(), &[0b1010_1000]);
        assert_eq!(joined.unused(), 3);
    }

    #[test]
    fn bit_string_rejects_bad_padding() {
        assert!(BitStr::new(vec![0xFF], 8).is_err());
        assert!(BitStr::new(vec![], 1).is_err());
    }

    #[test]
    fn unknown_tags_preserved() {
        let identity = Identity {
            class: BerClass::Private,
            pc: BerPc::Primitive,
            tag: 7,
        };
        let value = BerValue::decode(&identity, &[0xDE, 0xAD]).unwrap();
        assert_eq!(value, BerValue::Unknown(vec![0xDE, 0xAD]));
        assert_eq!(value.encode_content(), vec![0xDE, 0xAD]);
    }
}
