//! ASN.1 Basic Encoding Rules (ITU-T X.690).
//!
//! A BER value is a triple: an identity (class, primitive/constructed
//! bit, tag number), a length (definite short, definite long, or
//! indefinite), and typed content. [`decode`] consumes one value from a
//! byte slice and returns the remainder; [`Ber::encode`] emits the
//! shortest definite-length form.

mod real;
mod value;

pub use value::{BerValue, BitStr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BerError {
    #[error("truncated encoding")]
    Truncated,

    #[error("tag number does not fit in 32 bits")]
    TagOverflow,

    #[error("length does not fit in usize")]
    LengthOverflow,

    #[error("indefinite length on a primitive encoding")]
    IndefinitePrimitive,

    #[error("end-of-contents without an open indefinite encoding")]
    UnexpectedEoc,

    #[error("malformed end-of-contents marker")]
    MalformedEoc,

    #[error("indefinite segments must share the outer type")]
    InvalidSegment,

    #[error("boolean with empty content")]
    EmptyBoolean,

    #[error("integer content exceeds 16 bytes")]
    IntegerOverflow,

    #[error("null with non-empty content")]
    NonEmptyNull,

    #[error("bit string declares {0} unused bits")]
    InvalidUnusedBits(u8),

    #[error("bit string with empty content")]
    EmptyBitString,

    #[error("object identifier sub-identifier overflows 64 bits")]
    OidOverflow,

    #[error("truncated object identifier sub-identifier")]
    OidTruncated,

    #[error("decimal real encodings are not supported")]
    UnsupportedReal,

    #[error("real encoding uses a reserved base")]
    ReservedRealBase,

    #[error("real mantissa exceeds 16 bytes")]
    RealOverflow,
}

/// The two class bits of an identifier octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BerClass {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

impl BerClass {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Universal,
            0b01 => Self::Application,
            0b10 => Self::ContextSpecific,
            _ => Self::Private,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Universal => 0b00,
            Self::Application => 0b01,
            Self::ContextSpecific => 0b10,
            Self::Private => 0b11,
        }
    }
}

/// The primitive/constructed bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BerPc {
    Primitive,
    Constructed,
}

/// Universal tag numbers assigned by X.680.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, enum_iterator::Sequence)]
pub enum UniversalTag {
    Eoc,
    Boolean,
    Integer,
    BitString,
    OctetString,
    Null,
    ObjectIdentifier,
    ObjectDescriptor,
    External,
    Real,
    Enumerated,
    EmbeddedPdv,
    Utf8String,
    RelativeOid,
    Time,
    Sequence,
    Set,
    NumericString,
    PrintableString,
    T61String,
    VideotexString,
    Ia5String,
    UtcTime,
    GeneralizedTime,
    GraphicString,
    VisibleString,
    GeneralString,
    UniversalString,
    CharacterString,
    BmpString,
    Date,
    TimeOfDay,
    Duration,
    OidIri,
    RelativeOidIri,
}

impl UniversalTag {
    pub fn number(self) -> u32 {
        match self {
            Self::Eoc => 0,
            Self::Boolean => 1,
            Self::Integer => 2,
            Self::BitString => 3,
            Self::OctetString => 4,
            Self::Null => 5,
            Self::ObjectIdentifier => 6,
            Self::ObjectDescriptor => 7,
            Self::External => 8,
            Self::Real => 9,
            Self::Enumerated => 10,
            Self::EmbeddedPdv => 11,
            Self::Utf8String => 12,
            Self::RelativeOid => 13,
            Self::Time => 14,
            Self::Sequence => 16,
            Self::Set => 17,
            Self::NumericString => 18,
            Self::PrintableString => 19,
            Self::T61String => 20,
            Self::VideotexString => 21,
            Self::Ia5String => 22,
            Self::UtcTime => 23,
            Self::GeneralizedTime => 24,
            Self::GraphicString => 25,
            Self::VisibleString => 26,
            Self::GeneralString => 27,
            Self::UniversalString => 28,
            Self::CharacterString => 29,
            Self::BmpString => 30,
            Self::Date => 31,
            Self::TimeOfDay => 32,
            Self::Duration => 34,
            Self::OidIri => 35,
            Self::RelativeOidIri => 36,
        }
    }

    pub fn from_number(number: u32) -> Option<Self> {
        enum_iterator::all::<Self>().find(|tag| tag.number() == number)
    }

    /// Tags whose constructed segments concatenate into one value when
    /// the indefinite form is used.
    pub(crate) fn is_string_like(self) -> bool {
        matches!(self, Self::OctetString | Self::BitString) || self.is_text()
    }

    pub(crate) fn is_text(self) -> bool {
        matches!(
            self,
            Self::ObjectDescriptor
                | Self::Utf8String
                | Self::Time
                | Self::NumericString
                | Self::PrintableString
                | Self::T61String
                | Self::VideotexString
                | Self::Ia5String
                | Self::UtcTime
                | Self::GeneralizedTime
                | Self::GraphicString
                | Self::VisibleString
                | Self::GeneralString
                | Self::UniversalString
                | Self::CharacterString
                | Self::BmpString
                | Self::Date
                | Self::TimeOfDay
                | Self::Duration
                | Self::OidIri
                | Self::RelativeOidIri
        )
    }
}

/// A decoded identifier: class, primitive/constructed, tag number.
///
/// Tag numbers above 30 are carried in continuation bytes, seven bits
/// per byte with the high bit flagging continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    pub class: BerClass,
    pub pc: BerPc,
    pub tag: u32,
}

impl Identity {
    pub fn universal(tag: UniversalTag, pc: BerPc) -> Self {
        Self {
            class: BerClass::Universal,
            pc,
            tag: tag.number(),
        }
    }

    pub fn universal_tag(&self) -> Option<UniversalTag> {
        if self.class == BerClass::Universal {
            UniversalTag::from_number(self.tag)
        } else {
            None
        }
    }

    fn decode(reader: &mut Reader) -> Result<Self, BerError> {
        let octet = reader.byte()?;
        let class = BerClass::from_bits(octet >> 6);
        let pc = if octet & 0x20 != 0 {
            BerPc::Constructed
        } else {
            BerPc::Primitive
        };

        let mut tag = u32::from(octet & 0x1F);
        if tag == 31 {
            tag = 0;
            loop {
                let cont = reader.byte()?;
                if tag > (u32::MAX >> 7) {
                    return Err(BerError::TagOverflow);
                }
                tag = (tag << 7) | u32::from(cont & 0x7F);
                if cont & 0x80 == 0 {
                    break;
                }
            }
        }

        Ok(Self { class, pc, tag })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let leading = (self.class.bits() << 6)
            | (matches!(self.pc, BerPc::Constructed) as u8) << 5;

        if self.tag < 31 {
            out.push(leading | self.tag as u8);
        } else {
            out.push(leading | 0x1F);

            let mut chunks = [0u8; 5];
            let mut count = 0;
            let mut tag = self.tag;
            loop {
                chunks[count] = (tag & 0x7F) as u8;
                count += 1;
                tag >>= 7;
                if tag == 0 {
                    break;
                }
            }
            for i in (0..count).rev() {
                let continuation = if i == 0 { 0 } else { 0x80 };
                out.push(chunks[i] | continuation);
            }
        }
    }
}

/// A decoded length octet sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Length {
    Definite(usize),
    Indefinite,
}

impl Length {
    fn decode(reader: &mut Reader) -> Result<Self, BerError> {
        let first = reader.byte()?;

        if first == 0x80 {
            return Ok(Self::Indefinite);
        }

        if first & 0x80 == 0 {
            return Ok(Self::Definite(usize::from(first)));
        }

        let count = usize::from(first & 0x7F);
        if count > std::mem::size_of::<usize>() {
            return Err(BerError::LengthOverflow);
        }

        let mut length: usize = 0;
        for _ in 0..count {
            length = (length << 8) | usize::from(reader.byte()?);
        }
        Ok(Self::Definite(length))
    }

    fn encode(length: usize, out: &mut Vec<u8>) {
        if length <= 127 {
            out.push(length as u8);
            return;
        }

        let bytes = length.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

/// One decoded BER value.
#[derive(Debug, Clone, PartialEq)]
pub struct Ber {
    pub identity: Identity,
    pub value: BerValue,
}

impl Ber {
    /// Decodes one value, returning it with the unconsumed remainder.
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), BerError> {
        let mut reader = Reader::new(data);
        let ber = Self::decode_one(&mut reader)?;
        Ok((ber, reader.rest()))
    }

    /// Decodes a stream of values until the input is exhausted.
    pub fn decode_all(mut data: &[u8]) -> Result<Vec<Self>, BerError> {
        let mut out = Vec::new();
        while !data.is_empty() {
            let (ber, rest) = Self::decode(data)?;
            out.push(ber);
            data = rest;
        }
        Ok(out)
    }

    pub(crate) fn decode_one(reader: &mut Reader) -> Result<Self, BerError> {
        let identity = Identity::decode(reader)?;

        if identity.universal_tag() == Some(UniversalTag::Eoc) {
            return Err(BerError::UnexpectedEoc);
        }

        match Length::decode(reader)? {
            Length::Definite(length) => {
                let content = reader.slice(length)?;
                let value = BerValue::decode(&identity, content)?;
                Ok(Self { identity, value })
            }
            Length::Indefinite => {
                if identity.pc == BerPc::Primitive {
                    return Err(BerError::IndefinitePrimitive);
                }

                let mut children = Vec::new();
                loop {
                    if reader.peek() == Some(0x00) {
                        reader.byte()?;
                        if reader.byte()? != 0x00 {
                            return Err(BerError::MalformedEoc);
                        }
                        break;
                    }
                    children.push(Self::decode_one(reader)?);
                }

                let value = BerValue::from_segments(&identity, children)?;
                Ok(Self { identity, value })
            }
        }
    }

    /// Emits the identifier, the shortest definite length form, and the
    /// content bytes.
    pub fn encode(&self) -> Vec<u8> {
        let content = self.value.encode_content();

        let mut out = Vec::with_capacity(content.len() + 4);
        self.identity.encode(&mut out);
        Length::encode(content.len(), &mut out);
        out.extend_from_slice(&content);
        out
    }

    fn primitive(tag: UniversalTag, value: BerValue) -> Self {
        Self {
            identity: Identity::universal(tag, BerPc::Primitive),
            value,
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self::primitive(UniversalTag::Boolean, BerValue::Boolean(value))
    }

    pub fn integer(value: i128) -> Self {
        Self::primitive(UniversalTag::Integer, BerValue::Integer(value))
    }

    pub fn enumerated(value: u128) -> Self {
        Self::primitive(UniversalTag::Enumerated, BerValue::Enumerated(value))
    }

    pub fn bit_string(value: BitStr) -> Self {
        Self::primitive(UniversalTag::BitString, BerValue::BitString(value))
    }

    pub fn octet_string(value: impl Into<Vec<u8>>) -> Self {
        Self::primitive(UniversalTag::OctetString, BerValue::OctetString(value.into()))
    }

    pub fn null() -> Self {
        Self::primitive(UniversalTag::Null, BerValue::Null)
    }

    pub fn object_identifier(arcs: impl Into<Vec<u64>>) -> Self {
        Self::primitive(
            UniversalTag::ObjectIdentifier,
            BerValue::ObjectIdentifier(arcs.into()),
        )
    }

    pub fn real(value: f64) -> Self {
        Self::primitive(UniversalTag::Real, BerValue::Real(value))
    }

    pub fn sequence(children: Vec<Ber>) -> Self {
        Self {
            identity: Identity::universal(UniversalTag::Sequence, BerPc::Constructed),
            value: BerValue::Sequence(children),
        }
    }

    pub fn set(children: Vec<Ber>) -> Self {
        Self {
            identity: Identity::universal(UniversalTag::Set, BerPc::Constructed),
            value: BerValue::Set(children),
        }
    }

    pub fn text(tag: UniversalTag, bytes: impl Into<Vec<u8>>) -> Self {
        debug_assert!(tag.is_text());
        Self::primitive(
            tag,
            BerValue::Text {
                tag,
                bytes: bytes.into(),
            },
        )
    }

    pub fn utf8_string(value: &str) -> Self {
        Self::text(UniversalTag::Utf8String, value.as_bytes().to_vec())
    }
}

/// A forward-only byte cursor over borrowed input.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub(crate) fn byte(&mut self) -> Result<u8, BerError> {
        let byte = *self.data.get(self.offset).ok_or(BerError::Truncated)?;
        self.offset += 1;
        Ok(byte)
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    pub(crate) fn slice(&mut self, len: usize) -> Result<&'a [u8], BerError> {
        if len > self.data.len() - self.offset {
            return Err(BerError::Truncated);
        }
        let out = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(out)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.offset == self.data.len()
    }

    pub(crate) fn rest(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Ber) {
        let bytes = value.encode();
        let (decoded, rest) = Ber::decode(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, value);
    }

    #[test]
    fn integer_vectors() {
        assert_eq!(Ber::integer(-128).encode(), [0x02, 0x01, 0x80]);
        assert_eq!(Ber::integer(127).encode(), [0x02, 0x01, 0x7F]);
        assert_eq!(Ber::integer(128).encode(), [0x02, 0x02, 0x00, 0x80]);
        assert_eq!(Ber::integer(0).encode(), [0x02, 0x01, 0x00]);

        // Two's complement over 16 bits.
        let (decoded, _) = Ber::decode(&[0x02, 0x02, 0xFF, 0x80]).unwrap();
        assert_eq!(decoded.value, BerValue::Integer(-128));
    }

    #[test]
    fn boolean_wire_form() {
        assert_eq!(Ber::boolean(false).encode(), [0x01, 0x01, 0x00]);
        assert_eq!(Ber::boolean(true).encode(), [0x01, 0x01, 0xFF]);

        // Any nonzero content decodes to true.
        let (decoded, _) = Ber::decode(&[0x01, 0x01, 0x01]).unwrap();
        assert_eq!(decoded.value, BerValue::Boolean(true));
    }

    #[test]
    fn primitive_round_trips() {
        round_trip(Ber::boolean(true));
        round_trip(Ber::integer(-1234567));
        round_trip(Ber::enumerated(77));
        round_trip(Ber::octet_string(vec![1, 2, 3, 250]));
        round_trip(Ber::null());
        round_trip(Ber::object_identifier(vec![1, 3, 6, 1, 4, 1, 311]));
        round_trip(Ber::utf8_string("netherd"));
        round_trip(Ber::real(-118.625));
    }

    #[test]
    fn constructed_round_trips() {
        round_trip(Ber::sequence(vec![
            Ber::integer(1),
            Ber::octet_string(b"abc".to_vec()),
            Ber::sequence(vec![Ber::boolean(false)]),
        ]));
        round_trip(Ber::set(vec![Ber::integer(5), Ber::null()]));
    }

    #[test]
    fn long_form_length() {
        let value = Ber::octet_string(vec![0xAB; 300]);
        let bytes = value.encode();
        // 0x82 announces two length bytes, 300 = 0x012C.
        assert_eq!(&bytes[..4], &[0x04, 0x82, 0x01, 0x2C]);
        round_trip(value);
    }

    #[test]
    fn multi_byte_tag() {
        let identity = Identity {
            class: BerClass::ContextSpecific,
            pc: BerPc::Primitive,
            tag: 1000,
        };
        let value = Ber {
            identity,
            value: BerValue::Unknown(vec![0x01]),
        };
        let bytes = value.encode();
        // 1000 = 0b0000111_1101000 -> 0x87 0x68 after the 0x1F marker.
        assert_eq!(&bytes[..3], &[0x9F, 0x87, 0x68]);
        round_trip(value);
    }

    #[test]
    fn indefinite_form_concatenates_strings() {
        // Constructed octet string, indefinite length, two segments.
        let data = [
            0x24, 0x80, // constructed OctetString, indefinite
            0x04, 0x03, b'f', b'o', b'o', // segment
            0x04, 0x03, b'b', b'a', b'r', // segment
            0x00, 0x00, // end-of-contents
        ];
        let (decoded, rest) = Ber::decode(&data).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded.value, BerValue::OctetString(b"foobar".to_vec()));
    }

    #[test]
    fn indefinite_sequence() {
        let data = [
            0x30, 0x80, // constructed Sequence, indefinite
            0x02, 0x01, 0x2A, // Integer 42
            0x00, 0x00,
        ];
        let (decoded, _) = Ber::decode(&data).unwrap();
        match decoded.value {
            BerValue::Sequence(children) => {
                assert_eq!(children.len(), 1);
                assert_eq!(children[0].value, BerValue::Integer(42));
            }
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn indefinite_on_primitive_rejected() {
        // Primitive OctetString with indefinite length is malformed.
        let data = [0x04, 0x80, 0x00, 0x00];
        assert_eq!(
            Ber::decode(&data).unwrap_err(),
            BerError::IndefinitePrimitive
        );
    }

    #[test]
    fn stray_eoc_rejected() {
        assert_eq!(
            Ber::decode(&[0x00, 0x00]).unwrap_err(),
            BerError::UnexpectedEoc
        );
    }

    #[test]
    fn truncated_content_rejected() {
        assert_eq!(
            Ber::decode(&[0x04, 0x05, 0x01, 0x02]).unwrap_err(),
            BerError::Truncated
        );
    }

    #[test]
    fn decode_all_yields_stream() {
        let mut data = Ber::integer(1).encode();
        data.extend(Ber::boolean(true).encode());
        data.extend(Ber::null().encode());

        let values = Ber::decode_all(&data).unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[2].value, BerValue::Null);
    }

    #[test]
    fn set_equality_ignores_order() {
        let a = Ber::set(vec![Ber::integer(1), Ber::integer(2)]);
        let b = Ber::set(vec![Ber::integer(2), Ber::integer(1)]);
        assert_eq!(a, b);

        let c = Ber::set(vec![Ber::integer(1), Ber::integer(1)]);
        assert_ne!(a, c);
    }
}
