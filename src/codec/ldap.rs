//! LDAP value types (RFC 4511) expressed over the BER codec.
//!
//! These are the protocol's building blocks only: newtypes that re-tag
//! BER universal values and validate their shape. Message framing and
//! the LDAP operations themselves live with a future client.

use thiserror::Error;

use super::ber::{Ber, BerValue};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LdapError {
    #[error("expected an octet string")]
    NotAnOctetString,

    #[error("expected an integer")]
    NotAnInteger,

    #[error("expected a sequence")]
    NotASequence,

    #[error("expected a set")]
    NotASet,

    #[error("expected {expected} elements, found {found}")]
    WrongArity { expected: usize, found: usize },

    #[error("message id {0} outside [0, 2^31 - 1]")]
    MessageIdOutOfRange(i128),
}

macro_rules! octet_string_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(pub Vec<u8>);

        impl $name {
            pub fn from_ber(ber: &Ber) -> Result<Self, LdapError> {
                match &ber.value {
                    BerValue::OctetString(bytes) => Ok(Self(bytes.clone())),
                    _ => Err(LdapError::NotAnOctetString),
                }
            }

            pub fn to_ber(&self) -> Ber {
                Ber::octet_string(self.0.clone())
            }

            /// UTF-8 view when the octets happen to be text.
            pub fn as_str(&self) -> Option<&str> {
                std::str::from_utf8(&self.0).ok()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.as_bytes().to_vec())
            }
        }
    };
}

octet_string_newtype!(
    /// A UTF-8 string carried as an octet string.
    LdapString
);
octet_string_newtype!(
    /// A dotted-decimal object identifier in its text form.
    LdapOid
);
octet_string_newtype!(
    /// A distinguished name in its RFC 4514 string form.
    LdapDn
);
octet_string_newtype!(
    /// A single relative distinguished name.
    RelativeLdapDn
);
octet_string_newtype!(
    /// An attribute description: type name plus options.
    AttributeDescription
);
octet_string_newtype!(
    /// A raw attribute value.
    AttributeValue
);
octet_string_newtype!(
    /// The value half of an attribute value assertion.
    AssertionValue
);
octet_string_newtype!(
    /// A matching rule identifier.
    MatchingRuleId
);
octet_string_newtype!(
    /// An LDAP URL inside a referral.
    Uri
);

/// A message identifier: a BER Integer constrained to `[0, 2^31 - 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageId(pub u32);

impl MessageId {
    const MAX: i128 = (1 << 31) - 1;

    pub fn from_ber(ber: &Ber) -> Result<Self, LdapError> {
        match ber.value {
            BerValue::Integer(value) if (0..=Self::MAX).contains(&value) => {
                Ok(Self(value as u32))
            }
            BerValue::Integer(value) => Err(LdapError::MessageIdOutOfRange(value)),
            _ => Err(LdapError::NotAnInteger),
        }
    }

    pub fn to_ber(&self) -> Ber {
        Ber::integer(i128::from(self.0))
    }
}

fn sequence_children(ber: &Ber) -> Result<&[Ber], LdapError> {
    match &ber.value {
        BerValue::Sequence(children) => Ok(children),
        _ => Err(LdapError::NotASequence),
    }
}

/// `AttributeValueAssertion ::= SEQUENCE { attributeDesc, assertionValue }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValueAssertion {
    pub description: AttributeDescription,
    pub value: AssertionValue,
}

impl AttributeValueAssertion {
    pub fn from_ber(ber: &Ber) -> Result<Self, LdapError> {
        let children = sequence_children(ber)?;
        if children.len() != 2 {
            return Err(LdapError::WrongArity {
                expected: 2,
                found: children.len(),
            });
        }

        Ok(Self {
            description: AttributeDescription::from_ber(&children[0])?,
            value: AssertionValue::from_ber(&children[1])?,
        })
    }

    pub fn to_ber(&self) -> Ber {
        Ber::sequence(vec![self.description.to_ber(), self.value.to_ber()])
    }
}

/// `PartialAttribute ::= SEQUENCE { type, vals SET OF value }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAttribute {
    pub description: AttributeDescription,
    pub values: Vec<AttributeValue>,
}

impl PartialAttribute {
    pub fn from_ber(ber: &Ber) -> Result<Self, LdapError> {
        let children = sequence_children(ber)?;
        if children.len() != 2 {
            return Err(LdapError::WrongArity {
                expected: 2,
                found: children.len(),
            });
        }

        let description = AttributeDescription::from_ber(&children[0])?;
        let values = match &children[1].value {
            BerValue::Set(members) => members
                .iter()
                .map(AttributeValue::from_ber)
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(LdapError::NotASet),
        };

        Ok(Self {
            description,
            values,
        })
    }

    pub fn to_ber(&self) -> Ber {
        Ber::sequence(vec![
            self.description.to_ber(),
            Ber::set(self.values.iter().map(AttributeValue::to_ber).collect()),
        ])
    }
}

/// `Referral ::= SEQUENCE SIZE (1..MAX) OF uri`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referral(pub Vec<Uri>);

impl Referral {
    pub fn from_ber(ber: &Ber) -> Result<Self, LdapError> {
        let children = sequence_children(ber)?;
        if children.is_empty() {
            return Err(LdapError::WrongArity {
                expected: 1,
                found: 0,
            });
        }
        Ok(Self(
            children
                .iter()
                .map(Uri::from_ber)
                .collect::<Result<Vec<_>, _>>()?,
        ))
    }

    pub fn to_ber(&self) -> Ber {
        Ber::sequence(self.0.iter().map(Uri::to_ber).collect())
    }
}
