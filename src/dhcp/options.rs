//! The DHCP option registry: typed options keyed by code.
//!
//! Known codes carry a semantic formatter converting between the
//! in-memory value and the on-wire byte string; unknown codes are
//! preserved byte-exact. The registry is an owned value, one per
//! server, so decode behavior never leaks across instances.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use nohash_hasher::BuildNoHashHasher;

use super::DhcpError;

/// Option code 0: single-byte padding, no length octet.
pub const CODE_PAD: u8 = 0;
/// Option code 255: end of the option stream, no length octet.
pub const CODE_END: u8 = 255;

/// DHCP message types carried in option 53.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl MessageType {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => return None,
        })
    }
}

/// The wire formatter attached to a known option code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionFormat {
    Ip,
    IpList,
    U8,
    U16,
    U32,
    Str,
    Bytes,
    Bool,
    /// Pairs of (destination, mask), eight bytes per entry.
    PolicyFilter,
}

/// Option codes with a registered formatter, per RFC 2132.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, enum_iterator::Sequence)]
pub enum OptionCode {
    SubnetMask,
    TimeOffset,
    Routers,
    TimeServers,
    NameServers,
    DnsServers,
    LogServers,
    CookieServers,
    ImpressServers,
    ResourceLocationServers,
    HostName,
    BootFileSize,
    MeritDumpFile,
    DomainName,
    SwapServer,
    RootPath,
    ExtensionsPath,
    IpForwarding,
    NonLocalSourceRouting,
    PolicyFilter,
    MaxReassemblySize,
    IpTtl,
    MtuAgingTimeout,
    MtuPlateauTable,
    InterfaceMtu,
    AllSubnetsLocal,
    BroadcastAddress,
    PerformMaskDiscovery,
    MaskSupplier,
    PerformRouterDiscovery,
    RouterSolicitation,
    StaticRoutes,
    TrailerEncapsulation,
    ArpCacheTimeout,
    EthernetEncapsulation,
    TcpTtl,
    TcpKeepaliveInterval,
    TcpKeepaliveGarbage,
    NisDomain,
    NisServers,
    NtpServers,
    VendorSpecific,
    NetbiosNameServers,
    NetbiosDistributionServers,
    NetbiosNodeType,
    NetbiosScope,
    XFontServers,
    XDisplayManagers,
    RequestedIp,
    IpLeaseTime,
    OptionOverload,
    DhcpMessageType,
    ServerId,
    ParameterRequestList,
    Message,
    MaxMessageSize,
    RenewalT1,
    RebindingT2,
    VendorClassId,
    ClientId,
    NisPlusDomain,
    NisPlusServers,
    TftpServerName,
    BootfileName,
    MobileIpAgents,
    SmtpServers,
    Pop3Servers,
    NntpServers,
    WwwServers,
    FingerServers,
    IrcServers,
    StreetTalkServers,
    StdaServers,
    RelayAgentInfo,
    NdsServers,
    NdsTreeName,
    NdsContext,
    TzPosix,
    TzDatabase,
    DomainSearch,
    ClasslessStaticRoutes,
}

impl OptionCode {
    pub fn code(self) -> u8 {
        match self {
            Self::SubnetMask => 1,
            Self::TimeOffset => 2,
            Self::Routers => 3,
            Self::TimeServers => 4,
            Self::NameServers => 5,
            Self::DnsServers => 6,
            Self::LogServers => 7,
            Self::CookieServers => 8,
            Self::ImpressServers => 10,
            Self::ResourceLocationServers => 11,
            Self::HostName => 12,
            Self::BootFileSize => 13,
            Self::MeritDumpFile => 14,
            Self::DomainName => 15,
            Self::SwapServer => 16,
            Self::RootPath => 17,
            Self::ExtensionsPath => 18,
            Self::IpForwarding => 19,
            Self::NonLocalSourceRouting => 20,
            Self::PolicyFilter => 21,
            Self::MaxReassemblySize => 22,
            Self::IpTtl => 23,
            Self::MtuAgingTimeout => 24,
            Self::MtuPlateauTable => 25,
            Self::InterfaceMtu => 26,
            Self::AllSubnetsLocal => 27,
            Self::BroadcastAddress => 28,
            Self::PerformMaskDiscovery => 29,
            Self::MaskSupplier => 30,
            Self::PerformRouterDiscovery => 31,
            Self::RouterSolicitation => 32,
            Self::StaticRoutes => 33,
            Self::TrailerEncapsulation => 34,
            Self::ArpCacheTimeout => 35,
            Self::EthernetEncapsulation => 36,
            Self::TcpTtl => 37,
            Self::TcpKeepaliveInterval => 38,
            Self::TcpKeepaliveGarbage => 39,
            Self::NisDomain => 40,
            Self::NisServers => 41,
            Self::NtpServers => 42,
            Self::VendorSpecific => 43,
            Self::NetbiosNameServers => 44,
            Self::NetbiosDistributionServers => 45,
            Self::NetbiosNodeType => 46,
            Self::NetbiosScope => 47,
            Self::XFontServers => 48,
            Self::XDisplayManagers => 49,
            Self::RequestedIp => 50,
            Self::IpLeaseTime => 51,
            Self::OptionOverload => 52,
            Self::DhcpMessageType => 53,
            Self::ServerId => 54,
            Self::ParameterRequestList => 55,
            Self::Message => 56,
            Self::MaxMessageSize => 57,
            Self::RenewalT1 => 58,
            Self::RebindingT2 => 59,
            Self::VendorClassId => 60,
            Self::ClientId => 61,
            Self::NisPlusDomain => 64,
            Self::NisPlusServers => 65,
            Self::TftpServerName => 66,
            Self::BootfileName => 67,
            Self::MobileIpAgents => 68,
            Self::SmtpServers => 69,
            Self::Pop3Servers => 70,
            Self::NntpServers => 71,
            Self::WwwServers => 72,
            Self::FingerServers => 73,
            Self::IrcServers => 74,
            Self::StreetTalkServers => 75,
            Self::StdaServers => 76,
            Self::RelayAgentInfo => 82,
            Self::NdsServers => 85,
            Self::NdsTreeName => 86,
            Self::NdsContext => 87,
            Self::TzPosix => 100,
            Self::TzDatabase => 101,
            Self::DomainSearch => 119,
            Self::ClasslessStaticRoutes => 121,
        }
    }

    pub fn format(self) -> OptionFormat {
        use OptionFormat::*;
        match self {
            Self::SubnetMask
            | Self::SwapServer
            | Self::RouterSolicitation
            | Self::BroadcastAddress
            | Self::RequestedIp
            | Self::ServerId => Ip,

            Self::Routers
            | Self::TimeServers
            | Self::NameServers
            | Self::DnsServers
            | Self::LogServers
            | Self::CookieServers
            | Self::ImpressServers
            | Self::ResourceLocationServers
            | Self::NisServers
            | Self::NtpServers
            | Self::NetbiosNameServers
            | Self::NetbiosDistributionServers
            | Self::XFontServers
            | Self::XDisplayManagers
            | Self::NisPlusServers
            | Self::MobileIpAgents
            | Self::SmtpServers
            | Self::Pop3Servers
            | Self::NntpServers
            | Self::WwwServers
            | Self::FingerServers
            | Self::IrcServers
            | Self::StreetTalkServers
            | Self::StdaServers
            | Self::NdsServers => IpList,

            Self::IpTtl
            | Self::NetbiosNodeType
            | Self::OptionOverload
            | Self::DhcpMessageType
            | Self::TcpTtl => U8,

            Self::BootFileSize | Self::MaxReassemblySize | Self::InterfaceMtu | Self::MaxMessageSize => {
                U16
            }

            Self::TimeOffset
            | Self::MtuAgingTimeout
            | Self::ArpCacheTimeout
            | Self::TcpKeepaliveInterval
            | Self::IpLeaseTime
            | Self::RenewalT1
            | Self::RebindingT2 => U32,

            Self::HostName
            | Self::MeritDumpFile
            | Self::DomainName
            | Self::RootPath
            | Self::ExtensionsPath
            | Self::NisDomain
            | Self::Message
            | Self::VendorClassId
            | Self::NisPlusDomain
            | Self::TftpServerName
            | Self::BootfileName
            | Self::NdsTreeName
            | Self::TzPosix
            | Self::TzDatabase => Str,

            Self::IpForwarding
            | Self::NonLocalSourceRouting
            | Self::AllSubnetsLocal
            | Self::PerformMaskDiscovery
            | Self::MaskSupplier
            | Self::PerformRouterDiscovery
            | Self::TrailerEncapsulation
            | Self::EthernetEncapsulation
            | Self::TcpKeepaliveGarbage => Bool,

            Self::PolicyFilter | Self::StaticRoutes => PolicyFilter,

            Self::MtuPlateauTable
            | Self::VendorSpecific
            | Self::NetbiosScope
            | Self::ParameterRequestList
            | Self::ClientId
            | Self::RelayAgentInfo
            | Self::NdsContext
            | Self::DomainSearch
            | Self::ClasslessStaticRoutes => Bytes,
        }
    }
}

/// A decoded option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Ip(Ipv4Addr),
    IpList(Vec<Ipv4Addr>),
    U8(u8),
    U16(u16),
    U32(u32),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    PolicyFilter(Vec<(Ipv4Addr, Ipv4Addr)>),
}

impl OptionValue {
    /// The on-wire content bytes.
    pub fn data(&self) -> Vec<u8> {
        match self {
            Self::Ip(addr) => addr.octets().to_vec(),
            Self::IpList(addrs) => addrs.iter().flat_map(|a| a.octets()).collect(),
            Self::U8(v) => vec![*v],
            Self::U16(v) => v.to_be_bytes().to_vec(),
            Self::U32(v) => v.to_be_bytes().to_vec(),
            Self::Str(s) => s.as_bytes().to_vec(),
            Self::Bytes(b) => b.clone(),
            Self::Bool(true) => vec![0xFF],
            Self::Bool(false) => vec![0x00],
            Self::PolicyFilter(pairs) => pairs
                .iter()
                .flat_map(|(dst, mask)| {
                    let mut entry = dst.octets().to_vec();
                    entry.extend_from_slice(&mask.octets());
                    entry
                })
                .collect(),
        }
    }
}

/// A `(code, value)` pair ready to place on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    pub code: u8,
    pub value: OptionValue,
}

impl DhcpOption {
    pub fn new(code: OptionCode, value: OptionValue) -> Self {
        Self {
            code: code.code(),
            value,
        }
    }

    pub fn message_type(mt: MessageType) -> Self {
        Self::new(OptionCode::DhcpMessageType, OptionValue::U8(mt as u8))
    }

    pub fn subnet_mask(mask: Ipv4Addr) -> Self {
        Self::new(OptionCode::SubnetMask, OptionValue::Ip(mask))
    }

    pub fn broadcast_address(addr: Ipv4Addr) -> Self {
        Self::new(OptionCode::BroadcastAddress, OptionValue::Ip(addr))
    }

    pub fn server_id(addr: Ipv4Addr) -> Self {
        Self::new(OptionCode::ServerId, OptionValue::Ip(addr))
    }

    pub fn ip_lease_time(seconds: u32) -> Self {
        Self::new(OptionCode::IpLeaseTime, OptionValue::U32(seconds))
    }

    pub fn renewal_t1(seconds: u32) -> Self {
        Self::new(OptionCode::RenewalT1, OptionValue::U32(seconds))
    }

    pub fn rebinding_t2(seconds: u32) -> Self {
        Self::new(OptionCode::RebindingT2, OptionValue::U32(seconds))
    }

    pub fn routers(addrs: Vec<Ipv4Addr>) -> Self {
        Self::new(OptionCode::Routers, OptionValue::IpList(addrs))
    }

    pub fn dns_servers(addrs: Vec<Ipv4Addr>) -> Self {
        Self::new(OptionCode::DnsServers, OptionValue::IpList(addrs))
    }

    pub fn requested_ip(addr: Ipv4Addr) -> Self {
        Self::new(OptionCode::RequestedIp, OptionValue::Ip(addr))
    }

    pub fn host_name(name: &str) -> Self {
        Self::new(OptionCode::HostName, OptionValue::Str(name.to_string()))
    }

    pub fn parameter_request_list(codes: Vec<u8>) -> Self {
        Self::new(OptionCode::ParameterRequestList, OptionValue::Bytes(codes))
    }

    /// Wire form: code, length octet, content. Pad and End never appear
    /// here; the stream emitter writes them itself.
    pub fn pack(&self) -> Vec<u8> {
        let data = self.value.data();
        let mut out = Vec::with_capacity(2 + data.len());
        out.push(self.code);
        out.push(data.len() as u8);
        out.extend_from_slice(&data);
        out
    }
}

/// Formatter table keyed by option code. An open set: codes without an
/// entry decode to [`OptionValue::Bytes`] and re-emit unchanged.
#[derive(Debug, Clone)]
pub struct OptionRegistry {
    formats: HashMap<u8, OptionFormat, BuildNoHashHasher<u8>>,
}

impl Default for OptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionRegistry {
    /// A registry pre-loaded with every [`OptionCode`].
    pub fn new() -> Self {
        let mut formats = HashMap::with_hasher(BuildNoHashHasher::default());
        for code in enum_iterator::all::<OptionCode>() {
            formats.insert(code.code(), code.format());
        }
        Self { formats }
    }

    /// Overrides or extends the formatter for a code.
    pub fn register(&mut self, code: u8, format: OptionFormat) {
        self.formats.insert(code, format);
    }

    pub fn format_of(&self, code: u8) -> Option<OptionFormat> {
        self.formats.get(&code).copied()
    }

    /// Decodes one option's content. Content that does not fit the
    /// registered format is preserved as raw bytes rather than dropped,
    /// so a re-emit stays byte-exact.
    pub fn decode_value(&self, code: u8, data: &[u8]) -> OptionValue {
        let fallback = || OptionValue::Bytes(data.to_vec());

        match self.formats.get(&code) {
            None => fallback(),
            Some(OptionFormat::Ip) => match <[u8; 4]>::try_from(data) {
                Ok(octets) => OptionValue::Ip(Ipv4Addr::from(octets)),
                Err(_) => fallback(),
            },
            Some(OptionFormat::IpList) => {
                if data.is_empty() || data.len() % 4 != 0 {
                    return fallback();
                }
                OptionValue::IpList(
                    data.chunks_exact(4)
                        .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                        .collect(),
                )
            }
            Some(OptionFormat::U8) => match data {
                [v] => OptionValue::U8(*v),
                _ => fallback(),
            },
            Some(OptionFormat::U16) => match <[u8; 2]>::try_from(data) {
                Ok(bytes) => OptionValue::U16(u16::from_be_bytes(bytes)),
                Err(_) => fallback(),
            },
            Some(OptionFormat::U32) => match <[u8; 4]>::try_from(data) {
                Ok(bytes) => OptionValue::U32(u32::from_be_bytes(bytes)),
                Err(_) => fallback(),
            },
            Some(OptionFormat::Str) => match std::str::from_utf8(data) {
                Ok(s) => OptionValue::Str(s.to_string()),
                Err(_) => fallback(),
            },
            Some(OptionFormat::Bytes) => fallback(),
            Some(OptionFormat::Bool) => match data {
                [v] => OptionValue::Bool(*v != 0),
                _ => fallback(),
            },
            Some(OptionFormat::PolicyFilter) => {
                if data.is_empty() || data.len() % 8 != 0 {
                    return fallback();
                }
                OptionValue::PolicyFilter(
                    data.chunks_exact(8)
                        .map(|c| {
                            (
                                Ipv4Addr::new(c[0], c[1], c[2], c[3]),
                                Ipv4Addr::new(c[4], c[5], c[6], c[7]),
                            )
                        })
                        .collect(),
                )
            }
        }
    }

    /// Parses a TLV option stream: Pad bytes are skipped, End stops the
    /// walk, everything else is `code, length, content`.
    pub fn parse_stream(&self, data: &[u8]) -> Result<Vec<DhcpOption>, DhcpError> {
        let mut options = Vec::new();
        let mut at = 0;

        while at < data.len() {
            let code = data[at];
            at += 1;

            if code == CODE_PAD {
                continue;
            }
            if code == CODE_END {
                break;
            }

            let length = *data
                .get(at)
                .ok_or(DhcpError::OptionOverrun { code })? as usize;
            at += 1;

            let content = data
                .get(at..at + length)
                .ok_or(DhcpError::OptionOverrun { code })?;
            at += length;

            options.push(DhcpOption {
                code,
                value: self.decode_value(code, content),
            });
        }

        Ok(options)
    }
}

/// Emits options in insertion order, terminated by End.
pub fn emit_stream(options: &[DhcpOption]) -> Vec<u8> {
    let mut out = Vec::new();
    for option in options {
        out.extend(option.pack());
    }
    out.push(CODE_END);
    out
}
