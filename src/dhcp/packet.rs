//! The BOOTP/DHCP packet codec.

use std::net::Ipv4Addr;

use mac_address::MacAddress;

use super::options::{self, DhcpOption, MessageType, OptionCode, OptionRegistry, OptionValue};
use super::DhcpError;

/// Marks the start of the option stream.
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// BOOTP op for client messages.
pub const BOOT_REQUEST: u8 = 1;
/// BOOTP op for server messages.
pub const BOOT_REPLY: u8 = 2;

const CHADDR_AT: usize = 28;
const SNAME_AT: usize = 44;
const FILE_AT: usize = 108;
const COOKIE_AT: usize = 236;

/// A DHCP message: the fixed BOOTP header, then the magic cookie and
/// the option stream.
///
/// The cookie's position is not assumed to be byte 236: when option 52
/// overloads `sname` or `file`, the cookie appears earlier, so the
/// parser probes at offsets 44, 108 and 236 in turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    /// The high bit of the BOOTP flags word.
    pub broadcast: bool,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: MacAddress,
    pub sname: Vec<u8>,
    pub file: Vec<u8>,
    pub options: Vec<DhcpOption>,
}

impl Default for DhcpPacket {
    fn default() -> Self {
        Self {
            op: BOOT_REQUEST,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0,
            secs: 0,
            broadcast: false,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: MacAddress::new([0; 6]),
            sname: Vec::new(),
            file: Vec::new(),
            options: Vec::new(),
        }
    }
}

impl DhcpPacket {
    /// A reply skeleton carrying the transaction and client identity.
    pub fn reply_to(xid: u32, chaddr: MacAddress, broadcast: bool) -> Self {
        Self {
            op: BOOT_REPLY,
            xid,
            broadcast,
            chaddr,
            ..Self::default()
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(COOKIE_AT + 64);

        out.push(self.op);
        out.push(self.htype);
        out.push(self.hlen);
        out.push(self.hops);
        out.extend_from_slice(&self.xid.to_be_bytes());
        out.extend_from_slice(&self.secs.to_be_bytes());
        out.extend_from_slice(&u16::to_be_bytes(if self.broadcast { 1 << 15 } else { 0 }));
        out.extend_from_slice(&self.ciaddr.octets());
        out.extend_from_slice(&self.yiaddr.octets());
        out.extend_from_slice(&self.siaddr.octets());
        out.extend_from_slice(&self.giaddr.octets());
        out.extend_from_slice(&self.chaddr.bytes());
        out.resize(SNAME_AT, 0);

        let sname_len = self.sname.len().min(64);
        out.extend_from_slice(&self.sname[..sname_len]);
        out.resize(FILE_AT, 0);

        let file_len = self.file.len().min(128);
        out.extend_from_slice(&self.file[..file_len]);
        out.resize(COOKIE_AT, 0);

        out.extend_from_slice(&MAGIC_COOKIE);
        out.extend(options::emit_stream(&self.options));

        out
    }

    pub fn disassemble(registry: &OptionRegistry, data: &[u8]) -> Result<Self, DhcpError> {
        if data.len() < SNAME_AT + MAGIC_COOKIE.len() {
            return Err(DhcpError::Truncated {
                needed: SNAME_AT + MAGIC_COOKIE.len(),
                have: data.len(),
            });
        }

        let hlen = data[2];
        if hlen != 6 {
            return Err(DhcpError::InvalidHlen(hlen));
        }

        let chaddr = MacAddress::new(data[CHADDR_AT..CHADDR_AT + 6].try_into().unwrap());

        // Walk past sname and file only when they are not overloaded:
        // the first cookie match wins.
        let mut sname = Vec::new();
        let mut file = Vec::new();
        let mut probe = SNAME_AT;
        loop {
            match data.get(probe..probe + MAGIC_COOKIE.len()) {
                Some(window) if window == MAGIC_COOKIE => break,
                _ if probe == SNAME_AT => {
                    let end = (SNAME_AT + 64).min(data.len());
                    sname = trim_padding(&data[SNAME_AT..end]);
                    probe = FILE_AT;
                }
                _ if probe == FILE_AT => {
                    let end = (FILE_AT + 128).min(data.len());
                    file = trim_padding(&data[FILE_AT..end]);
                    probe = COOKIE_AT;
                }
                _ => return Err(DhcpError::MissingCookie),
            }
        }

        let options = registry.parse_stream(&data[probe + MAGIC_COOKIE.len()..])?;

        Ok(Self {
            op: data[0],
            htype: data[1],
            hlen,
            hops: data[3],
            xid: u32::from_be_bytes(data[4..8].try_into().unwrap()),
            secs: u16::from_be_bytes([data[8], data[9]]),
            broadcast: data[10] & 0x80 != 0,
            ciaddr: read_addr(data, 12),
            yiaddr: read_addr(data, 16),
            siaddr: read_addr(data, 20),
            giaddr: read_addr(data, 24),
            chaddr,
            sname,
            file,
            options,
        })
    }

    /// The first option carrying `code`, if any.
    pub fn option(&self, code: OptionCode) -> Option<&OptionValue> {
        let code = code.code();
        self.options
            .iter()
            .find(|option| option.code == code)
            .map(|option| &option.value)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        match self.option(OptionCode::DhcpMessageType)? {
            OptionValue::U8(code) => MessageType::from_code(*code),
            _ => None,
        }
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        match self.option(OptionCode::RequestedIp)? {
            OptionValue::Ip(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn host_name(&self) -> Option<&str> {
        match self.option(OptionCode::HostName)? {
            OptionValue::Str(name) => Some(name),
            _ => None,
        }
    }

    pub fn server_id(&self) -> Option<Ipv4Addr> {
        match self.option(OptionCode::ServerId)? {
            OptionValue::Ip(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn parameter_request_list(&self) -> &[u8] {
        match self.option(OptionCode::ParameterRequestList) {
            Some(OptionValue::Bytes(codes)) => codes,
            _ => &[],
        }
    }
}

fn read_addr(data: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::from(<[u8; 4]>::try_from(&data[at..at + 4]).unwrap())
}

fn trim_padding(field: &[u8]) -> Vec<u8> {
    let end = field
        .iter()
        .rposition(|b| *b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    field[..end].to_vec()
}
