//! The DHCP server: the DISCOVER/REQUEST/DECLINE/RELEASE/INFORM state
//! machine over the pool, the offer and lease tables, and the expiry
//! scheduler.
//!
//! The handler is transport-free: it takes one Ethernet frame and
//! either produces the reply frame or stays silent. Malformed input and
//! policy denials are both silent drops; clients retransmit on their
//! own schedule.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mac_address::MacAddress;
use nohash_hasher::BuildNoHashHasher;
use tokio::sync::watch;
use uuid::Uuid;

use crate::codec::ethernet::{self, EthernetFrame};
use crate::codec::ipv4::{Ipv4Packet, PROTOCOL_UDP};
use crate::codec::udp::UdpDatagram;
use crate::netio::{Input, Output};

use super::config::ServerConfig;
use super::options::{
    DhcpOption, MessageType, OptionCode, OptionRegistry, OptionValue, CODE_END, CODE_PAD,
};
use super::packet::DhcpPacket;
use super::pool::{Pool, PoolError, Record};
use super::scheduler::Scheduler;

/// Actions the expiry scheduler fires back into the tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
    /// The offer-hold window lapsed with no matching REQUEST.
    ReleaseOffer { mac: MacAddress, xid: u32 },
    /// The lease ran out. The stored address must still match: a
    /// renewed lease holds a fresh event and must not be torn down by
    /// the stale one.
    ReleaseLease { mac: MacAddress, ip: Ipv4Addr },
    /// A DECLINEd address finished its quarantine.
    RestoreQuarantined { ip: Ipv4Addr },
}

type OptionTable = HashMap<u8, DhcpOption, BuildNoHashHasher<u8>>;

/// Shared mutable state: the pool and the offer/lease/option tables,
/// all behind one lock with short hold times.
pub(crate) struct Tables {
    pub(crate) pool: Pool,
    pub(crate) offers: HashMap<(MacAddress, u32), Record>,
    pub(crate) clients: Vec<Record>,
    /// Appended to every response.
    pub(crate) server_options: OptionTable,
    /// Appended when the Parameter Request List asks for them.
    pub(crate) options: OptionTable,
}

pub struct DhcpServer {
    pub(crate) config: ServerConfig,
    pub(crate) registry: OptionRegistry,
    pub(crate) tables: Arc<Mutex<Tables>>,
    scheduler: Scheduler<Expiry>,
    shutdown: watch::Sender<bool>,
}

impl DhcpServer {
    /// Builds the server: pool carved from the configured network,
    /// the six required server options pre-registered, scheduler task
    /// started. Must run inside a tokio runtime.
    pub fn new(config: ServerConfig) -> Result<Self, PoolError> {
        let mut pool = Pool::new(config.network, config.mask)?;

        // Addresses the server itself hands out in options never join
        // the lease rotation.
        pool.remove_ip(config.server_ip);
        for addr in config.routers.iter().chain(&config.dns_servers) {
            pool.remove_ip(*addr);
        }

        let mut tables = Tables {
            pool,
            offers: HashMap::new(),
            clients: Vec::new(),
            server_options: HashMap::with_hasher(BuildNoHashHasher::default()),
            options: HashMap::with_hasher(BuildNoHashHasher::default()),
        };

        let netmask = tables.pool.netmask();
        let broadcast = tables.pool.broadcast();
        for option in [
            DhcpOption::subnet_mask(netmask),
            DhcpOption::broadcast_address(broadcast),
            DhcpOption::server_id(config.server_ip),
            DhcpOption::ip_lease_time(config.ip_lease_time),
            DhcpOption::renewal_t1(config.renewal_t1),
            DhcpOption::rebinding_t2(config.rebinding_t2),
        ] {
            tables.server_options.insert(option.code, option);
        }

        if !config.routers.is_empty() {
            let option = DhcpOption::routers(config.routers.clone());
            tables.options.insert(option.code, option);
        }
        if !config.dns_servers.is_empty() {
            let option = DhcpOption::dns_servers(config.dns_servers.clone());
            tables.options.insert(option.code, option);
        }

        let tables = Arc::new(Mutex::new(tables));
        let scheduler = Scheduler::spawn({
            let tables = tables.clone();
            move |expiry| Self::expire(&tables, expiry)
        });

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            registry: OptionRegistry::new(),
            tables,
            scheduler,
            shutdown,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn expire(tables: &Arc<Mutex<Tables>>, expiry: Expiry) {
        let mut tables = tables.lock().expect("dhcp tables poisoned");
        match expiry {
            Expiry::ReleaseOffer { mac, xid } => {
                // A promoted offer was removed on REQUEST; this is then
                // a no-op.
                if let Some(record) = tables.offers.remove(&(mac, xid)) {
                    log::info!("offer of {} to {} expired", record.ip, mac);
                    tables.pool.add_ip(record.ip);
                }
            }
            Expiry::ReleaseLease { mac, ip } => {
                let lapsed = tables
                    .clients
                    .iter()
                    .position(|client| client.mac == mac && client.ip == ip);
                if let Some(at) = lapsed {
                    let record = tables.clients.remove(at);
                    log::info!("lease of {} to {} expired", record.ip, mac);
                    tables.pool.add_ip(record.ip);
                }
            }
            Expiry::RestoreQuarantined { ip } => {
                log::info!("address {ip} leaves quarantine");
                tables.pool.add_ip(ip);
            }
        }
    }

    /// Runs one frame through the receive path: Ethernet, IPv4, UDP,
    /// then the DHCP dispatch. `server_mac` becomes the source address
    /// of the reply frame.
    pub fn handle_frame(
        &self,
        frame: &EthernetFrame,
        server_mac: MacAddress,
    ) -> Option<EthernetFrame> {
        if frame.ethertype != ethernet::ETHERTYPE_IPV4 {
            return None;
        }

        let ip = match Ipv4Packet::disassemble(&frame.payload) {
            Ok(ip) => ip,
            Err(error) => {
                log::trace!("dropping frame: {error}");
                return None;
            }
        };
        if ip.protocol != PROTOCOL_UDP {
            return None;
        }

        let udp = match UdpDatagram::disassemble(&ip.payload) {
            Ok(udp) => udp,
            Err(error) => {
                log::trace!("dropping datagram: {error}");
                return None;
            }
        };
        if udp.destination != self.config.server_port {
            return None;
        }

        let request = match DhcpPacket::disassemble(&self.registry, &udp.payload) {
            Ok(packet) => packet,
            Err(error) => {
                log::debug!("undecodable dhcp payload: {error}");
                return None;
            }
        };

        let correlation = Uuid::new_v4();
        let message_type = request.message_type()?;
        log::debug!(
            "[{correlation}] {message_type:?} from {} (xid {:#010x})",
            request.chaddr,
            request.xid
        );

        let reply = match message_type {
            MessageType::Discover => self.handle_discover(&request),
            MessageType::Request => self.handle_request(&request),
            MessageType::Decline => {
                self.handle_decline(&request);
                None
            }
            MessageType::Release => {
                self.handle_release(&request);
                None
            }
            MessageType::Inform => self.handle_inform(&request),
            // OFFER/ACK/NAK are server words; a client sending them is
            // noise.
            _ => None,
        }?;

        log::debug!(
            "[{correlation}] replying {:?} yiaddr={}",
            reply.message_type(),
            reply.yiaddr
        );

        Some(self.wrap_reply(&request, reply, server_mac))
    }

    fn handle_discover(&self, request: &DhcpPacket) -> Option<DhcpPacket> {
        let mut tables = self.tables.lock().expect("dhcp tables poisoned");

        let mut offer = DhcpPacket::reply_to(
            request.xid,
            request.chaddr,
            request.broadcast || self.config.broadcast,
        );
        offer.options.push(DhcpOption::message_type(MessageType::Offer));
        append_server_options(&tables, &mut offer);
        append_requested_options(&tables, request, &mut offer);

        let hostname = request.host_name().unwrap_or_default().to_string();
        let record = tables
            .pool
            .get_ip(&hostname, request.chaddr, request.requested_ip())?;

        offer.siaddr = self.config.server_ip;
        offer.yiaddr = record.ip;

        tables
            .offers
            .insert((request.chaddr, request.xid), record);
        self.scheduler.insert(
            Duration::from_secs(self.config.offer_hold_time),
            Expiry::ReleaseOffer {
                mac: request.chaddr,
                xid: request.xid,
            },
        );

        Some(offer)
    }

    fn handle_request(&self, request: &DhcpPacket) -> Option<DhcpPacket> {
        let mut tables = self.tables.lock().expect("dhcp tables poisoned");

        let key = (request.chaddr, request.xid);
        let offered = tables.offers.get(&key)?.clone();

        // The client may be accepting a competing server's offer.
        if let Some(server_id) = request.server_id() {
            if server_id != self.config.server_ip {
                return None;
            }
        }

        let mut ack = DhcpPacket::reply_to(
            request.xid,
            request.chaddr,
            request.broadcast || self.config.broadcast,
        );
        ack.options.push(DhcpOption::message_type(MessageType::Ack));
        append_server_options(&tables, &mut ack);
        append_requested_options(&tables, request, &mut ack);

        let hostname = request
            .host_name()
            .map(str::to_string)
            .unwrap_or_else(|| offered.name.clone());

        let record = match request.requested_ip() {
            Some(requested) if requested != offered.ip => {
                // The client changed its mind since the offer.
                tables.pool.add_ip(offered.ip);
                match tables.pool.get_ip(&hostname, request.chaddr, Some(requested)) {
                    Some(record) => record,
                    None => {
                        tables.offers.remove(&key);
                        return None;
                    }
                }
            }
            _ => Record::new(hostname, offered.mac, offered.ip),
        };

        tables.offers.remove(&key);

        // One address per client: an earlier lease goes back first.
        if let Some(at) = tables
            .clients
            .iter()
            .position(|client| client.mac == request.chaddr)
        {
            let old = tables.clients.remove(at);
            if old.ip != record.ip {
                tables.pool.add_ip(old.ip);
            }
        }

        ack.siaddr = self.config.server_ip;
        ack.yiaddr = record.ip;

        self.scheduler.insert(
            Duration::from_secs(u64::from(self.lease_seconds(&tables))),
            Expiry::ReleaseLease {
                mac: record.mac,
                ip: record.ip,
            },
        );
        tables.clients.push(record);

        Some(ack)
    }

    fn handle_release(&self, request: &DhcpPacket) {
        let mut tables = self.tables.lock().expect("dhcp tables poisoned");
        if let Some(at) = tables
            .clients
            .iter()
            .position(|client| client.mac == request.chaddr)
        {
            let record = tables.clients.remove(at);
            log::info!("{} released {}", record.mac, record.ip);
            tables.pool.add_ip(record.ip);
        }
    }

    fn handle_decline(&self, request: &DhcpPacket) {
        // The client found the address in use; take it out of
        // circulation for a while.
        let Some(declined) = request.requested_ip() else {
            return;
        };

        let mut tables = self.tables.lock().expect("dhcp tables poisoned");

        if let Some(record) = tables.offers.remove(&(request.chaddr, request.xid)) {
            if record.ip != declined {
                tables.pool.add_ip(record.ip);
            }
        }
        tables.pool.remove_ip(declined);

        log::warn!("{} declined {declined}; quarantining", request.chaddr);
        self.scheduler.insert(
            Duration::from_secs(self.config.decline_quarantine),
            Expiry::RestoreQuarantined { ip: declined },
        );
    }

    fn handle_inform(&self, request: &DhcpPacket) -> Option<DhcpPacket> {
        let tables = self.tables.lock().expect("dhcp tables poisoned");

        let mut ack = DhcpPacket::reply_to(request.xid, request.chaddr, false);
        ack.options.push(DhcpOption::message_type(MessageType::Ack));
        append_server_options(&tables, &mut ack);
        ack.siaddr = self.config.server_ip;

        Some(ack)
    }

    /// The lease duration currently advertised through option 51.
    fn lease_seconds(&self, tables: &Tables) -> u32 {
        let code = OptionCode::IpLeaseTime.code();
        let advertised = tables
            .server_options
            .get(&code)
            .or_else(|| tables.options.get(&code));
        match advertised.map(|option| &option.value) {
            Some(OptionValue::U32(seconds)) => *seconds,
            _ => self.config.ip_lease_time,
        }
    }

    /// Builds the UDP, IPv4 and Ethernet layers around a reply.
    ///
    /// Destination selection: a relayed packet goes back through
    /// `giaddr` with the hop count copied; a client with a live
    /// `ciaddr` is unicast there; otherwise broadcast when either side
    /// asked for it, else unicast to the assigned address.
    fn wrap_reply(
        &self,
        request: &DhcpPacket,
        mut reply: DhcpPacket,
        server_mac: MacAddress,
    ) -> EthernetFrame {
        let mut destination_ip = Ipv4Addr::BROADCAST;
        let mut destination_mac = request.chaddr;

        if request.giaddr != Ipv4Addr::UNSPECIFIED {
            reply.hops = request.hops;
            reply.giaddr = request.giaddr;
            destination_ip = request.giaddr;
        } else if request.ciaddr != Ipv4Addr::UNSPECIFIED {
            destination_ip = request.ciaddr;
        } else if self.config.broadcast || request.broadcast {
            destination_mac = ethernet::broadcast_mac();
        } else if reply.yiaddr != Ipv4Addr::UNSPECIFIED {
            destination_ip = reply.yiaddr;
        }

        let mut udp = UdpDatagram::new(
            self.config.server_port,
            self.config.client_port,
            reply.build(),
        );
        udp.calc_checksum(self.config.server_ip, destination_ip);

        let ip = Ipv4Packet::new(
            self.config.server_ip,
            destination_ip,
            PROTOCOL_UDP,
            udp.build(),
        );

        EthernetFrame::new(
            destination_mac,
            server_mac,
            ethernet::ETHERTYPE_IPV4,
            ip.build(),
        )
    }

    /// Registers an option appended to every response. An option
    /// carrying in-network addresses takes them out of the pool.
    pub fn register_server_option(&self, option: DhcpOption) {
        let mut tables = self.tables.lock().expect("dhcp tables poisoned");
        reserve_option_addresses(&mut tables.pool, &option);
        tables.server_options.insert(option.code, option);
    }

    /// Registers an option served on request via option 55.
    pub fn register_option(&self, option: DhcpOption) {
        let mut tables = self.tables.lock().expect("dhcp tables poisoned");
        reserve_option_addresses(&mut tables.pool, &option);
        tables.options.insert(option.code, option);
    }

    pub fn reserve(&self, record: Record) {
        self.tables
            .lock()
            .expect("dhcp tables poisoned")
            .pool
            .reserve(record);
    }

    pub fn unreserve(&self, mac: &MacAddress) {
        self.tables
            .lock()
            .expect("dhcp tables poisoned")
            .pool
            .unreserve(mac);
    }

    pub fn add_listing(&self, mac: MacAddress) {
        self.tables
            .lock()
            .expect("dhcp tables poisoned")
            .pool
            .add_listing(mac);
    }

    pub fn remove_listing(&self, mac: &MacAddress) {
        self.tables
            .lock()
            .expect("dhcp tables poisoned")
            .pool
            .remove_listing(mac);
    }

    pub fn set_listing_mode(&self, mode: super::pool::ListingMode) {
        self.tables
            .lock()
            .expect("dhcp tables poisoned")
            .pool
            .set_mode(mode);
    }

    /// The record offered to `(mac, xid)`, while the hold lasts.
    pub fn offer(&self, mac: MacAddress, xid: u32) -> Option<Record> {
        self.tables
            .lock()
            .expect("dhcp tables poisoned")
            .offers
            .get(&(mac, xid))
            .cloned()
    }

    /// The active lease for `mac`, if any.
    pub fn client(&self, mac: MacAddress) -> Option<Record> {
        self.tables
            .lock()
            .expect("dhcp tables poisoned")
            .clients
            .iter()
            .find(|client| client.mac == mac)
            .cloned()
    }

    pub fn is_free(&self, ip: Ipv4Addr) -> bool {
        self.tables
            .lock()
            .expect("dhcp tables poisoned")
            .pool
            .is_free(ip)
    }

    /// Receive loop: frames in, a worker task per frame, replies out.
    pub async fn run(
        self: Arc<Self>,
        mut input: impl Input<EthernetFrame>,
        output: Arc<dyn Output<EthernetFrame>>,
        server_mac: MacAddress,
    ) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                frame = input.get() => {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(error) => {
                            log::warn!("dhcp input closed: {error}");
                            break;
                        }
                    };

                    let server = self.clone();
                    let output = output.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = server.handle_frame(&frame, server_mac) {
                            if let Err(error) = output.send(reply).await {
                                log::warn!("dhcp reply dropped: {error}");
                            }
                        }
                    });
                }
            }
        }
    }

    /// Stops the run loop and the scheduler. Pending expiry events are
    /// cancelled.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.scheduler.shutdown();
    }
}

fn append_server_options(tables: &Tables, reply: &mut DhcpPacket) {
    let mut codes: Vec<u8> = tables.server_options.keys().copied().collect();
    codes.sort_unstable();
    for code in codes {
        reply.options.push(tables.server_options[&code].clone());
    }
}

fn append_requested_options(tables: &Tables, request: &DhcpPacket, reply: &mut DhcpPacket) {
    for code in request.parameter_request_list() {
        if *code == CODE_PAD || *code == CODE_END {
            continue;
        }
        if reply.options.iter().any(|option| option.code == *code) {
            continue;
        }
        if let Some(option) = tables.options.get(code) {
            reply.options.push(option.clone());
        }
    }
}

fn reserve_option_addresses(pool: &mut Pool, option: &DhcpOption) {
    let addresses: Vec<Ipv4Addr> = match &option.value {
        OptionValue::Ip(addr) => vec![*addr],
        OptionValue::IpList(addrs) => addrs.clone(),
        _ => return,
    };

    for addr in addresses {
        if pool.contains(addr) && pool.remove_ip(addr) {
            log::debug!("option {} pins {addr} out of the pool", option.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhcp::options::MessageType;

    const CLIENT_MAC: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01];
    const XID: u32 = 0x12345678;

    fn test_config() -> ServerConfig {
        ServerConfig {
            server_ip: Ipv4Addr::new(192, 168, 10, 1),
            network: Ipv4Addr::new(192, 168, 10, 0),
            mask: Ipv4Addr::new(255, 255, 255, 0),
            test_mode: true,
            ..ServerConfig::default()
        }
    }

    fn server() -> DhcpServer {
        DhcpServer::new(test_config()).unwrap()
    }

    fn server_mac() -> MacAddress {
        MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0xFE])
    }

    fn client_mac() -> MacAddress {
        MacAddress::new(CLIENT_MAC)
    }

    fn wrap(request: DhcpPacket) -> EthernetFrame {
        let mut udp = UdpDatagram::new(68, 67, request.build());
        udp.calc_checksum(Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST);
        let ip = Ipv4Packet::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
            PROTOCOL_UDP,
            udp.build(),
        );
        EthernetFrame::new(
            ethernet::broadcast_mac(),
            client_mac(),
            ethernet::ETHERTYPE_IPV4,
            ip.build(),
        )
    }

    fn unwrap_reply(frame: &EthernetFrame, server: &DhcpServer) -> DhcpPacket {
        let ip = Ipv4Packet::disassemble(&frame.payload).unwrap();
        let udp = UdpDatagram::disassemble(&ip.payload).unwrap();
        DhcpPacket::disassemble(&server.registry, &udp.payload).unwrap()
    }

    fn discover() -> DhcpPacket {
        DhcpPacket {
            xid: XID,
            chaddr: client_mac(),
            options: vec![
                DhcpOption::message_type(MessageType::Discover),
                DhcpOption::parameter_request_list(vec![1, 3, 6]),
            ],
            ..DhcpPacket::default()
        }
    }

    fn request(requested: Ipv4Addr) -> DhcpPacket {
        DhcpPacket {
            xid: XID,
            chaddr: client_mac(),
            options: vec![
                DhcpOption::message_type(MessageType::Request),
                DhcpOption::requested_ip(requested),
                DhcpOption::server_id(Ipv4Addr::new(192, 168, 10, 1)),
            ],
            ..DhcpPacket::default()
        }
    }

    #[tokio::test]
    async fn discover_yields_offer() {
        let server = server();

        let reply_frame = server
            .handle_frame(&wrap(discover()), server_mac())
            .expect("an offer");
        let offer = unwrap_reply(&reply_frame, &server);

        assert_eq!(offer.message_type(), Some(MessageType::Offer));
        assert_eq!(offer.yiaddr, Ipv4Addr::new(192, 168, 10, 2));
        assert_eq!(offer.siaddr, Ipv4Addr::new(192, 168, 10, 1));
        assert_eq!(offer.xid, XID);

        // Required server options ride along.
        assert_eq!(
            offer.option(OptionCode::SubnetMask),
            Some(&OptionValue::Ip(Ipv4Addr::new(255, 255, 255, 0)))
        );
        assert_eq!(
            offer.server_id(),
            Some(Ipv4Addr::new(192, 168, 10, 1))
        );

        // The offer table holds the pending record.
        let pending = server.offer(client_mac(), XID).expect("pending offer");
        assert_eq!(pending.ip, offer.yiaddr);

        server.shutdown();
    }

    #[tokio::test]
    async fn request_completes_lease() {
        let server = server();

        let offer_frame = server.handle_frame(&wrap(discover()), server_mac()).unwrap();
        let offer = unwrap_reply(&offer_frame, &server);

        let ack_frame = server
            .handle_frame(&wrap(request(offer.yiaddr)), server_mac())
            .expect("an ack");
        let ack = unwrap_reply(&ack_frame, &server);

        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, offer.yiaddr);
        assert!(matches!(
            ack.option(OptionCode::IpLeaseTime),
            Some(OptionValue::U32(_))
        ));

        // Offer promoted to a lease.
        assert!(server.offer(client_mac(), XID).is_none());
        assert_eq!(server.client(client_mac()).unwrap().ip, ack.yiaddr);

        server.shutdown();
    }

    #[tokio::test]
    async fn request_without_offer_is_dropped() {
        let server = server();
        assert!(server
            .handle_frame(&wrap(request(Ipv4Addr::new(192, 168, 10, 2))), server_mac())
            .is_none());
        server.shutdown();
    }

    #[tokio::test]
    async fn request_for_other_server_is_dropped() {
        let server = server();
        server.handle_frame(&wrap(discover()), server_mac()).unwrap();

        let mut foreign = request(Ipv4Addr::new(192, 168, 10, 2));
        foreign.options[2] = DhcpOption::server_id(Ipv4Addr::new(192, 168, 10, 9));

        assert!(server.handle_frame(&wrap(foreign), server_mac()).is_none());
        server.shutdown();
    }

    #[tokio::test]
    async fn changed_requested_ip_returns_offered_address() {
        let server = server();

        let offer_frame = server.handle_frame(&wrap(discover()), server_mac()).unwrap();
        let offered = unwrap_reply(&offer_frame, &server).yiaddr;

        let wanted = Ipv4Addr::new(192, 168, 10, 50);
        let ack_frame = server
            .handle_frame(&wrap(request(wanted)), server_mac())
            .expect("an ack");
        let ack = unwrap_reply(&ack_frame, &server);

        assert_eq!(ack.yiaddr, wanted);
        // The originally offered address is back in the free list.
        assert!(server.is_free(offered));

        server.shutdown();
    }

    #[tokio::test]
    async fn release_returns_address() {
        let server = server();
        let offer_frame = server.handle_frame(&wrap(discover()), server_mac()).unwrap();
        let offered = unwrap_reply(&offer_frame, &server).yiaddr;
        server
            .handle_frame(&wrap(request(offered)), server_mac())
            .unwrap();

        let release = DhcpPacket {
            xid: XID,
            chaddr: client_mac(),
            ciaddr: offered,
            options: vec![DhcpOption::message_type(MessageType::Release)],
            ..DhcpPacket::default()
        };
        assert!(server.handle_frame(&wrap(release), server_mac()).is_none());

        assert!(server.client(client_mac()).is_none());
        assert!(server.is_free(offered));

        server.shutdown();
    }

    #[tokio::test]
    async fn decline_quarantines_address() {
        let server = server();
        let offer_frame = server.handle_frame(&wrap(discover()), server_mac()).unwrap();
        let offered = unwrap_reply(&offer_frame, &server).yiaddr;

        let decline = DhcpPacket {
            xid: XID,
            chaddr: client_mac(),
            options: vec![
                DhcpOption::message_type(MessageType::Decline),
                DhcpOption::requested_ip(offered),
            ],
            ..DhcpPacket::default()
        };
        assert!(server.handle_frame(&wrap(decline), server_mac()).is_none());

        // Neither offered nor free: out of circulation.
        assert!(server.offer(client_mac(), XID).is_none());
        assert!(!server.is_free(offered));

        server.shutdown();
    }

    #[tokio::test]
    async fn inform_gets_options_without_allocation() {
        let server = server();

        let inform = DhcpPacket {
            xid: XID,
            chaddr: client_mac(),
            ciaddr: Ipv4Addr::new(192, 168, 10, 77),
            options: vec![DhcpOption::message_type(MessageType::Inform)],
            ..DhcpPacket::default()
        };
        let frame = server
            .handle_frame(&wrap(inform), server_mac())
            .expect("an ack");

        // Unicast back to ciaddr.
        let ip = Ipv4Packet::disassemble(&frame.payload).unwrap();
        assert_eq!(ip.destination, Ipv4Addr::new(192, 168, 10, 77));

        let ack = unwrap_reply(&frame, &server);
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert!(server.client(client_mac()).is_none());

        server.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn offer_hold_expiry_returns_address() {
        let server = server();
        let offer_frame = server.handle_frame(&wrap(discover()), server_mac()).unwrap();
        let offered = unwrap_reply(&offer_frame, &server).yiaddr;

        assert!(!server.is_free(offered));
        tokio::time::sleep(Duration::from_secs(
            server.config().offer_hold_time + 1,
        ))
        .await;

        assert!(server.offer(client_mac(), XID).is_none());
        assert!(server.is_free(offered));

        server.shutdown();
    }

    #[tokio::test]
    async fn non_dhcp_traffic_is_ignored() {
        let server = server();

        // Wrong ethertype.
        let arp = EthernetFrame::new(
            ethernet::broadcast_mac(),
            client_mac(),
            0x0806,
            vec![0; 28],
        );
        assert!(server.handle_frame(&arp, server_mac()).is_none());

        // UDP to another port.
        let mut udp = UdpDatagram::new(68, 1234, vec![0; 32]);
        udp.calc_checksum(Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST);
        let ip = Ipv4Packet::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
            PROTOCOL_UDP,
            udp.build(),
        );
        let frame = EthernetFrame::new(
            ethernet::broadcast_mac(),
            client_mac(),
            ethernet::ETHERTYPE_IPV4,
            ip.build(),
        );
        assert!(server.handle_frame(&frame, server_mac()).is_none());

        server.shutdown();
    }

    #[tokio::test]
    async fn denied_mac_gets_silence() {
        let server = server();
        server.add_listing(client_mac());

        assert!(server.handle_frame(&wrap(discover()), server_mac()).is_none());
        server.shutdown();
    }

    #[tokio::test]
    async fn run_loop_round_trips_frames() {
        let server = Arc::new(server());

        let (frames_in, input) = crate::netio::channel::input();
        let (output, mut replies) = crate::netio::channel::output();

        let runner = tokio::spawn(server.clone().run(input, Arc::new(output), server_mac()));

        frames_in.send(wrap(discover())).unwrap();
        let reply = replies.recv().await.expect("offer frame");
        assert_eq!(
            unwrap_reply(&reply, &server).message_type(),
            Some(MessageType::Offer)
        );

        server.shutdown();
        runner.await.unwrap();
    }
}
