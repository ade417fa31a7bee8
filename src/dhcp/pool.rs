//! The IP address pool: an ordered free list, static reservations, and
//! allow/deny listing by hardware address.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::net::Ipv4Addr;

use itertools::Itertools;
use mac_address::MacAddress;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("mask {0} is not a contiguous netmask")]
    InvalidMask(Ipv4Addr),
}

/// One allocated or allocatable binding: the client's reported name,
/// its hardware address, and the address bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub mac: MacAddress,
    pub ip: Ipv4Addr,
}

impl Record {
    pub fn new(name: impl Into<String>, mac: MacAddress, ip: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            mac,
            ip,
        }
    }
}

/// Whether the listing set admits or rejects its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingMode {
    /// Only listed hardware addresses are served.
    Allow,
    /// Listed hardware addresses are refused.
    Deny,
}

impl ListingMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Allow => Self::Deny,
            Self::Deny => Self::Allow,
        }
    }
}

/// The lease pool for one network.
///
/// Every usable host address is in exactly one place: the free list,
/// the reservation table, or out with a caller (offered or leased).
/// Released addresses return to the head of the free list, so recently
/// used addresses are re-offered first.
pub struct Pool {
    network: Ipv4Addr,
    mask: Ipv4Addr,
    free: VecDeque<Ipv4Addr>,
    reservations: HashMap<MacAddress, Record>,
    listing: HashSet<MacAddress>,
    mode: ListingMode,
}

impl Pool {
    /// Builds the pool for `network`/`mask` with every usable host
    /// address free, in ascending order. The network and broadcast
    /// addresses are never handed out.
    pub fn new(network: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, PoolError> {
        let mask_bits = u32::from(mask);
        if mask_bits.count_ones() + mask_bits.trailing_zeros() != 32 {
            return Err(PoolError::InvalidMask(mask));
        }

        let base = u32::from(network) & mask_bits;
        let broadcast = base | !mask_bits;

        let free = (base.saturating_add(1)..broadcast)
            .map(Ipv4Addr::from)
            .collect();

        Ok(Self {
            network: Ipv4Addr::from(base),
            mask,
            free,
            reservations: HashMap::new(),
            listing: HashSet::new(),
            mode: ListingMode::Deny,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.mask
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !u32::from(self.mask))
    }

    /// Semantic containment: `(addr & mask) == (network & mask)`.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & u32::from(self.mask) == u32::from(self.network)
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn is_free(&self, addr: Ipv4Addr) -> bool {
        self.free.contains(&addr)
    }

    /// Pins `record.ip` to `record.mac`. The address leaves the free
    /// list. Broadcast, out-of-network and already-allocated addresses
    /// are ignored; re-reserving a known hardware address is a no-op.
    pub fn reserve(&mut self, record: Record) {
        if let Some(at) = self.free.iter().position(|ip| *ip == record.ip) {
            self.free.remove(at);
            self.reservations.insert(record.mac, record);
        } else if !self.reservations.contains_key(&record.mac)
            && record.ip != self.broadcast()
            && !self.contains(record.ip)
        {
            log::warn!("address {} is not in network {}/{}", record.ip, self.network, self.mask);
        }
    }

    /// Drops the reservation. The address does not return to the free
    /// list; the caller decides where it goes.
    pub fn unreserve(&mut self, mac: &MacAddress) -> Option<Record> {
        self.reservations.remove(mac)
    }

    pub fn is_reserved(&self, mac: &MacAddress) -> bool {
        self.reservations.contains_key(mac)
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Record> {
        self.reservations.values()
    }

    pub fn add_listing(&mut self, mac: MacAddress) {
        self.listing.insert(mac);
    }

    pub fn remove_listing(&mut self, mac: &MacAddress) {
        self.listing.remove(mac);
    }

    pub fn listing(&self) -> impl Iterator<Item = &MacAddress> {
        self.listing.iter()
    }

    pub fn mode(&self) -> ListingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ListingMode) {
        self.mode = mode;
    }

    pub fn toggle_mode(&mut self) {
        self.mode = self.mode.toggled();
    }

    /// Allocates an address for `mac`:
    ///
    /// 1. the listing gate may refuse outright,
    /// 2. a reservation wins over everything (the requested address is
    ///    ignored),
    /// 3. a free requested address is granted,
    /// 4. otherwise the head of the free list is taken.
    ///
    /// `None` means refused or exhausted; the server stays silent
    /// either way.
    pub fn get_ip(
        &mut self,
        name: &str,
        mac: MacAddress,
        requested: Option<Ipv4Addr>,
    ) -> Option<Record> {
        match (self.listing.contains(&mac), self.mode) {
            (true, ListingMode::Deny) | (false, ListingMode::Allow) => return None,
            _ => {}
        }

        if let Some(reserved) = self.reservations.get(&mac) {
            return Some(reserved.clone());
        }

        if let Some(requested) = requested {
            if let Some(at) = self.free.iter().position(|ip| *ip == requested) {
                self.free.remove(at);
                return Some(Record::new(name, mac, requested));
            }
        }

        self.free
            .pop_front()
            .map(|ip| Record::new(name, mac, ip))
    }

    /// Returns an address to the head of the free list, so it is the
    /// next one handed out.
    pub fn add_ip(&mut self, ip: Ipv4Addr) {
        if self.contains(ip)
            && ip != self.network
            && ip != self.broadcast()
            && !self.free.contains(&ip)
        {
            self.free.push_front(ip);
        }
    }

    /// Pulls an address out of circulation (declined addresses are
    /// quarantined this way).
    pub fn remove_ip(&mut self, ip: Ipv4Addr) -> bool {
        match self.free.iter().position(|candidate| *candidate == ip) {
            Some(at) => {
                self.free.remove(at);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pool({}/{}, {} free, reserved [{}])",
            self.network,
            self.mask,
            self.free.len(),
            self.reservations.values().map(|r| &r.ip).join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn pool() -> Pool {
        Pool::new(
            Ipv4Addr::new(192, 168, 10, 0),
            Ipv4Addr::new(255, 255, 255, 0),
        )
        .unwrap()
    }

    #[test]
    fn usable_range_excludes_network_and_broadcast() {
        let pool = pool();
        assert_eq!(pool.free_count(), 254);
        assert!(!pool.is_free(Ipv4Addr::new(192, 168, 10, 0)));
        assert!(!pool.is_free(Ipv4Addr::new(192, 168, 10, 255)));
        assert!(pool.is_free(Ipv4Addr::new(192, 168, 10, 1)));
        assert_eq!(pool.broadcast(), Ipv4Addr::new(192, 168, 10, 255));
    }

    #[test]
    fn non_contiguous_mask_rejected() {
        assert_eq!(
            Pool::new(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(255, 0, 255, 0)).unwrap_err(),
            PoolError::InvalidMask(Ipv4Addr::new(255, 0, 255, 0))
        );
    }

    #[test]
    fn allocation_pops_the_head() {
        let mut pool = pool();
        let record = pool.get_ip("host-a", mac(1), None).unwrap();
        assert_eq!(record.ip, Ipv4Addr::new(192, 168, 10, 1));
        assert_eq!(pool.free_count(), 253);
    }

    #[test]
    fn requested_ip_satisfied_when_free() {
        let mut pool = pool();
        let wanted = Ipv4Addr::new(192, 168, 10, 77);
        let record = pool.get_ip("host-a", mac(1), Some(wanted)).unwrap();
        assert_eq!(record.ip, wanted);
        assert!(!pool.is_free(wanted));
    }

    #[test]
    fn requested_ip_ignored_when_taken() {
        let mut pool = pool();
        let wanted = Ipv4Addr::new(192, 168, 10, 77);
        pool.get_ip("host-a", mac(1), Some(wanted)).unwrap();

        let record = pool.get_ip("host-b", mac(2), Some(wanted)).unwrap();
        assert_eq!(record.ip, Ipv4Addr::new(192, 168, 10, 1));
    }

    #[test]
    fn released_address_is_reused_first() {
        let mut pool = pool();
        let first = pool.get_ip("host-a", mac(1), None).unwrap();
        pool.get_ip("host-b", mac(2), None).unwrap();

        pool.add_ip(first.ip);
        let next = pool.get_ip("host-c", mac(3), None).unwrap();
        assert_eq!(next.ip, first.ip);
    }

    #[test]
    fn reservation_wins_over_requested_ip() {
        let mut pool = pool();
        let pinned = Ipv4Addr::new(192, 168, 10, 200);
        pool.reserve(Record::new("printer", mac(9), pinned));

        let record = pool
            .get_ip("printer", mac(9), Some(Ipv4Addr::new(192, 168, 10, 5)))
            .unwrap();
        assert_eq!(record.ip, pinned);
        // The pinned address never sat on the free list meanwhile.
        assert!(!pool.is_free(pinned));
    }

    #[test]
    fn re_reserving_same_mac_is_noop() {
        let mut pool = pool();
        let pinned = Ipv4Addr::new(192, 168, 10, 200);
        pool.reserve(Record::new("printer", mac(9), pinned));
        let before = pool.free_count();

        pool.reserve(Record::new("printer", mac(9), pinned));
        assert_eq!(pool.free_count(), before);
        assert!(pool.is_reserved(&mac(9)));
    }

    #[test]
    fn unreserve_does_not_refill_free_list() {
        let mut pool = pool();
        let pinned = Ipv4Addr::new(192, 168, 10, 200);
        pool.reserve(Record::new("printer", mac(9), pinned));

        let record = pool.unreserve(&mac(9)).unwrap();
        assert_eq!(record.ip, pinned);
        assert!(!pool.is_free(pinned));
    }

    #[test]
    fn deny_listing_refuses_members() {
        let mut pool = pool();
        pool.add_listing(mac(7));
        assert!(pool.get_ip("intruder", mac(7), None).is_none());
        assert!(pool.get_ip("guest", mac(8), None).is_some());
    }

    #[test]
    fn allow_listing_refuses_strangers() {
        let mut pool = pool();
        pool.add_listing(mac(7));
        pool.toggle_mode();
        assert_eq!(pool.mode(), ListingMode::Allow);

        assert!(pool.get_ip("member", mac(7), None).is_some());
        assert!(pool.get_ip("stranger", mac(8), None).is_none());
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pool = Pool::new(
            Ipv4Addr::new(10, 0, 0, 0),
            Ipv4Addr::new(255, 255, 255, 252),
        )
        .unwrap();
        // A /30 holds two usable addresses.
        assert!(pool.get_ip("a", mac(1), None).is_some());
        assert!(pool.get_ip("b", mac(2), None).is_some());
        assert!(pool.get_ip("c", mac(3), None).is_none());
    }

    #[test]
    fn add_ip_guards_the_invariant() {
        let mut pool = pool();
        let outside = Ipv4Addr::new(10, 0, 0, 1);
        pool.add_ip(outside);
        assert!(!pool.is_free(outside));

        pool.add_ip(pool.broadcast());
        assert!(!pool.is_free(pool.broadcast()));

        // Double release must not duplicate the address.
        let record = pool.get_ip("a", mac(1), None).unwrap();
        pool.add_ip(record.ip);
        pool.add_ip(record.ip);
        assert_eq!(pool.free_count(), 254);
    }

    #[test]
    fn every_address_in_at_most_one_place() {
        let mut pool = pool();
        pool.reserve(Record::new("printer", mac(9), Ipv4Addr::new(192, 168, 10, 4)));
        let a = pool.get_ip("a", mac(1), None).unwrap();
        let b = pool
            .get_ip("b", mac(2), Some(Ipv4Addr::new(192, 168, 10, 30)))
            .unwrap();
        pool.add_ip(a.ip);

        let mut seen = HashSet::new();
        for ip in &pool.free {
            assert!(seen.insert(*ip), "{ip} duplicated in free list");
        }
        for record in pool.reservations.values() {
            assert!(seen.insert(record.ip), "{} also free", record.ip);
        }
        // Outstanding allocation must not be in either set.
        assert!(!seen.contains(&b.ip));
    }
}
