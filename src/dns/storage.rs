//! Record storage: authoritative entries, a TTL-bounded cache, and the
//! hostname/domain blocklists, with JSON save/load.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::message::{Question, RData, RecordClass, RecordType, ResourceRecord};

/// TTL attached to the synthetic record answering blocked names.
const BLOCKED_TTL: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

type Key = (String, RecordType, RecordClass);

fn key_of(question: &Question) -> Key {
    (question.name.clone(), question.qtype, question.qclass)
}

/// The server's record store. Authoritative records never expire;
/// cached records carry an absolute expiration; the two maps are
/// disjoint by construction (different insert paths).
#[derive(Debug, Default)]
pub struct Storage {
    records: HashMap<Key, Vec<ResourceRecord>>,
    cache: HashMap<Key, (Vec<ResourceRecord>, DateTime<Utc>)>,
    blocked_hostnames: HashSet<String>,
    blocked_domains: HashSet<String>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an authoritative record under its own (name, type, class).
    pub fn add_record(&mut self, record: ResourceRecord) {
        self.records
            .entry((record.name.clone(), record.rtype, record.rclass))
            .or_default()
            .push(record);
    }

    /// Remembers an upstream answer until its shortest TTL runs out.
    pub fn add_cache(&mut self, question: &Question, records: Vec<ResourceRecord>) {
        let Some(shortest) = records.iter().map(|record| record.ttl).min() else {
            return;
        };
        let expiration = Utc::now() + Duration::seconds(i64::from(shortest));
        self.cache.insert(key_of(question), (records, expiration));
    }

    pub fn block_hostname(&mut self, name: impl Into<String>) {
        self.blocked_hostnames.insert(name.into());
    }

    /// Blocks a domain and everything under it.
    pub fn block_domain(&mut self, domain: impl Into<String>) {
        self.blocked_domains.insert(domain.into());
    }

    pub fn unblock_hostname(&mut self, name: &str) {
        self.blocked_hostnames.remove(name);
    }

    pub fn unblock_domain(&mut self, domain: &str) {
        self.blocked_domains.remove(domain);
    }

    /// A name is blocked when it matches the hostname set exactly, or
    /// when any whole-label suffix of it is in the domain set:
    /// `foo.bar.example.com` matches a blocked `example.com`, but
    /// `notexample.com` does not.
    pub fn is_blocked(&self, question: &Question) -> bool {
        if self.blocked_hostnames.contains(&question.name) {
            return true;
        }

        let labels: Vec<&str> = question.name.split('.').collect();
        (0..labels.len()).any(|start| self.blocked_domains.contains(&labels[start..].join(".")))
    }

    /// The storage answer for one question, in precedence order:
    /// blocked names get the sinkhole record, then authoritative
    /// records, then unexpired cache entries.
    pub fn get(&self, question: &Question) -> Option<Vec<ResourceRecord>> {
        if self.is_blocked(question) {
            return Some(vec![blocked_record(&question.name)]);
        }

        let key = key_of(question);

        if let Some(records) = self.records.get(&key) {
            return Some(records.clone());
        }

        if let Some((records, expiration)) = self.cache.get(&key) {
            if Utc::now() < *expiration {
                return Some(records.clone());
            }
        }

        None
    }

    /// Drops every cache entry whose expiration has passed.
    pub fn purge_expired(&mut self) {
        let now = Utc::now();
        self.cache.retain(|_, (_, expiration)| now < *expiration);
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let doc = SavedStorage {
            records: self
                .records
                .values()
                .flatten()
                .map(SavedRecord::from)
                .collect(),
            blocked_hostnames: self.blocked_hostnames.iter().cloned().collect(),
            blocked_domains: self.blocked_domains.iter().cloned().collect(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }

    /// Extends this storage from a saved document. A missing file is
    /// not an error.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error.into()),
        };

        let doc: SavedStorage = serde_json::from_str(&text)?;
        for hostname in doc.blocked_hostnames {
            self.blocked_hostnames.insert(hostname);
        }
        for domain in doc.blocked_domains {
            self.blocked_domains.insert(domain);
        }
        for saved in doc.records {
            self.add_record(saved.into_record());
        }
        Ok(())
    }
}

/// The sinkhole answer: `0.0.0.0` with the maximum TTL.
fn blocked_record(name: &str) -> ResourceRecord {
    ResourceRecord::a(name, BLOCKED_TTL, Ipv4Addr::UNSPECIFIED)
}

#[derive(Serialize, Deserialize)]
struct SavedRecord {
    name: String,
    rtype: u16,
    rclass: u16,
    ttl: u32,
    rdata: Vec<u8>,
}

impl From<&ResourceRecord> for SavedRecord {
    fn from(record: &ResourceRecord) -> Self {
        Self {
            name: record.name.clone(),
            rtype: record.rtype.0,
            rclass: record.rclass.0,
            ttl: record.ttl,
            rdata: record.rdata.clone(),
        }
    }
}

impl SavedRecord {
    fn into_record(self) -> ResourceRecord {
        // Saved rdata is never compressed, so interpretation needs no
        // surrounding message.
        let data = match (RecordType(self.rtype), self.rdata.as_slice()) {
            (RecordType::A, &[a, b, c, d]) => RData::A(Ipv4Addr::new(a, b, c, d)),
            (RecordType::AAAA, octets) if octets.len() == 16 => {
                RData::Aaaa(<[u8; 16]>::try_from(octets).unwrap().into())
            }
            (RecordType::PTR | RecordType::NS | RecordType::CNAME, bytes) => {
                let mut cursor = 0;
                match super::message::decode_name(bytes, &mut cursor) {
                    Ok(name) => RData::Name(name),
                    Err(_) => RData::Raw(bytes.to_vec()),
                }
            }
            (_, bytes) => RData::Raw(bytes.to_vec()),
        };

        ResourceRecord {
            name: self.name,
            rtype: RecordType(self.rtype),
            rclass: RecordClass(self.rclass),
            ttl: self.ttl,
            rdata: self.rdata,
            data,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SavedStorage {
    #[serde(default)]
    records: Vec<SavedRecord>,
    #[serde(default)]
    blocked_hostnames: Vec<String>,
    #[serde(default)]
    blocked_domains: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(name: &str) -> Question {
        Question::new(name, RecordType::A)
    }

    #[test]
    fn blocked_hostname_gets_sinkhole_record() {
        let mut storage = Storage::new();
        storage.block_hostname("ads.tracker.net");

        let answer = storage.get(&question("ads.tracker.net")).unwrap();
        assert_eq!(answer.len(), 1);
        assert_eq!(answer[0].ttl, u32::MAX);
        assert_eq!(answer[0].data, RData::A(Ipv4Addr::UNSPECIFIED));
        assert_eq!(answer[0].rdata, vec![0, 0, 0, 0]);
    }

    #[test]
    fn domain_block_matches_label_suffixes_only() {
        let mut storage = Storage::new();
        storage.block_domain("example.com");

        assert!(storage.is_blocked(&question("example.com")));
        assert!(storage.is_blocked(&question("foo.example.com")));
        assert!(storage.is_blocked(&question("foo.bar.example.com")));
        assert!(!storage.is_blocked(&question("notexample.com")));
        assert!(!storage.is_blocked(&question("example.com.evil.net")));
    }

    #[test]
    fn authoritative_records_never_expire() {
        let mut storage = Storage::new();
        storage.add_record(ResourceRecord::a(
            "router.lan",
            0,
            Ipv4Addr::new(192, 168, 0, 1),
        ));

        let answer = storage.get(&question("router.lan")).unwrap();
        assert_eq!(answer[0].data, RData::A(Ipv4Addr::new(192, 168, 0, 1)));
    }

    #[test]
    fn cache_serves_until_expiration() {
        let mut storage = Storage::new();
        let q = question("example.com");
        storage.add_cache(
            &q,
            vec![ResourceRecord::a(
                "example.com",
                300,
                Ipv4Addr::new(1, 2, 3, 4),
            )],
        );

        assert!(storage.get(&q).is_some());
    }

    #[test]
    fn expired_cache_is_a_miss() {
        let mut storage = Storage::new();
        let q = question("example.com");
        // TTL zero expires immediately.
        storage.add_cache(
            &q,
            vec![ResourceRecord::a(
                "example.com",
                0,
                Ipv4Addr::new(1, 2, 3, 4),
            )],
        );

        assert!(storage.get(&q).is_none());

        storage.purge_expired();
        assert!(storage.cache.is_empty());
    }

    #[test]
    fn cache_expiration_uses_shortest_ttl() {
        let mut storage = Storage::new();
        let q = question("example.com");
        storage.add_cache(
            &q,
            vec![
                ResourceRecord::a("example.com", 600, Ipv4Addr::new(1, 1, 1, 1)),
                ResourceRecord::a("example.com", 60, Ipv4Addr::new(2, 2, 2, 2)),
            ],
        );

        let (_, expiration) = &storage.cache[&key_of(&q)];
        let remaining = *expiration - Utc::now();
        assert!(remaining <= Duration::seconds(60));
        assert!(remaining > Duration::seconds(55));
    }

    #[test]
    fn type_and_class_partition_the_maps() {
        let mut storage = Storage::new();
        storage.add_record(ResourceRecord::a(
            "dual.lan",
            60,
            Ipv4Addr::new(10, 0, 0, 1),
        ));

        let aaaa = Question::new("dual.lan", RecordType::AAAA);
        assert!(storage.get(&aaaa).is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "netherd-dns-storage-{}-{}.json",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));

        let mut storage = Storage::new();
        storage.add_record(ResourceRecord::a(
            "router.lan",
            0,
            Ipv4Addr::new(192, 168, 0, 1),
        ));
        storage.block_domain("example.com");
        storage.block_hostname("ads.tracker.net");
        storage.save(&path).unwrap();

        let mut restored = Storage::new();
        restored.load(&path).unwrap();
        assert!(restored.get(&question("router.lan")).is_some());
        assert!(restored.is_blocked(&question("sub.example.com")));
        assert!(restored.is_blocked(&question("ads.tracker.net")));

        std::fs::remove_file(&path).ok();
    }
}
