//! Saving and restoring server state as a versioned JSON document.
//!
//! The document carries the setup scalars, the reservations, the
//! listing set, and both option tables as raw option bytes. Unknown
//! keys are ignored on load so older builds can read newer files;
//! a document declaring a newer format version is refused outright.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::ServerConfig;
use super::options::{DhcpOption, CODE_END, CODE_PAD};
use super::pool::{ListingMode, PoolError, Record};
use super::server::DhcpServer;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("state file declares version {0}, this build reads up to {FORMAT_VERSION}")]
    FutureVersion(u32),

    #[error("invalid hardware address {0:?} in state file")]
    BadHardwareAddress(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Serialize, Deserialize)]
struct SetupInfo {
    server_ip: Ipv4Addr,
    server_port: u16,
    client_port: u16,
    broadcast: bool,
    network: Ipv4Addr,
    mask: Ipv4Addr,
    offer_hold_time: u64,
    ipleasetime: u32,
    renewalt1: u32,
    renewalt2: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedReservation {
    name: String,
    mac: String,
    ip: Ipv4Addr,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedListings {
    macs: Vec<String>,
    mode: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedOption {
    code: u8,
    data: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedState {
    version: u32,
    setup_info: SetupInfo,
    #[serde(default)]
    reservations: Vec<SavedReservation>,
    #[serde(default)]
    listings: SavedListings,
    #[serde(default)]
    server_options: Vec<SavedOption>,
    #[serde(default)]
    options: Vec<SavedOption>,
}

impl DhcpServer {
    /// Serializes setup parameters, reservations, listings and both
    /// option tables to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let config = self.config();
        let tables = self.tables.lock().expect("dhcp tables poisoned");

        let setup_info = SetupInfo {
            server_ip: config.server_ip,
            server_port: config.server_port,
            client_port: config.client_port,
            broadcast: config.broadcast,
            network: config.network,
            mask: config.mask,
            offer_hold_time: config.offer_hold_time,
            ipleasetime: config.ip_lease_time,
            renewalt1: config.renewal_t1,
            renewalt2: config.rebinding_t2,
        };

        let reservations = tables
            .pool
            .reservations()
            .map(|record| SavedReservation {
                name: record.name.clone(),
                mac: record.mac.to_string(),
                ip: record.ip,
            })
            .collect();

        let listings = SavedListings {
            macs: tables.pool.listing().map(|mac| mac.to_string()).collect(),
            mode: match tables.pool.mode() {
                ListingMode::Allow => "allow".to_string(),
                ListingMode::Deny => "deny".to_string(),
            },
        };

        let dump_options = |table: &std::collections::HashMap<u8, DhcpOption, _>| {
            let mut saved: Vec<SavedOption> = table
                .values()
                .map(|option| SavedOption {
                    code: option.code,
                    data: option.value.data(),
                })
                .collect();
            saved.sort_by_key(|option| option.code);
            saved
        };

        let state = SavedState {
            version: FORMAT_VERSION,
            setup_info,
            reservations,
            listings,
            server_options: dump_options(&tables.server_options),
            options: dump_options(&tables.options),
        };
        drop(tables);

        std::fs::write(path, serde_json::to_string_pretty(&state)?)?;
        Ok(())
    }

    /// Builds a server from `config` and replays the saved
    /// reservations, listings and option tables over it. A missing
    /// file just yields the fresh server: first boot looks the same as
    /// a lost file. Runtime parameters come from `config`; the saved
    /// `setup_info` is informational.
    pub fn load(path: impl AsRef<Path>, config: ServerConfig) -> Result<DhcpServer, PersistError> {
        let server = DhcpServer::new(config)?;

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(server),
            Err(error) => return Err(error.into()),
        };

        let state: SavedState = serde_json::from_str(&text)?;
        if state.version > FORMAT_VERSION {
            return Err(PersistError::FutureVersion(state.version));
        }

        for saved in state.reservations {
            let mac = saved
                .mac
                .parse()
                .map_err(|_| PersistError::BadHardwareAddress(saved.mac.clone()))?;
            server.reserve(Record::new(saved.name, mac, saved.ip));
        }

        for text in state.listings.macs {
            let mac = text
                .parse()
                .map_err(|_| PersistError::BadHardwareAddress(text.clone()))?;
            server.add_listing(mac);
        }
        if state.listings.mode == "allow" {
            server.set_listing_mode(ListingMode::Allow);
        }

        for saved in state.server_options {
            if let Some(option) = revive_option(&server, &saved) {
                server.register_server_option(option);
            }
        }
        for saved in state.options {
            if let Some(option) = revive_option(&server, &saved) {
                server.register_option(option);
            }
        }

        Ok(server)
    }
}

fn revive_option(server: &DhcpServer, saved: &SavedOption) -> Option<DhcpOption> {
    if saved.code == CODE_PAD || saved.code == CODE_END {
        return None;
    }
    Some(DhcpOption {
        code: saved.code,
        value: server.registry.decode_value(saved.code, &saved.data),
    })
}
