//! Server configuration: hard-coded defaults, overridden by the INI
//! configuration file, overridden in turn by command-line flags.

use std::net::Ipv4Addr;
use std::path::Path;

use itertools::Itertools;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid IPv4 literal {value:?} for {key}")]
    InvalidAddress { key: &'static str, value: String },

    #[error("invalid integer {value:?} for {key}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("configuration file: {0}")]
    File(#[from] config::ConfigError),
}

/// Everything the DHCP server needs to start.
///
/// Durations are in seconds, matching the wire options they feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
    pub client_port: u16,
    pub network: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub broadcast: bool,
    /// Seconds an OFFER is held before the address returns to the pool.
    pub offer_hold_time: u64,
    pub ip_lease_time: u32,
    pub renewal_t1: u32,
    pub rebinding_t2: u32,
    /// Seconds a DECLINEd address stays quarantined.
    pub decline_quarantine: u64,
    pub routers: Vec<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub interface: String,
    pub savefile: String,
    /// Datagram port on loopback listening for the `"stop"` command.
    pub control_port: u16,
    /// Skip the raw socket; frames are fed in and collected by the
    /// caller. The only way to run on non-Linux hosts.
    pub test_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::new(192, 168, 0, 1),
            server_port: 67,
            client_port: 68,
            network: Ipv4Addr::new(192, 168, 0, 0),
            mask: Ipv4Addr::new(255, 255, 255, 0),
            broadcast: false,
            offer_hold_time: 60,
            ip_lease_time: 691_200,  // 8 days
            renewal_t1: 345_600,     // 4 days
            rebinding_t2: 604_800,   // 7 days
            decline_quarantine: 300,
            routers: Vec::new(),
            dns_servers: Vec::new(),
            interface: "eth0".to_string(),
            savefile: "dhcp-state.json".to_string(),
            control_port: 69,
            test_mode: false,
        }
    }
}

impl ServerConfig {
    /// Reads the `[DEFAULT]` section of an INI file over the defaults.
    /// A missing file yields the defaults untouched.
    pub fn from_ini(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = config::Config::builder()
            .add_source(
                config::File::new(
                    path.as_ref().to_str().unwrap_or_default(),
                    config::FileFormat::Ini,
                )
                .required(false),
            )
            .build()?;

        let mut out = Self::default();

        if let Some(value) = lookup(&source, "server_ip") {
            out.server_ip = parse_addr("server_ip", &value)?;
        }
        if let Some(value) = lookup(&source, "server_port") {
            out.server_port = parse_number("server_port", &value)?;
        }
        if let Some(value) = lookup(&source, "client_port") {
            out.client_port = parse_number("client_port", &value)?;
        }
        if let Some(value) = lookup(&source, "network") {
            out.network = parse_addr("network", &value)?;
        }
        if let Some(value) = lookup(&source, "mask") {
            out.mask = parse_addr("mask", &value)?;
        }
        if let Some(value) = lookup(&source, "broadcast") {
            out.broadcast = matches!(value.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(value) = lookup(&source, "offer_hold_time") {
            out.offer_hold_time = parse_number("offer_hold_time", &value)?;
        }
        if let Some(value) = lookup(&source, "ipleasetime") {
            out.ip_lease_time = parse_number("ipleasetime", &value)?;
        }
        if let Some(value) = lookup(&source, "renewalt1") {
            out.renewal_t1 = parse_number("renewalt1", &value)?;
        }
        if let Some(value) = lookup(&source, "renewalt2") {
            out.rebinding_t2 = parse_number("renewalt2", &value)?;
        }
        if let Some(value) = lookup(&source, "decline_quarantine") {
            out.decline_quarantine = parse_number("decline_quarantine", &value)?;
        }
        if let Some(value) = lookup(&source, "routers") {
            out.routers = parse_addr_list("routers", &value)?;
        }
        if let Some(value) = lookup(&source, "dnsservers") {
            out.dns_servers = parse_addr_list("dnsservers", &value)?;
        }
        if let Some(value) = lookup(&source, "interface") {
            out.interface = value;
        }
        if let Some(value) = lookup(&source, "savefile") {
            out.savefile = value;
        }
        if let Some(value) = lookup(&source, "control_port") {
            out.control_port = parse_number("control_port", &value)?;
        }

        Ok(out)
    }
}

/// INI keys live under `[DEFAULT]`, but bare top-level keys are
/// accepted too. The config backend lowercases section names, so both
/// spellings are probed.
fn lookup(source: &config::Config, key: &str) -> Option<String> {
    source
        .get_string(&format!("DEFAULT.{key}"))
        .or_else(|_| source.get_string(&format!("default.{key}")))
        .or_else(|_| source.get_string(key))
        .ok()
}

fn parse_addr(key: &'static str, value: &str) -> Result<Ipv4Addr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddress {
            key,
            value: value.to_string(),
        })
}

/// Space-separated address lists, as the original configuration keys
/// `routers` and `dnsservers` are written.
fn parse_addr_list(key: &'static str, value: &str) -> Result<Vec<Ipv4Addr>, ConfigError> {
    value
        .split_whitespace()
        .map(|item| parse_addr(key, item))
        .try_collect()
}

fn parse_number<N>(key: &'static str, value: &str) -> Result<N, ConfigError>
where
    N: std::str::FromStr,
{
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = ServerConfig::from_ini("/nonexistent/netherd.ini").unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn ini_overrides_defaults() {
        let mut file = tempfile();
        writeln!(
            file.1,
            "[DEFAULT]\n\
             server_ip = 192.168.10.1\n\
             network = 192.168.10.0\n\
             mask = 255.255.255.0\n\
             broadcast = true\n\
             offer_hold_time = 30\n\
             routers = 192.168.10.1 192.168.10.2\n\
             interface = br0\n"
        )
        .unwrap();

        let config = ServerConfig::from_ini(&file.0).unwrap();
        assert_eq!(config.server_ip, Ipv4Addr::new(192, 168, 10, 1));
        assert_eq!(config.network, Ipv4Addr::new(192, 168, 10, 0));
        assert!(config.broadcast);
        assert_eq!(config.offer_hold_time, 30);
        assert_eq!(
            config.routers,
            vec![
                Ipv4Addr::new(192, 168, 10, 1),
                Ipv4Addr::new(192, 168, 10, 2)
            ]
        );
        assert_eq!(config.interface, "br0");
        // Untouched keys keep their defaults.
        assert_eq!(config.client_port, 68);

        std::fs::remove_file(&file.0).ok();
    }

    #[test]
    fn bad_address_is_a_config_error() {
        let mut file = tempfile();
        writeln!(file.1, "[DEFAULT]\nserver_ip = not-an-ip\n").unwrap();

        assert!(matches!(
            ServerConfig::from_ini(&file.0),
            Err(ConfigError::InvalidAddress { key: "server_ip", .. })
        ));

        std::fs::remove_file(&file.0).ok();
    }

    fn tempfile() -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!(
            "netherd-config-test-{}-{}.ini",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
