//! The DHCP server binary.
//!
//! Configuration precedence is CLI flags over the INI file over the
//! built-in defaults. A single `"stop"` datagram on the loopback
//! control port tears the server down cleanly, saving its state.
//!
//! Exit codes: 0 on normal shutdown, 1 when a socket cannot be bound,
//! 2 on configuration errors.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::UdpSocket;

use netherd::dhcp::config::ServerConfig;
use netherd::dhcp::server::DhcpServer;
use netherd::netio::raw::RawSocket;
use netherd::utils::logger;

#[derive(Debug, Parser)]
#[command(name = "netherd", about = "DHCPv4 server over raw Ethernet")]
struct Cli {
    /// Server address on the managed network.
    #[arg(short = 'i', long = "serverip")]
    server_ip: Option<Ipv4Addr>,

    /// Port the server listens on.
    #[arg(short = 's', long = "serverport")]
    server_port: Option<u16>,

    /// Port clients listen on.
    #[arg(short = 'c', long = "clientport")]
    client_port: Option<u16>,

    /// Network to lease addresses from.
    #[arg(short = 'n', long)]
    network: Option<Ipv4Addr>,

    /// Netmask of the managed network.
    #[arg(short = 'm', long)]
    mask: Option<Ipv4Addr>,

    /// Broadcast every response.
    #[arg(short = 'b', long)]
    broadcast: bool,

    /// Routers offered via option 3.
    #[arg(short = 'r', long, num_args = 0..)]
    routers: Option<Vec<Ipv4Addr>>,

    /// DNS servers offered via option 6.
    #[arg(short = 'd', long, num_args = 0..)]
    dns: Option<Vec<Ipv4Addr>>,

    /// INI configuration file.
    #[arg(long, default_value = "netherd.ini")]
    config: PathBuf,

    /// Directory for daily log files.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// More output per occurrence.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(server_ip) = self.server_ip {
            config.server_ip = server_ip;
        }
        if let Some(server_port) = self.server_port {
            config.server_port = server_port;
        }
        if let Some(client_port) = self.client_port {
            config.client_port = client_port;
        }
        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(mask) = self.mask {
            config.mask = mask;
        }
        if self.broadcast {
            config.broadcast = true;
        }
        if let Some(routers) = self.routers {
            config.routers = routers;
        }
        if let Some(dns) = self.dns {
            config.dns_servers = dns;
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(error) = logger::init("netherd", cli.verbose, cli.log_dir.as_deref()) {
        eprintln!("cannot initialize logging: {error}");
        return ExitCode::from(2);
    }

    let config = match ServerConfig::from_ini(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            log::error!("configuration error: {error}");
            return ExitCode::from(2);
        }
    };
    let config = cli.apply(config);
    let savefile = config.savefile.clone();
    let control_port = config.control_port;
    let interface = config.interface.clone();
    let test_mode = config.test_mode;

    let server = match DhcpServer::load(&savefile, config) {
        Ok(server) => Arc::new(server),
        Err(error) => {
            log::error!("cannot build server: {error}");
            return ExitCode::from(2);
        }
    };

    let mut runner = None;
    let mut raw_handle = None;
    if test_mode {
        log::warn!("test mode: raw socket not opened, frames must be fed by the caller");
    } else {
        let (input, output, raw) = match RawSocket::open(&interface) {
            Ok(opened) => opened,
            Err(error) => {
                log::error!("cannot open raw socket on {interface}: {error}");
                return ExitCode::from(1);
            }
        };
        let server_mac = raw.mac;
        raw_handle = Some(raw);
        runner = Some(tokio::spawn(server.clone().run(
            input,
            Arc::new(output),
            server_mac,
        )));
    }

    let control = match UdpSocket::bind(("127.0.0.1", control_port)).await {
        Ok(socket) => socket,
        Err(error) => {
            log::error!("cannot bind control port {control_port}: {error}");
            return ExitCode::from(1);
        }
    };

    log::info!(
        "serving {} on {} (control port {})",
        server.config().network,
        interface,
        control_port
    );

    // Block until someone sends "stop" from the local machine.
    let mut buf = [0u8; 16];
    loop {
        match control.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                if &buf[..len] == b"stop" && peer.ip().is_loopback() {
                    log::info!("stop received from {peer}");
                    break;
                }
            }
            Err(error) => {
                log::error!("control socket failed: {error}");
                break;
            }
        }
    }

    if let Err(error) = server.save(&savefile) {
        log::error!("saving state failed: {error}");
    }
    server.shutdown();
    if let Some(raw) = raw_handle.take() {
        raw.stop();
    }
    if let Some(runner) = runner.take() {
        let _ = runner.await;
    }

    log::info!("server stopped");
    ExitCode::SUCCESS
}
