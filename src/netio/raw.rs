//! The raw Ethernet bridge: an `AF_PACKET` channel bound to a named
//! interface, pumped onto tokio channels by a reader thread.
//!
//! Only Linux exposes `AF_PACKET`; on other targets [`RawSocket::open`]
//! refuses, and servers must run in test mode with channel-backed
//! transports instead.

use std::io;

use async_trait::async_trait;
use mac_address::MacAddress;

use crate::codec::ethernet::EthernetFrame;

use super::{Input, Output};

/// Inbound side: decoded Ethernet frames from the wire.
pub struct RawInput {
    frames: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Outbound side: frames queued for the writer thread.
pub struct RawOutput {
    frames: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
}

/// Control handle for an open raw socket: the interface's hardware
/// address plus the stop switch for the bridge threads.
pub struct RawHandle {
    pub mac: MacAddress,
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl RawHandle {
    /// Stops the bridge threads; the bound socket closes with them.
    pub fn stop(&self) {
        self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

impl Drop for RawHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The raw socket entry point.
pub struct RawSocket;

impl RawSocket {
    /// Binds to `interface` and starts the bridge threads. Fails when
    /// the interface does not exist, the process lacks the capability,
    /// or the platform has no raw packet sockets.
    #[cfg(target_os = "linux")]
    pub fn open(interface: &str) -> Result<(RawInput, RawOutput, RawHandle), io::Error> {
        use pnet::datalink::{self, Channel};
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::time::Duration;

        let iface = datalink::interfaces()
            .into_iter()
            .find(|candidate| candidate.name == interface)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such interface: {interface}"),
                )
            })?;

        let mac = iface
            .mac
            .map(|mac| MacAddress::new(mac.octets()))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("interface {interface} has no hardware address"),
                )
            })?;

        let config = datalink::Config {
            read_timeout: Some(Duration::from_millis(250)),
            ..Default::default()
        };

        let (mut tx, mut rx) = match datalink::channel(&iface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "interface does not speak Ethernet",
                ))
            }
            Err(error) => return Err(error),
        };

        let stop = Arc::new(AtomicBool::new(false));

        let (in_tx, in_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
        let reader_stop = stop.clone();
        std::thread::Builder::new()
            .name(format!("raw-rx-{interface}"))
            .spawn(move || loop {
                if reader_stop.load(Ordering::Relaxed) {
                    break;
                }
                match rx.next() {
                    Ok(frame) => {
                        if in_tx.send(frame.to_vec()).is_err() {
                            break;
                        }
                    }
                    // Timeouts just re-check the stop flag.
                    Err(error)
                        if matches!(
                            error.kind(),
                            io::ErrorKind::TimedOut
                                | io::ErrorKind::WouldBlock
                                | io::ErrorKind::Interrupted
                        ) => {}
                    Err(error) => {
                        log::warn!("raw receive failed: {error}");
                        break;
                    }
                }
            })?;

        let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
        std::thread::Builder::new()
            .name(format!("raw-tx-{interface}"))
            .spawn(move || {
                while let Some(frame) = out_rx.blocking_recv() {
                    match tx.send_to(&frame, None) {
                        Some(Ok(())) => {}
                        Some(Err(error)) => log::warn!("raw send failed: {error}"),
                        None => log::warn!("raw send produced no result"),
                    }
                }
            })?;

        Ok((
            RawInput { frames: in_rx },
            RawOutput { frames: out_tx },
            RawHandle { mac, stop },
        ))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(_interface: &str) -> Result<(RawInput, RawOutput, RawHandle), io::Error> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "raw packet sockets require Linux; enable test_mode elsewhere",
        ))
    }
}

#[async_trait]
impl Input<EthernetFrame> for RawInput {
    async fn get(&mut self) -> Result<EthernetFrame, io::Error> {
        loop {
            let bytes = self.frames.recv().await.ok_or_else(|| {
                io::Error::new(io::ErrorKind::BrokenPipe, "raw socket reader stopped")
            })?;

            match EthernetFrame::disassemble(&bytes) {
                Ok(frame) => return Ok(frame),
                // Not every frame on the wire is well-formed; skip and
                // keep reading.
                Err(error) => log::trace!("undecodable frame ({error})"),
            }
        }
    }
}

#[async_trait]
impl Output<EthernetFrame> for RawOutput {
    async fn send(&self, frame: EthernetFrame) -> Result<(), io::Error> {
        self.frames.send(frame.build()).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "raw socket writer stopped")
        })
    }
}
