//! The resolver core and its transports.
//!
//! One protocol object answers every question in the same order
//! (blocked, authoritative, cached, then upstream) and is wrapped by a
//! UDP datagram loop, a length-prefixed TCP loop, and the same TCP
//! framing behind a TLS handshake. Cache writes happen after the
//! response is on the wire so the hot path never waits on them.

use std::io;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as TlsConfig;
use tokio_rustls::TlsAcceptor;
use uuid::Uuid;

use super::message::{Message, Question, ResourceRecord};
use super::storage::Storage;
use super::DnsError;

/// Maximum datagram we accept or emit over UDP.
pub const MAX_DATAGRAM: usize = 65_535;

/// Answers collected for the cache, written back after the send.
type CacheEntries = Vec<(Question, Vec<ResourceRecord>)>;

pub struct DnsServer {
    storage: Arc<Mutex<Storage>>,
    upstreams: Vec<Ipv4Addr>,
    upstream_port: u16,
    /// Per-upstream wait before trying the next one.
    timeout: Duration,
    shutdown: watch::Sender<bool>,
}

impl DnsServer {
    pub fn new(storage: Storage, upstreams: Vec<Ipv4Addr>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            storage: Arc::new(Mutex::new(storage)),
            upstreams,
            upstream_port: 53,
            timeout: Duration::from_secs(4),
            shutdown,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_upstream_port(mut self, port: u16) -> Self {
        self.upstream_port = port;
        self
    }

    pub fn storage(&self) -> &Arc<Mutex<Storage>> {
        &self.storage
    }

    /// Stops every transport loop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// The protocol core: answers each question from storage or
    /// upstream, flips `QR`, and returns the response bytes together
    /// with the entries to cache once the response has been sent.
    pub async fn handle_message(&self, data: &[u8]) -> Result<(Vec<u8>, CacheEntries), DnsError> {
        let mut message = Message::decode(data)?;
        message.flags.qr = true;

        let correlation = Uuid::new_v4();
        let mut to_cache = CacheEntries::new();

        let questions = message.questions.clone();
        for question in &questions {
            log::debug!("[{correlation}] query {} {}", question.qtype, question.name);

            let stored = self
                .storage
                .lock()
                .expect("dns storage poisoned")
                .get(question);

            if let Some(records) = stored {
                log::debug!("[{correlation}] {} records from storage", records.len());
                message.answers.extend(records);
                continue;
            }

            match self
                .lookup(message.id, message.flags.opcode, message.flags.rd, question)
                .await
            {
                Ok(records) => {
                    log::debug!("[{correlation}] {} records from upstream", records.len());
                    to_cache.push((question.clone(), records.clone()));
                    message.answers.extend(records);
                }
                Err(NoAnswer) => {
                    // This question stays unanswered; the rest of the
                    // message is still served.
                    log::debug!("[{correlation}] no record found for {}", question.name);
                }
            }
        }

        Ok((message.encode(), to_cache))
    }

    /// Writes deferred cache entries; call once the response is away.
    pub fn commit_cache(&self, entries: CacheEntries) {
        if entries.is_empty() {
            return;
        }
        let mut storage = self.storage.lock().expect("dns storage poisoned");
        for (question, records) in entries {
            storage.add_cache(&question, records);
        }
    }

    /// Upstream recursion: each configured server is tried in order
    /// over UDP with the inbound id, opcode and RD preserved. The
    /// first reply with a matching id and a non-empty answer section
    /// wins.
    async fn lookup(
        &self,
        id: u16,
        opcode: u8,
        rd: bool,
        question: &Question,
    ) -> Result<Vec<ResourceRecord>, NoAnswer> {
        let mut query = Message::query(id, question.clone());
        query.flags.opcode = opcode;
        query.flags.rd = rd;
        let wire = query.encode();

        for upstream in &self.upstreams {
            let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
                Ok(socket) => socket,
                Err(error) => {
                    log::warn!("cannot open upstream socket: {error}");
                    return Err(NoAnswer);
                }
            };

            if let Err(error) = socket.send_to(&wire, (*upstream, self.upstream_port)).await {
                log::warn!("upstream {upstream} unreachable: {error}");
                continue;
            }

            let mut buf = vec![0u8; MAX_DATAGRAM];
            let reply = tokio::time::timeout(self.timeout, socket.recv(&mut buf)).await;

            let len = match reply {
                Ok(Ok(len)) => len,
                Ok(Err(error)) => {
                    log::warn!("upstream {upstream} receive failed: {error}");
                    continue;
                }
                Err(_) => {
                    log::debug!("upstream {upstream} timed out");
                    continue;
                }
            };

            match Message::decode(&buf[..len]) {
                Ok(response) if response.id == id && !response.answers.is_empty() => {
                    return Ok(response.answers);
                }
                Ok(_) => continue,
                Err(error) => {
                    log::debug!("upstream {upstream} sent garbage: {error}");
                    continue;
                }
            }
        }

        Err(NoAnswer)
    }

    /// One datagram, one message, one worker task.
    pub async fn serve_udp(self: Arc<Self>, socket: UdpSocket) -> io::Result<()> {
        let socket = Arc::new(socket);
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, peer) = tokio::select! {
                _ = shutdown.changed() => break,
                received = socket.recv_from(&mut buf) => received?,
            };

            let data = buf[..len].to_vec();
            let server = self.clone();
            let socket = socket.clone();
            tokio::spawn(async move {
                match server.handle_message(&data).await {
                    Ok((response, to_cache)) => {
                        if let Err(error) = socket.send_to(&response, peer).await {
                            log::warn!("udp response to {peer} failed: {error}");
                            return;
                        }
                        server.commit_cache(to_cache);
                    }
                    Err(error) => log::debug!("dropping datagram from {peer}: {error}"),
                }
            });
        }

        Ok(())
    }

    /// Length-prefixed framing: a 2-byte big-endian size, then the
    /// message. One connection serves one request.
    pub async fn serve_tcp(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => accepted?,
            };

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(error) = server.serve_stream(stream).await {
                    log::debug!("tcp session with {peer} ended: {error}");
                }
            });
        }

        Ok(())
    }

    /// TLS handshake first, then the same length-prefixed framing.
    pub async fn serve_tls(
        self: Arc<Self>,
        listener: TcpListener,
        acceptor: TlsAcceptor,
    ) -> io::Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => accepted?,
            };

            let server = self.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(stream) => {
                        if let Err(error) = server.serve_stream(stream).await {
                            log::debug!("tls session with {peer} ended: {error}");
                        }
                    }
                    Err(error) => log::debug!("tls handshake with {peer} failed: {error}"),
                }
            });
        }

        Ok(())
    }

    async fn serve_stream<S>(&self, mut stream: S) -> io::Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let mut size = [0u8; 2];
        stream.read_exact(&mut size).await?;
        let size = u16::from_be_bytes(size) as usize;

        let mut data = vec![0u8; size];
        stream.read_exact(&mut data).await?;

        let (response, to_cache) = self
            .handle_message(&data)
            .await
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.to_string()))?;

        stream
            .write_all(&(response.len() as u16).to_be_bytes())
            .await?;
        stream.write_all(&response).await?;
        stream.flush().await?;

        self.commit_cache(to_cache);
        Ok(())
    }
}

/// Every upstream failed or none answered; the question stays empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoAnswer;

/// Loads a PEM certificate chain and key into a TLS acceptor for the
/// DNS-over-TLS listener (port 853).
pub fn tls_acceptor(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> io::Result<TlsAcceptor> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_file_iter(cert_path)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.to_string()))?;

    let key = PrivateKeyDer::from_pem_file(key_path)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.to_string()))?;

    let config = TlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// A one-shot recursive query against `upstreams`, for callers outside
/// the server (the reverse-lookup helper builds on it).
pub async fn lookup_host(
    upstreams: &[Ipv4Addr],
    question: Question,
    timeout: Duration,
) -> Option<Message> {
    let id: u16 = rand::random();
    let query = Message::query(id, question);
    let wire = query.encode();

    for upstream in upstreams {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await.ok()?;
        if socket.send_to(&wire, (*upstream, 53)).await.is_err() {
            continue;
        }

        let mut buf = vec![0u8; MAX_DATAGRAM];
        match tokio::time::timeout(timeout, socket.recv(&mut buf)).await {
            Ok(Ok(len)) => {
                if let Ok(message) = Message::decode(&buf[..len]) {
                    if message.id == id {
                        return Some(message);
                    }
                }
            }
            _ => continue,
        }
    }

    None
}

/// Reverse lookup: `a.b.c.d` becomes the PTR question for
/// `d.c.b.a.in-addr.arpa`.
pub async fn lookup_addr(
    upstreams: &[Ipv4Addr],
    addr: Ipv4Addr,
    timeout: Duration,
) -> Option<Message> {
    let octets = addr.octets();
    let name = format!(
        "{}.{}.{}.{}.in-addr.arpa",
        octets[3], octets[2], octets[1], octets[0]
    );
    lookup_host(
        upstreams,
        Question::new(name, super::message::RecordType::PTR),
        timeout,
    )
    .await
}
