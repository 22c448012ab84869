//! MITM relay with a live-reconfigurable client-facing socket.
//!
//! One accept thread owns the listening socket for the relay's lifetime.
//! `reload` hands it a new [`RelayConfig`] over a channel; the thread drops
//! the old listener, binds the new one and acknowledges before `reload`
//! returns. Every accepted connection gets its own thread, which captures
//! the ClientHello with `peek`, optionally terminates TLS with the selected
//! certificate and protocol, then pumps bytes both ways.
//!
//! In plain mode the relay never terminates TLS: the client's handshake and
//! records pass through to the upstream server as raw TCP.
//!
//! `start` and `reload` return the generation of the new binding. Every
//! [`HandshakeEvent`] carries the generation it was observed on, so a caller
//! can discard events from a connection accepted on an earlier binding.

use crate::client_hello::{self, MAX_RECORD_LEN, RECORD_HEADER_LEN};
use crate::error::RelayError;
use crate::forwarding::{self, Leg, PUMP_POLL};
use crate::policy::{ClientCertificate, PolicyContext, ProtocolVersion};
use crate::relay_stats::{RelayStats, RelayStatsSnapshot};
use crate::report::ReportStore;
use crate::scanner::ComplianceScanner;
use crate::tls_wrapper::{self, UpstreamTls};
use openssl::ssl::SslAcceptor;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// How long the accept thread waits for a command between accept polls.
const ACCEPT_POLL: Duration = Duration::from_millis(25);
/// Upper bound on `reload` waiting for the accept thread to rebind.
pub const RELOAD_ACK_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a new connection may take to deliver its first TLS record.
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);
const CAPTURE_RETRY: Duration = Duration::from_millis(10);
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LISTEN_BACKLOG: i32 = 128;

/// Fixed addressing of the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub bind_address: IpAddr,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl RelaySettings {
    pub fn new(local_port: u16, remote_host: impl Into<String>) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_port,
            remote_host: remote_host.into(),
            remote_port: 443,
        }
    }

    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote_port = port;
        self
    }

    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.local_port)
    }
}

/// What the client-facing socket offers. Applied by `start` or `reload`
/// only; a bound socket never changes under a live connection.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Terminate TLS on the client-facing leg. When false the relay passes
    /// the client's handshake straight through to the upstream server.
    pub secure: bool,
    pub protocol: ProtocolVersion,
    pub certificate: Arc<ClientCertificate>,
}

impl RelayConfig {
    pub fn plain(certificate: Arc<ClientCertificate>) -> Self {
        Self {
            secure: false,
            protocol: ProtocolVersion::TlsV12,
            certificate,
        }
    }

    pub fn secure(protocol: ProtocolVersion, certificate: Arc<ClientCertificate>) -> Self {
        Self {
            secure: true,
            protocol,
            certificate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeKind {
    /// A ClientHello passed through in plain mode.
    ClientHello,
    /// The client-facing TLS handshake completed.
    Completed,
}

/// Published once per observed handshake on the current binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeEvent {
    pub generation: u64,
    pub kind: HandshakeKind,
    pub peer: SocketAddr,
}

/// The orchestrator's view of a relay.
pub trait RelayControl: Send + Sync {
    /// Binds the first socket; returns its generation.
    fn start(&self, config: RelayConfig) -> Result<u64, RelayError>;

    /// Rebinds with `config`; returns the new generation once the socket is
    /// listening.
    fn reload(&self, config: RelayConfig) -> Result<u64, RelayError>;

    /// Best-effort shutdown; never blocks on connection threads.
    fn stop(&self);

    /// Replaces the single handshake subscriber.
    fn subscribe(&self) -> UnboundedReceiver<HandshakeEvent>;
}

/// Fails with [`RelayError::PortInUse`] if `port` can't be bound right now.
pub fn check_port(bind_address: IpAddr, port: u16) -> Result<(), RelayError> {
    let addr = SocketAddr::new(bind_address, port);
    match TcpListener::bind(addr) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Err(RelayError::PortInUse(port)),
        Err(source) => Err(RelayError::Bind { addr, source }),
    }
}

enum Command {
    Rebind(RelayConfig, mpsc::SyncSender<Result<u64, RelayError>>),
    Stop,
}

struct Binding {
    listener: Option<TcpListener>,
    generation: u64,
    secure: bool,
    /// Client-facing TLS setup; `Err` refuses every connection on this binding.
    tls: Option<Result<SslAcceptor, String>>,
}

struct Running {
    commands: mpsc::Sender<Command>,
    accept_thread: Option<JoinHandle<()>>,
}

struct RelayShared {
    settings: RelaySettings,
    policy: Arc<PolicyContext>,
    report: Arc<ReportStore>,
    upstream: UpstreamTls,
    stats: Arc<RelayStats>,
    generation: AtomicU64,
    observer: Mutex<Option<UnboundedSender<HandshakeEvent>>>,
    connections: Mutex<HashMap<u64, Vec<TcpStream>>>,
    next_connection_id: AtomicU64,
}

/// The relay. Cheap to share behind an `Arc`.
pub struct ProxyRelay {
    shared: Arc<RelayShared>,
    running: Mutex<Option<Running>>,
}

impl ProxyRelay {
    /// Relay whose upstream leg trusts the platform store.
    pub fn new(
        settings: RelaySettings,
        policy: Arc<PolicyContext>,
        report: Arc<ReportStore>,
    ) -> Result<Self, RelayError> {
        Ok(Self::with_upstream(settings, policy, report, UpstreamTls::new()?))
    }

    pub fn with_upstream(
        settings: RelaySettings,
        policy: Arc<PolicyContext>,
        report: Arc<ReportStore>,
        upstream: UpstreamTls,
    ) -> Self {
        Self {
            shared: Arc::new(RelayShared {
                settings,
                policy,
                report,
                upstream,
                stats: RelayStats::new(),
                generation: AtomicU64::new(0),
                observer: Mutex::new(None),
                connections: Mutex::new(HashMap::new()),
                next_connection_id: AtomicU64::new(1),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Generation of the current binding; bumps on every start and reload.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }
}

impl RelayControl for ProxyRelay {
    fn start(&self, config: RelayConfig) -> Result<u64, RelayError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Err(RelayError::AlreadyRunning);
        }

        let mut binding = Binding {
            listener: None,
            generation: 0,
            secure: false,
            tls: None,
        };
        let outcome = self.shared.rebind(&mut binding, &config);
        if binding.listener.is_none() {
            return outcome;
        }

        let (commands, receiver) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let accept_thread = thread::Builder::new()
            .name("relay-accept".into())
            .spawn(move || shared.accept_loop(binding, receiver))?;

        *running = Some(Running {
            commands,
            accept_thread: Some(accept_thread),
        });
        info!(addr = %self.shared.settings.local_addr(), "relay listening");
        outcome
    }

    fn reload(&self, config: RelayConfig) -> Result<u64, RelayError> {
        let (ack, ack_rx) = mpsc::sync_channel(1);
        {
            let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            let running = running.as_ref().ok_or(RelayError::NotRunning)?;
            running
                .commands
                .send(Command::Rebind(config, ack))
                .map_err(|_| RelayError::NotRunning)?;
        }
        match ack_rx.recv_timeout(RELOAD_ACK_TIMEOUT) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(RelayError::ReloadTimeout(RELOAD_ACK_TIMEOUT)),
            Err(RecvTimeoutError::Disconnected) => Err(RelayError::NotRunning),
        }
    }

    fn stop(&self) {
        let Some(mut running) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        // invalidates in-flight connections' events
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        let _ = running.commands.send(Command::Stop);
        if let Some(handle) = running.accept_thread.take() {
            if handle.join().is_err() {
                warn!("relay accept thread panicked");
            }
        }

        let connections: Vec<TcpStream> = self
            .shared
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .flat_map(|(_, sockets)| sockets)
            .collect();
        for socket in &connections {
            forwarding::shutdown_quietly(socket);
        }

        self.shared
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!(stats = %self.shared.stats.snapshot(), "relay stopped");
    }

    fn subscribe(&self) -> UnboundedReceiver<HandshakeEvent> {
        let (tx, rx) = unbounded_channel();
        *self.shared.observer.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }
}

impl Drop for ProxyRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

impl RelayShared {
    /// Replaces `binding` with a fresh socket for `config`.
    ///
    /// A bind failure leaves no listener. A TLS setup failure keeps the
    /// listener but refuses connections on it.
    fn rebind(&self, binding: &mut Binding, config: &RelayConfig) -> Result<u64, RelayError> {
        binding.listener.take();
        binding.generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        binding.secure = config.secure;
        binding.tls = None;

        let addr = self.settings.local_addr();
        let listener = bind_listener(addr).map_err(|source| {
            if source.kind() == io::ErrorKind::AddrInUse {
                RelayError::PortInUse(addr.port())
            } else {
                RelayError::Bind { addr, source }
            }
        })?;
        binding.listener = Some(listener);

        debug!(
            generation = binding.generation,
            secure = config.secure,
            protocol = %config.protocol,
            certificate = %config.certificate.name,
            "relay socket bound"
        );

        if !config.secure {
            return Ok(binding.generation);
        }
        match tls_wrapper::acceptor(&config.certificate.material, config.protocol) {
            Ok(tls) => {
                binding.tls = Some(Ok(tls));
                Ok(binding.generation)
            }
            Err(e) => {
                warn!(error = %e, protocol = %config.protocol, certificate = %config.certificate.name,
                    "client-facing TLS unavailable, refusing connections on this binding");
                binding.tls = Some(Err(e.to_string()));
                Err(e)
            }
        }
    }

    fn accept_loop(self: Arc<Self>, mut binding: Binding, commands: mpsc::Receiver<Command>) {
        loop {
            let accepted = match binding.listener.as_ref() {
                Some(listener) => listener.accept(),
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            };

            match accepted {
                Ok((stream, peer)) => {
                    self.dispatch(stream, peer, &binding);
                    match commands.try_recv() {
                        Ok(command) => {
                            if !self.handle_command(command, &mut binding) {
                                break;
                            }
                        }
                        Err(TryRecvError::Empty) => {}
                        Err(TryRecvError::Disconnected) => break,
                    }
                }
                Err(e) => {
                    if !matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
                        debug!(error = %e, "accept failed");
                    }
                    match commands.recv_timeout(ACCEPT_POLL) {
                        Ok(command) => {
                            if !self.handle_command(command, &mut binding) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            }
        }
        debug!("relay accept loop finished");
    }

    /// Returns false when the loop should exit.
    fn handle_command(&self, command: Command, binding: &mut Binding) -> bool {
        match command {
            Command::Stop => false,
            Command::Rebind(config, ack) => {
                let result = self.rebind(binding, &config);
                if ack.send(result).is_err() {
                    debug!("reload caller went away before acknowledgement");
                }
                true
            }
        }
    }

    fn dispatch(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr, binding: &Binding) {
        let tls = match &binding.tls {
            Some(Err(reason)) => Some(Err(reason.clone())),
            Some(Ok(acceptor)) => Some(Ok(acceptor.clone())),
            None => None,
        };
        let connection = Connection {
            id: self.next_connection_id.fetch_add(1, Ordering::Relaxed),
            generation: binding.generation,
            secure: binding.secure,
            tls,
            peer,
        };

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("relay-conn-{}", connection.id))
            .spawn(move || {
                let id = connection.id;
                if let Err(e) = shared.serve(connection, stream) {
                    debug!(connection = id, %peer, error = %e, "connection closed with error");
                }
            });
        if let Err(e) = spawned {
            warn!(%peer, error = %e, "can't spawn connection thread");
        }
    }

    fn register(&self, id: u64, stream: &TcpStream) {
        match stream.try_clone() {
            Ok(clone) => self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(id)
                .or_default()
                .push(clone),
            Err(e) => debug!(connection = id, error = %e, "can't track socket for shutdown"),
        }
    }

    fn unregister(&self, id: u64) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn notify(&self, generation: u64, kind: HandshakeKind, peer: SocketAddr) {
        if generation != self.generation.load(Ordering::Acquire) {
            debug!(generation, ?kind, "dropping handshake event from a previous binding");
            return;
        }
        let mut observer = self.observer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = observer.as_ref() {
            if tx
                .send(HandshakeEvent {
                    generation,
                    kind,
                    peer,
                })
                .is_err()
            {
                observer.take();
            }
        }
    }

    /// Parses, scans and files a captured ClientHello. Returns whether the
    /// bytes were a well-formed ClientHello.
    fn analyse(&self, bytes: &[u8], peer: SocketAddr) -> bool {
        if !client_hello::is_client_hello(bytes) {
            return false;
        }
        match client_hello::parse(bytes, &self.policy.cipher_suites) {
            Ok(hello) => {
                let messages = ComplianceScanner::new(&self.policy).scan(&hello);
                let findings = messages.len();
                let id = self.report.add_client_hello(messages);
                self.stats.client_hello_captured();
                debug!(
                    client_hello = id,
                    %peer,
                    version = %hello.handshake_version,
                    suites = hello.cipher_suites.len(),
                    findings,
                    "captured ClientHello"
                );
                true
            }
            Err(e) => {
                warn!(%peer, error = %e, "skipping malformed ClientHello");
                false
            }
        }
    }

    fn connect_upstream(&self) -> Result<TcpStream, RelayError> {
        let target = format!("{}:{}", self.settings.remote_host, self.settings.remote_port);
        let upstream_error = |message: String| RelayError::Upstream {
            addr: target.clone(),
            message,
        };
        let addrs = (self.settings.remote_host.as_str(), self.settings.remote_port)
            .to_socket_addrs()
            .map_err(|e| upstream_error(e.to_string()))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, UPSTREAM_CONNECT_TIMEOUT) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(upstream_error(
            last_error.map_or_else(|| "no address resolved".to_string(), |e| e.to_string()),
        ))
    }

    fn serve(&self, connection: Connection, client: TcpStream) -> Result<(), RelayError> {
        let Connection {
            id,
            generation,
            secure,
            tls,
            peer,
        } = connection;

        self.stats.connection_opened();
        self.register(id, &client);
        let bytes = Arc::new((AtomicU64::new(0), AtomicU64::new(0)));
        let _teardown = scopeguard::guard(Arc::clone(&bytes), |bytes| {
            self.unregister(id);
            self.stats.connection_closed(
                bytes.0.load(Ordering::Relaxed),
                bytes.1.load(Ordering::Relaxed),
            );
        });

        client.set_nonblocking(false)?;
        client.set_read_timeout(Some(CAPTURE_TIMEOUT))?;
        let captured = peek_first_record(&client);
        let parsed = captured
            .as_deref()
            .map(|bytes| self.analyse(bytes, peer))
            .unwrap_or(false);

        let client_leg = match tls {
            None => {
                if parsed {
                    self.notify(generation, HandshakeKind::ClientHello, peer);
                }
                Leg::Plain(client)
            }
            Some(Err(reason)) => {
                self.stats.connection_refused();
                forwarding::shutdown_quietly(&client);
                return Err(RelayError::TlsSetup(reason));
            }
            Some(Ok(acceptor)) => {
                let tls = tls_wrapper::accept(&acceptor, client)?;
                self.stats.handshake_completed();
                debug!(connection = id, %peer, version = tls.ssl().version_str(), "client-facing handshake completed");
                self.notify(generation, HandshakeKind::Completed, peer);
                Leg::ClientFacing(Box::new(tls))
            }
        };

        let upstream = self.connect_upstream()?;
        self.register(id, &upstream);
        let upstream_leg = if secure {
            Leg::Upstream(Box::new(
                self.upstream.connect(upstream, &self.settings.remote_host)?,
            ))
        } else {
            Leg::Plain(upstream)
        };

        client_leg.tcp().set_read_timeout(Some(PUMP_POLL))?;
        upstream_leg.tcp().set_read_timeout(Some(PUMP_POLL))?;
        let client_socket = client_leg.tcp().try_clone()?;
        let upstream_socket = upstream_leg.tcp().try_clone()?;

        let client_leg = client_leg.into_shared();
        let upstream_leg = upstream_leg.into_shared();
        let closed = Arc::new(AtomicBool::new(false));

        let to_upstream = {
            let (client_leg, upstream_leg) = (Arc::clone(&client_leg), Arc::clone(&upstream_leg));
            let (closed, bytes) = (Arc::clone(&closed), Arc::clone(&bytes));
            thread::Builder::new()
                .name(format!("relay-conn-{id}-up"))
                .spawn(move || {
                    let moved = forwarding::pump(&client_leg, &upstream_leg, &closed);
                    bytes.0.fetch_add(moved, Ordering::Relaxed);
                })?
        };

        let moved = forwarding::pump(&upstream_leg, &client_leg, &closed);
        bytes.1.fetch_add(moved, Ordering::Relaxed);

        forwarding::shutdown_quietly(&client_socket);
        forwarding::shutdown_quietly(&upstream_socket);
        if to_upstream.join().is_err() {
            warn!(connection = id, "forwarding thread panicked");
        }
        Ok(())
    }
}

struct Connection {
    id: u64,
    generation: u64,
    secure: bool,
    tls: Option<Result<SslAcceptor, String>>,
    peer: SocketAddr,
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Peeks the first TLS record off `stream` without consuming it.
///
/// Returns `None` for EOF, non-handshake traffic or no data before
/// `CAPTURE_TIMEOUT`. A record still incomplete at the deadline is
/// returned as-is so the parser can report the truncation.
fn peek_first_record(stream: &TcpStream) -> Option<Vec<u8>> {
    let mut buffer = vec![0u8; RECORD_HEADER_LEN + MAX_RECORD_LEN];
    let deadline = Instant::now() + CAPTURE_TIMEOUT;

    loop {
        let available = match stream.peek(&mut buffer) {
            Ok(0) => return None,
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => 0,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return None,
        };

        if available > 0 && buffer[0] != client_hello::CONTENT_TYPE_HANDSHAKE {
            return None;
        }
        if let Some(wanted) = client_hello::record_len(&buffer[..available]) {
            let wanted = wanted.min(buffer.len());
            if available >= wanted {
                buffer.truncate(wanted);
                return Some(buffer);
            }
        }
        if Instant::now() >= deadline {
            if available == 0 {
                return None;
            }
            buffer.truncate(available);
            return Some(buffer);
        }
        thread::sleep(CAPTURE_RETRY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn settings_default_to_port_443_on_all_interfaces() {
        let settings = RelaySettings::new(4433, "example.com");
        assert_eq!(settings.remote_port, 443);
        assert_eq!(settings.local_addr().port(), 4433);
        assert!(settings.local_addr().ip().is_unspecified());
    }

    #[test]
    fn check_port_reports_port_in_use() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        assert!(matches!(
            check_port(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            Err(RelayError::PortInUse(p)) if p == port
        ));
        drop(taken);
        assert!(check_port(IpAddr::V4(Ipv4Addr::LOCALHOST), port).is_ok());
    }

    #[test]
    fn peek_reassembles_a_record_without_consuming_it() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_read_timeout(Some(Duration::from_millis(200))).unwrap();

        let record =
            crate::client_hello::tests::build_client_hello(0x0303, &[7; 16], &[0xc02b, 0xc02f, 0x002f]);
        let (head, tail) = record.split_at(20);
        let writer = {
            let head = head.to_vec();
            let tail = tail.to_vec();
            thread::spawn(move || {
                client.write_all(&head).unwrap();
                thread::sleep(Duration::from_millis(50));
                client.write_all(&tail).unwrap();
                client
            })
        };

        let captured = peek_first_record(&server).unwrap();
        assert_eq!(captured.len(), client_hello::record_len(&record).unwrap());
        assert!(client_hello::is_client_hello(&captured));

        // still readable afterwards
        let mut first = [0u8; 6];
        let mut server = server;
        std::io::Read::read_exact(&mut server, &mut first).unwrap();
        assert_eq!(&first[..], &record[..6]);
        drop(writer.join().unwrap());
    }

    #[test]
    fn peek_ignores_non_tls_traffic() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(peek_first_record(&server).is_none());
    }
}
