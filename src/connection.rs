//! A single peer session: handshake, listen loop and heartbeat.

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt, io,
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::watch,
    time::timeout,
};
use tracing::{debug, info, warn};

use super::{
    command::Command,
    config::{ChecksumPolicy, ConnectionConfig},
    errors::{BTCP2PError, Result},
    inventory::InventoryDispatcher,
    message::{Message, MessageHeader, HEADER_SIZE},
    network::Network,
    payload::{Payload, VersionPayload},
    pool::AddressBook,
    services::{check_policy, ServiceFlags},
};

// added to the clock when deriving heartbeat nonces
const NONCE_OFFSET: u64 = 78;

// unanswered pings kept before the oldest is forgotten
const MAX_PENDING_PINGS: usize = 8;

/// Lifecycle of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Dialing,
    VersionSent,
    VersionReceived,
    VerackSent,
    Established,
    Failed,
    Closed,
}

/// Pending pings keyed by nonce, and the last measured round trip.
#[derive(Debug, Default)]
pub struct PingTracker {
    pending: HashMap<u64, Instant>,
    latency: Option<Duration>,
}

impl PingTracker {
    /// Records a ping. Once `MAX_PENDING_PINGS` are unanswered, the oldest
    /// is dropped to make room.
    pub fn sent(&mut self, nonce: u64, at: Instant) {
        while self.pending.len() >= MAX_PENDING_PINGS {
            let oldest = self
                .pending
                .iter()
                .min_by_key(|(_, sent)| **sent)
                .map(|(nonce, _)| *nonce);

            match oldest {
                Some(oldest) => self.pending.remove(&oldest),
                None => break,
            };
        }

        self.pending.insert(nonce, at);
    }

    /// Matches a pong to its ping. Returns the round trip, or `None` for a
    /// nonce that was never sent (which leaves the tracker untouched).
    pub fn received(&mut self, nonce: u64, at: Instant) -> Option<Duration> {
        let sent = self.pending.remove(&nonce)?;
        let latency = at.saturating_duration_since(sent);
        self.latency = Some(latency);
        Some(latency)
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    pub fn is_pending(&self, nonce: u64) -> bool {
        self.pending.contains_key(&nonce)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// An established session with one peer.
///
/// Once started, the connection runs two tasks of its own: a listen loop
/// that dispatches incoming messages and a heartbeat that pings the peer.
/// Both stop when `close` is called or the transport fails.
pub struct PeerConnection {
    address: IpAddr,
    network: Network,
    config: ConnectionConfig,
    host: String,
    user_agent: String,
    nonce: u64,
    services: ServiceFlags,
    state: Mutex<ConnectionState>,
    pings: Mutex<PingTracker>,
    send_headers: AtomicBool,
    handling: AtomicBool,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>,
    stop: watch::Sender<bool>,
    dispatcher: InventoryDispatcher,
    address_book: Option<Arc<AddressBook>>,
}

impl PeerConnection {
    /// Dials `address` on the network's port, performs the handshake and
    /// starts the listen and heartbeat loops.
    pub async fn establish(
        address: IpAddr,
        network: Network,
        config: ConnectionConfig,
        dispatcher: InventoryDispatcher,
    ) -> Result<Arc<Self>> {
        let connection = Self::connect(address, network, config, dispatcher, None).await?;
        connection.start();
        Ok(connection)
    }

    /// Dials and handshakes without starting the loops. `address_book`, if
    /// given, gets the address released when the connection closes.
    pub(crate) async fn connect(
        address: IpAddr,
        network: Network,
        config: ConnectionConfig,
        dispatcher: InventoryDispatcher,
        address_book: Option<Arc<AddressBook>>,
    ) -> Result<Arc<Self>> {
        let socket = SocketAddr::new(address, config.port_for(network));
        let mut state = ConnectionState::Dialing;

        debug!(peer = %socket, "Dialing peer");
        let mut stream = match timeout(config.connect_timeout, TcpStream::connect(socket)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(BTCP2PError::Dial(err)),
            Err(_) => {
                return Err(BTCP2PError::Dial(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connect timed out",
                )))
            }
        };

        let nonce = rand::random();
        let result = timeout(
            config.handshake_timeout,
            handshake(
                &mut stream,
                network,
                nonce,
                config.max_payload_size,
                &mut state,
            ),
        )
        .await
        .unwrap_or(Err(BTCP2PError::HandshakeTimeout));

        let version = match result {
            Ok(version) => version,
            Err(err) => {
                debug!(peer = %socket, ?state, error = %err, "Handshake failed");
                return Err(err);
            }
        };

        let services = version.services();
        if let Err(reason) = check_policy(services) {
            debug!(peer = %socket, %services, %reason, "Skipping peer");
            return Err(BTCP2PError::PolicyRejected(reason));
        }

        let host = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| socket.to_string());
        let (reader, writer) = stream.into_split();
        let (stop, _) = watch::channel(false);

        info!(peer = %host, user_agent = %version.user_agent, %services, "Connected to peer");

        Ok(Arc::new(Self {
            address,
            network,
            config,
            host,
            user_agent: version.user_agent,
            nonce: version.nonce,
            services,
            state: Mutex::new(ConnectionState::Established),
            pings: Mutex::new(PingTracker::default()),
            send_headers: AtomicBool::new(false),
            handling: AtomicBool::new(false),
            reader: Mutex::new(Some(reader)),
            writer: Arc::new(tokio::sync::Mutex::new(Some(writer))),
            stop,
            dispatcher,
            address_book,
        }))
    }

    /// Spawns the listen and heartbeat loops. Calling it again is a no-op.
    pub(crate) fn start(self: &Arc<Self>) {
        let Some(reader) = self.reader.lock().take() else {
            return;
        };

        tokio::spawn(self.clone().listen(reader));
        tokio::spawn(self.clone().heartbeat());
    }

    /// Stops both loops, drops the transport and releases the address.
    /// Closing an already closed connection does nothing.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }

        self.stop.send_replace(true);

        // the listen loop drops the read half once it sees the stop flag
        self.reader.lock().take();
        match self.writer.try_lock() {
            Ok(mut writer) => {
                writer.take();
            }
            Err(_) => {
                // a write is in flight; shut down once it lets go
                let writer = self.writer.clone();
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(async move {
                        writer.lock().await.take();
                    });
                }
            }
        }

        if let Some(book) = &self.address_book {
            book.release(self.address);
        }

        info!(peer = %self.host, "Closed connection");
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Remote endpoint as reported by the transport.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Nonce the peer sent in its version message.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn services(&self) -> ServiceFlags {
        self.services
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    /// Last measured ping round trip.
    pub fn latency(&self) -> Option<Duration> {
        self.pings.lock().latency()
    }

    pub fn pending_pings(&self) -> usize {
        self.pings.lock().pending()
    }

    /// Whether the peer asked for headers announcements via `sendheaders`.
    pub fn sends_headers(&self) -> bool {
        self.send_headers.load(Ordering::SeqCst)
    }

    async fn listen(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut stop = self.stop.subscribe();

        loop {
            if *stop.borrow() {
                break;
            }

            let frame = tokio::select! {
                _ = stop.changed() => break,
                frame = read_frame(&mut reader, self.config.max_payload_size) => frame,
            };

            match frame {
                Ok((header, payload)) => {
                    self.handling.store(true, Ordering::SeqCst);
                    self.handle(header, payload).await;
                    self.handling.store(false, Ordering::SeqCst);
                }
                Err(err) => {
                    debug!(peer = %self.host, error = %err, "Read failed");
                    self.close();
                    break;
                }
            }
        }
    }

    async fn handle(&self, header: MessageHeader, payload: Vec<u8>) {
        if header.network().ok() != Some(self.network) {
            debug!(peer = %self.host, magic = ?header.magic, "Ignoring frame for another network");
            return;
        }

        if header.verify_checksum(&payload).is_err() {
            match self.config.checksum_policy {
                ChecksumPolicy::Tolerate => {
                    debug!(peer = %self.host, command = %header.command_name(), "Checksum mismatch");
                }
                ChecksumPolicy::Discard => {
                    warn!(peer = %self.host, command = %header.command_name(), "Dropping frame with bad checksum");
                    return;
                }
            }
        }

        let Ok(command) = header.command() else {
            debug!(peer = %self.host, command = %header.command_name(), "Ignoring unhandled command");
            return;
        };

        match Payload::from_bytes(&command, &payload) {
            Ok(Payload::SendHeaders) => {
                self.send_headers.store(true, Ordering::SeqCst);
            }
            Ok(Payload::Inv(item)) => {
                if !item.is_empty() {
                    self.dispatcher.dispatch(&item.entries);
                }
            }
            Ok(Payload::Ping(nonce)) => {
                if let Err(err) = self.send(Command::Pong, Payload::Pong(nonce)).await {
                    debug!(peer = %self.host, error = %err, "Failed to answer ping");
                }
            }
            Ok(Payload::Pong(nonce)) => {
                let latency = self.pings.lock().received(nonce, Instant::now());
                match latency {
                    Some(latency) => debug!(peer = %self.host, ?latency, "Pong"),
                    None => debug!(peer = %self.host, nonce, "Pong for unknown ping"),
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(peer = %self.host, %command, error = %err, "Failed to decode payload");
            }
        }
    }

    async fn heartbeat(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        let period = self.config.ping_interval.max(Duration::from_millis(1));
        // the first tick completes immediately
        let mut ticker = tokio::time::interval(period);

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => {}
            }

            if let Err(err) = self.ping().await {
                warn!(peer = %self.host, error = %err, "Ping failed");
                self.close();
                break;
            }
        }
    }

    /// Sends a ping unless the connection is down or mid-dispatch.
    async fn ping(&self) -> Result<()> {
        if !self.is_connected() || self.handling.load(Ordering::SeqCst) {
            return Ok(());
        }

        let nonce = heartbeat_nonce();
        self.pings.lock().sent(nonce, Instant::now());
        self.send(Command::Ping, Payload::Ping(nonce)).await
    }

    async fn send(&self, command: Command, payload: Payload) -> Result<()> {
        let bytes = Message::new(self.network, command, payload).to_bytes()?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            BTCP2PError::Write(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection closed",
            ))
        })?;

        writer.write_all(&bytes).await.map_err(BTCP2PError::Write)
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("host", &self.host)
            .field("user_agent", &self.user_agent)
            .field("services", &self.services)
            .field("state", &self.state())
            .field("latency", &self.latency())
            .finish()
    }
}

fn heartbeat_nonce() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default();

    nanos.wrapping_add(NONCE_OFFSET)
}

/// Runs the version/verack exchange, advancing `state` as it goes.
/// Returns the peer's version payload.
async fn handshake<S>(
    stream: &mut S,
    network: Network,
    nonce: u64,
    max_payload_size: usize,
    state: &mut ConnectionState,
) -> Result<VersionPayload>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = exchange_versions(stream, network, nonce, max_payload_size, state).await;
    if result.is_err() {
        *state = ConnectionState::Failed;
    }

    result
}

async fn exchange_versions<S>(
    stream: &mut S,
    network: Network,
    nonce: u64,
    max_payload_size: usize,
    state: &mut ConnectionState,
) -> Result<VersionPayload>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = Message::new(
        network,
        Command::Version,
        Payload::Version(VersionPayload::new(network, nonce)),
    );
    stream
        .write_all(&version.to_bytes()?)
        .await
        .map_err(BTCP2PError::Write)?;
    *state = ConnectionState::VersionSent;

    let header = read_header(stream, network).await?;
    expect_command(&header, Command::Version)?;
    if header.payload_len() > max_payload_size {
        return Err(BTCP2PError::PayloadTooLarge(header.payload_len()));
    }

    let payload = read_payload(stream, header.payload_len()).await?;
    let version = VersionPayload::from_bytes(&payload)?;
    *state = ConnectionState::VersionReceived;

    let verack = Message::new(network, Command::VerAck, Payload::VerAck);
    stream
        .write_all(&verack.to_bytes()?)
        .await
        .map_err(BTCP2PError::Write)?;
    *state = ConnectionState::VerackSent;

    let header = read_header(stream, network).await?;
    expect_command(&header, Command::VerAck)?;
    *state = ConnectionState::Established;

    Ok(version)
}

async fn read_header<R: AsyncRead + Unpin>(reader: &mut R, network: Network) -> Result<MessageHeader> {
    let mut bytes = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|err| BTCP2PError::Protocol(format!("failed to read header: {err}")))?;

    let header = MessageHeader::from_bytes(&bytes)?;
    if header.network().ok() != Some(network) {
        return Err(BTCP2PError::Protocol(format!(
            "unexpected magic {:02x?}",
            header.magic
        )));
    }

    Ok(header)
}

fn expect_command(header: &MessageHeader, expected: Command) -> Result<()> {
    match header.command() {
        Ok(command) if command == expected => Ok(()),
        _ => Err(BTCP2PError::UnexpectedReply {
            expected: expected.as_str(),
            got: header.command_name(),
        }),
    }
}

/// Reads exactly `len` bytes. A stream that ends early fails with
/// `PayloadTooShort` carrying how many bytes did arrive.
async fn read_payload<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(len);
    reader
        .take(len as u64)
        .read_to_end(&mut payload)
        .await
        .map_err(|err| BTCP2PError::Protocol(format!("failed to read payload: {err}")))?;

    if payload.len() < len {
        return Err(BTCP2PError::PayloadTooShort {
            needed: len,
            available: payload.len(),
        });
    }

    Ok(payload)
}

/// Reads one header and its payload. Frames of any network or command are
/// returned; interpreting them is up to the caller.
async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload_size: usize,
) -> Result<(MessageHeader, Vec<u8>)> {
    let mut bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut bytes).await?;
    let header = MessageHeader::from_bytes(&bytes)?;

    if header.payload_len() > max_payload_size {
        return Err(BTCP2PError::PayloadTooLarge(header.payload_len()));
    }

    let payload = read_payload(reader, header.payload_len()).await?;
    Ok((header, payload))
}
