use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use std::{
    io::Write,
    net::{Ipv4Addr, SocketAddr},
    time::SystemTime,
};

use super::{
    command::Command,
    encode::{Decodable, Encodable, PayloadReader},
    errors::{BTCP2PError, Result},
    inventory::InventoryItem,
    network::Network,
    services::ServiceFlags,
    PROTOCOL_VERSION,
};

const NONCE_SIZE: usize = 8;

/// Payload represents the payload of a message
/// The inner type encapsulates all the different payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Version(VersionPayload),
    VerAck,
    SendHeaders,
    Inv(InventoryItem),
    Ping(u64),
    Pong(u64),
}

impl Payload {
    /// to_bytes converts the payload to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Payload::Version(version_payload) => version_payload.to_bytes(),
            Payload::Inv(item) => item.to_bytes(),
            Payload::Ping(nonce) | Payload::Pong(nonce) => Ok(nonce.to_le_bytes().to_vec()),
            Payload::VerAck | Payload::SendHeaders => Ok(vec![]),
        }
    }

    /// from_bytes converts bytes to a payload
    /// the command is needed to determine the payload type
    pub fn from_bytes(command: &Command, bytes: &[u8]) -> Result<Self> {
        match command {
            Command::Version => Ok(Payload::Version(VersionPayload::from_bytes(bytes)?)),
            Command::VerAck => Ok(Payload::VerAck),
            Command::SendHeaders => Ok(Payload::SendHeaders),
            Command::Inv => Ok(Payload::Inv(InventoryItem::from_bytes(bytes)?)),
            Command::Ping => Ok(Payload::Ping(read_nonce(bytes)?)),
            Command::Pong => Ok(Payload::Pong(read_nonce(bytes)?)),
        }
    }
}

/// Ping and pong carry nothing but an 8 byte little-endian nonce.
pub fn read_nonce(bytes: &[u8]) -> Result<u64> {
    if bytes.len() != NONCE_SIZE {
        return Err(BTCP2PError::InvalidPayloadLength {
            expected: NONCE_SIZE,
            actual: bytes.len(),
        });
    }

    PayloadReader::new(bytes).read_u64_le()
}

/// VersionPayload represents the payload of a version message
/// https://developer.bitcoin.org/reference/p2p_networking.html#version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPayload {
    /// The highest protocol version understood by the transmitting node.
    pub version: i32,

    /// The services supported by the transmitting node encoded as a bitfield.
    pub services: u64,

    /// The current Unix epoch time according to the transmitting node’s clock.
    pub timestamp: i64,

    /// The services supported by the receiving node as perceived by the transmitting node.
    pub addr_recv_serv: u64,

    /// The IPv6 address of the receiving node as perceived by the transmitting node in big endian byte order.
    pub addr_recv: [u8; 16],

    /// The port number of the receiving node as perceived by the transmitting node in big endian byte order.
    pub addr_recv_port: u16,

    /// The services supported by the transmitting node. Should be identical to the ‘services’ field above.
    pub addr_trans_serv: u64,

    /// The IPv6 address of the transmitting node in big endian byte order.
    pub addr_trans: [u8; 16],

    /// The port number of the transmitting node in big endian byte order.
    pub addr_trans_port: u16,

    /// A random nonce which can help a node detect a connection to itself.
    pub nonce: u64,

    /// User agent, prefixed on the wire by a single length byte.
    pub user_agent: String,

    /// The height of the transmitting node’s best block chain.
    pub start_height: i32,

    /// Transaction relay flag. If false, no “inv” messages announcing new transactions should be sent.
    pub relay: bool,
}

impl VersionPayload {
    /// The version this client opens every handshake with: no services,
    /// loopback addresses on the network's port, no user agent, height 1
    /// and relay requested.
    pub fn new(network: Network, nonce: u64) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default();

        let loopback = SocketAddr::from((Ipv4Addr::LOCALHOST, network.default_port()));
        let (addr, port) = VersionPayload::socket_to_octets_and_port(loopback);

        VersionPayload {
            version: PROTOCOL_VERSION,
            services: ServiceFlags::UNNAMED.to_u64(),
            timestamp,
            addr_recv_serv: ServiceFlags::UNNAMED.to_u64(),
            addr_recv: addr,
            addr_recv_port: port,
            addr_trans_serv: ServiceFlags::UNNAMED.to_u64(),
            addr_trans: addr,
            addr_trans_port: port,
            nonce,
            user_agent: String::new(),
            start_height: 1,
            relay: true,
        }
    }

    pub fn services(&self) -> ServiceFlags {
        ServiceFlags::from_u64(self.services)
    }

    /// to_bytes converts the payload to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer: Vec<u8> = vec![];
        buffer.write_i32::<LittleEndian>(self.version)?;
        buffer.write_u64::<LittleEndian>(self.services)?;
        buffer.write_i64::<LittleEndian>(self.timestamp)?;
        buffer.write_u64::<LittleEndian>(self.addr_recv_serv)?;
        buffer.write_all(&self.addr_recv)?;
        buffer.write_u16::<BigEndian>(self.addr_recv_port)?;
        buffer.write_u64::<LittleEndian>(self.addr_trans_serv)?;
        buffer.write_all(&self.addr_trans)?;
        buffer.write_u16::<BigEndian>(self.addr_trans_port)?;
        buffer.write_u64::<LittleEndian>(self.nonce)?;

        let user_agent = self.user_agent.as_bytes();
        let user_agent = &user_agent[..user_agent.len().min(u8::MAX as usize)];
        buffer.write_u8(user_agent.len() as u8)?;
        buffer.write_all(user_agent)?;

        buffer.write_i32::<LittleEndian>(self.start_height)?;
        buffer.write_u8(self.relay.into())?;
        Ok(buffer)
    }

    /// from_bytes converts bytes to a payload.
    /// Every field boundary, including the variable length user agent, is
    /// checked before it is read.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(bytes);

        let version = reader.read_i32_le()?;
        let services = reader.read_u64_le()?;
        let timestamp = reader.read_i64_le()?;
        let addr_recv_serv = reader.read_u64_le()?;
        let addr_recv = reader.take_array()?;
        let addr_recv_port = reader.read_u16_be()?;
        let addr_trans_serv = reader.read_u64_le()?;
        let addr_trans = reader.take_array()?;
        let addr_trans_port = reader.read_u16_be()?;
        let nonce = reader.read_u64_le()?;

        let user_agent_len = reader.read_u8()? as usize;
        let user_agent = String::from_utf8_lossy(reader.take(user_agent_len)?)
            .trim_end_matches('\0')
            .to_string();

        let start_height = reader.read_i32_le()?;
        let relay = reader.read_u8()? != 0x00;

        Ok(VersionPayload {
            version,
            services,
            timestamp,
            addr_recv_serv,
            addr_recv,
            addr_recv_port,
            addr_trans_serv,
            addr_trans,
            addr_trans_port,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }

    /// socket_to_octets_and_port converts a socket address (SocketAddr) to its octets and port ([u8; 16], u16)
    fn socket_to_octets_and_port(socket: SocketAddr) -> ([u8; 16], u16) {
        (
            match socket.ip() {
                std::net::IpAddr::V4(x) => x.to_ipv6_mapped(),
                std::net::IpAddr::V6(x) => x,
            }
            .octets(),
            socket.port(),
        )
    }
}

impl Encodable for VersionPayload {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        VersionPayload::to_bytes(self)
    }
}

impl Decodable for VersionPayload {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        VersionPayload::from_bytes(bytes)
    }
}
