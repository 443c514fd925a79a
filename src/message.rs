use byteorder::{LittleEndian, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::io::Write;

use super::{
    command::Command,
    encode::{Decodable, Encodable, PayloadReader},
    errors::{BTCP2PError, Result},
    network::Network,
    payload::Payload,
};

const START_STRING_SIZE: usize = 4;
const COMMAND_NAME_SIZE: usize = 12;
const PAYLOAD_LEN_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 4;
pub const HEADER_SIZE: usize =
    START_STRING_SIZE + COMMAND_NAME_SIZE + PAYLOAD_LEN_SIZE + CHECKSUM_SIZE;

// 32 MB
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// MessageHeader is the fixed 24 byte prefix of every message
/// https://developer.bitcoin.org/reference/p2p_networking.html#message-headers
///
/// Fields are kept raw so a header with an unknown magic or command can
/// still be inspected (and its payload skipped) by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: [u8; START_STRING_SIZE],
    pub command: [u8; COMMAND_NAME_SIZE],
    pub payload_len: u32,
    pub checksum: [u8; CHECKSUM_SIZE],
}

impl MessageHeader {
    /// Parses a header. Anything other than exactly 24 bytes is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(BTCP2PError::InvalidHeaderLength(bytes.len()));
        }

        let mut reader = PayloadReader::new(bytes);

        Ok(Self {
            magic: reader.take_array()?,
            command: reader.take_array()?,
            payload_len: reader.read_u32_le()?,
            checksum: reader.take_array()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_SIZE);
        buffer.extend_from_slice(&self.magic);
        buffer.extend_from_slice(&self.command);
        buffer.extend_from_slice(&self.payload_len.to_le_bytes());
        buffer.extend_from_slice(&self.checksum);
        buffer
    }

    pub fn network(&self) -> Result<Network> {
        Network::from_bytes(&self.magic)
    }

    pub fn command(&self) -> Result<Command> {
        Command::from_bytes(&self.command)
    }

    /// The command field as text, for logs and error reports.
    pub fn command_name(&self) -> String {
        String::from_utf8_lossy(&self.command)
            .trim_end_matches('\0')
            .to_string()
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len as usize
    }

    /// Recomputes the payload checksum and compares it with the header's.
    pub fn verify_checksum(&self, payload: &[u8]) -> Result<()> {
        if self.checksum != checksum(payload) {
            return Err(BTCP2PError::InvalidChecksum);
        }

        Ok(())
    }
}

/// Builds a full frame: header for `command` followed by `payload`.
/// Command names longer than 12 bytes are truncated.
pub fn frame(network: Network, command: &str, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload.len());

    // start string char[4]
    buffer.write_all(&network.magic())?;

    // command name char[12], NUL padded
    let mut command_bytes = [0u8; COMMAND_NAME_SIZE];
    let len = command.len().min(COMMAND_NAME_SIZE);
    command_bytes[..len].copy_from_slice(&command.as_bytes()[..len]);
    buffer.write_all(&command_bytes)?;

    // payload length uint32 (4 bytes)
    buffer.write_u32::<LittleEndian>(payload.len() as u32)?;

    // checksum char[4]
    buffer.write_all(&checksum(payload))?;

    // payload char[..] (variable length)
    buffer.write_all(payload)?;

    Ok(buffer)
}

/// Computes Bitcoin checksum for given data: the first 4 bytes of SHA256(SHA256(data))
pub fn checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let hash = Sha256::digest(Sha256::digest(data));

    let mut buffer = [0u8; CHECKSUM_SIZE];
    buffer.copy_from_slice(&hash[..CHECKSUM_SIZE]);

    buffer
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub network: Network,
    pub command: Command,
    pub payload: Payload,
}

impl Message {
    pub fn new(network: Network, command: Command, payload: Payload) -> Self {
        Self {
            network,
            command,
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        frame(self.network, self.command.as_str(), &self.payload.to_bytes()?)
    }

    /// Decodes a complete frame, rejecting a bad checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(BTCP2PError::InvalidHeaderLength(bytes.len()));
        }

        let header = MessageHeader::from_bytes(&bytes[..HEADER_SIZE])?;
        let network = header.network()?;
        let command = header.command()?;

        if header.payload_len() > MAX_PAYLOAD_SIZE {
            return Err(BTCP2PError::PayloadTooLarge(header.payload_len()));
        }

        let payload_bytes = PayloadReader::new(&bytes[HEADER_SIZE..]).take(header.payload_len())?;
        header.verify_checksum(payload_bytes)?;

        let payload = Payload::from_bytes(&command, payload_bytes)?;

        Ok(Self {
            network,
            command,
            payload,
        })
    }
}

impl Encodable for Message {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Message::to_bytes(self)
    }
}

impl Decodable for Message {
    fn from_bytes(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized,
    {
        Message::from_bytes(bytes)
    }
}
