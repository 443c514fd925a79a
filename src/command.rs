use super::errors::{BTCP2PError, Result};

/// Commands this client understands. Anything else a peer sends is
/// rejected by `from_bytes` and skipped by the listen loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Version,
    VerAck,
    SendHeaders,
    Inv,
    Ping,
    Pong,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::VerAck => "verack",
            Command::SendHeaders => "sendheaders",
            Command::Inv => "inv",
            Command::Ping => "ping",
            Command::Pong => "pong",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_str().into()
    }

    /// Parses a command name, ignoring the NUL padding of the header field.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let command = String::from_utf8(bytes.to_vec())?.replace('\0', "");

        Ok(match command.as_str() {
            "version" => Self::Version,
            "verack" => Self::VerAck,
            "sendheaders" => Self::SendHeaders,
            "inv" => Self::Inv,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            _ => return Err(BTCP2PError::InvalidCommand),
        })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
