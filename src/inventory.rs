use parking_lot::RwLock;
use std::sync::Arc;

use super::{
    encode::{Decodable, Encodable, PayloadReader},
    errors::{BTCP2PError, Result},
};

const COUNT_SIZE: usize = 1;
const TYPE_SIZE: usize = 4;
const HASH_SIZE: usize = 32;
const ENTRY_SIZE: usize = TYPE_SIZE + HASH_SIZE;

/// What an inventory entry refers to
/// https://developer.bitcoin.org/reference/p2p_networking.html#data-messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryKind {
    Error,
    Tx,
    Block,
    FilteredBlock,
    CompactBlock,
    WitnessTx,
    WitnessBlock,
    Unknown(u32),
}

impl From<u32> for InventoryKind {
    fn from(kind: u32) -> Self {
        match kind {
            0 => InventoryKind::Error,
            1 => InventoryKind::Tx,
            2 => InventoryKind::Block,
            3 => InventoryKind::FilteredBlock,
            4 => InventoryKind::CompactBlock,
            0x4000_0001 => InventoryKind::WitnessTx,
            0x4000_0002 => InventoryKind::WitnessBlock,
            other => InventoryKind::Unknown(other),
        }
    }
}

/// A single advertised object: its type and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InventoryEntry {
    pub kind: u32,
    pub hash: [u8; HASH_SIZE],
}

impl InventoryEntry {
    pub fn new(kind: u32, hash: [u8; HASH_SIZE]) -> Self {
        Self { kind, hash }
    }

    pub fn kind(&self) -> InventoryKind {
        InventoryKind::from(self.kind)
    }
}

/// The payload of an `inv` message.
///
/// The entry count is a single byte rather than a compact size, so at most
/// 255 entries are carried per message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InventoryItem {
    pub entries: Vec<InventoryEntry>,
}

impl InventoryItem {
    pub fn new(entries: Vec<InventoryEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let count = u8::try_from(self.entries.len()).map_err(|_| {
            BTCP2PError::Protocol(format!("{} inventory entries", self.entries.len()))
        })?;

        let mut buffer = Vec::with_capacity(COUNT_SIZE + self.entries.len() * ENTRY_SIZE);
        buffer.push(count);
        for entry in &self.entries {
            buffer.extend_from_slice(&entry.kind.to_le_bytes());
            buffer.extend_from_slice(&entry.hash);
        }

        Ok(buffer)
    }

    /// Decodes the count byte and then that many entries. Fails with
    /// `InvalidLength` when the buffer cannot hold the declared count.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let count = *bytes.first().ok_or(BTCP2PError::InvalidLength {
            count: 0,
            needed: COUNT_SIZE,
            available: 0,
        })? as usize;

        let needed = COUNT_SIZE + count * ENTRY_SIZE;
        if bytes.len() < needed {
            return Err(BTCP2PError::InvalidLength {
                count,
                needed,
                available: bytes.len(),
            });
        }

        let mut reader = PayloadReader::new(&bytes[COUNT_SIZE..needed]);
        let entries = (0..count)
            .map(|_| -> Result<InventoryEntry> {
                Ok(InventoryEntry {
                    kind: reader.read_u32_le()?,
                    hash: reader.take_array()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries })
    }
}

impl Encodable for InventoryItem {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        InventoryItem::to_bytes(self)
    }
}

impl Decodable for InventoryItem {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        InventoryItem::from_bytes(bytes)
    }
}

/// Callback invoked with the entries of every non-empty `inv` message.
///
/// It is called from the listen task of whichever peer received the
/// message, so several peers may call it at the same time.
pub type InventoryHandler = Arc<dyn Fn(&[InventoryEntry]) + Send + Sync>;

/// Holds the single registered inventory callback. Clones share it.
#[derive(Clone, Default)]
pub struct InventoryDispatcher {
    handler: Arc<RwLock<Option<InventoryHandler>>>,
}

impl InventoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`, replacing any previous one.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&[InventoryEntry]) + Send + Sync + 'static,
    {
        *self.handler.write() = Some(Arc::new(handler));
    }

    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    /// Calls the handler, if any, returning whether it ran.
    pub fn dispatch(&self, entries: &[InventoryEntry]) -> bool {
        // clone out so the lock is not held while user code runs
        let handler = self.handler.read().clone();

        match handler {
            Some(handler) => {
                handler(entries);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for InventoryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryDispatcher")
            .field("registered", &self.handler.read().is_some())
            .finish()
    }
}
