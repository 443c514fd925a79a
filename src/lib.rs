// #![warn(unused_crate_dependencies)]
// #![deny(unused_must_use, rust_2018_idioms)]

//! Bitcoin p2p peer pool
//!
//! This crate discovers peers through DNS seeds, runs the version/verack
//! handshake with each of them and keeps a pool of live connections that
//! answer pings, measure latency and forward inventory announcements.

mod command;
mod config;
mod connection;
mod encode;
mod errors;
mod inventory;
mod message;
mod network;
mod payload;
mod pool;
mod seed;
mod services;

/// Protocol version announced in every version message.
pub const PROTOCOL_VERSION: i32 = 70015;

pub use command::Command;
pub use config::{ChecksumPolicy, ConnectionConfig, PoolConfig};
pub use connection::{ConnectionState, PeerConnection, PingTracker};
pub use encode::{decode, encode, Decodable, Encodable};
pub use errors::{BTCP2PError, Result};
pub use inventory::{
    InventoryDispatcher, InventoryEntry, InventoryHandler, InventoryItem, InventoryKind,
};
pub use message::{checksum, frame, Message, MessageHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use network::Network;
pub use payload::{read_nonce, Payload, VersionPayload};
pub use pool::{AddressBook, PeerPool};
pub use seed::{DnsLookup, HostLookup, SeedResolver};
pub use services::{check_policy, PolicyRejection, ServiceFlags};
