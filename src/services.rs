use std::fmt;

/// ServiceFlags represents the service flags of a node
/// https://developer.bitcoin.org/reference/p2p_networking.html#version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServiceFlags(u64);

impl ServiceFlags {
    /// This node is not a full node. It may not be able to provide any data except for the transactions it originates.
    pub const UNNAMED: ServiceFlags = ServiceFlags(0);

    /// This is a full node and can be asked for full blocks. It should implement all protocol features available in its self-reported protocol version
    pub const NODE_NETWORK: ServiceFlags = ServiceFlags(0x1);

    /// This is a full node capable of responding to the getutxo protocol request. This is not supported by any currently-maintained Bitcoin node.
    pub const NODE_GETUTXO: ServiceFlags = ServiceFlags(0x2);

    /// This is a full node capable and willing to handle bloom-filtered connections.
    pub const NODE_BLOOM: ServiceFlags = ServiceFlags(0x4);

    /// This is a full node that can be asked for blocks and transactions including witness data.
    pub const NODE_WITNESS: ServiceFlags = ServiceFlags(0x8);

    /// Reserved. Formerly Xtreme Thinblocks, not supported by any currently-maintained Bitcoin node.
    pub const NODE_XTHIN: ServiceFlags = ServiceFlags(0x10);

    /// Set by Bitcoin Cash nodes, which speak the same wire protocol on a different chain.
    pub const NODE_BITCOIN_CASH: ServiceFlags = ServiceFlags(0x20);

    /// This is the same as NODE_NETWORK but the node has at least the last 288 blocks (last 2 days).
    pub const NODE_NETWORK_LIMITED: ServiceFlags = ServiceFlags(0x0400);

    /// Gets the integer representation of this ServiceFlags
    pub fn to_u64(self) -> u64 {
        self.0
    }

    /// Gets the ServiceFlags from an integer representation
    pub fn from_u64(n: u64) -> Self {
        ServiceFlags(n)
    }

    /// True when every bit of `required` is set.
    pub fn supports(self, required: ServiceFlags) -> bool {
        self.0 & required.0 == required.0
    }

    pub fn remove(self, other: ServiceFlags) -> Self {
        ServiceFlags(self.0 & !other.0)
    }
}

impl From<u64> for ServiceFlags {
    fn from(n: u64) -> Self {
        ServiceFlags(n)
    }
}

impl std::ops::BitOr for ServiceFlags {
    type Output = ServiceFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ServiceFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for ServiceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Why a peer's advertised services fail the connection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyRejection {
    NotFullNode,
    NoBloom,
    NoWitness,
    BitcoinCash,
}

impl fmt::Display for PolicyRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PolicyRejection::NotFullNode => "node is not a full node",
            PolicyRejection::NoBloom => "node does not support bloom filtering",
            PolicyRejection::NoWitness => "node does not support witness",
            PolicyRejection::BitcoinCash => "node is a bitcoin cash node",
        })
    }
}

/// Accepts full nodes that serve bloom filters and witness data, and are not on the BCH chain.
pub fn check_policy(services: ServiceFlags) -> std::result::Result<(), PolicyRejection> {
    if !services.supports(ServiceFlags::NODE_NETWORK) {
        return Err(PolicyRejection::NotFullNode);
    }

    if !services.supports(ServiceFlags::NODE_BLOOM) {
        return Err(PolicyRejection::NoBloom);
    }

    if !services.supports(ServiceFlags::NODE_WITNESS) {
        return Err(PolicyRejection::NoWitness);
    }

    if services.supports(ServiceFlags::NODE_BITCOIN_CASH) {
        return Err(PolicyRejection::BitcoinCash);
    }

    Ok(())
}
