use super::errors::{BTCP2PError, Result};

const MAINNET_DNS_SEEDS: &[&str] = &[
    "seed.bitcoin.sipa.be",
    "dnsseed.bluematt.me",
    "dnsseed.bitcoin.dashjr.org",
    "seed.bitcoinstats.com",
    "seed.bitcoin.jonasschnelli.ch",
    "seed.btc.petertodd.org",
    "seed.bitcoin.sprovoost.nl",
    "dnsseed.emzy.de",
    "seed.bitcoin.wiz.biz",
];

const TESTNET_DNS_SEEDS: &[&str] = &[
    "testnet-seed.bitcoin.jonasschnelli.ch",
    "seed.tbtc.petertodd.org",
    "seed.testnet.bitcoin.sprovoost.nl",
    "testnet-seed.bluematt.me",
];

/// Represents the network to which a message belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Mainnet
    /// Default Port 8333
    MainNet,

    /// Testnet
    /// Default Port 18333
    TestNet,
}

impl Network {
    /// The start string (magic) every message header on this network begins with.
    pub fn magic(self) -> [u8; 4] {
        match self {
            Network::MainNet => [0xf9, 0xbe, 0xb4, 0xd9],
            Network::TestNet => [0x0b, 0x11, 0x09, 0x07],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [0xf9, 0xbe, 0xb4, 0xd9] => Ok(Self::MainNet),
            [0x0b, 0x11, 0x09, 0x07] => Ok(Self::TestNet),
            _ => Err(BTCP2PError::UnknowNetwork),
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Network::MainNet => 8333,
            Network::TestNet => 18333,
        }
    }

    /// DNS seed hostnames that resolve to currently active peers.
    pub fn dns_seeds(self) -> &'static [&'static str] {
        match self {
            Network::MainNet => MAINNET_DNS_SEEDS,
            Network::TestNet => TESTNET_DNS_SEEDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, TestResult};
    use quickcheck_macros::quickcheck;

    impl Arbitrary for Network {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            if bool::arbitrary(g) {
                Self::MainNet
            } else {
                Self::TestNet
            }
        }
    }

    #[quickcheck]
    fn test_magic_identifies_network(network: Network) -> TestResult {
        let network2 = Network::from_bytes(&network.magic()).unwrap();
        TestResult::from_bool(network == network2)
    }

    #[test]
    fn test_from_bytes() {
        assert_eq!(
            Network::from_bytes(&[0xf9, 0xbe, 0xb4, 0xd9]).unwrap(),
            Network::MainNet
        );
        assert_eq!(
            Network::from_bytes(&[0x0b, 0x11, 0x09, 0x07]).unwrap(),
            Network::TestNet
        );
        assert!(Network::from_bytes(&[0xfa, 0xbf, 0xb5, 0xda]).is_err());
        assert!(Network::from_bytes(&[0xf9, 0xbe, 0xb4]).is_err());
    }

    #[test]
    fn test_ports_and_seeds() {
        assert_eq!(Network::MainNet.default_port(), 8333);
        assert_eq!(Network::TestNet.default_port(), 18333);
        assert!(!Network::MainNet.dns_seeds().is_empty());
        assert!(!Network::TestNet.dns_seeds().is_empty());
    }
}
