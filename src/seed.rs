//! DNS seed resolution.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::{io, net::IpAddr, sync::Arc};
use tracing::{debug, info, warn};

use super::{
    errors::{BTCP2PError, Result},
    network::Network,
};

const MAX_SEED_ATTEMPTS: usize = 10;

/// Resolves a hostname to IP addresses.
#[async_trait]
pub trait HostLookup: Send + Sync {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

#[async_trait]
impl<T: HostLookup + ?Sized> HostLookup for Arc<T> {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        (**self).lookup(host).await
    }
}

/// Lookup backed by the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsLookup;

#[async_trait]
impl HostLookup for DnsLookup {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Turns a network's DNS seeds into candidate peer addresses.
#[derive(Clone)]
pub struct SeedResolver {
    lookup: Arc<dyn HostLookup>,
    max_attempts: usize,
}

impl Default for SeedResolver {
    fn default() -> Self {
        Self::new(DnsLookup)
    }
}

impl SeedResolver {
    pub fn new<L: HostLookup + 'static>(lookup: L) -> Self {
        Self {
            lookup: Arc::new(lookup),
            max_attempts: MAX_SEED_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Resolves a randomly chosen seed, moving on to another seed after a
    /// failed or empty lookup. Gives up with `NoSeedsFound` after
    /// `max_attempts` lookups.
    pub async fn resolve(&self, network: Network) -> Result<Vec<IpAddr>> {
        let seeds = network.dns_seeds();
        let mut untried: Vec<&str> = Vec::new();

        for attempt in 1..=self.max_attempts {
            if untried.is_empty() {
                untried = seeds.to_vec();
                untried.shuffle(&mut rand::thread_rng());
            }

            let Some(seed) = untried.pop() else {
                break;
            };

            match self.lookup.lookup(seed).await {
                Ok(mut addrs) if !addrs.is_empty() => {
                    addrs.sort();
                    addrs.dedup();
                    info!(seed, count = addrs.len(), "Resolved DNS seed");
                    return Ok(addrs);
                }
                Ok(_) => {
                    debug!(seed, attempt, "DNS seed returned no addresses");
                }
                Err(err) => {
                    warn!(seed, attempt, error = %err, "Failed to resolve DNS seed");
                }
            }
        }

        Err(BTCP2PError::NoSeedsFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;

    /// Fails the first `failures` lookups, then answers with one address.
    struct FlakyLookup {
        failures: usize,
        hosts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HostLookup for FlakyLookup {
        async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            let mut hosts = self.hosts.lock();
            hosts.push(host.to_string());

            if hosts.len() <= self.failures {
                return Err(io::Error::new(io::ErrorKind::Other, "lookup failed"));
            }

            Ok(vec![
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            ])
        }
    }

    fn flaky(failures: usize) -> Arc<FlakyLookup> {
        Arc::new(FlakyLookup {
            failures,
            hosts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_first_seed_succeeds() {
        let lookup = flaky(0);
        let resolver = SeedResolver::new(lookup.clone());

        let addrs = resolver.resolve(Network::MainNet).await.unwrap();
        assert_eq!(addrs, vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))]);
        assert_eq!(lookup.hosts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_with_a_different_seed() {
        let lookup = flaky(1);
        let resolver = SeedResolver::new(lookup.clone());

        let addrs = resolver.resolve(Network::TestNet).await.unwrap();
        assert!(!addrs.is_empty());

        let hosts = lookup.hosts.lock();
        assert_eq!(hosts.len(), 2);
        assert_ne!(hosts[0], hosts[1]);
        assert!(hosts
            .iter()
            .all(|host| Network::TestNet.dns_seeds().contains(&host.as_str())));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let lookup = flaky(usize::MAX);
        let resolver = SeedResolver::new(lookup.clone()).with_max_attempts(3);

        assert!(matches!(
            resolver.resolve(Network::MainNet).await,
            Err(BTCP2PError::NoSeedsFound)
        ));
        assert_eq!(lookup.hosts.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_answers_count_as_failures() {
        struct EmptyLookup;

        #[async_trait]
        impl HostLookup for EmptyLookup {
            async fn lookup(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
                Ok(vec![])
            }
        }

        let resolver = SeedResolver::new(EmptyLookup).with_max_attempts(2);
        assert!(resolver.resolve(Network::MainNet).await.is_err());
    }
}
