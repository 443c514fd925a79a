//! A self-maintaining set of live peer connections.

use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use std::{collections::HashSet, net::IpAddr, sync::Arc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{
    config::PoolConfig,
    connection::PeerConnection,
    errors::{BTCP2PError, Result},
    inventory::{InventoryDispatcher, InventoryEntry},
    network::Network,
    seed::SeedResolver,
};

#[derive(Debug, Default)]
struct AddressSets {
    known: HashSet<IpAddr>,
    in_use: HashSet<IpAddr>,
}

/// Candidate and in-use peer addresses.
///
/// An address is never in both sets: taking it into use removes it from the
/// known set, and releasing it puts it back.
#[derive(Debug, Default)]
pub struct AddressBook {
    sets: Mutex<AddressSets>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds addresses to the known set, skipping any already in use.
    /// Returns how many were new.
    pub fn merge<I: IntoIterator<Item = IpAddr>>(&self, addresses: I) -> usize {
        let mut sets = self.sets.lock();
        let mut added = 0;

        for address in addresses {
            if !sets.in_use.contains(&address) && sets.known.insert(address) {
                added += 1;
            }
        }

        added
    }

    pub fn has_known(&self) -> bool {
        !self.sets.lock().known.is_empty()
    }

    /// A random known address.
    pub fn pick_available(&self) -> Option<IpAddr> {
        let sets = self.sets.lock();
        sets.known.iter().copied().choose(&mut rand::thread_rng())
    }

    pub fn mark_in_use(&self, address: IpAddr) {
        let mut sets = self.sets.lock();
        sets.known.remove(&address);
        sets.in_use.insert(address);
    }

    /// Moves an in-use address back to the known set.
    pub fn release(&self, address: IpAddr) {
        let mut sets = self.sets.lock();
        if sets.in_use.remove(&address) {
            sets.known.insert(address);
        }
    }

    /// Forgets a known address after a failed connection attempt.
    pub fn discard(&self, address: IpAddr) {
        self.sets.lock().known.remove(&address);
    }

    pub fn known(&self) -> Vec<IpAddr> {
        self.sets.lock().known.iter().copied().collect()
    }

    pub fn in_use(&self) -> Vec<IpAddr> {
        self.sets.lock().in_use.iter().copied().collect()
    }
}

struct PoolInner {
    config: PoolConfig,
    resolver: SeedResolver,
    book: Arc<AddressBook>,
    nodes: Mutex<Vec<Arc<PeerConnection>>>,
    dispatcher: InventoryDispatcher,
    stop: watch::Sender<bool>,
}

/// Keeps up to `node_count` peers connected on one network.
///
/// A background task fills the pool from the network's DNS seeds, then keeps
/// checking on it: connections that closed are dropped and replaced. The
/// pool must be opened from within a Tokio runtime. Dropping it closes it.
pub struct PeerPool {
    inner: Arc<PoolInner>,
    fill_task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerPool {
    /// Opens a pool on `network` with default settings.
    pub fn open(node_count: usize, network: Network) -> Self {
        Self::open_with(PoolConfig::new(node_count, network), SeedResolver::default())
    }

    pub fn open_with(config: PoolConfig, resolver: SeedResolver) -> Self {
        let inner = Arc::new(PoolInner::new(config, resolver));

        info!(
            network = ?inner.config.network,
            node_count = inner.config.node_count,
            "Opening peer pool"
        );
        let fill_task = tokio::spawn(inner.clone().run());

        Self {
            inner,
            fill_task: Mutex::new(Some(fill_task)),
        }
    }

    /// Stops filling and closes every connection. Closing twice is a no-op.
    pub fn close(&self) {
        if self.inner.stop.send_replace(true) {
            return;
        }

        if let Some(task) = self.fill_task.lock().take() {
            task.abort();
        }

        let nodes = std::mem::take(&mut *self.inner.nodes.lock());
        for node in &nodes {
            node.close();
        }

        info!(closed = nodes.len(), "Closed peer pool");
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.stop.borrow()
    }

    pub fn network(&self) -> Network {
        self.inner.config.network
    }

    /// Number of retained connections that are still established.
    pub fn node_count(&self) -> usize {
        self.inner.live_count()
    }

    /// Snapshot of the established connections.
    pub fn connections(&self) -> Vec<Arc<PeerConnection>> {
        self.inner
            .nodes
            .lock()
            .iter()
            .filter(|node| node.is_connected())
            .cloned()
            .collect()
    }

    pub fn known_addresses(&self) -> Vec<IpAddr> {
        self.inner.book.known()
    }

    pub fn in_use_addresses(&self) -> Vec<IpAddr> {
        self.inner.book.in_use()
    }

    /// Registers the callback for `inv` messages from any peer in the pool,
    /// replacing the previous one.
    pub fn set_inventory_handler<F>(&self, handler: F)
    where
        F: Fn(&[InventoryEntry]) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_handler(handler);
    }

    pub fn clear_inventory_handler(&self) {
        self.inner.dispatcher.clear_handler();
    }
}

impl Drop for PeerPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PeerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerPool")
            .field("network", &self.inner.config.network)
            .field("node_count", &self.node_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PoolInner {
    fn new(config: PoolConfig, resolver: SeedResolver) -> Self {
        let (stop, _) = watch::channel(false);

        Self {
            config,
            resolver,
            book: Arc::new(AddressBook::new()),
            nodes: Mutex::new(Vec::new()),
            dispatcher: InventoryDispatcher::new(),
            stop,
        }
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    fn live_count(&self) -> usize {
        self.nodes
            .lock()
            .iter()
            .filter(|node| node.is_connected())
            .count()
    }

    async fn run(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();

        loop {
            if self.stopped() {
                break;
            }

            self.prune();

            let pause = match self.fill().await {
                Ok(()) => self.config.maintenance_interval,
                Err(err) => {
                    warn!(
                        error = %err,
                        live = self.live_count(),
                        wanted = self.config.node_count,
                        "Fill cycle failed"
                    );
                    self.config.retry_delay
                }
            };

            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        debug!("Fill loop stopped");
    }

    /// Drops connections that are no longer established. Their addresses
    /// were released when they closed.
    fn prune(&self) {
        let mut nodes = self.nodes.lock();
        let before = nodes.len();
        nodes.retain(|node| node.is_connected());

        if nodes.len() < before {
            debug!(pruned = before - nodes.len(), live = nodes.len(), "Pruned closed connections");
        }
    }

    /// Connects until the pool is full, reseeding whenever it runs out of
    /// known addresses.
    async fn fill(&self) -> Result<()> {
        let network = self.config.network;
        let mut failures = 0;

        while !self.stopped() && self.live_count() < self.config.node_count {
            if !self.book.has_known() {
                let seeds = self.resolver.resolve(network).await?;
                let added = self.book.merge(seeds);
                debug!(added, "Merged seed addresses");
            }

            let address = self
                .book
                .pick_available()
                .ok_or(BTCP2PError::NoAvailableAddresses)?;

            let result = PeerConnection::connect(
                address,
                network,
                self.config.connection.clone(),
                self.dispatcher.clone(),
                Some(self.book.clone()),
            )
            .await;

            match result {
                Ok(connection) => self.retain(connection),
                Err(err) => {
                    debug!(%address, error = %err, "Discarding peer address");
                    self.book.discard(address);

                    failures += 1;
                    if failures >= self.config.max_connection_attempts {
                        return Err(BTCP2PError::MaxAttemptsExceeded(failures));
                    }
                }
            }
        }

        Ok(())
    }

    fn retain(&self, connection: Arc<PeerConnection>) {
        let mut nodes = self.nodes.lock();
        let live = nodes.iter().filter(|node| node.is_connected()).count();

        if self.stopped() || live >= self.config.node_count {
            drop(nodes);
            connection.close();
            return;
        }

        let host = connection.host().to_string();
        self.book.mark_in_use(connection.address());
        connection.start();
        nodes.push(connection);

        info!(
            peer = %host,
            live = live + 1,
            wanted = self.config.node_count,
            "Added peer to pool"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ConnectionConfig, seed::HostLookup};
    use async_trait::async_trait;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;
    use std::{
        io,
        net::Ipv4Addr,
        sync::atomic::{AtomicUsize, Ordering},
    };

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Answers every seed with loopback and counts the lookups.
    #[derive(Default)]
    struct LoopbackSeeds {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl HostLookup for LoopbackSeeds {
        async fn lookup(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(vec![LOCALHOST])
        }
    }

    async fn dead_port() -> u16 {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        listener.local_addr().unwrap().port()
    }

    fn inner(port: u16, attempts: usize, seeds: Arc<LoopbackSeeds>) -> PoolInner {
        let config = PoolConfig::new(1, Network::MainNet)
            .with_max_connection_attempts(attempts)
            .with_connection(ConnectionConfig::default().with_port(port));
        PoolInner::new(config, SeedResolver::new(seeds))
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[derive(Debug, Clone)]
    enum Op {
        Merge(Vec<u8>),
        Pick,
        Release(u8),
        Discard(u8),
    }

    impl Arbitrary for Op {
        fn arbitrary(g: &mut Gen) -> Self {
            // a small address space so operations collide
            let last = *g.choose(&[1u8, 2, 3, 4]).unwrap();
            match *g.choose(&[0u8, 1, 2, 3]).unwrap() {
                0 => Op::Merge(vec![last, last.wrapping_add(1)]),
                1 => Op::Pick,
                2 => Op::Release(last),
                _ => Op::Discard(last),
            }
        }
    }

    #[test]
    fn test_merge_skips_in_use() {
        let book = AddressBook::new();
        assert_eq!(book.merge([ip(1), ip(2), ip(2)]), 2);

        book.mark_in_use(ip(1));
        assert_eq!(book.merge([ip(1), ip(3)]), 1);

        let mut known = book.known();
        known.sort();
        assert_eq!(known, vec![ip(2), ip(3)]);
        assert_eq!(book.in_use(), vec![ip(1)]);
    }

    #[test]
    fn test_release_returns_address() {
        let book = AddressBook::new();
        book.merge([ip(1)]);
        book.mark_in_use(ip(1));
        assert!(!book.has_known());
        assert_eq!(book.pick_available(), None);

        book.release(ip(1));
        assert_eq!(book.known(), vec![ip(1)]);
        assert!(book.in_use().is_empty());

        // releasing an address that is not in use changes nothing
        book.discard(ip(1));
        book.release(ip(1));
        assert!(book.known().is_empty());
    }

    #[test]
    fn test_pick_only_known() {
        let book = AddressBook::new();
        book.merge([ip(1), ip(2)]);
        book.mark_in_use(ip(2));

        for _ in 0..20 {
            assert_eq!(book.pick_available(), Some(ip(1)));
        }
    }

    #[quickcheck]
    fn test_sets_stay_disjoint(ops: Vec<Op>) -> bool {
        let book = AddressBook::new();

        for op in ops {
            match op {
                Op::Merge(lasts) => {
                    book.merge(lasts.into_iter().map(ip));
                }
                Op::Pick => {
                    if let Some(address) = book.pick_available() {
                        book.mark_in_use(address);
                    }
                }
                Op::Release(last) => book.release(ip(last)),
                Op::Discard(last) => book.discard(ip(last)),
            }

            let known: HashSet<_> = book.known().into_iter().collect();
            if book.in_use().iter().any(|address| known.contains(address)) {
                return false;
            }
        }

        true
    }

    #[tokio::test]
    async fn test_fill_without_free_address() {
        let seeds = Arc::new(LoopbackSeeds::default());
        let pool = inner(dead_port().await, 10, seeds.clone());
        pool.book.merge([LOCALHOST]);
        pool.book.mark_in_use(LOCALHOST);

        assert!(matches!(
            pool.fill().await,
            Err(BTCP2PError::NoAvailableAddresses)
        ));
        // reseeded once, the answer was already in use
        assert_eq!(seeds.lookups.load(Ordering::SeqCst), 1);
        assert!(pool.book.known().is_empty());
        assert_eq!(pool.book.in_use(), vec![LOCALHOST]);
    }

    #[tokio::test]
    async fn test_fill_stops_at_attempt_bound() {
        let seeds = Arc::new(LoopbackSeeds::default());
        let pool = inner(dead_port().await, 3, seeds.clone());

        assert!(matches!(
            pool.fill().await,
            Err(BTCP2PError::MaxAttemptsExceeded(3))
        ));
        // every failed dial discards the address, so each dial needed a reseed
        assert_eq!(seeds.lookups.load(Ordering::SeqCst), 3);
        assert!(pool.book.known().is_empty());
        assert!(pool.book.in_use().is_empty());
    }

    #[tokio::test]
    async fn test_fill_single_attempt() {
        let seeds = Arc::new(LoopbackSeeds::default());
        let pool = inner(dead_port().await, 1, seeds.clone());

        assert!(matches!(
            pool.fill().await,
            Err(BTCP2PError::MaxAttemptsExceeded(1))
        ));
        assert_eq!(seeds.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fill_stopped_pool_does_nothing() {
        let seeds = Arc::new(LoopbackSeeds::default());
        let pool = inner(dead_port().await, 3, seeds.clone());
        pool.stop.send_replace(true);

        assert!(pool.fill().await.is_ok());
        assert_eq!(seeds.lookups.load(Ordering::SeqCst), 0);
    }
}
