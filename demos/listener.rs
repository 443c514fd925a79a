use btc_peer_pool::{InventoryKind, Network, PeerPool};
use std::time::Duration;

/// Number of peers the pool keeps connected.
const NODE_COUNT: usize = 8;

/// How often the pool status is logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Opens a pool on mainnet and logs every inventory announcement until
/// interrupted with ctrl-c.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let pool = PeerPool::open(NODE_COUNT, Network::MainNet);
    pool.set_inventory_handler(|entries| {
        for entry in entries {
            let hash: String = entry.hash.iter().rev().map(|b| format!("{b:02x}")).collect();
            match entry.kind() {
                InventoryKind::Tx | InventoryKind::WitnessTx => tracing::info!("tx {}", hash),
                InventoryKind::Block | InventoryKind::WitnessBlock => tracing::info!("block {}", hash),
                kind => tracing::debug!("{:?} {}", kind, hash),
            }
        }
    });

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            _ = status.tick() => {
                for connection in pool.connections() {
                    tracing::info!(
                        "{} {} latency {:?}",
                        connection.host(),
                        connection.user_agent(),
                        connection.latency()
                    );
                }
                tracing::info!("{} of {} peers connected", pool.node_count(), NODE_COUNT);
            }
        }
    }

    pool.close();
    Ok(())
}
