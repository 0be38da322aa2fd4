use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{info, warn};

use super::client::ClientCoordinator;
use crate::hello::RelayPicker;
use crate::Result;

/// Relay list learned from the coordinator, picked at random.
pub struct DiscoveredRelays {
    client: ClientCoordinator,
    relays: RwLock<Vec<String>>,
}

impl DiscoveredRelays {
    pub fn new(client: ClientCoordinator) -> Arc<Self> {
        Arc::new(Self {
            client,
            relays: RwLock::new(Vec::new()),
        })
    }

    /// Replaces the list with a fresh fetch. On failure the previous list
    /// is kept.
    pub async fn refresh(&self) -> Result<usize> {
        let instances = self.client.fetch_instances().await?;
        let relays: Vec<String> = instances.into_iter().map(|ins| ins.addr).collect();
        let n = relays.len();
        *self.relays.write() = relays;
        Ok(n)
    }

    pub fn relays(&self) -> Vec<String> {
        self.relays.read().clone()
    }

    /// Refreshes immediately and then once per `every` while `self` is alive.
    pub fn spawn_refresher(self: &Arc<Self>, every: Duration) {
        let relays: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let Some(relays) = relays.upgrade() else {
                    break;
                };
                match relays.refresh().await {
                    Ok(n) => info!(comp = "discovery", relays = n, "relay list refreshed"),
                    Err(e) => warn!(comp = "discovery", error = %e, "fail to fetch instances"),
                }
            }
        });
    }
}

impl RelayPicker for DiscoveredRelays {
    fn pick(&self) -> Option<String> {
        self.relays.read().choose(&mut rand::thread_rng()).cloned()
    }
}
