//! Idle session eviction

use super::registry::SessionRegistry;
use crate::config::BrokerConfig;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

/// Periodically evicts sessions nobody occupies any more
pub struct IdleSweeper {
    registry: Arc<SessionRegistry>,
    check_interval: Duration,
    idle_ttl: Duration,
}

impl IdleSweeper {
    /// Create a new sweeper using the configured interval and TTL
    pub fn new(registry: Arc<SessionRegistry>, config: &BrokerConfig) -> Self {
        Self {
            registry,
            check_interval: config.sweep_interval(),
            idle_ttl: config.idle_session_ttl(),
        }
    }

    /// Run a single sweep and return the evicted session IDs
    pub fn sweep(&self) -> Vec<String> {
        let evicted = self.registry.sweep_idle(self.idle_ttl);
        if !evicted.is_empty() {
            info!(
                count = evicted.len(),
                remaining = self.registry.len(),
                "evicted idle sessions: {:?}",
                evicted
            );
        }
        evicted
    }

    /// Start the sweep loop
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.sweep();
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}
