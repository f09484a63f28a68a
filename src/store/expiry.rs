//! Background Expiry Sweeper
//!
//! Expired buckets are already invisible to readers (lazy expiry), but a
//! bucket nobody reads again would stay in memory forever. The sweeper is a
//! Tokio task that periodically reclaims them from a [`MemoryStore`].
//!
//! ## Adaptive Frequency
//!
//! Buckets tend to expire in waves (a whole hour's worth at once). When a
//! sweep finds many expired keys the interval halves; when it finds none the
//! interval doubles, up to `max_interval`.

use crate::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval before the first sweep (default: 1s)
    pub base_interval: Duration,

    /// Lower bound for the interval (default: 100ms)
    pub min_interval: Duration,

    /// Upper bound for the interval (default: 30s)
    pub max_interval: Duration,

    /// Speed up when more than this fraction of keys had expired
    pub speedup_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            speedup_threshold: 0.25,
        }
    }
}

impl ExpiryConfig {
    fn next_interval(&self, current: Duration, keys_before: u64, expired: u64) -> Duration {
        if keys_before > 0 && expired as f64 / keys_before as f64 > self.speedup_threshold {
            (current / 2).max(self.min_interval)
        } else if expired == 0 {
            (current * 2).min(self.max_interval)
        } else {
            current
        }
    }
}

/// Handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    pub fn start(store: Arc<MemoryStore>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(sweeper_loop(store, config, shutdown_rx));
        info!("Background expiry sweeper started");
        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    store: Arc<MemoryStore>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let keys_before = store.len();
        let expired = store.cleanup_expired();
        interval = config.next_interval(interval, keys_before, expired);

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = store.len(),
                next_sweep_ms = interval.as_millis() as u64,
                "Expired buckets reclaimed"
            );
        } else {
            trace!(next_sweep_ms = interval.as_millis() as u64, "Nothing to reclaim");
        }
    }
}

/// Starts the sweeper with default configuration.
pub fn start_expiry_sweeper(store: Arc<MemoryStore>) -> ExpirySweeper {
    ExpirySweeper::start(store, ExpiryConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> ExpiryConfig {
        ExpiryConfig {
            base_interval: Duration::from_millis(10),
            min_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[test]
    fn test_interval_adapts() {
        let config = ExpiryConfig::default();
        let base = config.base_interval;
        assert_eq!(config.next_interval(base, 100, 50), base / 2);
        assert_eq!(config.next_interval(base, 100, 0), base * 2);
        assert_eq!(config.next_interval(base, 100, 10), base);
        assert_eq!(
            config.next_interval(config.max_interval, 0, 0),
            config.max_interval
        );
    }

    #[tokio::test]
    async fn test_sweeper_reclaims_expired_buckets() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..10 {
            let key = format!("Q_List_Minutes:2026-10-17_14-{:02}", i);
            store.lpush_sync(&key, "m").unwrap();
            store.expire_sync(&key, Duration::from_millis(30));
        }
        store.lpush_sync("Q_List_Days:2026-10-17", "m").unwrap();
        assert_eq!(store.len(), 11);

        let _sweeper = ExpirySweeper::start(Arc::clone(&store), fast());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().expired, 10);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let store = Arc::new(MemoryStore::new());
        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&store), fast());
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        store.lpush_sync("k", "m").unwrap();
        store.expire_sync("k", Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Not reclaimed in the background, but invisible to readers
        assert_eq!(store.len(), 1);
        assert!(!store.exists_sync("k"));
    }
}
