//! Duplicate suppression
//!
//! The cache remembers the CRC of every frame repeated since the last
//! eviction. There is no per-entry expiry: a janitor task clears the whole
//! set once per epoch, so a CRC is remembered for anywhere between zero and
//! one full period depending on when it was inserted.
//!
//! All access goes through one async mutex. The dispatcher keeps it held
//! across its check, transmit and insert, so a clear can never land between
//! "not seen" and "now seen".

use super::stats::RepeaterStats;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// CRCs repeated during the current epoch
#[derive(Debug, Default)]
pub struct DuplicateCache {
    seen: HashSet<u16>,
}

impl DuplicateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame with this CRC was repeated this epoch
    pub fn contains(&self, crc: u16) -> bool {
        self.seen.contains(&crc)
    }

    /// Remember a repeated CRC
    pub fn insert(&mut self, crc: u16) {
        self.seen.insert(crc);
    }

    /// Forget everything, returning how many CRCs were dropped
    pub fn clear(&mut self) -> usize {
        let evicted = self.seen.len();
        self.seen.clear();
        evicted
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Handle to the cache shared by dispatcher and janitor
#[derive(Debug, Clone, Default)]
pub struct SharedCache {
    inner: Arc<Mutex<DuplicateCache>>,
}

impl SharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access for a check-then-insert sequence
    pub async fn lock(&self) -> MutexGuard<'_, DuplicateCache> {
        self.inner.lock().await
    }

    /// Clear under the lock
    pub async fn clear(&self) -> usize {
        self.inner.lock().await.clear()
    }
}

/// Clear `cache` every `period` until `token` is cancelled
///
/// The first clear happens one full period after start.
pub async fn run_janitor(
    cache: SharedCache,
    period: Duration,
    token: CancellationToken,
    stats: Arc<RepeaterStats>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = cache.clear().await;
                stats.record_eviction();
                trace!(evicted, "Duplicate cache cleared");
            }
        }
    }
    debug!("Duplicate cache janitor stopped");
}
