//! Connection blacklisting with exponential backoff.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use strata_config::BlacklistConfig;
use strata_core::{InfoHash, PeerId};
use tracing::warn;

struct Entry {
    expiration: Instant,
    failures: u32,
}

/// Per-`(peer, torrent)` failure tracking.
///
/// Backoff for the n-th failure is
/// `initial + (multiplier^(n-1) - 1) seconds`, floored at the initial
/// backoff and capped at the configured maximum. Entries linger for
/// `expired_entry_ttl` past expiration so the failure count survives
/// between episodes, then the cleanup sweep drops them.
pub struct Blacklist {
    config: BlacklistConfig,
    entries: HashMap<(PeerId, InfoHash), Entry>,
}

impl Blacklist {
    /// An empty blacklist.
    #[must_use]
    pub fn new(config: BlacklistConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    /// Record a failure and extend the entry's expiration.
    pub fn add(&mut self, peer_id: PeerId, info_hash: InfoHash, now: Instant) {
        let entry = self
            .entries
            .entry((peer_id, info_hash))
            .or_insert(Entry {
                expiration: now,
                failures: 0,
            });
        entry.failures += 1;
        let failures = entry.failures;
        let backoff = self.backoff(failures);
        let entry = self.entries.get_mut(&(peer_id, info_hash)).unwrap();
        entry.expiration = now + backoff;
    }

    /// Remaining backoff for a peer, if any.
    #[must_use]
    pub fn remaining(&self, peer_id: PeerId, info_hash: InfoHash, now: Instant) -> Option<Duration> {
        let entry = self.entries.get(&(peer_id, info_hash))?;
        if entry.expiration > now {
            Some(entry.expiration - now)
        } else {
            None
        }
    }

    /// Drop entries expired for longer than the configured TTL.
    pub fn cleanup(&mut self, now: Instant) {
        let ttl = self.config.expired_entry_ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.expiration) <= ttl);
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let grown = u64::from(self.config.backoff_multiplier)
            .checked_pow(exponent)
            .map_or_else(
                || {
                    warn!(failures, "blacklist backoff overflowed, using maximum");
                    None
                },
                |power| Some(self.config.initial_backoff + Duration::from_secs(power - 1)),
            )
            .unwrap_or(self.config.max_backoff);
        grown.clamp(self.config.initial_backoff, self.config.max_backoff)
    }
}
