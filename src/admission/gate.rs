//! The admission gate: keyed sliding-window counters behind sharded locks.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::counter::{WindowAlgorithm, WindowCounter, WindowGeometry};
use super::key::ClientKey;
use super::strategy::AdmissionStrategy;
use crate::config::AdmissionConfig;
use crate::error::Result;

/// Resolved parameters the gate runs with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateSettings {
    /// Length of one accounting window
    pub window: Duration,
    /// Requests admitted per key per window
    pub limit: u64,
    /// Keys quiet for longer than this are evicted
    pub idle_timeout: Duration,
    /// How often the background sweep runs
    pub sweep_interval: Duration,
    /// Estimate used for the admission decision
    pub algorithm: WindowAlgorithm,
}

impl GateSettings {
    /// Validate `config` and resolve it into settings.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::resolve(config))
    }

    fn resolve(config: &AdmissionConfig) -> Self {
        Self {
            window: config.window(),
            limit: config.limit,
            idle_timeout: config.idle_timeout(),
            sweep_interval: config.sweep_interval(),
            algorithm: config.algorithm,
        }
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        Self::resolve(&AdmissionConfig::default())
    }
}

/// Per-client admission control.
///
/// Counters live in a [`DashMap`], so a decision for one key locks only the
/// shard that key hashes to. The read-modify-write of a counter happens while
/// holding that shard's write lock, and eviction takes the same locks, so a
/// key is never removed in the middle of a decision about it.
///
/// Constructed once at startup and shared behind an `Arc`.
pub struct AdmissionGate {
    /// Counters indexed by client key
    counters: DashMap<ClientKey, WindowCounter>,
    /// Window boundaries, anchored at construction
    geometry: WindowGeometry,
    settings: GateSettings,
    /// Rejections since the last call to `take_rejected`
    rejected: AtomicU64,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("tracked_keys", &self.counters.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl AdmissionGate {
    /// Create a gate whose windows start now.
    pub fn new(settings: GateSettings) -> Self {
        Self::with_epoch(settings, Instant::now())
    }

    /// Create a gate whose windows are anchored at `epoch`.
    pub fn with_epoch(settings: GateSettings, epoch: Instant) -> Self {
        Self {
            counters: DashMap::new(),
            geometry: WindowGeometry::new(epoch, settings.window),
            settings,
            rejected: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Result<Self> {
        Ok(Self::new(GateSettings::from_config(config)?))
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Decide whether a request from `key` at `now` is admitted.
    ///
    /// A counter that fails validation is replaced with a fresh one and the
    /// request is admitted.
    pub fn admit(&self, key: &ClientKey, now: Instant) -> bool {
        let now = now.max(self.geometry.epoch());

        let mut counter = self.counters.entry(*key).or_insert_with(|| {
            debug!(key = %key, "Creating admission counter");
            WindowCounter::new(&self.geometry, now)
        });

        if let Err(fault) = counter.validate(&self.geometry) {
            warn!(
                key = %key,
                error = %fault,
                "Admission counter corrupted; resetting and admitting request"
            );
            *counter = WindowCounter::new(&self.geometry, now);
            return true;
        }

        let admitted = counter.try_acquire(
            &self.geometry,
            now,
            self.settings.limit,
            self.settings.algorithm,
        );
        drop(counter);

        if admitted {
            trace!(key = %key, "Request admitted");
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Request rejected");
        }

        admitted
    }

    /// Remove every key idle for longer than the configured timeout.
    ///
    /// Returns the number of keys removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let idle_timeout = self.settings.idle_timeout;
        let mut evicted = 0;

        self.counters.retain(|_, counter| {
            let keep = counter.idle_for(now) <= idle_timeout;
            if !keep {
                evicted += 1;
            }
            keep
        });

        if evicted > 0 {
            self.counters.shrink_to_fit();
        }

        debug!(
            evicted = evicted,
            remaining = self.counters.len(),
            "Admission sweep complete"
        );

        evicted
    }

    /// Number of rejections since the previous call, resetting the tally.
    pub fn take_rejected(&self) -> u64 {
        self.rejected.swap(0, Ordering::Relaxed)
    }

    /// Snapshot of the counter for `key`, if one exists.
    pub fn counter(&self, key: &ClientKey) -> Option<WindowCounter> {
        self.counters.get(key).map(|entry| entry.value().clone())
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop all counters.
    pub fn clear(&self) {
        self.counters.clear();
    }

    #[cfg(test)]
    pub(crate) fn insert_counter(&self, key: ClientKey, counter: WindowCounter) {
        self.counters.insert(key, counter);
    }

    #[cfg(test)]
    pub(crate) fn geometry(&self) -> &WindowGeometry {
        &self.geometry
    }
}

impl AdmissionStrategy for AdmissionGate {
    fn admit(&self, key: &ClientKey, now: Instant) -> bool {
        AdmissionGate::admit(self, key, now)
    }
}
