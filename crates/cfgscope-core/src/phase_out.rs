//! Bookkeeping for superseded resources
//!
//! Each time a resource stops being current it is recorded here with a weak
//! back-reference. Sweeping removes entries whose resource has been released
//! and flags entries that outlive the warning threshold exactly once.

use crate::resource::{ResourceId, WeakRef};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One superseded resource
#[derive(Debug)]
pub struct PhaseOutEntry<C, T> {
    weak: WeakRef<T>,
    config: Arc<C>,
    swapped_at: Instant,
    lingering: bool,
}

impl<C, T: Send + Sync + 'static> PhaseOutEntry<C, T> {
    /// Record a resource superseded now
    #[must_use]
    pub fn new(weak: WeakRef<T>, config: Arc<C>) -> Self {
        Self {
            weak,
            config,
            swapped_at: Instant::now(),
            lingering: false,
        }
    }

    /// Identifier of the superseded resource
    #[inline]
    #[must_use]
    pub fn resource_id(&self) -> ResourceId {
        self.weak.id()
    }

    /// Configuration the resource was built from
    #[inline]
    #[must_use]
    pub fn config(&self) -> &Arc<C> {
        &self.config
    }

    /// Whether the lingering diagnostic already fired
    #[inline]
    #[must_use]
    pub fn is_lingering(&self) -> bool {
        self.lingering
    }

    /// Time since supersession
    #[inline]
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.swapped_at)
    }
}

/// Entry that crossed the warning threshold during a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lingering {
    /// Lingering resource
    pub resource_id: ResourceId,
    /// Time since supersession
    pub age: Duration,
    /// Strong references still held
    pub outstanding: usize,
}

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Resources found released and removed
    pub removed: Vec<ResourceId>,
    /// Resources newly flagged as lingering
    pub lingering: Vec<Lingering>,
}

/// Set of superseded resources that may still be referenced
#[derive(Debug)]
pub struct PhaseOutSet<C, T> {
    entries: Vec<PhaseOutEntry<C, T>>,
}

impl<C, T: Send + Sync + 'static> PhaseOutSet<C, T> {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Track a superseded resource
    #[inline]
    pub fn push(&mut self, entry: PhaseOutEntry<C, T>) {
        self.entries.push(entry);
    }

    /// Remove released entries and flag new lingering ones
    pub fn sweep(&mut self, warn_after: Option<Duration>) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();

        self.entries.retain_mut(|entry| {
            if entry.weak.is_gone() {
                report.removed.push(entry.weak.id());
                return false;
            }
            let outstanding = entry.weak.strong_count();

            if let Some(threshold) = warn_after {
                let age = entry.age(now);
                if !entry.lingering && age > threshold {
                    entry.lingering = true;
                    report.lingering.push(Lingering {
                        resource_id: entry.weak.id(),
                        age,
                        outstanding,
                    });
                }
            }
            true
        });

        report
    }

    /// Number of tracked resources
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if all superseded resources have been released
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate tracked entries
    pub fn iter(&self) -> impl Iterator<Item = &PhaseOutEntry<C, T>> {
        self.entries.iter()
    }
}

impl<C, T: Send + Sync + 'static> Default for PhaseOutSet<C, T> {
    fn default() -> Self {
        Self::new()
    }
}
