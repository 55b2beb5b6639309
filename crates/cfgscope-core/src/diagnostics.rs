//! Observational diagnostics emitted by a manager
//!
//! Diagnostics never change manager behaviour. The default sink logs through
//! `tracing`; [`DiagnosticLog`] keeps an in-memory record for inspection.

use crate::resource::ResourceId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Event reported by the swap engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Incoming configuration equal to the current one was ignored
    RedundantChangeSuppressed {
        /// Manager name
        manager: String,
    },

    /// Phased-out resource still referenced past `warn_after`
    LingeringResource {
        /// Manager name
        manager: String,
        /// Lingering resource
        resource_id: ResourceId,
        /// Time since the resource stopped being current
        age: Duration,
        /// Strong references still held
        outstanding: usize,
    },

    /// Building a replacement service failed
    SwapFailed {
        /// Manager name
        manager: String,
        /// Failure description
        error: String,
    },

    /// Configuration type has no value equality; redundant swaps possible
    EqualityUnavailable {
        /// Manager name
        manager: String,
    },
}

impl Diagnostic {
    /// Short machine-friendly name of the event kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RedundantChangeSuppressed { .. } => "redundant_change_suppressed",
            Self::LingeringResource { .. } => "lingering_resource",
            Self::SwapFailed { .. } => "swap_failed",
            Self::EqualityUnavailable { .. } => "equality_unavailable",
        }
    }

    /// Manager that emitted the event
    #[must_use]
    pub fn manager(&self) -> &str {
        match self {
            Self::RedundantChangeSuppressed { manager }
            | Self::LingeringResource { manager, .. }
            | Self::SwapFailed { manager, .. }
            | Self::EqualityUnavailable { manager } => manager,
        }
    }
}

/// Receiver of diagnostics
pub trait DiagnosticSink: Send + Sync {
    /// Record one event
    fn record(&self, diagnostic: &Diagnostic);
}

/// Sink that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::RedundantChangeSuppressed { manager } => {
                tracing::debug!(manager = %manager, "configuration unchanged, swap suppressed");
            }
            Diagnostic::LingeringResource {
                manager,
                resource_id,
                age,
                outstanding,
            } => {
                tracing::warn!(
                    manager = %manager,
                    resource_id = %resource_id,
                    age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
                    outstanding,
                    "service has been waiting for phase out longer than the warning threshold"
                );
            }
            Diagnostic::SwapFailed { manager, error } => {
                tracing::error!(manager = %manager, error = %error, "service swap failed");
            }
            Diagnostic::EqualityUnavailable { manager } => {
                tracing::warn!(
                    manager = %manager,
                    "configuration type has no value equality; duplicate change notifications will swap"
                );
            }
        }
    }
}

/// Timestamped diagnostic
#[derive(Debug, Clone)]
pub struct DiagnosticRecord {
    /// When the event was recorded
    pub at: DateTime<Utc>,
    /// The event
    pub diagnostic: Diagnostic,
}

/// In-memory diagnostic recorder, optionally forwarding to another sink
#[derive(Default)]
pub struct DiagnosticLog {
    inner: Mutex<Vec<DiagnosticRecord>>,
    forward: Option<Arc<dyn DiagnosticSink>>,
}

impl DiagnosticLog {
    /// Create empty log
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create log that also forwards every event to `sink`
    #[must_use]
    pub fn forwarding(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            forward: Some(sink),
        }
    }

    /// Snapshot of all records
    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.inner.lock().clone()
    }

    /// Snapshot of all events without timestamps
    pub fn events(&self) -> Vec<Diagnostic> {
        self.inner
            .lock()
            .iter()
            .map(|r| r.diagnostic.clone())
            .collect()
    }

    /// Count events of one kind
    pub fn count(&self, kind: &str) -> usize {
        self.inner
            .lock()
            .iter()
            .filter(|r| r.diagnostic.kind() == kind)
            .count()
    }

    /// Drop all records
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl DiagnosticSink for DiagnosticLog {
    fn record(&self, diagnostic: &Diagnostic) {
        self.inner.lock().push(DiagnosticRecord {
            at: Utc::now(),
            diagnostic: diagnostic.clone(),
        });
        if let Some(forward) = &self.forward {
            forward.record(diagnostic);
        }
    }
}

impl std::fmt::Debug for DiagnosticLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticLog")
            .field("records", &self.inner.lock().len())
            .finish_non_exhaustive()
    }
}
