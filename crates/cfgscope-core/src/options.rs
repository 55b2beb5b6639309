//! Runtime options for a scoped service manager

use serde::Deserialize;
use std::time::Duration;

/// Default period between background ticks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runtime options controlling swap behaviour
///
/// Fixed for the lifetime of a manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScopeOptions {
    /// Wait for every outstanding scope to end before constructing the
    /// replacement service. Old and new instances never coexist, but
    /// acquisitions suspend while the old instance drains.
    pub blocking_on_swap: bool,

    /// Age after which a phased-out service that is still referenced is
    /// reported as lingering
    #[serde(with = "opt_millis")]
    pub warn_after: Option<Duration>,

    /// Developer aid: fail shutdown if services remain referenced after
    /// the final drain. Keep disabled in production.
    pub strict_on_shutdown: bool,

    /// Period of the background loop
    #[serde(with = "millis")]
    pub poll_interval: Duration,
}

impl ScopeOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With blocking swap strategy
    #[inline]
    #[must_use]
    pub fn with_blocking_on_swap(mut self, blocking: bool) -> Self {
        self.blocking_on_swap = blocking;
        self
    }

    /// With lingering warning threshold
    #[inline]
    #[must_use]
    pub fn with_warn_after(mut self, warn_after: Duration) -> Self {
        self.warn_after = Some(warn_after);
        self
    }

    /// With strict shutdown checking
    #[inline]
    #[must_use]
    pub fn with_strict_on_shutdown(mut self, strict: bool) -> Self {
        self.strict_on_shutdown = strict;
        self
    }

    /// With background poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self {
            blocking_on_swap: false,
            warn_after: None,
            strict_on_shutdown: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
