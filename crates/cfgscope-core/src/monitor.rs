//! Configuration change sources
//!
//! A manager is fed either directly through [`ChangeConsumer::consume_change`]
//! or by binding it to an [`OptionsMonitor`] that pushes named option values.

use std::fmt;
use std::sync::Arc;

/// Listener invoked with a changed value and the name it was stored under
pub type ChangeListener<C> = Arc<dyn Fn(&C, Option<&str>) + Send + Sync>;

/// Anything that accepts configuration change notifications
pub trait ChangeConsumer<C>: Send + Sync {
    /// Queue a configuration value; never blocks and never fails
    fn consume_change(&self, config: C);
}

/// External source of named configuration values
pub trait OptionsMonitor<C>: Send + Sync {
    /// Current value stored under `name` (`None` selects the default slot)
    fn get(&self, name: Option<&str>) -> C;

    /// Register `listener` for every future change
    ///
    /// The listener stays registered until the returned subscription drops.
    fn on_change(&self, listener: ChangeListener<C>) -> ChangeSubscription;
}

/// Registration token; unregisters its listener on drop
#[must_use = "dropping the subscription unregisters the listener"]
pub struct ChangeSubscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ChangeSubscription {
    /// Create subscription running `unsubscribe` when dropped
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Subscription with nothing to undo
    #[must_use]
    pub fn noop() -> Self {
        Self { unsubscribe: None }
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Whether a change stored under `changed` concerns a binding to `bound`
///
/// Unnamed changes and unnamed bindings both address the default slot.
#[must_use]
pub fn name_matches(bound: Option<&str>, changed: Option<&str>) -> bool {
    bound.unwrap_or_default() == changed.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn subscription_runs_unsubscribe_once_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&flag);
        let subscription = ChangeSubscription::new(move || seen.store(true, Ordering::SeqCst));

        assert!(!flag.load(Ordering::SeqCst));
        drop(subscription);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn default_slot_matching() {
        assert!(name_matches(None, None));
        assert!(name_matches(None, Some("")));
        assert!(name_matches(Some("primary"), Some("primary")));
        assert!(!name_matches(Some("primary"), None));
        assert!(!name_matches(None, Some("replica")));
    }
}
