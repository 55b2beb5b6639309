//! In-memory store of named option values
//!
//! Implements [`OptionsMonitor`] so managers can bind to one named slot.
//! The unnamed slot is the empty name.

use cfgscope_core::{ChangeListener, ChangeSubscription, OptionsMonitor};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Listeners<C> = Mutex<Vec<(u64, ChangeListener<C>)>>;

/// Named option values with change notification
pub struct OptionsStore<C> {
    values: DashMap<String, C>,
    listeners: Arc<Listeners<C>>,
    next_listener: AtomicU64,
}

impl<C> OptionsStore<C>
where
    C: Clone + Default + Send + Sync + 'static,
{
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Replace the value under `name` and notify listeners
    pub fn set(&self, name: Option<&str>, value: C) {
        let slot = name.unwrap_or_default();
        self.values.insert(slot.to_owned(), value.clone());
        tracing::debug!(options_name = slot, "options updated");
        self.notify(&value, name);
    }

    /// Modify the value under `name` in place and notify listeners
    pub fn update(&self, name: Option<&str>, f: impl FnOnce(&mut C)) {
        let value = {
            let mut entry = self
                .values
                .entry(name.unwrap_or_default().to_owned())
                .or_default();
            f(entry.value_mut());
            entry.value().clone()
        };
        self.notify(&value, name);
    }

    /// Names with a stored value
    pub fn names(&self) -> Vec<String> {
        self.values.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn notify(&self, value: &C, name: Option<&str>) {
        // snapshot so listeners may subscribe or unsubscribe re-entrantly
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(value, name);
        }
    }
}

impl<C> OptionsMonitor<C> for OptionsStore<C>
where
    C: Clone + Default + Send + Sync + 'static,
{
    fn get(&self, name: Option<&str>) -> C {
        self.values
            .get(name.unwrap_or_default())
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }

    fn on_change(&self, listener: ChangeListener<C>) -> ChangeSubscription {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));

        let listeners = Arc::downgrade(&self.listeners);
        ChangeSubscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().retain(|(existing, _)| *existing != id);
            }
        })
    }
}

impl<C> Default for OptionsStore<C>
where
    C: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for OptionsStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsStore")
            .field("names", &self.values.len())
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}
