//! Request-scoped service access
//!
//! A [`RequestScope`] resolves each registered service at most once: the
//! first resolution acquires a scope handle, later ones reuse it. Every
//! handle is released when the request scope ends.

use crate::error::RegistryError;
use crate::registry::{RegistrationKey, ServiceRegistry};
use cfgscope_core::{Dispose, ScopeHandle};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type Held = Arc<dyn Any + Send + Sync>;

/// Per-request cache of acquired scope handles
pub struct RequestScope<'r> {
    registry: &'r ServiceRegistry,
    cancel: CancellationToken,
    handles: Mutex<HashMap<RegistrationKey, Held>>,
}

impl<'r> RequestScope<'r> {
    /// Open a scope whose acquisitions honour `cancel`
    #[must_use]
    pub fn new(registry: &'r ServiceRegistry, cancel: CancellationToken) -> Self {
        Self {
            registry,
            cancel,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for service `T` under `key`, acquired on first use
    ///
    /// # Errors
    /// Lookup errors from the registry, or `Scope` if acquisition was
    /// cancelled or the manager is shut down.
    pub async fn resolve<C, T>(&self, key: Option<&str>) -> Result<Arc<ScopeHandle<C, T>>, RegistryError>
    where
        C: Send + Sync + 'static,
        T: Dispose,
    {
        let reg_key = RegistrationKey::of::<T>(key);
        let cached = self.handles.lock().get(&reg_key).cloned();
        if let Some(held) = cached {
            return downcast::<C, T>(held, reg_key);
        }

        let manager = self.registry.get::<C, T>(key)?;
        let handle: Held = Arc::new(manager.acquire(&self.cancel).await?);

        // a concurrent resolve may have won; keep the first handle
        let held = Arc::clone(
            self.handles
                .lock()
                .entry(reg_key.clone())
                .or_insert(handle),
        );
        downcast::<C, T>(held, reg_key)
    }

    /// Number of distinct services resolved so far
    #[must_use]
    pub fn resolved(&self) -> usize {
        self.handles.lock().len()
    }

    /// Cancellation token of this scope
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// End the scope and release every handle it holds
    ///
    /// Returns the number of handles released. Clones handed out by
    /// [`resolve`](Self::resolve) keep their handle alive until dropped.
    pub fn end(self) -> usize {
        let handles = std::mem::take(&mut *self.handles.lock());
        handles.len()
    }
}

fn downcast<C, T>(held: Held, key: RegistrationKey) -> Result<Arc<ScopeHandle<C, T>>, RegistryError>
where
    C: Send + Sync + 'static,
    T: Dispose,
{
    held.downcast::<ScopeHandle<C, T>>()
        .map_err(|_| RegistryError::TypeMismatch {
            key,
            requested: std::any::type_name::<C>(),
        })
}

impl fmt::Debug for RequestScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("resolved", &self.resolved())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
