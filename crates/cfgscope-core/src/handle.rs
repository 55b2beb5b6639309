//! Consumer-facing scope handle
//!
//! A handle pins one (configuration, service) pair for its whole lifetime.
//! Swaps that happen while it is held never change what it points at.

use crate::error::ScopeError;
use crate::resource::{ResourceId, StrongRef};
use std::fmt;
use std::sync::Arc;

/// One acquired use of a configuration-scoped service
///
/// Holds a strong reference to the resource that was current when it was
/// acquired. Released explicitly with [`release`](Self::release) or
/// implicitly on drop.
pub struct ScopeHandle<C, T: Send + Sync + 'static> {
    strong: Option<StrongRef<T>>,
    config: Arc<C>,
    resource_id: ResourceId,
}

impl<C, T: Send + Sync + 'static> ScopeHandle<C, T> {
    pub(crate) fn new(strong: StrongRef<T>, config: Arc<C>) -> Self {
        let resource_id = strong.id();
        Self {
            strong: Some(strong),
            config,
            resource_id,
        }
    }

    /// The wrapped service
    ///
    /// # Errors
    /// `Released` if the handle was already released.
    pub fn service(&self) -> Result<&T, ScopeError> {
        self.strong
            .as_ref()
            .map(StrongRef::service)
            .ok_or(ScopeError::Released)
    }

    /// Configuration snapshot the service was built from
    #[inline]
    #[must_use]
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Shared configuration snapshot
    #[inline]
    #[must_use]
    pub fn config_arc(&self) -> Arc<C> {
        Arc::clone(&self.config)
    }

    /// Identifier of the underlying resource
    #[inline]
    #[must_use]
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    /// Whether the handle still holds its reference
    #[inline]
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.strong.is_none()
    }

    /// Release the reference now
    ///
    /// # Errors
    /// `Released` on a second call; the count is never decremented twice.
    pub fn release(&mut self) -> Result<(), ScopeError> {
        let strong = self.strong.take().ok_or(ScopeError::Released)?;
        strong.release();
        Ok(())
    }
}

impl<C, T: Send + Sync + 'static> fmt::Debug for ScopeHandle<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("resource_id", &self.resource_id)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::RefCountedResource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn release_is_fail_fast_on_second_call() {
        let zeroes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&zeroes);
        let root = RefCountedResource::create(
            "svc",
            Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut handle = ScopeHandle::new(root.acquire(), Arc::new(1_u8));
        assert_eq!(*handle.service().unwrap(), "svc");
        assert_eq!(*handle.config(), 1);
        assert_eq!(root.resource().strong_count(), 2);

        assert_eq!(handle.release(), Ok(()));
        assert_eq!(handle.release(), Err(ScopeError::Released));
        assert_eq!(handle.service().err(), Some(ScopeError::Released));
        assert_eq!(root.resource().strong_count(), 1);

        root.release();
        assert_eq!(zeroes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_reference() {
        let root = RefCountedResource::create(5_u32, Arc::new(|_, _| {}));
        {
            let handle = ScopeHandle::new(root.acquire(), Arc::new(()));
            assert_eq!(handle.resource_id(), root.id());
            assert_eq!(root.resource().strong_count(), 2);
        }
        assert_eq!(root.resource().strong_count(), 1);
    }
}
