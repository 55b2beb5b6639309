//! Strong/weak reference-counted service wrapper
//!
//! A [`RefCountedResource`] owns one service instance and an explicit strong
//! count. The count starts at one (the manager's own hold). When it drops to
//! zero the instance is handed to the `on_zero` callback exactly once, which
//! enqueues it for disposal; the releasing thread never disposes inline. The
//! resource counts as released only after that hand-off returned, so an
//! observer never sees it gone before its instance is queued.
//!
//! [`WeakRef`] observes liveness without extending the instance's lifetime:
//! upgrading succeeds only while the count is still above zero, and the check
//! and increment happen in one atomic step.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Callback invoked with the instance once the last strong reference is gone
pub type OnZero<T> = Arc<dyn Fn(ResourceId, Arc<T>) + Send + Sync>;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a wrapped service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Allocate next identifier
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    #[inline]
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared cell holding one service instance and its strong count
pub struct RefCountedResource<T> {
    id: ResourceId,
    strong: AtomicUsize,
    handed_off: AtomicBool,
    service: Arc<T>,
    on_zero: OnZero<T>,
}

impl<T: Send + Sync + 'static> RefCountedResource<T> {
    /// Wrap `service`, returning the first strong reference (count = 1)
    pub fn create(service: T, on_zero: OnZero<T>) -> StrongRef<T> {
        let resource = Arc::new(Self {
            id: ResourceId::next(),
            strong: AtomicUsize::new(1),
            handed_off: AtomicBool::new(false),
            service: Arc::new(service),
            on_zero,
        });
        StrongRef { resource }
    }

    /// Take a strong reference if the resource has not yet reached zero
    ///
    /// Used for the still-current resource, which may be released by the
    /// background task at any moment.
    pub fn try_acquire(self: &Arc<Self>) -> Option<StrongRef<T>> {
        self.strong
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .ok()?;

        Some(StrongRef {
            resource: Arc::clone(self),
        })
    }

    /// Identifier of this resource
    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Current strong count
    #[inline]
    #[must_use]
    pub fn strong_count(&self) -> usize {
        self.strong.load(Ordering::Acquire)
    }

    /// Whether the instance has been handed off for disposal
    #[inline]
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.handed_off.load(Ordering::Acquire)
    }

    fn decrement(&self) {
        let previous = self.strong.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "strong count underflow on {}", self.id);

        // zero is terminal: try_acquire never revives it, so this runs once
        if previous == 1 {
            tracing::trace!(resource_id = %self.id, "strong count reached zero");
            (self.on_zero)(self.id, Arc::clone(&self.service));
            self.handed_off.store(true, Ordering::Release);
        }
    }
}

impl<T> fmt::Debug for RefCountedResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCountedResource")
            .field("id", &self.id)
            .field("strong", &self.strong.load(Ordering::Relaxed))
            .field("handed_off", &self.handed_off.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// One strong reference; releases on drop
pub struct StrongRef<T: Send + Sync + 'static> {
    resource: Arc<RefCountedResource<T>>,
}

impl<T: Send + Sync + 'static> StrongRef<T> {
    /// Add another strong reference to the same resource
    #[must_use]
    pub fn acquire(&self) -> StrongRef<T> {
        // we hold one reference, so the count cannot be zero
        self.resource.strong.fetch_add(1, Ordering::AcqRel);
        StrongRef {
            resource: Arc::clone(&self.resource),
        }
    }

    /// Non-owning observer of the same resource
    #[must_use]
    pub fn downgrade(&self) -> WeakRef<T> {
        WeakRef {
            id: self.resource.id,
            resource: Arc::downgrade(&self.resource),
        }
    }

    /// Release this reference
    #[inline]
    pub fn release(self) {
        drop(self);
    }

    /// Wrapped service
    #[inline]
    #[must_use]
    pub fn service(&self) -> &T {
        &self.resource.service
    }

    /// Underlying shared cell
    #[inline]
    #[must_use]
    pub fn resource(&self) -> &Arc<RefCountedResource<T>> {
        &self.resource
    }

    /// Identifier of the wrapped resource
    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.resource.id
    }
}

impl<T: Send + Sync + 'static> Drop for StrongRef<T> {
    fn drop(&mut self) {
        self.resource.decrement();
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for StrongRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StrongRef").field(&self.resource).finish()
    }
}

/// Weak back-reference used by the phase-out set
pub struct WeakRef<T> {
    id: ResourceId,
    resource: Weak<RefCountedResource<T>>,
}

impl<T: Send + Sync + 'static> WeakRef<T> {
    /// Try to obtain a strong reference; `None` once the count hit zero
    #[must_use]
    pub fn upgrade(&self) -> Option<StrongRef<T>> {
        self.resource.upgrade()?.try_acquire()
    }

    /// Whether the resource has been released for disposal
    #[must_use]
    pub fn is_gone(&self) -> bool {
        self.resource
            .upgrade()
            .map_or(true, |resource| resource.is_released())
    }

    /// Strong count observed right now (zero once gone)
    #[must_use]
    pub fn strong_count(&self) -> usize {
        self.resource
            .upgrade()
            .map_or(0, |resource| resource.strong_count())
    }

    /// Identifier of the observed resource
    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            resource: self.resource.clone(),
        }
    }
}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakRef").field(&self.id).finish()
    }
}
