//! Lock-free queues feeding and draining the swap engine
//!
//! - [`ChangeQueue`]: configuration values pushed by the change source from
//!   any thread, consumed latest-wins by the background task
//! - [`DisposalQueue`]: instances whose strong count reached zero, disposed
//!   FIFO by the background task or during shutdown; once detached from its
//!   engine, late releases are disposed on the runtime instead

use crate::dispose::Dispose;
use crate::resource::ResourceId;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Multi-producer queue of incoming configuration values
pub struct ChangeQueue<C> {
    pending: SegQueue<C>,
    received: AtomicU64,
}

impl<C> ChangeQueue<C> {
    /// Create empty queue
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: SegQueue::new(),
            received: AtomicU64::new(0),
        }
    }

    /// Enqueue a configuration value; safe from any thread
    #[inline]
    pub fn push(&self, config: C) {
        self.pending.push(config);
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Drain everything queued so far and keep only the most recent value
    ///
    /// Intermediate values are dropped.
    pub fn take_latest(&self) -> Option<C> {
        let mut latest = None;
        while let Some(next) = self.pending.pop() {
            latest = Some(next);
        }
        latest
    }

    /// Number of values waiting
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is waiting
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total values ever received
    #[inline]
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl<C> Default for ChangeQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for ChangeQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeQueue")
            .field("pending", &self.pending.len())
            .field("received", &self.received())
            .finish()
    }
}

/// Queue of released instances awaiting disposal
pub struct DisposalQueue<T> {
    released: SegQueue<(ResourceId, Arc<T>)>,
    disposed: Arc<AtomicU64>,
    detached: AtomicBool,
    runtime: Mutex<Option<Handle>>,
}

impl<T: Dispose> DisposalQueue<T> {
    /// Create empty queue
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            released: SegQueue::new(),
            disposed: Arc::new(AtomicU64::new(0)),
            detached: AtomicBool::new(false),
            runtime: Mutex::new(None),
        }
    }

    /// Hand an instance over for disposal
    pub fn push(&self, id: ResourceId, service: Arc<T>) {
        self.released.push((id, service));
        // a concurrent detach may have flushed before our push landed
        if self.detached.load(Ordering::SeqCst) {
            self.flush_detached();
        }
    }

    /// Stop waiting for [`drain`](Self::drain) calls
    ///
    /// Everything queued now or pushed later is disposed on `runtime`, or
    /// synchronously through [`Dispose::dispose`] when there is none.
    pub fn detach(&self, runtime: Option<Handle>) {
        *self.runtime.lock() = runtime;
        self.detached.store(true, Ordering::SeqCst);
        self.flush_detached();
    }

    /// Whether [`detach`](Self::detach) was called
    #[inline]
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    fn flush_detached(&self) {
        let runtime = self.runtime.lock().clone();
        while let Some((id, service)) = self.released.pop() {
            let disposed = Arc::clone(&self.disposed);
            match &runtime {
                Some(handle) => {
                    handle.spawn(async move {
                        tracing::debug!(resource_id = %id, "disposing service released after shutdown");
                        service.dispose_async().await;
                        disposed.fetch_add(1, Ordering::Relaxed);
                    });
                }
                None => {
                    tracing::debug!(resource_id = %id, "no runtime, disposing synchronously");
                    service.dispose();
                    disposed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Dispose everything queued, oldest first
    ///
    /// Returns the ids disposed in this call.
    pub async fn drain(&self) -> Vec<ResourceId> {
        let mut ids = Vec::new();
        while let Some((id, service)) = self.released.pop() {
            tracing::debug!(resource_id = %id, "disposing service");
            service.dispose_async().await;
            drop(service);
            self.disposed.fetch_add(1, Ordering::Relaxed);
            ids.push(id);
        }
        ids
    }

    /// Number of instances waiting
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.released.len()
    }

    /// Check if nothing is waiting
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.released.is_empty()
    }

    /// Total instances disposed so far
    #[inline]
    #[must_use]
    pub fn disposed(&self) -> u64 {
        self.disposed.load(Ordering::Relaxed)
    }
}

impl<T: Dispose> Default for DisposalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for DisposalQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposalQueue")
            .field("pending", &self.released.len())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Named {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Dispose for Named {
        fn dispose(&self) {
            self.log.lock().push(self.name);
        }
    }

    #[test]
    fn take_latest_on_empty_queue() {
        let queue = ChangeQueue::<u32>::new();
        assert_eq!(queue.take_latest(), None);
    }

    #[test]
    fn take_latest_drains_queue() {
        let queue = ChangeQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.take_latest(), Some(3));
        assert!(queue.is_empty());
        assert_eq!(queue.received(), 3);
    }

    #[tokio::test]
    async fn drain_disposes_in_fifo_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = DisposalQueue::new();

        for name in ["first", "second", "third"] {
            queue.push(
                ResourceId::next(),
                Arc::new(Named {
                    name,
                    log: Arc::clone(&log),
                }),
            );
        }

        let ids = queue.drain().await;
        assert_eq!(ids.len(), 3);
        assert_eq!(log.lock().as_slice(), &["first", "second", "third"]);
        assert_eq!(queue.disposed(), 3);
        assert!(queue.drain().await.is_empty());
    }

    #[tokio::test]
    async fn detached_queue_disposes_late_pushes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = DisposalQueue::new();
        let named = |name| {
            Arc::new(Named {
                name,
                log: Arc::clone(&log),
            })
        };

        queue.push(ResourceId::next(), named("queued"));
        queue.detach(Some(Handle::current()));
        assert!(queue.is_detached());
        queue.push(ResourceId::next(), named("late"));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(log.lock().as_slice(), &["queued", "late"]);
        assert_eq!(queue.disposed(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn detached_without_runtime_disposes_inline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = DisposalQueue::new();
        queue.detach(None);

        queue.push(
            ResourceId::next(),
            Arc::new(Named {
                name: "inline",
                log: Arc::clone(&log),
            }),
        );
        assert_eq!(log.lock().as_slice(), &["inline"]);
        assert_eq!(queue.disposed(), 1);
    }

    proptest! {
        #[test]
        fn prop_take_latest_returns_last_pushed(values in prop::collection::vec(any::<u16>(), 1..64)) {
            let queue = ChangeQueue::new();
            for v in &values {
                queue.push(*v);
            }

            prop_assert_eq!(queue.take_latest(), values.last().copied());
            prop_assert!(queue.is_empty());
        }
    }
}
