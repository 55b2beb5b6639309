//! Disposal capability for managed services
//!
//! A service declares how it releases external resources by implementing
//! [`Dispose`]. Services with nothing to release use an empty impl.

use std::sync::Arc;

/// Release behaviour of a managed service
///
/// Override [`dispose`](Dispose::dispose) for synchronous teardown or
/// [`dispose_async`](Dispose::dispose_async) for asynchronous teardown. The
/// disposal queue always awaits `dispose_async`, whose default delegates to
/// `dispose`, so an asynchronous override takes precedence.
#[async_trait::async_trait]
pub trait Dispose: Send + Sync + 'static {
    /// Synchronous teardown
    fn dispose(&self) {}

    /// Asynchronous teardown
    async fn dispose_async(&self) {
        self.dispose();
    }
}

#[async_trait::async_trait]
impl<T: Dispose> Dispose for Arc<T> {
    fn dispose(&self) {
        (**self).dispose();
    }

    async fn dispose_async(&self) {
        (**self).dispose_async().await;
    }
}

#[async_trait::async_trait]
impl<T: Dispose + ?Sized> Dispose for Box<T> {
    fn dispose(&self) {
        (**self).dispose();
    }

    async fn dispose_async(&self) {
        (**self).dispose_async().await;
    }
}
