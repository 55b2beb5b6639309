//! Error types for cfgscope core
//!
//! Provides error handling for:
//! - Service construction failures (factory errors)
//! - Caller-facing scope acquisition and handle misuse
//! - Background swap and shutdown failures

use std::error::Error as StdError;

/// Boxed error source carried by [`FactoryError`]
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Service construction failed
///
/// Returned by a [`ServiceFactory`](crate::ServiceFactory). Fatal when raised
/// while building a manager, reported and skipped when raised during a swap.
#[derive(Debug, thiserror::Error)]
#[error("service construction failed: {message}")]
pub struct FactoryError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl FactoryError {
    /// Create factory error from a message
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create factory error wrapping an underlying cause
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Human readable message
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for FactoryError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for FactoryError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors surfaced to callers acquiring or using a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// The caller's cancellation token fired while waiting for the gate
    #[error("scope acquisition cancelled")]
    Cancelled,

    /// The manager has been shut down
    #[error("manager has been shut down")]
    ShutDown,

    /// Gate is closed and the caller asked not to wait
    #[error("service unavailable while a swap is draining")]
    Unavailable,

    /// The handle was already released
    #[error("scope handle already released")]
    Released,
}

/// Errors raised by the swap engine and manager lifecycle
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// Factory failed to build a service instance
    #[error(transparent)]
    Construction(#[from] FactoryError),

    /// Resources were still referenced after the final drain
    #[error("{count} resource(s) still waiting for phase out at shutdown")]
    OutstandingResources {
        /// Number of unreleased resources
        count: usize,
    },

    /// The background loop terminated abnormally
    #[error("background task failed: {0}")]
    BackgroundTask(String),

    /// Shutdown was already performed
    #[error("manager already shut down")]
    AlreadyShutDown,

    /// Manual tick requested on a manager owned by its background task
    #[error("manager is driven by its background task")]
    BackgroundDriven,

    /// No tokio runtime available to spawn the background task
    #[error("no tokio runtime available to drive the manager")]
    NoRuntime,
}

impl SwapError {
    /// Check if a later tick may succeed where this one failed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Construction(_))
    }

    /// Check if error should be treated as unrecoverable by the caller
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OutstandingResources { .. } | Self::BackgroundTask(_)
        )
    }
}

/// Convenience result alias for factories
pub type FactoryResult<T> = Result<T, FactoryError>;
