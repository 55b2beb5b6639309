//! Service construction strategies
//!
//! The swap engine only sees [`ServiceFactory`]. Which concrete factory is used
//! is decided at registration time:
//! - [`FnFactory`]: user closure (any `Fn(&C) -> Result<T, FactoryError>` also works directly)
//! - [`KeyedFnFactory`]: user closure that also receives the registration key
//! - [`ConstructorFactory`]: builds the service through [`FromConfig`]

use crate::error::FactoryError;
use std::fmt;
use std::marker::PhantomData;

/// Builds a service instance from one configuration snapshot
///
/// Called once synchronously when a manager is built, then from the
/// background task on every accepted configuration change.
pub trait ServiceFactory<C, T>: Send + Sync {
    /// Construct a service for `config`
    ///
    /// # Errors
    /// Returns `FactoryError` when the service cannot be built for this
    /// configuration. The previous service stays current.
    fn create(&self, config: &C) -> Result<T, FactoryError>;
}

impl<C, T, F> ServiceFactory<C, T> for F
where
    F: Fn(&C) -> Result<T, FactoryError> + Send + Sync,
{
    fn create(&self, config: &C) -> Result<T, FactoryError> {
        self(config)
    }
}

/// Factory backed by an infallible closure
pub struct FnFactory<F> {
    f: F,
}

impl<F> FnFactory<F> {
    /// Wrap closure
    #[inline]
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFactory").finish_non_exhaustive()
    }
}

impl<C, T, F> ServiceFactory<C, T> for FnFactory<F>
where
    F: Fn(&C) -> T + Send + Sync,
{
    fn create(&self, config: &C) -> Result<T, FactoryError> {
        Ok((self.f)(config))
    }
}

/// Factory whose closure also receives the registration key
pub struct KeyedFnFactory<K, F> {
    key: K,
    f: F,
}

impl<K, F> KeyedFnFactory<K, F> {
    /// Bind closure to a key
    #[inline]
    #[must_use]
    pub fn new(key: K, f: F) -> Self {
        Self { key, f }
    }

    /// Registration key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: fmt::Debug, F> fmt::Debug for KeyedFnFactory<K, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedFnFactory")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<C, T, K, F> ServiceFactory<C, T> for KeyedFnFactory<K, F>
where
    K: Send + Sync,
    F: Fn(&K, &C) -> Result<T, FactoryError> + Send + Sync,
{
    fn create(&self, config: &C) -> Result<T, FactoryError> {
        (self.f)(&self.key, config)
    }
}

/// Service types that know how to build themselves from a configuration
pub trait FromConfig<C>: Sized {
    /// Build from configuration
    ///
    /// # Errors
    /// Returns `FactoryError` if the configuration is unusable.
    fn from_config(config: &C) -> Result<Self, FactoryError>;
}

/// Factory delegating to [`FromConfig`]
pub struct ConstructorFactory<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ConstructorFactory<T> {
    /// Create constructor factory
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ConstructorFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ConstructorFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConstructorFactory")
    }
}

impl<C, T: FromConfig<C>> ServiceFactory<C, T> for ConstructorFactory<T> {
    fn create(&self, config: &C) -> Result<T, FactoryError> {
        T::from_config(config)
    }
}
