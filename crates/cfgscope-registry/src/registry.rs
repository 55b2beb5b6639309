//! Keyed registry of scoped service managers
//!
//! Provides [`ServiceRegistry`], mapping (service type, optional key) to one
//! manager each. Several managers for the same service type coexist under
//! different keys; the unkeyed registration is key `None`.

use crate::error::RegistryError;
use async_trait::async_trait;
use cfgscope_core::{
    Dispose, GateState, ManagerBuilder, ManagerStats, OptionsMonitor, ScopeOptions,
    ScopedServiceManager, ServiceFactory, ShutdownReport, SwapError,
};
use dashmap::DashMap;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Identity of one registration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationKey {
    type_id: TypeId,
    type_name: &'static str,
    key: Option<String>,
}

impl RegistrationKey {
    /// Key for service type `T` under `key`
    #[must_use]
    pub fn of<T: 'static>(key: Option<&str>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            key: key.map(str::to_owned),
        }
    }

    /// Service type name
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Registration key, `None` for the unkeyed registration
    #[inline]
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}[{key}]", self.type_name),
            None => f.write_str(self.type_name),
        }
    }
}

/// Type-erased view of a manager held by the registry
#[async_trait]
pub trait ManagedService: Send + Sync + 'static {
    /// Manager name
    fn name(&self) -> &str;

    /// Point-in-time counters
    fn stats(&self) -> ManagerStats;

    /// Availability gate state
    fn gate_state(&self) -> GateState;

    /// Upcast for typed lookup
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Shut the manager down
    async fn shutdown(&self) -> Result<ShutdownReport, SwapError>;
}

#[async_trait]
impl<C, T> ManagedService for ScopedServiceManager<C, T>
where
    C: Send + Sync + 'static,
    T: Dispose,
{
    fn name(&self) -> &str {
        Self::name(self)
    }

    fn stats(&self) -> ManagerStats {
        Self::stats(self)
    }

    fn gate_state(&self) -> GateState {
        Self::gate_state(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    async fn shutdown(&self) -> Result<ShutdownReport, SwapError> {
        Self::shutdown(self).await
    }
}

/// Registry of managers keyed by service type and optional key
#[derive(Default)]
pub struct ServiceRegistry {
    managers: DashMap<RegistrationKey, Arc<dyn ManagedService>>,
}

impl ServiceRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            managers: DashMap::new(),
        }
    }

    /// Register a manager starting from `initial`
    ///
    /// # Errors
    /// `AlreadyRegistered` for a duplicate (type, key); `Construction` if
    /// the initial service cannot be built.
    pub fn register<C, T>(
        &self,
        key: Option<&str>,
        initial: C,
        factory: impl ServiceFactory<C, T> + 'static,
        options: ScopeOptions,
    ) -> Result<Arc<ScopedServiceManager<C, T>>, RegistryError>
    where
        C: PartialEq + Send + Sync + 'static,
        T: Dispose,
    {
        self.register_builder(key, ManagerBuilder::new(initial, factory).with_options(options))
    }

    /// Register a manager bound to the named slot `options_name` of `monitor`
    ///
    /// # Errors
    /// `AlreadyRegistered` for a duplicate (type, key); `Construction` if
    /// the initial service cannot be built.
    pub fn register_bound<C, T>(
        &self,
        key: Option<&str>,
        monitor: Arc<dyn OptionsMonitor<C>>,
        options_name: Option<&str>,
        factory: impl ServiceFactory<C, T> + 'static,
        options: ScopeOptions,
    ) -> Result<Arc<ScopedServiceManager<C, T>>, RegistryError>
    where
        C: Clone + PartialEq + Send + Sync + 'static,
        T: Dispose,
    {
        let builder = ManagerBuilder::from_monitor(monitor, options_name, factory).with_options(options);
        self.register_builder(key, builder)
    }

    /// Register a manager from a fully configured builder
    ///
    /// The manager is named after the registration. Needs a tokio runtime.
    ///
    /// # Errors
    /// `AlreadyRegistered` for a duplicate (type, key); `Construction` if
    /// the manager cannot be built.
    pub fn register_builder<C, T>(
        &self,
        key: Option<&str>,
        builder: ManagerBuilder<C, T>,
    ) -> Result<Arc<ScopedServiceManager<C, T>>, RegistryError>
    where
        C: Send + Sync + 'static,
        T: Dispose,
    {
        let reg_key = RegistrationKey::of::<T>(key);
        if self.managers.contains_key(&reg_key) {
            return Err(RegistryError::AlreadyRegistered(reg_key));
        }

        let manager = Arc::new(builder.with_name(reg_key.to_string()).build()?);

        // factory ran outside the map lock; re-check for a concurrent winner
        match self.managers.entry(reg_key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(RegistryError::AlreadyRegistered(entry.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                tracing::info!(registration = %entry.key(), "service registered");
                entry.insert(Arc::clone(&manager) as Arc<dyn ManagedService>);
                Ok(manager)
            }
        }
    }

    /// Typed manager registered for service `T` under `key`
    ///
    /// # Errors
    /// `NotRegistered` if absent, `TypeMismatch` if registered with another
    /// configuration type.
    pub fn get<C, T>(&self, key: Option<&str>) -> Result<Arc<ScopedServiceManager<C, T>>, RegistryError>
    where
        C: Send + Sync + 'static,
        T: Dispose,
    {
        let reg_key = RegistrationKey::of::<T>(key);
        let managed = self
            .managers
            .get(&reg_key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::NotRegistered(reg_key.clone()))?;

        managed
            .into_any()
            .downcast::<ScopedServiceManager<C, T>>()
            .map_err(|_| RegistryError::TypeMismatch {
                key: reg_key,
                requested: type_name::<C>(),
            })
    }

    /// Check if a registration exists
    #[must_use]
    pub fn contains<T: 'static>(&self, key: Option<&str>) -> bool {
        self.managers.contains_key(&RegistrationKey::of::<T>(key))
    }

    /// All registration keys
    pub fn keys(&self) -> Vec<RegistrationKey> {
        self.managers.iter().map(|e| e.key().clone()).collect()
    }

    /// Counters of every registered manager
    pub fn stats(&self) -> Vec<(RegistrationKey, ManagerStats)> {
        self.managers
            .iter()
            .map(|e| (e.key().clone(), e.value().stats()))
            .collect()
    }

    /// Number of registrations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.managers.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Shut down every registered manager
    ///
    /// Managers stay registered; later acquisitions fail with `ShutDown`.
    pub async fn shutdown_all(&self) -> Vec<(RegistrationKey, Result<ShutdownReport, SwapError>)> {
        let managers: Vec<_> = self
            .managers
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut results = Vec::with_capacity(managers.len());
        for (key, manager) in managers {
            let result = manager.shutdown().await;
            if let Err(err) = &result {
                tracing::error!(registration = %key, error = %err, "manager shutdown failed");
            }
            results.push((key, result));
        }
        results
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("registrations", &self.managers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgscope_core::FactoryError;

    struct Counter(u32);

    impl Dispose for Counter {}

    fn counter(config: &u32) -> Result<Counter, FactoryError> {
        Ok(Counter(*config))
    }

    #[test]
    fn registration_key_display() {
        assert_eq!(RegistrationKey::of::<u8>(None).to_string(), "u8");
        assert_eq!(RegistrationKey::of::<u8>(Some("a")).to_string(), "u8[a]");
        assert_ne!(RegistrationKey::of::<u8>(None), RegistrationKey::of::<u8>(Some("")));
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let registry = ServiceRegistry::new();
        registry
            .register(Some("a"), 1_u32, counter, ScopeOptions::default())
            .unwrap();

        let err = registry
            .register(Some("a"), 2_u32, counter, ScopeOptions::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
        assert!(err.is_configuration_error());

        registry
            .register(Some("b"), 2_u32, counter, ScopeOptions::default())
            .unwrap();
        assert_eq!(registry.len(), 2);
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn typed_lookup() {
        let registry = ServiceRegistry::new();
        registry
            .register(None, 3_u32, counter, ScopeOptions::default())
            .unwrap();

        let manager = registry.get::<u32, Counter>(None).unwrap();
        assert_eq!(manager.try_acquire().unwrap().service().unwrap().0, 3);
        assert_eq!(manager.name(), RegistrationKey::of::<Counter>(None).to_string());

        assert!(matches!(
            registry.get::<u64, Counter>(None),
            Err(RegistryError::TypeMismatch { .. })
        ));
        assert!(matches!(
            registry.get::<u32, Counter>(Some("other")),
            Err(RegistryError::NotRegistered(_))
        ));
        registry.shutdown_all().await;
    }
}
