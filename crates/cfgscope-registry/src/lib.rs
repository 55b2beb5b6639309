//! cfgscope Registry
//!
//! Registration glue around [`cfgscope_core::ScopedServiceManager`].
//!
//! # Core Concepts
//!
//! - [`ServiceRegistry`]: One manager per (service type, optional key)
//! - [`OptionsStore`]: Named option values feeding bound managers
//! - [`RequestScope`]: Resolves each service once per request and releases
//!   everything when the request ends
//!
//! # Example
//!
//! ```rust,ignore
//! use cfgscope_registry::{OptionsStore, RequestScope, ServiceRegistry};
//!
//! let registry = ServiceRegistry::new();
//! let store = Arc::new(OptionsStore::<WorkerOptions>::new());
//!
//! registry.register_bound(Some("first"), store.clone(), Some("first"), Worker::from_options, ScopeOptions::default())?;
//!
//! let scope = RequestScope::new(&registry, CancellationToken::new());
//! let worker = scope.resolve::<WorkerOptions, Worker>(Some("first")).await?;
//! worker.service()?.run();
//! scope.end();
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod error;
mod options_store;
mod registry;
mod request_scope;

// Re-exports
pub use error::RegistryError;
pub use options_store::OptionsStore;
pub use registry::{ManagedService, RegistrationKey, ServiceRegistry};
pub use request_scope::RequestScope;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
