//! cfgscope Core
//!
//! Hot-swap manager for configuration-scoped, reference-counted services.
//!
//! # Core Concepts
//!
//! - [`ScopedServiceManager`]: Owns the current service and rebuilds it when
//!   the configuration changes
//! - [`ScopeHandle`]: One acquired use of the service; pins the instance and
//!   the configuration it was built from
//! - [`ServiceFactory`]: Builds a service from a configuration snapshot
//! - [`Dispose`]: Cleanup run once the last scope on an instance ends
//! - [`SwapStrategy`]: Non-blocking (old and new coexist) or blocking (old
//!   drains before new is built)
//!
//! # Architecture
//!
//! ```text
//! consume_change ─→ ChangeQueue ─→ SwapEngine::tick ─→ ArcSwap<current> ─→ acquire
//!                                      │                    ↑
//!                                      ↓                  Gate
//!                                PhaseOutSet ─→ DisposalQueue ─→ dispose_async
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use cfgscope_core::{ManagerBuilder, ScopeOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let manager = ManagerBuilder::new(initial, |cfg: &DbConfig| Pool::connect(cfg))
//!     .with_name("db")
//!     .with_options(ScopeOptions::new().with_warn_after(Duration::from_secs(30)))
//!     .build()?;
//!
//! manager.consume_change(updated);
//!
//! let scope = manager.acquire(&CancellationToken::new()).await?;
//! scope.service()?.query("select 1").await?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod diagnostics;
mod dispose;
mod engine;
mod error;
mod factory;
mod gate;
mod handle;
mod manager;
mod monitor;
mod options;
mod phase_out;
mod queue;
mod resource;

// Re-exports
pub use diagnostics::{Diagnostic, DiagnosticLog, DiagnosticRecord, DiagnosticSink, TracingSink};
pub use dispose::Dispose;
pub use engine::{
    ConfigEq, ManagerStats, ShutdownReport, SwapEngine, SwapStrategy, TickOutcome, TickReport,
};
pub use error::{BoxError, FactoryError, FactoryResult, ScopeError, SwapError};
pub use factory::{ConstructorFactory, FnFactory, FromConfig, KeyedFnFactory, ServiceFactory};
pub use gate::{Gate, GateState};
pub use handle::ScopeHandle;
pub use manager::{ManagerBuilder, ScopedServiceManager, DEFAULT_MANAGER_NAME};
pub use monitor::{
    name_matches, ChangeConsumer, ChangeListener, ChangeSubscription, OptionsMonitor,
};
pub use options::{ScopeOptions, DEFAULT_POLL_INTERVAL};
pub use phase_out::{Lingering, PhaseOutEntry, PhaseOutSet, SweepReport};
pub use queue::{ChangeQueue, DisposalQueue};
pub use resource::{OnZero, RefCountedResource, ResourceId, StrongRef, WeakRef};

/// Commonly used items
pub mod prelude {
    pub use crate::{
        ChangeConsumer, Dispose, FactoryError, ManagerBuilder, OptionsMonitor, ScopeError,
        ScopeHandle, ScopeOptions, ScopedServiceManager, ServiceFactory, SwapError,
    };
    pub use tokio_util::sync::CancellationToken;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
