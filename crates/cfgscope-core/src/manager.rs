//! Scoped service manager
//!
//! Public facade tying together the change queue, the availability gate, the
//! swap engine and the background task. Callers push configuration changes
//! and acquire scope handles; everything else happens off their thread.

use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::dispose::Dispose;
use crate::engine::{
    ConfigEq, ManagerStats, Shared, ShutdownReport, SwapEngine, SwapStrategy, TickReport,
};
use crate::error::{ScopeError, SwapError};
use crate::factory::ServiceFactory;
use crate::gate::GateState;
use crate::handle::ScopeHandle;
use crate::monitor::{name_matches, ChangeConsumer, ChangeListener, ChangeSubscription, OptionsMonitor};
use crate::options::ScopeOptions;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Name used when none is configured
pub const DEFAULT_MANAGER_NAME: &str = "scoped-service";

type Binder<C, T> = Box<dyn FnOnce(&Arc<Shared<C, T>>) -> (C, ChangeSubscription) + Send>;

enum Initial<C, T> {
    Value(C),
    Monitor(Binder<C, T>),
}

/// Builder for [`ScopedServiceManager`]
pub struct ManagerBuilder<C, T> {
    initial: Initial<C, T>,
    factory: Arc<dyn ServiceFactory<C, T>>,
    options: ScopeOptions,
    name: String,
    sink: Arc<dyn DiagnosticSink>,
    equals: Option<ConfigEq<C>>,
}

impl<C, T> ManagerBuilder<C, T>
where
    C: PartialEq + Send + Sync + 'static,
    T: Dispose,
{
    /// Manager starting from `initial`, suppressing changes equal by value
    pub fn new(initial: C, factory: impl ServiceFactory<C, T> + 'static) -> Self {
        Self::with_initial(Initial::Value(initial), factory, Some(<C as PartialEq>::eq))
    }

    /// Manager bound to a named slot of an options monitor
    ///
    /// The listener is registered before the initial value is read, so a
    /// change racing with construction is never lost. Changes stored under
    /// other names are ignored.
    pub fn from_monitor(
        monitor: Arc<dyn OptionsMonitor<C>>,
        options_name: Option<&str>,
        factory: impl ServiceFactory<C, T> + 'static,
    ) -> Self
    where
        C: Clone,
    {
        let bound = options_name.map(str::to_owned);
        let binder: Binder<C, T> = Box::new(move |shared: &Arc<Shared<C, T>>| {
            let weak = Arc::downgrade(shared);
            let filter = bound.clone();
            let listener: ChangeListener<C> = Arc::new(move |config: &C, changed: Option<&str>| {
                if !name_matches(filter.as_deref(), changed) {
                    return;
                }
                if let Some(shared) = weak.upgrade() {
                    shared.changes().push(config.clone());
                }
            });

            let subscription = monitor.on_change(listener);
            (monitor.get(bound.as_deref()), subscription)
        });

        Self::with_initial(Initial::Monitor(binder), factory, Some(<C as PartialEq>::eq))
    }
}

impl<C, T> ManagerBuilder<C, T>
where
    C: Send + Sync + 'static,
    T: Dispose,
{
    fn with_initial(
        initial: Initial<C, T>,
        factory: impl ServiceFactory<C, T> + 'static,
        equals: Option<ConfigEq<C>>,
    ) -> Self {
        Self {
            initial,
            factory: Arc::new(factory),
            options: ScopeOptions::default(),
            name: DEFAULT_MANAGER_NAME.to_owned(),
            sink: Arc::new(TracingSink),
            equals,
        }
    }

    /// Manager for a configuration type without value equality
    ///
    /// Every change notification triggers a swap, even for identical
    /// values. An `EqualityUnavailable` diagnostic is emitted at build.
    pub fn without_equality(initial: C, factory: impl ServiceFactory<C, T> + 'static) -> Self {
        Self::with_initial(Initial::Value(initial), factory, None)
    }

    /// With custom equality used to suppress redundant changes
    #[must_use]
    pub fn with_equality(mut self, equals: ConfigEq<C>) -> Self {
        self.equals = Some(equals);
        self
    }

    /// With runtime options
    #[must_use]
    pub fn with_options(mut self, options: ScopeOptions) -> Self {
        self.options = options;
        self
    }

    /// With name used in logs and diagnostics
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// With diagnostic sink
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    fn start(self) -> Result<Parts<C, T>, SwapError> {
        let shared = Arc::new(Shared::new(self.name, self.sink));
        if self.equals.is_none() {
            shared.report(&Diagnostic::EqualityUnavailable {
                manager: shared.name().to_owned(),
            });
        }

        let (initial, subscription) = match self.initial {
            Initial::Value(config) => (config, None),
            Initial::Monitor(bind) => {
                let (config, subscription) = bind(&shared);
                (config, Some(subscription))
            }
        };

        let strategy = SwapStrategy::from_options(&self.options);
        let engine = SwapEngine::start(
            Arc::clone(&shared),
            self.factory,
            self.options.clone(),
            self.equals,
            initial,
        )?;

        Ok(Parts {
            shared,
            engine,
            subscription,
            options: self.options,
            strategy,
        })
    }

    /// Build the manager and spawn its background task
    ///
    /// # Errors
    /// `Construction` if the initial service cannot be built, `NoRuntime`
    /// outside a tokio runtime.
    pub fn build(self) -> Result<ScopedServiceManager<C, T>, SwapError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SwapError::NoRuntime)?;
        let parts = self.start()?;

        let cancel = CancellationToken::new();
        let task = runtime.spawn(run_background(parts.engine, cancel.clone()));
        Ok(ScopedServiceManager::assemble(
            parts.shared,
            Driver::Background(task),
            cancel,
            parts.subscription,
            parts.options,
            parts.strategy,
        ))
    }

    /// Build the manager without a background task
    ///
    /// The caller drives swaps with [`ScopedServiceManager::tick`].
    ///
    /// # Errors
    /// `Construction` if the initial service cannot be built.
    pub fn build_manual(self) -> Result<ScopedServiceManager<C, T>, SwapError> {
        let parts = self.start()?;
        Ok(ScopedServiceManager::assemble(
            parts.shared,
            Driver::Manual(parts.engine),
            CancellationToken::new(),
            parts.subscription,
            parts.options,
            parts.strategy,
        ))
    }
}

impl<C, T> fmt::Debug for ManagerBuilder<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("equality", &self.equals.is_some())
            .finish_non_exhaustive()
    }
}

struct Parts<C, T: Dispose> {
    shared: Arc<Shared<C, T>>,
    engine: SwapEngine<C, T>,
    subscription: Option<ChangeSubscription>,
    options: ScopeOptions,
    strategy: SwapStrategy,
}

enum Driver<C, T: Dispose> {
    Background(JoinHandle<SwapEngine<C, T>>),
    Manual(SwapEngine<C, T>),
    Stopped,
}

async fn run_background<C, T>(mut engine: SwapEngine<C, T>, cancel: CancellationToken) -> SwapEngine<C, T>
where
    C: Send + Sync + 'static,
    T: Dispose,
{
    let interval = engine.options().poll_interval;
    tracing::debug!(
        manager = engine.name(),
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        "background loop started"
    );

    while !cancel.is_cancelled() {
        if let Err(err) = engine.tick().await {
            // already reported as a diagnostic; retried on the next change
            tracing::debug!(manager = engine.name(), error = %err, "tick failed");
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    tracing::debug!(manager = engine.name(), "background loop stopped");
    engine
}

/// Hot-swap manager for one configuration-scoped service
///
/// Holds the current service instance, rebuilds it when the configuration
/// changes and disposes superseded instances once their last scope ends.
pub struct ScopedServiceManager<C, T: Dispose> {
    shared: Arc<Shared<C, T>>,
    driver: tokio::sync::Mutex<Driver<C, T>>,
    cancel: CancellationToken,
    subscription: Mutex<Option<ChangeSubscription>>,
    options: ScopeOptions,
    strategy: SwapStrategy,
}

impl<C, T> ScopedServiceManager<C, T>
where
    C: Send + Sync + 'static,
    T: Dispose,
{
    fn assemble(
        shared: Arc<Shared<C, T>>,
        driver: Driver<C, T>,
        cancel: CancellationToken,
        subscription: Option<ChangeSubscription>,
        options: ScopeOptions,
        strategy: SwapStrategy,
    ) -> Self {
        Self {
            shared,
            driver: tokio::sync::Mutex::new(driver),
            cancel,
            subscription: Mutex::new(subscription),
            options,
            strategy,
        }
    }

    /// Queue a configuration change; returns immediately
    ///
    /// Values queued before the next tick are coalesced, only the most
    /// recent one is applied.
    pub fn consume_change(&self, config: C) {
        self.shared.changes().push(config);
    }

    /// Acquire a scope on the current service, waiting while a blocking
    /// swap drains
    ///
    /// # Errors
    /// `Cancelled` if `cancel` fires while waiting, `ShutDown` once the
    /// manager has been shut down.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<ScopeHandle<C, T>, ScopeError> {
        loop {
            self.shared.gate().wait_ready(cancel).await?;
            if let Some(handle) = self.shared.try_acquire_current() {
                return Ok(handle);
            }
            // a swap withdrew the current service between the gate check
            // and the acquisition
            tokio::task::yield_now().await;
        }
    }

    /// Acquire a scope only if the gate is open right now
    #[must_use]
    pub fn try_acquire(&self) -> Option<ScopeHandle<C, T>> {
        self.shared.gate().check().ok()?;
        self.shared.try_acquire_current()
    }

    /// Configuration of the current service, `None` while draining or
    /// after shutdown
    #[must_use]
    pub fn current_config(&self) -> Option<Arc<C>> {
        self.shared.current_config()
    }

    /// State of the availability gate
    #[must_use]
    pub fn gate_state(&self) -> GateState {
        self.shared.gate().state()
    }

    /// Point-in-time counters
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        self.shared.stats()
    }

    /// Manager name
    #[must_use]
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Options fixed at build time
    #[must_use]
    pub fn options(&self) -> &ScopeOptions {
        &self.options
    }

    /// Active swap strategy
    #[must_use]
    pub fn strategy(&self) -> SwapStrategy {
        self.strategy
    }

    /// Run one engine iteration on a manually driven manager
    ///
    /// # Errors
    /// `BackgroundDriven` if built with [`ManagerBuilder::build`],
    /// `AlreadyShutDown` after shutdown, otherwise whatever the tick
    /// reports.
    pub async fn tick(&self) -> Result<TickReport, SwapError> {
        match &mut *self.driver.lock().await {
            Driver::Manual(engine) => engine.tick().await,
            Driver::Background(_) => Err(SwapError::BackgroundDriven),
            Driver::Stopped => Err(SwapError::AlreadyShutDown),
        }
    }

    /// Stop the background task, close the gate and dispose every
    /// released service
    ///
    /// Waiters on the gate fail with `ShutDown`.
    ///
    /// # Errors
    /// `AlreadyShutDown` on a second call, `BackgroundTask` if the loop
    /// panicked, `OutstandingResources` when strict checking finds scopes
    /// that were never released.
    pub async fn shutdown(&self) -> Result<ShutdownReport, SwapError> {
        let driver = std::mem::replace(&mut *self.driver.lock().await, Driver::Stopped);
        self.cancel.cancel();
        drop(self.subscription.lock().take());

        let engine = match driver {
            Driver::Background(task) => task.await.map_err(|err| {
                self.shared.gate().set(GateState::Closed);
                tracing::error!(manager = self.shared.name(), error = %err, "background task failed");
                SwapError::BackgroundTask(err.to_string())
            })?,
            Driver::Manual(engine) => engine,
            Driver::Stopped => return Err(SwapError::AlreadyShutDown),
        };

        engine.finish().await
    }
}

impl<C, T> ChangeConsumer<C> for ScopedServiceManager<C, T>
where
    C: Send + Sync + 'static,
    T: Dispose,
{
    fn consume_change(&self, config: C) {
        Self::consume_change(self, config);
    }
}

impl<C, T: Dispose> Drop for ScopedServiceManager<C, T> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if !matches!(self.driver.get_mut(), Driver::Stopped) {
            tracing::debug!(manager = %self.shared.name(), "manager dropped without shutdown");
        }
    }
}

impl<C, T: Dispose> fmt::Debug for ScopedServiceManager<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedServiceManager")
            .field("shared", &self.shared)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}
