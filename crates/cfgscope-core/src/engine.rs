//! Swap engine driven by the background task
//!
//! The engine is the single writer of the current resource, the gate, and
//! the phase-out set. Each [`tick`](SwapEngine::tick):
//!
//! 1. takes the latest queued configuration (not while draining)
//! 2. suppresses it when equal to the current one
//! 3. swaps per strategy: non-blocking publishes the replacement before
//!    releasing the old instance; blocking closes the gate and releases first
//! 4. sweeps the phase-out set and flags lingering resources once
//! 5. disposes everything whose count reached zero
//! 6. finishes a pending blocking swap once every old scope has ended,
//!    building from the latest configuration queued in the meantime
//!
//! A blocking replacement that fails to build keeps the gate closed and is
//! attempted again only when a different configuration arrives.

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::dispose::Dispose;
use crate::error::{FactoryError, SwapError};
use crate::factory::ServiceFactory;
use crate::gate::{Gate, GateState};
use crate::handle::ScopeHandle;
use crate::options::ScopeOptions;
use crate::phase_out::{Lingering, PhaseOutEntry, PhaseOutSet};
use crate::queue::{ChangeQueue, DisposalQueue};
use crate::resource::{OnZero, RefCountedResource, ResourceId, StrongRef};
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Value-equality check used to suppress redundant changes
pub type ConfigEq<C> = fn(&C, &C) -> bool;

/// How a configuration change replaces the current service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwapStrategy {
    /// Build the replacement immediately; old and new coexist until the old
    /// one drains
    NonBlocking,
    /// Wait for every scope on the old instance to end before building the
    /// replacement; acquisitions suspend meanwhile
    Blocking,
}

impl SwapStrategy {
    /// Strategy selected by `options`
    #[inline]
    #[must_use]
    pub fn from_options(options: &ScopeOptions) -> Self {
        if options.blocking_on_swap {
            Self::Blocking
        } else {
            Self::NonBlocking
        }
    }

    /// Strategy name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NonBlocking => "non_blocking",
            Self::Blocking => "blocking",
        }
    }
}

/// What a tick changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing queued, nothing pending
    Idle,
    /// Queued configuration equalled the current one
    Suppressed,
    /// Non-blocking swap published a new current service
    Swapped {
        /// Resource that stopped being current
        from: Option<ResourceId>,
        /// New current resource
        to: ResourceId,
    },
    /// Blocking swap closed the gate and released the old service
    DrainStarted {
        /// Resource being drained
        from: Option<ResourceId>,
    },
    /// Blocking swap still waiting for old scopes to end
    DrainPending {
        /// Phased-out resources still referenced
        outstanding: usize,
    },
    /// Blocking swap built the replacement and reopened the gate
    DrainCompleted {
        /// New current resource
        to: ResourceId,
    },
    /// Blocking swap whose replacement failed to build, waiting for a
    /// different configuration
    DrainStalled,
}

/// Everything one tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// State transition
    pub outcome: TickOutcome,
    /// Resources disposed during this tick, oldest first
    pub disposed: Vec<ResourceId>,
    /// Resources newly flagged as lingering
    pub lingering: Vec<Lingering>,
}

/// Result of the final drain at shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Instances disposed by the final drain
    pub disposed: usize,
    /// Resources still referenced afterwards
    pub outstanding: usize,
}

/// Point-in-time counters of one manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Configuration values ever received
    pub changes_received: u64,
    /// Configuration values waiting for the next tick
    pub pending_changes: usize,
    /// Completed swaps
    pub swaps: u64,
    /// Failed service constructions after startup
    pub failed_swaps: u64,
    /// Changes ignored because the configuration was unchanged
    pub suppressed: u64,
    /// Instances disposed
    pub disposed: u64,
    /// Superseded resources still referenced
    pub phasing_out: usize,
}

#[derive(Debug, Default)]
struct Counters {
    swaps: AtomicU64,
    failed: AtomicU64,
    suppressed: AtomicU64,
    phasing_out: AtomicUsize,
}

/// Current configuration paired with the resource built from it
pub(crate) struct Published<C, T> {
    config: Arc<C>,
    resource: Arc<RefCountedResource<T>>,
}

/// State visible to both the engine and acquirers
pub(crate) struct Shared<C, T> {
    name: String,
    gate: Gate,
    current: ArcSwapOption<Published<C, T>>,
    changes: ChangeQueue<C>,
    disposals: Arc<DisposalQueue<T>>,
    sink: Arc<dyn DiagnosticSink>,
    counters: Counters,
}

impl<C, T> Shared<C, T> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn gate(&self) -> &Gate {
        &self.gate
    }
}

impl<C, T> Shared<C, T>
where
    C: Send + Sync + 'static,
    T: Dispose,
{
    pub(crate) fn new(name: String, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            name,
            gate: Gate::new(),
            current: ArcSwapOption::empty(),
            changes: ChangeQueue::new(),
            disposals: Arc::new(DisposalQueue::new()),
            sink,
            counters: Counters::default(),
        }
    }

    pub(crate) fn changes(&self) -> &ChangeQueue<C> {
        &self.changes
    }

    pub(crate) fn report(&self, diagnostic: &Diagnostic) {
        self.sink.record(diagnostic);
    }

    fn publish(&self, current: Option<(&Arc<C>, &StrongRef<T>)>) {
        self.current.store(current.map(|(config, strong)| {
            Arc::new(Published {
                config: Arc::clone(config),
                resource: Arc::clone(strong.resource()),
            })
        }));
    }

    pub(crate) fn current_config(&self) -> Option<Arc<C>> {
        self.current
            .load()
            .as_ref()
            .map(|published| Arc::clone(&published.config))
    }

    /// Acquire the published resource, retrying if a swap releases it first
    pub(crate) fn try_acquire_current(&self) -> Option<ScopeHandle<C, T>> {
        let mut published = self.current.load_full()?;
        loop {
            if let Some(strong) = published.resource.try_acquire() {
                return Some(ScopeHandle::new(strong, Arc::clone(&published.config)));
            }

            // released under us; the engine publishes the successor first
            let reloaded = self.current.load_full()?;
            if Arc::ptr_eq(&reloaded, &published) {
                return None;
            }
            published = reloaded;
        }
    }

    pub(crate) fn stats(&self) -> ManagerStats {
        ManagerStats {
            changes_received: self.changes.received(),
            pending_changes: self.changes.len(),
            swaps: self.counters.swaps.load(Ordering::Relaxed),
            failed_swaps: self.counters.failed.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            disposed: self.disposals.disposed(),
            phasing_out: self.counters.phasing_out.load(Ordering::Relaxed),
        }
    }
}

impl<C, T> fmt::Debug for Shared<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("name", &self.name)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

/// Single-writer state machine performing swaps
pub struct SwapEngine<C, T: Dispose> {
    shared: Arc<Shared<C, T>>,
    factory: Arc<dyn ServiceFactory<C, T>>,
    options: ScopeOptions,
    strategy: SwapStrategy,
    equals: Option<ConfigEq<C>>,
    on_zero: OnZero<T>,
    current: Option<StrongRef<T>>,
    current_config: Arc<C>,
    phase_out: PhaseOutSet<C, T>,
    draining: bool,
    stalled: bool,
}

impl<C, T> SwapEngine<C, T>
where
    C: Send + Sync + 'static,
    T: Dispose,
{
    /// Build the initial service and publish it
    pub(crate) fn start(
        shared: Arc<Shared<C, T>>,
        factory: Arc<dyn ServiceFactory<C, T>>,
        options: ScopeOptions,
        equals: Option<ConfigEq<C>>,
        initial: C,
    ) -> Result<Self, SwapError> {
        let service = factory.create(&initial)?;

        let disposals = Arc::clone(&shared.disposals);
        let on_zero: OnZero<T> = Arc::new(move |id, service| disposals.push(id, service));

        let config = Arc::new(initial);
        let current = RefCountedResource::create(service, Arc::clone(&on_zero));
        shared.publish(Some((&config, &current)));
        shared.gate.set(GateState::Ready);

        let strategy = SwapStrategy::from_options(&options);
        tracing::info!(
            manager = %shared.name,
            resource_id = %current.id(),
            strategy = strategy.name(),
            "scoped service manager started"
        );

        Ok(Self {
            shared,
            factory,
            options,
            strategy,
            equals,
            on_zero,
            current: Some(current),
            current_config: config,
            phase_out: PhaseOutSet::new(),
            draining: false,
            stalled: false,
        })
    }

    /// Run one iteration of the swap state machine
    ///
    /// # Errors
    /// Returns `SwapError::Construction` when building the replacement
    /// failed. The failure is already recorded as a diagnostic; the previous
    /// service stays current (non-blocking) or the gate stays closed until a
    /// different configuration arrives (blocking). The sweep and disposal
    /// steps still ran.
    pub async fn tick(&mut self) -> Result<TickReport, SwapError> {
        let mut outcome = TickOutcome::Idle;
        let mut failure = None;

        if !self.draining {
            if let Some(config) = self.shared.changes.take_latest() {
                match self.apply_change(config) {
                    Ok(applied) => outcome = applied,
                    Err(err) => failure = Some(err),
                }
            }
        }

        let lingering = self.sweep();
        let disposed = self.shared.disposals.drain().await;

        if self.draining {
            if self.phase_out.is_empty() {
                match self.finish_drain() {
                    Ok(next) => {
                        if next != TickOutcome::Idle {
                            outcome = next;
                        }
                    }
                    Err(err) => failure = Some(err),
                }
            } else if outcome == TickOutcome::Idle {
                outcome = TickOutcome::DrainPending {
                    outstanding: self.phase_out.len(),
                };
            }
        }

        self.shared
            .counters
            .phasing_out
            .store(self.phase_out.len(), Ordering::Relaxed);

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(TickReport {
                outcome,
                disposed,
                lingering,
            }),
        }
    }

    /// Count and report `config` if it equals the current (or pending) one
    fn suppress_if_unchanged(&self, config: &C) -> bool {
        let unchanged = self
            .equals
            .is_some_and(|equals| equals(config, &self.current_config));
        if unchanged {
            self.shared.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            self.shared.report(&Diagnostic::RedundantChangeSuppressed {
                manager: self.shared.name.clone(),
            });
        }
        unchanged
    }

    fn apply_change(&mut self, config: C) -> Result<TickOutcome, FactoryError> {
        if self.suppress_if_unchanged(&config) {
            return Ok(TickOutcome::Suppressed);
        }

        tracing::info!(
            manager = %self.shared.name,
            strategy = self.strategy.name(),
            "configuration change detected"
        );

        match self.strategy {
            SwapStrategy::NonBlocking => self.swap_now(config),
            SwapStrategy::Blocking => Ok(self.begin_drain(config)),
        }
    }

    fn swap_now(&mut self, config: C) -> Result<TickOutcome, FactoryError> {
        let service = self.construct(&config)?;
        let config = Arc::new(config);
        let next = RefCountedResource::create(service, Arc::clone(&self.on_zero));
        let to = next.id();

        // publish before releasing so acquirers never see a gap
        self.shared.publish(Some((&config, &next)));
        let previous = self.current.replace(next);
        let previous_config = std::mem::replace(&mut self.current_config, config);
        let from = previous.map(|old| self.retire(old, previous_config));

        self.shared.counters.swaps.fetch_add(1, Ordering::Relaxed);
        tracing::info!(manager = %self.shared.name, resource_id = %to, "service swapped");
        Ok(TickOutcome::Swapped { from, to })
    }

    fn begin_drain(&mut self, config: C) -> TickOutcome {
        self.shared.gate.set(GateState::Draining);
        self.shared.publish(None);

        let previous_config = std::mem::replace(&mut self.current_config, Arc::new(config));
        let from = self
            .current
            .take()
            .map(|old| self.retire(old, previous_config));
        self.draining = true;

        tracing::debug!(manager = %self.shared.name, "gate closed, draining old service");
        TickOutcome::DrainStarted { from }
    }

    /// Old scopes are gone: adopt the newest queued value, then build
    fn finish_drain(&mut self) -> Result<TickOutcome, FactoryError> {
        let mut outcome = TickOutcome::Idle;
        if let Some(config) = self.shared.changes.take_latest() {
            if self.suppress_if_unchanged(&config) {
                outcome = TickOutcome::Suppressed;
            } else {
                self.current_config = Arc::new(config);
                self.stalled = false;
            }
        }

        if self.stalled {
            return Ok(if outcome == TickOutcome::Idle {
                TickOutcome::DrainStalled
            } else {
                outcome
            });
        }

        self.complete_drain().map_err(|err| {
            self.stalled = true;
            err
        })
    }

    fn complete_drain(&mut self) -> Result<TickOutcome, FactoryError> {
        let service = self.construct(&self.current_config)?;
        let next = RefCountedResource::create(service, Arc::clone(&self.on_zero));
        let to = next.id();

        self.shared.publish(Some((&self.current_config, &next)));
        self.current = Some(next);
        self.draining = false;
        self.shared.gate.set(GateState::Ready);

        self.shared.counters.swaps.fetch_add(1, Ordering::Relaxed);
        tracing::info!(manager = %self.shared.name, resource_id = %to, "service swapped, gate reopened");
        Ok(TickOutcome::DrainCompleted { to })
    }

    fn construct(&self, config: &C) -> Result<T, FactoryError> {
        self.factory.create(config).map_err(|err| {
            self.shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            self.shared.report(&Diagnostic::SwapFailed {
                manager: self.shared.name.clone(),
                error: err.to_string(),
            });
            tracing::error!(manager = %self.shared.name, error = %err, "failed to construct replacement service");
            err
        })
    }

    fn retire(&mut self, old: StrongRef<T>, config: Arc<C>) -> ResourceId {
        let id = old.id();
        self.phase_out.push(PhaseOutEntry::new(old.downgrade(), config));
        old.release();
        id
    }

    fn sweep(&mut self) -> Vec<Lingering> {
        let report = self.phase_out.sweep(self.options.warn_after);
        for lingering in &report.lingering {
            self.shared.report(&Diagnostic::LingeringResource {
                manager: self.shared.name.clone(),
                resource_id: lingering.resource_id,
                age: lingering.age,
                outstanding: lingering.outstanding,
            });
        }
        report.lingering
    }

    /// Close the gate, release the current service and run the final drain
    ///
    /// # Errors
    /// `OutstandingResources` when `strict_on_shutdown` is set and some
    /// phased-out service is still referenced.
    pub async fn finish(mut self) -> Result<ShutdownReport, SwapError> {
        self.shared.gate.set(GateState::Closed);
        self.shared.publish(None);

        if let Some(current) = self.current.take() {
            let config = Arc::clone(&self.current_config);
            self.retire(current, config);
        }

        self.sweep();
        let disposed = self.shared.disposals.drain().await.len();
        // scopes still open are disposed on the runtime when they end
        self.shared.disposals.detach(Handle::try_current().ok());
        let outstanding = self.phase_out.len();
        self.shared
            .counters
            .phasing_out
            .store(outstanding, Ordering::Relaxed);

        if outstanding > 0 {
            tracing::warn!(
                manager = %self.shared.name,
                outstanding,
                "services still waiting for phase out at shutdown"
            );
            if self.options.strict_on_shutdown {
                return Err(SwapError::OutstandingResources { count: outstanding });
            }
        }

        tracing::info!(manager = %self.shared.name, disposed, "scoped service manager shut down");
        Ok(ShutdownReport {
            disposed,
            outstanding,
        })
    }

    /// Manager name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Options the engine was started with
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ScopeOptions {
        &self.options
    }

    /// Active swap strategy
    #[inline]
    #[must_use]
    pub fn strategy(&self) -> SwapStrategy {
        self.strategy
    }

    /// Configuration the current (or pending) service is built from
    #[inline]
    #[must_use]
    pub fn current_config(&self) -> &Arc<C> {
        &self.current_config
    }

    /// Identifier of the current resource, `None` while draining
    #[must_use]
    pub fn current_id(&self) -> Option<ResourceId> {
        self.current.as_ref().map(StrongRef::id)
    }

    /// Whether a blocking swap is waiting for old scopes to end
    #[inline]
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Number of superseded resources still tracked
    #[inline]
    #[must_use]
    pub fn phasing_out(&self) -> usize {
        self.phase_out.len()
    }
}

impl<C, T: Dispose> Drop for SwapEngine<C, T> {
    fn drop(&mut self) {
        if self.shared.disposals.is_detached() {
            return;
        }

        tracing::debug!(manager = %self.shared.name, "swap engine dropped without shutdown");
        self.shared.gate.set(GateState::Closed);
        self.shared.current.store(None);
        self.shared.disposals.detach(Handle::try_current().ok());
        drop(self.current.take());
    }
}

impl<C, T: Dispose> fmt::Debug for SwapEngine<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapEngine")
            .field("name", &self.shared.name)
            .field("strategy", &self.strategy)
            .field("draining", &self.draining)
            .field("stalled", &self.stalled)
            .field("phasing_out", &self.phase_out.len())
            .finish_non_exhaustive()
    }
}
