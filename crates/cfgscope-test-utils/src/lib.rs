//! Testing utilities for cfgscope workspace
//!
//! Shared fixtures: a small options type, a service that records its own
//! disposal, and factories that can be told to fail.

#![allow(missing_docs)]

use async_trait::async_trait;
use cfgscope_core::{
    DiagnosticLog, Dispose, FactoryError, ManagerBuilder, ScopeOptions, ScopedServiceManager,
    ServiceFactory,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TestOptions {
    pub enabled: bool,
    pub value: i64,
}

impl TestOptions {
    pub fn enabled(value: i64) -> Self {
        Self {
            enabled: true,
            value,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Records every construction and disposal of [`TrackedService`]s
#[derive(Debug, Default)]
pub struct DisposeTracker {
    next_serial: AtomicU64,
    disposed: Mutex<Vec<u64>>,
}

impl DisposeTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        usize::try_from(self.next_serial.load(Ordering::SeqCst)).unwrap_or(usize::MAX)
    }

    /// Serials in disposal order
    pub fn disposed(&self) -> Vec<u64> {
        self.disposed.lock().clone()
    }

    pub fn disposed_count(&self) -> usize {
        self.disposed.lock().len()
    }

    pub fn live(&self) -> usize {
        self.created() - self.disposed_count()
    }

    pub fn assert_disposed_once(&self) {
        let mut seen = self.disposed();
        let total = seen.len();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), total, "service disposed more than once");
    }
}

/// Service built from [`TestOptions`] that reports its disposal
#[derive(Debug)]
pub struct TrackedService {
    serial: u64,
    options: TestOptions,
    disposals: AtomicUsize,
    tracker: Arc<DisposeTracker>,
}

impl TrackedService {
    pub fn new(options: &TestOptions, tracker: &Arc<DisposeTracker>) -> Self {
        Self {
            serial: tracker.next_serial.fetch_add(1, Ordering::SeqCst),
            options: options.clone(),
            disposals: AtomicUsize::new(0),
            tracker: Arc::clone(tracker),
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn options(&self) -> &TestOptions {
        &self.options
    }

    pub fn value(&self) -> i64 {
        self.options.value
    }

    pub fn is_disposed(&self) -> bool {
        self.disposals.load(Ordering::SeqCst) > 0
    }

    pub fn work(&self) -> String {
        if self.options.enabled {
            format!("Work value: {}", self.options.value)
        } else {
            "Disabled".to_owned()
        }
    }
}

#[async_trait]
impl Dispose for TrackedService {
    async fn dispose_async(&self) {
        tokio::task::yield_now().await;
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.tracker.disposed.lock().push(self.serial);
    }
}

/// Shared on/off switch for [`SwitchableFactory`]
#[derive(Debug, Clone, Default)]
pub struct FailSwitch(Arc<AtomicBool>);

impl FailSwitch {
    pub fn set(&self, failing: bool) {
        self.0.store(failing, Ordering::SeqCst);
    }

    pub fn is_failing(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Factory producing [`TrackedService`]s, failing while its switch is on
#[derive(Debug, Clone)]
pub struct SwitchableFactory {
    tracker: Arc<DisposeTracker>,
    switch: FailSwitch,
}

impl SwitchableFactory {
    pub fn new(tracker: &Arc<DisposeTracker>) -> Self {
        Self {
            tracker: Arc::clone(tracker),
            switch: FailSwitch::default(),
        }
    }

    pub fn switch(&self) -> FailSwitch {
        self.switch.clone()
    }
}

impl ServiceFactory<TestOptions, TrackedService> for SwitchableFactory {
    fn create(&self, config: &TestOptions) -> Result<TrackedService, FactoryError> {
        if self.switch.is_failing() {
            return Err(FactoryError::new(format!(
                "refusing to build service for value {}",
                config.value
            )));
        }
        Ok(TrackedService::new(config, &self.tracker))
    }
}

/// Everything a manager test needs
pub struct Harness {
    pub manager: ScopedServiceManager<TestOptions, TrackedService>,
    pub tracker: Arc<DisposeTracker>,
    pub diagnostics: Arc<DiagnosticLog>,
    pub switch: FailSwitch,
}

/// Manually driven manager over [`TrackedService`]
pub fn manual_harness(initial: TestOptions, options: ScopeOptions) -> Harness {
    let (builder, tracker, diagnostics, switch) = harness_builder(initial, options);
    Harness {
        manager: builder.build_manual().unwrap(),
        tracker,
        diagnostics,
        switch,
    }
}

/// Background-driven manager over [`TrackedService`]; needs a tokio runtime
pub fn background_harness(initial: TestOptions, options: ScopeOptions) -> Harness {
    let (builder, tracker, diagnostics, switch) = harness_builder(initial, options);
    Harness {
        manager: builder.build().unwrap(),
        tracker,
        diagnostics,
        switch,
    }
}

fn harness_builder(
    initial: TestOptions,
    options: ScopeOptions,
) -> (
    ManagerBuilder<TestOptions, TrackedService>,
    Arc<DisposeTracker>,
    Arc<DiagnosticLog>,
    FailSwitch,
) {
    let tracker = DisposeTracker::new();
    let diagnostics = Arc::new(DiagnosticLog::new());
    let factory = SwitchableFactory::new(&tracker);
    let switch = factory.switch();

    let builder = ManagerBuilder::new(initial, factory)
        .with_name("test")
        .with_options(options)
        .with_sink(diagnostics.clone());

    (builder, tracker, diagnostics, switch)
}
