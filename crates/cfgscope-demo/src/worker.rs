//! Sample service and the background worker that uses it

use cfgscope_core::{Dispose, ScopedServiceManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct WorkerOptions {
    pub(crate) enabled: bool,
    pub(crate) work_value: i64,
}

impl WorkerOptions {
    pub(crate) fn enabled(work_value: i64) -> Self {
        Self {
            enabled: true,
            work_value,
        }
    }
}

/// Service rebuilt whenever its named options change
#[derive(Debug)]
pub(crate) struct WorkService {
    options: WorkerOptions,
}

impl WorkService {
    pub(crate) fn new(options: &WorkerOptions) -> Self {
        Self {
            options: options.clone(),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    /// `None` when disabled
    pub(crate) fn do_work(&self) -> Option<i64> {
        self.is_enabled().then_some(self.options.work_value)
    }
}

impl Dispose for WorkService {
    fn dispose(&self) {
        tracing::debug!(work_value = self.options.work_value, "work service disposed");
    }
}

/// Report line for one unit of work
pub(crate) fn describe(key: &str, service: &WorkService) -> String {
    match service.do_work() {
        Some(value) => format!("{key} Work value: {value}"),
        None => format!("{key} Disabled"),
    }
}

/// Acquire a scope, do one unit of work, release, wait; until cancelled
pub(crate) async fn run_worker(
    key: String,
    manager: Arc<ScopedServiceManager<WorkerOptions, WorkService>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let scope = match manager.acquire(&cancel).await {
            Ok(scope) => scope,
            Err(err) => {
                tracing::debug!(key = %key, error = %err, "worker stopping");
                return;
            }
        };

        match scope.service() {
            Ok(service) => println!("{}", describe(&key, service)),
            Err(err) => tracing::warn!(key = %key, error = %err, "scope unusable"),
        }
        drop(scope);

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }
    }
}
