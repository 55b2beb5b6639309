//! Functional tests for configuration hot-swapping.
//!
//! These drive a manager over `TrackedService` from the outside, the way an
//! application would: push configuration changes, acquire and release
//! scopes, and observe construction and disposal through the tracker.

use cfgscope_core::prelude::*;
use cfgscope_core::{GateState, TickOutcome};
use cfgscope_test_utils::{
    background_harness, manual_harness, DisposeTracker, TestOptions, TrackedService,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Tenet: a change is visible to the next acquisition, while the old
/// instance lives on until its last scope ends.
#[tokio::test]
async fn disabled_worker_becomes_enabled() {
    let h = manual_harness(TestOptions::disabled(), ScopeOptions::default());

    let before = h.manager.try_acquire().unwrap();
    assert_eq!(before.service().unwrap().work(), "Disabled");

    h.manager.consume_change(TestOptions::enabled(7));
    h.manager.tick().await.unwrap();

    let after = h.manager.try_acquire().unwrap();
    assert_eq!(after.service().unwrap().work(), "Work value: 7");
    assert_eq!(after.config(), &TestOptions::enabled(7));

    // old scope still sees the old instance
    assert_eq!(before.service().unwrap().work(), "Disabled");
    assert_eq!(h.tracker.disposed_count(), 0);

    drop(before);
    h.manager.tick().await.unwrap();
    assert_eq!(h.tracker.disposed(), vec![0]);
}

/// Tenet: changes arriving between two ticks collapse into the latest one.
#[tokio::test]
async fn burst_of_changes_builds_once() {
    let h = manual_harness(TestOptions::disabled(), ScopeOptions::default());

    for value in 1..=3 {
        h.manager.consume_change(TestOptions::enabled(value));
    }
    h.manager.tick().await.unwrap();

    assert_eq!(h.tracker.created(), 2);
    assert_eq!(h.manager.current_config().unwrap().value, 3);
    assert_eq!(h.manager.stats().changes_received, 3);
    assert_eq!(h.manager.stats().swaps, 1);
}

/// Tenet: re-sending the current configuration never rebuilds the service.
#[tokio::test]
async fn equal_configuration_is_idempotent() {
    let h = manual_harness(TestOptions::enabled(4), ScopeOptions::default());
    let id = h.manager.try_acquire().unwrap().resource_id();

    h.manager.consume_change(TestOptions::enabled(4));
    let report = h.manager.tick().await.unwrap();

    assert_eq!(report.outcome, TickOutcome::Suppressed);
    assert_eq!(h.tracker.created(), 1);
    assert_eq!(h.manager.try_acquire().unwrap().resource_id(), id);
    assert_eq!(h.diagnostics.count("redundant_change_suppressed"), 1);
}

/// Tenet: non-blocking swaps never make the service unavailable; old and
/// new instances coexist.
#[tokio::test]
async fn non_blocking_swap_stays_available() {
    let h = manual_harness(TestOptions::enabled(1), ScopeOptions::default());
    let held = h.manager.try_acquire().unwrap();

    h.manager.consume_change(TestOptions::enabled(2));
    h.manager.tick().await.unwrap();

    assert_eq!(h.manager.gate_state(), GateState::Ready);
    let fresh = h.manager.try_acquire().unwrap();
    assert_ne!(fresh.resource_id(), held.resource_id());
    assert_eq!(h.tracker.live(), 2);
    assert_eq!(h.manager.stats().phasing_out, 1);
}

/// Tenet: with blocking swaps the old and new instances never coexist and
/// acquisitions wait for the replacement.
#[tokio::test]
async fn blocking_swap_is_mutually_exclusive() {
    let h = manual_harness(
        TestOptions::enabled(1),
        ScopeOptions::new().with_blocking_on_swap(true),
    );
    let manager = Arc::new(h.manager);
    let held = manager.try_acquire().unwrap();

    manager.consume_change(TestOptions::enabled(2));
    let report = manager.tick().await.unwrap();
    assert!(matches!(report.outcome, TickOutcome::DrainStarted { .. }));
    assert_eq!(manager.gate_state(), GateState::Draining);
    assert!(manager.try_acquire().is_none());

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            let handle = manager.acquire(&CancellationToken::new()).await?;
            Ok::<_, ScopeError>(handle.service()?.value())
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!waiter.is_finished());

    let report = manager.tick().await.unwrap();
    assert_eq!(report.outcome, TickOutcome::DrainPending { outstanding: 1 });
    assert_eq!(h.tracker.created(), 1);

    drop(held);
    let report = manager.tick().await.unwrap();
    assert!(matches!(report.outcome, TickOutcome::DrainCompleted { .. }));
    assert_eq!(h.tracker.created(), 2);
    assert_eq!(h.tracker.live(), 1);

    assert_eq!(waiter.await.unwrap(), Ok(2));
}

/// Tenet: a blocking swap whose replacement fails to build stays closed
/// until a different configuration arrives, then recovers.
#[tokio::test]
async fn blocking_swap_recovers_with_corrected_configuration() {
    let h = manual_harness(
        TestOptions::enabled(1),
        ScopeOptions::new().with_blocking_on_swap(true),
    );

    h.switch.set(true);
    h.manager.consume_change(TestOptions::enabled(9));
    assert!(h.manager.tick().await.is_err());
    h.switch.set(false);

    for _ in 0..5 {
        let report = h.manager.tick().await.unwrap();
        assert_eq!(report.outcome, TickOutcome::DrainStalled);
    }
    assert_eq!(h.manager.gate_state(), GateState::Draining);
    assert_eq!(h.manager.stats().failed_swaps, 1);
    assert_eq!(h.diagnostics.count("swap_failed"), 1);

    h.manager.consume_change(TestOptions::enabled(10));
    let report = h.manager.tick().await.unwrap();
    assert!(matches!(report.outcome, TickOutcome::DrainCompleted { .. }));
    assert_eq!(h.manager.gate_state(), GateState::Ready);
    assert_eq!(h.manager.try_acquire().unwrap().service().unwrap().value(), 10);
    assert_eq!(h.manager.stats().pending_changes, 0);
    assert_eq!(h.tracker.live(), 1);
}

/// Tenet: a waiter gives up when its own cancellation fires, without
/// affecting the manager.
#[tokio::test]
async fn cancelled_waiter_returns_error() {
    let h = manual_harness(
        TestOptions::enabled(1),
        ScopeOptions::new().with_blocking_on_swap(true),
    );
    let _held = h.manager.try_acquire().unwrap();
    h.manager.consume_change(TestOptions::enabled(2));
    h.manager.tick().await.unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        canceller.cancel();
    });

    let result = h.manager.acquire(&cancel).await;
    assert_eq!(result.err(), Some(ScopeError::Cancelled));
    assert_eq!(h.manager.gate_state(), GateState::Draining);
}

/// Tenet: shutting down releases every waiter with `ShutDown`.
#[tokio::test]
async fn shutdown_releases_waiters() {
    let h = manual_harness(
        TestOptions::enabled(1),
        ScopeOptions::new().with_blocking_on_swap(true),
    );
    let manager = Arc::new(h.manager);
    let held = manager.try_acquire().unwrap();
    manager.consume_change(TestOptions::enabled(2));
    manager.tick().await.unwrap();

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.acquire(&CancellationToken::new()).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = manager.shutdown().await.unwrap();
    assert_eq!(report.outstanding, 1);
    assert_eq!(waiter.await.unwrap(), Err(ScopeError::ShutDown));
    drop(held);
}

/// Tenet: a failing factory leaves the previous service current and the
/// next change is still applied.
#[tokio::test]
async fn factory_failure_keeps_previous_service() {
    let h = manual_harness(TestOptions::enabled(1), ScopeOptions::default());

    h.switch.set(true);
    h.manager.consume_change(TestOptions::enabled(2));
    let err = h.manager.tick().await.unwrap_err();
    assert!(err.is_retryable());

    assert_eq!(h.manager.try_acquire().unwrap().service().unwrap().value(), 1);
    assert_eq!(h.manager.current_config().unwrap().value, 1);
    assert_eq!(h.diagnostics.count("swap_failed"), 1);

    h.switch.set(false);
    h.manager.consume_change(TestOptions::enabled(3));
    h.manager.tick().await.unwrap();
    assert_eq!(h.manager.try_acquire().unwrap().service().unwrap().value(), 3);
}

/// Tenet: a scope held past the threshold is reported exactly once.
#[tokio::test(start_paused = true)]
async fn lingering_scope_reported_once() {
    let h = manual_harness(
        TestOptions::enabled(1),
        ScopeOptions::new().with_warn_after(Duration::from_secs(5)),
    );
    let _held = h.manager.try_acquire().unwrap();

    h.manager.consume_change(TestOptions::enabled(2));
    h.manager.tick().await.unwrap();

    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(3)).await;
        h.manager.tick().await.unwrap();
    }

    assert_eq!(h.diagnostics.count("lingering_resource"), 1);
    assert_eq!(h.tracker.disposed_count(), 0);
}

/// Tenet: strict shutdown turns unreleased scopes into an error.
#[tokio::test]
async fn strict_shutdown_reports_unreleased_scopes() {
    let h = manual_harness(
        TestOptions::enabled(1),
        ScopeOptions::new().with_strict_on_shutdown(true),
    );
    let held = h.manager.try_acquire().unwrap();
    h.manager.consume_change(TestOptions::enabled(2));
    h.manager.tick().await.unwrap();

    let err = h.manager.shutdown().await.unwrap_err();
    assert!(matches!(err, SwapError::OutstandingResources { count: 1 }));
    assert!(err.is_fatal());

    // the current service was still disposed
    assert_eq!(h.tracker.disposed(), vec![1]);
    drop(held);
}

/// Tenet: under concurrent use every instance is disposed exactly once and
/// never while a scope still holds it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_use_disposes_each_instance_once() {
    let h = background_harness(
        TestOptions::enabled(0),
        ScopeOptions::new().with_poll_interval(Duration::from_millis(1)),
    );
    let manager = Arc::new(h.manager);

    let mut workers = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        workers.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            for _ in 0..50 {
                let handle = manager.acquire(&cancel).await.unwrap();
                let service = handle.service().unwrap();
                assert!(!service.is_disposed());
                tokio::task::yield_now().await;
                assert!(!service.is_disposed());
            }
        }));
    }

    for value in 1..=20 {
        manager.consume_change(TestOptions::enabled(value));
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    for worker in workers {
        worker.await.unwrap();
    }

    let report = manager.shutdown().await.unwrap();
    assert_eq!(report.outstanding, 0);
    assert_eq!(h.tracker.disposed_count(), h.tracker.created());
    h.tracker.assert_disposed_once();
}

/// Tenet: the background task applies changes without manual ticks.
#[tokio::test(start_paused = true)]
async fn background_task_picks_up_changes() {
    let h = background_harness(TestOptions::disabled(), ScopeOptions::default());

    h.manager.consume_change(TestOptions::enabled(9));
    tokio::time::sleep(Duration::from_millis(350)).await;

    let scope = h.manager.acquire(&CancellationToken::new()).await.unwrap();
    assert_eq!(scope.service().unwrap().work(), "Work value: 9");
    drop(scope);

    let report = h.manager.shutdown().await.unwrap();
    assert_eq!(report.outstanding, 0);
    assert_eq!(h.tracker.disposed_count(), 2);
}

/// Tenet: a scope that outlives shutdown still has its service disposed,
/// exactly once, when it ends.
#[tokio::test]
async fn scope_released_after_shutdown_is_disposed() {
    let h = manual_harness(TestOptions::enabled(1), ScopeOptions::default());
    let held = h.manager.try_acquire().unwrap();

    let report = h.manager.shutdown().await.unwrap();
    assert_eq!(report.outstanding, 1);
    assert_eq!(report.disposed, 0);

    drop(held);
    settle().await;
    assert_eq!(h.tracker.created(), 1);
    assert_eq!(h.tracker.disposed(), vec![0]);
    assert_eq!(h.manager.stats().disposed, 1);
}

/// Tenet: dropping a manager without shutting it down still disposes its
/// services once their scopes end.
#[tokio::test]
async fn dropped_manager_disposes_services() {
    let h = manual_harness(TestOptions::enabled(1), ScopeOptions::default());
    let held = h.manager.try_acquire().unwrap();
    h.manager.consume_change(TestOptions::enabled(2));
    h.manager.tick().await.unwrap();

    drop(h.manager);
    settle().await;
    assert_eq!(h.tracker.disposed(), vec![1]);

    drop(held);
    settle().await;
    assert_eq!(h.tracker.disposed(), vec![1, 0]);
    h.tracker.assert_disposed_once();
}

/// Tenet: under concurrent use the blocking strategy never builds a
/// replacement while the previous instance is undisposed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_swap_never_overlaps_instances() {
    let tracker = DisposeTracker::new();
    let overlaps = Arc::new(AtomicUsize::new(0));

    let factory = {
        let tracker = Arc::clone(&tracker);
        let overlaps = Arc::clone(&overlaps);
        move |options: &TestOptions| -> Result<TrackedService, FactoryError> {
            if tracker.live() != 0 {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            Ok(TrackedService::new(options, &tracker))
        }
    };

    let manager = Arc::new(
        ManagerBuilder::new(TestOptions::enabled(0), factory)
            .with_options(
                ScopeOptions::new()
                    .with_blocking_on_swap(true)
                    .with_poll_interval(Duration::from_millis(1)),
            )
            .build()
            .unwrap(),
    );

    let mut workers = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        workers.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            for _ in 0..50 {
                let handle = manager.acquire(&cancel).await.unwrap();
                assert!(!handle.service().unwrap().is_disposed());
                tokio::task::yield_now().await;
                drop(handle);
            }
        }));
    }

    for value in 1..=20 {
        manager.consume_change(TestOptions::enabled(value));
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    for worker in workers {
        worker.await.unwrap();
    }

    manager.shutdown().await.unwrap();
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(tracker.disposed_count(), tracker.created());
    tracker.assert_disposed_once();
}
