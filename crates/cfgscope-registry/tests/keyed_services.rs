//! Functional tests for keyed registrations bound to named options.
//!
//! Two managers for the same service type are registered under different
//! keys, each bound to its own named slot of one options store.

use cfgscope_core::prelude::*;
use cfgscope_core::GateState;
use cfgscope_registry::{OptionsStore, RegistryError, RequestScope, ServiceRegistry};
use cfgscope_test_utils::{DisposeTracker, SwitchableFactory, TestOptions, TrackedService};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn fast() -> ScopeOptions {
    ScopeOptions::new().with_poll_interval(Duration::from_millis(10))
}

/// Tenet: a change to one named slot only reaches the manager bound to it.
#[tokio::test(start_paused = true)]
async fn named_options_reach_only_their_manager() {
    let registry = ServiceRegistry::new();
    let store = Arc::new(OptionsStore::<TestOptions>::new());
    let tracker = DisposeTracker::new();

    store.set(Some("first"), TestOptions::enabled(1));
    store.set(Some("second"), TestOptions::disabled());

    let monitor: Arc<dyn OptionsMonitor<TestOptions>> = store.clone();
    for key in ["first", "second"] {
        registry
            .register_bound(
                Some(key),
                Arc::clone(&monitor),
                Some(key),
                SwitchableFactory::new(&tracker),
                fast(),
            )
            .unwrap();
    }
    assert_eq!(store.listener_count(), 2);

    store.set(Some("second"), TestOptions::enabled(5));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = registry.get::<TestOptions, TrackedService>(Some("first")).unwrap();
    let second = registry.get::<TestOptions, TrackedService>(Some("second")).unwrap();
    assert_eq!(first.try_acquire().unwrap().service().unwrap().work(), "Work value: 1");
    assert_eq!(second.try_acquire().unwrap().service().unwrap().work(), "Work value: 5");
    assert_eq!(first.stats().swaps, 0);
    assert_eq!(second.stats().swaps, 1);

    let results = registry.shutdown_all().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(store.listener_count(), 0);
    assert_eq!(tracker.live(), 0);
}

/// Tenet: one request scope acquires each service once and releases it at
/// the end of the request.
#[tokio::test]
async fn request_scope_reuses_and_releases_handles() {
    let registry = ServiceRegistry::new();
    let tracker = DisposeTracker::new();
    let manager = registry
        .register(
            None,
            TestOptions::enabled(2),
            SwitchableFactory::new(&tracker),
            ScopeOptions::default(),
        )
        .unwrap();

    let scope = RequestScope::new(&registry, CancellationToken::new());
    let a = scope.resolve::<TestOptions, TrackedService>(None).await.unwrap();
    let b = scope.resolve::<TestOptions, TrackedService>(None).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(scope.resolved(), 1);

    manager.consume_change(TestOptions::enabled(3));
    tokio::time::sleep(Duration::from_millis(300)).await;

    // the request keeps the instance it started with
    let c = scope.resolve::<TestOptions, TrackedService>(None).await.unwrap();
    assert_eq!(c.service().unwrap().value(), 2);
    assert_eq!(manager.stats().phasing_out, 1);

    drop((a, b, c));
    assert_eq!(scope.end(), 1);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(manager.stats().phasing_out, 0);
    assert_eq!(tracker.disposed(), vec![0]);

    registry.shutdown_all().await;
}

/// Tenet: resolving through a cancelled scope fails instead of waiting.
#[tokio::test]
async fn request_scope_honours_cancellation() {
    let registry = ServiceRegistry::new();
    let tracker = DisposeTracker::new();
    let manager = registry
        .register(
            Some("slow"),
            TestOptions::enabled(1),
            SwitchableFactory::new(&tracker),
            ScopeOptions::new().with_blocking_on_swap(true),
        )
        .unwrap();

    let held = manager.acquire(&CancellationToken::new()).await.unwrap();
    manager.consume_change(TestOptions::enabled(2));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(manager.gate_state(), GateState::Draining);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let scope = RequestScope::new(&registry, cancel);
    let err = scope
        .resolve::<TestOptions, TrackedService>(Some("slow"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Scope(ScopeError::Cancelled)));

    drop(held);
    registry.shutdown_all().await;
}

/// Tenet: after a registry-wide shutdown every manager refuses new scopes.
#[tokio::test]
async fn shutdown_all_closes_every_manager() {
    let registry = ServiceRegistry::new();
    let tracker = DisposeTracker::new();
    for key in ["a", "b", "c"] {
        registry
            .register(
                Some(key),
                TestOptions::enabled(0),
                SwitchableFactory::new(&tracker),
                ScopeOptions::default(),
            )
            .unwrap();
    }

    let results = registry.shutdown_all().await;
    assert_eq!(results.len(), 3);
    assert_eq!(tracker.disposed_count(), 3);

    let manager = registry.get::<TestOptions, TrackedService>(Some("b")).unwrap();
    assert_eq!(manager.gate_state(), GateState::Closed);
    assert!(manager.try_acquire().is_none());
}
