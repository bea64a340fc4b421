use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use crate::sync::handle::ClockConfig;
use crate::sync::registry::{ClockRegistry, RegistryConfig};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn fast_registry() -> ClockRegistry {
    ClockRegistry::new(RegistryConfig {
        grace_period: Duration::from_millis(100),
    })
}

#[tokio::test]
async fn test_handles_for_same_endpoint_share_one_estimator() {
    let registry = fast_registry();

    let a = registry.acquire(ClockConfig::new(LOCALHOST, 40_301)).await.unwrap();
    let b = registry.acquire(ClockConfig::new(LOCALHOST, 40_301)).await.unwrap();

    assert!(Arc::ptr_eq(a.estimator_state(), b.estimator_state()));
    assert_eq!(registry.active_endpoints().await, 1);
}

#[tokio::test]
async fn test_distinct_endpoints_are_independent() {
    let registry = fast_registry();

    let a = registry.acquire(ClockConfig::new(LOCALHOST, 40_302)).await.unwrap();
    let b = registry.acquire(ClockConfig::new(LOCALHOST, 40_303)).await.unwrap();

    assert!(!Arc::ptr_eq(a.estimator_state(), b.estimator_state()));
    assert_eq!(registry.active_endpoints().await, 2);
}

#[tokio::test]
async fn test_release_defers_teardown_through_grace_period() {
    let registry = fast_registry();

    let a = registry.acquire(ClockConfig::new(LOCALHOST, 40_304)).await.unwrap();
    let b = registry.acquire(ClockConfig::new(LOCALHOST, 40_304)).await.unwrap();

    // Releasing one handle keeps the loop running.
    drop(a);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.active_endpoints().await, 1);

    // Releasing the last handle only arms the timer.
    drop(b);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.active_endpoints().await, 1);

    // The grace period elapses without a re-acquire: torn down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.active_endpoints().await, 0);
}

#[tokio::test]
async fn test_reacquire_within_grace_period_reuses_estimator() {
    let registry = fast_registry();

    let a = registry.acquire(ClockConfig::new(LOCALHOST, 40_305)).await.unwrap();
    let state = Arc::clone(a.estimator_state());
    drop(a);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Re-acquire inside the window: same estimator, timer cancelled.
    let b = registry.acquire(ClockConfig::new(LOCALHOST, 40_305)).await.unwrap();
    assert!(Arc::ptr_eq(b.estimator_state(), &state));

    // Well past the original deadline the endpoint must still exist.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(registry.active_endpoints().await, 1);
}

#[tokio::test]
async fn test_corrupted_estimator_skips_grace_period() {
    let registry = fast_registry();

    let a = registry.acquire(ClockConfig::new(LOCALHOST, 40_306)).await.unwrap();
    a.estimator_state().mark_corrupted();
    drop(a);

    // No 100 ms grace for a corrupted endpoint.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.active_endpoints().await, 0);
}

#[tokio::test]
async fn test_corrupted_estimator_replaced_on_acquire() {
    let registry = fast_registry();

    let a = registry.acquire(ClockConfig::new(LOCALHOST, 40_307)).await.unwrap();
    let old = Arc::clone(a.estimator_state());
    old.mark_corrupted();

    // A new acquire never hands out the corrupted estimator.
    let b = registry.acquire(ClockConfig::new(LOCALHOST, 40_307)).await.unwrap();
    assert!(!Arc::ptr_eq(b.estimator_state(), &old));
    assert!(!b.estimator_state().is_corrupted());
    assert_eq!(registry.active_endpoints().await, 1);

    drop(a);
}
