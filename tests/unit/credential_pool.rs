//! Unit tests for the credential pool

use crate::support::credentials;
use channel_stats_harvester::credentials::{CredentialPool, PoolError};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// advance() walks forward and marks each abandoned credential invalid
#[test]
fn test_advance_marks_and_moves_forward() {
    let mut pool = CredentialPool::in_order(credentials(&["k1", "k2", "k3"])).unwrap();
    assert_eq!(pool.current().unwrap().developer_key, "k1");

    assert_eq!(pool.advance().unwrap().developer_key, "k2");
    assert!(!pool.credentials()[0].is_active());
    assert_eq!(pool.remaining(), 2);

    assert_eq!(pool.advance().unwrap().developer_key, "k3");
    assert_eq!(pool.advances(), 2);
}

/// Exhaustion is sticky: the pool never wraps back to the first key
#[test]
fn test_exhaustion_never_wraps() {
    let mut pool = CredentialPool::in_order(credentials(&["k1", "k2"])).unwrap();
    pool.advance().unwrap();
    assert_eq!(pool.advance().unwrap_err(), PoolError::Exhausted { tried: 2 });
    assert_eq!(pool.current().unwrap_err(), PoolError::Exhausted { tried: 2 });
    assert_eq!(pool.advance().unwrap_err(), PoolError::Exhausted { tried: 2 });
    assert_eq!(pool.remaining(), 0);
}

/// Shuffling is a permutation and is reproducible for a seeded RNG
#[test]
fn test_shuffle_is_permutation() {
    let keys: Vec<String> = (0..20).map(|i| format!("key-{i}")).collect();
    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();

    let a = CredentialPool::shuffled_with(credentials(&refs), &mut StdRng::seed_from_u64(7))
        .unwrap();
    let b = CredentialPool::shuffled_with(credentials(&refs), &mut StdRng::seed_from_u64(7))
        .unwrap();
    assert_eq!(a.credentials(), b.credentials());

    let mut order: Vec<String> = a
        .credentials()
        .iter()
        .map(|c| c.developer_key.clone())
        .collect();
    order.sort();
    let mut expected = keys.clone();
    expected.sort();
    assert_eq!(order, expected);
}

/// Debug output never carries the full developer key
#[test]
fn test_debug_redacts_key() {
    let pool = CredentialPool::in_order(credentials(&["AIzaSySecretValue1234"])).unwrap();
    let debug = format!("{:?}", pool.current().unwrap());
    assert!(!debug.contains("AIzaSySecretValue1234"));
    assert!(debug.contains("1234"));
}
