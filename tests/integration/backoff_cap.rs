//! Integration tests for transient retry caps and backoff timing
//!
//! The tokio clock is paused, so the 30s / 60s waits complete instantly while
//! `Instant` still advances by the exact slept amount.

use crate::support::{channel, reset, session, unavailable, ScriptedFactory};
use channel_stats_harvester::backoff::{BackoffEngine, CallState};
use channel_stats_harvester::{ErrorKind, HarvestError};
use std::time::Duration;
use tokio::time::Instant;

/// Paused-clock timers fire on millisecond ticks, so allow sub-second slack
fn assert_slept(started: Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_secs(1),
        "elapsed {elapsed:?}, expected {expected:?}"
    );
}

/// N <= 10 consecutive 503s succeed after exactly N sleeps of 30s
#[tokio::test(start_paused = true)]
async fn test_service_unavailable_within_cap_succeeds() {
    for failures in [1usize, 5, 10] {
        let factory = ScriptedFactory::new();
        factory.script("k1", (0..failures).map(|_| Err(unavailable())).collect());
        let mut session = session(&["k1"], &factory);
        let mut engine = BackoffEngine::new();

        let started = Instant::now();
        let response = engine
            .execute(&mut session, &channel("UC1"))
            .await
            .unwrap();

        assert_eq!(response.items[0].id, "UC1");
        assert_eq!(engine.state(), CallState::Succeeded);
        assert_eq!(engine.stats().sleeps, failures as u64);
        assert_slept(started, Duration::from_secs(30) * failures as u32);
        assert_eq!(factory.calls().len(), failures + 1);
    }
}

/// The 11th consecutive 503 fails without an 11th sleep
#[tokio::test(start_paused = true)]
async fn test_eleventh_service_unavailable_fails() {
    let factory = ScriptedFactory::new();
    factory.script("k1", (0..11).map(|_| Err(unavailable())).collect());
    let mut session = session(&["k1"], &factory);
    let mut engine = BackoffEngine::new();

    let started = Instant::now();
    let err = engine
        .execute(&mut session, &channel("UC1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::TransientUpstream));
    assert!(matches!(
        err,
        HarvestError::TransientUpstream { attempts: 11, .. }
    ));
    assert_eq!(engine.stats().sleeps, 10);
    assert_slept(started, Duration::from_secs(300));
    assert_eq!(factory.calls().len(), 11);
    assert_eq!(engine.state(), CallState::Failed);
}

/// Connection resets wait 60s and rebuild the client with the same key
#[tokio::test(start_paused = true)]
async fn test_connection_reset_rebuilds_client() {
    let factory = ScriptedFactory::new();
    factory.script("k1", vec![Err(reset()), Err(reset())]);
    let mut session = session(&["k1", "k2"], &factory);
    let mut engine = BackoffEngine::new();

    let started = Instant::now();
    engine
        .execute(&mut session, &channel("UC1"))
        .await
        .unwrap();

    assert_slept(started, Duration::from_secs(120));
    assert_eq!(factory.builds(), vec!["k1", "k1", "k1"]);
    assert_eq!(session.pool().advances(), 0);
}

/// Eleven resets surface as a transient network failure
#[tokio::test(start_paused = true)]
async fn test_connection_reset_cap() {
    let factory = ScriptedFactory::new();
    factory.script("k1", (0..11).map(|_| Err(reset())).collect());
    let mut session = session(&["k1"], &factory);
    let mut engine = BackoffEngine::new();

    let err = engine
        .execute(&mut session, &channel("UC1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::TransientNetwork));
    assert_eq!(engine.stats().slept, Duration::from_secs(600));
}

/// A class change resets the other class's counter
#[tokio::test(start_paused = true)]
async fn test_interleaved_classes_restart_counters() {
    let factory = ScriptedFactory::new();
    let mut script: Vec<_> = (0..10).map(|_| Err(unavailable())).collect();
    script.push(Err(reset()));
    script.extend((0..10).map(|_| Err(unavailable())));
    factory.script("k1", script);
    let mut session = session(&["k1"], &factory);
    let mut engine = BackoffEngine::new();

    let started = Instant::now();
    engine
        .execute(&mut session, &channel("UC1"))
        .await
        .unwrap();
    assert_eq!(engine.stats().sleeps, 21);
    assert_slept(started, Duration::from_secs(20 * 30 + 60));
}

/// Unclassified failures are never retried
#[tokio::test(start_paused = true)]
async fn test_unclassified_is_fatal() {
    let factory = ScriptedFactory::new();
    factory.script(
        "k1",
        vec![Err(channel_stats_harvester::api::ApiError::Other(
            "HTTP 404: not found".into(),
        ))],
    );
    let mut session = session(&["k1"], &factory);
    let mut engine = BackoffEngine::new();

    let err = engine
        .execute(&mut session, &channel("UC1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Unclassified));
    assert_eq!(engine.stats().sleeps, 0);
    assert_eq!(factory.calls().len(), 1);
}
