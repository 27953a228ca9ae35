use std::cell::Cell;
use std::time::Duration;

use super::{Backoff, RetryPolicy, Verdict, connection_verdict, message_verdict, run};
use crate::utils::error::{CodecError, ConfigError, Error, HandlerError, TransportError};

fn immediate(attempts: u32) -> RetryPolicy {
    RetryPolicy::attempts(attempts).with_backoff(Backoff::none())
}

#[tokio::test]
async fn test_always_retryable_runs_exactly_max_attempts() {
    let calls = Cell::new(0);
    let result: Result<(), String> = run(
        || {
            calls.set(calls.get() + 1);
            async { Err("refused".to_string()) }
        },
        |_| Verdict::Retryable,
        &immediate(4),
    )
    .await;

    assert_eq!(result.unwrap_err(), "refused");
    assert_eq!(calls.get(), 4);
}

#[tokio::test]
async fn test_fatal_classifier_runs_once() {
    let calls = Cell::new(0);
    let result: Result<(), String> = run(
        || {
            calls.set(calls.get() + 1);
            async { Err("bad config".to_string()) }
        },
        |_| Verdict::Fatal,
        &immediate(10),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn test_success_after_failures_returns_value() {
    let calls = Cell::new(0);
    let result: Result<u32, String> = run(
        || {
            let n = calls.get() + 1;
            calls.set(n);
            async move {
                if n < 3 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            }
        },
        |_| Verdict::Retryable,
        &immediate(5),
    )
    .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.get(), 3);
}

#[tokio::test]
async fn test_each_call_has_its_own_budget() {
    let policy = immediate(2);
    for _ in 0..3 {
        let calls = Cell::new(0);
        let _: Result<(), &str> = run(
            || {
                calls.set(calls.get() + 1);
                async { Err("down") }
            },
            |_| Verdict::Retryable,
            &policy,
        )
        .await;
        assert_eq!(calls.get(), 2);
    }
}

#[tokio::test]
async fn test_classifier_sees_each_error() {
    let calls = Cell::new(0);
    let result: Result<(), u32> = run(
        || {
            let n = calls.get() + 1;
            calls.set(n);
            async move { Err(n) }
        },
        // second failure is fatal
        |err| if *err >= 2 { Verdict::Fatal } else { Verdict::Retryable },
        &immediate(10),
    )
    .await;

    assert_eq!(result.unwrap_err(), 2);
    assert_eq!(calls.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_sleeps_between_attempts() {
    let policy = RetryPolicy::attempts(3).with_backoff(
        Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1)).without_jitter(),
    );
    let started = tokio::time::Instant::now();
    let _: Result<(), &str> = run(|| async { Err("down") }, |_| Verdict::Retryable, &policy).await;

    // 100ms after the first failure, 200ms after the second, none after the last
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[test]
fn test_backoff_is_capped_and_jitter_stays_in_range() {
    let backoff = Backoff::exponential(Duration::from_millis(100), Duration::from_millis(800));
    for attempt in 1..20 {
        let delay = backoff.delay(attempt);
        let ceiling = Duration::from_millis(100 * 2u64.pow((attempt - 1).min(3)));
        assert!(delay <= ceiling, "attempt {attempt}: {delay:?} > {ceiling:?}");
        assert!(delay >= ceiling / 2, "attempt {attempt}: {delay:?} < {:?}", ceiling / 2);
    }
    assert_eq!(Backoff::none().delay(7), Duration::ZERO);
}

#[test]
fn test_connection_verdicts() {
    let refused = Error::Transport(TransportError::ConnectionRefused("localhost:5672".into()));
    let lost = Error::Transport(TransportError::ConnectionLost("consumer cancelled".into()));
    let escalated = Error::Handler(HandlerError::failed("database down"));
    let protocol = Error::Transport(TransportError::Protocol("ACCESS_REFUSED".into()));
    let config = Error::Config(ConfigError::NoRoutingKeys);
    let codec = Error::Codec(CodecError::Encode("key must be a string".into()));

    assert_eq!(connection_verdict(&refused), Verdict::Retryable);
    assert_eq!(connection_verdict(&lost), Verdict::Retryable);
    assert_eq!(connection_verdict(&escalated), Verdict::Retryable);
    assert_eq!(connection_verdict(&protocol), Verdict::Fatal);
    assert_eq!(connection_verdict(&config), Verdict::Fatal);
    assert_eq!(connection_verdict(&codec), Verdict::Fatal);
}

#[test]
fn test_message_verdicts() {
    assert_eq!(
        message_verdict(&HandlerError::Malformed("empty".into())),
        Verdict::Retryable
    );
    assert_eq!(
        message_verdict(&HandlerError::failed("boom")),
        Verdict::Fatal
    );
}
