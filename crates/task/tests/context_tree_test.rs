//! Integration tests for the context tree
//!
//! Run with: cargo test -p amp-task --test context_tree_test

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use amp_task::{Context, ContextState, StopOutcome, TaskError};

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_close_reaches_every_descendant_first() {
    let host = Context::root("host");
    let observed = Arc::new(AtomicUsize::new(0));
    let mut nodes = Vec::new();

    for s in 0..3 {
        let session = host.start_scope(format!("session-{s}")).unwrap();
        for p in 0..4 {
            let observed = observed.clone();
            let pin = session
                .start_child(format!("pin-{p}"), move |ctx| async move {
                    ctx.done().await;
                    observed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
            nodes.push(pin);
        }
        nodes.push(session);
    }

    host.close();
    host.closed().await.unwrap();

    assert_eq!(observed.load(Ordering::SeqCst), 12);
    for node in &nodes {
        assert!(node.is_done());
        assert_eq!(node.state(), ContextState::Closed);
    }
    assert_eq!(host.child_count(), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_done_observers_see_closing_state() {
    for _ in 0..20 {
        let host = Context::root("host");
        let session = host.start_scope("session").unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for p in 0..4 {
            let seen = seen.clone();
            session
                .start_child(format!("pin-{p}"), move |ctx| async move {
                    ctx.done().await;
                    seen.lock().push(ctx.state());
                    Ok(())
                })
                .unwrap();
        }

        host.close_and_wait().await.unwrap();

        let seen = seen.lock();
        assert!(seen.len() <= 4);
        assert!(seen.iter().all(|state| *state == ContextState::Closing));
    }
}

#[test_log::test(tokio::test)]
async fn test_closing_a_child_leaves_the_parent_running() {
    let host = Context::root("host");
    let a = host.start_scope("a").unwrap();
    let b = host.start_scope("b").unwrap();

    a.close_and_wait().await.unwrap();

    assert_eq!(host.state(), ContextState::Running);
    assert_eq!(b.state(), ContextState::Running);
    assert!(!b.is_done());
    assert_eq!(host.child_count(), 1);
    assert_eq!(host.children()[0].id(), b.id());
}

#[test_log::test(tokio::test)]
async fn test_double_close_reports_same_outcome() {
    let host = Context::root("host");
    let failing = host
        .start_child("flaky", |_ctx| async { Err(anyhow::anyhow!("lost connection")) })
        .unwrap();

    let first = failing.closed().await;
    failing.close();
    failing.close();
    let second = failing.closed().await;

    assert_eq!(first, second);
    match first {
        Err(TaskError::Failed { label, message }) => {
            assert_eq!(label, "flaky");
            assert!(message.contains("lost connection"));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    host.close();
    host.close();
    assert_eq!(host.closed().await, Ok(()));
    assert_eq!(host.closed().await, Ok(()));
}

#[test_log::test(tokio::test)]
async fn test_start_child_on_closing_parent_fails() {
    let host = Context::root("host");
    let session = host.start_scope("session").unwrap();
    host.close();

    let err = session
        .start_child("pin", |_ctx| async { Ok(()) })
        .unwrap_err();
    assert_eq!(err, TaskError::Closing);
    assert!(session.start_scope("pin").is_err());
}

#[test_log::test(tokio::test)]
async fn test_stop_request_reaches_grandchildren_without_cancelling() {
    let host = Context::root("host");
    let session = host.start_scope("session").unwrap();
    let pin = session
        .start_child("pin", |ctx| async move {
            ctx.stop_requested().await;
            Ok(())
        })
        .unwrap();

    assert_eq!(host.graceful_stop().await, StopOutcome::Drained);

    assert!(session.is_stop_requested());
    assert!(!session.is_done());
    assert_eq!(pin.closed().await, Ok(()));
    assert_eq!(host.state(), ContextState::Closing);

    // New work is refused while stopping
    assert!(session.start_scope("late").is_err());

    host.close_and_wait().await.unwrap();
    assert_eq!(session.state(), ContextState::Closed);
}

#[test_log::test(tokio::test)]
async fn test_graceful_stop_waits_for_running_bodies() {
    let host = Context::root("host");
    let finished = Arc::new(AtomicBool::new(false));

    {
        let finished = finished.clone();
        host.start_child("flush", move |_ctx| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            finished.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    }

    assert_eq!(host.graceful_stop().await, StopOutcome::Drained);
    assert!(finished.load(Ordering::SeqCst));
    host.close_and_wait().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_graceful_stop_overtaken_by_close() {
    let host = Context::root("host");
    host.start_child("stubborn", |ctx| async move {
        ctx.done().await;
        Ok(())
    })
    .unwrap();

    let closer = host.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        closer.close();
    });

    assert_eq!(host.graceful_stop().await, StopOutcome::Cancelled);
    assert_eq!(host.state(), ContextState::Closed);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_graceful_stop_timeout_forces_close() {
    let host = Context::root("host");
    let stubborn = host
        .start_child("stubborn", |ctx| async move {
            ctx.done().await;
            Ok(())
        })
        .unwrap();

    let outcome = host.graceful_stop_timeout(Duration::from_millis(100)).await;

    assert_eq!(outcome, StopOutcome::TimedOut);
    host.closed().await.unwrap();
    assert_eq!(host.state(), ContextState::Closed);
    assert_eq!(stubborn.state(), ContextState::Closed);
}

#[test_log::test(tokio::test)]
async fn test_graceful_stop_timeout_ignores_stuck_body() {
    let host = Context::root("host");
    let stuck = host
        .start_child("stuck", |_ctx| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        host.graceful_stop_timeout(Duration::from_millis(50)),
    )
    .await;

    assert_eq!(outcome, Ok(StopOutcome::TimedOut));
    assert!(host.is_done());
    assert!(stuck.is_done());
    assert_eq!(host.state(), ContextState::Closing);
    assert_eq!(stuck.state(), ContextState::Closing);
}

#[test_log::test(tokio::test)]
async fn test_body_error_does_not_close_parent() {
    let host = Context::root("host");
    let session = host.start_scope("session").unwrap();
    let failing = session
        .start_child("broken", |_ctx| async { Err(anyhow::anyhow!("bad manifest")) })
        .unwrap();

    assert!(failing.closed().await.is_err());
    assert!(failing.err().is_some());
    assert_eq!(session.state(), ContextState::Running);
    assert!(session.err().is_none());
    assert_eq!(session.child_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_closing_hooks_run_on_ancestor_close() {
    let host = Context::root("host");
    let session = host.start_scope("session").unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    {
        let released = released.clone();
        session.on_closing(move || {
            released.fetch_add(1, Ordering::SeqCst);
        });
    }

    host.close_and_wait().await.unwrap();
    session.close();

    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_close_when_idle() {
    let host = Context::root("host");
    let app = host.start_scope("app").unwrap();
    app.close_when_idle(Duration::from_millis(100));

    let pin = app.start_scope("pin").unwrap();

    // Held open while a pin exists
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(app.state(), ContextState::Running);

    let released_at = Instant::now();
    pin.close();
    app.closed().await.unwrap();

    assert!(released_at.elapsed() >= Duration::from_millis(100));
    assert_eq!(host.child_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_parent_link() {
    let host = Context::root("host");
    let session = host.start_scope("session").unwrap();

    assert!(host.parent().is_none());
    assert_eq!(session.parent().map(|p| p.id()), Some(host.id()));
    assert_eq!(session.label(), "session");
}
