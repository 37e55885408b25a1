//! Integration tests for the keyed sequencer.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keyseq::error::Error;
use keyseq::event::{EventKind, TaskOutcome};
use keyseq::util::delay;
use keyseq::{KeyedSequencer, SequencerConfig, TaskError, Ticket};
use tokio::sync::oneshot;
use tokio::time::Instant;

fn test_sequencer() -> KeyedSequencer<&'static str> {
    KeyedSequencer::with_config(SequencerConfig {
        name: "test".to_string(),
        ..SequencerConfig::default()
    })
}

// ---------------------------------------------------------------------------
// Result fidelity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fulfilled_work_resolves_with_its_value() {
    let seq = test_sequencer();

    let result = seq
        .submit("key1", |_| async { Ok::<_, &str>("we resolved") })
        .await;

    assert_eq!(result.unwrap(), "we resolved");
    assert_eq!(seq.len("key1"), 0);
    assert!(!seq.contains_key("key1"));
}

#[tokio::test]
async fn rejected_work_rejects_with_its_own_error() {
    let seq = test_sequencer();

    let result = seq
        .submit("key1", |_| async { Err::<(), _>("we rejected") })
        .await;

    match result {
        Err(TaskError::Failed(reason)) => assert_eq!(reason, "we rejected"),
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(seq.len("key1"), 0);
}

#[tokio::test]
async fn existing_future_is_awaited_as_work() {
    let seq = test_sequencer();
    let (tx, rx) = oneshot::channel::<u32>();

    let completion = seq.submit_future("key1", async move { rx.await.map_err(|_| "dropped") });
    assert_eq!(seq.len("key1"), 1);

    tx.send(7).unwrap();
    assert_eq!(completion.await.unwrap(), 7);
    assert_eq!(seq.len("key1"), 0);
}

#[tokio::test]
async fn plain_value_resolves_to_itself() {
    let seq = test_sequencer();
    let value = seq.submit_value("key1", vec![1, 2, 3]).await.unwrap();
    assert_eq!(value, vec![1, 2, 3]);
}

#[tokio::test]
async fn sync_work_receives_its_wait() {
    let seq = test_sequencer();
    let waited = seq
        .submit_fn("key1", |waited| Ok::<_, Infallible>(waited))
        .await
        .unwrap();
    assert!(waited < Duration::from_secs(1));
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn same_key_runs_strictly_in_submission_order() {
    let seq = test_sequencer();
    let log = Arc::new(Mutex::new(Vec::new()));

    let completions: Vec<_> = (0..5u64)
        .map(|i| {
            let log = Arc::clone(&log);
            seq.submit("key1", move |_| async move {
                log.lock().unwrap().push(format!("start {i}"));
                // Earlier tasks take longer, so any overlap would reorder the log.
                tokio::time::sleep(Duration::from_millis(50 - i * 10)).await;
                log.lock().unwrap().push(format!("end {i}"));
                Ok::<_, Infallible>(i)
            })
        })
        .collect();

    for (i, completion) in completions.into_iter().enumerate() {
        assert_eq!(completion.await.unwrap(), i as u64);
    }

    let expected: Vec<String> = (0..5)
        .flat_map(|i| [format!("start {i}"), format!("end {i}")])
        .collect();
    assert_eq!(*log.lock().unwrap(), expected);
}

#[tokio::test(start_paused = true)]
async fn next_task_starts_after_previous_failure() {
    let seq = test_sequencer();
    let log = Arc::new(Mutex::new(Vec::new()));

    let first_log = Arc::clone(&log);
    let first = seq.submit("key1", move |_| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        first_log.lock().unwrap().push("first");
        Err::<(), _>("first failed")
    });
    let second_log = Arc::clone(&log);
    let second = seq.submit("key1", move |_| async move {
        second_log.lock().unwrap().push("second");
        Ok::<_, &str>(())
    });

    assert!(matches!(first.await, Err(TaskError::Failed("first failed"))));
    second.await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn different_keys_run_concurrently() {
    let seq = test_sequencer();
    let started = Instant::now();

    let a = seq.submit("a", |_| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, Infallible>("a")
    });
    let b = seq.submit("b", |_| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, Infallible>("b")
    });

    let (a, b) = tokio::join!(a, b);
    assert_eq!(a.unwrap(), "a");
    assert_eq!(b.unwrap(), "b");
    assert!(started.elapsed() < Duration::from_millis(150));
}

#[tokio::test]
async fn blocked_key_does_not_delay_other_keys() {
    let seq = test_sequencer();
    let (_hold, rx) = oneshot::channel::<()>();

    let _blocked = seq.submit_future("a", async move { rx.await.map_err(|_| "dropped") });

    let other = tokio::time::timeout(Duration::from_secs(1), seq.submit_value("b", 7))
        .await
        .expect("key b should not wait for key a");
    assert_eq!(other.unwrap(), 7);
    assert_eq!(seq.len("a"), 1);
    assert_eq!(seq.len("b"), 0);
}

#[tokio::test(start_paused = true)]
async fn work_receives_time_spent_waiting_for_its_turn() {
    let seq = test_sequencer();
    let (tx, rx) = oneshot::channel::<()>();

    let first = seq.submit_future("key2", async move { rx.await.map_err(|_| "dropped") });
    let second = seq.submit("key2", |waited| async move { Ok::<_, &str>(waited) });

    let slept = delay(Duration::from_millis(50)).await.unwrap();
    assert!(slept >= Duration::from_millis(50));
    tx.send(()).unwrap();

    first.await.unwrap();
    let waited = second.await.unwrap();
    assert!(waited >= Duration::from_millis(50), "waited only {waited:?}");
}

// ---------------------------------------------------------------------------
// Queue length bookkeeping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn length_tracks_twenty_blocking_tasks() {
    let seq = test_sequencer();
    let mut blockers = Vec::new();
    let mut completions = Vec::new();

    for count in 1..=20 {
        let (tx, rx) = oneshot::channel::<Result<u32, u32>>();
        blockers.push(tx);
        completions.push(seq.submit_future("key1", async move {
            rx.await.unwrap_or(Err(u32::MAX))
        }));
        assert_eq!(seq.len("key1"), count);
    }

    let mut remaining = 20;
    for (blocker, completion) in blockers.into_iter().zip(completions) {
        remaining -= 1;
        // Alternate between resolving and rejecting.
        let value = remaining as u32;
        let outcome = if remaining % 2 == 0 { Ok(value) } else { Err(value) };
        blocker.send(outcome).unwrap();

        match completion.await {
            Ok(v) => assert_eq!(v, value),
            Err(TaskError::Failed(v)) => assert_eq!(v, value),
            Err(e) => panic!("unexpected sequencer error: {e}"),
        }
        assert_eq!(seq.len("key1"), remaining);
    }

    assert!(!seq.contains_key("key1"));
    assert_eq!(seq.active_keys(), 0);
}

#[tokio::test]
async fn tasks_released_out_of_order_still_settle_in_order() {
    let seq = test_sequencer();
    let mut blockers = Vec::new();
    let mut completions = Vec::new();

    for _ in 0..10 {
        let (tx, rx) = oneshot::channel::<()>();
        blockers.push(Some(tx));
        completions.push(Some(
            seq.submit_future("key1", async move { rx.await.map_err(|_| "dropped") }),
        ));
    }
    let mut release = |i: usize| blockers[i].take().unwrap().send(()).unwrap();

    // Releasing tasks 5..9 changes nothing while task 0 is still blocked.
    for i in 5..9 {
        release(i);
    }
    tokio::task::yield_now().await;
    assert_eq!(seq.len("key1"), 10);

    // Release the first four one at a time.
    for i in 0..4 {
        release(i);
        completions[i].take().unwrap().await.unwrap();
        assert_eq!(seq.len("key1"), 10 - (i + 1));
    }

    // Releasing task 4 lets 4..9 drain, leaving only the last one.
    release(4);
    completions[8].take().unwrap().await.unwrap();
    assert_eq!(seq.len("key1"), 1);

    release(9);
    completions[9].take().unwrap().await.unwrap();
    assert_eq!(seq.len("key1"), 0);
    assert!(!seq.contains_key("key1"));
}

#[tokio::test]
async fn barrier_waits_for_everything_before_it() {
    let seq = test_sequencer();
    let flag = Arc::new(AtomicBool::new(false));
    let (tx, rx) = oneshot::channel::<()>();

    let _blocker = seq.submit_future("key2", async move { rx.await.map_err(|_| "dropped") });
    let set_flag = Arc::clone(&flag);
    let _setter = seq.submit_fn("key2", move |_| {
        set_flag.store(true, Ordering::SeqCst);
        Ok::<_, Infallible>(())
    });

    assert_eq!(seq.len("key2"), 2);
    assert!(!flag.load(Ordering::SeqCst));

    tx.send(()).unwrap();
    seq.barrier("key2").await.unwrap();

    assert!(flag.load(Ordering::SeqCst));
    assert_eq!(seq.len("key2"), 0);
}

#[tokio::test]
async fn reading_length_never_creates_an_entry() {
    let seq = test_sequencer();

    assert_eq!(seq.len("ghost"), 0);
    assert!(!seq.contains_key("ghost"));
    assert_eq!(seq.active_keys(), 0);
}

#[tokio::test]
async fn tickets_restart_after_a_key_goes_idle() {
    let seq = test_sequencer();

    let first = seq.submit_value("key1", 1);
    let second = seq.submit_value("key1", 2);
    assert_eq!(first.ticket(), Some(Ticket(0)));
    assert_eq!(second.ticket(), Some(Ticket(1)));
    second.await.unwrap();
    first.await.unwrap();

    let again = seq.submit_value("key1", 3);
    assert_eq!(again.ticket(), Some(Ticket(0)));
    assert_eq!(again.key(), "key1");
    again.await.unwrap();
}

// ---------------------------------------------------------------------------
// Failure containment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicking_work_is_reported_and_does_not_wedge_the_key() {
    let seq = test_sequencer();

    let result = seq
        .submit("key1", |_| async {
            if true {
                panic!("boom");
            }
            Ok::<(), &str>(())
        })
        .await;

    match result {
        Err(TaskError::Sequencer(Error::WorkPanicked { key, message })) => {
            assert_eq!(key, "key1");
            assert_eq!(message, "boom");
        }
        other => panic!("expected WorkPanicked, got {other:?}"),
    }
    assert_eq!(seq.len("key1"), 0);

    assert_eq!(seq.submit_value("key1", "after").await.unwrap(), "after");
}

#[test]
fn submitting_outside_a_runtime_resolves_to_an_error() {
    let seq = test_sequencer();

    let completion = seq.submit_value("key1", 1);
    assert_eq!(completion.ticket(), None);
    assert_eq!(seq.len("key1"), 0);

    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let result = rt.block_on(completion);
    assert!(matches!(result, Err(TaskError::Sequencer(Error::Runtime(_)))));
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_follow_a_task_through_its_lifecycle() {
    let seq = test_sequencer();
    let mut rx = seq.subscribe();

    seq.submit_value("key1", ()).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.sequencer, "test");
        assert_eq!(event.key, "key1");
        kinds.push(event.kind);
    }

    assert_eq!(kinds.len(), 4, "unexpected events: {kinds:?}");
    assert_eq!(
        kinds[0],
        EventKind::Enqueued {
            ticket: Ticket(0),
            depth: 1
        }
    );
    assert!(matches!(kinds[1], EventKind::Started { ticket: Ticket(0), .. }));
    assert!(matches!(
        kinds[2],
        EventKind::Settled {
            ticket: Ticket(0),
            outcome: TaskOutcome::Fulfilled,
            ..
        }
    ));
    assert_eq!(kinds[3], EventKind::KeyRetired);
}

#[tokio::test]
async fn events_serialize_with_snake_case_tags() {
    let seq = test_sequencer();
    let mut rx = seq.subscribe();

    let _ = seq.submit("key1", |_| async { Err::<(), _>("nope") }).await;

    let mut settled = None;
    while let Ok(event) = rx.try_recv() {
        if matches!(event.kind, EventKind::Settled { .. }) {
            settled = Some(event);
        }
    }
    let json = serde_json::to_value(settled.expect("settled event")).unwrap();
    assert_eq!(json["kind"]["type"], "settled");
    assert_eq!(json["kind"]["outcome"], "rejected");
}
