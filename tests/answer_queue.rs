// tests/answer_queue.rs
//
// Reliability suite for the answer queue, driven on tokio's paused clock:
// debounce, last-write-wins coalescing, bounded retry, terminal failure
// reporting, and flush_all termination. The store is a mock with a
// scriptable failure plan; no wall-clock time and no network involved.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use exam_engine::engine::queue::{
    AnswerQueue, AnswerStore, QueueConfig, QueueStatus, SaveState, StoreError,
};
use exam_engine::models::question::AnswerValue;

#[derive(Default)]
struct MockInner {
    /// Every successful save, in completion order.
    saves: Mutex<Vec<(i64, AnswerValue)>>,
    /// Attempts per question, successes and failures alike.
    attempts: Mutex<HashMap<i64, u32>>,
    /// Remaining transient failures to inject per question.
    transient_failures: Mutex<HashMap<i64, u32>>,
    /// Questions the server rejects outright.
    rejected: Mutex<HashSet<i64>>,
    /// When set, saves never complete.
    hang: AtomicBool,
}

#[derive(Clone, Default)]
struct MockStore(Arc<MockInner>);

impl MockStore {
    fn fail_transiently(&self, question_id: i64, times: u32) {
        self.0
            .transient_failures
            .lock()
            .unwrap()
            .insert(question_id, times);
    }

    fn reject(&self, question_id: i64) {
        self.0.rejected.lock().unwrap().insert(question_id);
    }

    fn hang(&self) {
        self.0.hang.store(true, Ordering::SeqCst);
    }

    fn saves(&self) -> Vec<(i64, AnswerValue)> {
        self.0.saves.lock().unwrap().clone()
    }

    fn attempts(&self, question_id: i64) -> u32 {
        self.0
            .attempts
            .lock()
            .unwrap()
            .get(&question_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl AnswerStore for MockStore {
    async fn save_answer(&self, question_id: i64, answer: &AnswerValue) -> Result<(), StoreError> {
        if self.0.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        *self
            .0
            .attempts
            .lock()
            .unwrap()
            .entry(question_id)
            .or_insert(0) += 1;

        if self.0.rejected.lock().unwrap().contains(&question_id) {
            return Err(StoreError::Rejected("answer rejected".to_string()));
        }

        {
            let mut failures = self.0.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&question_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::Transient("connection reset".to_string()));
                }
            }
        }

        self.0
            .saves
            .lock()
            .unwrap()
            .push((question_id, answer.clone()));
        Ok(())
    }
}

fn test_config() -> QueueConfig {
    QueueConfig {
        debounce: Duration::from_millis(200),
        retry_limit: 3,
        flush_all_timeout: Duration::from_secs(2),
        flush_poll_interval: Duration::from_millis(50),
    }
}

fn short_answer(text: &str) -> AnswerValue {
    AnswerValue::ShortAnswer {
        text: text.to_string(),
    }
}

/// Wait until nothing is pending or in flight. Terminal failures do not
/// block settlement; they are part of the returned snapshot.
async fn settled(queue: &AnswerQueue) -> QueueStatus {
    loop {
        let status = queue.status().await;
        if status.is_idle() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn last_write_wins_under_rapid_edits() {
    let store = MockStore::default();
    let queue = AnswerQueue::spawn(store.clone(), test_config());

    queue.enqueue(1, short_answer("a"));
    queue.status().await;
    tokio::time::advance(Duration::from_millis(50)).await;

    queue.enqueue(1, short_answer("ab"));
    queue.status().await;
    tokio::time::advance(Duration::from_millis(50)).await;

    queue.enqueue(1, short_answer("abc"));
    queue.status().await;
    tokio::time::advance(Duration::from_millis(250)).await;

    let status = settled(&queue).await;
    assert_eq!(status.saved, vec![1]);
    // Three edits inside one debounce interval collapse to one request
    // carrying the final value.
    assert_eq!(store.saves(), vec![(1, short_answer("abc"))]);
}

#[tokio::test(start_paused = true)]
async fn debounce_waits_for_a_quiet_interval() {
    let store = MockStore::default();
    let queue = AnswerQueue::spawn(store.clone(), test_config());

    queue.enqueue(7, short_answer("first"));
    queue.status().await;
    tokio::time::advance(Duration::from_millis(150)).await;

    // Still inside the debounce window: nothing flushed.
    let status = queue.status().await;
    assert_eq!(status.pending, vec![7]);
    assert!(store.saves().is_empty());

    // A new edit resets the timer.
    queue.enqueue(7, short_answer("second"));
    queue.status().await;
    tokio::time::advance(Duration::from_millis(150)).await;
    assert!(store.saves().is_empty());

    tokio::time::advance(Duration::from_millis(60)).await;
    let status = settled(&queue).await;
    assert_eq!(status.saved, vec![7]);
    assert_eq!(store.saves(), vec![(7, short_answer("second"))]);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_until_success() {
    let store = MockStore::default();
    store.fail_transiently(3, 1);
    let queue = AnswerQueue::spawn(store.clone(), test_config());

    queue.enqueue(3, short_answer("jakarta"));
    let status = settled(&queue).await;

    assert_eq!(status.saved, vec![3]);
    assert!(status.failed.is_empty());
    assert_eq!(store.attempts(3), 2);
    assert_eq!(store.saves(), vec![(3, short_answer("jakarta"))]);
    assert_eq!(status.state_of(3), Some(SaveState::Saved));
}

#[tokio::test(start_paused = true)]
async fn retry_ceiling_terminates_with_a_reported_failure() {
    let store = MockStore::default();
    store.fail_transiently(5, u32::MAX);
    let queue = AnswerQueue::spawn(store.clone(), test_config());

    queue.enqueue(5, short_answer("lost"));
    let status = settled(&queue).await;

    // Exactly the configured number of attempts, then parked as failed:
    // reported, never retried indefinitely, never silently dropped.
    assert_eq!(store.attempts(5), 3);
    assert_eq!(status.failed, vec![5]);
    assert!(store.saves().is_empty());
    assert_eq!(status.state_of(5), Some(SaveState::Failed));
}

#[tokio::test(start_paused = true)]
async fn rejected_save_is_terminal_on_first_attempt() {
    let store = MockStore::default();
    store.reject(9);
    let queue = AnswerQueue::spawn(store.clone(), test_config());

    queue.enqueue(9, short_answer("nope"));
    let status = settled(&queue).await;

    assert_eq!(store.attempts(9), 1);
    assert_eq!(status.failed, vec![9]);
}

#[tokio::test(start_paused = true)]
async fn a_fresh_edit_supersedes_a_terminal_failure() {
    let store = MockStore::default();
    store.fail_transiently(4, u32::MAX);
    let queue = AnswerQueue::spawn(store.clone(), test_config());

    queue.enqueue(4, short_answer("v1"));
    let status = settled(&queue).await;
    assert_eq!(status.failed, vec![4]);

    // Connectivity returns; the student edits again. The new value gets a
    // fresh retry budget and clears the failed marker.
    store.fail_transiently(4, 0);
    queue.enqueue(4, short_answer("v2"));
    let status = settled(&queue).await;

    assert!(status.failed.is_empty());
    assert_eq!(status.saved, vec![4]);
    assert_eq!(store.saves(), vec![(4, short_answer("v2"))]);
}

#[tokio::test(start_paused = true)]
async fn independent_questions_flush_as_one_concurrent_batch() {
    let store = MockStore::default();
    let queue = AnswerQueue::spawn(store.clone(), test_config());

    queue.enqueue(1, short_answer("a"));
    queue.enqueue(2, AnswerValue::TrueFalse { value: true });
    queue.enqueue(
        3,
        AnswerValue::MultipleChoice {
            selected: "B".to_string(),
        },
    );
    queue.status().await;
    tokio::time::advance(Duration::from_millis(250)).await;

    let status = settled(&queue).await;
    assert_eq!(status.saved, vec![1, 2, 3]);
    assert_eq!(store.saves().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn flush_all_confirms_everything_when_the_store_is_healthy() {
    let store = MockStore::default();
    let queue = AnswerQueue::spawn(store.clone(), test_config());

    queue.enqueue(1, short_answer("a"));
    queue.enqueue(2, short_answer("b"));

    // No debounce wait: submission flushes immediately.
    let report = queue.flush_all().await;

    assert!(report.all_saved());
    assert!(!report.timed_out);
    assert_eq!(report.saved, vec![1, 2]);
    assert_eq!(store.saves().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn flush_all_times_out_against_a_dead_network() {
    let store = MockStore::default();
    store.hang();
    let queue = AnswerQueue::spawn(store.clone(), test_config());

    queue.enqueue(1, short_answer("a"));
    queue.enqueue(2, short_answer("b"));

    // Bounded by the configured timeout even though no save ever returns,
    // and the unsaved answers are reported rather than lost silently.
    let report = queue.flush_all().await;

    assert!(report.timed_out);
    assert!(!report.all_saved());
    assert_eq!(report.unsaved, vec![1, 2]);
    assert!(report.saved.is_empty());
}

#[tokio::test(start_paused = true)]
async fn flush_all_reports_terminal_failures_as_unsaved() {
    let store = MockStore::default();
    store.fail_transiently(6, u32::MAX);
    let queue = AnswerQueue::spawn(store.clone(), test_config());

    queue.enqueue(6, short_answer("x"));
    queue.enqueue(7, short_answer("y"));

    let report = queue.flush_all().await;

    assert!(!report.all_saved());
    assert!(!report.timed_out);
    assert_eq!(report.unsaved, vec![6]);
    assert_eq!(report.saved, vec![7]);
}
