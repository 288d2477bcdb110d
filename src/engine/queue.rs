// src/engine/queue.rs
//
// Answer reliability queue: a session-scoped actor that makes "save this
// answer" resilient to transient network failure without one request per
// keystroke. Rapid edits to the same question coalesce (last write wins),
// a single debounce timer batches the quiet moment, and each batch item is
// persisted concurrently with bounded per-item retry. Failures never reach
// the caller as panics or errors; they are observable through the status
// surface only.
//
// One instance is owned by one exam-taking session: constructed at session
// start, shut down at session end. The persistence boundary is injected as
// a trait so tests drive the queue against a mock store on virtual time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};

use crate::config;
use crate::models::question::AnswerValue;

/// Failure of one persistence attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Worth retrying: network failure, timeout, server hiccup.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// Not worth retrying: the server rejected the save outright.
    #[error("save rejected: {0}")]
    Rejected(String),
}

/// Persistence boundary for one exam session. The server-side operation is
/// an upsert keyed by (submission, question), so replays caused by client
/// retries are harmless.
#[async_trait]
pub trait AnswerStore: Send + Sync + 'static {
    async fn save_answer(&self, question_id: i64, answer: &AnswerValue) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Quiet interval after the last edit before a flush fires.
    pub debounce: Duration,
    /// Total attempts per item before it is parked as failed.
    pub retry_limit: u32,
    /// Ceiling on how long `flush_all` waits for confirmation.
    pub flush_all_timeout: Duration,
    /// Poll cadence inside `flush_all`.
    pub flush_poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(config::ANSWER_DEBOUNCE_MS),
            retry_limit: config::ANSWER_RETRY_LIMIT,
            flush_all_timeout: Duration::from_millis(config::FLUSH_ALL_TIMEOUT_MS),
            flush_poll_interval: Duration::from_millis(config::FLUSH_POLL_INTERVAL_MS),
        }
    }
}

/// Save state of one question, for "saving.../saved/failed" indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    Pending,
    InFlight,
    Failed,
    Saved,
}

/// Snapshot of the queue's bookkeeping sets.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStatus {
    pub pending: Vec<i64>,
    pub in_flight: Vec<i64>,
    pub failed: Vec<i64>,
    pub saved: Vec<i64>,
}

impl QueueStatus {
    /// True once nothing is waiting to be written or awaiting confirmation.
    /// Terminally failed items do not block idleness; they are reported,
    /// not retried.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// State of one question. Pending beats in-flight beats failed beats
    /// saved: a newer edit supersedes every older outcome.
    pub fn state_of(&self, question_id: i64) -> Option<SaveState> {
        if self.pending.contains(&question_id) {
            Some(SaveState::Pending)
        } else if self.in_flight.contains(&question_id) {
            Some(SaveState::InFlight)
        } else if self.failed.contains(&question_id) {
            Some(SaveState::Failed)
        } else if self.saved.contains(&question_id) {
            Some(SaveState::Saved)
        } else {
            None
        }
    }
}

/// What `flush_all` could and could not confirm before its deadline.
#[derive(Debug, Clone, Serialize)]
pub struct FlushReport {
    pub saved: Vec<i64>,
    /// Question ids whose latest value is not confirmed persisted:
    /// still pending, still in flight, or terminally failed.
    pub unsaved: Vec<i64>,
    pub timed_out: bool,
}

impl FlushReport {
    pub fn all_saved(&self) -> bool {
        self.unsaved.is_empty()
    }
}

enum Command {
    Enqueue { question_id: i64, answer: AnswerValue },
    FlushNow,
    Status { reply: oneshot::Sender<QueueStatus> },
    Shutdown,
}

/// Handle to a running queue actor. Cheap to clone; dropping every handle
/// stops the actor.
#[derive(Clone)]
pub struct AnswerQueue {
    tx: mpsc::UnboundedSender<Command>,
    config: QueueConfig,
}

impl AnswerQueue {
    /// Spawn the actor for one exam session.
    pub fn spawn<S: AnswerStore>(store: S, config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            store: Arc::new(store),
            config: config.clone(),
            pending: HashMap::new(),
            in_flight: HashMap::new(),
            failed: HashMap::new(),
            saved: HashSet::new(),
            deadline: None,
            tasks: JoinSet::new(),
        };
        tokio::spawn(worker.run(rx));
        Self { tx, config }
    }

    /// Record the latest value for a question. Overwrites any queued value
    /// for the same question (last write wins) and resets the debounce
    /// timer. Performs no I/O and never fails into the caller.
    pub fn enqueue(&self, question_id: i64, answer: AnswerValue) {
        let sent = self.tx.send(Command::Enqueue {
            question_id,
            answer,
        });
        if sent.is_err() {
            tracing::warn!(question_id, "answer queue is gone; edit dropped");
        }
    }

    /// Current snapshot of the pending/in-flight/failed/saved sets.
    pub async fn status(&self) -> QueueStatus {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Status { reply }).is_err() {
            return QueueStatus::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Used at explicit exam submission: cancel the debounce, flush
    /// immediately, then poll until everything is confirmed or the
    /// configured timeout elapses. Never blocks past the timeout; the
    /// report lists whatever remained unconfirmed so the caller can warn
    /// the student instead of silently losing answers.
    pub async fn flush_all(&self) -> FlushReport {
        let deadline = Instant::now() + self.config.flush_all_timeout;
        loop {
            // Re-triggering the flush each round also drains items that a
            // transient failure put back into the pending set.
            let _ = self.tx.send(Command::FlushNow);
            let status = self.status().await;
            if status.is_idle() {
                return Self::report(status, false);
            }
            let now = Instant::now();
            if now >= deadline {
                return Self::report(status, true);
            }
            let nap = self.config.flush_poll_interval.min(deadline - now);
            tokio::time::sleep(nap).await;
        }
    }

    /// Stop the actor. In-flight saves are abandoned; call `flush_all`
    /// first when the answers still matter.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    fn report(status: QueueStatus, timed_out: bool) -> FlushReport {
        let mut unsaved: Vec<i64> = status
            .pending
            .iter()
            .chain(status.in_flight.iter())
            .chain(status.failed.iter())
            .copied()
            .collect();
        unsaved.sort_unstable();
        unsaved.dedup();
        let saved = status
            .saved
            .iter()
            .copied()
            .filter(|id| !unsaved.contains(id))
            .collect();
        FlushReport {
            saved,
            unsaved,
            timed_out,
        }
    }
}

struct PendingItem {
    answer: AnswerValue,
    retries: u32,
}

type SaveOutcome = (i64, PendingItem, Result<(), StoreError>);

enum Event {
    Cmd(Option<Command>),
    DebounceFired,
    SaveDone(Result<SaveOutcome, tokio::task::JoinError>),
}

struct Worker<S> {
    store: Arc<S>,
    config: QueueConfig,
    /// Latest unflushed value per question.
    pending: HashMap<i64, PendingItem>,
    /// Dispatch count per question; a question can briefly have an old
    /// value in flight while a newer one is already pending again.
    in_flight: HashMap<i64, u32>,
    failed: HashMap<i64, StoreError>,
    saved: HashSet<i64>,
    deadline: Option<Instant>,
    tasks: JoinSet<SaveOutcome>,
}

impl<S: AnswerStore> Worker<S> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let event = tokio::select! {
                cmd = rx.recv() => Event::Cmd(cmd),
                _ = sleep_until(self.deadline.unwrap_or_else(Instant::now)),
                    if self.deadline.is_some() => Event::DebounceFired,
                Some(outcome) = self.tasks.join_next(),
                    if !self.tasks.is_empty() => Event::SaveDone(outcome),
            };

            match event {
                Event::Cmd(None) | Event::Cmd(Some(Command::Shutdown)) => break,
                Event::Cmd(Some(Command::Enqueue {
                    question_id,
                    answer,
                })) => {
                    // Last write wins: a fresh value supersedes any queued
                    // value and clears a terminal failure for this question.
                    self.pending
                        .insert(question_id, PendingItem { answer, retries: 0 });
                    self.failed.remove(&question_id);
                    self.deadline = Some(Instant::now() + self.config.debounce);
                }
                Event::Cmd(Some(Command::FlushNow)) => {
                    self.deadline = None;
                    self.flush();
                }
                Event::Cmd(Some(Command::Status { reply })) => {
                    let _ = reply.send(self.snapshot());
                }
                Event::DebounceFired => {
                    self.deadline = None;
                    self.flush();
                }
                Event::SaveDone(Ok(outcome)) => self.on_save_done(outcome),
                Event::SaveDone(Err(join_err)) => {
                    // A panicking store implementation loses its slot; the
                    // affected question resurfaces on the next edit.
                    tracing::error!(error = %join_err, "answer save task aborted");
                }
            }
        }
    }

    /// Move every pending item into flight, dispatched concurrently. There
    /// is no ordering between items: each targets a distinct question and
    /// the server upsert is keyed per question.
    fn flush(&mut self) {
        for (question_id, item) in self.pending.drain() {
            *self.in_flight.entry(question_id).or_insert(0) += 1;
            let store = Arc::clone(&self.store);
            self.tasks.spawn(async move {
                let result = store.save_answer(question_id, &item.answer).await;
                (question_id, item, result)
            });
        }
    }

    fn on_save_done(&mut self, (question_id, item, result): SaveOutcome) {
        match self.in_flight.get_mut(&question_id) {
            Some(count) if *count > 1 => *count -= 1,
            _ => {
                self.in_flight.remove(&question_id);
            }
        }

        match result {
            Ok(()) => {
                self.saved.insert(question_id);
                self.failed.remove(&question_id);
            }
            Err(_) if self.pending.contains_key(&question_id) => {
                // A newer edit is already queued; the failed attempt carried
                // a superseded value and is not worth retrying.
            }
            Err(err) => {
                let attempts = item.retries + 1;
                let terminal = matches!(err, StoreError::Rejected(_))
                    || attempts >= self.config.retry_limit;
                if terminal {
                    tracing::warn!(
                        question_id,
                        attempts,
                        error = %err,
                        "answer save failed terminally"
                    );
                    self.saved.remove(&question_id);
                    self.failed.insert(question_id, err);
                } else {
                    // Back into the pending set; re-arm the timer so the
                    // retry flushes even if the student types nothing more.
                    self.pending.insert(
                        question_id,
                        PendingItem {
                            answer: item.answer,
                            retries: attempts,
                        },
                    );
                    self.deadline = Some(Instant::now() + self.config.debounce);
                }
            }
        }
    }

    fn snapshot(&self) -> QueueStatus {
        fn sorted(ids: impl Iterator<Item = i64>) -> Vec<i64> {
            let mut ids: Vec<i64> = ids.collect();
            ids.sort_unstable();
            ids
        }
        QueueStatus {
            pending: sorted(self.pending.keys().copied()),
            in_flight: sorted(self.in_flight.keys().copied()),
            failed: sorted(self.failed.keys().copied()),
            saved: sorted(self.saved.iter().copied()),
        }
    }
}

/// Production store: PUTs each answer to the exam session endpoint,
/// authenticated as the current student.
pub struct HttpAnswerStore {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: String,
}

impl HttpAnswerStore {
    /// `endpoint` is the full URL of the save-answer route, e.g.
    /// `https://host/api/exams/42/session/answers`.
    pub fn new(client: reqwest::Client, endpoint: String, bearer_token: String) -> Self {
        Self {
            client,
            endpoint,
            bearer_token,
        }
    }
}

#[async_trait]
impl AnswerStore for HttpAnswerStore {
    async fn save_answer(&self, question_id: i64, answer: &AnswerValue) -> Result<(), StoreError> {
        let body = serde_json::json!({
            "question_id": question_id,
            "answer": answer,
        });
        let response = self
            .client
            .put(&self.endpoint)
            .bearer_auth(&self.bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(StoreError::Transient(format!("server answered {status}")))
        } else {
            Err(StoreError::Rejected(format!("server answered {status}")))
        }
    }
}
