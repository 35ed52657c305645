//! # Progress Stream Multiplexer
//!
//! Fans a run's progress events out to any number of subscribers without
//! ever back-pressuring the engine.
//!
//! Each run has one [`RunHandle`] holding, under a single lock: the run
//! state, the append-only event log, the sequence counter, and a broadcast
//! sender. Every transition mutates state and emits its events atomically
//! under that lock. [`RunHandle::subscribe`] takes the same lock to clone
//! the state and attach a receiver, so the snapshot a subscriber gets is
//! exactly consistent with the last emitted sequence number; the live
//! sequence then continues from the next event with no gap and no
//! duplicate.
//!
//! Slow subscribers overflow the bounded broadcast buffer and observe
//! [`StreamLagged`]; the remedy is a fresh subscription. The engine never
//! waits for consumers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;

use super::events::{ProgressEvent, ProgressEventKind};
use crate::error::StreamLagged;
use crate::run::WorkflowRun;

struct RunShared {
    run: WorkflowRun,
    next_sequence: u64,
    log: Vec<ProgressEvent>,
    tx: broadcast::Sender<ProgressEvent>,
}

/// Owns one run's state, event log, and fan-out channel.
pub(crate) struct RunHandle {
    shared: Mutex<RunShared>,
    cancel_requested: AtomicBool,
    started: AtomicBool,
}

impl RunHandle {
    pub(crate) fn new(run: WorkflowRun, event_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(event_capacity.max(1));
        Self {
            shared: Mutex::new(RunShared {
                run,
                next_sequence: 1,
                log: Vec::new(),
                tx,
            }),
            cancel_requested: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    // A poisoned lock means an engine task panicked mid-transition; reads
    // and cancellation must keep working regardless.
    fn lock(&self) -> MutexGuard<'_, RunShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First caller wins; later calls see `false`. Backs `start` idempotence.
    pub(crate) fn claim_start(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Read the run state without mutating it.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&WorkflowRun) -> T) -> T {
        f(&self.lock().run)
    }

    pub(crate) fn snapshot(&self) -> WorkflowRun {
        self.lock().run.clone()
    }

    /// Mutate the run and emit the transition's events atomically.
    ///
    /// Events are sequenced, appended to the replay log, and broadcast in
    /// order under the lock; a send with no subscribers is fine.
    pub(crate) fn transition<T>(
        &self,
        f: impl FnOnce(&mut WorkflowRun) -> (T, Vec<ProgressEventKind>),
    ) -> T {
        let mut shared = self.lock();
        let (out, kinds) = f(&mut shared.run);
        let run_id = shared.run.id;
        for kind in kinds {
            let event = ProgressEvent {
                run_id,
                sequence: shared.next_sequence,
                timestamp: Utc::now(),
                kind,
            };
            shared.next_sequence += 1;
            shared.log.push(event.clone());
            let _ = shared.tx.send(event);
        }
        out
    }

    /// Snapshot-synchronized subscription: the returned snapshot reflects
    /// every event emitted so far, and the live sequence starts at the next
    /// one.
    pub(crate) fn subscribe(&self) -> RunSubscription {
        let shared = self.lock();
        let snapshot = shared.run.clone();
        let rx = shared.tx.subscribe();
        let finished = snapshot.status.is_terminal();
        RunSubscription {
            snapshot,
            rx,
            finished,
            lagged: None,
        }
    }

    /// Replay of the retained log, strictly after `after_sequence`.
    pub(crate) fn events_since(&self, after_sequence: u64) -> Vec<ProgressEvent> {
        self.lock()
            .log
            .iter()
            .filter(|event| event.sequence > after_sequence)
            .cloned()
            .collect()
    }
}

/// A live view over one run: a state snapshot plus the events that follow it.
///
/// The event sequence is finite: once the terminal event has been
/// delivered (or the snapshot was already terminal),
/// [`RunSubscription::next`] returns `None`.
pub struct RunSubscription {
    snapshot: WorkflowRun,
    rx: broadcast::Receiver<ProgressEvent>,
    finished: bool,
    lagged: Option<u64>,
}

impl RunSubscription {
    /// The run state as of subscription time.
    pub fn snapshot(&self) -> &WorkflowRun {
        &self.snapshot
    }

    /// The next live event.
    ///
    /// `Ok(None)` once the sequence has ended. [`StreamLagged`] means this
    /// subscriber fell behind the bounded buffer and was dropped; it keeps
    /// being returned until the caller re-subscribes.
    pub async fn next(&mut self) -> Result<Option<ProgressEvent>, StreamLagged> {
        if let Some(missed) = self.lagged {
            return Err(StreamLagged { missed });
        }
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Ok(event) => {
                if event.kind.is_terminal() {
                    self.finished = true;
                }
                Ok(Some(event))
            }
            // The handle was reaped; everything buffered was already drained.
            Err(broadcast::error::RecvError::Closed) => {
                self.finished = true;
                Ok(None)
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                self.lagged = Some(missed);
                Err(StreamLagged { missed })
            }
        }
    }
}
