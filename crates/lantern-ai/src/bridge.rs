//! Background execution of AI requests.
//!
//! The interactive side submits work and keeps running; workers run on a
//! tokio runtime and report back through a single event channel the
//! interactive loop drains. For one submission, stage events arrive in
//! stage order and `Completed` always arrives last.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::error::AIError;

/// Progress markers of one request, in the order they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Input read and prompt built.
    Prepared,
    /// Inference or remote call in flight.
    Running,
    /// Response being formatted for display.
    Formatting,
}

/// Notifications delivered to the interactive side.
#[derive(Debug)]
pub enum BridgeEvent {
    Stage {
        ticket: u64,
        stage: Stage,
    },
    Download {
        ticket: u64,
        downloaded: u64,
        total: u64,
    },
    Completed {
        ticket: u64,
        target: String,
        result: Result<String, AIError>,
    },
}

/// Handle to an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: u64,
    pub target: String,
}

/// Passed to submitted work for reporting progress.
#[derive(Debug, Clone)]
pub struct StageReporter {
    ticket: u64,
    events: mpsc::UnboundedSender<BridgeEvent>,
    last: Arc<Mutex<Option<Stage>>>,
}

impl StageReporter {
    /// Report `stage`. Stages at or before the last reported one are dropped.
    pub fn stage(&self, stage: Stage) {
        let mut last = lock(&self.last);
        if last.is_some_and(|prev| stage <= prev) {
            debug!("Ticket {}: ignoring out-of-order stage {:?}", self.ticket, stage);
            return;
        }
        *last = Some(stage);
        let _ = self.events.send(BridgeEvent::Stage {
            ticket: self.ticket,
            stage,
        });
    }

    /// Report download progress.
    pub fn download(&self, downloaded: u64, total: u64) {
        let _ = self.events.send(BridgeEvent::Download {
            ticket: self.ticket,
            downloaded,
            total,
        });
    }
}

/// Runs AI work off the interactive thread.
pub struct Bridge {
    runtime: Handle,
    workers: Arc<Semaphore>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    next_ticket: AtomicU64,
}

impl Bridge {
    /// Create a bridge running at most `max_workers` requests at once.
    ///
    /// The receiver is meant to be drained by the interactive loop.
    pub fn new(runtime: Handle, max_workers: usize) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let bridge = Self {
            runtime,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            events,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            next_ticket: AtomicU64::new(1),
        };
        (bridge, receiver)
    }

    /// Start `work` in the background and return immediately.
    ///
    /// Fails with `Busy` while an earlier submission for the same `target`
    /// is outstanding. Errors and panics inside `work` are delivered as the
    /// `Completed` result.
    pub fn submit<F, Fut>(&self, target: impl Into<String>, work: F) -> Result<Ticket, AIError>
    where
        F: FnOnce(StageReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, AIError>> + Send + 'static,
    {
        let target = target.into();
        if !lock(&self.in_flight).insert(target.clone()) {
            return Err(AIError::Busy(target));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let reporter = StageReporter {
            ticket,
            events: self.events.clone(),
            last: Arc::new(Mutex::new(None)),
        };
        let workers = self.workers.clone();
        let events = self.events.clone();
        let in_flight = self.in_flight.clone();
        let runtime = self.runtime.clone();
        let done_target = target.clone();

        self.runtime.spawn(async move {
            let result = match workers.acquire_owned().await {
                Ok(_permit) => match runtime.spawn(async move { work(reporter).await }).await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => {
                        let msg = panic_message(e.into_panic());
                        warn!("AI worker for {} panicked: {}", done_target, msg);
                        Err(AIError::Worker(msg))
                    }
                    Err(e) => Err(AIError::Worker(e.to_string())),
                },
                Err(e) => Err(AIError::Worker(e.to_string())),
            };

            lock(&in_flight).remove(&done_target);
            let _ = events.send(BridgeEvent::Completed {
                ticket,
                target: done_target,
                result,
            });
        });

        debug!("Submitted ticket {} for {}", ticket, target);
        Ok(Ticket { id: ticket, target })
    }

    /// Whether a submission for `target` is outstanding.
    pub fn is_busy(&self, target: &str) -> bool {
        lock(&self.in_flight).contains(target)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
