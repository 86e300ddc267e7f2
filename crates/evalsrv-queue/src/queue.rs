//! Admission Queue — a bounded FIFO with a single consumer that serializes
//! every evaluation into the one [`IsolateRunner`] the process owns
//! (spec §4.5).
//!
//! A control loop reads from shared state, spawned lazily and
//! self-terminating once the work dries up — a plain FIFO, since this
//! system has no placement or load-balancing to do, just "run the next
//! one".

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use evalsrv_core::{EvalServerError, EvalServerResult};
use evalsrv_runtime::IsolateRunner;

/// A queued unit: the request payload plus a single-use completion
/// channel back to the Request Handler (spec's "Waiter").
struct Waiter {
    code: String,
    msg: Value,
    resolver: oneshot::Sender<String>,
}

struct Inner<E: evalsrv_runtime::GuestExtensions + Send + Sync + 'static> {
    runner: IsolateRunner<E>,
    waiters: Mutex<VecDeque<Waiter>>,
    capacity: usize,
    draining: AtomicBool,
}

/// Shared handle to the queue; cheap to clone, safe to hand to every HTTP
/// handler task.
pub struct AdmissionQueue<E: evalsrv_runtime::GuestExtensions + Send + Sync + 'static> {
    inner: Arc<Inner<E>>,
}

impl<E: evalsrv_runtime::GuestExtensions + Send + Sync + 'static> Clone for AdmissionQueue<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: evalsrv_runtime::GuestExtensions + Send + Sync + 'static> AdmissionQueue<E> {
    pub fn new(runner: IsolateRunner<E>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                waiters: Mutex::new(VecDeque::new()),
                capacity,
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue `{code, msg}` and wait for the result. Rejects synchronously
    /// with `QueueFull` if the queue is already at capacity.
    pub async fn enqueue(&self, code: String, msg: Value) -> EvalServerResult<String> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.inner.waiters.lock().unwrap();
            if waiters.len() >= self.inner.capacity {
                warn!(depth = waiters.len(), capacity = self.inner.capacity, "queue full, rejecting");
                return Err(EvalServerError::QueueFull);
            }
            waiters.push_back(Waiter { code, msg, resolver: tx });
            debug!(depth = waiters.len(), "enqueued evaluation");
        }
        self.start_consumer_if_idle();

        rx.await
            .map_err(|_| EvalServerError::Internal("evaluation resolver dropped".to_string()))
    }

    /// Current number of waiters, including the one (if any) currently
    /// being executed is NOT counted here — this reflects only the
    /// backlog still waiting to start, matching what `enqueue` checks
    /// against `capacity`.
    pub fn depth(&self) -> usize {
        self.inner.waiters.lock().unwrap().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn is_idle(&self) -> bool {
        !self.inner.draining.load(Ordering::SeqCst)
    }

    /// Start the consumer loop if nothing is currently draining the
    /// queue. A `compare_exchange` keeps this race-free against other
    /// callers of `enqueue` doing the same check concurrently.
    fn start_consumer_if_idle(&self) {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                Self::drain(inner).await;
            });
        }
    }

    /// The single consumer: pop, run, resolve, repeat. Exits (clearing
    /// `draining`) once the queue is empty, but re-checks after clearing
    /// to avoid a race where a waiter was pushed just as the loop was
    /// about to exit.
    async fn drain(inner: Arc<Inner<E>>) {
        loop {
            let next = {
                let mut waiters = inner.waiters.lock().unwrap();
                waiters.pop_front()
            };

            let waiter = match next {
                Some(w) => w,
                None => {
                    inner.draining.store(false, Ordering::SeqCst);
                    let still_empty = inner.waiters.lock().unwrap().is_empty();
                    if still_empty {
                        break;
                    }
                    if inner
                        .draining
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                    {
                        // Another enqueue already restarted a consumer.
                        break;
                    }
                    continue;
                }
            };

            let result = inner.runner.run(waiter.code, waiter.msg).await;
            // A dropped receiver (the HTTP handler's task was cancelled)
            // is not this loop's problem; keep draining regardless.
            let _ = waiter.resolver.send(result);
        }
    }
}
