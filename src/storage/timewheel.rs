//! Hashed timing wheel for deferred tasks.
//!
//! A single worker task owns the wheel state and multiplexes its
//! inputs: the tick interval and the add / remove / stop requests,
//! which arrive on one FIFO channel so that a remove queued before an
//! add for the same key can never be reordered past it. Each tick
//! advances the current slot by one position; tasks in the scanned
//! slot run when their `circle` counter has reached zero and otherwise
//! have it decremented. A task due after `u` ticks is placed
//! `u % slots` positions ahead with `circle = u / slots`.
//!
//! Jobs are dispatched on their own tasks so a slow job cannot stall
//! the wheel, and each runs inside a panic-catching boundary that logs
//! the failure.
//!
//! Scheduling the same task key again replaces the previous task
//! (remove-then-insert, serialized by the single worker).

use crate::storage::now_ms;
use bytes::Bytes;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct AddRequest {
    key: Bytes,
    delay: Duration,
    job: Job,
}

enum Request {
    Add(AddRequest),
    Remove(Bytes),
    Stop,
}

/// Handle to the wheel worker. Cheap to clone; dropping every handle
/// stops the worker.
#[derive(Debug, Clone)]
pub struct TimeWheel {
    requests: mpsc::UnboundedSender<Request>,
}

impl TimeWheel {
    /// Spawn the wheel worker. Must be called from within a tokio
    /// runtime.
    pub fn start(interval: Duration, slot_count: usize) -> Self {
        assert!(slot_count > 0, "slot count must be at least 1");
        assert!(!interval.is_zero(), "tick interval must be non-zero");

        let (requests, request_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            interval,
            slots: (0..slot_count).map(|_| HashMap::new()).collect(),
            timer: HashMap::new(),
            current: 0,
        };
        tokio::spawn(worker.run(request_rx));

        Self { requests }
    }

    /// Run `job` after `delay`, replacing any task scheduled under the
    /// same `key`.
    pub fn schedule(&self, delay: Duration, key: Bytes, job: impl FnOnce() + Send + 'static) {
        if key.is_empty() {
            return;
        }
        let _ = self.requests.send(Request::Remove(key.clone()));
        let _ = self.requests.send(Request::Add(AddRequest {
            key,
            delay,
            job: Box::new(job),
        }));
    }

    /// Run `job` at the wall-clock instant `at_ms` (epoch
    /// milliseconds). No-op when the instant is already in the past.
    pub fn schedule_at(&self, at_ms: u64, key: Bytes, job: impl FnOnce() + Send + 'static) {
        let now = now_ms();
        if at_ms <= now {
            return;
        }
        self.schedule(Duration::from_millis(at_ms - now), key, job);
    }

    /// Cancel the task scheduled under `key`. Idempotent.
    pub fn cancel(&self, key: Bytes) {
        if key.is_empty() {
            return;
        }
        let _ = self.requests.send(Request::Remove(key));
    }

    /// Stop the worker. Pending tasks are abandoned.
    pub fn stop(&self) {
        let _ = self.requests.send(Request::Stop);
    }
}

struct Entry {
    circle: u64,
    job: Job,
}

struct Worker {
    interval: Duration,
    slots: Vec<HashMap<Bytes, Entry>>,
    timer: HashMap<Bytes, usize>,
    current: usize,
}

impl Worker {
    async fn run(mut self, mut request_rx: mpsc::UnboundedReceiver<Request>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(),
                request = request_rx.recv() => match request {
                    Some(Request::Add(request)) => self.add_task(request),
                    Some(Request::Remove(key)) => self.remove_task(&key),
                    // Stop request, or every handle dropped.
                    Some(Request::Stop) | None => break,
                },
            }
        }
    }

    fn on_tick(&mut self) {
        let scanned = self.current;
        self.current = (self.current + 1) % self.slots.len();

        let slot = &mut self.slots[scanned];
        let mut due = Vec::new();
        for (key, entry) in slot.iter_mut() {
            if entry.circle > 0 {
                entry.circle -= 1;
            } else {
                due.push(key.clone());
            }
        }
        for key in due {
            if let Some(entry) = slot.remove(&key) {
                self.timer.remove(&key);
                dispatch(entry.job);
            }
        }
    }

    fn add_task(&mut self, request: AddRequest) {
        let slot_count = self.slots.len() as u64;
        let units = (request.delay.as_millis() / self.interval.as_millis()) as u64;
        let circle = units / slot_count;
        let slot_index = ((self.current as u64 + units % slot_count) % slot_count) as usize;

        if self.timer.contains_key(&request.key) {
            self.remove_task(&request.key);
        }
        self.slots[slot_index].insert(
            request.key.clone(),
            Entry {
                circle,
                job: request.job,
            },
        );
        self.timer.insert(request.key, slot_index);
    }

    fn remove_task(&mut self, key: &Bytes) {
        if let Some(slot_index) = self.timer.remove(key) {
            self.slots[slot_index].remove(key);
        }
    }
}

fn dispatch(job: Job) {
    tokio::spawn(async move {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            error!("timer job panicked: {}", panic_message(&panic));
        }
    });
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    async fn settle() {
        // Let the worker and any dispatched jobs run.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let wheel = TimeWheel::start(Duration::from_millis(10), 8);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        wheel.schedule(Duration::from_millis(30), key("t"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;

        time::advance(Duration::from_millis(20)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_millis(40)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wraps_past_one_revolution() {
        // 4 slots x 10ms: a 90ms delay needs two full revolutions.
        let wheel = TimeWheel::start(Duration::from_millis(10), 4);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        wheel.schedule(Duration::from_millis(90), key("far"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;

        time::advance(Duration::from_millis(60)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_millis(60)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_replaces_previous_task() {
        let wheel = TimeWheel::start(Duration::from_millis(10), 8);
        let winner = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&winner);
        wheel.schedule(Duration::from_millis(20), key("t"), move || {
            first.store(1, Ordering::SeqCst);
        });
        let second = Arc::clone(&winner);
        wheel.schedule(Duration::from_millis(20), key("t"), move || {
            second.store(2, Ordering::SeqCst);
        });
        settle().await;

        time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(winner.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let wheel = TimeWheel::start(Duration::from_millis(10), 8);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        wheel.schedule(Duration::from_millis(20), key("t"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        wheel.cancel(key("t"));
        wheel.cancel(key("t"));
        wheel.cancel(key("never-existed"));
        settle().await;

        time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_then_reschedule_survives() {
        let wheel = TimeWheel::start(Duration::from_millis(10), 8);
        let fired = Arc::new(AtomicUsize::new(0));

        wheel.cancel(key("t"));
        let counter = Arc::clone(&fired);
        wheel.schedule(Duration::from_millis(20), key("t"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;

        time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_job_does_not_stall_the_wheel() {
        let wheel = TimeWheel::start(Duration::from_millis(10), 8);
        let fired = Arc::new(AtomicUsize::new(0));

        wheel.schedule(Duration::from_millis(10), key("bad"), || {
            panic!("job failure");
        });
        let counter = Arc::clone(&fired);
        wheel.schedule(Duration::from_millis(20), key("good"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;

        time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
