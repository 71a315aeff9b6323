//! Timer wheel: absolute-time min-heap drained by one scheduler thread.
//!
//! Entries are ordered by absolute fire time in wall-clock milliseconds.
//! A single thread wakes every tick, pops everything due, and hands each
//! due payload to the [`Dispatcher`](crate::Dispatcher) under the timer's
//! correlation key. Payloads therefore run on the key's lane, serialized
//! with all other work for that key, never on the scheduler thread.
//!
//! Cancellation writes the [`NEVER`] sentinel into the entry's fire-time
//! stamp. The heap is not searched; the entry keeps its slot and is
//! discarded when it surfaces. The stamp is authoritative: it is
//! re-checked when the entry pops and once more immediately before the
//! payload acts, so a cancel that lands after dispatch still wins.

use std::cmp;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::config::DispatchConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::now_ms;
use crate::task::Task;

/// Fire-time sentinel meaning "never". Writing it cancels the timer.
pub const NEVER: u64 = u64::MAX;

/// Cancellation handle for a scheduled timer.
///
/// Cloneable and cheap; all clones share the same fire-time stamp. After
/// a one-shot fires, its stamp is also `NEVER`, so `is_cancelled` doubles
/// as "will never fire again".
#[derive(Clone)]
pub struct TimerHandle {
    stamp: Arc<AtomicU64>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.stamp.store(NEVER, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.stamp.load(Ordering::Acquire) == NEVER
    }

    /// Absolute fire time in ms, or [`NEVER`]
    pub fn fire_at_ms(&self) -> u64 {
        self.stamp.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fire_at_ms() {
            NEVER => f.write_str("TimerHandle(cancelled)"),
            at => write!(f, "TimerHandle(at {at}ms)"),
        }
    }
}

struct Entry {
    /// Ordering snapshot. The stamp below is authoritative; a popped
    /// entry whose stamp disagrees is reinserted or dropped.
    when: u64,
    seq: u64,
    fire_at: Arc<AtomicU64>,
    period_ms: Option<u64>,
    key: String,
    name: String,
    payload: Arc<dyn Fn() + Send + Sync>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so BinaryHeap pops the earliest fire time first,
    // insertion order breaking ties
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        other
            .when
            .cmp(&self.when)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single-threaded timer scheduler feeding the dispatcher
pub struct TimerWheel {
    dispatcher: Arc<Dispatcher>,
    tick: Duration,
    heap: Arc<Mutex<BinaryHeap<Entry>>>,
    seq: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerWheel {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &DispatchConfig) -> Self {
        TimerWheel {
            dispatcher,
            tick: config.tick_interval(),
            heap: Arc::new(Mutex::new(BinaryHeap::new())),
            seq: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Schedules a one-shot timer.
    ///
    /// A `delay` of zero fires on the next tick, never inline from the
    /// caller. The payload runs on the lane for `key`.
    pub fn schedule(
        &self,
        key: impl Into<String>,
        name: impl Into<String>,
        delay: Duration,
        payload: impl Fn() + Send + Sync + 'static,
    ) -> TimerHandle {
        self.insert(key.into(), name.into(), delay, None, Arc::new(payload))
    }

    /// Schedules a repeating timer: first fire after `initial_delay`,
    /// then every `period`. Each fire advances the stamp by `period`
    /// from the previous fire time, so a wheel that fell behind catches
    /// up tick by tick rather than skipping fires.
    pub fn schedule_with_fixed_delay(
        &self,
        key: impl Into<String>,
        name: impl Into<String>,
        initial_delay: Duration,
        period: Duration,
        payload: impl Fn() + Send + Sync + 'static,
    ) -> TimerHandle {
        let period_ms = ms_of(period).max(1);
        self.insert(
            key.into(),
            name.into(),
            initial_delay,
            Some(period_ms),
            Arc::new(payload),
        )
    }

    /// Same as [`TimerHandle::cancel`]
    pub fn cancel(&self, handle: &TimerHandle) {
        handle.cancel();
    }

    fn insert(
        &self,
        key: String,
        name: String,
        delay: Duration,
        period_ms: Option<u64>,
        payload: Arc<dyn Fn() + Send + Sync>,
    ) -> TimerHandle {
        // Clamp below the sentinel so an absurd delay cannot be born
        // cancelled
        let fire = now_ms().saturating_add(ms_of(delay)).min(NEVER - 1);
        let fire_at = Arc::new(AtomicU64::new(fire));
        let entry = Entry {
            when: fire,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            fire_at: fire_at.clone(),
            period_ms,
            key,
            name,
            payload,
        };
        trace!(timer = %entry.name, key = %entry.key, fire_at = fire, "Timer scheduled");
        self.heap.lock().push(entry);
        TimerHandle { stamp: fire_at }
    }

    /// Entries still held by the heap, cancelled ones included
    pub fn pending_timers(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Starts the scheduler thread
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning("timer wheel"));
        }
        let dispatcher = self.dispatcher.clone();
        let heap = self.heap.clone();
        let seq = self.seq.clone();
        let running = self.running.clone();
        let tick = self.tick;
        let handle = thread::Builder::new()
            .name("siprail-timer".into())
            .spawn(move || scheduler_loop(dispatcher, heap, seq, running, tick))?;
        *self.handle.lock() = Some(handle);
        info!(tick_ms = self.tick.as_millis() as u64, "Timer wheel started");
        Ok(())
    }

    /// Stops the scheduler thread. Pending entries stay in the heap and
    /// would fire again after a restart. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        debug!("Timer wheel stopped");
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ms_of(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(NEVER - 1)
}

fn scheduler_loop(
    dispatcher: Arc<Dispatcher>,
    heap: Arc<Mutex<BinaryHeap<Entry>>>,
    seq: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    tick: Duration,
) {
    debug!("Timer scheduler started");
    while running.load(Ordering::Acquire) {
        thread::sleep(tick);
        let now = now_ms();
        loop {
            let entry = {
                let mut heap = heap.lock();
                match heap.peek() {
                    Some(head) if head.when <= now => heap.pop(),
                    _ => None,
                }
            };
            let Some(entry) = entry else { break };
            dispatch_due(entry, now, &heap, &seq, &dispatcher);
        }
    }
    debug!("Timer scheduler stopped");
}

fn dispatch_due(
    mut entry: Entry,
    now: u64,
    heap: &Mutex<BinaryHeap<Entry>>,
    seq: &AtomicU64,
    dispatcher: &Dispatcher,
) {
    let actual = entry.fire_at.load(Ordering::Acquire);
    if actual == NEVER {
        trace!(timer = %entry.name, key = %entry.key, "Dropping cancelled timer");
        return;
    }
    if actual > now {
        // Stamp moved past the snapshot; put it back under its real time
        entry.when = actual;
        entry.seq = seq.fetch_add(1, Ordering::Relaxed);
        heap.lock().push(entry);
        return;
    }

    let stamp = entry.fire_at.clone();
    let payload = entry.payload.clone();
    let task = match entry.period_ms {
        // One-shot: claim the stamp by swapping in the sentinel. Exactly
        // one of a racing cancel and the payload wins, and a fired timer
        // reads as cancelled afterwards.
        None => Task::new(entry.key.clone(), entry.name.clone(), move || {
            if stamp.swap(NEVER, Ordering::AcqRel) == NEVER {
                return;
            }
            payload();
        }),
        // Periodic: the stamp must survive the fire, so only look. A
        // cancel between dispatch and execution still suppresses the run.
        Some(_) => Task::new(entry.key.clone(), entry.name.clone(), move || {
            if stamp.load(Ordering::Acquire) == NEVER {
                return;
            }
            payload();
        }),
    };
    trace!(timer = %entry.name, key = %entry.key, "Timer due, routing to lane");
    dispatcher.add_task_last(task);

    if let Some(period) = entry.period_ms {
        let next = actual.saturating_add(period).min(NEVER - 1);
        // Advance only if nobody cancelled in the meantime; a cancel's
        // sentinel must never be overwritten
        if entry
            .fire_at
            .compare_exchange(actual, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            entry.when = next;
            entry.seq = seq.fetch_add(1, Ordering::Relaxed);
            heap.lock().push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerPool;
    use rand::Rng;
    use serial_test::serial;
    use std::sync::atomic::AtomicUsize;

    fn rig(lanes: usize, tick_ms: u64) -> (Arc<Dispatcher>, WorkerPool, TimerWheel) {
        let config = DispatchConfig {
            lane_count: lanes,
            poll_interval_ms: 1,
            tick_interval_ms: tick_ms,
            ..Default::default()
        };
        let dispatcher = Arc::new(Dispatcher::from_config(&config).unwrap());
        let pool = WorkerPool::new(dispatcher.clone(), &config);
        pool.start().unwrap();
        let wheel = TimerWheel::new(dispatcher.clone(), &config);
        wheel.start().unwrap();
        (dispatcher, pool, wheel)
    }

    #[test]
    #[serial]
    fn one_shot_fires_exactly_once() {
        let (_d, _pool, wheel) = rig(2, 5);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = wheel.schedule("call-1", "probe", Duration::from_millis(20), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(150));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // A fired one-shot has consumed its stamp
        assert!(handle.is_cancelled());
    }

    #[test]
    #[serial]
    fn zero_delay_fires_on_the_next_tick_not_inline() {
        let config = DispatchConfig {
            lane_count: 1,
            poll_interval_ms: 1,
            tick_interval_ms: 5,
            ..Default::default()
        };
        let dispatcher = Arc::new(Dispatcher::from_config(&config).unwrap());
        let pool = WorkerPool::new(dispatcher.clone(), &config);
        pool.start().unwrap();
        let wheel = TimerWheel::new(dispatcher.clone(), &config);

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        wheel.schedule("k", "now", Duration::ZERO, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        // No scheduler thread yet, so schedule() cannot have run it inline
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        wheel.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[serial]
    fn cancel_before_fire_suppresses_the_payload() {
        let (_d, _pool, wheel) = rig(1, 5);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = wheel.schedule("k", "doomed", Duration::from_millis(60), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        // The heap slot is reclaimed once the entry surfaces
        assert_eq!(wheel.pending_timers(), 0);
    }

    #[test]
    #[serial]
    fn periodic_repeats_until_cancelled() {
        let (_d, _pool, wheel) = rig(1, 5);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = wheel.schedule_with_fixed_delay(
            "call-7",
            "keepalive",
            Duration::from_millis(10),
            Duration::from_millis(10),
            move || {
                h.fetch_add(1, Ordering::SeqCst);
            },
        );
        thread::sleep(Duration::from_millis(120));
        assert!(hits.load(Ordering::SeqCst) >= 3, "periodic timer barely fired");
        handle.cancel();
        // One dispatched run may still be in flight; after it settles the
        // count must stop moving
        thread::sleep(Duration::from_millis(60));
        let settled = hits.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(hits.load(Ordering::SeqCst), settled);
    }

    #[test]
    #[serial]
    fn cancel_racing_the_fire_never_double_runs() {
        let (_d, _pool, wheel) = rig(2, 2);
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let hits = Arc::new(AtomicUsize::new(0));
            let h = hits.clone();
            let handle = wheel.schedule("race", "flip", Duration::from_millis(5), move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(rng.gen_range(1..10)));
            handle.cancel();
            thread::sleep(Duration::from_millis(20));
            assert!(hits.load(Ordering::SeqCst) <= 1);
        }
    }

    #[test]
    #[serial]
    fn payload_runs_on_a_worker_lane_not_the_scheduler() {
        let (_d, _pool, wheel) = rig(2, 5);
        let (tx, rx) = std::sync::mpsc::channel();
        wheel.schedule("call-9", "where", Duration::from_millis(5), move || {
            let name = thread::current().name().unwrap_or("").to_string();
            let _ = tx.send(name);
        });
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(name.starts_with("siprail-worker-"), "ran on {name}");
    }

    #[test]
    #[serial]
    fn double_start_rejected_and_stop_idempotent() {
        let (_d, _pool, wheel) = rig(1, 5);
        assert!(matches!(wheel.start(), Err(Error::AlreadyRunning(_))));
        wheel.stop();
        wheel.stop();
        assert!(!wheel.is_running());
    }
}
