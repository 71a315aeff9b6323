use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::now_ms;

/// Panic payload that makes a worker abandon its lane instead of
/// surviving the task failure. This is the worker-fatal channel: the
/// lane stops draining until [`WorkerPool::restart_lane`] revives it.
pub struct LaneFault;

/// Liveness snapshot for one lane
#[derive(Debug, Clone, Copy)]
pub struct LaneHealth {
    pub lane: usize,
    /// False once the worker thread has exited
    pub alive: bool,
    /// Wall-clock ms of the last loop iteration; a stale value with
    /// `alive == true` means the lane is stuck inside a task
    pub last_progress_ms: u64,
}

/// One long-lived worker thread per lane, draining tasks sequentially
///
/// A task failure (panic) is caught, logged with the task's identity,
/// and the worker moves on; one bad call must not take out every call
/// sharing its lane. Only a [`LaneFault`] panic ends the loop, which is
/// logged distinctly because that lane is now starved: every key that
/// hashes to it stops making progress until the lane is restarted.
///
/// Workers never block indefinitely. An empty lane costs one short
/// fixed sleep per iteration, which bounds how long `stop()` can take.
pub struct WorkerPool {
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    progress: Arc<Vec<AtomicU64>>,
    handles: Mutex<Vec<Option<JoinHandle<()>>>>,
}

impl WorkerPool {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &DispatchConfig) -> Self {
        let progress = (0..dispatcher.lane_count())
            .map(|_| AtomicU64::new(0))
            .collect();
        WorkerPool {
            dispatcher,
            poll_interval: config.poll_interval(),
            running: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(progress),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns one worker per dispatcher lane
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning("worker pool"));
        }
        let lane_count = self.dispatcher.lane_count();
        let mut handles = self.handles.lock();
        handles.clear();
        for lane in 0..lane_count {
            handles.push(Some(self.spawn_worker(lane)?));
        }
        info!(lanes = lane_count, "Worker pool started");
        Ok(())
    }

    /// Signals all workers to exit after their current task and joins
    /// them. Tasks still queued are dropped, not executed. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut handles = self.handles.lock();
        for (lane, slot) in handles.iter_mut().enumerate() {
            if let Some(handle) = slot.take() {
                if handle.join().is_err() {
                    warn!(lane, "Worker exited by panic");
                }
            }
        }
        let dropped = self.dispatcher.total_pending();
        if dropped > 0 {
            debug!(dropped, "Worker pool stopped with tasks still queued");
        } else {
            debug!("Worker pool stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Per-lane liveness, for supervision and health checks
    pub fn lane_health(&self) -> Vec<LaneHealth> {
        let handles = self.handles.lock();
        self.progress
            .iter()
            .enumerate()
            .map(|(lane, stamp)| LaneHealth {
                lane,
                alive: matches!(handles.get(lane), Some(Some(h)) if !h.is_finished()),
                last_progress_ms: stamp.load(Ordering::Acquire),
            })
            .collect()
    }

    /// Respawns the worker for a lane whose thread has exited.
    /// Returns true if a new worker was spawned, false if the existing
    /// one is still alive. The lane's queue is untouched, so work that
    /// piled up while the lane was dead drains once the new worker runs.
    pub fn restart_lane(&self, lane: usize) -> Result<bool> {
        if !self.running.load(Ordering::Acquire) {
            return Err(Error::NotRunning("worker pool"));
        }
        let mut handles = self.handles.lock();
        let lanes = handles.len();
        let slot = handles
            .get_mut(lane)
            .ok_or(Error::LaneOutOfRange { lane, lanes })?;
        match slot {
            Some(handle) if handle.is_finished() => {
                if let Some(old) = slot.take() {
                    let _ = old.join();
                }
                *slot = Some(self.spawn_worker(lane)?);
                info!(lane, "Lane worker restarted");
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(Error::NotRunning("worker pool")),
        }
    }

    fn spawn_worker(&self, lane: usize) -> Result<JoinHandle<()>> {
        let dispatcher = self.dispatcher.clone();
        let running = self.running.clone();
        let progress = self.progress.clone();
        let poll = self.poll_interval;
        let handle = thread::Builder::new()
            .name(format!("siprail-worker-{lane}"))
            .spawn(move || worker_loop(lane, dispatcher, running, progress, poll))?;
        Ok(handle)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    lane: usize,
    dispatcher: Arc<Dispatcher>,
    running: Arc<AtomicBool>,
    progress: Arc<Vec<AtomicU64>>,
    poll: Duration,
) {
    debug!(lane, "Worker started");
    let Some(queue) = dispatcher.lane(lane) else {
        error!(lane, "Worker has no lane queue; exiting");
        return;
    };
    while running.load(Ordering::Acquire) {
        if let Some(stamp) = progress.get(lane) {
            stamp.store(now_ms(), Ordering::Release);
        }
        match queue.try_take() {
            Some(task) => {
                let id = task.id();
                let key = task.key().to_string();
                let name = task.name().to_string();
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
                    if payload.downcast_ref::<LaneFault>().is_some() {
                        error!(
                            lane,
                            task_id = %id,
                            task = %name,
                            key = %key,
                            "Worker hit a lane fault and is abandoning its lane; \
                             keys hashed here are starved until the lane restarts"
                        );
                        return;
                    }
                    error!(
                        lane,
                        task_id = %id,
                        task = %name,
                        key = %key,
                        panic = panic_message(payload.as_ref()),
                        "Task execution failed; worker continues"
                    );
                }
            }
            None => thread::sleep(poll),
        }
    }
    debug!(lane, "Worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
