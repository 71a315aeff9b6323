//! End-to-end behavior of the lane dispatcher with live workers:
//! per-key ordering, mutual exclusion, congestion admission, and
//! counter consistency under producer stress.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serial_test::serial;

use siprail_dispatch_core::{
    CongestionPolicy, DispatchConfig, Dispatcher, Task, WorkerPool,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("siprail_dispatch_core=debug")
        .with_test_writer()
        .try_init();
}

fn start_pool(lanes: usize) -> (Arc<Dispatcher>, WorkerPool, DispatchConfig) {
    let config = DispatchConfig {
        lane_count: lanes,
        poll_interval_ms: 1,
        ..Default::default()
    };
    let dispatcher = Arc::new(Dispatcher::from_config(&config).unwrap());
    let pool = WorkerPool::new(dispatcher.clone(), &config);
    pool.start().unwrap();
    (dispatcher, pool, config)
}

fn wait_for(counter: &AtomicUsize, target: usize, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while counter.load(Ordering::SeqCst) < target {
        assert!(
            Instant::now() < deadline,
            "only {}/{} tasks ran before the deadline",
            counter.load(Ordering::SeqCst),
            target
        );
        thread::sleep(Duration::from_millis(2));
    }
}

/// A thousand tasks over ten call IDs and four lanes: every call's tasks
/// run in submission order, and every call sticks to one worker thread.
#[test]
#[serial]
fn tasks_for_one_call_stay_ordered_and_on_one_thread() {
    init_tracing();
    let (dispatcher, pool, _) = start_pool(4);

    const CALLS: usize = 10;
    const TOTAL: usize = 1_000;
    let seen: Arc<Vec<Mutex<Vec<(usize, thread::ThreadId)>>>> =
        Arc::new((0..CALLS).map(|_| Mutex::new(Vec::new())).collect());
    let done = Arc::new(AtomicUsize::new(0));

    for i in 0..TOTAL {
        let call = i % CALLS;
        let seq = i / CALLS;
        let seen = seen.clone();
        let done = done.clone();
        dispatcher.add_task_last(Task::new(
            format!("call-{call}"),
            format!("step-{seq}"),
            move || {
                seen[call].lock().push((seq, thread::current().id()));
                done.fetch_add(1, Ordering::SeqCst);
            },
        ));
    }

    wait_for(&done, TOTAL, Duration::from_secs(10));
    for (call, slot) in seen.iter().enumerate() {
        let log = slot.lock();
        let seqs: Vec<usize> = log.iter().map(|&(s, _)| s).collect();
        let expected: Vec<usize> = (0..TOTAL / CALLS).collect();
        assert_eq!(seqs, expected, "call-{call} ran out of order");
        let first = log[0].1;
        assert!(
            log.iter().all(|&(_, t)| t == first),
            "call-{call} migrated between worker threads"
        );
    }
    pool.stop();
}

/// Two producers race on one key. Each producer's own tasks must appear
/// in its submission order, and no two tasks for the key may overlap.
#[test]
#[serial]
fn one_key_never_runs_two_tasks_at_once() {
    init_tracing();
    let (dispatcher, pool, _) = start_pool(4);

    const PER_PRODUCER: usize = 200;
    let in_flight = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let order: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(AtomicUsize::new(0));

    let mut producers = Vec::new();
    for producer in 0..2 {
        let dispatcher = dispatcher.clone();
        let in_flight = in_flight.clone();
        let overlapped = overlapped.clone();
        let order = order.clone();
        let done = done.clone();
        producers.push(thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                let in_flight = in_flight.clone();
                let overlapped = overlapped.clone();
                let order = order.clone();
                let done = done.clone();
                dispatcher.add_task_last(Task::new(
                    "call-contested",
                    format!("p{producer}-{seq}"),
                    move || {
                        if in_flight.swap(true, Ordering::SeqCst) {
                            overlapped.store(true, Ordering::SeqCst);
                        }
                        order.lock().push((producer, seq));
                        thread::yield_now();
                        in_flight.store(false, Ordering::SeqCst);
                        done.fetch_add(1, Ordering::SeqCst);
                    },
                ));
            }
        }));
    }
    for p in producers {
        p.join().unwrap();
    }

    wait_for(&done, 2 * PER_PRODUCER, Duration::from_secs(10));
    assert!(
        !overlapped.load(Ordering::SeqCst),
        "two tasks for one key ran concurrently"
    );
    let log = order.lock();
    for producer in 0..2 {
        let seqs: Vec<usize> = log
            .iter()
            .filter(|&&(p, _)| p == producer)
            .map(|&(_, s)| s)
            .collect();
        let expected: Vec<usize> = (0..PER_PRODUCER).collect();
        assert_eq!(seqs, expected, "producer {producer} order broken");
    }
    pool.stop();
}

/// The congestion probe at its stock thresholds: five queued tasks whose
/// head has waited a full second. Depth without age admits; age without
/// depth admits; both together reject.
#[test]
#[serial]
fn congestion_needs_both_depth_and_age() {
    init_tracing();
    // No workers: tasks sit in the lane so the head can age
    let config = DispatchConfig {
        lane_count: 1,
        congestion_depth: 5,
        congestion_age_ms: 1_000,
        ..Default::default()
    };
    let dispatcher = Dispatcher::from_config(&config).unwrap();
    let policy = CongestionPolicy::from_config(&config);

    for i in 0..4 {
        dispatcher.add_task_last(Task::new("call-a", format!("t{i}"), || {}));
    }
    thread::sleep(Duration::from_millis(1_100));
    assert!(
        !policy.should_reject(&dispatcher, "call-a"),
        "four old tasks are below the depth threshold"
    );

    dispatcher.add_task_last(Task::new("call-a", "t4", || {}));
    assert!(
        policy.should_reject(&dispatcher, "call-a"),
        "five tasks with an old head must reject"
    );
}

/// Eight producers hammer four lanes; afterwards every counter agrees
/// that nothing is left.
#[test]
#[serial]
fn counters_settle_to_zero_after_a_burst() {
    init_tracing();
    let (dispatcher, pool, _) = start_pool(4);

    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 500;
    let done = Arc::new(AtomicUsize::new(0));

    let mut producers = Vec::new();
    for producer in 0..PRODUCERS {
        let dispatcher = dispatcher.clone();
        let done = done.clone();
        producers.push(thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                let done = done.clone();
                dispatcher.add_task_last(Task::new(
                    format!("call-{}", (producer * 31 + seq * 7) % 23),
                    "burst",
                    move || {
                        done.fetch_add(1, Ordering::SeqCst);
                    },
                ));
            }
        }));
    }
    for p in producers {
        p.join().unwrap();
    }

    wait_for(&done, PRODUCERS * PER_PRODUCER, Duration::from_secs(15));
    // Workers may still be between the pop and the counter bump for the
    // last few tasks; the pending counters must already read empty once
    // the done counter accounts for everything
    assert_eq!(dispatcher.total_pending(), 0);
    for lane in 0..dispatcher.lane_count() {
        assert_eq!(dispatcher.lane(lane).unwrap().pending_count(), 0);
    }
    pool.stop();
}
