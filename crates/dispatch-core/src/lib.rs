//! Call-affinity work dispatch for the siprail stack
//!
//! Everything the SIP engine executes, decoded messages and fired
//! timers alike, travels through this crate as a [`Task`] carrying a
//! correlation key (normally the Call-ID). The [`Dispatcher`] hashes the
//! key to one of N fixed lanes, each drained by exactly one worker
//! thread, which yields the central guarantee of the whole stack:
//!
//! > For a fixed correlation key, tasks execute in enqueue order on one
//! > thread at a time. State keyed by that correlation key needs no
//! > internal locking.
//!
//! ```text
//!  decoder ----\                        +--------+     worker 0
//!               +--> Dispatcher --+---> | lane 0 | --> (thread)
//!  timer wheel -/   hash(key) % N |     +--------+
//!                                 |     +--------+     worker 1
//!                                 +---> | lane 1 | --> (thread)
//!                                       +--------+
//! ```
//!
//! The [`TimerWheel`] never runs a fired timer inline: it wraps the
//! payload in a Task with the timer's correlation key and enqueues it,
//! so a retransmission timer can never race the response that is being
//! processed for the same call.
//!
//! Workers poll their lane with a short fixed sleep rather than blocking
//! indefinitely; that keeps shutdown latency bounded and the code simple.
//! A park/unpark wakeup would cut idle wakeups and is a reasonable
//! future change.

pub mod config;
pub mod congestion;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod task;
pub mod wheel;
pub mod worker;

pub use config::DispatchConfig;
pub use congestion::CongestionPolicy;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use queue::CountedQueue;
pub use task::Task;
pub use wheel::{TimerHandle, TimerWheel, NEVER};
pub use worker::{LaneFault, LaneHealth, WorkerPool};

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, the time base for timer stamps
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
