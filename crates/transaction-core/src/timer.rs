//! RFC 3261 transaction timers.
//!
//! Three families of timer govern a transaction's lifecycle:
//!
//! - **Retransmission timers** (A, E, G): resend the last message over an
//!   unreliable transport, starting at T1 and doubling up to T2.
//! - **Timeout timers** (B, F, H): bound the transaction's lifetime at
//!   64 * T1; when one fires the transaction terminates and the timeout
//!   is reported upstream exactly once.
//! - **Wait timers** (D, I, J, K): hold a finished transaction around
//!   long enough to absorb straggling retransmissions before the state
//!   is dropped.
//!
//! Reliable transports retransmit at the transport layer, so the
//! retransmission timers are never scheduled for them and the wait
//! timers collapse to zero.

use std::fmt;
use std::time::Duration;

use siprail_sip_transport::TransportKind;

/// The RFC 3261 timer letters used by the four transaction machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// INVITE client retransmission interval. Starts at T1, doubles per
    /// fire. RFC 3261 17.1.1.2.
    A,
    /// INVITE client transaction timeout, 64 * T1. RFC 3261 17.1.1.2.
    B,
    /// INVITE client wait in Completed to absorb retransmitted non-2xx
    /// finals. At least 32s over UDP. RFC 3261 17.1.1.2.
    D,
    /// Non-INVITE client retransmission interval. Starts at T1, doubles
    /// up to T2. RFC 3261 17.1.2.2.
    E,
    /// Non-INVITE client transaction timeout, 64 * T1. RFC 3261 17.1.2.2.
    F,
    /// INVITE server retransmission of the non-2xx final while waiting
    /// for the ACK. Starts at T1, doubles up to T2. RFC 3261 17.2.1.
    G,
    /// INVITE server ACK timeout, 64 * T1. RFC 3261 17.2.1.
    H,
    /// INVITE server wait in Confirmed to absorb retransmitted ACKs,
    /// T4 over UDP. RFC 3261 17.2.1.
    I,
    /// Non-INVITE server wait in Completed to absorb retransmitted
    /// requests, 64 * T1 over UDP. RFC 3261 17.2.2.
    J,
    /// Non-INVITE client wait in Completed to absorb retransmitted
    /// finals, T4 over UDP. RFC 3261 17.1.2.2.
    K,
}

impl TimerKind {
    /// True for the timers whose firing means the peer never answered
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimerKind::B | TimerKind::F | TimerKind::H)
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            TimerKind::A => "A",
            TimerKind::B => "B",
            TimerKind::D => "D",
            TimerKind::E => "E",
            TimerKind::F => "F",
            TimerKind::G => "G",
            TimerKind::H => "H",
            TimerKind::I => "I",
            TimerKind::J => "J",
            TimerKind::K => "K",
        };
        f.write_str(letter)
    }
}

/// Timer durations from RFC 3261, adjustable at startup.
///
/// The defaults assume T1 = 500ms and T4 = 5s. Shrinking T1 speeds up
/// tests; stretching it suits high-latency links. Nothing here changes
/// at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    /// T1, the round-trip estimate and initial retransmit interval
    /// (default 500ms)
    pub t1: Duration,
    /// T2, the retransmit interval cap (default 4s)
    pub t2: Duration,
    /// T4, how long the network keeps a message in flight (default 5s)
    pub t4: Duration,
    /// Overall transaction timeout for Timers B, F and H
    /// (default 32s, 64 * T1)
    pub transaction_timeout: Duration,
    /// Timer D wait in Completed for an INVITE client (default 32s)
    pub wait_time_d: Duration,
    /// Timer J wait in Completed for a non-INVITE server
    /// (default 32s, 64 * T1)
    pub wait_time_j: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerSettings {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            transaction_timeout: Duration::from_secs(32), // 64 * T1
            wait_time_d: Duration::from_secs(32),
            wait_time_j: Duration::from_secs(32), // 64 * T1
        }
    }
}

impl TimerSettings {
    /// Settings derived from a configured retransmit base and cap,
    /// with the 64 * T1 timeouts recomputed from the base.
    pub fn from_intervals(base: Duration, cap: Duration) -> Self {
        TimerSettings {
            t1: base,
            t2: cap,
            transaction_timeout: base * 64,
            wait_time_j: base * 64,
            ..Default::default()
        }
    }

    /// Initial retransmit interval, or `None` when the transport
    /// retransmits for us and Timers A/E/G are never scheduled
    pub fn retransmit_start(&self, transport: TransportKind) -> Option<Duration> {
        if transport.is_reliable() {
            None
        } else {
            Some(self.t1)
        }
    }

    /// The interval after one more fire: doubled, capped at T2
    pub fn next_retransmit(&self, current: Duration) -> Duration {
        (current * 2).min(self.t2)
    }

    /// Timer D wait, zero on reliable transports
    pub fn wait_d(&self, transport: TransportKind) -> Duration {
        if transport.is_reliable() {
            Duration::ZERO
        } else {
            self.wait_time_d
        }
    }

    /// Timer I wait (T4), zero on reliable transports
    pub fn wait_i(&self, transport: TransportKind) -> Duration {
        if transport.is_reliable() {
            Duration::ZERO
        } else {
            self.t4
        }
    }

    /// Timer J wait (64 * T1), zero on reliable transports
    pub fn wait_j(&self, transport: TransportKind) -> Duration {
        if transport.is_reliable() {
            Duration::ZERO
        } else {
            self.wait_time_j
        }
    }

    /// Timer K wait (T4), zero on reliable transports
    pub fn wait_k(&self, transport: TransportKind) -> Duration {
        if transport.is_reliable() {
            Duration::ZERO
        } else {
            self.t4
        }
    }
}
