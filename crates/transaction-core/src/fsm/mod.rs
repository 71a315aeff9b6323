//! The four RFC 3261 transaction machines as pure state machines.
//!
//! Every machine exposes one `on_event` method that consumes an input,
//! moves the state, and returns the side effects as [`Action`] values
//! for the caller to carry out. Nothing in here touches sockets, timers
//! or threads, which keeps the RFC behavior testable with plain
//! assertions on the returned actions.
//!
//! Lane affinity guarantees each machine is driven from a single worker
//! thread, so the machines hold plain state with no locking.

mod invite_client;
mod invite_server;
mod non_invite_client;
mod non_invite_server;

pub use invite_client::{InviteClientEvent, InviteClientFsm};
pub use invite_server::{InviteServerEvent, InviteServerFsm};
pub use non_invite_client::{NonInviteClientEvent, NonInviteClientFsm};
pub use non_invite_server::{NonInviteServerEvent, NonInviteServerFsm};

use std::time::Duration;

use bytes::Bytes;
use siprail_sip_core::Response;

use crate::timer::TimerKind;

/// Why a machine reached Terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Ordinary end of life after the final response and absorb period
    Normal,
    /// Timer B, F or H fired with no answer from the peer
    Timeout,
    /// The transport could not carry our message
    TransportError,
}

/// A side effect requested by a machine.
///
/// Actions come back in order and the caller performs them in order;
/// the machines never act on the world themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Put these bytes on the wire toward the transaction's peer
    Transmit(Bytes),
    /// Hand a response up to the transaction user
    Deliver(Response),
    /// Send the ACK for this non-2xx final response. The caller owns
    /// the original INVITE the ACK is built from.
    AckFinal(Response),
    /// Start `timer` after `delay`
    Schedule { timer: TimerKind, delay: Duration },
    /// Stop `timer` if it has not fired yet
    Cancel(TimerKind),
    /// The machine reached Terminated and can be dropped
    Terminate(TerminationReason),
}
