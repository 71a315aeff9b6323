//! RFC 3261 transaction layer for the siprail stack
//!
//! Four pure state machines (INVITE/non-INVITE, client/server) carry
//! the retransmission, timeout and absorb logic of RFC 3261 section 17.
//! The [`TransactionManager`] wires them to the rest of the stack:
//! inbound messages are validated and admission-checked at the boundary,
//! then queued on the dispatch lane their Call-ID hashes to; timers are
//! scheduled on the shared wheel under the same Call-ID and fire back
//! through the lane. One call runs on one lane, one thread at a time,
//! so the machines hold plain unlocked state.
//!
//! The machines never touch a socket or a clock. They consume events
//! and return [`Action`](fsm::Action) lists the manager carries out,
//! which is also how the RFC behavior is unit tested.

pub mod error;
pub mod events;
pub mod fsm;
pub mod key;
pub mod manager;
pub mod state;
pub mod store;
pub mod timer;

pub use error::{Error, Result};
pub use events::{event_channel, TransactionEvent};
pub use key::TransactionKey;
pub use manager::TransactionManager;
pub use state::{validate_transition, TransactionKind, TransactionState};
pub use store::TransactionStore;
pub use timer::{TimerKind, TimerSettings};
