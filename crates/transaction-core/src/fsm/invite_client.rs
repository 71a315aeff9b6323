//! INVITE client transaction, RFC 3261 17.1.1.
//!
//! Calling -> Proceeding -> Completed -> Terminated. Timer A retransmits
//! the INVITE while Calling, Timer B bounds the whole attempt, Timer D
//! absorbs retransmitted non-2xx finals after we have ACKed one. A 2xx
//! terminates the machine at once; the ACK for it belongs to the dialog
//! layer, not to this transaction.

use std::time::Duration;

use bytes::Bytes;
use siprail_sip_core::Response;
use siprail_sip_transport::TransportKind;
use tracing::trace;

use crate::fsm::{Action, TerminationReason};
use crate::state::{validate_transition, TransactionKind, TransactionState};
use crate::timer::{TimerKind, TimerSettings};

/// Inputs that drive an INVITE client machine.
#[derive(Debug, Clone)]
pub enum InviteClientEvent {
    /// Start the transaction with the serialized INVITE
    SendInvite(Bytes),
    /// A 1xx for our INVITE
    ReceiveProvisional(Response),
    /// A final response for our INVITE
    ReceiveFinal(Response),
    /// One of our timers came due
    TimerFired(TimerKind),
    /// The transport failed to carry the INVITE
    TransportFailed,
}

/// The INVITE client machine.
#[derive(Debug)]
pub struct InviteClientFsm {
    state: TransactionState,
    transport: TransportKind,
    settings: TimerSettings,
    retransmit_interval: Duration,
    last_invite: Option<Bytes>,
}

impl InviteClientFsm {
    pub fn new(transport: TransportKind, settings: TimerSettings) -> Self {
        InviteClientFsm {
            state: TransactionState::Initial,
            transport,
            settings,
            retransmit_interval: settings.t1,
            last_invite: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Applies one event and returns the side effects in the order the
    /// caller must perform them.
    pub fn on_event(&mut self, event: InviteClientEvent) -> Vec<Action> {
        use TransactionState::*;
        match (self.state, event) {
            (Initial, InviteClientEvent::SendInvite(bytes)) => self.handle_send(bytes),
            (Calling, InviteClientEvent::ReceiveProvisional(response)) => {
                self.set_state(Proceeding);
                vec![Action::Cancel(TimerKind::A), Action::Deliver(response)]
            }
            (Proceeding, InviteClientEvent::ReceiveProvisional(response)) => {
                vec![Action::Deliver(response)]
            }
            (Calling | Proceeding, InviteClientEvent::ReceiveFinal(response)) => {
                self.handle_final(response)
            }
            (Completed, InviteClientEvent::ReceiveFinal(response)) => {
                // retransmitted final; re-ACK, the user already saw it
                vec![Action::AckFinal(response)]
            }
            (Calling, InviteClientEvent::TimerFired(TimerKind::A)) => self.handle_timer_a(),
            (Calling | Proceeding, InviteClientEvent::TimerFired(TimerKind::B)) => {
                self.set_state(Terminated);
                vec![
                    Action::Cancel(TimerKind::A),
                    Action::Terminate(TerminationReason::Timeout),
                ]
            }
            (Completed, InviteClientEvent::TimerFired(TimerKind::D)) => {
                self.set_state(Terminated);
                vec![Action::Terminate(TerminationReason::Normal)]
            }
            (Initial | Calling | Proceeding | Completed, InviteClientEvent::TransportFailed) => {
                self.set_state(Terminated);
                vec![
                    Action::Cancel(TimerKind::A),
                    Action::Cancel(TimerKind::B),
                    Action::Terminate(TerminationReason::TransportError),
                ]
            }
            (state, event) => {
                trace!(%state, ?event, "event ignored in this state");
                Vec::new()
            }
        }
    }

    fn handle_send(&mut self, bytes: Bytes) -> Vec<Action> {
        self.last_invite = Some(bytes.clone());
        self.set_state(TransactionState::Calling);
        let mut actions = vec![Action::Transmit(bytes)];
        if let Some(start) = self.settings.retransmit_start(self.transport) {
            actions.push(Action::Schedule {
                timer: TimerKind::A,
                delay: start,
            });
        }
        actions.push(Action::Schedule {
            timer: TimerKind::B,
            delay: self.settings.transaction_timeout,
        });
        actions
    }

    fn handle_final(&mut self, response: Response) -> Vec<Action> {
        let mut actions = vec![Action::Cancel(TimerKind::A), Action::Cancel(TimerKind::B)];
        if response.status.is_success() {
            // the dialog layer ACKs a 2xx; nothing left to absorb here
            self.set_state(TransactionState::Terminated);
            actions.push(Action::Deliver(response));
            actions.push(Action::Terminate(TerminationReason::Normal));
        } else {
            self.set_state(TransactionState::Completed);
            actions.push(Action::Deliver(response.clone()));
            actions.push(Action::AckFinal(response));
            actions.push(Action::Schedule {
                timer: TimerKind::D,
                delay: self.settings.wait_d(self.transport),
            });
        }
        actions
    }

    fn handle_timer_a(&mut self) -> Vec<Action> {
        let Some(invite) = self.last_invite.clone() else {
            return Vec::new();
        };
        self.retransmit_interval = self.settings.next_retransmit(self.retransmit_interval);
        vec![
            Action::Transmit(invite),
            Action::Schedule {
                timer: TimerKind::A,
                delay: self.retransmit_interval,
            },
        ]
    }

    fn set_state(&mut self, to: TransactionState) {
        debug_assert!(validate_transition(TransactionKind::InviteClient, self.state, to).is_ok());
        trace!(from = %self.state, to = %to, "INVITE client transition");
        self.state = to;
    }
}
