//! INVITE server transaction, RFC 3261 17.2.1.
//!
//! Proceeding -> Completed -> Confirmed -> Terminated. While Completed,
//! Timer G retransmits the non-2xx final until the ACK lands and Timer H
//! gives up on the ACK ever landing. A 2xx final terminates the machine
//! immediately; retransmitting a 2xx is the dialog layer's business.

use std::time::Duration;

use bytes::Bytes;
use siprail_sip_core::Response;
use siprail_sip_transport::TransportKind;
use tracing::trace;

use crate::fsm::{Action, TerminationReason};
use crate::state::{validate_transition, TransactionKind, TransactionState};
use crate::timer::{TimerKind, TimerSettings};

/// Inputs that drive an INVITE server machine.
#[derive(Debug, Clone)]
pub enum InviteServerEvent {
    /// The INVITE that creates the transaction, or a retransmission of it
    ReceiveInvite,
    /// The transaction user sends a 1xx
    SendProvisional(Response),
    /// The transaction user sends the final response
    SendFinal(Response),
    /// The ACK for our non-2xx final arrived
    ReceiveAck,
    TimerFired(TimerKind),
    TransportFailed,
}

#[derive(Debug)]
pub struct InviteServerFsm {
    state: TransactionState,
    transport: TransportKind,
    settings: TimerSettings,
    retransmit_interval: Duration,
    last_provisional: Option<Bytes>,
    last_final: Option<Bytes>,
}

impl InviteServerFsm {
    pub fn new(transport: TransportKind, settings: TimerSettings) -> Self {
        InviteServerFsm {
            state: TransactionState::Initial,
            transport,
            settings,
            retransmit_interval: settings.t1,
            last_provisional: None,
            last_final: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn on_event(&mut self, event: InviteServerEvent) -> Vec<Action> {
        use TransactionState::*;
        match (self.state, event) {
            (Initial, InviteServerEvent::ReceiveInvite) => {
                self.set_state(Proceeding);
                Vec::new()
            }
            (Proceeding, InviteServerEvent::ReceiveInvite) => {
                // retransmitted INVITE; answer with the last provisional
                match &self.last_provisional {
                    Some(bytes) => vec![Action::Transmit(bytes.clone())],
                    None => Vec::new(),
                }
            }
            (Completed, InviteServerEvent::ReceiveInvite) => match &self.last_final {
                Some(bytes) => vec![Action::Transmit(bytes.clone())],
                None => Vec::new(),
            },
            (Proceeding, InviteServerEvent::SendProvisional(response)) => {
                let bytes = Bytes::from(response.to_wire());
                self.last_provisional = Some(bytes.clone());
                vec![Action::Transmit(bytes)]
            }
            (Proceeding, InviteServerEvent::SendFinal(response)) => self.handle_final(response),
            (Completed, InviteServerEvent::ReceiveAck) => {
                self.set_state(Confirmed);
                vec![
                    Action::Cancel(TimerKind::G),
                    Action::Cancel(TimerKind::H),
                    Action::Schedule {
                        timer: TimerKind::I,
                        delay: self.settings.wait_i(self.transport),
                    },
                ]
            }
            (Confirmed, InviteServerEvent::ReceiveAck) => Vec::new(),
            (Completed, InviteServerEvent::TimerFired(TimerKind::G)) => self.handle_timer_g(),
            (Completed, InviteServerEvent::TimerFired(TimerKind::H)) => {
                // the ACK never came
                self.set_state(Terminated);
                vec![
                    Action::Cancel(TimerKind::G),
                    Action::Terminate(TerminationReason::Timeout),
                ]
            }
            (Confirmed, InviteServerEvent::TimerFired(TimerKind::I)) => {
                self.set_state(Terminated);
                vec![Action::Terminate(TerminationReason::Normal)]
            }
            (
                Initial | Proceeding | Completed | Confirmed,
                InviteServerEvent::TransportFailed,
            ) => {
                self.set_state(Terminated);
                vec![
                    Action::Cancel(TimerKind::G),
                    Action::Cancel(TimerKind::H),
                    Action::Terminate(TerminationReason::TransportError),
                ]
            }
            (state, event) => {
                trace!(%state, ?event, "event ignored in this state");
                Vec::new()
            }
        }
    }

    fn handle_final(&mut self, response: Response) -> Vec<Action> {
        let bytes = Bytes::from(response.to_wire());
        if response.status.is_success() {
            self.set_state(TransactionState::Terminated);
            return vec![
                Action::Transmit(bytes),
                Action::Terminate(TerminationReason::Normal),
            ];
        }
        self.last_final = Some(bytes.clone());
        self.set_state(TransactionState::Completed);
        let mut actions = vec![Action::Transmit(bytes)];
        if let Some(start) = self.settings.retransmit_start(self.transport) {
            actions.push(Action::Schedule {
                timer: TimerKind::G,
                delay: start,
            });
        }
        actions.push(Action::Schedule {
            timer: TimerKind::H,
            delay: self.settings.transaction_timeout,
        });
        actions
    }

    fn handle_timer_g(&mut self) -> Vec<Action> {
        let Some(bytes) = self.last_final.clone() else {
            return Vec::new();
        };
        self.retransmit_interval = self.settings.next_retransmit(self.retransmit_interval);
        vec![
            Action::Transmit(bytes),
            Action::Schedule {
                timer: TimerKind::G,
                delay: self.retransmit_interval,
            },
        ]
    }

    fn set_state(&mut self, to: TransactionState) {
        debug_assert!(validate_transition(TransactionKind::InviteServer, self.state, to).is_ok());
        trace!(from = %self.state, to = %to, "INVITE server transition");
        self.state = to;
    }
}
