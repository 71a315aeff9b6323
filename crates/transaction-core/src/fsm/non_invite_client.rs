//! Non-INVITE client transaction, RFC 3261 17.1.2.
//!
//! Trying -> Proceeding -> Completed -> Terminated. Timer E retransmits
//! the request, Timer F bounds the attempt, Timer K absorbs retransmitted
//! finals. Once a provisional arrives, retransmission slows to the T2
//! cap instead of stopping.

use std::time::Duration;

use bytes::Bytes;
use siprail_sip_core::Response;
use siprail_sip_transport::TransportKind;
use tracing::trace;

use crate::fsm::{Action, TerminationReason};
use crate::state::{validate_transition, TransactionKind, TransactionState};
use crate::timer::{TimerKind, TimerSettings};

/// Inputs that drive a non-INVITE client machine.
#[derive(Debug, Clone)]
pub enum NonInviteClientEvent {
    /// Start the transaction with the serialized request
    SendRequest(Bytes),
    ReceiveProvisional(Response),
    ReceiveFinal(Response),
    TimerFired(TimerKind),
    TransportFailed,
}

#[derive(Debug)]
pub struct NonInviteClientFsm {
    state: TransactionState,
    transport: TransportKind,
    settings: TimerSettings,
    retransmit_interval: Duration,
    last_request: Option<Bytes>,
}

impl NonInviteClientFsm {
    pub fn new(transport: TransportKind, settings: TimerSettings) -> Self {
        NonInviteClientFsm {
            state: TransactionState::Initial,
            transport,
            settings,
            retransmit_interval: settings.t1,
            last_request: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn on_event(&mut self, event: NonInviteClientEvent) -> Vec<Action> {
        use TransactionState::*;
        match (self.state, event) {
            (Initial, NonInviteClientEvent::SendRequest(bytes)) => self.handle_send(bytes),
            (Trying, NonInviteClientEvent::ReceiveProvisional(response)) => {
                self.set_state(Proceeding);
                vec![Action::Deliver(response)]
            }
            (Proceeding, NonInviteClientEvent::ReceiveProvisional(response)) => {
                vec![Action::Deliver(response)]
            }
            (Trying | Proceeding, NonInviteClientEvent::ReceiveFinal(response)) => {
                self.set_state(Completed);
                vec![
                    Action::Cancel(TimerKind::E),
                    Action::Cancel(TimerKind::F),
                    Action::Deliver(response),
                    Action::Schedule {
                        timer: TimerKind::K,
                        delay: self.settings.wait_k(self.transport),
                    },
                ]
            }
            (Trying, NonInviteClientEvent::TimerFired(TimerKind::E)) => {
                self.retransmit_interval =
                    self.settings.next_retransmit(self.retransmit_interval);
                self.retransmit(self.retransmit_interval)
            }
            (Proceeding, NonInviteClientEvent::TimerFired(TimerKind::E)) => {
                // while Proceeding the RFC pins the interval at T2
                self.retransmit(self.settings.t2)
            }
            (Trying | Proceeding, NonInviteClientEvent::TimerFired(TimerKind::F)) => {
                self.set_state(Terminated);
                vec![
                    Action::Cancel(TimerKind::E),
                    Action::Terminate(TerminationReason::Timeout),
                ]
            }
            (Completed, NonInviteClientEvent::TimerFired(TimerKind::K)) => {
                self.set_state(Terminated);
                vec![Action::Terminate(TerminationReason::Normal)]
            }
            (
                Initial | Trying | Proceeding | Completed,
                NonInviteClientEvent::TransportFailed,
            ) => {
                self.set_state(Terminated);
                vec![
                    Action::Cancel(TimerKind::E),
                    Action::Cancel(TimerKind::F),
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
        self.last_request = Some(bytes.clone());
        self.set_state(TransactionState::Trying);
        let mut actions = vec![Action::Transmit(bytes)];
        if let Some(start) = self.settings.retransmit_start(self.transport) {
            actions.push(Action::Schedule {
                timer: TimerKind::E,
                delay: start,
            });
        }
        actions.push(Action::Schedule {
            timer: TimerKind::F,
            delay: self.settings.transaction_timeout,
        });
        actions
    }

    fn retransmit(&self, next_delay: Duration) -> Vec<Action> {
        let Some(request) = self.last_request.clone() else {
            return Vec::new();
        };
        vec![
            Action::Transmit(request),
            Action::Schedule {
                timer: TimerKind::E,
                delay: next_delay,
            },
        ]
    }

    fn set_state(&mut self, to: TransactionState) {
        debug_assert!(
            validate_transition(TransactionKind::NonInviteClient, self.state, to).is_ok()
        );
        trace!(from = %self.state, to = %to, "non-INVITE client transition");
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siprail_sip_core::StatusCode;

    fn register_bytes() -> Bytes {
        Bytes::from_static(b"REGISTER sip:example.com SIP/2.0\r\n\r\n")
    }

    fn started() -> NonInviteClientFsm {
        let mut fsm = NonInviteClientFsm::new(TransportKind::Udp, TimerSettings::default());
        fsm.on_event(NonInviteClientEvent::SendRequest(register_bytes()));
        fsm
    }

    #[test]
    fn send_arms_timers_e_and_f() {
        let fsm = started();
        assert_eq!(fsm.state(), TransactionState::Trying);
    }

    #[test]
    fn timer_e_doubles_while_trying_and_pins_at_t2_while_proceeding() {
        let mut fsm = started();

        let first = fsm.on_event(NonInviteClientEvent::TimerFired(TimerKind::E));
        assert!(first.iter().any(|a| matches!(
            a,
            Action::Schedule { timer: TimerKind::E, delay } if *delay == Duration::from_secs(1)
        )));

        fsm.on_event(NonInviteClientEvent::ReceiveProvisional(Response::new(
            StatusCode::Trying,
        )));
        assert_eq!(fsm.state(), TransactionState::Proceeding);

        let pinned = fsm.on_event(NonInviteClientEvent::TimerFired(TimerKind::E));
        assert!(pinned.iter().any(|a| matches!(
            a,
            Action::Schedule { timer: TimerKind::E, delay } if *delay == Duration::from_secs(4)
        )));
    }

    #[test]
    fn final_response_enters_completed_and_waits_out_timer_k() {
        let mut fsm = started();
        let actions = fsm.on_event(NonInviteClientEvent::ReceiveFinal(Response::new(
            StatusCode::Ok,
        )));

        assert_eq!(fsm.state(), TransactionState::Completed);
        assert!(actions.contains(&Action::Cancel(TimerKind::E)));
        assert!(actions.contains(&Action::Cancel(TimerKind::F)));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Schedule { timer: TimerKind::K, delay } if *delay == Duration::from_secs(5)
        )));

        // retransmitted finals are absorbed silently
        assert!(fsm
            .on_event(NonInviteClientEvent::ReceiveFinal(Response::new(StatusCode::Ok)))
            .is_empty());

        let done = fsm.on_event(NonInviteClientEvent::TimerFired(TimerKind::K));
        assert_eq!(fsm.state(), TransactionState::Terminated);
        assert!(done.contains(&Action::Terminate(TerminationReason::Normal)));
    }

    #[test]
    fn timer_f_times_the_transaction_out_once() {
        let mut fsm = started();
        let actions = fsm.on_event(NonInviteClientEvent::TimerFired(TimerKind::F));
        assert_eq!(fsm.state(), TransactionState::Terminated);
        assert!(actions.contains(&Action::Terminate(TerminationReason::Timeout)));
        assert!(fsm.on_event(NonInviteClientEvent::TimerFired(TimerKind::F)).is_empty());
        assert!(fsm.on_event(NonInviteClientEvent::TimerFired(TimerKind::E)).is_empty());
    }
}
