//! Non-INVITE server transaction, RFC 3261 17.2.2.
//!
//! Trying -> Proceeding -> Completed -> Terminated. No ACK exists here;
//! retransmitted requests are answered by replaying the last response,
//! and Timer J keeps the machine around long enough to keep doing so.

use bytes::Bytes;
use siprail_sip_core::Response;
use siprail_sip_transport::TransportKind;
use tracing::trace;

use crate::fsm::{Action, TerminationReason};
use crate::state::{validate_transition, TransactionKind, TransactionState};
use crate::timer::{TimerKind, TimerSettings};

/// Inputs that drive a non-INVITE server machine.
#[derive(Debug, Clone)]
pub enum NonInviteServerEvent {
    /// The request that creates the transaction, or a retransmission
    ReceiveRequest,
    SendProvisional(Response),
    SendFinal(Response),
    TimerFired(TimerKind),
    TransportFailed,
}

#[derive(Debug)]
pub struct NonInviteServerFsm {
    state: TransactionState,
    transport: TransportKind,
    settings: TimerSettings,
    last_provisional: Option<Bytes>,
    last_final: Option<Bytes>,
}

impl NonInviteServerFsm {
    pub fn new(transport: TransportKind, settings: TimerSettings) -> Self {
        NonInviteServerFsm {
            state: TransactionState::Initial,
            transport,
            settings,
            last_provisional: None,
            last_final: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn on_event(&mut self, event: NonInviteServerEvent) -> Vec<Action> {
        use TransactionState::*;
        match (self.state, event) {
            (Initial, NonInviteServerEvent::ReceiveRequest) => {
                self.set_state(Trying);
                Vec::new()
            }
            // nothing has been sent yet, so there is nothing to replay
            (Trying, NonInviteServerEvent::ReceiveRequest) => Vec::new(),
            (Proceeding, NonInviteServerEvent::ReceiveRequest) => {
                match &self.last_provisional {
                    Some(bytes) => vec![Action::Transmit(bytes.clone())],
                    None => Vec::new(),
                }
            }
            (Completed, NonInviteServerEvent::ReceiveRequest) => match &self.last_final {
                Some(bytes) => vec![Action::Transmit(bytes.clone())],
                None => Vec::new(),
            },
            (Trying | Proceeding, NonInviteServerEvent::SendProvisional(response)) => {
                let bytes = Bytes::from(response.to_wire());
                self.last_provisional = Some(bytes.clone());
                self.set_state(Proceeding);
                vec![Action::Transmit(bytes)]
            }
            (Trying | Proceeding, NonInviteServerEvent::SendFinal(response)) => {
                let bytes = Bytes::from(response.to_wire());
                self.last_final = Some(bytes.clone());
                self.set_state(Completed);
                vec![
                    Action::Transmit(bytes),
                    Action::Schedule {
                        timer: TimerKind::J,
                        delay: self.settings.wait_j(self.transport),
                    },
                ]
            }
            (Completed, NonInviteServerEvent::TimerFired(TimerKind::J)) => {
                self.set_state(Terminated);
                vec![Action::Terminate(TerminationReason::Normal)]
            }
            (
                Initial | Trying | Proceeding | Completed,
                NonInviteServerEvent::TransportFailed,
            ) => {
                self.set_state(Terminated);
                vec![Action::Terminate(TerminationReason::TransportError)]
            }
            (state, event) => {
                trace!(%state, ?event, "event ignored in this state");
                Vec::new()
            }
        }
    }

    fn set_state(&mut self, to: TransactionState) {
        debug_assert!(
            validate_transition(TransactionKind::NonInviteServer, self.state, to).is_ok()
        );
        trace!(from = %self.state, to = %to, "non-INVITE server transition");
        self.state = to;
    }
}
