//! Transaction states and the legal moves between them.
//!
//! One state enum serves all four machine kinds; which states a machine
//! actually visits depends on its kind. Per-key lane affinity means a
//! machine is only ever touched from one worker thread, so states are
//! plain values with no interior locking.

use std::fmt;

use crate::error::{Error, Result};

/// The states of RFC 3261 17.1 / 17.2, shared by all machine kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Created but not yet started
    Initial,
    /// INVITE client: request sent, nothing heard yet
    Calling,
    /// Non-INVITE: request sent or received, no response yet
    Trying,
    /// A provisional response has been seen or sent
    Proceeding,
    /// A final response has been seen or sent; absorbing retransmissions
    Completed,
    /// INVITE server: ACK received for a non-2xx final
    Confirmed,
    /// Done. The store drops the machine at this point.
    Terminated,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Terminated)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Initial => "Initial",
            TransactionState::Calling => "Calling",
            TransactionState::Trying => "Trying",
            TransactionState::Proceeding => "Proceeding",
            TransactionState::Completed => "Completed",
            TransactionState::Confirmed => "Confirmed",
            TransactionState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// Which of the four RFC 3261 machines a transaction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TransactionKind {
    pub fn is_server(&self) -> bool {
        matches!(
            self,
            TransactionKind::InviteServer | TransactionKind::NonInviteServer
        )
    }

    pub fn is_invite(&self) -> bool {
        matches!(
            self,
            TransactionKind::InviteClient | TransactionKind::InviteServer
        )
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::InviteClient => "InviteClient",
            TransactionKind::NonInviteClient => "NonInviteClient",
            TransactionKind::InviteServer => "InviteServer",
            TransactionKind::NonInviteServer => "NonInviteServer",
        };
        f.write_str(name)
    }
}

/// Checks that `from -> to` is a move the RFC allows for `kind`.
///
/// Staying in the same state is always fine (retransmissions do this a
/// lot), and every state may move to Terminated, which covers transport
/// failure and shutdown paths.
pub fn validate_transition(
    kind: TransactionKind,
    from: TransactionState,
    to: TransactionState,
) -> Result<()> {
    use TransactionKind::*;
    use TransactionState::*;

    if from == to {
        return Ok(());
    }
    if from == Terminated {
        return Err(Error::InvalidTransition { kind, from, to });
    }
    if to == Terminated {
        return Ok(());
    }

    let allowed = match (kind, from, to) {
        (InviteClient, Initial, Calling) => true,
        (InviteClient, Calling, Proceeding | Completed) => true,
        (InviteClient, Proceeding, Completed) => true,

        (NonInviteClient, Initial, Trying) => true,
        (NonInviteClient, Trying, Proceeding | Completed) => true,
        (NonInviteClient, Proceeding, Completed) => true,

        (InviteServer, Initial, Proceeding) => true,
        (InviteServer, Proceeding, Completed) => true,
        (InviteServer, Completed, Confirmed) => true,

        (NonInviteServer, Initial, Trying) => true,
        (NonInviteServer, Trying, Proceeding | Completed) => true,
        (NonInviteServer, Proceeding, Completed) => true,

        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(Error::InvalidTransition { kind, from, to })
    }
}
