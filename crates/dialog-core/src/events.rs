//! Events the dialog layer reports to the application.
//!
//! This is the only stream an application needs to drive calls: new
//! INVITEs, dialog lifecycle changes and forwarded responses all arrive
//! here, in the order the engine processed them.

use std::fmt;
use std::net::SocketAddr;

use crossbeam_channel::{unbounded, Receiver, Sender};
use siprail_sip_core::{Request, Response, StatusCode};
use siprail_transaction_core::TransactionKey;

use crate::dialog::{DialogRole, DialogState};
use crate::id::DialogId;

/// Why a dialog or call attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// We sent BYE
    LocalBye,
    /// The peer sent BYE
    RemoteBye,
    /// The INVITE was cancelled before a final response
    Cancelled,
    /// A non-2xx final response
    Rejected(StatusCode),
    /// The transaction gave up waiting
    Timeout,
    /// The transport failed underneath the call
    TransportError,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::LocalBye => f.write_str("local BYE"),
            EndReason::RemoteBye => f.write_str("remote BYE"),
            EndReason::Cancelled => f.write_str("cancelled"),
            EndReason::Rejected(status) => write!(f, "rejected with {status}"),
            EndReason::Timeout => f.write_str("timeout"),
            EndReason::TransportError => f.write_str("transport error"),
        }
    }
}

/// What the dialog layer tells the application.
#[derive(Debug, Clone)]
pub enum DialogEvent {
    /// A new INVITE outside any dialog. The application owes the
    /// transaction a final response via `DialogManager::respond`.
    InviteReceived {
        key: TransactionKey,
        request: Request,
        source: SocketAddr,
    },

    /// A non-INVITE request outside any dialog (OPTIONS, REGISTER, ...)
    OutOfDialogRequest {
        key: TransactionKey,
        request: Request,
        source: SocketAddr,
    },

    /// A dialog came into existence, Early or straight to Confirmed
    Created {
        id: DialogId,
        state: DialogState,
        role: DialogRole,
    },

    /// A live dialog moved between non-terminal states
    StateChanged {
        id: DialogId,
        old: DialogState,
        new: DialogState,
    },

    /// A response on one of our client transactions. `id` is set when
    /// the response belongs to a dialog; a 2xx on an INVITE must be
    /// answered with `DialogManager::ack`.
    ResponseReceived {
        id: Option<DialogId>,
        key: TransactionKey,
        response: Response,
    },

    /// An in-dialog request other than BYE; the application owes a
    /// response via `DialogManager::respond`
    RequestReceived {
        id: DialogId,
        key: TransactionKey,
        request: Request,
    },

    /// The ACK for a 2xx arrived and matched this dialog
    AckReceived { id: DialogId, request: Request },

    /// The peer cancelled a pending INVITE. The engine has already
    /// answered the CANCEL and finished the INVITE with 487; `id` names
    /// the early dialog that died with it, when one existed.
    Cancelled {
        key: TransactionKey,
        id: Option<DialogId>,
    },

    /// The dialog is over and has left the store
    Terminated { id: DialogId, reason: EndReason },

    /// A call attempt died before any dialog existed
    Failed {
        key: TransactionKey,
        reason: EndReason,
    },
}

/// Builds the channel the manager publishes [`DialogEvent`]s on
pub fn event_channel() -> (Sender<DialogEvent>, Receiver<DialogEvent>) {
    unbounded()
}
