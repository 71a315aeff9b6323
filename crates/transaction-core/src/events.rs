//! Events the transaction layer reports to the layer above it.
//!
//! The manager pushes these onto an unbounded channel; the dialog layer
//! or application drains them at its own pace. Nothing in here blocks a
//! worker lane.

use std::net::SocketAddr;

use crossbeam_channel::{unbounded, Receiver, Sender};
use siprail_sip_core::{Message, Request, Response, StatusCode};
use siprail_sip_transport::TransportKind;

use crate::key::TransactionKey;

/// What the transaction layer tells the transaction user.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// A request created a new server transaction. The user owes it a
    /// final response.
    NewRequest {
        key: TransactionKey,
        request: Request,
        source: SocketAddr,
        transport: TransportKind,
    },

    /// A client transaction received a 1xx
    ProvisionalResponse {
        key: TransactionKey,
        response: Response,
    },

    /// A client transaction received its final response
    FinalResponse {
        key: TransactionKey,
        response: Response,
    },

    /// An ACK arrived. `key` is set when it matched an INVITE server
    /// transaction (non-2xx case); the ACK for a 2xx travels outside
    /// any transaction and is matched by the dialog layer instead.
    AckReceived {
        key: Option<TransactionKey>,
        request: Request,
        source: SocketAddr,
    },

    /// A CANCEL matched this INVITE server transaction. The layer has
    /// already answered the CANCEL and is finishing the INVITE with 487.
    CancelReceived { key: TransactionKey },

    /// Timers ran out with no answer from the peer. Reported exactly
    /// once per transaction.
    TimedOut { key: TransactionKey },

    /// The transport failed while this transaction was live
    TransportFailed { key: TransactionKey },

    /// The transaction reached Terminated and left the store
    Terminated { key: TransactionKey },

    /// A message was rejected at the boundary before any transaction
    /// work happened: 400 for malformed requests, 503 with Retry-After
    /// under congestion.
    Rejected {
        status: StatusCode,
        call_id: Option<String>,
        source: SocketAddr,
    },

    /// A message that matched no transaction and created none. Logged
    /// and otherwise dropped.
    Unmatched { message: Message, source: SocketAddr },
}

/// Creates the event channel the manager reports on.
pub fn event_channel() -> (Sender<TransactionEvent>, Receiver<TransactionEvent>) {
    unbounded()
}
