use thiserror::Error;

use crate::key::TransactionKey;
use crate::state::{TransactionKind, TransactionState};

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the transaction layer
#[derive(Error, Debug)]
pub enum Error {
    /// Request arrived without a Call-ID header
    #[error("Missing Call-ID")]
    MissingCallId,

    /// Request arrived without a CSeq header
    #[error("Missing CSeq")]
    MissingCSeq,

    /// Request arrived without a branch on the top Via
    #[error("Missing Via branch")]
    MissingViaBranch,

    /// CSeq method disagrees with the request line method
    #[error("CSeq method {cseq} does not match request method {line}")]
    CSeqMethodMismatch { line: String, cseq: String },

    /// A second transaction with the same key
    #[error("Transaction already exists: {0}")]
    TransactionExists(TransactionKey),

    /// Lookup for a transaction that is not in the store
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionKey),

    /// A state change the machine's kind does not allow
    #[error("{kind} cannot move {from} -> {to}")]
    InvalidTransition {
        kind: TransactionKind,
        from: TransactionState,
        to: TransactionState,
    },

    /// The manager was shut down
    #[error("Transaction manager is shut down")]
    Shutdown,

    /// Error from the transport layer
    #[error("Transport error: {0}")]
    Transport(#[from] siprail_sip_transport::Error),

    /// Error from the dispatch layer
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] siprail_dispatch_core::Error),

    /// Error from message construction or parsing
    #[error("Message error: {0}")]
    Core(#[from] siprail_sip_core::Error),
}
