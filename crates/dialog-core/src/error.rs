use thiserror::Error;

use siprail_transaction_core::TransactionKey;

use crate::dialog::DialogState;
use crate::id::DialogId;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the dialog layer
#[derive(Error, Debug)]
pub enum Error {
    /// Lookup for a dialog that is not in the store
    #[error("Dialog not found: {0}")]
    DialogNotFound(DialogId),

    /// An operation that needs a live dialog hit a terminated one
    #[error("Dialog {id} is {state}")]
    DialogNotActive { id: DialogId, state: DialogState },

    /// An outbound INVITE without a From tag cannot seed a dialog
    #[error("Missing From tag")]
    MissingFromTag,

    /// CANCEL for a transaction that holds no INVITE of ours
    #[error("No pending INVITE for {0}")]
    NoPendingInvite(TransactionKey),

    /// In-dialog request arrived with a CSeq at or below the last one
    #[error("Stale CSeq {got}, last seen {last}")]
    StaleCSeq { got: u32, last: u32 },

    /// Engine configuration failed to parse or validate
    #[error("Invalid engine configuration: {0}")]
    Config(String),

    /// Reading a configuration file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the transaction layer
    #[error("Transaction error: {0}")]
    Transaction(#[from] siprail_transaction_core::Error),

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
