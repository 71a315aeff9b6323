//! RFC 3261 dialog layer and engine assembly for the siprail stack
//!
//! A [`Dialog`](dialog::Dialog) is the peer-to-peer call state of RFC
//! 3261 section 12: the tag pair and Call-ID that identify it, the CSeq
//! counters, the remote target and the route set. Dialogs are created
//! from the answers to an INVITE (one per fork) and die on BYE, CANCEL,
//! rejection or transaction failure.
//!
//! The [`DialogManager`] folds the transaction event stream into
//! [`DialogEvent`]s on a single pump thread, so dialog state needs no
//! locking beyond its store entry. [`Engine`](engine::Engine) assembles
//! the whole stack (dispatcher, workers, timer wheel, transports,
//! transactions, dialogs) from one [`EngineConfig`](config::EngineConfig).

pub mod config;
pub mod dialog;
pub mod engine;
pub mod error;
pub mod events;
pub mod id;
pub mod manager;
pub mod store;

pub use config::EngineConfig;
pub use dialog::{Dialog, DialogRole, DialogState};
pub use engine::Engine;
pub use error::{Error, Result};
pub use events::{event_channel, DialogEvent, EndReason};
pub use id::{DialogId, DialogKey};
pub use manager::DialogManager;
pub use store::DialogStore;
