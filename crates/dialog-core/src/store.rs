//! The dialog store.
//!
//! Dialogs live in one sharded map keyed by their opaque id, with a
//! second index from the wire triple so in-dialog traffic finds them.
//! Fork sets remember the INVITE that may still grow new dialogs: every
//! distinct remote tag answering one INVITE is its own dialog, but they
//! all share the INVITE's Call-ID and therefore its lane.

use std::net::SocketAddr;

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use tracing::warn;

use siprail_sip_core::{Request, Response};
use siprail_sip_transport::TransportKind;
use siprail_transaction_core::TransactionKey;

use crate::dialog::{Dialog, DialogState};
use crate::id::{DialogId, DialogKey};

/// Everything still tied to one outbound INVITE: the request itself,
/// where it went, and the dialogs its answers have created so far.
#[derive(Debug, Clone)]
pub struct ForkSet {
    pub origin: Request,
    pub peer: SocketAddr,
    pub transport: TransportKind,
    pub dialogs: Vec<DialogId>,
}

impl ForkSet {
    pub fn new(origin: Request, peer: SocketAddr, transport: TransportKind) -> Self {
        ForkSet {
            origin,
            peer,
            transport,
            dialogs: Vec::new(),
        }
    }
}

/// Shared, concurrently readable home of all dialogs
#[derive(Debug, Default)]
pub struct DialogStore {
    dialogs: DashMap<DialogId, Dialog>,
    by_key: DashMap<DialogKey, DialogId>,
    forks: DashMap<TransactionKey, ForkSet>,
}

impl DialogStore {
    pub fn new() -> Self {
        DialogStore::default()
    }

    /// Stores a dialog and indexes its wire triple. A colliding triple
    /// is repointed at the newcomer, which only happens when the peer
    /// reuses tags.
    pub fn insert(&self, dialog: Dialog) -> DialogId {
        let id = dialog.id;
        if let Some(previous) = self.by_key.insert(dialog.key(), id) {
            warn!(key = %dialog.key(), %previous, "dialog key reused, index repointed");
        }
        self.dialogs.insert(id, dialog);
        id
    }

    /// Snapshot of one dialog
    pub fn get(&self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.get(id).map(|entry| entry.clone())
    }

    pub(crate) fn get_mut(&self, id: &DialogId) -> Option<RefMut<'_, DialogId, Dialog>> {
        self.dialogs.get_mut(id)
    }

    /// Drops a dialog and its index entry
    pub fn remove(&self, id: &DialogId) -> Option<Dialog> {
        let (_, dialog) = self.dialogs.remove(id)?;
        self.by_key.remove_if(&dialog.key(), |_, mapped| mapped == id);
        Some(dialog)
    }

    pub fn find(&self, key: &DialogKey) -> Option<DialogId> {
        self.by_key.get(key).map(|entry| *entry)
    }

    /// Dialog an in-dialog request from the peer belongs to
    pub fn match_request(&self, request: &Request) -> Option<DialogId> {
        self.find(&DialogKey::from_request(request)?)
    }

    /// Dialog a response to one of our in-dialog requests belongs to
    pub fn match_response(&self, response: &Response) -> Option<DialogId> {
        self.find(&DialogKey::from_response(response)?)
    }

    pub fn state_of(&self, id: &DialogId) -> Option<DialogState> {
        self.dialogs.get(id).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.dialogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty()
    }

    pub(crate) fn insert_fork_set(&self, key: TransactionKey, set: ForkSet) {
        self.forks.insert(key, set);
    }

    pub(crate) fn fork_mut(
        &self,
        key: &TransactionKey,
    ) -> Option<RefMut<'_, TransactionKey, ForkSet>> {
        self.forks.get_mut(key)
    }

    pub(crate) fn take_fork_set(&self, key: &TransactionKey) -> Option<ForkSet> {
        self.forks.remove(key).map(|(_, set)| set)
    }

    pub fn has_fork_set(&self, key: &TransactionKey) -> bool {
        self.forks.contains_key(key)
    }

    /// Retires the fork set once nothing in it is alive any more
    pub(crate) fn retire_fork_if_drained(&self, key: &TransactionKey) {
        self.forks.remove_if(key, |_, set| {
            set.dialogs.iter().all(|id| !self.dialogs.contains_key(id))
        });
    }

    /// Drops fork sets whose dialogs all died. Sets that never grew a
    /// dialog stay, since their answers may still be in flight.
    pub(crate) fn sweep_forks(&self) {
        self.forks.retain(|_, set| {
            set.dialogs.is_empty() || set.dialogs.iter().any(|id| self.dialogs.contains_key(id))
        });
    }

    /// Empties every map, for shutdown. Returns how many dialogs died.
    pub(crate) fn clear(&self) -> usize {
        let count = self.dialogs.len();
        self.dialogs.clear();
        self.by_key.clear();
        self.forks.clear();
        count
    }
}
