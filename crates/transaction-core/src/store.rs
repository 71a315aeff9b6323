//! The transaction store.
//!
//! One sharded map owned by the manager, created at startup and handed
//! around by reference. Lookups can come from any thread, but every
//! mutation of one record happens on that record's lane, so references
//! are held only for the duration of a single event.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use siprail_dispatch_core::{now_ms, TimerHandle};
use siprail_sip_core::Request;
use siprail_sip_transport::TransportKind;

use crate::error::{Error, Result};
use crate::fsm::{
    Action, InviteClientEvent, InviteClientFsm, InviteServerEvent, InviteServerFsm,
    NonInviteClientEvent, NonInviteClientFsm, NonInviteServerEvent, NonInviteServerFsm,
};
use crate::key::TransactionKey;
use crate::state::{TransactionKind, TransactionState};
use crate::timer::TimerKind;

/// One of the four machines, behind a common face.
#[derive(Debug)]
pub(crate) enum Machine {
    InviteClient(InviteClientFsm),
    NonInviteClient(NonInviteClientFsm),
    InviteServer(InviteServerFsm),
    NonInviteServer(NonInviteServerFsm),
}

impl Machine {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Machine::InviteClient(_) => TransactionKind::InviteClient,
            Machine::NonInviteClient(_) => TransactionKind::NonInviteClient,
            Machine::InviteServer(_) => TransactionKind::InviteServer,
            Machine::NonInviteServer(_) => TransactionKind::NonInviteServer,
        }
    }

    pub fn state(&self) -> TransactionState {
        match self {
            Machine::InviteClient(fsm) => fsm.state(),
            Machine::NonInviteClient(fsm) => fsm.state(),
            Machine::InviteServer(fsm) => fsm.state(),
            Machine::NonInviteServer(fsm) => fsm.state(),
        }
    }

    /// Routes a fired timer to whichever machine this is.
    pub fn on_timer(&mut self, timer: TimerKind) -> Vec<Action> {
        match self {
            Machine::InviteClient(fsm) => fsm.on_event(InviteClientEvent::TimerFired(timer)),
            Machine::NonInviteClient(fsm) => {
                fsm.on_event(NonInviteClientEvent::TimerFired(timer))
            }
            Machine::InviteServer(fsm) => fsm.on_event(InviteServerEvent::TimerFired(timer)),
            Machine::NonInviteServer(fsm) => {
                fsm.on_event(NonInviteServerEvent::TimerFired(timer))
            }
        }
    }

    /// Tells the machine its transport gave up.
    pub fn on_transport_failed(&mut self) -> Vec<Action> {
        match self {
            Machine::InviteClient(fsm) => fsm.on_event(InviteClientEvent::TransportFailed),
            Machine::NonInviteClient(fsm) => fsm.on_event(NonInviteClientEvent::TransportFailed),
            Machine::InviteServer(fsm) => fsm.on_event(InviteServerEvent::TransportFailed),
            Machine::NonInviteServer(fsm) => fsm.on_event(NonInviteServerEvent::TransportFailed),
        }
    }
}

/// Everything the layer tracks for one live transaction.
#[derive(Debug)]
pub(crate) struct TransactionRecord {
    pub machine: Machine,
    /// Correlation key; fixes which lane all work for this call runs on
    pub call_id: String,
    /// Where retransmissions and responses go
    pub peer: SocketAddr,
    pub transport: TransportKind,
    /// The request that opened the transaction. Client INVITEs need it
    /// to build the ACK; server transactions need it for 487 and replay.
    pub origin: Option<Request>,
    /// Cached ACK bytes so retransmitted finals are re-ACKed cheaply
    pub ack: Option<Bytes>,
    /// Live timer handles, cancelled on request or at termination
    pub timers: HashMap<TimerKind, TimerHandle>,
    pub created_ms: u64,
}

impl TransactionRecord {
    pub fn new(
        machine: Machine,
        call_id: impl Into<String>,
        peer: SocketAddr,
        transport: TransportKind,
        origin: Option<Request>,
    ) -> Self {
        TransactionRecord {
            machine,
            call_id: call_id.into(),
            peer,
            transport,
            origin,
            ack: None,
            timers: HashMap::new(),
            created_ms: now_ms(),
        }
    }

    /// Cancels every pending timer. Called when the machine terminates.
    pub fn cancel_all_timers(&mut self) {
        for handle in self.timers.values() {
            handle.cancel();
        }
        self.timers.clear();
    }
}

/// Sharded map of live transactions keyed by [`TransactionKey`].
#[derive(Debug, Default)]
pub struct TransactionStore {
    records: DashMap<TransactionKey, TransactionRecord>,
}

impl TransactionStore {
    pub fn new() -> Self {
        TransactionStore {
            records: DashMap::new(),
        }
    }

    pub(crate) fn insert(&self, key: TransactionKey, record: TransactionRecord) -> Result<()> {
        if self.records.contains_key(&key) {
            return Err(Error::TransactionExists(key));
        }
        self.records.insert(key, record);
        Ok(())
    }

    pub(crate) fn get_mut(
        &self,
        key: &TransactionKey,
    ) -> Option<RefMut<'_, TransactionKey, TransactionRecord>> {
        self.records.get_mut(key)
    }

    pub(crate) fn remove(&self, key: &TransactionKey) -> Option<TransactionRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }

    pub fn contains(&self, key: &TransactionKey) -> bool {
        self.records.contains_key(key)
    }

    /// Current state of a transaction, if it is still in the store
    pub fn state_of(&self, key: &TransactionKey) -> Option<TransactionState> {
        self.records.get(key).map(|record| record.machine.state())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every live key, used by the shutdown sweep
    pub fn keys(&self) -> Vec<TransactionKey> {
        self.records.iter().map(|entry| entry.key().clone()).collect()
    }
}
