//! The dialog manager.
//!
//! Sits between the application and the transaction engine. Downward it
//! owns the calls the application starts or answers; upward it folds the
//! transaction event stream into dialog lifecycle events, so the
//! application only ever reasons about calls.
//!
//! Threading: `handle_event` must be fed from a single thread (use
//! [`DialogManager::spawn_pump`]), which keeps the event order the lanes
//! produced. The API methods may be called from any thread; every
//! touched dialog is mutated under its own store entry lock.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use tracing::{debug, info, trace, warn};

use siprail_sip_core::builder::{cancel_for, response_for};
use siprail_sip_core::{Message, Method, Request, Response, StatusCode};
use siprail_sip_transport::TransportKind;
use siprail_transaction_core::{TransactionEvent, TransactionKey, TransactionManager};

use crate::dialog::{Dialog, DialogState};
use crate::error::{Error, Result};
use crate::events::{event_channel, DialogEvent, EndReason};
use crate::id::{DialogId, DialogKey};
use crate::store::{DialogStore, ForkSet};

/// How long the pump waits for an event before rechecking liveness
const PUMP_IDLE: Duration = Duration::from_millis(100);

/// Server-side INVITE context, kept until its transaction ends
struct UasContext {
    request: Request,
    source: SocketAddr,
    transport: TransportKind,
    dialog: Option<DialogId>,
}

/// Cheaply cloneable handle onto the dialog layer
#[derive(Clone)]
pub struct DialogManager {
    inner: Arc<Inner>,
}

struct Inner {
    transactions: TransactionManager,
    store: DialogStore,
    pending_uas: DashMap<TransactionKey, UasContext>,
    events_tx: Sender<DialogEvent>,
}

impl DialogManager {
    /// Builds the manager on top of a running transaction engine and
    /// hands back the event stream the application consumes.
    pub fn new(transactions: TransactionManager) -> (Self, Receiver<DialogEvent>) {
        let (events_tx, events_rx) = event_channel();
        let manager = DialogManager {
            inner: Arc::new(Inner {
                transactions,
                store: DialogStore::new(),
                pending_uas: DashMap::new(),
                events_tx,
            }),
        };
        (manager, events_rx)
    }

    /// The live dialog store, for state queries
    pub fn store(&self) -> &DialogStore {
        &self.inner.store
    }

    /// The transaction engine underneath, for non-dialog traffic
    pub fn transactions(&self) -> &TransactionManager {
        &self.inner.transactions
    }

    /// Starts a call: sends the INVITE and watches its answers for
    /// dialogs. The request must carry a From tag, since without one
    /// no dialog could ever be identified.
    ///
    /// The fork set is indexed before the send starts, so even an
    /// answer racing the send finds it.
    pub fn invite(
        &self,
        request: Request,
        peer: SocketAddr,
        transport: TransportKind,
    ) -> Result<TransactionKey> {
        let mut fork_key = None;
        if request.method == Method::Invite {
            if request.from_tag().is_none() {
                return Err(Error::MissingFromTag);
            }
            if let Some(key) = TransactionKey::from_client_request(&request) {
                self.inner
                    .store
                    .insert_fork_set(key.clone(), ForkSet::new(request.clone(), peer, transport));
                fork_key = Some(key);
            }
        }
        match self.inner.transactions.send_request(request, peer, transport) {
            Ok(key) => {
                if fork_key.is_some() {
                    info!(%key, "call started");
                }
                Ok(key)
            }
            Err(error) => {
                if let Some(key) = &fork_key {
                    self.inner.store.take_fork_set(key);
                }
                Err(error.into())
            }
        }
    }

    /// Cancels a pending outbound INVITE. The CANCEL reuses the
    /// INVITE's branch and travels as its own transaction; the engine
    /// finishes the INVITE when the 487 comes back.
    pub fn cancel(&self, key: &TransactionKey) -> Result<TransactionKey> {
        let (request, peer, transport) = {
            let set = self
                .inner
                .store
                .fork_mut(key)
                .ok_or_else(|| Error::NoPendingInvite(key.clone()))?;
            (cancel_for(&set.origin)?, set.peer, set.transport)
        };
        Ok(self.inner.transactions.send_request(request, peer, transport)?)
    }

    /// Answers a server transaction. A tagged 1xx or a 2xx on an
    /// initial INVITE creates or confirms the dialog; the affected
    /// dialog id is returned when there is one.
    ///
    /// Bookkeeping runs before the response is handed down, so the
    /// dialog exists by the time the peer can possibly ACK it.
    pub fn respond(&self, key: &TransactionKey, response: Response) -> Result<Option<DialogId>> {
        let (id, created) = self.inner.absorb_uas_response(key, &response);
        if let Err(error) = self.inner.transactions.send_response(key, response) {
            if created {
                if let Some(id) = id {
                    self.inner.terminate_dialog(&id, EndReason::TransportError);
                }
            }
            return Err(error.into());
        }
        Ok(id)
    }

    /// ACKs the 2xx that confirmed `id`. The ACK travels outside any
    /// transaction, straight to the dialog's remote target.
    pub fn ack(&self, id: &DialogId) -> Result<()> {
        let dialog = self
            .inner
            .store
            .get(id)
            .ok_or(Error::DialogNotFound(*id))?;
        if dialog.is_terminated() {
            return Err(Error::DialogNotActive {
                id: *id,
                state: dialog.state,
            });
        }
        let via_host = self.inner.via_host(dialog.transport)?;
        let ack = dialog.ack_for_2xx(&via_host);
        self.inner
            .transactions
            .send_ack(&ack, dialog.remote_addr, dialog.transport)?;
        Ok(())
    }

    /// Hangs up: sends BYE and terminates the dialog immediately. The
    /// peer's answer to the BYE changes nothing locally.
    pub fn bye(&self, id: &DialogId) -> Result<TransactionKey> {
        let (request, peer, transport) = {
            let mut dialog = self
                .inner
                .store
                .get_mut(id)
                .ok_or(Error::DialogNotFound(*id))?;
            if dialog.is_terminated() {
                return Err(Error::DialogNotActive {
                    id: *id,
                    state: dialog.state,
                });
            }
            let via_host = self.inner.via_host(dialog.transport)?;
            let request = dialog.next_request(Method::Bye, &via_host);
            (request, dialog.remote_addr, dialog.transport)
        };
        let key = self.inner.transactions.send_request(request, peer, transport)?;
        self.inner.terminate_dialog(id, EndReason::LocalBye);
        Ok(key)
    }

    /// Folds one transaction event into the dialog world. Must be
    /// called from a single thread to preserve event order.
    pub fn handle_event(&self, event: TransactionEvent) {
        self.inner.process(event);
    }

    /// Spawns the thread that drains the transaction event stream into
    /// `handle_event`. The thread exits once the stream closes or the
    /// engine underneath shuts down and the stream runs dry.
    pub fn spawn_pump(&self, events: Receiver<TransactionEvent>) -> io::Result<JoinHandle<()>> {
        let manager = self.clone();
        thread::Builder::new()
            .name("siprail-dialog".into())
            .spawn(move || {
                loop {
                    match events.recv_timeout(PUMP_IDLE) {
                        Ok(event) => manager.handle_event(event),
                        Err(RecvTimeoutError::Timeout) => {
                            if !manager.transactions().is_running() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("dialog pump exits");
            })
    }

    /// Shuts the transaction engine down and drops every dialog.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.inner.transactions.shutdown();
        self.inner.pending_uas.clear();
        let dropped = self.inner.store.clear();
        if dropped > 0 {
            info!(dropped, "dialog store cleared");
        }
    }
}

impl Inner {
    fn process(&self, event: TransactionEvent) {
        match event {
            TransactionEvent::NewRequest {
                key,
                request,
                source,
                transport,
            } => self.on_request(key, request, source, transport),
            TransactionEvent::ProvisionalResponse { key, response }
            | TransactionEvent::FinalResponse { key, response } => self.on_response(key, response),
            TransactionEvent::AckReceived { key, request, source } => {
                self.on_ack(key, request, source)
            }
            TransactionEvent::CancelReceived { key } => self.on_cancel(key),
            TransactionEvent::TimedOut { key } => self.on_attempt_failed(key, EndReason::Timeout),
            TransactionEvent::TransportFailed { key } => {
                self.on_attempt_failed(key, EndReason::TransportError)
            }
            TransactionEvent::Terminated { key } => self.on_transaction_gone(&key),
            TransactionEvent::Unmatched { message, source } => self.on_unmatched(message, source),
            TransactionEvent::Rejected { status, call_id, .. } => {
                trace!(status = status.as_u16(), ?call_id, "boundary rejection, nothing dialog-level");
            }
        }
    }

    /// New server transaction: route into a dialog or hand the request
    /// to the application.
    fn on_request(
        &self,
        key: TransactionKey,
        request: Request,
        source: SocketAddr,
        transport: TransportKind,
    ) {
        if let Some(id) = self.store.match_request(&request) {
            self.on_dialog_request(id, key, request);
            return;
        }
        if request.to_tag().is_some() || request.method == Method::Bye {
            // RFC 3261 12.2.2: mid-dialog request for a dialog we do
            // not have, answered 481
            debug!(%key, method = %request.method, "request matches no dialog, answering 481");
            let response = response_for(&request, StatusCode::CallOrTransactionDoesNotExist);
            if let Err(error) = self.transactions.send_response(&key, response) {
                debug!(%key, %error, "could not answer unknown-dialog request");
            }
            return;
        }
        match request.method {
            Method::Invite => {
                self.pending_uas.insert(
                    key.clone(),
                    UasContext {
                        request: request.clone(),
                        source,
                        transport,
                        dialog: None,
                    },
                );
                self.emit(DialogEvent::InviteReceived { key, request, source });
            }
            _ => self.emit(DialogEvent::OutOfDialogRequest { key, request, source }),
        }
    }

    /// In-dialog request from the peer. BYE is finished here; anything
    /// else is the application's to answer.
    fn on_dialog_request(&self, id: DialogId, key: TransactionKey, request: Request) {
        // ACK repeats the INVITE's CSeq and is exempt from the check
        if request.method != Method::Ack {
            if let Some((seq, _)) = request.cseq() {
                let checked = self
                    .store
                    .get_mut(&id)
                    .map(|mut dialog| dialog.accept_remote_cseq(seq));
                if let Some(Err(error)) = checked {
                    // RFC 3261 12.2.2: out-of-order requests get 500
                    warn!(%id, %error, "in-dialog request refused");
                    let response = response_for(&request, StatusCode::ServerInternalError);
                    if let Err(error) = self.transactions.send_response(&key, response) {
                        debug!(%key, %error, "could not refuse out-of-order request");
                    }
                    return;
                }
            }
        }

        if request.method == Method::Bye {
            let response = response_for(&request, StatusCode::Ok);
            if let Err(error) = self.transactions.send_response(&key, response) {
                debug!(%key, %error, "could not answer BYE");
            }
            self.terminate_dialog(&id, EndReason::RemoteBye);
            return;
        }
        self.emit(DialogEvent::RequestReceived { id, key, request });
    }

    /// Response on a client transaction: answers to our INVITE drive
    /// dialog creation, everything else is forwarded.
    fn on_response(&self, key: TransactionKey, response: Response) {
        if self.store.has_fork_set(&key) {
            self.on_call_answer(key, response);
            return;
        }
        let id = self.store.match_response(&response);
        self.emit(DialogEvent::ResponseReceived { id, key, response });
    }

    fn on_call_answer(&self, key: TransactionKey, response: Response) {
        let status = response.status;
        if status.is_final() && !status.is_success() {
            // one rejection ends every fork of the attempt
            if let Some(set) = self.store.take_fork_set(&key) {
                for id in &set.dialogs {
                    self.terminate_dialog(id, EndReason::Rejected(status));
                }
            }
            self.emit(DialogEvent::ResponseReceived {
                id: None,
                key,
                response,
            });
            return;
        }
        if response.to_tag().is_none() || status == StatusCode::Trying {
            // nothing dialog-forming about a 100
            self.emit(DialogEvent::ResponseReceived {
                id: None,
                key,
                response,
            });
            return;
        }
        let id = self.dialog_for_answer(&key, &response);
        self.emit(DialogEvent::ResponseReceived { id, key, response });
    }

    /// Finds the fork dialog a tagged answer belongs to, creating it on
    /// first sight of the remote tag.
    fn dialog_for_answer(&self, key: &TransactionKey, response: &Response) -> Option<DialogId> {
        let dialog_key = DialogKey::from_response(response)?;
        if let Some(id) = self.store.find(&dialog_key) {
            if response.status.is_success() {
                self.confirm_dialog(&id, response);
            }
            return Some(id);
        }

        let mut set = self.store.fork_mut(key)?;
        let dialog = Dialog::from_uac_response(&set.origin, response, set.peer, set.transport)?;
        let id = dialog.id;
        let state = dialog.state;
        let role = dialog.role;
        set.dialogs.push(id);
        let fork = set.dialogs.len();
        drop(set);

        self.store.insert(dialog);
        info!(%id, %state, fork, "dialog created");
        self.emit(DialogEvent::Created { id, state, role });
        Some(id)
    }

    fn confirm_dialog(&self, id: &DialogId, response: &Response) {
        let confirmed = self
            .store
            .get_mut(id)
            .map(|mut dialog| dialog.update_from_2xx(response))
            .unwrap_or(false);
        if confirmed {
            self.emit(DialogEvent::StateChanged {
                id: *id,
                old: DialogState::Early,
                new: DialogState::Confirmed,
            });
        }
    }

    /// UAS answer bookkeeping. Returns the affected dialog and whether
    /// this call created it, so a failed send can unwind.
    fn absorb_uas_response(
        &self,
        key: &TransactionKey,
        response: &Response,
    ) -> (Option<DialogId>, bool) {
        let Some(mut ctx) = self.pending_uas.get_mut(key) else {
            return (None, false);
        };
        let status = response.status;
        if status.is_final() && !status.is_success() {
            if let Some(id) = ctx.dialog.take() {
                drop(ctx);
                self.terminate_dialog(&id, EndReason::Rejected(status));
            }
            return (None, false);
        }
        if response.to_tag().is_none() || status == StatusCode::Trying {
            return (ctx.dialog, false);
        }

        if let Some(id) = ctx.dialog {
            if status.is_success() {
                drop(ctx);
                self.confirm_dialog(&id, response);
            }
            return (Some(id), false);
        }
        let Some(dialog) =
            Dialog::from_uas_response(&ctx.request, response, ctx.source, ctx.transport)
        else {
            return (None, false);
        };
        let id = dialog.id;
        let state = dialog.state;
        let role = dialog.role;
        ctx.dialog = Some(id);
        drop(ctx);

        self.store.insert(dialog);
        info!(%id, %state, "dialog created");
        self.emit(DialogEvent::Created { id, state, role });
        (Some(id), true)
    }

    fn on_ack(&self, key: Option<TransactionKey>, request: Request, source: SocketAddr) {
        match key {
            // the ACK for a non-2xx died inside the server transaction
            Some(key) => trace!(%key, "ACK absorbed by its INVITE transaction"),
            None => {
                if let Some(id) = self.store.match_request(&request) {
                    self.emit(DialogEvent::AckReceived { id, request });
                } else {
                    debug!(%source, "ACK matches no dialog, dropped");
                }
            }
        }
    }

    fn on_cancel(&self, key: TransactionKey) {
        let id = self
            .pending_uas
            .get_mut(&key)
            .and_then(|mut ctx| ctx.dialog.take());
        self.emit(DialogEvent::Cancelled {
            key,
            id,
        });
        if let Some(id) = id {
            self.terminate_dialog(&id, EndReason::Cancelled);
        }
    }

    /// Timeout or transport death on a transaction that was carrying a
    /// call attempt.
    fn on_attempt_failed(&self, key: TransactionKey, reason: EndReason) {
        if let Some(set) = self.store.take_fork_set(&key) {
            for id in &set.dialogs {
                self.terminate_dialog(id, reason);
            }
            self.emit(DialogEvent::Failed { key, reason });
            return;
        }
        if let Some((_, ctx)) = self.pending_uas.remove(&key) {
            if let Some(id) = ctx.dialog {
                self.terminate_dialog(&id, reason);
            }
            self.emit(DialogEvent::Failed { key, reason });
            return;
        }
        trace!(%key, %reason, "failure outside any call attempt");
    }

    fn on_transaction_gone(&self, key: &TransactionKey) {
        self.pending_uas.remove(key);
        // a fork set with no dialogs left has nothing more to absorb
        self.store.retire_fork_if_drained(key);
    }

    /// RFC 3261 17.1.1.2: 2xx responses landing after the INVITE client
    /// transaction terminated belong to the dialog layer. Everything
    /// else unmatched is noise.
    fn on_unmatched(&self, message: Message, source: SocketAddr) {
        let Message::Response(response) = message else {
            return;
        };
        if !response.status.is_success() {
            debug!(%source, status = response.status.as_u16(), "late non-2xx, dropped");
            return;
        }
        let invite = matches!(response.cseq(), Some((_, Method::Invite)));
        let key = TransactionKey::from_response(&response);
        match key {
            Some(key) if invite && self.store.has_fork_set(&key) => {
                let id = self.dialog_for_answer(&key, &response);
                self.emit(DialogEvent::ResponseReceived { id, key, response });
            }
            _ => debug!(%source, "late 2xx for a finished call, dropped"),
        }
    }

    fn terminate_dialog(&self, id: &DialogId, reason: EndReason) {
        let Some(mut dialog) = self.store.remove(id) else {
            return;
        };
        dialog.terminate();
        info!(%id, call_id = %dialog.call_id, %reason, "dialog ended");
        self.emit(DialogEvent::Terminated { id: *id, reason });
        self.store.sweep_forks();
    }

    /// host:port the transport of `kind` answers on, for Via rendering
    fn via_host(&self, kind: TransportKind) -> Result<String> {
        let transport = self
            .transactions
            .transports()
            .get(kind)
            .ok_or(siprail_sip_transport::Error::UnsupportedTransport(kind))?;
        Ok(transport.local_addr()?.to_string())
    }

    fn emit(&self, event: DialogEvent) {
        if self.events_tx.send(event).is_err() {
            trace!("dialog event receiver dropped");
        }
    }
}
