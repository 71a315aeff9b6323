//! The transaction manager: admission at the boundary, lane dispatch,
//! and the glue between machines, timers and transports.
//!
//! Inbound messages are validated and admission-checked on the receiving
//! thread, then queued on the lane their Call-ID hashes to. Everything
//! that touches a machine afterwards (driving events, firing timers,
//! sending from the transaction user) runs on that one lane, so machines
//! stay plain data. Timer payloads come back through the dispatcher
//! under the same Call-ID, never inline from the scheduler.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, trace, warn};

use siprail_dispatch_core::{now_ms, CongestionPolicy, Dispatcher, Task, TimerWheel};
use siprail_sip_core::builder::{ack_for_non_2xx, response_for, trying_for};
use siprail_sip_core::{Header, HeaderName, Message, Method, Request, Response, StatusCode};
use siprail_sip_transport::{
    Error as TransportError, TransportEvent, TransportKind, TransportPool,
};

use crate::error::{Error, Result};
use crate::events::{event_channel, TransactionEvent};
use crate::fsm::{
    Action, InviteClientEvent, InviteClientFsm, InviteServerEvent, InviteServerFsm,
    NonInviteClientEvent, NonInviteClientFsm, NonInviteServerEvent, NonInviteServerFsm,
    TerminationReason,
};
use crate::key::TransactionKey;
use crate::state::TransactionState;
use crate::store::{Machine, TransactionRecord, TransactionStore};
use crate::timer::{TimerKind, TimerSettings};

/// Handle to the transaction layer. Cheap to clone; all clones drive the
/// same store and lanes.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<Inner>,
}

struct Inner {
    dispatcher: Arc<Dispatcher>,
    wheel: Arc<TimerWheel>,
    transports: Arc<TransportPool>,
    congestion: CongestionPolicy,
    settings: TimerSettings,
    store: TransactionStore,
    events_tx: Sender<TransactionEvent>,
    running: AtomicBool,
}

impl TransactionManager {
    /// Builds the manager and hands back the event stream the layer
    /// above consumes.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        wheel: Arc<TimerWheel>,
        transports: Arc<TransportPool>,
        congestion: CongestionPolicy,
        settings: TimerSettings,
    ) -> (Self, Receiver<TransactionEvent>) {
        let (events_tx, events_rx) = event_channel();
        let manager = TransactionManager {
            inner: Arc::new(Inner {
                dispatcher,
                wheel,
                transports,
                congestion,
                settings,
                store: TransactionStore::new(),
                events_tx,
                running: AtomicBool::new(true),
            }),
        };
        (manager, events_rx)
    }

    /// The live transaction store, for state queries
    pub fn store(&self) -> &TransactionStore {
        &self.inner.store
    }

    /// The transport pool requests and responses leave through
    pub fn transports(&self) -> &Arc<TransportPool> {
        &self.inner.transports
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Feeds one transport event into the layer. Call this from the
    /// thread draining the transport's receiver; `transport` names which
    /// transport that is, so replies can leave the way they came.
    pub fn handle_transport_event(&self, transport: TransportKind, event: TransportEvent) {
        match event {
            TransportEvent::MessageReceived { message, source, .. } => {
                self.handle_message(message, source, transport);
            }
            TransportEvent::Error { error } => {
                warn!(%error, "transport reported an error outside any transaction");
            }
            TransportEvent::Closed => {
                info!(%transport, "transport closed");
            }
        }
    }

    /// Validates, admission-checks and lane-queues one decoded message.
    ///
    /// Runs on the caller's thread. Malformed requests are answered 400
    /// here, new work on a congested lane is answered 503 here; neither
    /// consumes lane capacity. Everything admitted is queued on the lane
    /// of its Call-ID.
    pub fn handle_message(&self, message: Message, source: SocketAddr, transport: TransportKind) {
        if !self.is_running() {
            debug!("message dropped, manager is shut down");
            return;
        }
        let call_id = match self.inner.validate(&message) {
            Ok(call_id) => call_id,
            Err(error) => {
                self.inner.reject_malformed(&message, source, transport, &error);
                return;
            }
        };

        if let Message::Request(request) = &message {
            if self.inner.needs_admission(request)
                && self
                    .inner
                    .congestion
                    .should_reject(&self.inner.dispatcher, &call_id)
            {
                self.inner.reject_congested(request, source, transport, &call_id);
                return;
            }
        }

        let name = match &message {
            Message::Request(request) => format!("rx-{}", request.method),
            Message::Response(response) => format!("rx-{}", response.status.as_u16()),
        };
        let weak = Arc::downgrade(&self.inner);
        self.inner.dispatcher.add_task_last(Task::new(
            call_id,
            name,
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.process_message(message, source, transport);
                }
            },
        ));
    }

    /// Starts a client transaction for `request` toward `peer`.
    ///
    /// The request must carry Call-ID, CSeq and a branch on its top Via.
    /// The transmit itself happens on the Call-ID's lane; the returned
    /// key is usable immediately for state queries.
    pub fn send_request(
        &self,
        request: Request,
        peer: SocketAddr,
        transport: TransportKind,
    ) -> Result<TransactionKey> {
        if !self.is_running() {
            return Err(Error::Shutdown);
        }
        let call_id = self.inner.validate_request(&request)?;
        let key = TransactionKey::from_client_request(&request).ok_or(Error::MissingViaBranch)?;

        let invite = request.method == Method::Invite;
        let machine = if invite {
            Machine::InviteClient(InviteClientFsm::new(transport, self.inner.settings))
        } else {
            Machine::NonInviteClient(NonInviteClientFsm::new(transport, self.inner.settings))
        };
        let origin = invite.then(|| request.clone());
        self.inner.store.insert(
            key.clone(),
            TransactionRecord::new(machine, call_id.clone(), peer, transport, origin),
        )?;
        info!(%key, %call_id, "client transaction created");

        let bytes = Bytes::from(request.to_wire());
        let weak = Arc::downgrade(&self.inner);
        let task_key = key.clone();
        self.inner
            .dispatcher
            .add_task_last(Task::new(call_id, format!("tx-{}", request.method), move || {
                let Some(inner) = weak.upgrade() else { return };
                inner.drive(&task_key, |record| match &mut record.machine {
                    Machine::InviteClient(fsm) => {
                        fsm.on_event(InviteClientEvent::SendInvite(bytes.clone()))
                    }
                    Machine::NonInviteClient(fsm) => {
                        fsm.on_event(NonInviteClientEvent::SendRequest(bytes.clone()))
                    }
                    _ => Vec::new(),
                });
            }));
        Ok(key)
    }

    /// Sends a response on an existing server transaction. Provisional
    /// or final is worked out from the status code.
    pub fn send_response(&self, key: &TransactionKey, response: Response) -> Result<()> {
        if !self.is_running() {
            return Err(Error::Shutdown);
        }
        let call_id = {
            let record = self
                .inner
                .store
                .get_mut(key)
                .ok_or_else(|| Error::TransactionNotFound(key.clone()))?;
            record.call_id.clone()
        };

        let weak = Arc::downgrade(&self.inner);
        let task_key = key.clone();
        let name = format!("tx-{}", response.status.as_u16());
        self.inner
            .dispatcher
            .add_task_last(Task::new(call_id, name, move || {
                let Some(inner) = weak.upgrade() else { return };
                let provisional = response.status.is_provisional();
                inner.drive(&task_key, |record| match &mut record.machine {
                    Machine::InviteServer(fsm) => {
                        if provisional {
                            fsm.on_event(InviteServerEvent::SendProvisional(response.clone()))
                        } else {
                            fsm.on_event(InviteServerEvent::SendFinal(response.clone()))
                        }
                    }
                    Machine::NonInviteServer(fsm) => {
                        if provisional {
                            fsm.on_event(NonInviteServerEvent::SendProvisional(response.clone()))
                        } else {
                            fsm.on_event(NonInviteServerEvent::SendFinal(response.clone()))
                        }
                    }
                    _ => {
                        warn!("send_response on a client transaction");
                        Vec::new()
                    }
                });
            }));
        Ok(())
    }

    /// Sends an ACK outside any transaction. The ACK for a 2xx is the
    /// dialog layer's to build and travels statelessly.
    pub fn send_ack(
        &self,
        ack: &Request,
        peer: SocketAddr,
        transport: TransportKind,
    ) -> Result<()> {
        if !self.is_running() {
            return Err(Error::Shutdown);
        }
        self.inner
            .transmit(&Bytes::from(ack.to_wire()), peer, transport)
    }

    /// Stops admitting work, cancels all timers and clears the store.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let keys = self.inner.store.keys();
        for key in &keys {
            if let Some(mut record) = self.inner.store.remove(key) {
                record.cancel_all_timers();
            }
        }
        info!(transactions = keys.len(), "transaction manager shut down");
    }
}

impl Inner {
    /// Structural checks every message must pass before any matching.
    /// Returns the Call-ID, which doubles as the lane key.
    fn validate(&self, message: &Message) -> Result<String> {
        match message {
            Message::Request(request) => self.validate_request(request),
            Message::Response(response) => {
                let call_id = response
                    .call_id()
                    .filter(|v| !v.is_empty())
                    .ok_or(Error::MissingCallId)?
                    .to_string();
                response.cseq().ok_or(Error::MissingCSeq)?;
                match response.via_branch() {
                    Some(branch) if !branch.is_empty() => Ok(call_id),
                    _ => Err(Error::MissingViaBranch),
                }
            }
        }
    }

    fn validate_request(&self, request: &Request) -> Result<String> {
        let call_id = request
            .call_id()
            .filter(|v| !v.is_empty())
            .ok_or(Error::MissingCallId)?
            .to_string();
        let (_, cseq_method) = request.cseq().ok_or(Error::MissingCSeq)?;
        match request.via_branch() {
            Some(branch) if !branch.is_empty() => {}
            _ => return Err(Error::MissingViaBranch),
        }
        if cseq_method != request.method {
            return Err(Error::CSeqMethodMismatch {
                line: request.method.to_string(),
                cseq: cseq_method.to_string(),
            });
        }
        Ok(call_id)
    }

    /// 400 for malformed requests, a log line for malformed responses.
    /// ACKs never get a response, malformed or not.
    fn reject_malformed(
        &self,
        message: &Message,
        source: SocketAddr,
        transport: TransportKind,
        error: &Error,
    ) {
        warn!(%source, %error, "malformed message rejected at the boundary");
        match message {
            Message::Request(request) if request.method != Method::Ack => {
                let response =
                    response_for(request, StatusCode::BadRequest).with_reason(error.to_string());
                self.send_direct(&response, source, transport);
                self.emit(TransactionEvent::Rejected {
                    status: StatusCode::BadRequest,
                    call_id: message.call_id().map(str::to_string),
                    source,
                });
            }
            _ => {}
        }
    }

    /// True when `request` would create a transaction instead of joining
    /// one. Only such requests face the congestion gate; retransmissions
    /// and ACKs always get through to the machine that wants them.
    fn needs_admission(&self, request: &Request) -> bool {
        if request.method == Method::Ack {
            return false;
        }
        match TransactionKey::from_request(request) {
            Some(key) => !self.store.contains(&key),
            None => false,
        }
    }

    fn reject_congested(
        &self,
        request: &Request,
        source: SocketAddr,
        transport: TransportKind,
        call_id: &str,
    ) {
        let retry_after = self.congestion.retry_after_secs();
        warn!(
            %source,
            call_id,
            retry_after,
            "congested lane, rejecting new work with 503"
        );
        let mut response = response_for(request, StatusCode::ServiceUnavailable);
        response
            .headers
            .push(Header::new(HeaderName::RetryAfter, retry_after.to_string()));
        self.send_direct(&response, source, transport);
        self.emit(TransactionEvent::Rejected {
            status: StatusCode::ServiceUnavailable,
            call_id: Some(call_id.to_string()),
            source,
        });
    }

    /// Entry point on the lane. Everything below here runs under the
    /// message's Call-ID lane.
    fn process_message(
        self: &Arc<Self>,
        message: Message,
        source: SocketAddr,
        transport: TransportKind,
    ) {
        match message {
            Message::Request(request) => match request.method {
                Method::Ack => self.process_ack(request, source),
                Method::Cancel => self.process_cancel(request, source, transport),
                _ => self.process_request(request, source, transport),
            },
            Message::Response(response) => self.process_response(response, source),
        }
    }

    fn process_request(self: &Arc<Self>, request: Request, source: SocketAddr, transport: TransportKind) {
        let Some(key) = TransactionKey::from_request(&request) else {
            warn!(%source, "request lost its branch between boundary and lane");
            return;
        };

        if self.store.contains(&key) {
            trace!(%key, "request retransmission");
            self.drive(&key, |record| match &mut record.machine {
                Machine::InviteServer(fsm) => fsm.on_event(InviteServerEvent::ReceiveInvite),
                Machine::NonInviteServer(fsm) => {
                    fsm.on_event(NonInviteServerEvent::ReceiveRequest)
                }
                _ => Vec::new(),
            });
            return;
        }

        // new server transaction
        let call_id = match request.call_id() {
            Some(v) => v.to_string(),
            None => return,
        };
        let invite = request.method == Method::Invite;
        let machine = if invite {
            Machine::InviteServer(InviteServerFsm::new(transport, self.settings))
        } else {
            Machine::NonInviteServer(NonInviteServerFsm::new(transport, self.settings))
        };
        let record = TransactionRecord::new(
            machine,
            call_id.clone(),
            source,
            transport,
            Some(request.clone()),
        );
        if let Err(error) = self.store.insert(key.clone(), record) {
            warn!(%key, %error, "lost a race creating a server transaction");
            return;
        }
        info!(%key, %call_id, "server transaction created");

        self.drive(&key, |record| match &mut record.machine {
            Machine::InviteServer(fsm) => fsm.on_event(InviteServerEvent::ReceiveInvite),
            Machine::NonInviteServer(fsm) => fsm.on_event(NonInviteServerEvent::ReceiveRequest),
            _ => Vec::new(),
        });

        if invite {
            // answer 100 right away so the peer stops retransmitting
            // while the transaction user thinks
            let trying = trying_for(&request);
            self.drive(&key, |record| match &mut record.machine {
                Machine::InviteServer(fsm) => {
                    fsm.on_event(InviteServerEvent::SendProvisional(trying.clone()))
                }
                _ => Vec::new(),
            });
        }

        self.emit(TransactionEvent::NewRequest {
            key,
            request,
            source,
            transport,
        });
    }

    fn process_response(self: &Arc<Self>, response: Response, source: SocketAddr) {
        let Some(key) = TransactionKey::from_response(&response) else {
            warn!(%source, "response lost its branch between boundary and lane");
            return;
        };
        if !self.store.contains(&key) {
            // RFC 3261 18.1.2: responses matching no client transaction
            // are dropped
            warn!(%key, %source, status = response.status.as_u16(), "response matches no transaction, dropped");
            self.emit(TransactionEvent::Unmatched {
                message: Message::Response(response),
                source,
            });
            return;
        }

        let provisional = response.status.is_provisional();
        self.drive(&key, |record| match &mut record.machine {
            Machine::InviteClient(fsm) => {
                if provisional {
                    fsm.on_event(InviteClientEvent::ReceiveProvisional(response.clone()))
                } else {
                    fsm.on_event(InviteClientEvent::ReceiveFinal(response.clone()))
                }
            }
            Machine::NonInviteClient(fsm) => {
                if provisional {
                    fsm.on_event(NonInviteClientEvent::ReceiveProvisional(response.clone()))
                } else {
                    fsm.on_event(NonInviteClientEvent::ReceiveFinal(response.clone()))
                }
            }
            _ => Vec::new(),
        });
    }

    /// Matches by the INVITE's key: an ACK for a non-2xx reuses the
    /// INVITE branch. The ACK for a 2xx carries a fresh branch, matches
    /// nothing here and is the dialog layer's to claim.
    fn process_ack(self: &Arc<Self>, request: Request, source: SocketAddr) {
        let invite_key = match request.via_branch() {
            Some(branch) if !branch.is_empty() => {
                TransactionKey::new(branch, Method::Invite, true)
            }
            _ => return,
        };
        if self.store.contains(&invite_key) {
            self.drive(&invite_key, |record| match &mut record.machine {
                Machine::InviteServer(fsm) => fsm.on_event(InviteServerEvent::ReceiveAck),
                _ => Vec::new(),
            });
            self.emit(TransactionEvent::AckReceived {
                key: Some(invite_key),
                request,
                source,
            });
        } else {
            debug!(%source, "ACK outside any transaction, up to the dialog layer");
            self.emit(TransactionEvent::AckReceived {
                key: None,
                request,
                source,
            });
        }
    }

    /// RFC 3261 9.2: the CANCEL is answered on its own transaction with
    /// 200, and a matched INVITE still in Proceeding is finished with
    /// 487 Request Terminated.
    fn process_cancel(self: &Arc<Self>, request: Request, source: SocketAddr, transport: TransportKind) {
        let branch = match request.via_branch() {
            Some(branch) if !branch.is_empty() => branch.to_string(),
            _ => return,
        };
        let invite_key = TransactionKey::new(branch.clone(), Method::Invite, true);

        if !self.store.contains(&invite_key) {
            warn!(%source, "CANCEL matches no transaction, answering 481");
            let response = response_for(&request, StatusCode::CallOrTransactionDoesNotExist);
            self.send_direct(&response, source, transport);
            self.emit(TransactionEvent::Unmatched {
                message: Message::Request(request),
                source,
            });
            return;
        }

        // the CANCEL gets its own non-INVITE server transaction
        let cancel_key = TransactionKey::new(branch, Method::Cancel, true);
        if !self.store.contains(&cancel_key) {
            let call_id = request.call_id().unwrap_or_default().to_string();
            let mut fsm = NonInviteServerFsm::new(transport, self.settings);
            fsm.on_event(NonInviteServerEvent::ReceiveRequest);
            let record = TransactionRecord::new(
                Machine::NonInviteServer(fsm),
                call_id,
                source,
                transport,
                Some(request.clone()),
            );
            if self.store.insert(cancel_key.clone(), record).is_ok() {
                let ok = response_for(&request, StatusCode::Ok);
                self.drive(&cancel_key, |record| match &mut record.machine {
                    Machine::NonInviteServer(fsm) => {
                        fsm.on_event(NonInviteServerEvent::SendFinal(ok.clone()))
                    }
                    _ => Vec::new(),
                });
            }
        }

        if self.store.state_of(&invite_key) == Some(TransactionState::Proceeding) {
            let origin_invite = self
                .store
                .get_mut(&invite_key)
                .and_then(|record| record.origin.clone());
            if let Some(invite) = origin_invite {
                let response = response_for(&invite, StatusCode::RequestTerminated);
                self.drive(&invite_key, |record| match &mut record.machine {
                    Machine::InviteServer(fsm) => {
                        fsm.on_event(InviteServerEvent::SendFinal(response.clone()))
                    }
                    _ => Vec::new(),
                });
            }
        }
        self.emit(TransactionEvent::CancelReceived { key: invite_key });
    }

    /// Runs one closure against a record's machine and carries out the
    /// actions it returns. The record reference never outlives the
    /// closure; actions re-lock per step so no lock is held across a
    /// send or a schedule.
    fn drive<F>(self: &Arc<Self>, key: &TransactionKey, f: F)
    where
        F: FnOnce(&mut TransactionRecord) -> Vec<Action>,
    {
        let (actions, call_id, peer, transport) = match self.store.get_mut(key) {
            Some(mut record) => {
                let actions = f(&mut record);
                (
                    actions,
                    record.call_id.clone(),
                    record.peer,
                    record.transport,
                )
            }
            None => {
                trace!(%key, "event for a transaction that is gone");
                return;
            }
        };
        self.apply(key, &call_id, peer, transport, actions);
    }

    fn apply(
        self: &Arc<Self>,
        key: &TransactionKey,
        call_id: &str,
        peer: SocketAddr,
        transport: TransportKind,
        actions: Vec<Action>,
    ) {
        for action in actions {
            match action {
                Action::Transmit(bytes) => {
                    if let Err(error) = self.transmit(&bytes, peer, transport) {
                        warn!(%key, %error, "transmit failed, terminating transaction");
                        self.emit(TransactionEvent::TransportFailed { key: key.clone() });
                        self.drive(key, |record| record.machine.on_transport_failed());
                        return;
                    }
                }
                Action::Deliver(response) => {
                    let event = if response.status.is_provisional() {
                        TransactionEvent::ProvisionalResponse {
                            key: key.clone(),
                            response,
                        }
                    } else {
                        TransactionEvent::FinalResponse {
                            key: key.clone(),
                            response,
                        }
                    };
                    self.emit(event);
                }
                Action::AckFinal(response) => self.ack_final(key, peer, transport, &response),
                Action::Schedule { timer, delay } => {
                    self.schedule_timer(key, call_id, timer, delay);
                }
                Action::Cancel(timer) => {
                    if let Some(mut record) = self.store.get_mut(key) {
                        if let Some(handle) = record.timers.remove(&timer) {
                            handle.cancel();
                        }
                    }
                }
                Action::Terminate(reason) => {
                    self.finish(key, reason);
                    return;
                }
            }
        }
    }

    /// Builds (or reuses) the ACK for a non-2xx final and sends it.
    fn ack_final(
        self: &Arc<Self>,
        key: &TransactionKey,
        peer: SocketAddr,
        transport: TransportKind,
        response: &Response,
    ) {
        let bytes = {
            let Some(mut record) = self.store.get_mut(key) else { return };
            if let Some(cached) = &record.ack {
                cached.clone()
            } else {
                let Some(invite) = &record.origin else {
                    warn!(%key, "no original INVITE to build an ACK from");
                    return;
                };
                match ack_for_non_2xx(invite, response) {
                    Ok(ack) => {
                        let bytes = Bytes::from(ack.to_wire());
                        record.ack = Some(bytes.clone());
                        bytes
                    }
                    Err(error) => {
                        warn!(%key, %error, "could not build ACK for final response");
                        return;
                    }
                }
            }
        };
        if let Err(error) = self.transmit(&bytes, peer, transport) {
            warn!(%key, %error, "ACK transmit failed");
        }
    }

    /// Schedules `timer` through the wheel under the transaction's
    /// Call-ID, so the fire runs on the same lane as everything else
    /// for this call.
    fn schedule_timer(
        self: &Arc<Self>,
        key: &TransactionKey,
        call_id: &str,
        timer: TimerKind,
        delay: std::time::Duration,
    ) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let fire_key = key.clone();
        let handle = self.wheel.schedule(
            call_id,
            format!("timer-{timer}-{}", key.branch()),
            delay,
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_timer_fired(&fire_key, timer);
                }
            },
        );
        if let Some(mut record) = self.store.get_mut(key) {
            if let Some(displaced) = record.timers.insert(timer, handle) {
                displaced.cancel();
            }
        } else {
            // terminated while we were scheduling
            handle.cancel();
        }
    }

    fn on_timer_fired(self: &Arc<Self>, key: &TransactionKey, timer: TimerKind) {
        trace!(%key, %timer, "timer fired");
        self.drive(key, |record| {
            record.timers.remove(&timer);
            record.machine.on_timer(timer)
        });
    }

    /// Terminal bookkeeping: drop the record, kill its timers, report
    /// the reason. The timeout signal goes out exactly once because the
    /// machine only ever emits one Terminate.
    fn finish(&self, key: &TransactionKey, reason: TerminationReason) {
        let mut lived_ms = 0;
        if let Some(mut record) = self.store.remove(key) {
            record.cancel_all_timers();
            lived_ms = now_ms().saturating_sub(record.created_ms);
        }
        info!(%key, ?reason, lived_ms, "transaction terminated");
        match reason {
            TerminationReason::Timeout => {
                self.emit(TransactionEvent::TimedOut { key: key.clone() });
            }
            TerminationReason::TransportError | TerminationReason::Normal => {}
        }
        self.emit(TransactionEvent::Terminated { key: key.clone() });
    }

    fn transmit(
        &self,
        bytes: &Bytes,
        peer: SocketAddr,
        kind: TransportKind,
    ) -> Result<()> {
        let transport = self
            .transports
            .get(kind)
            .ok_or(TransportError::UnsupportedTransport(kind))?;
        transport.send_to(bytes, peer)?;
        Ok(())
    }

    /// Sends a response straight out, bypassing lanes and transactions.
    /// Used for boundary rejections only.
    fn send_direct(&self, response: &Response, destination: SocketAddr, kind: TransportKind) {
        if let Err(error) = self.transmit(&Bytes::from(response.to_wire()), destination, kind) {
            warn!(%destination, %error, "boundary response could not be sent");
        }
    }

    fn emit(&self, event: TransactionEvent) {
        if self.events_tx.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}
