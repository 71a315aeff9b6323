//! End-to-end tests for the transaction layer over a capturing
//! transport: boundary rejection, lane-driven transactions, timers and
//! the UAS side of CANCEL.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serial_test::serial;

use siprail_dispatch_core::{
    CongestionPolicy, DispatchConfig, Dispatcher, Task, TimerWheel, WorkerPool,
};
use siprail_sip_core::builder::{ensure_to_tag, response_for};
use siprail_sip_core::{
    parse_message, Header, HeaderName, Message, Method, Request, Response, StatusCode, Uri,
};
use siprail_sip_transport::{Result as TransportResult, Transport, TransportKind, TransportPool};
use siprail_transaction_core::{
    TimerSettings, TransactionEvent, TransactionManager, TransactionState,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("siprail_transaction_core=debug,siprail_dispatch_core=info")
        .with_test_writer()
        .try_init();
}

/// Transport double that captures every send instead of using a socket.
#[derive(Debug)]
struct CaptureTransport {
    kind: TransportKind,
    sent: Mutex<Vec<Vec<u8>>>,
    fail: AtomicBool,
}

impl CaptureTransport {
    fn new(kind: TransportKind) -> Arc<Self> {
        Arc::new(CaptureTransport {
            kind,
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Parses everything captured so far
    fn sent_messages(&self) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .map(|bytes| parse_message(bytes).expect("captured bytes parse"))
            .collect()
    }

    fn sent_statuses(&self) -> Vec<u16> {
        self.sent_messages()
            .iter()
            .filter_map(|m| m.as_response().map(|r| r.status.as_u16()))
            .collect()
    }
}

impl Transport for CaptureTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok("127.0.0.1:5060".parse().unwrap())
    }

    fn send_to(&self, bytes: &[u8], _destination: SocketAddr) -> TransportResult<()> {
        if self.fail.load(Ordering::Acquire) {
            return Err(siprail_sip_transport::Error::TransportClosed);
        }
        self.sent.lock().push(bytes.to_vec());
        Ok(())
    }

    fn close(&self) -> TransportResult<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

struct Rig {
    dispatcher: Arc<Dispatcher>,
    pool: WorkerPool,
    wheel: Arc<TimerWheel>,
    wire: Arc<CaptureTransport>,
    manager: TransactionManager,
    events: Receiver<TransactionEvent>,
}

impl Rig {
    /// Full stack with workers and the timer wheel running.
    fn start(settings: TimerSettings) -> Self {
        let rig = Rig::build(settings, DispatchConfig {
            lane_count: 2,
            poll_interval_ms: 5,
            tick_interval_ms: 10,
            ..Default::default()
        });
        rig.pool.start().unwrap();
        rig.wheel.start().unwrap();
        rig
    }

    /// Stack with nothing running, for boundary-only tests.
    fn idle(config: DispatchConfig) -> Self {
        Rig::build(TimerSettings::default(), config)
    }

    fn build(settings: TimerSettings, config: DispatchConfig) -> Self {
        init_tracing();
        let dispatcher = Arc::new(Dispatcher::from_config(&config).unwrap());
        let pool = WorkerPool::new(Arc::clone(&dispatcher), &config);
        let wheel = Arc::new(TimerWheel::new(Arc::clone(&dispatcher), &config));
        let wire = CaptureTransport::new(TransportKind::Udp);
        let transports = Arc::new(TransportPool::new());
        transports.register(wire.clone());

        let (manager, events) = TransactionManager::new(
            Arc::clone(&dispatcher),
            Arc::clone(&wheel),
            transports,
            CongestionPolicy::from_config(&config),
            settings,
        );
        Rig {
            dispatcher,
            pool,
            wheel,
            wire,
            manager,
            events,
        }
    }

    fn stop(&self) {
        self.manager.shutdown();
        self.wheel.stop();
        self.pool.stop();
    }

    fn wait_for_state(
        &self,
        key: &siprail_transaction_core::TransactionKey,
        state: TransactionState,
        timeout: Duration,
    ) {
        let deadline = Instant::now() + timeout;
        loop {
            if self.manager.store().state_of(key) == Some(state) {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {key} to reach {state}, currently {:?}",
                self.manager.store().state_of(key)
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Collects events until `pred` matches one, or panics at the
    /// deadline. Everything seen (match included) is returned.
    fn events_until(
        &self,
        timeout: Duration,
        pred: impl Fn(&TransactionEvent) -> bool,
    ) -> Vec<TransactionEvent> {
        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| {
                    panic!("timed out waiting for event, saw {} events: {seen:?}", seen.len())
                });
            match self.events.recv_timeout(remaining) {
                Ok(event) => {
                    let hit = pred(&event);
                    seen.push(event);
                    if hit {
                        return seen;
                    }
                }
                Err(_) => panic!("event channel closed or idle, saw: {seen:?}"),
            }
        }
    }

    /// Drains anything still buffered after a short settle pause.
    fn drain_events(&self, settle: Duration) -> Vec<TransactionEvent> {
        std::thread::sleep(settle);
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }
}

fn peer() -> SocketAddr {
    "127.0.0.1:5070".parse().unwrap()
}

fn invite(call_id: &str, branch: &str) -> Request {
    let mut request = Request::new(Method::Invite, Uri::sip_user("bob", "example.com"));
    request.headers.push(Header::new(
        HeaderName::Via,
        format!("SIP/2.0/UDP client.example.com:5070;branch={branch}"),
    ));
    request.set_header(HeaderName::From, "<sip:alice@example.com>;tag=a1");
    request.set_header(HeaderName::To, "<sip:bob@example.com>");
    request.set_header(HeaderName::CallId, call_id);
    request.set_header(HeaderName::CSeq, "1 INVITE");
    request.set_header(HeaderName::MaxForwards, "70");
    request.set_header(HeaderName::ContentLength, "0");
    request
}

fn non_invite(method: Method, call_id: &str, branch: &str) -> Request {
    let mut request = invite(call_id, branch);
    let name = method.as_str().to_string();
    request.method = method;
    request.set_header(HeaderName::CSeq, format!("1 {name}"));
    request
}

fn fast_settings() -> TimerSettings {
    TimerSettings {
        t1: Duration::from_millis(30),
        t2: Duration::from_millis(120),
        t4: Duration::from_millis(200),
        transaction_timeout: Duration::from_millis(1_920),
        wait_time_d: Duration::from_millis(400),
        wait_time_j: Duration::from_millis(400),
    }
}

#[test]
#[serial]
fn invite_reaches_proceeding_on_a_100_trying() {
    let rig = Rig::start(TimerSettings::default());

    let request = invite("abc", "z9hG4bKs1");
    let key = rig
        .manager
        .send_request(request.clone(), peer(), TransportKind::Udp)
        .unwrap();
    rig.wait_for_state(&key, TransactionState::Calling, Duration::from_secs(2));

    // the INVITE left on the wire
    let sent = rig.wire.sent_messages();
    assert!(sent
        .iter()
        .any(|m| m.as_request().is_some_and(|r| r.method == Method::Invite)));

    // peer echoes 100 Trying
    let trying = response_for(&request, StatusCode::Trying);
    rig.manager
        .handle_message(Message::Response(trying), peer(), TransportKind::Udp);
    rig.wait_for_state(&key, TransactionState::Proceeding, Duration::from_secs(2));

    let seen = rig.events_until(Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::ProvisionalResponse { key: k, .. } if *k == key)
    });
    assert!(!seen.is_empty());

    rig.stop();
}

#[test]
#[serial]
fn unanswered_invite_retransmits_and_times_out_exactly_once() {
    let rig = Rig::start(fast_settings());

    let request = invite("timeout-call", "z9hG4bKs2");
    let key = rig
        .manager
        .send_request(request, peer(), TransportKind::Udp)
        .unwrap();

    let mut seen = rig.events_until(Duration::from_secs(6), |e| {
        matches!(e, TransactionEvent::Terminated { key: k } if *k == key)
    });
    seen.extend(rig.drain_events(Duration::from_millis(300)));

    let timeouts = seen
        .iter()
        .filter(|e| matches!(e, TransactionEvent::TimedOut { key: k } if *k == key))
        .count();
    assert_eq!(timeouts, 1, "timeout must be reported exactly once");

    // initial send plus a healthy number of retransmissions
    assert!(
        rig.wire.sent_count() >= 5,
        "expected retransmissions, saw {} sends",
        rig.wire.sent_count()
    );
    assert_eq!(rig.manager.store().state_of(&key), None);

    rig.stop();
}

#[test]
#[serial]
fn congested_lane_rejects_new_work_with_503_and_retry_after() {
    let config = DispatchConfig {
        lane_count: 1,
        congestion_depth: 5,
        congestion_age_ms: 1_000,
        retry_after_base_secs: 5,
        retry_after_spread_secs: 10,
        ..Default::default()
    };
    // no workers: the lane backlog stays put
    let rig = Rig::idle(config);

    for n in 0..5 {
        rig.dispatcher
            .add_task_last(Task::new("jam", format!("filler-{n}"), || {}));
    }
    std::thread::sleep(Duration::from_millis(1_100));

    rig.manager.handle_message(
        Message::Request(invite("congested-call", "z9hG4bKs3")),
        peer(),
        TransportKind::Udp,
    );

    let sent = rig.wire.sent_messages();
    assert_eq!(sent.len(), 1);
    let response = sent[0].as_response().expect("a response went out");
    assert_eq!(response.status.as_u16(), 503);
    let retry_after: u64 = response
        .header_value(&HeaderName::RetryAfter)
        .expect("Retry-After present")
        .parse()
        .unwrap();
    assert!((5..=15).contains(&retry_after), "retry_after = {retry_after}");

    let seen = rig.drain_events(Duration::from_millis(50));
    assert!(seen.iter().any(|e| matches!(
        e,
        TransactionEvent::Rejected { status: StatusCode::ServiceUnavailable, .. }
    )));
    // nothing was admitted
    assert!(rig.manager.store().is_empty());

    // responses are not admission-checked even while congested
    let reply = response_for(&invite("congested-call", "z9hG4bKs3"), StatusCode::Ok);
    rig.manager
        .handle_message(Message::Response(reply), peer(), TransportKind::Udp);
    assert_eq!(rig.wire.sent_count(), 1, "no second boundary rejection");

    rig.stop();
}

#[test]
#[serial]
fn malformed_requests_are_answered_400_at_the_boundary() {
    let rig = Rig::idle(DispatchConfig {
        lane_count: 1,
        ..Default::default()
    });

    // missing Call-ID
    let mut bad = invite("x", "z9hG4bKs4");
    bad.headers.retain(|h| h.name != HeaderName::CallId);
    rig.manager
        .handle_message(Message::Request(bad), peer(), TransportKind::Udp);

    // CSeq method disagreeing with the request line
    let mut mismatched = invite("mismatch", "z9hG4bKs5");
    mismatched.set_header(HeaderName::CSeq, "1 REGISTER");
    rig.manager
        .handle_message(Message::Request(mismatched), peer(), TransportKind::Udp);

    let statuses = rig.wire.sent_statuses();
    assert_eq!(statuses, vec![400, 400]);
    assert_eq!(rig.dispatcher.total_pending(), 0, "rejected work is not queued");

    // a malformed ACK is dropped without a response
    let mut bad_ack = non_invite(Method::Ack, "ack-call", "z9hG4bKs6");
    bad_ack.headers.retain(|h| h.name != HeaderName::CallId);
    rig.manager
        .handle_message(Message::Request(bad_ack), peer(), TransportKind::Udp);
    assert_eq!(rig.wire.sent_count(), 2);

    let seen = rig.drain_events(Duration::from_millis(50));
    let rejects = seen
        .iter()
        .filter(|e| matches!(e, TransactionEvent::Rejected { status: StatusCode::BadRequest, .. }))
        .count();
    assert_eq!(rejects, 2);

    rig.stop();
}

#[test]
#[serial]
fn responses_matching_no_transaction_are_dropped() {
    let rig = Rig::start(TimerSettings::default());

    let stray = response_for(&invite("nobody-home", "z9hG4bKs7"), StatusCode::Ok);
    rig.manager
        .handle_message(Message::Response(stray), peer(), TransportKind::Udp);

    let seen = rig.events_until(Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::Unmatched { .. })
    });
    assert_eq!(seen.len(), 1);
    assert_eq!(rig.wire.sent_count(), 0);
    assert!(rig.manager.store().is_empty());

    rig.stop();
}

#[test]
#[serial]
fn uas_sends_100_then_487_when_the_invite_is_cancelled() {
    let rig = Rig::start(fast_settings());

    let request = invite("cancelled-call", "z9hG4bKs8");
    rig.manager
        .handle_message(Message::Request(request.clone()), peer(), TransportKind::Udp);

    let seen = rig.events_until(Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::NewRequest { .. })
    });
    let invite_key = seen
        .iter()
        .find_map(|e| match e {
            TransactionEvent::NewRequest { key, .. } => Some(key.clone()),
            _ => None,
        })
        .unwrap();

    let mut cancel = non_invite(Method::Cancel, "cancelled-call", "z9hG4bKs8");
    cancel.set_header(HeaderName::CSeq, "1 CANCEL");
    rig.manager
        .handle_message(Message::Request(cancel), peer(), TransportKind::Udp);

    rig.events_until(Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::CancelReceived { key } if *key == invite_key)
    });

    // 100 for the INVITE, 200 for the CANCEL, 487 for the INVITE
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let statuses = rig.wire.sent_statuses();
        if statuses.contains(&100) && statuses.contains(&200) && statuses.contains(&487) {
            break;
        }
        assert!(Instant::now() < deadline, "statuses so far: {statuses:?}");
        std::thread::sleep(Duration::from_millis(10));
    }

    // the UAC acknowledges the 487; the transaction confirms, waits out
    // Timer I and terminates without any timeout
    let ack = non_invite(Method::Ack, "cancelled-call", "z9hG4bKs8");
    rig.manager
        .handle_message(Message::Request(ack), peer(), TransportKind::Udp);

    let mut all = rig.events_until(Duration::from_secs(3), |e| {
        matches!(e, TransactionEvent::Terminated { key } if *key == invite_key)
    });
    all.extend(rig.drain_events(Duration::from_millis(200)));
    assert!(
        !all.iter().any(|e| matches!(e, TransactionEvent::TimedOut { key } if *key == invite_key)),
        "a cancelled and ACKed INVITE must not time out"
    );

    rig.stop();
}

#[test]
#[serial]
fn uas_response_api_walks_ringing_then_ok() {
    let rig = Rig::start(fast_settings());

    let request = invite("answered-call", "z9hG4bKs9");
    rig.manager
        .handle_message(Message::Request(request.clone()), peer(), TransportKind::Udp);
    let seen = rig.events_until(Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::NewRequest { .. })
    });
    let key = seen
        .iter()
        .find_map(|e| match e {
            TransactionEvent::NewRequest { key, .. } => Some(key.clone()),
            _ => None,
        })
        .unwrap();

    let mut ringing = response_for(&request, StatusCode::Ringing);
    ensure_to_tag(&mut ringing, "uas-tag");
    rig.manager.send_response(&key, ringing).unwrap();

    let mut ok = response_for(&request, StatusCode::Ok);
    ensure_to_tag(&mut ok, "uas-tag");
    rig.manager.send_response(&key, ok).unwrap();

    rig.events_until(Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::Terminated { key: k } if *k == key)
    });

    let statuses = rig.wire.sent_statuses();
    assert!(statuses.contains(&100));
    assert!(statuses.contains(&180));
    assert!(statuses.contains(&200));
    // a 2xx ends the server transaction immediately
    assert_eq!(rig.manager.store().state_of(&key), None);

    rig.stop();
}

#[test]
#[serial]
fn transport_failure_terminates_without_a_timeout() {
    let rig = Rig::start(fast_settings());
    rig.wire.fail.store(true, Ordering::Release);

    let key = rig
        .manager
        .send_request(invite("dead-wire", "z9hG4bKsa"), peer(), TransportKind::Udp)
        .unwrap();

    let mut seen = rig.events_until(Duration::from_secs(2), |e| {
        matches!(e, TransactionEvent::Terminated { key: k } if *k == key)
    });
    seen.extend(rig.drain_events(Duration::from_millis(200)));

    assert!(seen
        .iter()
        .any(|e| matches!(e, TransactionEvent::TransportFailed { key: k } if *k == key)));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, TransactionEvent::TimedOut { .. })));
    assert!(rig.manager.store().is_empty());

    rig.stop();
}

#[test]
#[serial]
fn shutdown_stops_admission_and_is_idempotent() {
    let rig = Rig::start(TimerSettings::default());

    rig.manager.shutdown();
    rig.manager.shutdown();

    let err = rig
        .manager
        .send_request(invite("late-call", "z9hG4bKsb"), peer(), TransportKind::Udp);
    assert!(err.is_err());

    rig.manager.handle_message(
        Message::Request(invite("late-call", "z9hG4bKsb")),
        peer(),
        TransportKind::Udp,
    );
    assert_eq!(rig.dispatcher.total_pending(), 0);
    assert_eq!(rig.wire.sent_count(), 0);

    rig.wheel.stop();
    rig.pool.stop();
}
