//! Two UDP transports talking over loopback: render, send, receive,
//! parse, and surface events.

use std::net::SocketAddr;
use std::time::Duration;

use siprail_sip_core::{Header, HeaderName, Method, Request, Uri};
use siprail_sip_transport::{
    Transport, TransportEvent, TransportKind, TransportPool, UdpTransport,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("siprail_sip_transport=debug")
        .with_test_writer()
        .try_init();
}

fn any_loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn sample_invite() -> Request {
    let mut request = Request::new(Method::Invite, Uri::sip_user("bob", "example.com"));
    request.headers.push(Header::new(
        HeaderName::Via,
        "SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bKloop",
    ));
    request.headers.push(Header::new(HeaderName::From, "<sip:alice@example.com>;tag=1928301774"));
    request.headers.push(Header::new(HeaderName::To, "<sip:bob@example.com>"));
    request.headers.push(Header::new(HeaderName::CallId, "loopback-test@127.0.0.1"));
    request.headers.push(Header::new(HeaderName::CSeq, "1 INVITE"));
    request.headers.push(Header::new(HeaderName::ContentLength, "0"));
    request
}

#[test]
fn message_round_trips_between_two_transports() {
    init_tracing();
    let (sender, _sender_rx) = UdpTransport::bind(any_loopback(), None).unwrap();
    let (receiver, events) = UdpTransport::bind(any_loopback(), None).unwrap();
    let dest = receiver.local_addr().unwrap();

    let request = sample_invite();
    sender.send_message(&request.clone().into(), dest).unwrap();

    match events.recv_timeout(Duration::from_secs(2)).unwrap() {
        TransportEvent::MessageReceived { message, source, .. } => {
            let received = message.as_request().expect("expected a request");
            assert_eq!(received.method, Method::Invite);
            assert_eq!(received.call_id(), Some("loopback-test@127.0.0.1"));
            assert_eq!(source, sender.local_addr().unwrap());
        }
        other => panic!("unexpected event {other:?}"),
    }

    sender.close().unwrap();
    receiver.close().unwrap();
}

#[test]
fn garbage_bytes_surface_as_error_events_not_crashes() {
    init_tracing();
    let (sender, _sender_rx) = UdpTransport::bind(any_loopback(), None).unwrap();
    let (receiver, events) = UdpTransport::bind(any_loopback(), None).unwrap();
    let dest = receiver.local_addr().unwrap();

    sender.send_to(b"\x00\x01\x02 this is not sip\r\n\r\n", dest).unwrap();
    match events.recv_timeout(Duration::from_secs(2)).unwrap() {
        TransportEvent::Error { .. } => {}
        other => panic!("unexpected event {other:?}"),
    }

    // The loop survived; a valid message still arrives afterwards
    sender
        .send_message(&sample_invite().into(), dest)
        .unwrap();
    match events.recv_timeout(Duration::from_secs(2)).unwrap() {
        TransportEvent::MessageReceived { .. } => {}
        other => panic!("unexpected event {other:?}"),
    }

    sender.close().unwrap();
    receiver.close().unwrap();
}

#[test]
fn pool_routes_bytes_by_kind_and_host() {
    init_tracing();
    let (sender, _sender_rx) = UdpTransport::bind(any_loopback(), None).unwrap();
    let (receiver, events) = UdpTransport::bind(any_loopback(), None).unwrap();
    let dest = receiver.local_addr().unwrap();

    let pool = TransportPool::new();
    pool.register(std::sync::Arc::new(sender));

    let wire = sample_invite().to_wire();
    pool.send(&wire, "127.0.0.1", dest.port(), TransportKind::Udp)
        .unwrap();
    match events.recv_timeout(Duration::from_secs(2)).unwrap() {
        TransportEvent::MessageReceived { message, .. } => {
            assert!(message.is_request());
        }
        other => panic!("unexpected event {other:?}"),
    }

    assert!(pool
        .send(&wire, "127.0.0.1", dest.port(), TransportKind::Tcp)
        .is_err());
    pool.close_all();
}

#[test]
fn sending_on_a_closed_transport_fails() {
    let (transport, _events) = UdpTransport::bind(any_loopback(), None).unwrap();
    let dest = transport.local_addr().unwrap();
    transport.close().unwrap();
    assert!(transport.send_to(b"x", dest).is_err());
}

#[test]
fn oversized_packets_are_refused_before_the_socket() {
    let (transport, _events) = UdpTransport::bind(any_loopback(), None).unwrap();
    let dest = transport.local_addr().unwrap();
    let too_big = vec![b'a'; siprail_sip_transport::MAX_UDP_PACKET_SIZE + 1];
    assert!(transport.send_to(&too_big, dest).is_err());
    transport.close().unwrap();
}
