//! Construction helpers for the messages the engine emits itself:
//! responses mirrored from a request, the ACK for a non-2xx final
//! response, and CANCEL.

use rand::Rng;

use crate::error::{Error, Result};
use crate::header::{Header, HeaderName};
use crate::message::{Request, Response};
use crate::method::Method;
use crate::status::StatusCode;

/// Magic cookie every RFC 3261 branch parameter starts with
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// Builds a response to `request` with the headers RFC 3261 8.2.6.2
/// requires: all Via headers, From, To, Call-ID and CSeq copied verbatim,
/// plus an empty body.
pub fn response_for(request: &Request, status: StatusCode) -> Response {
    let mut response = Response::new(status);
    for header in &request.headers {
        match header.name {
            HeaderName::Via
            | HeaderName::From
            | HeaderName::To
            | HeaderName::CallId
            | HeaderName::CSeq => response.headers.push(header.clone()),
            _ => {}
        }
    }
    response.set_header(HeaderName::ContentLength, "0");
    response
}

/// 100 Trying for a request, sent by the INVITE server transaction while
/// the transaction user decides
pub fn trying_for(request: &Request) -> Response {
    response_for(request, StatusCode::Trying)
}

/// Adds a To tag to a response if it does not already carry one.
/// Dialog-creating responses need the tag for dialog identity.
pub fn ensure_to_tag(response: &mut Response, tag: &str) {
    if response.to_tag().is_some() {
        return;
    }
    if let Some(value) = response.header_value(&HeaderName::To) {
        let tagged = format!("{value};tag={tag}");
        response.set_header(HeaderName::To, tagged);
    }
}

/// Builds the ACK for a non-2xx final response per RFC 3261 17.1.1.3:
/// Request-URI, Call-ID, From, top Via (same branch) and the CSeq number
/// come from the original INVITE; To is taken from the response so the
/// tag matches; CSeq method becomes ACK.
///
/// The ACK for a 2xx is a separate transaction built by the dialog layer.
pub fn ack_for_non_2xx(invite: &Request, response: &Response) -> Result<Request> {
    if invite.method != Method::Invite {
        return Err(Error::InvalidFormat(format!(
            "ACK built from {} request",
            invite.method
        )));
    }
    let (cseq, _) = invite.cseq().ok_or(Error::MissingHeader("CSeq"))?;
    let via = invite
        .header(&HeaderName::Via)
        .ok_or(Error::MissingHeader("Via"))?
        .clone();
    let from = invite
        .header(&HeaderName::From)
        .ok_or(Error::MissingHeader("From"))?
        .clone();
    let call_id = invite
        .header(&HeaderName::CallId)
        .ok_or(Error::MissingHeader("Call-ID"))?
        .clone();
    let to = response
        .header(&HeaderName::To)
        .ok_or(Error::MissingHeader("To"))?
        .clone();

    let mut ack = Request::new(Method::Ack, invite.uri.clone());
    ack.headers.push(via);
    ack.headers.push(from);
    ack.headers.push(to);
    ack.headers.push(call_id);
    for route in invite.headers.iter().filter(|h| h.name == HeaderName::Route) {
        ack.headers.push(route.clone());
    }
    ack.set_header(HeaderName::CSeq, format!("{cseq} ACK"));
    ack.set_header(HeaderName::MaxForwards, "70");
    ack.set_header(HeaderName::ContentLength, "0");
    Ok(ack)
}

/// Builds a CANCEL for a pending INVITE per RFC 3261 9.1: identical
/// Request-URI, Call-ID, From, To and top Via (same branch), CSeq number
/// unchanged with the method CANCEL.
pub fn cancel_for(invite: &Request) -> Result<Request> {
    if invite.method != Method::Invite {
        return Err(Error::InvalidFormat(format!(
            "CANCEL built from {} request",
            invite.method
        )));
    }
    let (cseq, _) = invite.cseq().ok_or(Error::MissingHeader("CSeq"))?;
    let mut cancel = Request::new(Method::Cancel, invite.uri.clone());
    for header in &invite.headers {
        match header.name {
            HeaderName::Via
            | HeaderName::From
            | HeaderName::To
            | HeaderName::CallId
            | HeaderName::Route => cancel.headers.push(header.clone()),
            _ => {}
        }
    }
    cancel.set_header(HeaderName::CSeq, format!("{cseq} CANCEL"));
    cancel.set_header(HeaderName::MaxForwards, "70");
    cancel.set_header(HeaderName::ContentLength, "0");
    Ok(cancel)
}

/// Generates a branch parameter with the RFC 3261 magic cookie and
/// enough randomness to be unique across space and time
pub fn generate_branch() -> String {
    format!("{BRANCH_MAGIC_COOKIE}{}", random_hex(16))
}

/// Generates a From/To tag
pub fn generate_tag() -> String {
    random_hex(10)
}

/// Generates a Call-ID localized to `host`
pub fn generate_call_id(host: &str) -> String {
    format!("{}@{host}", random_hex(20))
}

fn random_hex(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| HEX[rng.gen_range(0..16)] as char).collect()
}
