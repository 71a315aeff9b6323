//! The dialog itself: RFC 3261 section 12 state plus the request
//! builders that state exists to feed.
//!
//! A dialog is born complete here. Both tags, the remote target and the
//! route set are taken from the dialog-creating request/response pair,
//! so there is no half-initialized phase and no `Option` tags. Early
//! dialogs come from 1xx responses that carry a To tag, confirmed ones
//! from 2xx.

use std::fmt;
use std::net::SocketAddr;

use tracing::debug;

use siprail_sip_core::builder::generate_branch;
use siprail_sip_core::{Header, HeaderName, Method, Request, Response, Uri};
use siprail_sip_transport::TransportKind;

use crate::error::{Error, Result};
use crate::id::{DialogId, DialogKey};

/// Dialog lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogState {
    /// Created by a provisional response with a To tag
    Early,
    /// A 2xx sealed the dialog
    Confirmed,
    /// Over, by BYE, cancellation, rejection or failure
    Terminated,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialogState::Early => "Early",
            DialogState::Confirmed => "Confirmed",
            DialogState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// Which side of the dialog this endpoint played at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogRole {
    /// We sent the INVITE
    Uac,
    /// We answered it
    Uas,
}

impl fmt::Display for DialogRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DialogRole::Uac => "UAC",
            DialogRole::Uas => "UAS",
        })
    }
}

/// One SIP dialog, RFC 3261 section 12
#[derive(Debug, Clone)]
pub struct Dialog {
    pub id: DialogId,
    pub state: DialogState,
    pub role: DialogRole,
    pub call_id: String,
    pub local_uri: Uri,
    pub remote_uri: Uri,
    pub local_tag: String,
    pub remote_tag: String,
    /// CSeq of the last request we sent in this dialog
    pub local_cseq: u32,
    /// CSeq of the last request the peer sent; new in-dialog requests
    /// must arrive strictly above it
    pub remote_cseq: u32,
    /// CSeq of the INVITE that created the dialog; the ACK for a 2xx
    /// reuses it
    pub invite_cseq: u32,
    /// Where in-dialog requests are addressed (peer's Contact)
    pub remote_target: Uri,
    /// Record-Route set, already in our sending order
    pub route_set: Vec<Uri>,
    /// Network address the dialog-creating exchange used
    pub remote_addr: SocketAddr,
    pub transport: TransportKind,
}

impl Dialog {
    /// Dialog seen from the caller: built from our INVITE and the first
    /// tagged response to it. Returns `None` when the pair is missing a
    /// piece a dialog cannot exist without.
    pub fn from_uac_response(
        origin: &Request,
        response: &Response,
        remote_addr: SocketAddr,
        transport: TransportKind,
    ) -> Option<Self> {
        let remote_tag = response.to_tag()?;
        let local_tag = origin.from_tag()?;
        let call_id = origin.call_id()?;
        let (invite_cseq, _) = origin.cseq()?;
        let local_uri = uri_from_name_addr(origin.header_value(&HeaderName::From)?)?;
        let remote_uri = uri_from_name_addr(origin.header_value(&HeaderName::To)?)?;
        let Some(remote_target) = contact_uri(&response.headers) else {
            debug!(call_id, "tagged response carries no usable Contact, no dialog");
            return None;
        };

        Some(Dialog {
            id: DialogId::new(),
            state: if response.status.is_provisional() {
                DialogState::Early
            } else {
                DialogState::Confirmed
            },
            role: DialogRole::Uac,
            call_id: call_id.to_string(),
            local_uri,
            remote_uri,
            local_tag: local_tag.to_string(),
            remote_tag: remote_tag.to_string(),
            local_cseq: invite_cseq,
            remote_cseq: 0,
            invite_cseq,
            remote_target,
            // the UAC walks the recorded path backwards
            route_set: route_set_from(&response.headers, true),
            remote_addr,
            transport,
        })
    }

    /// Dialog seen from the callee: built from the INVITE we received
    /// and the tagged response we are sending.
    pub fn from_uas_response(
        origin: &Request,
        response: &Response,
        remote_addr: SocketAddr,
        transport: TransportKind,
    ) -> Option<Self> {
        let local_tag = response.to_tag()?;
        let remote_tag = origin.from_tag()?;
        let call_id = origin.call_id()?;
        let (invite_cseq, _) = origin.cseq()?;
        let local_uri = uri_from_name_addr(origin.header_value(&HeaderName::To)?)?;
        let remote_uri = uri_from_name_addr(origin.header_value(&HeaderName::From)?)?;
        let Some(remote_target) = contact_uri(&origin.headers) else {
            debug!(call_id, "INVITE carries no usable Contact, no dialog");
            return None;
        };

        Some(Dialog {
            id: DialogId::new(),
            state: if response.status.is_provisional() {
                DialogState::Early
            } else {
                DialogState::Confirmed
            },
            role: DialogRole::Uas,
            call_id: call_id.to_string(),
            local_uri,
            remote_uri,
            local_tag: local_tag.to_string(),
            remote_tag: remote_tag.to_string(),
            local_cseq: 0,
            remote_cseq: invite_cseq,
            invite_cseq,
            remote_target,
            route_set: route_set_from(&origin.headers, false),
            remote_addr,
            transport,
        })
    }

    /// The wire-matching triple for this dialog
    pub fn key(&self) -> DialogKey {
        DialogKey::new(&self.call_id, &self.local_tag, &self.remote_tag)
    }

    pub fn is_terminated(&self) -> bool {
        self.state == DialogState::Terminated
    }

    /// Early -> Confirmed. Returns whether anything changed.
    pub fn confirm(&mut self) -> bool {
        if self.state == DialogState::Early {
            debug!(id = %self.id, "dialog confirmed");
            self.state = DialogState::Confirmed;
            true
        } else {
            false
        }
    }

    /// Any live state -> Terminated. Returns whether anything changed.
    pub fn terminate(&mut self) -> bool {
        if self.state == DialogState::Terminated {
            false
        } else {
            debug!(id = %self.id, "dialog terminated");
            self.state = DialogState::Terminated;
            true
        }
    }

    /// Folds a 2xx into an early dialog: refresh the remote target from
    /// Contact and confirm. A 2xx on an already confirmed dialog is a
    /// retransmission and changes nothing.
    pub fn update_from_2xx(&mut self, response: &Response) -> bool {
        if self.state != DialogState::Early {
            return false;
        }
        if let Some(target) = contact_uri(&response.headers) {
            self.remote_target = target;
        }
        self.confirm()
    }

    /// Checks and records the CSeq of an in-dialog request from the
    /// peer. ACK and CANCEL repeat the INVITE's number and are exempt.
    pub fn accept_remote_cseq(&mut self, seq: u32) -> Result<()> {
        if self.remote_cseq != 0 && seq <= self.remote_cseq {
            return Err(Error::StaleCSeq {
                got: seq,
                last: self.remote_cseq,
            });
        }
        self.remote_cseq = seq;
        Ok(())
    }

    /// Builds the next in-dialog request of `method`, consuming one
    /// local CSeq number. `via_host` is the host:port our transport
    /// answers on.
    pub fn next_request(&mut self, method: Method, via_host: &str) -> Request {
        self.local_cseq += 1;
        self.request_with_cseq(method, self.local_cseq, via_host)
    }

    /// The ACK for the 2xx that confirmed this dialog. Its own branch,
    /// the INVITE's CSeq number, no transaction.
    pub fn ack_for_2xx(&self, via_host: &str) -> Request {
        self.request_with_cseq(Method::Ack, self.invite_cseq, via_host)
    }

    fn request_with_cseq(&self, method: Method, cseq: u32, via_host: &str) -> Request {
        let mut request = Request::new(method.clone(), self.remote_target.clone());
        request.headers.push(Header::new(
            HeaderName::Via,
            format!(
                "SIP/2.0/{} {};branch={}",
                self.transport.as_str(),
                via_host,
                generate_branch()
            ),
        ));
        for route in &self.route_set {
            request
                .headers
                .push(Header::new(HeaderName::Route, format!("<{route}>")));
        }
        request.set_header(
            HeaderName::From,
            format!("<{}>;tag={}", self.local_uri, self.local_tag),
        );
        request.set_header(
            HeaderName::To,
            format!("<{}>;tag={}", self.remote_uri, self.remote_tag),
        );
        request.set_header(HeaderName::CallId, self.call_id.clone());
        request.set_header(HeaderName::CSeq, format!("{cseq} {method}"));
        request.set_header(HeaderName::MaxForwards, "70");
        request.set_header(HeaderName::ContentLength, "0");
        request
    }
}

/// Pulls the URI out of a name-addr or addr-spec header value.
///
/// `"Bob" <sip:bob@b.example;lr>;tag=x` keeps the URI parameters inside
/// the brackets and drops the header parameters outside; a bare
/// `sip:bob@b.example;tag=x` is cut at the first semicolon because the
/// parameters belong to the header there.
pub(crate) fn uri_from_name_addr(value: &str) -> Option<Uri> {
    let spec = match (value.find('<'), value.find('>')) {
        (Some(open), Some(close)) if open < close => &value[open + 1..close],
        _ => value.split(';').next()?.trim(),
    };
    spec.parse().ok()
}

/// First Contact URI in the header list
pub(crate) fn contact_uri(headers: &[Header]) -> Option<Uri> {
    let value = headers
        .iter()
        .find(|h| h.name == HeaderName::Contact)
        .map(|h| h.value.as_str())?;
    uri_from_name_addr(split_header_list(value).next()?)
}

/// Route set from the Record-Route headers, reversed for the UAC side
pub(crate) fn route_set_from(headers: &[Header], reverse: bool) -> Vec<Uri> {
    let mut routes: Vec<Uri> = headers
        .iter()
        .filter(|h| h.name == HeaderName::RecordRoute)
        .flat_map(|h| split_header_list(&h.value))
        .filter_map(uri_from_name_addr)
        .collect();
    if reverse {
        routes.reverse();
    }
    routes
}

/// Splits a comma-separated header value, ignoring commas inside angle
/// brackets
fn split_header_list(value: &str) -> impl Iterator<Item = &str> {
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut parts = Vec::new();
    for (pos, byte) in value.bytes().enumerate() {
        match byte {
            b'<' => depth += 1,
            b'>' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(value[start..pos].trim());
                start = pos + 1;
            }
            _ => {}
        }
    }
    parts.push(value[start..].trim());
    parts.into_iter().filter(|part| !part.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    use siprail_sip_core::builder::{ensure_to_tag, response_for};
    use siprail_sip_core::StatusCode;

    fn peer() -> SocketAddr {
        "192.0.2.7:5060".parse().unwrap()
    }

    fn invite() -> Request {
        let mut request = Request::new(Method::Invite, Uri::sip_user("bob", "b.example"));
        request.headers.push(Header::new(
            HeaderName::Via,
            "SIP/2.0/UDP a.example:5060;branch=z9hG4bKd1",
        ));
        request.set_header(HeaderName::From, "<sip:alice@a.example>;tag=caller");
        request.set_header(HeaderName::To, "<sip:bob@b.example>");
        request.set_header(HeaderName::CallId, "dlg-call-1");
        request.set_header(HeaderName::CSeq, "4 INVITE");
        request.set_header(HeaderName::Contact, "<sip:alice@192.0.2.1:5060>");
        request
    }

    fn tagged_ok(invite: &Request) -> Response {
        let mut ok = response_for(invite, StatusCode::Ok);
        ensure_to_tag(&mut ok, "callee");
        ok.set_header(HeaderName::Contact, "<sip:bob@192.0.2.7:5060>");
        ok
    }

    #[test]
    fn uac_dialog_takes_tags_and_target_from_the_answer() {
        let invite = invite();
        let ok = tagged_ok(&invite);
        let dialog = Dialog::from_uac_response(&invite, &ok, peer(), TransportKind::Udp).unwrap();

        assert_eq!(dialog.state, DialogState::Confirmed);
        assert_eq!(dialog.role, DialogRole::Uac);
        assert_eq!(dialog.local_tag, "caller");
        assert_eq!(dialog.remote_tag, "callee");
        assert_eq!(dialog.invite_cseq, 4);
        assert_eq!(dialog.remote_target.host, "192.0.2.7");
        assert_eq!(dialog.key(), DialogKey::new("dlg-call-1", "caller", "callee"));
    }

    #[test]
    fn uas_dialog_mirrors_the_tags() {
        let invite = invite();
        let ok = tagged_ok(&invite);
        let dialog = Dialog::from_uas_response(&invite, &ok, peer(), TransportKind::Udp).unwrap();

        assert_eq!(dialog.role, DialogRole::Uas);
        assert_eq!(dialog.local_tag, "callee");
        assert_eq!(dialog.remote_tag, "caller");
        assert_eq!(dialog.remote_cseq, 4);
        assert_eq!(dialog.remote_target.host, "192.0.2.1");
    }

    #[test]
    fn a_ringing_without_contact_builds_no_dialog() {
        let invite = invite();
        let mut ringing = response_for(&invite, StatusCode::Ringing);
        ensure_to_tag(&mut ringing, "callee");
        assert!(Dialog::from_uac_response(&invite, &ringing, peer(), TransportKind::Udp).is_none());
    }

    #[test]
    fn early_dialog_confirms_on_2xx_and_refreshes_the_target() {
        let invite = invite();
        let mut ringing = response_for(&invite, StatusCode::Ringing);
        ensure_to_tag(&mut ringing, "callee");
        ringing.set_header(HeaderName::Contact, "<sip:bob@192.0.2.7:5060>");
        let mut dialog =
            Dialog::from_uac_response(&invite, &ringing, peer(), TransportKind::Udp).unwrap();
        assert_eq!(dialog.state, DialogState::Early);

        let mut ok = tagged_ok(&invite);
        ok.set_header(HeaderName::Contact, "<sip:bob@198.51.100.9>");
        assert!(dialog.update_from_2xx(&ok));
        assert_eq!(dialog.state, DialogState::Confirmed);
        assert_eq!(dialog.remote_target.host, "198.51.100.9");

        // a retransmitted 2xx is a no-op
        assert!(!dialog.update_from_2xx(&ok));
    }

    #[test]
    fn remote_cseq_must_climb() {
        let invite = invite();
        let ok = tagged_ok(&invite);
        let mut dialog =
            Dialog::from_uas_response(&invite, &ok, peer(), TransportKind::Udp).unwrap();

        assert!(dialog.accept_remote_cseq(5).is_ok());
        let error = dialog.accept_remote_cseq(5).unwrap_err();
        assert!(matches!(error, Error::StaleCSeq { got: 5, last: 5 }));
        assert!(dialog.accept_remote_cseq(6).is_ok());
    }

    #[test]
    fn next_request_spends_cseq_numbers_and_carries_the_route_set() {
        let mut invite = invite();
        invite
            .headers
            .push(Header::new(HeaderName::RecordRoute, "<sip:p2.example;lr>"));
        invite
            .headers
            .push(Header::new(HeaderName::RecordRoute, "<sip:p1.example;lr>"));
        let ok = tagged_ok(&invite);
        let mut dialog =
            Dialog::from_uas_response(&invite, &ok, peer(), TransportKind::Udp).unwrap();

        let bye = dialog.next_request(Method::Bye, "192.0.2.7:5060");
        assert_eq!(bye.method, Method::Bye);
        assert_eq!(bye.cseq(), Some((1, Method::Bye)));
        assert_eq!(bye.call_id(), Some("dlg-call-1"));
        assert_eq!(bye.from_tag(), Some("callee"));
        assert_eq!(bye.to_tag(), Some("caller"));
        assert!(bye.via_branch().is_some_and(|b| b.starts_with("z9hG4bK")));
        // the UAS keeps Record-Route order
        let routes: Vec<_> = bye
            .headers
            .iter()
            .filter(|h| h.name == HeaderName::Route)
            .map(|h| h.value.clone())
            .collect();
        assert_eq!(routes, vec!["<sip:p2.example;lr>", "<sip:p1.example;lr>"]);

        let second = dialog.next_request(Method::Info, "192.0.2.7:5060");
        assert_eq!(second.cseq(), Some((2, Method::Info)));
    }

    #[test]
    fn the_2xx_ack_reuses_the_invite_cseq_with_a_fresh_branch() {
        let invite = invite();
        let ok = tagged_ok(&invite);
        let dialog = Dialog::from_uac_response(&invite, &ok, peer(), TransportKind::Udp).unwrap();

        let ack = dialog.ack_for_2xx("192.0.2.1:5060");
        assert_eq!(ack.method, Method::Ack);
        assert_eq!(ack.cseq(), Some((4, Method::Ack)));
        assert_ne!(ack.via_branch(), invite.via_branch());
        assert_eq!(ack.uri.host, "192.0.2.7");
    }

    #[test]
    fn uac_route_set_is_reversed() {
        let invite = invite();
        let mut ok = tagged_ok(&invite);
        ok.headers.push(Header::new(
            HeaderName::RecordRoute,
            "<sip:p2.example;lr>, <sip:p1.example;lr>",
        ));
        let dialog = Dialog::from_uac_response(&invite, &ok, peer(), TransportKind::Udp).unwrap();
        let hosts: Vec<_> = dialog.route_set.iter().map(|u| u.host.clone()).collect();
        assert_eq!(hosts, vec!["p1.example", "p2.example"]);
    }

    #[test]
    fn name_addr_parsing_respects_brackets() {
        let uri = uri_from_name_addr("\"Bob\" <sip:bob@b.example;lr>;tag=x").unwrap();
        assert_eq!(uri.host, "b.example");
        assert!(uri.param("lr").is_some());

        let bare = uri_from_name_addr("sip:bob@b.example;tag=x").unwrap();
        assert_eq!(bare.host, "b.example");
        assert!(bare.param("tag").is_none());
    }
}
