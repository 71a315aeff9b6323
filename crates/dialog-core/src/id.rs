//! Dialog identity.
//!
//! A dialog has two names. [`DialogId`] is the process-local handle the
//! user holds and logs. [`DialogKey`] is the RFC 3261 section 12 triple
//! (Call-ID, local tag, remote tag) that in-dialog messages are matched
//! against. The store indexes both.

use std::fmt;

use serde::{Deserialize, Serialize};
use siprail_sip_core::{Request, Response};
use uuid::Uuid;

/// Opaque handle for one dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId(Uuid);

impl DialogId {
    pub fn new() -> Self {
        DialogId(Uuid::new_v4())
    }
}

impl Default for DialogId {
    fn default() -> Self {
        DialogId::new()
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The wire-visible dialog identifier.
///
/// Local and remote are relative to this endpoint: in a request from the
/// peer our tag sits in To, in a response to our request it sits in
/// From. The two constructors encode that asymmetry so matching code
/// never has to think about direction again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogKey {
    call_id: String,
    local_tag: String,
    remote_tag: String,
}

impl DialogKey {
    pub fn new(
        call_id: impl Into<String>,
        local_tag: impl Into<String>,
        remote_tag: impl Into<String>,
    ) -> Self {
        DialogKey {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }

    /// Key an in-dialog request from the peer matches. `None` until both
    /// tags exist, which is exactly when no dialog can match anyway.
    pub fn from_request(request: &Request) -> Option<Self> {
        Some(DialogKey::new(
            request.call_id()?,
            request.to_tag()?,
            request.from_tag()?,
        ))
    }

    /// Key a response to one of our in-dialog requests matches
    pub fn from_response(response: &Response) -> Option<Self> {
        Some(DialogKey::new(
            response.call_id()?,
            response.from_tag()?,
            response.to_tag()?,
        ))
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    pub fn remote_tag(&self) -> &str {
        &self.remote_tag
    }
}

impl fmt::Display for DialogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.call_id, self.local_tag, self.remote_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use siprail_sip_core::{Header, HeaderName, Method, StatusCode, Uri};

    fn in_dialog_request() -> Request {
        let mut request = Request::new(Method::Bye, Uri::sip_user("alice", "example.com"));
        request.set_header(HeaderName::From, "<sip:bob@example.com>;tag=peer");
        request.set_header(HeaderName::To, "<sip:alice@example.com>;tag=us");
        request.set_header(HeaderName::CallId, "call-1");
        request
    }

    #[test]
    fn request_key_reads_our_tag_from_to() {
        let key = DialogKey::from_request(&in_dialog_request()).unwrap();
        assert_eq!(key.local_tag(), "us");
        assert_eq!(key.remote_tag(), "peer");
        assert_eq!(key.to_string(), "call-1/us/peer");
    }

    #[test]
    fn response_key_reads_our_tag_from_from() {
        let mut response = Response::new(StatusCode::Ok);
        response.set_header(HeaderName::From, "<sip:alice@example.com>;tag=us");
        response.set_header(HeaderName::To, "<sip:bob@example.com>;tag=peer");
        response.set_header(HeaderName::CallId, "call-1");
        let key = DialogKey::from_response(&response).unwrap();
        assert_eq!(key, DialogKey::new("call-1", "us", "peer"));
    }

    #[test]
    fn requests_without_both_tags_have_no_key() {
        let mut request = in_dialog_request();
        request.set_header(HeaderName::To, "<sip:alice@example.com>");
        assert!(DialogKey::from_request(&request).is_none());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(DialogId::new(), DialogId::new());
    }
}
