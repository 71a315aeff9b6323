use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::method::Method;

/// Common SIP header names
///
/// Names the engine interprets get variants; everything else is carried
/// in [`HeaderName::Other`] with its original spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderName {
    /// Via: path taken by the request so far; carries the branch parameter
    Via,
    /// From: initiator of the request; carries the from-tag
    From,
    /// To: logical recipient; carries the to-tag once a dialog forms
    To,
    /// Call-ID: correlation key for everything belonging to one call
    CallId,
    /// CSeq: command sequence number and method
    CSeq,
    /// Contact: where subsequent requests should be sent
    Contact,
    /// Max-Forwards: hop limit
    MaxForwards,
    /// Content-Length: size of the message body
    ContentLength,
    /// Content-Type: media type of the message body
    ContentType,
    /// Route: forced route for a request
    Route,
    /// Record-Route: proxies that want to stay in the path
    RecordRoute,
    /// Retry-After: backoff hint on 503 and friends
    RetryAfter,
    /// Expires: registration/subscription lifetime
    Expires,
    /// User-Agent: product information
    UserAgent,
    /// Allow: methods supported by the UA
    Allow,
    /// Any other header, name carried verbatim
    Other(String),
}

impl HeaderName {
    /// Returns the canonical wire form of the header name
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::Contact => "Contact",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentType => "Content-Type",
            HeaderName::Route => "Route",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::RetryAfter => "Retry-After",
            HeaderName::Expires => "Expires",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Allow => "Allow",
            HeaderName::Other(name) => name,
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    // Header names are case-insensitive; RFC 3261 7.3.3 compact forms
    // map to the same variants.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidHeader("empty header name".to_string()));
        }
        Ok(match s.to_ascii_lowercase().as_str() {
            "via" | "v" => HeaderName::Via,
            "from" | "f" => HeaderName::From,
            "to" | "t" => HeaderName::To,
            "call-id" | "i" => HeaderName::CallId,
            "cseq" => HeaderName::CSeq,
            "contact" | "m" => HeaderName::Contact,
            "max-forwards" => HeaderName::MaxForwards,
            "content-length" | "l" => HeaderName::ContentLength,
            "content-type" | "c" => HeaderName::ContentType,
            "route" => HeaderName::Route,
            "record-route" => HeaderName::RecordRoute,
            "retry-after" => HeaderName::RetryAfter,
            "expires" => HeaderName::Expires,
            "user-agent" => HeaderName::UserAgent,
            "allow" => HeaderName::Allow,
            _ => HeaderName::Other(s.to_string()),
        })
    }
}

/// A single header line: name plus unparsed value
///
/// Values stay as text. The typed accessors below pull out the pieces
/// the transaction and dialog layers match on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: HeaderName,
    pub value: String,
}

impl Header {
    pub fn new(name: HeaderName, value: impl Into<String>) -> Self {
        Header {
            name,
            value: value.into(),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Extracts a `;name=value` parameter from a header value
/// (case-insensitive name)
pub fn header_param<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    value.split(';').skip(1).find_map(|seg| {
        let (key, val) = seg.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(val.trim())
        } else {
            None
        }
    })
}

/// The `tag` parameter of a From/To header value, if present
pub fn tag_param(value: &str) -> Option<&str> {
    header_param(value, "tag")
}

/// The `branch` parameter of a Via header value, if present
pub fn via_branch(value: &str) -> Option<&str> {
    header_param(value, "branch")
}

/// Parses a CSeq value: sequence number followed by method
pub fn parse_cseq(value: &str) -> Result<(u32, Method)> {
    let mut parts = value.split_whitespace();
    let seq = parts
        .next()
        .ok_or_else(|| Error::InvalidHeader(format!("CSeq: {value}")))?
        .parse::<u32>()
        .map_err(|_| Error::InvalidHeader(format!("CSeq: {value}")))?;
    let method = parts
        .next()
        .ok_or_else(|| Error::InvalidHeader(format!("CSeq: {value}")))?
        .parse::<Method>()?;
    if parts.next().is_some() {
        return Err(Error::InvalidHeader(format!("CSeq: {value}")));
    }
    Ok((seq, method))
}
