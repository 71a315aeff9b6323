use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::header::{self, Header, HeaderName};
use crate::method::Method;
use crate::status::StatusCode;
use crate::uri::Uri;
use crate::version::Version;

/// A SIP request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// The method of the request
    pub method: Method,
    /// The request URI
    pub uri: Uri,
    /// The SIP version
    pub version: Version,
    /// The headers of the request, in wire order
    pub headers: Vec<Header>,
    /// The body of the request
    pub body: Bytes,
}

impl Request {
    /// Creates a new SIP request with the specified method and URI
    pub fn new(method: Method, uri: Uri) -> Self {
        Request {
            method,
            uri,
            version: Version::sip_2_0(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Adds a header to the request
    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    /// Sets the body of the request
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Retrieves the first header with the specified name, if any
    pub fn header(&self, name: &HeaderName) -> Option<&Header> {
        self.headers.iter().find(|h| &h.name == name)
    }

    /// Retrieves the first value for the specified header name, if any
    pub fn header_value(&self, name: &HeaderName) -> Option<&str> {
        self.header(name).map(|h| h.value.as_str())
    }

    /// Replaces the first header with this name, or appends it
    pub fn set_header(&mut self, name: HeaderName, value: impl Into<String>) {
        let value = value.into();
        match self.headers.iter_mut().find(|h| h.name == name) {
            Some(header) => header.value = value,
            None => self.headers.push(Header::new(name, value)),
        }
    }

    /// Retrieves the Call-ID header value, if present
    pub fn call_id(&self) -> Option<&str> {
        self.header_value(&HeaderName::CallId)
    }

    /// Parses the CSeq header, if present and well formed
    pub fn cseq(&self) -> Option<(u32, Method)> {
        self.header_value(&HeaderName::CSeq)
            .and_then(|v| header::parse_cseq(v).ok())
    }

    /// The branch parameter of the topmost Via, if present
    pub fn via_branch(&self) -> Option<&str> {
        self.header_value(&HeaderName::Via).and_then(header::via_branch)
    }

    /// The From tag, if present
    pub fn from_tag(&self) -> Option<&str> {
        self.header_value(&HeaderName::From).and_then(header::tag_param)
    }

    /// The To tag, if present
    pub fn to_tag(&self) -> Option<&str> {
        self.header_value(&HeaderName::To).and_then(header::tag_param)
    }

    /// Renders the request to wire bytes, body included verbatim
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.uri, self.version).into_bytes();
        render_tail(&mut out, &self.headers, &self.body);
        out
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n", self.method, self.uri, self.version)?;
        for header in &self.headers {
            write!(f, "{header}\r\n")?;
        }
        write!(f, "\r\n")?;
        if !self.body.is_empty() {
            write!(f, "{}", String::from_utf8_lossy(&self.body))?;
        }
        Ok(())
    }
}

/// A SIP response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The SIP version
    pub version: Version,
    /// The status code
    pub status: StatusCode,
    /// Custom reason phrase (overrides the default for the status code)
    pub reason: Option<String>,
    /// The headers of the response, in wire order
    pub headers: Vec<Header>,
    /// The body of the response
    pub body: Bytes,
}

impl Response {
    /// Creates a new SIP response with the specified status code
    pub fn new(status: StatusCode) -> Self {
        Response {
            version: Version::sip_2_0(),
            status,
            reason: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a SIP 100 Trying response
    pub fn trying() -> Self {
        Response::new(StatusCode::Trying)
    }

    /// Creates a SIP 180 Ringing response
    pub fn ringing() -> Self {
        Response::new(StatusCode::Ringing)
    }

    /// Creates a SIP 200 OK response
    pub fn ok() -> Self {
        Response::new(StatusCode::Ok)
    }

    /// Adds a header to the response
    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    /// Sets a custom reason phrase for the response
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the body of the response
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Retrieves the first header with the specified name, if any
    pub fn header(&self, name: &HeaderName) -> Option<&Header> {
        self.headers.iter().find(|h| &h.name == name)
    }

    /// Retrieves the first value for the specified header name, if any
    pub fn header_value(&self, name: &HeaderName) -> Option<&str> {
        self.header(name).map(|h| h.value.as_str())
    }

    /// Replaces the first header with this name, or appends it
    pub fn set_header(&mut self, name: HeaderName, value: impl Into<String>) {
        let value = value.into();
        match self.headers.iter_mut().find(|h| h.name == name) {
            Some(header) => header.value = value,
            None => self.headers.push(Header::new(name, value)),
        }
    }

    /// Gets the reason phrase (custom if set, default for the code otherwise)
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase())
    }

    /// Retrieves the Call-ID header value, if present
    pub fn call_id(&self) -> Option<&str> {
        self.header_value(&HeaderName::CallId)
    }

    /// Parses the CSeq header, if present and well formed
    pub fn cseq(&self) -> Option<(u32, Method)> {
        self.header_value(&HeaderName::CSeq)
            .and_then(|v| header::parse_cseq(v).ok())
    }

    /// The branch parameter of the topmost Via, if present
    pub fn via_branch(&self) -> Option<&str> {
        self.header_value(&HeaderName::Via).and_then(header::via_branch)
    }

    /// The From tag, if present
    pub fn from_tag(&self) -> Option<&str> {
        self.header_value(&HeaderName::From).and_then(header::tag_param)
    }

    /// The To tag, if present
    pub fn to_tag(&self) -> Option<&str> {
        self.header_value(&HeaderName::To).and_then(header::tag_param)
    }

    /// Renders the response to wire bytes, body included verbatim
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = format!(
            "{} {} {}\r\n",
            self.version,
            self.status.as_u16(),
            self.reason_phrase()
        )
        .into_bytes();
        render_tail(&mut out, &self.headers, &self.body);
        out
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}\r\n",
            self.version,
            self.status.as_u16(),
            self.reason_phrase()
        )?;
        for header in &self.headers {
            write!(f, "{header}\r\n")?;
        }
        write!(f, "\r\n")?;
        if !self.body.is_empty() {
            write!(f, "{}", String::from_utf8_lossy(&self.body))?;
        }
        Ok(())
    }
}

fn render_tail(out: &mut Vec<u8>, headers: &[Header], body: &Bytes) {
    for header in headers {
        out.extend_from_slice(header.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
}

/// Represents either a SIP request or response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// SIP request
    Request(Request),
    /// SIP response
    Response(Response),
}

impl Message {
    /// Returns true if this message is a request
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    /// Returns true if this message is a response
    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    /// Returns the request if this is a request message, None otherwise
    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(req) => Some(req),
            _ => None,
        }
    }

    /// Returns the response if this is a response message, None otherwise
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(resp) => Some(resp),
            _ => None,
        }
    }

    /// Returns the headers of the message
    pub fn headers(&self) -> &[Header] {
        match self {
            Message::Request(req) => &req.headers,
            Message::Response(resp) => &resp.headers,
        }
    }

    /// Retrieves the Call-ID header value, if present
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Message::Request(req) => req.call_id(),
            Message::Response(resp) => resp.call_id(),
        }
    }

    /// Parses the CSeq header, if present and well formed
    pub fn cseq(&self) -> Option<(u32, Method)> {
        match self {
            Message::Request(req) => req.cseq(),
            Message::Response(resp) => resp.cseq(),
        }
    }

    /// The branch parameter of the topmost Via, if present
    pub fn via_branch(&self) -> Option<&str> {
        match self {
            Message::Request(req) => req.via_branch(),
            Message::Response(resp) => resp.via_branch(),
        }
    }

    /// Renders the message to wire bytes
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Message::Request(req) => req.to_wire(),
            Message::Response(resp) => resp.to_wire(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(req) => req.fmt(f),
            Message::Response(resp) => resp.fmt(f),
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Message::Response(resp)
    }
}
