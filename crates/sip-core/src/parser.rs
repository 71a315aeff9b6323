//! Wire-format decoding
//!
//! [`StreamDecoder`] is the boundary between transport bytes and the
//! message model. It accepts input in arbitrary fragments, buffers until
//! a full message (start line, headers, Content-Length worth of body) is
//! available, and reports how many input bytes it consumed so a caller
//! holding several pipelined messages in one read can extract them one
//! by one.

use bytes::{Bytes, BytesMut};
use nom::{
    bytes::complete::take_while1,
    character::complete::{char, space0, space1},
    combinator::rest,
    sequence::{preceded, separated_pair, tuple},
    IResult,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::header::{Header, HeaderName};
use crate::message::{Message, Request, Response};
use crate::method::{is_token_char, Method};
use crate::status::StatusCode;
use crate::uri::Uri;
use crate::version::Version;

/// Maximum length of a single line in a SIP message
pub const MAX_LINE_LENGTH: usize = 4096;
/// Maximum number of headers in a SIP message
pub const MAX_HEADER_COUNT: usize = 100;
/// Maximum size of a SIP message body
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;
/// Maximum size of the start line plus header section
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Outcome of one [`StreamDecoder::decode`] call
#[derive(Debug)]
pub struct DecodeStep {
    /// The decoded message, if one completed during this call
    pub message: Option<Message>,
    /// How many bytes of the caller's input were consumed. When a message
    /// completes mid-buffer this is less than the input length; the caller
    /// re-offers the remainder to pick up the next message.
    pub consumed: usize,
    /// True when `message` is set
    pub complete: bool,
}

/// Incremental decoder for SIP messages arriving as a byte stream
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: BytesMut,
}

impl StreamDecoder {
    pub fn new() -> Self {
        StreamDecoder {
            buf: BytesMut::new(),
        }
    }

    /// Number of bytes buffered while waiting for the rest of a message
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feeds `input` to the decoder and attempts to complete a message.
    ///
    /// On a malformed message the buffered bytes are discarded and the
    /// decoder is immediately usable for the next message; stream
    /// transports typically drop the connection instead.
    pub fn decode(&mut self, input: &[u8]) -> Result<DecodeStep> {
        self.buf.extend_from_slice(input);
        match self.try_extract() {
            Ok(Some((message, end))) => {
                // Bytes past the message end belong to the next message and
                // stay with the caller.
                let tail = self.buf.len() - end;
                let consumed = input.len().saturating_sub(tail);
                self.buf.clear();
                Ok(DecodeStep {
                    message: Some(message),
                    consumed,
                    complete: true,
                })
            }
            Ok(None) => Ok(DecodeStep {
                message: None,
                consumed: input.len(),
                complete: false,
            }),
            Err(error) => {
                debug!(buffered = self.buf.len(), %error, "resetting decoder after malformed input");
                self.buf.clear();
                Err(error)
            }
        }
    }

    /// Tries to extract one full message from the buffer. `Ok(None)` means
    /// more bytes are needed. On success returns the message and the
    /// buffer offset one past its final body byte.
    fn try_extract(&self) -> Result<Option<(Message, usize)>> {
        // RFC 3261 7.5: implementations must ignore CRLF between messages
        // on a stream (keep-alive).
        let mut start = 0;
        while self.buf[start..].starts_with(b"\r\n") {
            start += 2;
        }
        let data = &self.buf[start..];

        let head_len = match find_crlf_crlf(data) {
            Some(pos) => pos,
            None => {
                if data.len() > MAX_HEADER_BYTES {
                    return Err(Error::TooLarge(format!(
                        "header section exceeds {MAX_HEADER_BYTES} bytes"
                    )));
                }
                return Ok(None);
            }
        };

        let head = std::str::from_utf8(&data[..head_len])
            .map_err(|_| Error::InvalidFormat("non-UTF-8 header section".to_string()))?;
        let lines = unfold_lines(head)?;
        let (start_line, header_lines) = lines
            .split_first()
            .ok_or_else(|| Error::InvalidFormat("empty message head".to_string()))?;

        if header_lines.len() > MAX_HEADER_COUNT {
            return Err(Error::TooLarge(format!(
                "more than {MAX_HEADER_COUNT} headers"
            )));
        }

        let mut headers = Vec::with_capacity(header_lines.len());
        for line in header_lines {
            headers.push(parse_header_line(line)?);
        }

        let content_length = match headers.iter().find(|h| h.name == HeaderName::ContentLength) {
            Some(h) => h
                .value
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::InvalidHeader(format!("Content-Length: {}", h.value)))?,
            None => 0,
        };
        if content_length > MAX_BODY_SIZE {
            return Err(Error::TooLarge(format!(
                "body of {content_length} bytes exceeds {MAX_BODY_SIZE}"
            )));
        }

        let body_start = head_len + 4;
        let total = body_start + content_length;
        if data.len() < total {
            return Ok(None);
        }
        let body = Bytes::copy_from_slice(&data[body_start..total]);

        let message = if start_line.starts_with("SIP/") {
            let (version, status, reason) = parse_status_line(start_line)?;
            let mut response = Response::new(status).with_body(body);
            response.version = version;
            response.reason = reason;
            response.headers = headers;
            Message::Response(response)
        } else {
            let (method, uri, version) = parse_request_line(start_line)?;
            let mut request = Request::new(method, uri).with_body(body);
            request.version = version;
            request.headers = headers;
            Message::Request(request)
        };

        Ok(Some((message, start + total)))
    }
}

/// Decodes a single datagram that must hold exactly one message
pub fn parse_message(data: &[u8]) -> Result<Message> {
    let mut decoder = StreamDecoder::new();
    let step = decoder.decode(data)?;
    match step.message {
        Some(message) => {
            // Only trailing keep-alive CRLFs may follow in a datagram
            if data[step.consumed..].iter().any(|&b| b != b'\r' && b != b'\n') {
                return Err(Error::InvalidFormat(
                    "unexpected bytes after message end".to_string(),
                ));
            }
            Ok(message)
        }
        None => Err(Error::InvalidFormat("truncated message".to_string())),
    }
}

fn find_crlf_crlf(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Splits the head into lines, folding RFC 3261 7.3.1 continuation lines
/// (leading SP/HTAB) into the previous header line.
fn unfold_lines(head: &str) -> Result<Vec<String>> {
    let mut lines: Vec<String> = Vec::new();
    for raw in head.split("\r\n") {
        if raw.len() > MAX_LINE_LENGTH {
            return Err(Error::TooLarge(format!(
                "line exceeds {MAX_LINE_LENGTH} bytes"
            )));
        }
        if raw.starts_with(' ') || raw.starts_with('\t') {
            match lines.last_mut() {
                Some(prev) => {
                    prev.push(' ');
                    prev.push_str(raw.trim_start());
                }
                None => {
                    return Err(Error::InvalidFormat(
                        "continuation line before any header".to_string(),
                    ))
                }
            }
        } else {
            lines.push(raw.to_string());
        }
    }
    Ok(lines)
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token_char)(input)
}

fn not_ws(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_ascii_whitespace())(input)
}

fn request_line_parts(input: &str) -> IResult<&str, (&str, &str, &str)> {
    tuple((token, preceded(space1, not_ws), preceded(space1, rest)))(input)
}

fn status_line_parts(input: &str) -> IResult<&str, (&str, &str, &str)> {
    tuple((not_ws, preceded(space1, token), preceded(space0, rest)))(input)
}

fn header_parts(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        take_while1(is_token_char),
        tuple((space0, char(':'), space0)),
        rest,
    )(input)
}

/// Parses a Request-Line: `Method SP Request-URI SP SIP-Version`
pub fn parse_request_line(line: &str) -> Result<(Method, Uri, Version)> {
    let (_, (method, uri, version)) = request_line_parts(line)
        .map_err(|_| Error::InvalidFormat(format!("request line: {line}")))?;
    Ok((method.parse()?, uri.parse()?, version.parse()?))
}

/// Parses a Status-Line: `SIP-Version SP Status-Code SP Reason-Phrase`
pub fn parse_status_line(line: &str) -> Result<(Version, StatusCode, Option<String>)> {
    let (_, (version, code, reason)) = status_line_parts(line)
        .map_err(|_| Error::InvalidFormat(format!("status line: {line}")))?;
    let version: Version = version.parse()?;
    let status: StatusCode = code.parse()?;
    let reason = reason.trim();
    // Keep a custom reason only when it deviates from the canonical phrase
    let reason = if reason.is_empty() || reason == status.reason_phrase() {
        None
    } else {
        Some(reason.to_string())
    };
    Ok((version, status, reason))
}

fn parse_header_line(line: &str) -> Result<Header> {
    let (_, (name, value)) =
        header_parts(line).map_err(|_| Error::InvalidHeader(line.to_string()))?;
    let name: HeaderName = name.parse()?;
    Ok(Header::new(name, value.trim_end()))
}
