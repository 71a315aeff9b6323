//! Core SIP message types for the siprail stack
//!
//! This crate provides the message model the rest of the stack works
//! against: methods, status codes, the header representation, requests
//! and responses, and a streaming decoder that turns raw network bytes
//! into [`Message`] values.
//!
//! The header surface is deliberately small. The engine only interprets
//! the headers it needs for transaction matching, dialog identity and
//! congestion signaling (Via, Call-ID, CSeq, From/To tags, Content-Length,
//! Retry-After); everything else is carried verbatim and rendered back
//! out unchanged.
//!
//! # Decoding
//!
//! [`StreamDecoder`] accepts arbitrarily fragmented input, so it can sit
//! behind a stream transport where one read may hold half a message or
//! several messages back to back:
//!
//! ```
//! use siprail_sip_core::StreamDecoder;
//!
//! let wire = b"OPTIONS sip:alice@example.com SIP/2.0\r\n\
//!     Via: SIP/2.0/UDP client.example.com;branch=z9hG4bK74bf9\r\n\
//!     Max-Forwards: 70\r\n\
//!     From: <sip:bob@example.com>;tag=9fxced76sl\r\n\
//!     To: <sip:alice@example.com>\r\n\
//!     Call-ID: 3848276298220188511@client.example.com\r\n\
//!     CSeq: 1 OPTIONS\r\n\
//!     Content-Length: 0\r\n\r\n";
//!
//! let mut decoder = StreamDecoder::new();
//! let step = decoder.decode(&wire[..20]).unwrap();
//! assert!(step.message.is_none());
//! let step = decoder.decode(&wire[20..]).unwrap();
//! assert!(step.complete);
//! assert!(step.message.unwrap().is_request());
//! ```
//!
//! For datagram transports, [`parse_message`] decodes one packet in one
//! call.

pub mod builder;
pub mod error;
pub mod header;
pub mod message;
pub mod method;
pub mod parser;
pub mod status;
pub mod uri;
pub mod version;

pub use error::{Error, Result};
pub use header::{Header, HeaderName};
pub use message::{Message, Request, Response};
pub use method::Method;
pub use parser::{parse_message, DecodeStep, StreamDecoder};
pub use status::StatusCode;
pub use uri::{Scheme, Uri};
pub use version::Version;

/// Re-export of common types and functions
pub mod prelude {
    pub use crate::builder::{ack_for_non_2xx, response_for, trying_for};
    pub use crate::error::{Error, Result};
    pub use crate::header::{Header, HeaderName};
    pub use crate::message::{Message, Request, Response};
    pub use crate::method::Method;
    pub use crate::parser::{
        parse_message, DecodeStep, StreamDecoder, MAX_BODY_SIZE, MAX_HEADER_BYTES,
        MAX_HEADER_COUNT,
    };
    pub use crate::status::StatusCode;
    pub use crate::uri::Uri;
    pub use crate::version::Version;
}
