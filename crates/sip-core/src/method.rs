use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SIP request methods as defined in RFC 3261 and common extensions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// INVITE: initiates a session
    Invite,
    /// ACK: confirms receipt of a final response to an INVITE
    Ack,
    /// BYE: terminates a session
    Bye,
    /// CANCEL: cancels a pending request
    Cancel,
    /// REGISTER: binds an address-of-record to a contact
    Register,
    /// OPTIONS: queries capabilities
    Options,
    /// SUBSCRIBE: requests event notification (RFC 6665)
    Subscribe,
    /// NOTIFY: delivers an event notification (RFC 6665)
    Notify,
    /// REFER: asks the peer to issue a request (RFC 3515)
    Refer,
    /// INFO: mid-dialog information (RFC 6086)
    Info,
    /// UPDATE: modifies session state before the dialog confirms (RFC 3311)
    Update,
    /// PRACK: acknowledges a reliable provisional response (RFC 3262)
    Prack,
    /// MESSAGE: instant message (RFC 3428)
    Message,
    /// PUBLISH: publishes event state (RFC 3903)
    Publish,
    /// Any other token, carried verbatim
    Extension(String),
}

impl Method {
    /// Returns the canonical wire form of the method
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Refer => "REFER",
            Method::Info => "INFO",
            Method::Update => "UPDATE",
            Method::Prack => "PRACK",
            Method::Message => "MESSAGE",
            Method::Publish => "PUBLISH",
            Method::Extension(name) => name,
        }
    }

    /// Returns true for INVITE, which gets its own transaction machinery
    /// (three-way handshake, ACK, the Confirmed server state)
    pub fn is_invite(&self) -> bool {
        matches!(self, Method::Invite)
    }

    /// Returns true for ACK, which never creates a transaction of its own
    pub fn is_ack(&self) -> bool {
        matches!(self, Method::Ack)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    // Method names are case-sensitive tokens (RFC 3261 7.1)
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.chars().all(is_token_char) {
            return Err(Error::InvalidMethod(s.to_string()));
        }
        Ok(match s {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "REFER" => Method::Refer,
            "INFO" => Method::Info,
            "UPDATE" => Method::Update,
            "PRACK" => Method::Prack,
            "MESSAGE" => Method::Message,
            "PUBLISH" => Method::Publish,
            other => Method::Extension(other.to_string()),
        })
    }
}

/// RFC 3261 token characters
pub(crate) fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-.!%*_+`'~".contains(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_methods() {
        assert_eq!("INVITE".parse::<Method>().unwrap(), Method::Invite);
        assert_eq!("ACK".parse::<Method>().unwrap(), Method::Ack);
        assert_eq!("REGISTER".parse::<Method>().unwrap(), Method::Register);
    }

    #[test]
    fn methods_are_case_sensitive() {
        // "invite" is a valid token but not the INVITE method
        assert_eq!(
            "invite".parse::<Method>().unwrap(),
            Method::Extension("invite".to_string())
        );
    }

    #[test]
    fn rejects_non_token_input() {
        assert!("IN VITE".parse::<Method>().is_err());
        assert!("".parse::<Method>().is_err());
    }

    #[test]
    fn round_trips_extension_methods() {
        let m: Method = "FOOBAR".parse().unwrap();
        assert_eq!(m.to_string(), "FOOBAR");
    }
}
