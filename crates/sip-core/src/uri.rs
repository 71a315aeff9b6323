use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Sip,
    Sips,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
        }
    }

    /// Default port when the URI does not carry one (RFC 3261 19.1.2)
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Sip => 5060,
            Scheme::Sips => 5061,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A SIP or SIPS URI
///
/// Only the pieces the engine routes on are interpreted: scheme, user,
/// host, port and URI parameters. URI headers (after `?`) are carried as
/// an opaque string so rendering reproduces the original form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    /// Host without IPv6 brackets; brackets are re-added on render
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<(String, Option<String>)>,
    pub headers: Option<String>,
}

impl Uri {
    /// Creates a bare `sip:host` URI
    pub fn sip(host: impl Into<String>) -> Self {
        Uri {
            scheme: Scheme::Sip,
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
            headers: None,
        }
    }

    /// Creates a `sip:user@host` URI
    pub fn sip_user(user: impl Into<String>, host: impl Into<String>) -> Self {
        Uri {
            user: Some(user.into()),
            ..Uri::sip(host)
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.params.push((name.into(), value.map(str::to_string)));
        self
    }

    /// Looks up a URI parameter by name (case-insensitive)
    pub fn param(&self, name: &str) -> Option<&(String, Option<String>)> {
        self.params.iter().find(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// The `transport` URI parameter, if present
    pub fn transport_param(&self) -> Option<&str> {
        self.param("transport").and_then(|(_, v)| v.as_deref())
    }

    /// Port to use for routing, falling back to the scheme default
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{name}={value}")?,
                None => write!(f, ";{name}")?,
            }
        }
        if let Some(headers) = &self.headers {
            write!(f, "?{headers}")?;
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidUri(s.to_string());

        let (scheme, rest) = s.split_once(':').ok_or_else(invalid)?;
        let scheme = match scheme {
            "sip" => Scheme::Sip,
            "sips" => Scheme::Sips,
            _ => return Err(invalid()),
        };

        let (rest, headers) = match rest.split_once('?') {
            Some((rest, headers)) => (rest, Some(headers.to_string())),
            None => (rest, None),
        };

        let (user, hostpart) = match rest.rsplit_once('@') {
            Some((user, hostpart)) => (Some(user.to_string()), hostpart),
            None => (None, rest),
        };

        let mut segments = hostpart.split(';');
        let hostport = segments.next().ok_or_else(invalid)?;
        let params = segments
            .filter(|seg| !seg.is_empty())
            .map(|seg| match seg.split_once('=') {
                Some((name, value)) => (name.to_string(), Some(value.to_string())),
                None => (seg.to_string(), None),
            })
            .collect();

        let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match after.strip_prefix(':') {
                Some(port) => Some(port.parse::<u16>().map_err(|_| invalid())?),
                None if after.is_empty() => None,
                None => return Err(invalid()),
            };
            (host.to_string(), port)
        } else {
            match hostport.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port.parse::<u16>().map_err(|_| invalid())?;
                    (host.to_string(), Some(port))
                }
                None => (hostport.to_string(), None),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Uri {
            scheme,
            user,
            host,
            port,
            params,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_uri() {
        let uri: Uri = "sip:alice@atlanta.com:5070;transport=tcp;lr".parse().unwrap();
        assert_eq!(uri.scheme, Scheme::Sip);
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.host, "atlanta.com");
        assert_eq!(uri.port, Some(5070));
        assert_eq!(uri.transport_param(), Some("tcp"));
        assert!(uri.param("lr").is_some());
    }

    #[test]
    fn parses_bare_host() {
        let uri: Uri = "sip:example.com".parse().unwrap();
        assert_eq!(uri.user, None);
        assert_eq!(uri.port, None);
        assert_eq!(uri.port_or_default(), 5060);
    }

    #[test]
    fn sips_default_port() {
        let uri: Uri = "sips:example.com".parse().unwrap();
        assert_eq!(uri.port_or_default(), 5061);
    }

    #[test]
    fn parses_ipv6_host() {
        let uri: Uri = "sip:[2001:db8::1]:5080".parse().unwrap();
        assert_eq!(uri.host, "2001:db8::1");
        assert_eq!(uri.port, Some(5080));
        assert_eq!(uri.to_string(), "sip:[2001:db8::1]:5080");
    }

    #[test]
    fn display_round_trips() {
        for raw in [
            "sip:alice@atlanta.com",
            "sip:bob@biloxi.com:5060;transport=udp",
            "sips:carol@chicago.com;lr?Subject=Hello",
        ] {
            let uri: Uri = raw.parse().unwrap();
            assert_eq!(uri.to_string(), raw);
        }
    }

    #[test]
    fn rejects_bad_uris() {
        assert!("http://example.com".parse::<Uri>().is_err());
        assert!("sip:".parse::<Uri>().is_err());
        assert!("sip:host:notaport".parse::<Uri>().is_err());
    }
}
