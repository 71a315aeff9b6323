use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SIP protocol version, rendered as `SIP/major.minor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub fn new(major: u8, minor: u8) -> Self {
        Version { major, minor }
    }

    /// The only version in active use, SIP/2.0
    pub fn sip_2_0() -> Self {
        Version { major: 2, minor: 0 }
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::sip_2_0()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s.strip_prefix("SIP/").ok_or(Error::InvalidVersion)?;
        let (major, minor) = rest.split_once('.').ok_or(Error::InvalidVersion)?;
        let major = major.parse::<u8>().map_err(|_| Error::InvalidVersion)?;
        let minor = minor.parse::<u8>().map_err(|_| Error::InvalidVersion)?;
        Ok(Version { major, minor })
    }
}
