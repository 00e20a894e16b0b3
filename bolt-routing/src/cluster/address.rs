use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::errors::AddressParseError;

/// Port used when a server address does not specify one.
pub const DEFAULT_PORT: u16 = 7687;

/// Address of a cluster member: host name or IP literal, plus a port.
///
/// IPv6 literals are stored without brackets and without zone id;
/// the brackets are added back when displaying.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    /// Creates an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `[ipv6]`, `[ipv6]:port` and `[ipv6%zone]:port`.
    ///
    /// A missing port defaults to [DEFAULT_PORT]. Zone ids are dropped.
    pub fn parse(address: &str) -> Result<Self, AddressParseError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(AddressParseError::Empty);
        }

        if let Some(rest) = address.strip_prefix('[') {
            let end = rest
                .find(']')
                .ok_or_else(|| AddressParseError::UnterminatedIpv6(address.to_owned()))?;
            let literal = &rest[..end];
            let host = match literal.find('%') {
                Some(zone_start) => &literal[..zone_start],
                None => literal,
            };
            let port = match &rest[end + 1..] {
                "" => DEFAULT_PORT,
                after => match after.strip_prefix(':') {
                    Some(port) => parse_port(port, address)?,
                    None => {
                        return Err(AddressParseError::TrailingCharacters(address.to_owned()))
                    }
                },
            };
            return Ok(Self::new(host, port));
        }

        match address.rsplit_once(':') {
            // A single colon separates the port.
            Some((host, port)) if !host.contains(':') => {
                Ok(Self::new(host, parse_port(port, address)?))
            }
            // Unbracketed IPv6 literal: no port can be told apart.
            Some(_) => Ok(Self::new(address, DEFAULT_PORT)),
            None => Ok(Self::new(address, DEFAULT_PORT)),
        }
    }

    /// Host name or IP literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port of the server.
    pub fn port(&self) -> u16 {
        self.port
    }
}

fn parse_port(port: &str, address: &str) -> Result<u16, AddressParseError> {
    port.parse()
        .map_err(|_| AddressParseError::InvalidPort(address.to_owned()))
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}
