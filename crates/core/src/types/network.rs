//! Network address allow-lists for trusted proxies.

use core::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Errors that can occur when parsing an [`IpNetwork`] or [`TrustAllowList`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkParseError {
    /// The address part is not an IPv4 or IPv6 address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// The prefix length is not a number or exceeds the address width.
    #[error("invalid prefix length in {0}")]
    InvalidPrefix(String),
    /// The list contains no entries.
    #[error("allow-list cannot be empty")]
    Empty,
}

/// A single address or a CIDR range.
///
/// Host bits below the prefix are cleared on parse, so `10.1.2.3/8` and
/// `10.0.0.0/8` compare equal.
///
/// ## Examples
///
/// ```
/// use shopfront_core::IpNetwork;
///
/// let net: IpNetwork = "10.0.0.0/8".parse().unwrap();
/// assert!(net.contains("10.20.30.40".parse().unwrap()));
/// assert!(!net.contains("192.168.1.1".parse().unwrap()));
///
/// let single: IpNetwork = "::1".parse().unwrap();
/// assert!(single.contains("::1".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    /// Parse `addr` or `addr/prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address or prefix length is invalid.
    pub fn parse(s: &str) -> Result<Self, NetworkParseError> {
        let s = s.trim();
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let addr = addr_part
            .parse::<IpAddr>()
            .map_err(|_| NetworkParseError::InvalidAddress(s.to_owned()))?
            .to_canonical();
        let width = max_prefix(addr);

        let prefix = match prefix_part {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= width)
                .ok_or_else(|| NetworkParseError::InvalidPrefix(s.to_owned()))?,
            None => width,
        };

        Ok(Self {
            addr: mask(addr, prefix),
            prefix,
        })
    }

    /// Network address (host bits cleared).
    #[must_use]
    pub const fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length in bits.
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether `ip` falls inside this network.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) match their IPv4 form.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        if ip.is_ipv4() != self.addr.is_ipv4() {
            return false;
        }
        mask(ip, self.prefix) == self.addr
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for IpNetwork {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

const fn max_prefix(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V4((bits & mask).into())
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V6((bits & mask).into())
        }
    }
}

/// Immutable set of proxy networks whose forwarded headers are honoured.
///
/// Built once at startup and read concurrently by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAllowList {
    networks: Vec<IpNetwork>,
}

impl TrustAllowList {
    /// Parse a comma-separated list of addresses and CIDR ranges.
    ///
    /// Blank entries are skipped. Any unparseable entry fails the whole list.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is invalid or the list is empty.
    pub fn parse(s: &str) -> Result<Self, NetworkParseError> {
        let networks = s
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(IpNetwork::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(networks)
    }

    /// Build from already-parsed networks.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkParseError::Empty`] if `networks` is empty.
    pub fn new(networks: Vec<IpNetwork>) -> Result<Self, NetworkParseError> {
        if networks.is_empty() {
            return Err(NetworkParseError::Empty);
        }
        Ok(Self { networks })
    }

    /// Whether `ip` matches any entry.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.networks.iter().any(|net| net.contains(ip))
    }

    /// Configured networks.
    #[must_use]
    pub fn networks(&self) -> &[IpNetwork] {
        &self.networks
    }
}

impl FromStr for TrustAllowList {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TrustAllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .networks
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}
