//! Dual-stack socket address used by every socket operation.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6, ToSocketAddrs};
use std::str::FromStr;

use socket2::{Domain, SockAddr};

use crate::error::NetError;

/// Address family of an [`AddressSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Socket domain matching this family.
    pub fn domain(self) -> Domain {
        match self {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        }
    }
}

/// Immutable IPv4/IPv6 endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpec {
    addr: SocketAddr,
}

impl AddressSpec {
    /// Endpoint for `ip` and `port`; the family follows the IP version.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
        }
    }

    /// IPv4 loopback on the given port, mostly useful for local tools and tests.
    pub fn localhost(port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    /// Unspecified IPv6 address (`[::]`), which a dual-stack listener binds to.
    pub fn any_v6(port: u16) -> Self {
        Self::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)
    }

    /// Unspecified IPv4 address (`0.0.0.0`).
    pub fn any_v4(port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    }

    /// IPv4 or IPv6. An IPv4-mapped IPv6 address reports `Ipv6` until
    /// [`AddressSpec::canonical`] collapses it.
    pub fn family(&self) -> AddressFamily {
        match self.addr {
            SocketAddr::V4(_) => AddressFamily::Ipv4,
            SocketAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Host part.
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    /// Port in host byte order.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Raw host bytes: 4 for IPv4, 16 for IPv6.
    pub fn host_bytes(&self) -> Vec<u8> {
        match self.addr.ip() {
            IpAddr::V4(ip) => ip.octets().to_vec(),
            IpAddr::V6(ip) => ip.octets().to_vec(),
        }
    }

    /// Size of the native socket address structure for this family.
    pub fn size(&self) -> usize {
        self.to_sock_addr().len() as usize
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Native form handed to `bind`, `connect` and friends.
    pub fn to_sock_addr(&self) -> SockAddr {
        SockAddr::from(self.addr)
    }

    /// Builds an address from a native socket address. Returns `None` for
    /// non-IP families (e.g. unix sockets).
    pub fn from_sock_addr(addr: &SockAddr) -> Option<Self> {
        addr.as_socket().map(Self::from)
    }

    /// IPv4 addresses become their IPv4-mapped IPv6 form; IPv6 is unchanged.
    pub fn to_dual_stack(&self) -> Self {
        match self.addr {
            SocketAddr::V4(v4) => Self {
                addr: SocketAddr::V6(SocketAddrV6::new(v4.ip().to_ipv6_mapped(), v4.port(), 0, 0)),
            },
            SocketAddr::V6(_) => *self,
        }
    }

    /// Collapses an IPv4-mapped IPv6 address back to plain IPv4, so peers
    /// accepted on a dual-stack listener log the way they connected.
    pub fn canonical(&self) -> Self {
        match self.addr {
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(v4) => Self::new(IpAddr::V4(v4), v6.port()),
                None => *self,
            },
            SocketAddr::V4(_) => *self,
        }
    }

    /// Resolves `host:port` text, including host names, to the first address.
    pub fn resolve(text: &str) -> Result<Self, NetError> {
        if let Ok(spec) = text.parse::<AddressSpec>() {
            return Ok(spec);
        }

        text.to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(Self::from)
            .ok_or_else(|| NetError::InvalidAddress(text.to_string()))
    }
}

impl From<SocketAddr> for AddressSpec {
    fn from(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl From<AddressSpec> for SocketAddr {
    fn from(spec: AddressSpec) -> Self {
        spec.addr
    }
}

impl FromStr for AddressSpec {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<SocketAddr>()
            .map(Self::from)
            .map_err(|_| NetError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}
