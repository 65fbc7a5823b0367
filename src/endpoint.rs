use std::fmt;
use std::net::Ipv4Addr;

/// An IPv4 address and port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub const UNSPECIFIED: Endpoint = Endpoint::new(Ipv4Addr::UNSPECIFIED, 0);

    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Endpoint { addr, port }
    }

    pub fn broadcast(port: u16) -> Self {
        Endpoint::new(Ipv4Addr::BROADCAST, port)
    }

    /// Both address and port are set.
    pub fn is_specified(&self) -> bool {
        !self.addr.is_unspecified() && self.port != 0
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::UNSPECIFIED
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl std::str::FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in {s:?}"))?;
        let addr = addr
            .parse::<Ipv4Addr>()
            .map_err(|e| format!("bad address {addr:?}: {e}"))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("bad port {port:?}: {e}"))?;
        Ok(Endpoint::new(addr, port))
    }
}
