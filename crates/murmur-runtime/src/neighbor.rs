//! Neighbor addresses as supplied on the command line or by the user

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use murmur_core::MurmurError;

/// A neighbor to add: either a literal socket address or a host name that
/// still has to be resolved
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NeighborSpec {
    Addr(SocketAddr),
    Host { host: String, port: u16 },
}

impl NeighborSpec {
    pub fn new(host_or_address: &str, port: u16) -> Self {
        match host_or_address.parse::<IpAddr>() {
            Ok(ip) => NeighborSpec::Addr(SocketAddr::new(ip, port)),
            Err(_) => NeighborSpec::Host {
                host: host_or_address.to_string(),
                port,
            },
        }
    }
}

impl FromStr for NeighborSpec {
    type Err = MurmurError;

    /// Accepts `ip:port`, `[ipv6]:port` and `host:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(NeighborSpec::Addr(addr));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| MurmurError::InvalidNeighbor(format!("{s}: expected host:port")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| MurmurError::InvalidNeighbor(format!("{s}: bad port {port:?}")))?;
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(MurmurError::InvalidNeighbor(format!("{s}: bad host")));
        }

        Ok(NeighborSpec::new(host, port))
    }
}

impl fmt::Display for NeighborSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NeighborSpec::Addr(addr) => write!(f, "{addr}"),
            NeighborSpec::Host { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_socket_addresses() {
        assert_eq!(
            "127.0.0.1:4000".parse::<NeighborSpec>().unwrap(),
            NeighborSpec::Addr("127.0.0.1:4000".parse().unwrap())
        );
        assert_eq!(
            "[::1]:4000".parse::<NeighborSpec>().unwrap(),
            NeighborSpec::Addr("[::1]:4000".parse().unwrap())
        );
    }

    #[test]
    fn test_parse_host_name() {
        assert_eq!(
            "zoo.example.org:42000".parse::<NeighborSpec>().unwrap(),
            NeighborSpec::Host {
                host: "zoo.example.org".into(),
                port: 42000
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("nocolon".parse::<NeighborSpec>().is_err());
        assert!("host:notaport".parse::<NeighborSpec>().is_err());
        assert!(":4000".parse::<NeighborSpec>().is_err());
        assert!("host:70000".parse::<NeighborSpec>().is_err());
    }

    #[test]
    fn test_new_detects_literal_ip() {
        assert_eq!(
            NeighborSpec::new("10.1.2.3", 9),
            NeighborSpec::Addr("10.1.2.3:9".parse().unwrap())
        );
        assert!(matches!(
            NeighborSpec::new("localhost", 9),
            NeighborSpec::Host { .. }
        ));
    }
}
