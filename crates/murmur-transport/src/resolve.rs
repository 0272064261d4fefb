//! Neighbor name resolution

use std::net::SocketAddr;

use murmur_core::{MurmurError, MurmurResult};

/// Resolve `host` to one socket address, preferring IPv4 since only IPv4
/// last hops can be carried on the wire
pub async fn resolve_neighbor(host: &str, port: u16) -> MurmurResult<SocketAddr> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| MurmurError::ResolutionFailed {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .collect();

    candidates
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| MurmurError::ResolutionFailed {
            host: host.to_string(),
            reason: "no addresses returned".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_literal_address() {
        let addr = resolve_neighbor("127.0.0.1", 4000).await.unwrap();
        assert_eq!(addr, "127.0.0.1:4000".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve_neighbor("localhost", 4001).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 4001);
    }

    #[tokio::test]
    async fn test_resolve_invalid_name_fails() {
        let result = resolve_neighbor("no such host.invalid", 1).await;
        assert!(matches!(result, Err(MurmurError::ResolutionFailed { .. })));
    }
}
