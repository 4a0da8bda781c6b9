//! UDP socket creation

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

use super::error::NetworkError;

/// Any-address with an ephemeral port in the same family as `target`
pub fn unspecified_for(target: &SocketAddr) -> SocketAddr {
    if target.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    }
}

/// Bind a UDP socket suitable for talking to `target`
pub fn bind_std_for(target: &SocketAddr, nonblocking: bool) -> io::Result<std::net::UdpSocket> {
    let local = unspecified_for(target);
    let domain = if local.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(nonblocking)?;
    socket.bind(&local.into())?;

    let socket: std::net::UdpSocket = socket.into();
    debug!("Bound UDP socket {} for {}", socket.local_addr()?, target);
    Ok(socket)
}

/// Async variant of [`bind_std_for`]; must be called inside a Tokio runtime
pub fn bind_for(target: &SocketAddr) -> Result<UdpSocket, NetworkError> {
    let socket = bind_std_for(target, true)?;
    Ok(UdpSocket::from_std(socket)?)
}

/// Resolve `host:port` to its first address
pub async fn resolve(server: &str) -> Result<SocketAddr, NetworkError> {
    if let Ok(address) = server.parse() {
        return Ok(address);
    }

    tokio::net::lookup_host(server)
        .await?
        .next()
        .ok_or_else(|| NetworkError::NoAddress(server.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unspecified_matches_family() {
        let v4: SocketAddr = "203.0.113.5:50000".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::1]:50000".parse().unwrap();

        assert_eq!(unspecified_for(&v4), "0.0.0.0:0".parse().unwrap());
        assert_eq!(unspecified_for(&v6), "[::]:0".parse().unwrap());
    }

    #[test]
    fn test_bind_std_ipv4() {
        let target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let socket = bind_std_for(&target, false).unwrap();

        assert!(socket.local_addr().unwrap().is_ipv4());
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_resolve_literal() {
        let address = resolve("127.0.0.1:4000").await.unwrap();
        assert_eq!(address, "127.0.0.1:4000".parse().unwrap());
    }
}
