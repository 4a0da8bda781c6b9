//! External address discovery against a voice server
//!
//! The client sends a 70-byte request carrying its SSRC; the server answers
//! with a 70-byte packet holding the address and port it saw the request
//! come from.
//!
//! Response layout:
//! - bytes 0-3: echoed SSRC (ignored)
//! - bytes 4..: NUL-terminated ASCII IP address, at most up to byte 68
//! - bytes 68-69: port, little-endian

use std::net::{IpAddr, SocketAddr};

use tracing::{debug, info};

use super::error::NetworkError;
use super::socket::bind_for;

/// Size of both discovery request and response
pub const DISCOVERY_PACKET_LENGTH: usize = 70;

const ADDRESS_OFFSET: usize = 4;
const PORT_OFFSET: usize = 68;

/// Build a discovery request for `ssrc`
pub fn build_request(ssrc: u32) -> [u8; DISCOVERY_PACKET_LENGTH] {
    let mut request = [0u8; DISCOVERY_PACKET_LENGTH];
    request[..4].copy_from_slice(&ssrc.to_be_bytes());
    request
}

/// Parse a discovery response into the externally visible address
pub fn parse_response(data: &[u8]) -> Result<SocketAddr, NetworkError> {
    if data.len() != DISCOVERY_PACKET_LENGTH {
        return Err(NetworkError::MalformedDiscoveryResponse {
            expected: DISCOVERY_PACKET_LENGTH,
            actual: data.len(),
        });
    }

    let field = &data[ADDRESS_OFFSET..PORT_OFFSET];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let text = &field[..end];

    let ip: IpAddr = std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            NetworkError::InvalidDiscoveryAddress(String::from_utf8_lossy(text).into_owned())
        })?;

    // Byte-swapped relative to every other field on the wire
    let port = u16::from_le_bytes([data[PORT_OFFSET], data[PORT_OFFSET + 1]]);

    Ok(SocketAddr::new(ip, port))
}

/// Run one discovery exchange with `target`
///
/// The socket is connected to `target`, so only a reply coming from that
/// exact address is accepted; datagrams from any other source are dropped
/// by the OS and the exchange keeps waiting.
///
/// Waits for exactly one response and never retries. There is no internal
/// timeout; wrap the future in `tokio::time::timeout` and drop it to give
/// up. The socket is closed when the future completes or is dropped.
pub async fn discover_external_address(
    target: SocketAddr,
    ssrc: u32,
) -> Result<SocketAddr, NetworkError> {
    let socket = bind_for(&target)?;
    socket.connect(target).await?;

    debug!("Sending discovery request for ssrc {} to {}", ssrc, target);
    socket.send(&build_request(ssrc)).await?;

    // One spare byte so an oversized datagram is not silently truncated to 70
    let mut buf = [0u8; DISCOVERY_PACKET_LENGTH + 1];
    let len = socket.recv(&mut buf).await?;

    let external = parse_response(&buf[..len])?;
    info!("Discovered external address {} via {}", external, target);

    Ok(external)
}
