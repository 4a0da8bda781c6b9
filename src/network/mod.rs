//! Network module for voice transport
//!
//! Handles UDP socket creation, external address discovery and the
//! fixed-rate UDP packet pump.

mod discovery;
mod error;
mod pump;
mod socket;

pub use discovery::{build_request, discover_external_address, parse_response, DISCOVERY_PACKET_LENGTH};
pub use error::NetworkError;
pub use pump::UdpPacketPump;
pub use socket::{bind_for, bind_std_for, resolve, unspecified_for};
