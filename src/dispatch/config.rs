//! Dispatch configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default pacing buffer length in milliseconds
const DEFAULT_BUFFER_DURATION_MS: u32 = 400;

/// Interval between two packets of the same queue
const DEFAULT_PACKET_INTERVAL_MS: u32 = 20;

/// Delay between two queue population passes
const DEFAULT_POPULATE_INTERVAL_MS: u64 = 40;

/// Opaque OS-level socket handle owned by the embedding application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketHandle(pub i64);

/// Pre-created sockets the packet pump sends through instead of its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketHandles {
    pub ipv4: SocketHandle,
    pub ipv6: SocketHandle,
}

/// Send scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Audio buffered per session queue, in milliseconds (default: 400)
    #[serde(default = "default_buffer_duration_ms")]
    pub buffer_duration_ms: u32,

    /// Time between packets in one queue, in milliseconds (default: 20)
    #[serde(default = "default_packet_interval_ms")]
    pub packet_interval_ms: u32,

    /// Fixed delay between population passes, in milliseconds (default: 40)
    #[serde(default = "default_populate_interval_ms")]
    pub populate_interval_ms: u64,

    /// Sockets handed to the pump factory through [`PumpSettings`]
    ///
    /// Only custom pumps use them; the built-in `UdpPacketPump` ignores them
    /// and always sends through the sockets it binds itself.
    ///
    /// [`PumpSettings`]: super::PumpSettings
    #[serde(default)]
    pub socket_handles: Option<SocketHandles>,
}

fn default_buffer_duration_ms() -> u32 {
    DEFAULT_BUFFER_DURATION_MS
}

fn default_packet_interval_ms() -> u32 {
    DEFAULT_PACKET_INTERVAL_MS
}

fn default_populate_interval_ms() -> u64 {
    DEFAULT_POPULATE_INTERVAL_MS
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            buffer_duration_ms: DEFAULT_BUFFER_DURATION_MS,
            packet_interval_ms: DEFAULT_PACKET_INTERVAL_MS,
            populate_interval_ms: DEFAULT_POPULATE_INTERVAL_MS,
            socket_handles: None,
        }
    }
}

impl SchedulerConfig {
    /// Validate and normalize the configuration
    ///
    /// Returns a config with:
    /// - packet_interval_ms >= 1
    /// - buffer_duration_ms >= packet_interval_ms (at least one queued packet)
    /// - populate_interval_ms >= 1
    pub fn validated(self) -> Self {
        let packet_interval_ms = self.packet_interval_ms.max(1);
        let buffer_duration_ms = self.buffer_duration_ms.max(packet_interval_ms);

        Self {
            buffer_duration_ms,
            packet_interval_ms,
            populate_interval_ms: self.populate_interval_ms.max(1),
            socket_handles: self.socket_handles,
        }
    }

    /// Maximum number of packets held in one session queue
    pub fn queue_capacity(&self) -> usize {
        (self.buffer_duration_ms / self.packet_interval_ms.max(1)).max(1) as usize
    }

    pub fn packet_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.packet_interval_ms))
    }

    pub fn populate_interval(&self) -> Duration {
        Duration::from_millis(self.populate_interval_ms)
    }
}

/// Session holder configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderConfig {
    /// Only start a session once an explicit outbound socket handle is known
    #[serde(default)]
    pub require_explicit_socket_handle: bool,
}
