//! Fixed-rate UDP packet pump
//!
//! Every packet interval one packet is taken from the head of each session
//! queue and sent. Queues appear with their first packet and disappear once
//! they run empty.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::socket::bind_std_for;
use crate::dispatch::{Destination, PacketPump, PumpSettings, SessionKey};

struct QueuedPacket {
    target: SocketAddr,
    data: Vec<u8>,
}

/// Packet pump sending through its own per-family UDP sockets
///
/// Explicit socket handles on a destination are not used; packets always
/// leave through the pump's sockets.
pub struct UdpPacketPump {
    capacity: usize,
    interval: Duration,
    ipv4: UdpSocket,
    ipv6: Option<UdpSocket>,
    queues: Mutex<HashMap<SessionKey, VecDeque<QueuedPacket>>>,
    closed: AtomicBool,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
}

impl UdpPacketPump {
    pub fn new(settings: &PumpSettings) -> io::Result<Self> {
        let ipv4 = bind_std_for(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)), false)?;
        let ipv6 = match bind_std_for(&SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)), false) {
            Ok(socket) => Some(socket),
            Err(e) => {
                warn!("IPv6 send socket unavailable: {}", e);
                None
            }
        };

        if settings.socket_handles.is_some() {
            debug!("UDP pump ignores configured socket handles");
        }

        let (stop_tx, stop_rx) = bounded(1);

        Ok(Self {
            capacity: settings.queue_capacity.max(1),
            interval: settings.packet_interval,
            ipv4,
            ipv6,
            queues: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
        })
    }

    /// Factory function for [`SendScheduler`](crate::dispatch::SendScheduler)
    pub fn create(settings: &PumpSettings) -> io::Result<Arc<dyn PacketPump>> {
        Ok(Arc::new(Self::new(settings)?))
    }

    /// Pop the head of every queue, dropping queues that become empty
    fn take_due_packets(&self) -> Vec<QueuedPacket> {
        let mut queues = self.queues.lock();
        let mut due = Vec::with_capacity(queues.len());

        queues.retain(|_, queue| {
            if let Some(packet) = queue.pop_front() {
                due.push(packet);
            }
            !queue.is_empty()
        });

        due
    }

    fn send(&self, packet: &QueuedPacket) {
        let socket = match (packet.target, &self.ipv6) {
            (SocketAddr::V4(_), _) => &self.ipv4,
            (SocketAddr::V6(_), Some(socket)) => socket,
            (SocketAddr::V6(_), None) => {
                trace!("Dropping packet for {}: no IPv6 socket", packet.target);
                return;
            }
        };

        if let Err(e) = socket.send_to(&packet.data, packet.target) {
            trace!("Send to {} failed: {}", packet.target, e);
        }
    }
}

impl PacketPump for UdpPacketPump {
    fn remaining_capacity(&self, key: SessionKey) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }

        let queues = self.queues.lock();
        let used = queues.get(&key).map_or(0, VecDeque::len);
        self.capacity.saturating_sub(used)
    }

    fn queue_packet(&self, key: SessionKey, destination: &Destination, packet: &[u8]) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let mut queues = self.queues.lock();
        let queue = queues.entry(key).or_default();
        if queue.len() >= self.capacity {
            return false;
        }

        queue.push_back(QueuedPacket {
            target: destination.address,
            data: packet.to_vec(),
        });
        true
    }

    fn delete_queue(&self, key: SessionKey) {
        self.queues.lock().remove(&key);
    }

    fn drain(&self) {
        debug!("UDP pump draining every {:?}", self.interval);

        while !self.closed.load(Ordering::Acquire) {
            for packet in self.take_due_packets() {
                self.send(&packet);
            }

            match self.stop_rx.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("UDP pump stopped");
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.stop_tx.lock().take();
        self.queues.lock().clear();
    }
}
