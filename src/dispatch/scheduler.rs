//! Shared pacing clock for all active voice sessions
//!
//! The first registered session starts two threads: a pacer that fills every
//! session's pump queue at a fixed delay, and a pump thread blocked in
//! [`PacketPump::drain`]. Removing the last session stops both again.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use super::config::{SchedulerConfig, SocketHandle, SocketHandles};
use super::error::DispatchError;
use crate::protocol::MAX_PACKET_LENGTH;

/// Identifies one session's queue inside the pump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(u64);

impl SessionKey {
    /// Rebuild a key from its raw value, e.g. when a pump stores keys natively
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a session's packets go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub address: SocketAddr,
    /// Socket a custom pump should send through; `UdpPacketPump` ignores it
    pub explicit_socket: Option<SocketHandle>,
}

impl Destination {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            explicit_socket: None,
        }
    }
}

/// Fixed-rate packet sender fed by the scheduler
///
/// Queues are created on the first queued packet and hold at most the
/// configured capacity. A queue that does not exist yet reports the full
/// capacity as remaining.
pub trait PacketPump: Send + Sync {
    /// Free slots in the queue for `key`
    fn remaining_capacity(&self, key: SessionKey) -> usize;

    /// Append a packet; false when the queue is full or the pump is closed
    fn queue_packet(&self, key: SessionKey, destination: &Destination, packet: &[u8]) -> bool;

    /// Drop the queue for `key` and anything still in it
    fn delete_queue(&self, key: SessionKey);

    /// Send queued packets at the packet interval until [`close`](Self::close)
    fn drain(&self);

    fn close(&self);
}

/// Settings a pump is created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpSettings {
    pub queue_capacity: usize,
    pub packet_interval: Duration,
    pub socket_handles: Option<SocketHandles>,
}

/// Creates a fresh pump each time pacing starts
pub trait PumpFactory: Send + Sync {
    fn create(&self, settings: &PumpSettings) -> io::Result<Arc<dyn PacketPump>>;
}

impl<F> PumpFactory for F
where
    F: Fn(&PumpSettings) -> io::Result<Arc<dyn PacketPump>> + Send + Sync,
{
    fn create(&self, settings: &PumpSettings) -> io::Result<Arc<dyn PacketPump>> {
        self(settings)
    }
}

/// A session the scheduler pulls packets from
pub trait PacketProducer: Send + Sync {
    fn destination(&self) -> Destination;

    /// Write the next packet into `out`; false when there is nothing to send
    fn produce_packet(&self, out: &mut Vec<u8>, realtime: bool) -> bool;
}

type Producers = RwLock<HashMap<SessionKey, Arc<dyn PacketProducer>>>;

/// Running pacer and pump threads
struct Pacing {
    pump: Arc<dyn PacketPump>,
    stop_tx: Sender<()>,
    pacer: JoinHandle<()>,
    pump_thread: JoinHandle<()>,
}

impl Pacing {
    fn stop(self) {
        self.pump.close();
        drop(self.stop_tx);

        for handle in [self.pacer, self.pump_thread] {
            // Stopping from inside a callback on one of our own threads
            if handle.thread().id() == thread::current().id() {
                continue;
            }

            let name = handle.thread().name().unwrap_or("voice").to_string();
            if handle.join().is_err() {
                warn!("Thread {} panicked", name);
            }
        }

        info!("Voice pacing stopped");
    }
}

struct Lifecycle {
    closed: bool,
    next_key: u64,
    pacing: Option<Pacing>,
}

/// Drives packet production for every registered session
pub struct SendScheduler {
    config: SchedulerConfig,
    factory: Arc<dyn PumpFactory>,
    producers: Arc<Producers>,
    lifecycle: Mutex<Lifecycle>,
}

impl SendScheduler {
    pub fn new(config: SchedulerConfig, factory: Arc<dyn PumpFactory>) -> Self {
        Self {
            config: config.validated(),
            factory,
            producers: Arc::new(RwLock::new(HashMap::new())),
            lifecycle: Mutex::new(Lifecycle {
                closed: false,
                next_key: 0,
                pacing: None,
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Add a session, starting the pacing threads if it is the first one
    pub fn register(&self, producer: Arc<dyn PacketProducer>) -> Result<SessionKey, DispatchError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.closed {
            return Err(DispatchError::SchedulerClosed);
        }

        if lifecycle.pacing.is_none() {
            lifecycle.pacing = Some(self.start_pacing()?);
        }

        lifecycle.next_key += 1;
        let key = SessionKey(lifecycle.next_key);
        self.producers.write().insert(key, producer);

        debug!("Registered voice session {}", key);
        Ok(key)
    }

    /// Remove a session and its pump queue, stopping pacing after the last one
    pub fn deregister(&self, key: SessionKey) {
        let stopped = {
            let mut lifecycle = self.lifecycle.lock();
            let removed = self.producers.write().remove(&key).is_some();

            if let Some(pacing) = &lifecycle.pacing {
                pacing.pump.delete_queue(key);
            }

            if removed {
                debug!("Deregistered voice session {}", key);
            }

            if removed && self.producers.read().is_empty() {
                lifecycle.pacing.take()
            } else {
                None
            }
        };

        if let Some(pacing) = stopped {
            pacing.stop();
        }
    }

    /// Stop pacing for good; later registrations fail
    pub fn close(&self) {
        let stopped = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.closed = true;
            lifecycle.pacing.take()
        };

        if let Some(pacing) = stopped {
            pacing.stop();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.lock().closed
    }

    /// Whether the pacer and pump threads are currently running
    pub fn is_pacing(&self) -> bool {
        self.lifecycle.lock().pacing.is_some()
    }

    pub fn session_count(&self) -> usize {
        self.producers.read().len()
    }

    fn start_pacing(&self) -> Result<Pacing, DispatchError> {
        let settings = PumpSettings {
            queue_capacity: self.config.queue_capacity(),
            packet_interval: self.config.packet_interval(),
            socket_handles: self.config.socket_handles,
        };
        let pump = self
            .factory
            .create(&settings)
            .map_err(DispatchError::PumpCreation)?;

        let pump_thread = thread::Builder::new()
            .name("voice-pump".to_string())
            .spawn({
                let pump = pump.clone();
                move || pump.drain()
            })
            .map_err(|e| DispatchError::ThreadSpawn("voice-pump", e))?;

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let pacer = thread::Builder::new().name("voice-pacer".to_string()).spawn({
            let pump = pump.clone();
            let producers = self.producers.clone();
            let interval = self.config.populate_interval();
            let capacity = settings.queue_capacity;
            move || pacer_loop(&producers, pump.as_ref(), capacity, interval, &stop_rx)
        });

        let pacer = match pacer {
            Ok(handle) => handle,
            Err(e) => {
                pump.close();
                if pump_thread.join().is_err() {
                    warn!("Thread voice-pump panicked");
                }
                return Err(DispatchError::ThreadSpawn("voice-pacer", e));
            }
        };

        info!(
            "Voice pacing started (queue capacity {}, packet interval {:?})",
            settings.queue_capacity, settings.packet_interval
        );

        Ok(Pacing {
            pump,
            stop_tx,
            pacer,
            pump_thread,
        })
    }
}

impl Drop for SendScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

fn pacer_loop(
    producers: &Producers,
    pump: &dyn PacketPump,
    capacity: usize,
    interval: Duration,
    stop_rx: &Receiver<()>,
) {
    let mut buffer = Vec::with_capacity(MAX_PACKET_LENGTH);

    loop {
        // Snapshot so session callbacks may (de)register without deadlocking
        let sessions: Vec<_> = producers
            .read()
            .iter()
            .map(|(key, producer)| (*key, producer.clone()))
            .collect();

        for (key, producer) in sessions {
            populate_queue(key, producer.as_ref(), pump, capacity, &mut buffer);
        }

        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("Voice pacer exiting");
}

/// Fill the free slots of one session's queue
fn populate_queue(
    key: SessionKey,
    producer: &dyn PacketProducer,
    pump: &dyn PacketPump,
    capacity: usize,
    buffer: &mut Vec<u8>,
) {
    let remaining = pump.remaining_capacity(key);
    // Only a queue that still holds packets lets a session go quiet
    let realtime = capacity.saturating_sub(remaining) > 0;
    let destination = producer.destination();

    for _ in 0..remaining {
        if !producer.produce_packet(buffer, realtime) {
            break;
        }

        if !pump.queue_packet(key, &destination, buffer) {
            trace!("Pump rejected packet for session {}", key);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Pump that only records what it is given
    #[derive(Default)]
    struct RecordingPump {
        capacity: usize,
        queues: Mutex<HashMap<SessionKey, VecDeque<Vec<u8>>>>,
        deleted: Mutex<Vec<SessionKey>>,
        closed: AtomicBool,
    }

    impl PacketPump for RecordingPump {
        fn remaining_capacity(&self, key: SessionKey) -> usize {
            let queues = self.queues.lock();
            self.capacity - queues.get(&key).map_or(0, VecDeque::len)
        }

        fn queue_packet(&self, key: SessionKey, _: &Destination, packet: &[u8]) -> bool {
            let mut queues = self.queues.lock();
            let queue = queues.entry(key).or_default();
            if self.closed.load(Ordering::SeqCst) || queue.len() >= self.capacity {
                return false;
            }
            queue.push_back(packet.to_vec());
            true
        }

        fn delete_queue(&self, key: SessionKey) {
            self.queues.lock().remove(&key);
            self.deleted.lock().push(key);
        }

        fn drain(&self) {
            while !self.closed.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Producer emitting a fixed number of one-byte packets
    struct CountingProducer {
        limit: usize,
        produced: AtomicUsize,
        realtime_seen: Mutex<Vec<bool>>,
    }

    impl CountingProducer {
        fn new(limit: usize) -> Self {
            Self {
                limit,
                produced: AtomicUsize::new(0),
                realtime_seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl PacketProducer for CountingProducer {
        fn destination(&self) -> Destination {
            Destination::new("127.0.0.1:9".parse().unwrap())
        }

        fn produce_packet(&self, out: &mut Vec<u8>, realtime: bool) -> bool {
            self.realtime_seen.lock().push(realtime);
            let count = self.produced.fetch_add(1, Ordering::SeqCst);
            if count >= self.limit {
                return false;
            }
            out.clear();
            out.push(count as u8);
            true
        }
    }

    fn pump_with_capacity(capacity: usize) -> RecordingPump {
        RecordingPump {
            capacity,
            ..RecordingPump::default()
        }
    }

    #[test]
    fn test_populate_fills_free_slots() {
        let pump = pump_with_capacity(5);
        let producer = CountingProducer::new(100);
        let key = SessionKey(1);
        let mut buffer = Vec::new();

        populate_queue(key, &producer, &pump, 5, &mut buffer);

        assert_eq!(pump.queues.lock()[&key].len(), 5);
        // Empty queue before the batch
        assert!(producer.realtime_seen.lock().iter().all(|r| !r));
    }

    #[test]
    fn test_populate_realtime_when_queue_holds_packets() {
        let pump = pump_with_capacity(5);
        let producer = CountingProducer::new(100);
        let key = SessionKey(1);
        let mut buffer = Vec::new();

        pump.queue_packet(key, &producer.destination(), &[0xaa]);
        populate_queue(key, &producer, &pump, 5, &mut buffer);

        assert_eq!(pump.queues.lock()[&key].len(), 5);
        assert_eq!(producer.realtime_seen.lock().as_slice(), &[true; 4]);
    }

    #[test]
    fn test_populate_stops_on_first_empty_production() {
        let pump = pump_with_capacity(10);
        let producer = CountingProducer::new(3);
        let key = SessionKey(2);
        let mut buffer = Vec::new();

        populate_queue(key, &producer, &pump, 10, &mut buffer);

        assert_eq!(pump.queues.lock()[&key].len(), 3);
        assert_eq!(producer.produced.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_populate_stops_on_rejection() {
        let pump = pump_with_capacity(2);
        pump.close();
        let producer = CountingProducer::new(100);
        let mut buffer = Vec::new();

        populate_queue(SessionKey(3), &producer, &pump, 2, &mut buffer);

        assert_eq!(producer.produced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_session_key_display() {
        assert_eq!(SessionKey(7).to_string(), "#7");
        assert_eq!(SessionKey(7).get(), 7);
    }
}
