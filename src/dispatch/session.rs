//! Per-session speaking state and packet production
//!
//! [`SessionState`] decides tick by tick whether to send a real frame, a
//! silence frame or nothing. [`VoiceSession`] wraps it with the session lock,
//! the current frame source and the scheduler registration.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use super::error::DispatchError;
use super::frame::{FrameSource, SpeakingSink, OPUS_FRAME_SAMPLES, SILENCE_FRAME};
use super::scheduler::{Destination, PacketProducer, SendScheduler, SessionKey};
use crate::protocol::PacketEncoder;

/// Silence frames sent per burst once the counter passes this value
const SILENCE_BURST_LIMIT: u32 = 10;

/// Coarse view of [`SessionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakingPhase {
    /// Not speaking, nothing pending
    Idle,
    /// Silence burst right after connecting
    InitialSilence,
    /// Real frames flowing
    Speaking,
    /// Silence burst after speech stopped
    TrailingSilence,
}

/// Speaking/backlog state machine plus the session's packet encoder
pub struct SessionState {
    encoder: PacketEncoder,
    sink: Arc<dyn SpeakingSink>,
    speaking: bool,
    /// `Some(n)` while a silence burst is running
    silence_counter: Option<u32>,
    initial_silence_sent: bool,
    sequence: u16,
    timestamp: u32,
}

impl SessionState {
    pub fn new(encoder: PacketEncoder, sink: Arc<dyn SpeakingSink>) -> Self {
        Self {
            encoder,
            sink,
            speaking: false,
            silence_counter: Some(0),
            initial_silence_sent: false,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Announce speaking right away, before any audio is sent
    pub fn initialize(&mut self) {
        self.set_speaking(true);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn phase(&self) -> SpeakingPhase {
        match (self.silence_counter, self.speaking) {
            (Some(_), _) if !self.initial_silence_sent => SpeakingPhase::InitialSilence,
            (Some(_), _) => SpeakingPhase::TrailingSilence,
            (None, true) => SpeakingPhase::Speaking,
            (None, false) => SpeakingPhase::Idle,
        }
    }

    /// Sequence number of the last produced packet
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Timestamp of the last produced packet
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn encoder(&self) -> &PacketEncoder {
        &self.encoder
    }

    /// Run one tick, writing an encrypted packet into `out` if one is due
    ///
    /// `realtime` is set when the pump queue still held packets before this
    /// batch; only then may the session stop speaking.
    pub fn produce_packet(
        &mut self,
        source: Option<&dyn FrameSource>,
        realtime: bool,
        out: &mut Vec<u8>,
    ) -> bool {
        let Some(payload_length) = self.next_payload(source, realtime) else {
            return false;
        };

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(OPUS_FRAME_SAMPLES);

        match self
            .encoder
            .encode(payload_length, self.sequence, self.timestamp, out)
        {
            Ok(()) => true,
            Err(e) => {
                error!("Encoding voice packet failed: {}", e);
                false
            }
        }
    }

    fn next_payload(&mut self, source: Option<&dyn FrameSource>, realtime: bool) -> Option<usize> {
        let frame = match source {
            Some(source) if self.initial_silence_sent => {
                poll_frame(source, self.encoder.payload_mut())
            }
            _ => None,
        };

        if let Some(length) = frame {
            self.silence_counter = None;
            if !self.speaking {
                self.set_speaking(true);
            }
            return Some(length);
        }

        if let Some(count) = self.silence_counter {
            self.encoder.payload_mut()[..SILENCE_FRAME.len()].copy_from_slice(&SILENCE_FRAME);

            let count = count + 1;
            if count > SILENCE_BURST_LIMIT {
                self.silence_counter = None;
                self.initial_silence_sent = true;
            } else {
                self.silence_counter = Some(count);
            }
            return Some(SILENCE_FRAME.len());
        }

        if self.speaking && realtime {
            self.set_speaking(false);
        }

        None
    }

    fn set_speaking(&mut self, speaking: bool) {
        self.speaking = speaking;
        self.sink.on_speaking_changed(speaking);

        if !speaking {
            self.silence_counter = Some(0);
        }
    }
}

fn poll_frame(source: &dyn FrameSource, buffer: &mut [u8]) -> Option<usize> {
    match source.provide_frame(buffer) {
        Ok(Some(length)) if length <= buffer.len() => Some(length),
        Ok(Some(length)) => {
            error!(
                "Frame source reported {} bytes for a {} byte buffer",
                length,
                buffer.len()
            );
            None
        }
        Ok(None) => None,
        Err(e) => {
            error!("Providing a frame failed: {:#}", e);
            None
        }
    }
}

fn close_frame_source(source: &dyn FrameSource) {
    if let Err(e) = source.close() {
        error!("Failed to close frame source: {:#}", e);
    }
}

struct Control {
    key: Option<SessionKey>,
    shutdown: bool,
}

/// One live voice connection
///
/// Registered with the scheduler while it has a frame source; shut down when
/// replaced or when its holder shuts down.
pub struct VoiceSession {
    destination: Destination,
    scheduler: Arc<SendScheduler>,
    state: Mutex<SessionState>,
    frame_source: RwLock<Option<Arc<dyn FrameSource>>>,
    control: Mutex<Control>,
}

impl VoiceSession {
    pub fn new(
        scheduler: Arc<SendScheduler>,
        destination: Destination,
        encoder: PacketEncoder,
        sink: Arc<dyn SpeakingSink>,
    ) -> Self {
        Self {
            destination,
            scheduler,
            state: Mutex::new(SessionState::new(encoder, sink)),
            frame_source: RwLock::new(None),
            control: Mutex::new(Control {
                key: None,
                shutdown: false,
            }),
        }
    }

    pub fn initialize(&self) {
        self.state.lock().initialize();
    }

    /// Replace the frame source
    ///
    /// `Some` registers the session with the scheduler if needed, `None`
    /// deregisters it. The previous source is closed unless it is the same
    /// one. After shutdown any offered source is closed immediately.
    pub fn set_frame_source(
        self: &Arc<Self>,
        source: Option<Arc<dyn FrameSource>>,
    ) -> Result<(), DispatchError> {
        let mut control = self.control.lock();

        if control.shutdown {
            if let Some(source) = source {
                close_frame_source(source.as_ref());
            }
            return Ok(());
        }

        let previous = std::mem::replace(&mut *self.frame_source.write(), source.clone());

        let result = match (&source, control.key) {
            (Some(_), None) => {
                let producer: Arc<dyn PacketProducer> = self.clone();
                self.scheduler.register(producer).map(|key| {
                    control.key = Some(key);
                })
            }
            (None, Some(key)) => {
                control.key = None;
                self.scheduler.deregister(key);
                Ok(())
            }
            _ => Ok(()),
        };

        if let Some(previous) = previous {
            let unchanged = source
                .as_ref()
                .is_some_and(|s| std::ptr::addr_eq(Arc::as_ptr(s), Arc::as_ptr(&previous)));
            if !unchanged {
                close_frame_source(previous.as_ref());
            }
        }

        result
    }

    /// Deregister and close the frame source; later calls do nothing
    pub fn shutdown(&self) {
        let mut control = self.control.lock();
        if control.shutdown {
            return;
        }
        control.shutdown = true;

        if let Some(key) = control.key.take() {
            self.scheduler.deregister(key);
        }

        if let Some(source) = self.frame_source.write().take() {
            close_frame_source(source.as_ref());
        }

        debug!("Voice session to {} shut down", self.destination.address);
    }

    pub fn is_shut_down(&self) -> bool {
        self.control.lock().shutdown
    }

    /// Scheduler key while registered
    pub fn session_key(&self) -> Option<SessionKey> {
        self.control.lock().key
    }

    pub fn is_speaking(&self) -> bool {
        self.state.lock().is_speaking()
    }

    pub fn phase(&self) -> SpeakingPhase {
        self.state.lock().phase()
    }

    pub fn ssrc(&self) -> u32 {
        self.state.lock().encoder().ssrc()
    }
}

impl PacketProducer for VoiceSession {
    fn destination(&self) -> Destination {
        self.destination
    }

    fn produce_packet(&self, out: &mut Vec<u8>, realtime: bool) -> bool {
        let source = self.frame_source.read().clone();
        self.state
            .lock()
            .produce_packet(source.as_deref(), realtime, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use crate::protocol::{NonceStrategy, PacketDecoder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY: [u8; 32] = [3; 32];

    fn recording_sink() -> (Arc<Mutex<Vec<bool>>>, Arc<dyn SpeakingSink>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink: Arc<dyn SpeakingSink> =
            Arc::new(move |speaking: bool| sink_events.lock().push(speaking));
        (events, sink)
    }

    fn state_with_sink(sink: Arc<dyn SpeakingSink>) -> SessionState {
        let encoder = PacketEncoder::new(SecretKey::new(KEY), 99, NonceStrategy::ReuseHeader);
        SessionState::new(encoder, sink)
    }

    struct Frames {
        frame: Option<Vec<u8>>,
        calls: AtomicUsize,
    }

    impl FrameSource for Frames {
        fn provide_frame(&self, buffer: &mut [u8]) -> anyhow::Result<Option<usize>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.frame.as_ref().map(|frame| {
                buffer[..frame.len()].copy_from_slice(frame);
                frame.len()
            }))
        }
    }

    struct Failing;

    impl FrameSource for Failing {
        fn provide_frame(&self, _: &mut [u8]) -> anyhow::Result<Option<usize>> {
            anyhow::bail!("device unplugged")
        }
    }

    fn decode(out: &[u8]) -> Vec<u8> {
        PacketDecoder::new(SecretKey::new(KEY), NonceStrategy::ReuseHeader)
            .decode(out)
            .unwrap()
            .payload
    }

    #[test]
    fn test_initialize_reports_speaking() {
        let (events, sink) = recording_sink();
        let mut state = state_with_sink(sink);
        assert_eq!(state.phase(), SpeakingPhase::InitialSilence);

        state.initialize();

        assert!(state.is_speaking());
        assert_eq!(events.lock().as_slice(), &[true]);
    }

    #[test]
    fn test_initial_silence_burst_precedes_frames() {
        let (_, sink) = recording_sink();
        let mut state = state_with_sink(sink);
        state.initialize();

        let source = Frames {
            frame: Some(vec![1, 2, 3, 4]),
            calls: AtomicUsize::new(0),
        };
        let mut out = Vec::new();

        for tick in 1..=11 {
            assert!(state.produce_packet(Some(&source), false, &mut out));
            assert_eq!(decode(&out), SILENCE_FRAME, "tick {}", tick);
        }
        // The source is not consulted during the initial burst
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.phase(), SpeakingPhase::Speaking);

        assert!(state.produce_packet(Some(&source), false, &mut out));
        assert_eq!(decode(&out), vec![1, 2, 3, 4]);
        assert!(state.is_speaking());
    }

    #[test]
    fn test_trailing_silence_after_realtime_tick() {
        let (events, sink) = recording_sink();
        let mut state = state_with_sink(sink);
        state.initialize();
        let mut out = Vec::new();

        for _ in 0..11 {
            assert!(state.produce_packet(None, true, &mut out));
        }

        // No frame and a realtime tick: speaking stops, nothing is sent
        assert!(!state.produce_packet(None, true, &mut out));
        assert!(!state.is_speaking());
        assert_eq!(state.phase(), SpeakingPhase::TrailingSilence);
        assert_eq!(events.lock().as_slice(), &[true, false]);

        for _ in 0..11 {
            assert!(state.produce_packet(None, true, &mut out));
            assert_eq!(decode(&out), SILENCE_FRAME);
        }

        assert!(!state.produce_packet(None, true, &mut out));
        assert_eq!(state.phase(), SpeakingPhase::Idle);
        assert_eq!(events.lock().len(), 2);
    }

    #[test]
    fn test_backlog_tick_keeps_speaking() {
        let (_, sink) = recording_sink();
        let mut state = state_with_sink(sink);
        state.initialize();
        let mut out = Vec::new();

        for _ in 0..11 {
            state.produce_packet(None, false, &mut out);
        }

        assert!(!state.produce_packet(None, false, &mut out));
        assert!(state.is_speaking());
        assert_eq!(state.phase(), SpeakingPhase::Speaking);
    }

    #[test]
    fn test_frame_resumes_speaking() {
        let (events, sink) = recording_sink();
        let mut state = state_with_sink(sink);
        state.initialize();
        let mut out = Vec::new();

        for _ in 0..11 {
            state.produce_packet(None, true, &mut out);
        }
        state.produce_packet(None, true, &mut out);
        assert!(!state.is_speaking());

        let source = Frames {
            frame: Some(vec![9; 20]),
            calls: AtomicUsize::new(0),
        };
        assert!(state.produce_packet(Some(&source), true, &mut out));
        assert_eq!(decode(&out), vec![9; 20]);
        assert_eq!(state.phase(), SpeakingPhase::Speaking);
        assert_eq!(events.lock().as_slice(), &[true, false, true]);
    }

    #[test]
    fn test_source_failure_is_treated_as_no_frame() {
        let (_, sink) = recording_sink();
        let mut state = state_with_sink(sink);
        state.initialize();
        let mut out = Vec::new();

        for _ in 0..11 {
            state.produce_packet(Some(&Failing), true, &mut out);
        }

        assert!(!state.produce_packet(Some(&Failing), true, &mut out));
        assert!(!state.is_speaking());
        assert!(state.produce_packet(Some(&Failing), true, &mut out));
        assert_eq!(decode(&out), SILENCE_FRAME);
    }

    #[test]
    fn test_sequence_and_timestamp_advance_per_packet() {
        let (_, sink) = recording_sink();
        let mut state = state_with_sink(sink);
        let mut out = Vec::new();

        state.produce_packet(None, false, &mut out);
        assert_eq!(state.sequence(), 1);
        assert_eq!(state.timestamp(), OPUS_FRAME_SAMPLES);

        state.produce_packet(None, false, &mut out);
        assert_eq!(state.sequence(), 2);
        assert_eq!(state.timestamp(), 2 * OPUS_FRAME_SAMPLES);
        assert_eq!(&out[2..4], &2u16.to_be_bytes());
    }
}
