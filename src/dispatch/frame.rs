//! Collaborators feeding a voice session
//!
//! A [`FrameSource`] supplies already-encoded Opus frames, a [`SpeakingSink`]
//! is told whenever the session starts or stops speaking.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

/// Opus payload marking a silent 20 ms frame
pub const SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Samples per 20 ms frame at 48 kHz; the RTP timestamp step
pub const OPUS_FRAME_SAMPLES: u32 = 960;

/// Source of encoded audio frames
///
/// Called from the pacing thread while the owning session is locked, so
/// implementations should return quickly and never block on audio.
pub trait FrameSource: Send + Sync {
    /// Write the next frame into `buffer` and return its length
    ///
    /// `Ok(None)` means no frame is ready this tick. Errors are logged by the
    /// session and treated the same way.
    fn provide_frame(&self, buffer: &mut [u8]) -> anyhow::Result<Option<usize>>;

    /// Release resources; called once the session stops using this source
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Receives speaking state transitions
pub trait SpeakingSink: Send + Sync {
    fn on_speaking_changed(&self, speaking: bool);
}

impl<F> SpeakingSink for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_speaking_changed(&self, speaking: bool) {
        self(speaking)
    }
}

/// Frame source fed from a bounded channel
///
/// Frames pushed through the paired [`Sender`] are handed out one per tick.
/// A disconnected sender simply means no more frames.
pub struct ChannelFrameSource {
    frames: Receiver<Vec<u8>>,
}

impl ChannelFrameSource {
    /// Create a source holding at most `capacity` pending frames
    pub fn new(capacity: usize) -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = bounded(capacity);
        (tx, Self { frames: rx })
    }

    /// Number of frames waiting to be sent
    pub fn pending(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ChannelFrameSource {
    fn provide_frame(&self, buffer: &mut [u8]) -> anyhow::Result<Option<usize>> {
        let frame = match self.frames.try_recv() {
            Ok(frame) => frame,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(None),
        };

        if frame.len() > buffer.len() {
            anyhow::bail!(
                "Frame of {} bytes exceeds payload capacity {}",
                frame.len(),
                buffer.len()
            );
        }

        buffer[..frame.len()].copy_from_slice(&frame);
        Ok(Some(frame.len()))
    }
}
