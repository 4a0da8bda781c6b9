//! Voice packet dispatch
//!
//! Speaking state per session, connection hot-swap and the shared pacing
//! clock that feeds an external packet pump.

mod config;
mod error;
mod frame;
mod holder;
mod scheduler;
mod session;

pub use config::{HolderConfig, SchedulerConfig, SocketHandle, SocketHandles};
pub use error::DispatchError;
pub use frame::{ChannelFrameSource, FrameSource, SpeakingSink, OPUS_FRAME_SAMPLES, SILENCE_FRAME};
pub use holder::{ConnectionDetails, FrameSourceSupplier, SessionHolder};
pub use scheduler::{
    Destination, PacketProducer, PacketPump, PumpFactory, PumpSettings, SendScheduler, SessionKey,
};
pub use session::{SessionState, SpeakingPhase, VoiceSession};
