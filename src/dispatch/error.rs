//! Dispatch error types

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors that can occur while scheduling voice sessions
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Send scheduler is closed")]
    SchedulerClosed,

    #[error("Failed to create packet pump: {0}")]
    PumpCreation(#[source] std::io::Error),

    #[error("Failed to spawn {0} thread: {1}")]
    ThreadSpawn(&'static str, #[source] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
