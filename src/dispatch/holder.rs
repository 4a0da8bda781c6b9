//! Connection details assembly and session hot-swap
//!
//! Signaling delivers the key, address and socket handle independently. Each
//! update produces a new [`ConnectionDetails`] snapshot; once a snapshot is
//! complete a fresh [`VoiceSession`] replaces the live one.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use super::config::{HolderConfig, SocketHandle};
use super::frame::{FrameSource, SpeakingSink};
use super::scheduler::{Destination, SendScheduler};
use super::session::VoiceSession;
use crate::crypto::SecretKey;
use crate::protocol::{NonceStrategy, PacketEncoder};

/// Hands out the frame source a session should currently use
pub type FrameSourceSupplier = Arc<dyn Fn() -> Option<Arc<dyn FrameSource>> + Send + Sync>;

/// Immutable snapshot of what is known about a connection
#[derive(Debug, Clone, Default)]
pub struct ConnectionDetails {
    address: Option<SocketAddr>,
    secret_key: Option<SecretKey>,
    ssrc: Option<u32>,
    nonce_strategy: Option<NonceStrategy>,
    explicit_socket: Option<SocketHandle>,
}

impl ConnectionDetails {
    pub fn with_address(&self, address: SocketAddr) -> Self {
        Self {
            address: Some(address),
            ..self.clone()
        }
    }

    pub fn with_secret_key(&self, secret_key: SecretKey) -> Self {
        Self {
            secret_key: Some(secret_key),
            ..self.clone()
        }
    }

    pub fn with_ssrc(&self, ssrc: u32) -> Self {
        Self {
            ssrc: Some(ssrc),
            ..self.clone()
        }
    }

    pub fn with_nonce_strategy(&self, nonce_strategy: NonceStrategy) -> Self {
        Self {
            nonce_strategy: Some(nonce_strategy),
            ..self.clone()
        }
    }

    pub fn with_explicit_socket(&self, handle: SocketHandle) -> Self {
        Self {
            explicit_socket: Some(handle),
            ..self.clone()
        }
    }

    /// Whether a session can be built from this snapshot
    pub fn is_complete(&self, require_explicit_socket: bool) -> bool {
        self.address.is_some()
            && self.secret_key.is_some()
            && self.ssrc.is_some()
            && self.nonce_strategy.is_some()
            && (!require_explicit_socket || self.explicit_socket.is_some())
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn ssrc(&self) -> Option<u32> {
        self.ssrc
    }

    pub fn nonce_strategy(&self) -> Option<NonceStrategy> {
        self.nonce_strategy
    }

    pub fn explicit_socket(&self) -> Option<SocketHandle> {
        self.explicit_socket
    }

    pub fn has_secret_key(&self) -> bool {
        self.secret_key.is_some()
    }
}

/// Owns the live voice session for one connection
pub struct SessionHolder {
    config: HolderConfig,
    scheduler: Arc<SendScheduler>,
    sink: Arc<dyn SpeakingSink>,
    frame_sources: FrameSourceSupplier,
    /// Also serializes updates so only one session is built at a time
    details: Mutex<Arc<ConnectionDetails>>,
    current: RwLock<Option<Arc<VoiceSession>>>,
}

impl SessionHolder {
    pub fn new(
        config: HolderConfig,
        scheduler: Arc<SendScheduler>,
        sink: Arc<dyn SpeakingSink>,
        frame_sources: FrameSourceSupplier,
    ) -> Self {
        Self {
            config,
            scheduler,
            sink,
            frame_sources,
            details: Mutex::new(Arc::new(ConnectionDetails::default())),
            current: RwLock::new(None),
        }
    }

    pub fn on_key_and_strategy_changed(&self, secret_key: SecretKey, strategy: NonceStrategy) {
        self.update_details(|details| {
            details
                .with_secret_key(secret_key)
                .with_nonce_strategy(strategy)
        });
    }

    pub fn on_address_and_ssrc_changed(&self, address: SocketAddr, ssrc: u32) {
        self.update_details(|details| details.with_address(address).with_ssrc(ssrc));
    }

    pub fn on_explicit_socket_handle(&self, handle: SocketHandle) {
        self.update_details(|details| details.with_explicit_socket(handle));
    }

    /// Re-attach the supplier's current frame source to the live session
    pub fn on_frame_source_changed(&self) {
        if let Some(session) = self.current_session() {
            if let Err(e) = session.set_frame_source((self.frame_sources)()) {
                error!("Failed to attach frame source: {}", e);
            }
        }
    }

    /// Tear down the live session and forget all connection details
    pub fn shutdown(&self) {
        let previous = {
            let mut details = self.details.lock();
            *details = Arc::new(ConnectionDetails::default());
            self.current.write().take()
        };

        if let Some(previous) = previous {
            previous.shutdown();
            info!("Voice session holder shut down");
        }
    }

    pub fn current_session(&self) -> Option<Arc<VoiceSession>> {
        self.current.read().clone()
    }

    pub fn details(&self) -> Arc<ConnectionDetails> {
        self.details.lock().clone()
    }

    fn update_details(&self, update: impl FnOnce(&ConnectionDetails) -> ConnectionDetails) {
        let previous = {
            let mut guard = self.details.lock();
            let details = Arc::new(update(&guard));
            *guard = details.clone();

            if !details.is_complete(self.config.require_explicit_socket_handle) {
                debug!("Connection details incomplete, waiting for more updates");
                return;
            }

            let Some(session) = self.build_session(&details) else {
                return;
            };

            // Announce speaking before the pacer can see the session
            session.initialize();
            if let Err(e) = session.set_frame_source((self.frame_sources)()) {
                error!("Failed to attach frame source to new session: {}", e);
            }

            self.current.write().replace(session)
        };

        // Old session teardown happens outside the update lock
        if let Some(previous) = previous {
            previous.shutdown();
            debug!("Replaced previous voice session");
        }
    }

    fn build_session(&self, details: &ConnectionDetails) -> Option<Arc<VoiceSession>> {
        let (Some(address), Some(secret_key), Some(ssrc), Some(strategy)) = (
            details.address,
            details.secret_key.clone(),
            details.ssrc,
            details.nonce_strategy,
        ) else {
            return None;
        };

        info!(
            "Starting voice session to {} (ssrc {}, mode {})",
            address, ssrc, strategy
        );

        let destination = Destination {
            address,
            explicit_socket: details.explicit_socket,
        };
        let encoder = PacketEncoder::new(secret_key, ssrc, strategy);

        Some(Arc::new(VoiceSession::new(
            self.scheduler.clone(),
            destination,
            encoder,
            self.sink.clone(),
        )))
    }
}

impl Drop for SessionHolder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_details_updates_do_not_mutate_previous() {
        let empty = ConnectionDetails::default();
        let with_address = empty.with_address("10.0.0.1:5000".parse().unwrap());

        assert!(empty.address().is_none());
        assert_eq!(with_address.address(), Some("10.0.0.1:5000".parse().unwrap()));
    }

    #[test]
    fn test_details_completeness() {
        let details = ConnectionDetails::default()
            .with_address("10.0.0.1:5000".parse().unwrap())
            .with_ssrc(42);
        assert!(!details.is_complete(false));

        let details = details
            .with_secret_key(SecretKey::new([1; 32]))
            .with_nonce_strategy(NonceStrategy::IncrementingCounter);
        assert!(details.is_complete(false));
        assert!(!details.is_complete(true));

        let details = details.with_explicit_socket(SocketHandle(17));
        assert!(details.is_complete(true));
    }

    #[test]
    fn test_details_debug_hides_key() {
        let details = ConnectionDetails::default().with_secret_key(SecretKey::new([0xab; 32]));
        let rendered = format!("{:?}", details);
        assert!(!rendered.contains("171"));
        assert!(details.has_secret_key());
    }
}
