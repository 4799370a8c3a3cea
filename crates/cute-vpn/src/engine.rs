//! Engine and OS interface seams
//!
//! The packet-forwarding engine and the OS tunnel-interface request live
//! outside this crate. The session manager only talks to them through the
//! traits below.
//!
//! ```text
//!   TunnelConfig ──▶ TunnelInterface::establish ──▶ TunnelDescriptor
//!                                                         │
//!   EngineParams ─────────────────────────────────────────┤
//!                                                         ▼
//!                                                  Engine::start
//! ```

use crate::config::{EngineParams, TunnelConfig};
use crate::neighbor::NeighborSnapshot;
use std::fmt;
use std::net::Ipv4Addr;

/// Raw descriptor of an established tunnel interface
///
/// Owns the descriptor: dropping it runs the release hook (closing the
/// interface). [`TunnelDescriptor::into_raw`] hands ownership to the engine.
pub struct TunnelDescriptor {
    fd: i32,
    release: Option<Box<dyn FnOnce(i32) + Send>>,
}

impl TunnelDescriptor {
    /// Wrap a descriptor with the hook that releases it
    pub fn new(fd: i32, release: impl FnOnce(i32) + Send + 'static) -> Self {
        Self {
            fd,
            release: Some(Box::new(release)),
        }
    }

    /// Raw descriptor value
    pub fn fd(&self) -> i32 {
        self.fd
    }

    /// Detach the raw descriptor; the caller becomes responsible for it
    pub fn into_raw(mut self) -> i32 {
        self.release = None;
        self.fd
    }
}

impl fmt::Debug for TunnelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelDescriptor")
            .field("fd", &self.fd)
            .field("owned", &self.release.is_some())
            .finish()
    }
}

impl Drop for TunnelDescriptor {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.fd);
        }
    }
}

/// Result of a successful interface request
#[derive(Debug)]
pub struct Establishment {
    pub descriptor: TunnelDescriptor,
    /// Excluded application ids the OS did not recognize
    pub skipped_apps: Vec<String>,
}

/// OS tunnel-interface request
pub trait TunnelInterface: Send + Sync {
    /// Create the tunnel interface described by `config`
    ///
    /// Unknown excluded applications must not fail the request; they are
    /// reported back in [`Establishment::skipped_apps`].
    fn establish(&self, config: &TunnelConfig) -> Result<Establishment, InterfaceError>;
}

/// Packet-forwarding engine
pub trait Engine: Send + Sync {
    /// Start relaying packets over `descriptor`; may block
    fn start(&self, descriptor: TunnelDescriptor, params: EngineParams) -> Result<(), EngineError>;

    /// Stop relaying; returns once the engine is down
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Route through a different gateway without touching the interface
    fn update_gateway(&self, address: Ipv4Addr) -> Result<(), EngineError>;

    /// Current gateway candidates
    fn neighbors(&self) -> NeighborSnapshot;
}

/// Interface request errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum InterfaceError {
    #[error("VPN permission not granted")]
    PermissionDenied,

    #[error("Another VPN is already active")]
    AlreadyBound,

    #[error("Address conflict: {0}")]
    AddressConflict(String),

    #[error("Interface setup failed: {0}")]
    Failed(String),
}

/// Engine errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Engine start failed: {0}")]
    StartFailed(String),

    #[error("Engine panicked: {0}")]
    Panicked(String),

    #[error("Engine not running")]
    NotRunning,

    #[error("Gateway update failed: {0}")]
    GatewayRejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_descriptor_released_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();

        let descriptor = TunnelDescriptor::new(7, move |fd| {
            assert_eq!(fd, 7);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(descriptor);

        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_into_raw_detaches() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();

        let descriptor = TunnelDescriptor::new(9, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(descriptor.into_raw(), 9);

        assert_eq!(released.load(Ordering::SeqCst), 0);
    }
}
