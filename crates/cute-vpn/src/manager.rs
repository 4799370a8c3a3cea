//! Session Manager
//!
//! Owns the tunnel session state machine and the single-flight discipline.
//!
//! ```text
//!            start()                 engine ok
//!   Idle ─────────────▶ Establishing ─────────▶ Active ◀─┐ switch_gateway()
//!    ▲                       │                   │  └────┘
//!    │   interface/engine    │                   │ stop()
//!    ├───────── error ───────┘                   ▼
//!    └──────────────────────────────────────── Stopping
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = SessionManager::new(settings, engine, interface, "com.example.vpn", dir);
//! manager.start()?;
//! assert!(manager.is_running());
//! manager.stop()?;
//! ```
//!
//! Only one lifecycle operation may be in flight at a time. A second
//! request is rejected with [`SessionError::Busy`] instead of queued.

use crate::config::{ConfigError, TunnelConfigBuilder};
use crate::engine::{Engine, EngineError, Establishment, InterfaceError, TunnelInterface};
use crate::neighbor::{NeighborRecord, NeighborSnapshot};
use crate::settings::{SettingKey, SettingsStore};
use std::net::Ipv4Addr;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No tunnel
    Idle,
    /// Interface being created or engine starting
    Establishing,
    /// Engine relaying traffic
    Active,
    /// Engine shutting down
    Stopping,
}

impl SessionState {
    /// Check if the tunnel is up
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

/// Result of a gateway switch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// Engine accepted the new gateway and it was saved
    Updated(Ipv4Addr),
    /// No tunnel to switch
    NotRunning,
}

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Another session operation is in progress")]
    Busy,

    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("VPN permission required")]
    PermissionRequired,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Interface error: {0}")]
    Interface(InterfaceError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

impl SessionError {
    /// Whether the caller must re-request VPN permission before retrying
    pub fn is_permission_required(&self) -> bool {
        matches!(self, SessionError::PermissionRequired)
    }
}

impl From<InterfaceError> for SessionError {
    fn from(e: InterfaceError) -> Self {
        match e {
            InterfaceError::PermissionDenied => SessionError::PermissionRequired,
            other => SessionError::Interface(other),
        }
    }
}

/// Single-flight token; the slot is freed when the token drops
pub(crate) struct Flight {
    busy: Arc<AtomicBool>,
}

impl Drop for Flight {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Session Manager
///
/// A single long-lived instance, shared as `Arc<SessionManager>` with
/// whatever front-end drives it.
pub struct SessionManager {
    /// Persisted settings
    settings: Arc<SettingsStore>,
    /// Packet-forwarding engine
    engine: Arc<dyn Engine>,
    /// OS interface request
    interface: Arc<dyn TunnelInterface>,
    /// Settings -> tunnel configuration
    builder: TunnelConfigBuilder,
    /// Directory handed to the engine
    storage_dir: PathBuf,
    /// Current state
    state: Mutex<SessionState>,
    /// Is a lifecycle operation in flight?
    busy: Arc<AtomicBool>,
}

impl SessionManager {
    /// Create an idle session manager
    pub fn new(
        settings: Arc<SettingsStore>,
        engine: Arc<dyn Engine>,
        interface: Arc<dyn TunnelInterface>,
        host_app_id: impl Into<String>,
        storage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            engine,
            interface,
            builder: TunnelConfigBuilder::new(host_app_id),
            storage_dir: storage_dir.into(),
            state: Mutex::new(SessionState::Idle),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Check if the tunnel is active
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Establish the interface and start the engine; blocks until done
    pub fn start(&self) -> Result<(), SessionError> {
        let flight = self.begin()?;
        self.run_start(flight)
    }

    /// Stop the engine; a no-op when idle
    pub fn stop(&self) -> Result<(), SessionError> {
        let flight = self.begin()?;
        self.run_stop(flight)
    }

    /// Route through `candidate` without tearing down the interface
    pub fn switch_gateway(&self, candidate: &NeighborRecord) -> Result<GatewayOutcome, SessionError> {
        let flight = self.begin()?;
        self.run_switch_gateway(flight, candidate)
    }

    /// Current gateway candidates; empty while not running
    pub fn neighbors(&self) -> NeighborSnapshot {
        if self.is_running() {
            self.engine.neighbors()
        } else {
            NeighborSnapshot::empty()
        }
    }

    /// Drop back to idle if the engine went down on its own
    ///
    /// Returns whether the session is running afterwards.
    pub fn reconcile(&self) -> bool {
        let Ok(_flight) = self.begin() else {
            return self.is_running();
        };

        let mut state = self.lock_state();
        if state.is_active() && !self.engine.is_running() {
            warn!("Engine stopped on its own, session now idle");
            *state = SessionState::Idle;
        }
        state.is_active()
    }

    /// Claim the single-flight slot
    pub(crate) fn begin(&self) -> Result<Flight, SessionError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Rejecting session request, another operation is in flight");
            return Err(SessionError::Busy);
        }
        Ok(Flight {
            busy: self.busy.clone(),
        })
    }

    pub(crate) fn run_start(&self, _flight: Flight) -> Result<(), SessionError> {
        {
            let mut state = self.lock_state();
            if *state != SessionState::Idle {
                return Err(SessionError::InvalidState {
                    operation: "start",
                    state: *state,
                });
            }
            *state = SessionState::Establishing;
        }

        info!("Starting VPN session");
        match self.establish_and_start() {
            Ok(()) => {
                self.set_state(SessionState::Active);
                info!("VPN session active");
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Idle);
                error!("VPN session failed to start: {}", e);
                Err(e)
            }
        }
    }

    pub(crate) fn run_stop(&self, _flight: Flight) -> Result<(), SessionError> {
        {
            let mut state = self.lock_state();
            match *state {
                SessionState::Idle => {
                    debug!("Stop requested while idle");
                    return Ok(());
                }
                SessionState::Active => *state = SessionState::Stopping,
                other => {
                    return Err(SessionError::InvalidState {
                        operation: "stop",
                        state: other,
                    });
                }
            }
        }

        info!("Stopping VPN session");
        let engine = self.engine.clone();
        if let Err(panic_info) = panic::catch_unwind(AssertUnwindSafe(|| engine.stop())) {
            error!("Engine panicked while stopping: {}", panic_message(panic_info));
        }

        self.set_state(SessionState::Idle);
        info!("VPN session stopped");
        Ok(())
    }

    pub(crate) fn run_switch_gateway(
        &self,
        _flight: Flight,
        candidate: &NeighborRecord,
    ) -> Result<GatewayOutcome, SessionError> {
        if !self.is_running() {
            debug!("Gateway switch requested while not running");
            return Ok(GatewayOutcome::NotRunning);
        }

        info!("Switching gateway to {} ({})", candidate.address, candidate.display_name);
        self.engine.update_gateway(candidate.address)?;
        self.settings
            .save_string(SettingKey::Gateway, candidate.address.to_string());

        Ok(GatewayOutcome::Updated(candidate.address))
    }

    fn establish_and_start(&self) -> Result<(), SessionError> {
        let config = self.builder.build(&self.settings)?;
        let params = self.builder.engine_params(&self.settings, &self.storage_dir)?;

        debug!(
            "Requesting interface {}/{} ({} excluded apps)",
            config.local_address,
            config.prefix_length,
            config.excluded_app_ids.len()
        );
        let Establishment {
            descriptor,
            skipped_apps,
        } = self.interface.establish(&config)?;

        for app in &skipped_apps {
            warn!("Excluded app {} is not installed, skipping", app);
        }

        // The descriptor moves into the engine; a failing engine drops it,
        // which releases the interface.
        let engine = self.engine.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| engine.start(descriptor, params))) {
            Ok(result) => result.map_err(SessionError::from),
            Err(panic_info) => Err(EngineError::Panicked(panic_message(panic_info)).into()),
        }
    }

    fn set_state(&self, next: SessionState) {
        *self.lock_state() = next;
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn panic_message(panic_info: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEngine, MockInterface, HOST_APP_ID};

    fn manager_with(engine: Arc<MockEngine>, interface: Arc<MockInterface>) -> SessionManager {
        SessionManager::new(
            Arc::new(SettingsStore::in_memory()),
            engine,
            interface,
            HOST_APP_ID,
            "/tmp/cute-vpn-test",
        )
    }

    fn record(address: Ipv4Addr) -> NeighborRecord {
        NeighborRecord {
            id: 0,
            display_name: "peer".to_string(),
            address,
        }
    }

    #[test]
    fn test_session_state() {
        assert!(SessionState::Active.is_active());
        assert!(!SessionState::Establishing.is_active());
    }

    #[test]
    fn test_start_and_stop() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_with(engine.clone(), Arc::new(MockInterface::new()));

        manager.start().unwrap();
        assert!(manager.is_running());
        assert_eq!(engine.start_count(), 1);

        manager.stop().unwrap();
        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(engine.stop_count(), 1);
    }

    #[test]
    fn test_engine_receives_params() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_with(engine.clone(), Arc::new(MockInterface::new()));

        manager.start().unwrap();
        let params = engine.last_params().unwrap();
        assert_eq!(params.gateway, "172.20.0.1");
        assert_eq!(params.links, vec!["tls://hostname:4433"]);
        assert_eq!(params.storage_dir, PathBuf::from("/tmp/cute-vpn-test"));
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_with(engine.clone(), Arc::new(MockInterface::new()));

        manager.stop().unwrap();
        manager.stop().unwrap();

        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(engine.stop_count(), 0);
    }

    #[test]
    fn test_stop_twice_after_active() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_with(engine.clone(), Arc::new(MockInterface::new()));

        manager.start().unwrap();
        manager.stop().unwrap();
        assert_eq!(manager.state(), SessionState::Idle);
        manager.stop().unwrap();
        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(engine.stop_count(), 1);
    }

    #[test]
    fn test_start_while_active_rejected() {
        let engine = Arc::new(MockEngine::new());
        let interface = Arc::new(MockInterface::new());
        let manager = manager_with(engine.clone(), interface.clone());

        manager.start().unwrap();
        let err = manager.start().unwrap_err();

        assert!(matches!(
            err,
            SessionError::InvalidState { state: SessionState::Active, .. }
        ));
        assert_eq!(engine.start_count(), 1);
        assert_eq!(interface.established_count(), 1);
        assert!(manager.is_running());
    }

    #[test]
    fn test_permission_denied() {
        let engine = Arc::new(MockEngine::new());
        let interface = Arc::new(MockInterface::new());
        interface.deny_permission();
        let manager = manager_with(engine.clone(), interface);

        let err = manager.start().unwrap_err();
        assert!(err.is_permission_required());
        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(engine.start_count(), 0);
    }

    #[test]
    fn test_interface_failure_returns_idle() {
        let interface = Arc::new(MockInterface::new());
        interface.fail_with(InterfaceError::AlreadyBound);
        let manager = manager_with(Arc::new(MockEngine::new()), interface);

        let err = manager.start().unwrap_err();
        assert!(matches!(err, SessionError::Interface(InterfaceError::AlreadyBound)));
        assert_eq!(manager.state(), SessionState::Idle);
    }

    #[test]
    fn test_engine_failure_releases_descriptor() {
        let engine = Arc::new(MockEngine::new());
        engine.fail_start("no link reachable");
        let interface = Arc::new(MockInterface::new());
        let manager = manager_with(engine, interface.clone());

        let err = manager.start().unwrap_err();
        assert_eq!(err.to_string(), "Engine start failed: no link reachable");
        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(interface.released_count(), 1);
    }

    #[test]
    fn test_engine_panic_becomes_failure() {
        let engine = Arc::new(MockEngine::new());
        engine.panic_on_start();
        let interface = Arc::new(MockInterface::new());
        let manager = manager_with(engine, interface.clone());

        let err = manager.start().unwrap_err();
        assert!(matches!(err, SessionError::Engine(EngineError::Panicked(_))));
        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(interface.released_count(), 1);

        // Slot was freed
        manager.stop().unwrap();
    }

    #[test]
    fn test_invalid_settings_fail_start() {
        let manager = manager_with(Arc::new(MockEngine::new()), Arc::new(MockInterface::new()));
        manager.settings().save_string(SettingKey::DnsServer, "dns.google");

        let err = manager.start().unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
        assert_eq!(manager.state(), SessionState::Idle);
    }

    #[test]
    fn test_unknown_excluded_app_skipped() {
        let interface = Arc::new(MockInterface::with_installed(["com.example.mail"]));
        let manager = manager_with(Arc::new(MockEngine::new()), interface.clone());

        let mut draft = manager.settings().draft_excluded_apps();
        draft.set("com.example.mail", true);
        draft.set("com.example.removed", true);
        manager.settings().commit_excluded_apps(draft);

        manager.start().unwrap();
        assert!(manager.is_running());

        let config = interface.last_config().unwrap();
        assert!(config.excluded_app_ids.contains(HOST_APP_ID));
        assert!(config.excluded_app_ids.contains("com.example.removed"));
    }

    #[test]
    fn test_excluded_edits_apply_on_next_start() {
        let interface = Arc::new(MockInterface::new());
        let manager = manager_with(Arc::new(MockEngine::new()), interface.clone());

        manager.start().unwrap();
        let mut draft = manager.settings().draft_excluded_apps();
        draft.set("com.late", true);
        manager.settings().commit_excluded_apps(draft);
        assert!(!interface.last_config().unwrap().excluded_app_ids.contains("com.late"));

        manager.stop().unwrap();
        manager.start().unwrap();
        assert!(interface.last_config().unwrap().excluded_app_ids.contains("com.late"));
    }

    #[test]
    fn test_switch_gateway_when_idle() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_with(engine.clone(), Arc::new(MockInterface::new()));

        let outcome = manager
            .switch_gateway(&record(Ipv4Addr::new(172, 20, 0, 5)))
            .unwrap();
        assert_eq!(outcome, GatewayOutcome::NotRunning);
        assert!(engine.gateways().is_empty());
        assert_eq!(
            manager.settings().get_string(SettingKey::Gateway).as_deref(),
            Some("172.20.0.1")
        );
    }

    #[test]
    fn test_switch_gateway_persists_on_success() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_with(engine.clone(), Arc::new(MockInterface::new()));
        manager.start().unwrap();

        let target = Ipv4Addr::new(172, 20, 0, 5);
        let outcome = manager.switch_gateway(&record(target)).unwrap();

        assert_eq!(outcome, GatewayOutcome::Updated(target));
        assert_eq!(engine.gateways(), vec![target]);
        assert_eq!(
            manager.settings().get_string(SettingKey::Gateway).as_deref(),
            Some("172.20.0.5")
        );
        assert!(manager.is_running());
    }

    #[test]
    fn test_switch_gateway_not_persisted_on_failure() {
        let engine = Arc::new(MockEngine::new());
        engine.reject_gateway("unknown neighbor");
        let manager = manager_with(engine, Arc::new(MockInterface::new()));
        manager.start().unwrap();

        let result = manager.switch_gateway(&record(Ipv4Addr::new(172, 20, 0, 5)));
        assert!(result.is_err());
        assert_eq!(
            manager.settings().get_string(SettingKey::Gateway).as_deref(),
            Some("172.20.0.1")
        );
        assert!(manager.is_running());
    }

    #[test]
    fn test_neighbors_only_while_running() {
        let engine = Arc::new(MockEngine::new());
        engine.set_neighbors([(Ipv4Addr::new(172, 20, 0, 2), "desktop")]);
        let manager = manager_with(engine, Arc::new(MockInterface::new()));

        assert!(manager.neighbors().is_empty());
        manager.start().unwrap();
        assert!(!manager.neighbors().is_empty());
    }

    #[test]
    fn test_reconcile_after_engine_exit() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_with(engine.clone(), Arc::new(MockInterface::new()));
        manager.start().unwrap();

        assert!(manager.reconcile());
        engine.simulate_exit();
        assert!(!manager.reconcile());
        assert_eq!(manager.state(), SessionState::Idle);
    }

    #[test]
    fn test_single_flight_rejects_second_claim() {
        let manager = manager_with(Arc::new(MockEngine::new()), Arc::new(MockInterface::new()));

        let flight = manager.begin().unwrap();
        assert!(matches!(manager.start(), Err(SessionError::Busy)));
        assert!(matches!(manager.stop(), Err(SessionError::Busy)));
        drop(flight);

        manager.start().unwrap();
    }
}
