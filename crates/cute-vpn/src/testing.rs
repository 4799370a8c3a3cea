//! In-memory engine, interface and application registry for tests.
//!
//! Nothing here touches the OS; descriptors are fake numbers whose release
//! is counted.

use crate::apps::{AppRegistry, InstalledApp};
use crate::config::{EngineParams, TunnelConfig};
use crate::engine::{
    Engine, EngineError, Establishment, InterfaceError, TunnelDescriptor, TunnelInterface,
};
use crate::neighbor::NeighborSnapshot;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Host application id used by tests
pub const HOST_APP_ID: &str = "com.github.clmul.cute";

#[derive(Debug, Clone, Default)]
enum StartBehavior {
    #[default]
    Succeed,
    Fail(String),
    Panic,
}

/// Scriptable engine
#[derive(Default)]
pub struct MockEngine {
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    behavior: Mutex<StartBehavior>,
    gate: Mutex<Option<Receiver<()>>>,
    gateway_error: Mutex<Option<String>>,
    gateways: Mutex<Vec<Ipv4Addr>>,
    neighbors: Mutex<NeighborSnapshot>,
    last_params: Mutex<Option<EngineParams>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` fail with `message`
    pub fn fail_start(&self, message: &str) {
        *self.behavior.lock().unwrap() = StartBehavior::Fail(message.to_string());
    }

    /// Make `start` panic
    pub fn panic_on_start(&self) {
        *self.behavior.lock().unwrap() = StartBehavior::Panic;
    }

    /// Block the next `start` until the returned sender fires
    pub fn hold_start(&self) -> Sender<()> {
        let (tx, rx) = bounded(1);
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Make `update_gateway` fail
    pub fn reject_gateway(&self, message: &str) {
        *self.gateway_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_neighbors<'a>(&self, neighbors: impl IntoIterator<Item = (Ipv4Addr, &'a str)>) {
        *self.neighbors.lock().unwrap() =
            NeighborSnapshot::new(neighbors.into_iter().map(|(a, n)| (a, n.to_string())));
    }

    /// Engine goes down without being asked
    pub fn simulate_exit(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn gateways(&self) -> Vec<Ipv4Addr> {
        self.gateways.lock().unwrap().clone()
    }

    pub fn last_params(&self) -> Option<EngineParams> {
        self.last_params.lock().unwrap().clone()
    }
}

impl Engine for MockEngine {
    fn start(&self, descriptor: TunnelDescriptor, params: EngineParams) -> Result<(), EngineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params);

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            StartBehavior::Succeed => {}
            StartBehavior::Fail(message) => {
                return Err(EngineError::StartFailed(message));
            }
            StartBehavior::Panic => panic!("engine exploded"),
        }

        // Engine owns the descriptor from here on
        let _fd = descriptor.into_raw();
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn update_gateway(&self, address: Ipv4Addr) -> Result<(), EngineError> {
        if let Some(message) = &*self.gateway_error.lock().unwrap() {
            return Err(EngineError::GatewayRejected(message.clone()));
        }
        self.gateways.lock().unwrap().push(address);
        Ok(())
    }

    fn neighbors(&self) -> NeighborSnapshot {
        self.neighbors.lock().unwrap().clone()
    }
}

/// Scriptable OS interface
pub struct MockInterface {
    permission: AtomicBool,
    failure: Mutex<Option<InterfaceError>>,
    /// Installed application ids; `None` accepts every id
    installed: Option<BTreeSet<String>>,
    next_fd: AtomicI32,
    established: AtomicUsize,
    released: Arc<AtomicUsize>,
    last_config: Mutex<Option<TunnelConfig>>,
}

impl MockInterface {
    pub fn new() -> Self {
        Self {
            permission: AtomicBool::new(true),
            failure: Mutex::new(None),
            installed: None,
            next_fd: AtomicI32::new(10),
            established: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            last_config: Mutex::new(None),
        }
    }

    /// Interface that only knows the given application ids (plus the host)
    pub fn with_installed<'a>(apps: impl IntoIterator<Item = &'a str>) -> Self {
        let mut installed: BTreeSet<String> = apps.into_iter().map(str::to_string).collect();
        installed.insert(HOST_APP_ID.to_string());
        Self {
            installed: Some(installed),
            ..Self::new()
        }
    }

    pub fn deny_permission(&self) {
        self.permission.store(false, Ordering::SeqCst);
    }

    pub fn fail_with(&self, error: InterfaceError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn established_count(&self) -> usize {
        self.established.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<TunnelConfig> {
        self.last_config.lock().unwrap().clone()
    }
}

impl Default for MockInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelInterface for MockInterface {
    fn establish(&self, config: &TunnelConfig) -> Result<Establishment, InterfaceError> {
        if !self.permission.load(Ordering::SeqCst) {
            return Err(InterfaceError::PermissionDenied);
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        *self.last_config.lock().unwrap() = Some(config.clone());
        let skipped_apps = match &self.installed {
            Some(installed) => config
                .excluded_app_ids
                .iter()
                .filter(|id| !installed.contains(*id))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        self.established.fetch_add(1, Ordering::SeqCst);
        let released = self.released.clone();
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        Ok(Establishment {
            descriptor: TunnelDescriptor::new(fd, move |_| {
                released.fetch_add(1, Ordering::SeqCst);
            }),
            skipped_apps,
        })
    }
}

/// Fixed application list
pub struct StaticRegistry {
    apps: Vec<InstalledApp>,
}

impl StaticRegistry {
    /// Build from `(display name, package id, system)` triples
    pub fn new<'a>(apps: impl IntoIterator<Item = (&'a str, &'a str, bool)>) -> Self {
        Self {
            apps: apps
                .into_iter()
                .map(|(name, id, system)| InstalledApp {
                    display_name: name.to_string(),
                    package_id: id.to_string(),
                    system,
                })
                .collect(),
        }
    }
}

impl AppRegistry for StaticRegistry {
    fn installed(&self) -> Vec<InstalledApp> {
        self.apps.clone()
    }
}

/// Fresh, not-yet-created directory under the system temp dir
pub fn scratch_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "cute-vpn-{}-{}-{}",
        name,
        std::process::id(),
        n
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}
