//! Dry-run collaborators
//!
//! Stand-ins for the forwarding engine, the OS interface request and the
//! application registry, so the shell runs without a real tunnel. The
//! engine keeps a per-session log file in the storage directory and runs a
//! heartbeat task on its own tokio runtime while active.

use crate::config::{AppEntry, NeighborEntry};
use cute_vpn::{
    AppRegistry, Engine, EngineError, EngineParams, Establishment, InstalledApp, InterfaceError,
    NeighborSnapshot, TunnelConfig, TunnelDescriptor, TunnelInterface, LOG_FILE_PREFIX,
};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

/// Asked when the interface request reports missing permission
pub trait PermissionPrompt: Send + Sync {
    /// Ask the user; returns whether permission is now granted
    fn request(&self) -> bool;
}

/// Shared, append-only session log
#[derive(Clone)]
struct SessionLog {
    file: Arc<Mutex<File>>,
}

impl SessionLog {
    fn create(dir: &Path) -> io::Result<(Self, PathBuf)> {
        fs::create_dir_all(dir)?;
        let name = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year][month][day]-[hour][minute][second]"
            ))
            .map_err(io::Error::other)?;
        let path = dir.join(format!("{}{}.txt", LOG_FILE_PREFIX, name));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((
            Self {
                file: Arc::new(Mutex::new(file)),
            },
            path,
        ))
    }

    fn append(&self, message: &str) {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown-time".to_string());
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "{} | {}", timestamp, message) {
            warn!("Cannot write engine log: {}", e);
        }
    }
}

/// Running session state
struct Session {
    /// Heartbeat runtime; dropped on stop
    runtime: Runtime,
    /// Held until stop, which releases the interface
    descriptor: TunnelDescriptor,
    gateway: Arc<Mutex<String>>,
    log: SessionLog,
}

/// Engine that relays nothing but behaves like the real one
pub struct DryRunEngine {
    neighbors: Vec<NeighborEntry>,
    heartbeat: Duration,
    session: Mutex<Option<Session>>,
}

impl DryRunEngine {
    pub fn new(neighbors: Vec<NeighborEntry>, heartbeat: Duration) -> Self {
        Self {
            neighbors,
            heartbeat,
            session: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> NeighborSnapshot {
        NeighborSnapshot::new(
            self.neighbors
                .iter()
                .map(|n| (n.address, n.name.clone())),
        )
    }

    /// Spawn the heartbeat task
    fn spawn_heartbeat(&self, runtime: &Runtime, gateway: Arc<Mutex<String>>, log: SessionLog) {
        let period = self.heartbeat;
        let neighbor_count = self.neighbors.len();

        runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;

                let gateway = gateway.lock().unwrap_or_else(|e| e.into_inner()).clone();
                debug!("Dry-run heartbeat via {}", gateway);
                log.append(&format!(
                    "heartbeat gateway={} neighbors={}",
                    gateway, neighbor_count
                ));
            }
        });
    }
}

impl Engine for DryRunEngine {
    fn start(&self, descriptor: TunnelDescriptor, params: EngineParams) -> Result<(), EngineError> {
        let mut session = self.lock();
        if session.is_some() {
            return Err(EngineError::StartFailed("engine already running".into()));
        }
        if params.links.is_empty() {
            return Err(EngineError::StartFailed("no links configured".into()));
        }

        let (log, path) = SessionLog::create(&params.storage_dir)
            .map_err(|e| EngineError::StartFailed(format!("cannot open log: {}", e)))?;
        log.append("hello");
        log.append(&format!(
            "name={} address={} gateway={} fd={}",
            params.local_name,
            params.local_address,
            params.gateway,
            descriptor.fd()
        ));
        for link in &params.links {
            log.append(&format!("link {}", link));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("dry-run-engine")
            .enable_time()
            .build()
            .map_err(|e| EngineError::StartFailed(e.to_string()))?;

        let gateway = Arc::new(Mutex::new(params.gateway.clone()));
        self.spawn_heartbeat(&runtime, gateway.clone(), log.clone());

        info!("Dry-run engine started, logging to {}", path.display());
        *session = Some(Session {
            runtime,
            descriptor,
            gateway,
            log,
        });
        Ok(())
    }

    fn stop(&self) {
        let Some(session) = self.lock().take() else {
            return;
        };

        session.log.append("bye");
        session.runtime.shutdown_timeout(Duration::from_secs(1));
        drop(session.descriptor);
        info!("Dry-run engine stopped");
    }

    fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    fn update_gateway(&self, address: Ipv4Addr) -> Result<(), EngineError> {
        let session = self.lock();
        let Some(session) = session.as_ref() else {
            return Err(EngineError::NotRunning);
        };
        if !self.neighbors.iter().any(|n| n.address == address) {
            return Err(EngineError::GatewayRejected(format!(
                "{} is not a neighbor",
                address
            )));
        }

        *session.gateway.lock().unwrap_or_else(|e| e.into_inner()) = address.to_string();
        session.log.append(&format!("gateway -> {}", address));
        Ok(())
    }

    fn neighbors(&self) -> NeighborSnapshot {
        if self.is_running() {
            self.snapshot()
        } else {
            NeighborSnapshot::empty()
        }
    }
}

/// Interface request that hands out fake descriptors
pub struct DryRunInterface {
    permission: AtomicBool,
    installed: BTreeSet<String>,
    next_fd: AtomicI32,
}

impl DryRunInterface {
    /// `installed` ids are the only apps that can be excluded
    pub fn new(permission_granted: bool, installed: impl IntoIterator<Item = String>) -> Self {
        Self {
            permission: AtomicBool::new(permission_granted),
            installed: installed.into_iter().collect(),
            next_fd: AtomicI32::new(3),
        }
    }
}

impl TunnelInterface for DryRunInterface {
    fn establish(&self, config: &TunnelConfig) -> Result<Establishment, InterfaceError> {
        if !self.permission.load(Ordering::SeqCst) {
            return Err(InterfaceError::PermissionDenied);
        }

        let skipped_apps = config
            .excluded_app_ids
            .iter()
            .filter(|id| !self.installed.contains(*id))
            .cloned()
            .collect();

        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        info!(
            "Interface {}/{} up (dns {}, mtu {}, session {:?}, fd {})",
            config.local_address,
            config.prefix_length,
            config.dns_server,
            config.mtu,
            config.session_label,
            fd
        );

        Ok(Establishment {
            descriptor: TunnelDescriptor::new(fd, |fd| info!("Interface fd {} released", fd)),
            skipped_apps,
        })
    }
}

impl PermissionPrompt for DryRunInterface {
    fn request(&self) -> bool {
        info!("VPN permission granted");
        self.permission.store(true, Ordering::SeqCst);
        true
    }
}

/// Application registry backed by the shell configuration
pub struct ConfiguredApps {
    apps: Vec<AppEntry>,
}

impl ConfiguredApps {
    pub fn new(apps: Vec<AppEntry>) -> Self {
        Self { apps }
    }
}

impl AppRegistry for ConfiguredApps {
    fn installed(&self) -> Vec<InstalledApp> {
        self.apps
            .iter()
            .map(|app| InstalledApp {
                display_name: app.name.clone(),
                package_id: app.package.clone(),
                system: app.system,
            })
            .collect()
    }
}
