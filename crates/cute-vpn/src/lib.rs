//! Cute VPN - Session Lifecycle and Tunnel Configuration
//!
//! Turns persisted settings into a tunnel interface configuration, hands
//! the established interface to an external forwarding engine, and tracks
//! the session across asynchronous start/stop/gateway-switch requests
//! issued by a front-end.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Front-end thread                                            │
//! │    SettingsStore ◀── edits       Dispatcher ──▶ poll_outcomes│
//! └────────┬───────────────────────────────┬─────────────▲───────┘
//!          │                               │ Request     │ Outcome
//!          ▼                               ▼             │
//!   TunnelConfigBuilder ──────────▶ SessionManager (worker threads)
//!                                    │            │
//!                    TunnelInterface │            │ Engine
//!                       (OS request) ▼            ▼ (packet relay)
//! ```
//!
//! # Features
//!
//! - **Default seeding**: every setting has a value from the first read
//! - **Self-exclusion**: the host application never routes through its own tunnel
//! - **Single-flight**: one lifecycle operation at a time, extras rejected
//! - **Live gateway switch**: change gateway without re-creating the interface

mod apps;
mod config;
mod dispatch;
mod engine;
mod log_viewer;
mod manager;
mod menu;
mod message;
mod neighbor;
mod settings;

#[cfg(any(test, feature = "mock"))]
pub mod testing;

pub use apps::{list_eligible_applications, AppRegistry, ApplicationRecord, InstalledApp};
pub use config::{
    parse_links, ConfigError, EngineParams, Ipv4Cidr, TunnelConfig, TunnelConfigBuilder,
    PREFIX_LENGTH, SESSION_LABEL, TUNNEL_MTU,
};
pub use dispatch::Dispatcher;
pub use engine::{
    Engine, EngineError, Establishment, InterfaceError, TunnelDescriptor, TunnelInterface,
};
pub use log_viewer::{latest_log, latest_log_path, LOG_FILE_PREFIX};
pub use manager::{GatewayOutcome, SessionError, SessionManager, SessionState};
pub use menu::{setting_list, Editor, SettingEntry, SettingItem, SettingKind};
pub use message::{Outcome, Request};
pub use neighbor::{gateway_choices, NeighborDirectory, NeighborRecord, NeighborSnapshot};
pub use settings::{ExcludedAppsDraft, SettingKey, SettingsError, SettingsStore};
