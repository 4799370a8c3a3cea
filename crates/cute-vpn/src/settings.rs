//! Settings Store
//!
//! Typed access to the persisted key/value settings that drive the tunnel.
//!
//! Every well-known key is seeded with a default on construction, so reads
//! after `SettingsStore::open` / `SettingsStore::in_memory` never observe a
//! missing value. Writes update the in-memory copy first and then persist
//! the whole file; a failed write is logged and the in-memory value still
//! wins, which keeps read-after-write consistency for the caller.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

const SETTINGS_FILE: &str = "settings.json";

/// String-valued setting keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingKey {
    /// Local node name announced to neighbors
    Name,
    /// Address assigned to the tunnel interface
    LocalAddress,
    /// Gateway neighbor address
    Gateway,
    /// DNS server pushed to the tunnel interface
    DnsServer,
    /// Link endpoints, one per line
    Links,
}

impl SettingKey {
    /// All string keys, in seeding order
    pub fn all() -> &'static [SettingKey] {
        &[
            SettingKey::Name,
            SettingKey::LocalAddress,
            SettingKey::Gateway,
            SettingKey::DnsServer,
            SettingKey::Links,
        ]
    }

    /// Persisted key name
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::Name => "name",
            SettingKey::LocalAddress => "local_address",
            SettingKey::Gateway => "gateway",
            SettingKey::DnsServer => "dns_server",
            SettingKey::Links => "links",
        }
    }

    /// Human-readable title
    pub fn title(&self) -> &'static str {
        match self {
            SettingKey::Name => "Name",
            SettingKey::LocalAddress => "IP Address",
            SettingKey::Gateway => "Gateway",
            SettingKey::DnsServer => "DNS Server",
            SettingKey::Links => "Links",
        }
    }

    /// Value written when the key is absent
    pub fn default_value(&self) -> &'static str {
        match self {
            SettingKey::Name => "cellphone",
            SettingKey::LocalAddress => "172.20.0.99",
            SettingKey::Gateway => "172.20.0.1",
            SettingKey::DnsServer => "8.8.8.8",
            SettingKey::Links => "tls://hostname:4433",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// On-disk layout of the settings file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    values: BTreeMap<String, String>,
    #[serde(default)]
    excluded_apps: Option<BTreeSet<String>>,
}

/// Settings persistence errors
///
/// The store logs these and keeps working from memory.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted settings with default seeding
pub struct SettingsStore {
    state: Mutex<SettingsFile>,
    /// Backing directory, `None` for in-memory stores
    dir: Option<PathBuf>,
}

impl SettingsStore {
    /// Open (or create) the settings file inside `dir`
    ///
    /// An unreadable or corrupt file is logged and replaced by defaults.
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let file = match load_settings_file(&dir) {
            Ok(file) => file,
            Err(e) => {
                warn!("Discarding unreadable settings in {}: {}", dir.display(), e);
                SettingsFile::default()
            }
        };

        let store = Self {
            state: Mutex::new(file),
            dir: Some(dir),
        };
        store.seed_defaults();
        store
    }

    /// Create a store that lives only in memory
    pub fn in_memory() -> Self {
        let store = Self {
            state: Mutex::new(SettingsFile::default()),
            dir: None,
        };
        store.seed_defaults();
        store
    }

    /// Read a string setting
    pub fn get_string(&self, key: SettingKey) -> Option<String> {
        self.lock().values.get(key.as_str()).cloned()
    }

    /// Write a string setting
    pub fn save_string(&self, key: SettingKey, value: impl Into<String>) {
        let value = value.into();
        debug!("Saving setting {} = {:?}", key, value);
        let mut state = self.lock();
        state.values.insert(key.as_str().to_string(), value);
        self.persist(&state);
    }

    /// Read the committed excluded application set
    pub fn excluded_apps(&self) -> Option<BTreeSet<String>> {
        self.lock().excluded_apps.clone()
    }

    /// Replace the committed excluded application set
    pub fn save_excluded_apps(&self, apps: BTreeSet<String>) {
        debug!("Saving {} excluded apps", apps.len());
        let mut state = self.lock();
        state.excluded_apps = Some(apps);
        self.persist(&state);
    }

    /// Start editing a private copy of the excluded application set
    pub fn draft_excluded_apps(&self) -> ExcludedAppsDraft {
        ExcludedAppsDraft {
            apps: self.excluded_apps().unwrap_or_default(),
        }
    }

    /// Replace the committed set with an edited draft
    pub fn commit_excluded_apps(&self, draft: ExcludedAppsDraft) {
        info!("Committing excluded apps ({} entries)", draft.apps.len());
        self.save_excluded_apps(draft.apps);
    }

    /// Write defaults for every absent key, once
    fn seed_defaults(&self) {
        let mut state = self.lock();
        let mut changed = false;

        for key in SettingKey::all() {
            if !state.values.contains_key(key.as_str()) {
                state
                    .values
                    .insert(key.as_str().to_string(), key.default_value().to_string());
                changed = true;
            }
        }
        if state.excluded_apps.is_none() {
            state.excluded_apps = Some(BTreeSet::new());
            changed = true;
        }

        if changed {
            debug!("Seeded default settings");
            self.persist(&state);
        }
    }

    fn persist(&self, state: &SettingsFile) {
        let Some(dir) = &self.dir else {
            return;
        };
        if let Err(e) = save_settings_file(dir, state) {
            warn!("Failed to persist settings to {}: {}", dir.display(), e);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SettingsFile> {
        // A poisoned lock still holds a consistent map
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Editable copy of the excluded application set
///
/// Edits never reach the store until passed to
/// [`SettingsStore::commit_excluded_apps`]; dropping a draft discards it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedAppsDraft {
    apps: BTreeSet<String>,
}

impl ExcludedAppsDraft {
    /// Check or uncheck an application
    pub fn set(&mut self, package_id: &str, excluded: bool) {
        if excluded {
            self.apps.insert(package_id.to_string());
        } else {
            self.apps.remove(package_id);
        }
    }

    pub fn contains(&self, package_id: &str) -> bool {
        self.apps.contains(package_id)
    }

    pub fn apps(&self) -> &BTreeSet<String> {
        &self.apps
    }
}

fn load_settings_file(dir: &Path) -> Result<SettingsFile, SettingsError> {
    let path = dir.join(SETTINGS_FILE);
    if !path.exists() {
        return Ok(SettingsFile::default());
    }
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn save_settings_file(dir: &Path, state: &SettingsFile) -> Result<(), SettingsError> {
    fs::create_dir_all(dir)?;
    let payload = serde_json::to_string_pretty(state)?;
    fs::write(dir.join(SETTINGS_FILE), payload)?;
    Ok(())
}
