//! Application listing for traffic exclusion

use std::cmp::Ordering;
use std::collections::BTreeSet;

/// An application as reported by the OS registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledApp {
    pub display_name: String,
    pub package_id: String,
    /// System applications are never offered for exclusion
    pub system: bool,
}

/// An application that may be excluded from the tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRecord {
    pub display_name: String,
    pub package_id: String,
}

/// Source of installed applications
pub trait AppRegistry: Send + Sync {
    fn installed(&self) -> Vec<InstalledApp>;
}

/// List user applications, excluded ones first, then by display name
pub fn list_eligible_applications(
    registry: &dyn AppRegistry,
    excluded: &BTreeSet<String>,
) -> Vec<ApplicationRecord> {
    let mut apps: Vec<ApplicationRecord> = registry
        .installed()
        .into_iter()
        .filter(|app| !app.system)
        .map(|app| ApplicationRecord {
            display_name: app.display_name,
            package_id: app.package_id,
        })
        .collect();

    apps.sort_by(|a, b| {
        let a_excluded = excluded.contains(&a.package_id);
        let b_excluded = excluded.contains(&b.package_id);
        match (a_excluded, b_excluded) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.display_name.cmp(&b.display_name),
        }
    });
    apps
}
