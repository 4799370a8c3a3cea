//! Setting menu model
//!
//! The front-end shows one row per [`SettingEntry`]; selecting a row opens
//! the editor picked by [`SettingKind::editor`].

use crate::settings::{SettingKey, SettingsStore};
use std::fmt;

/// A row of the settings menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingEntry {
    /// A string setting
    Key(SettingKey),
    /// The excluded application set
    ExcludedApps,
    /// The engine log
    LogViewer,
}

/// What kind of value a row edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Text,
    MultilineText,
    GatewayList,
    ExcludedApps,
    LogView,
}

/// Editor opened for a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Editor {
    /// Single-line text input
    Text,
    /// Multi-line text input
    MultilineText,
    /// Pick a gateway from the live neighbor list
    GatewayChoice,
    /// Multi-choice list of applications
    AppChoice,
    /// Read-only log view
    Log,
}

impl SettingEntry {
    /// Menu rows, in display order
    pub fn all() -> &'static [SettingEntry] {
        &[
            SettingEntry::Key(SettingKey::Name),
            SettingEntry::Key(SettingKey::LocalAddress),
            SettingEntry::Key(SettingKey::Gateway),
            SettingEntry::Key(SettingKey::Links),
            SettingEntry::Key(SettingKey::DnsServer),
            SettingEntry::ExcludedApps,
            SettingEntry::LogViewer,
        ]
    }

    pub fn title(&self) -> &'static str {
        match self {
            SettingEntry::Key(key) => key.title(),
            SettingEntry::ExcludedApps => "Excluded Apps",
            SettingEntry::LogViewer => "Log Viewer",
        }
    }

    pub fn kind(&self) -> SettingKind {
        match self {
            SettingEntry::Key(SettingKey::Gateway) => SettingKind::GatewayList,
            SettingEntry::Key(SettingKey::Links) => SettingKind::MultilineText,
            SettingEntry::Key(_) => SettingKind::Text,
            SettingEntry::ExcludedApps => SettingKind::ExcludedApps,
            SettingEntry::LogViewer => SettingKind::LogView,
        }
    }

    /// Whether the row shows its current value
    pub fn shows_value(&self) -> bool {
        matches!(
            self,
            SettingEntry::Key(
                SettingKey::Name
                    | SettingKey::LocalAddress
                    | SettingKey::Gateway
                    | SettingKey::DnsServer
            )
        )
    }
}

impl fmt::Display for SettingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.title())
    }
}

impl SettingKind {
    /// Editor for this kind given the session run state
    ///
    /// Without a running session there are no neighbors to pick from, so
    /// the gateway falls back to plain text entry.
    pub fn editor(&self, running: bool) -> Editor {
        match self {
            SettingKind::Text => Editor::Text,
            SettingKind::MultilineText => Editor::MultilineText,
            SettingKind::GatewayList if running => Editor::GatewayChoice,
            SettingKind::GatewayList => Editor::Text,
            SettingKind::ExcludedApps => Editor::AppChoice,
            SettingKind::LogView => Editor::Log,
        }
    }
}

/// A rendered menu row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingItem {
    pub entry: SettingEntry,
    pub value: Option<String>,
}

/// Build the settings menu from the store
pub fn setting_list(settings: &SettingsStore) -> Vec<SettingItem> {
    SettingEntry::all()
        .iter()
        .map(|entry| {
            let value = match entry {
                SettingEntry::Key(key) if entry.shows_value() => settings.get_string(*key),
                _ => None,
            };
            SettingItem {
                entry: *entry,
                value,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_order_and_values() {
        let items = setting_list(&SettingsStore::in_memory());
        let titles: Vec<_> = items.iter().map(|i| i.entry.title()).collect();
        assert_eq!(
            titles,
            [
                "Name",
                "IP Address",
                "Gateway",
                "Links",
                "DNS Server",
                "Excluded Apps",
                "Log Viewer"
            ]
        );

        assert_eq!(items[1].value.as_deref(), Some("172.20.0.99"));
        assert_eq!(items[3].value, None);
        assert_eq!(items[6].value, None);
    }

    #[test]
    fn test_gateway_editor_depends_on_state() {
        let kind = SettingEntry::Key(SettingKey::Gateway).kind();
        assert_eq!(kind.editor(true), Editor::GatewayChoice);
        assert_eq!(kind.editor(false), Editor::Text);
    }

    #[test]
    fn test_editor_mapping() {
        assert_eq!(
            SettingEntry::Key(SettingKey::Links).kind().editor(false),
            Editor::MultilineText
        );
        assert_eq!(SettingEntry::ExcludedApps.kind().editor(true), Editor::AppChoice);
        assert_eq!(SettingEntry::LogViewer.kind().editor(false), Editor::Log);
        assert_eq!(
            SettingEntry::Key(SettingKey::DnsServer).kind().editor(true),
            Editor::Text
        );
    }
}
