//! Neighbor Directory
//!
//! Gateway candidates discovered by the running engine. A snapshot is only
//! valid for the interaction that requested it: indices must not be kept
//! across a start or a gateway switch.

use std::fmt;
use std::net::Ipv4Addr;

/// Indexable view of the engine's current neighbors
pub trait NeighborDirectory {
    /// Number of known neighbors
    fn n(&self) -> usize;

    /// Address of neighbor `i` (`0 <= i < n()`)
    fn addr(&self, i: usize) -> Ipv4Addr;

    /// Display name of neighbor `i` (`0 <= i < n()`)
    fn name(&self, i: usize) -> &str;
}

/// A selectable gateway candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborRecord {
    /// Index inside the snapshot it was read from
    pub id: usize,
    /// Neighbor name
    pub display_name: String,
    /// Neighbor address
    pub address: Ipv4Addr,
}

impl fmt::Display for NeighborRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  {}", self.display_name, self.address)
    }
}

/// Owned snapshot returned by the engine, ordered by address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborSnapshot {
    entries: Vec<(Ipv4Addr, String)>,
}

impl NeighborSnapshot {
    /// Build a snapshot, sorting entries by numeric address
    pub fn new(entries: impl IntoIterator<Item = (Ipv4Addr, String)>) -> Self {
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_by_key(|(addr, _)| u32::from(*addr));
        Self { entries }
    }

    /// Snapshot with no neighbors
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NeighborDirectory for NeighborSnapshot {
    fn n(&self) -> usize {
        self.entries.len()
    }

    fn addr(&self, i: usize) -> Ipv4Addr {
        self.entries[i].0
    }

    fn name(&self, i: usize) -> &str {
        &self.entries[i].1
    }
}

/// Materialize every neighbor of a directory as a selectable record
pub fn gateway_choices(directory: &dyn NeighborDirectory) -> Vec<NeighborRecord> {
    (0..directory.n())
        .map(|i| NeighborRecord {
            id: i,
            display_name: directory.name(i).to_string(),
            address: directory.addr(i),
        })
        .collect()
}
