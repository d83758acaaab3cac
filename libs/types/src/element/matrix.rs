//! Matrix contents, connection state and the derived source index
//!
//! The matrix element owns two maps: `connections` (target -> connection) and
//! the derived `connected_sources` reverse index (source -> targets). Every
//! mutation goes through [`Matrix::set_sources`], [`Matrix::connect_sources`]
//! or [`Matrix::disconnect_sources`] so the index can never drift from the
//! forward map.

use std::collections::{BTreeMap, BTreeSet};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::Addressing;
use crate::path::EmberPath;

/// Connection topology of a matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum MatrixType {
    OneToN = 0,
    OneToOne = 1,
    NToN = 2,
}

/// Signal numbering scheme of a matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum MatrixMode {
    Linear = 0,
    NonLinear = 1,
}

/// Requested mutation semantics, present on connection requests only
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum ConnectOperation {
    Absolute = 0,
    Connect = 1,
    Disconnect = 2,
}

/// Provider verdict on a connection request, present on responses only
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum Disposition {
    Tally = 0,
    Modified = 1,
    Pending = 2,
    Locked = 3,
}

/// A label group attached to a matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub base_path: EmberPath,
    pub description: Option<String>,
}

/// Contents of a routing matrix
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixContents {
    pub identifier: Option<String>,
    pub description: Option<String>,
    pub matrix_type: Option<MatrixType>,
    pub mode: Option<MatrixMode>,
    pub target_count: Option<i32>,
    pub source_count: Option<i32>,
    pub maximum_total_connects: Option<i32>,
    pub maximum_connects_per_target: Option<i32>,
    pub labels: Option<Vec<Label>>,
    pub parameters_location: Option<EmberPath>,
    pub gain_parameter_number: Option<i32>,
    pub schema_identifiers: Option<String>,
}

impl MatrixContents {
    pub fn merge(&mut self, other: &MatrixContents) -> bool {
        merge_option_fields!(
            self,
            other,
            identifier,
            description,
            matrix_type,
            mode,
            target_count,
            source_count,
            maximum_total_connects,
            maximum_connects_per_target,
            labels,
            parameters_location,
            gain_parameter_number,
            schema_identifiers,
        )
    }

    /// Effective topology; the protocol default is oneToN
    pub fn effective_type(&self) -> MatrixType {
        self.matrix_type.unwrap_or(MatrixType::OneToN)
    }

    /// Effective numbering scheme; the protocol default is linear
    pub fn effective_mode(&self) -> MatrixMode {
        self.mode.unwrap_or(MatrixMode::Linear)
    }
}

/// The connection state of one matrix target
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixConnection {
    pub target: u32,
    /// Sorted, duplicate-free set of connected sources
    sources: Vec<u32>,
    /// Request-only field
    pub operation: Option<ConnectOperation>,
    /// Response-only field
    pub disposition: Option<Disposition>,
    /// Locked targets refuse every mutation until unlocked
    pub locked: bool,
}

impl MatrixConnection {
    pub fn new(target: u32) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    pub fn with_sources(target: u32, sources: Vec<u32>) -> Self {
        let mut connection = Self::new(target);
        connection.set_sources(sources);
        connection
    }

    pub fn sources(&self) -> &[u32] {
        &self.sources
    }

    /// Replace the source set, normalizing to sorted/deduplicated order
    pub fn set_sources(&mut self, sources: Vec<u32>) {
        let set: BTreeSet<u32> = sources.into_iter().collect();
        self.sources = set.into_iter().collect();
    }

    pub fn is_connected(&self) -> bool {
        !self.sources.is_empty()
    }
}

/// A routing matrix element: contents plus live connection state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    pub addressing: Addressing,
    pub contents: Option<MatrixContents>,
    /// Explicit target list (non-linear mode only)
    pub targets: Option<Vec<u32>>,
    /// Explicit source list (non-linear mode only)
    pub sources: Option<Vec<u32>>,
    connections: BTreeMap<u32, MatrixConnection>,
    /// Derived index: source -> set of targets currently fed by it
    connected_sources: BTreeMap<u32, BTreeSet<u32>>,
}

impl Matrix {
    pub fn new(addressing: Addressing, contents: MatrixContents) -> Self {
        Self {
            addressing,
            contents: Some(contents),
            ..Default::default()
        }
    }

    pub fn numbered(number: u32, contents: MatrixContents) -> Self {
        Self::new(Addressing::Number(number), contents)
    }

    /// Bare addressing shell with no contents or connection state, used for
    /// branch markers, request envelopes and decode scaffolding
    pub fn minimal(addressing: Addressing) -> Self {
        Self {
            addressing,
            ..Default::default()
        }
    }

    pub fn connections(&self) -> &BTreeMap<u32, MatrixConnection> {
        &self.connections
    }

    /// Connection entry for a target, if any state has been recorded for it
    pub fn connection(&self, target: u32) -> Option<&MatrixConnection> {
        self.connections.get(&target)
    }

    pub fn connection_mut(&mut self, target: u32) -> &mut MatrixConnection {
        self.connections
            .entry(target)
            .or_insert_with(|| MatrixConnection::new(target))
    }

    /// Sources currently routed to `target`
    pub fn sources_of(&self, target: u32) -> &[u32] {
        self.connections
            .get(&target)
            .map(|c| c.sources())
            .unwrap_or(&[])
    }

    /// Targets currently fed by `source`, via the derived index
    pub fn targets_of_source(&self, source: u32) -> Vec<u32> {
        self.connected_sources
            .get(&source)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Total number of (target, source) edges across the whole matrix
    pub fn total_connection_count(&self) -> usize {
        self.connections.values().map(|c| c.sources().len()).sum()
    }

    pub fn is_target_locked(&self, target: u32) -> bool {
        self.connections.get(&target).is_some_and(|c| c.locked)
    }

    pub fn set_target_locked(&mut self, target: u32, locked: bool) {
        self.connection_mut(target).locked = locked;
    }

    /// Replace the source set of `target`
    pub fn set_sources(&mut self, target: u32, sources: Vec<u32>) {
        let old: Vec<u32> = self.sources_of(target).to_vec();
        self.connection_mut(target).set_sources(sources);
        let new: Vec<u32> = self.sources_of(target).to_vec();
        self.reindex(target, &old, &new);
    }

    /// Union `sources` into the source set of `target`
    pub fn connect_sources(&mut self, target: u32, sources: &[u32]) {
        let mut merged: Vec<u32> = self.sources_of(target).to_vec();
        merged.extend_from_slice(sources);
        self.set_sources(target, merged);
    }

    /// Remove `sources` from the source set of `target`
    pub fn disconnect_sources(&mut self, target: u32, sources: &[u32]) {
        let remaining: Vec<u32> = self
            .sources_of(target)
            .iter()
            .copied()
            .filter(|s| !sources.contains(s))
            .collect();
        self.set_sources(target, remaining);
    }

    fn reindex(&mut self, target: u32, old: &[u32], new: &[u32]) {
        for source in old {
            if !new.contains(source) {
                if let Some(targets) = self.connected_sources.get_mut(source) {
                    targets.remove(&target);
                    if targets.is_empty() {
                        self.connected_sources.remove(source);
                    }
                }
            }
        }
        for source in new {
            if !old.contains(source) {
                self.connected_sources
                    .entry(*source)
                    .or_default()
                    .insert(target);
            }
        }
    }

    /// Shallow-merge another matrix fragment into this one. Connections in
    /// the fragment replace per-target state (responses carry the resulting
    /// source set, not a delta).
    pub fn merge(&mut self, other: &Matrix) -> bool {
        let mut changed = false;
        if let Some(other_contents) = &other.contents {
            match &mut self.contents {
                Some(contents) => changed |= contents.merge(other_contents),
                None => {
                    self.contents = Some(other_contents.clone());
                    changed = true;
                }
            }
        }
        if other.targets.is_some() && self.targets != other.targets {
            self.targets = other.targets.clone();
            changed = true;
        }
        if other.sources.is_some() && self.sources != other.sources {
            self.sources = other.sources.clone();
            changed = true;
        }
        for (target, connection) in &other.connections {
            if self.sources_of(*target) != connection.sources() {
                self.set_sources(*target, connection.sources().to_vec());
                changed = true;
            }
            if connection.disposition.is_some() {
                self.connection_mut(*target).disposition = connection.disposition;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_stay_sorted_and_unique() {
        let mut connection = MatrixConnection::new(0);
        connection.set_sources(vec![5, 1, 5, 3]);
        assert_eq!(connection.sources(), &[1, 3, 5]);
    }

    #[test]
    fn test_index_tracks_every_mutation_path() {
        let mut matrix = Matrix::default();

        matrix.set_sources(0, vec![1, 2]);
        matrix.connect_sources(1, &[2]);
        assert_eq!(matrix.targets_of_source(2), vec![0, 1]);
        assert_eq!(matrix.total_connection_count(), 3);

        matrix.disconnect_sources(0, &[2]);
        assert_eq!(matrix.targets_of_source(2), vec![1]);
        assert_eq!(matrix.sources_of(0), &[1]);

        matrix.set_sources(1, vec![]);
        assert!(matrix.targets_of_source(2).is_empty());
        assert_eq!(matrix.total_connection_count(), 1);
    }

    #[test]
    fn test_merge_replaces_per_target_state() {
        let mut local = Matrix::default();
        local.set_sources(0, vec![0]);

        let mut fragment = Matrix::default();
        fragment.set_sources(0, vec![1]);
        fragment.connection_mut(0).disposition = Some(Disposition::Modified);

        assert!(local.merge(&fragment));
        assert_eq!(local.sources_of(0), &[1]);
        assert_eq!(local.targets_of_source(0), Vec::<u32>::new());
        assert_eq!(
            local.connection(0).unwrap().disposition,
            Some(Disposition::Modified)
        );
    }
}
