//! Connection validation and request application
//!
//! `can_connect` is a pure predicate over (type, mode, existing sources,
//! request, limits). `apply_connection` is the provider-side state machine
//! that mutates one target at a time and reports a disposition; every
//! mutating branch goes through the matrix's indexed mutators so the derived
//! source index stays consistent.

use std::collections::BTreeMap;

use emberplus_types::{
    ConnectOperation, Disposition, EmberError, EmberResult, Matrix, MatrixConnection, MatrixMode,
    MatrixType,
};

/// Typed notification emitted by a mutating branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixEventKind {
    Connect,
    Disconnect,
    Change,
}

/// One observable mutation of a matrix target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixEvent {
    pub kind: MatrixEventKind,
    pub target: u32,
    pub sources: Vec<u32>,
}

/// Outcome of applying a connection request to one target
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub target: u32,
    pub disposition: Disposition,
    /// Source set of the target after application
    pub sources: Vec<u32>,
    pub events: Vec<MatrixEvent>,
}

impl Applied {
    fn new(target: u32, disposition: Disposition, sources: Vec<u32>, events: Vec<MatrixEvent>) -> Self {
        Self {
            target,
            disposition,
            sources,
            events,
        }
    }

    /// Tally outcomes are answered to the requester but never fanned out
    pub fn should_notify(&self) -> bool {
        self.disposition != Disposition::Tally
    }
}

fn resulting_sources(old: &[u32], requested: &[u32], operation: ConnectOperation) -> Vec<u32> {
    let mut resulting: Vec<u32> = match operation {
        ConnectOperation::Absolute => requested.to_vec(),
        ConnectOperation::Connect => {
            let mut merged = old.to_vec();
            merged.extend_from_slice(requested);
            merged
        }
        ConnectOperation::Disconnect => old
            .iter()
            .copied()
            .filter(|s| !requested.contains(s))
            .collect(),
    };
    resulting.sort_unstable();
    resulting.dedup();
    resulting
}

/// Decide whether a request is admissible without mutating anything.
///
/// The resulting source set is the requested set for `absolute` and the
/// union of existing and requested for `connect`.
pub fn can_connect(
    matrix: &Matrix,
    target: u32,
    sources: &[u32],
    operation: ConnectOperation,
) -> bool {
    if matrix.is_target_locked(target) {
        return false;
    }

    let old = matrix.sources_of(target);
    let resulting = resulting_sources(old, sources, operation);
    let contents = matrix.contents.clone().unwrap_or_default();
    let per_target_limit = contents.maximum_connects_per_target;
    let total_limit = contents.maximum_total_connects;

    match contents.effective_type() {
        MatrixType::OneToN => {
            if per_target_limit.is_none() && total_limit.is_none() {
                return resulting.len() < 2;
            }
            if resulting.len() >= 2 {
                return false;
            }
            within_limits(matrix, old.len(), resulting.len(), per_target_limit, total_limit)
        }
        MatrixType::OneToOne => {
            if resulting.len() > 1 {
                return false;
            }
            match resulting.first() {
                None => true,
                Some(&source) => {
                    let holders = matrix.targets_of_source(source);
                    holders.is_empty() || holders == [target]
                }
            }
        }
        MatrixType::NToN => within_limits(matrix, old.len(), resulting.len(), per_target_limit, total_limit),
    }
}

fn within_limits(
    matrix: &Matrix,
    old_count: usize,
    new_count: usize,
    per_target_limit: Option<i32>,
    total_limit: Option<i32>,
) -> bool {
    if let Some(max) = per_target_limit {
        if new_count as i64 > max as i64 {
            return false;
        }
    }
    if let Some(max) = total_limit {
        let total = matrix.total_connection_count() as i64 - old_count as i64 + new_count as i64;
        if total > max as i64 {
            return false;
        }
    }
    true
}

/// Check a request against the matrix topology before it is sent or applied.
///
/// Linear matrices bound target/source numbers by the configured counts;
/// non-linear matrices require every signal to appear in the explicit
/// `targets`/`sources` lists.
pub fn validate_connection(matrix: &Matrix, target: i64, sources: &[i64]) -> EmberResult<()> {
    if target < 0 {
        return Err(EmberError::InvalidMatrixSignal {
            signal: target,
            reason: "target must not be negative".into(),
        });
    }
    for &source in sources {
        if source < 0 {
            return Err(EmberError::InvalidMatrixSignal {
                signal: source,
                reason: "source must not be negative".into(),
            });
        }
    }

    let contents = matrix.contents.clone().unwrap_or_default();
    match contents.effective_mode() {
        MatrixMode::Linear => {
            if let Some(count) = contents.target_count {
                if target >= count as i64 {
                    return Err(EmberError::InvalidMatrixSignal {
                        signal: target,
                        reason: format!("target exceeds target count {count}"),
                    });
                }
            }
            if let Some(count) = contents.source_count {
                for &source in sources {
                    if source >= count as i64 {
                        return Err(EmberError::InvalidMatrixSignal {
                            signal: source,
                            reason: format!("source exceeds source count {count}"),
                        });
                    }
                }
            }
        }
        MatrixMode::NonLinear => {
            let targets = matrix.targets.as_deref().unwrap_or(&[]);
            if !targets.contains(&(target as u32)) {
                return Err(EmberError::InvalidMatrixSignal {
                    signal: target,
                    reason: "target not in matrix target list".into(),
                });
            }
            let known = matrix.sources.as_deref().unwrap_or(&[]);
            for &source in sources {
                if !known.contains(&(source as u32)) {
                    return Err(EmberError::InvalidMatrixSignal {
                        signal: source,
                        reason: "source not in matrix source list".into(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Apply one connection request to its target, provider-side.
///
/// `default_sources` is the per-target fallback table a oneToN matrix may
/// pair with its label group; when present, disconnecting a target's active
/// source substitutes the fallback instead of leaving the target silent.
pub fn apply_connection(
    matrix: &mut Matrix,
    request: &MatrixConnection,
    default_sources: Option<&BTreeMap<u32, u32>>,
) -> Applied {
    let target = request.target;
    let requested: Vec<u32> = request.sources().to_vec();
    let mut events: Vec<MatrixEvent> = Vec::new();

    if matrix.is_target_locked(target) {
        return Applied::new(
            target,
            Disposition::Locked,
            matrix.sources_of(target).to_vec(),
            events,
        );
    }

    let operation = request.operation.unwrap_or(ConnectOperation::Absolute);
    if operation == ConnectOperation::Disconnect {
        return apply_disconnect(matrix, target, &requested, default_sources);
    }

    let matrix_type = matrix
        .contents
        .as_ref()
        .map(|c| c.effective_type())
        .unwrap_or(MatrixType::OneToN);

    // Auto-disconnect: single-source requests on exclusive topologies first
    // release whatever currently claims the signal.
    if matrix_type != MatrixType::NToN && requested.len() == 1 {
        let source = requested[0];
        let old = matrix.sources_of(target).to_vec();

        match matrix_type {
            MatrixType::OneToOne => {
                if old == [source] {
                    // Same source, same target: the request toggles it off
                    matrix.disconnect_sources(target, &[source]);
                    events.push(MatrixEvent {
                        kind: MatrixEventKind::Disconnect,
                        target,
                        sources: vec![source],
                    });
                    return Applied::new(target, Disposition::Modified, Vec::new(), events);
                }
                for holder in matrix.targets_of_source(source) {
                    if holder != target {
                        matrix.disconnect_sources(holder, &[source]);
                        events.push(MatrixEvent {
                            kind: MatrixEventKind::Disconnect,
                            target: holder,
                            sources: vec![source],
                        });
                    }
                }
                if let Some(&previous) = old.first() {
                    if previous != source {
                        matrix.disconnect_sources(target, &[previous]);
                        events.push(MatrixEvent {
                            kind: MatrixEventKind::Disconnect,
                            target,
                            sources: vec![previous],
                        });
                    }
                }
            }
            MatrixType::OneToN => {
                if old.len() == 1 {
                    let previous = old[0];
                    if previous == source {
                        // Identical state: reject as tally, no mutation
                        return Applied::new(target, Disposition::Tally, old, events);
                    }
                    matrix.disconnect_sources(target, &[previous]);
                    events.push(MatrixEvent {
                        kind: MatrixEventKind::Disconnect,
                        target,
                        sources: vec![previous],
                    });
                }
            }
            MatrixType::NToN => unreachable!("nToN excluded above"),
        }
    }

    let old = matrix.sources_of(target).to_vec();
    let resulting = resulting_sources(&old, &requested, operation);

    if can_connect(matrix, target, &requested, operation) && !resulting.is_empty() {
        match operation {
            ConnectOperation::Absolute => matrix.set_sources(target, requested),
            ConnectOperation::Connect => matrix.connect_sources(target, &requested),
            ConnectOperation::Disconnect => unreachable!("disconnect handled above"),
        }
        let now = matrix.sources_of(target).to_vec();
        events.push(MatrixEvent {
            kind: MatrixEventKind::Connect,
            target,
            sources: now.clone(),
        });
        return Applied::new(target, Disposition::Modified, now, events);
    }

    if resulting.is_empty() && !old.is_empty() {
        matrix.set_sources(target, Vec::new());
        events.push(MatrixEvent {
            kind: MatrixEventKind::Disconnect,
            target,
            sources: old,
        });
        return Applied::new(target, Disposition::Modified, Vec::new(), events);
    }

    Applied::new(
        target,
        Disposition::Tally,
        matrix.sources_of(target).to_vec(),
        events,
    )
}

fn apply_disconnect(
    matrix: &mut Matrix,
    target: u32,
    requested: &[u32],
    default_sources: Option<&BTreeMap<u32, u32>>,
) -> Applied {
    let old = matrix.sources_of(target).to_vec();
    let hit = requested.iter().any(|s| old.contains(s));
    if !hit {
        return Applied::new(target, Disposition::Tally, old, Vec::new());
    }

    let mut events = Vec::new();
    matrix.disconnect_sources(target, requested);
    events.push(MatrixEvent {
        kind: MatrixEventKind::Disconnect,
        target,
        sources: requested.to_vec(),
    });

    // oneToN targets fall back to their paired default source, when one is
    // configured and it was not the signal being removed.
    let is_one_to_n = matrix
        .contents
        .as_ref()
        .map(|c| c.effective_type() == MatrixType::OneToN)
        .unwrap_or(true);
    if is_one_to_n && matrix.sources_of(target).is_empty() {
        if let Some(&fallback) = default_sources.and_then(|d| d.get(&target)) {
            if !requested.contains(&fallback) {
                matrix.set_sources(target, vec![fallback]);
                events.push(MatrixEvent {
                    kind: MatrixEventKind::Change,
                    target,
                    sources: vec![fallback],
                });
            }
        }
    }

    Applied::new(
        target,
        Disposition::Modified,
        matrix.sources_of(target).to_vec(),
        events,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberplus_types::{Addressing, MatrixContents};

    fn matrix(matrix_type: MatrixType, targets: i32, sources: i32) -> Matrix {
        Matrix::new(
            Addressing::Number(0),
            MatrixContents {
                matrix_type: Some(matrix_type),
                mode: Some(MatrixMode::Linear),
                target_count: Some(targets),
                source_count: Some(sources),
                ..Default::default()
            },
        )
    }

    fn request(target: u32, sources: Vec<u32>, operation: ConnectOperation) -> MatrixConnection {
        let mut connection = MatrixConnection::with_sources(target, sources);
        connection.operation = Some(operation);
        connection
    }

    #[test]
    fn test_one_to_n_allows_single_source_only() {
        let m = matrix(MatrixType::OneToN, 3, 3);
        assert!(can_connect(&m, 0, &[1], ConnectOperation::Absolute));
        assert!(!can_connect(&m, 0, &[1, 2], ConnectOperation::Absolute));
    }

    #[test]
    fn test_one_to_n_connect_union_exceeds_limit() {
        let mut m = matrix(MatrixType::OneToN, 3, 3);
        m.set_sources(0, vec![1]);
        // Union {1, 2} has two sources
        assert!(!can_connect(&m, 0, &[2], ConnectOperation::Connect));
        // Absolute replacement stays at one
        assert!(can_connect(&m, 0, &[2], ConnectOperation::Absolute));
    }

    #[test]
    fn test_one_to_one_source_exclusivity() {
        let mut m = matrix(MatrixType::OneToOne, 3, 3);
        m.set_sources(0, vec![1]);

        // Reasserting the existing edge is admissible
        assert!(can_connect(&m, 0, &[1], ConnectOperation::Connect));
        // Source 1 is claimed by target 0, so target 1 may not take it
        assert!(!can_connect(&m, 1, &[1], ConnectOperation::Absolute));
        // An unclaimed source is fine
        assert!(can_connect(&m, 1, &[2], ConnectOperation::Absolute));
        // Never more than one source
        assert!(!can_connect(&m, 2, &[0, 2], ConnectOperation::Absolute));
    }

    #[test]
    fn test_n_to_n_total_connect_limit() {
        let mut m = matrix(MatrixType::NToN, 3, 3);
        m.contents.as_mut().unwrap().maximum_total_connects = Some(2);

        m.set_sources(0, vec![0, 1]);
        assert!(!can_connect(&m, 2, &[2], ConnectOperation::Connect));

        m.disconnect_sources(0, &[1]);
        assert!(can_connect(&m, 2, &[2], ConnectOperation::Connect));
    }

    #[test]
    fn test_n_to_n_per_target_limit() {
        let mut m = matrix(MatrixType::NToN, 3, 3);
        m.contents.as_mut().unwrap().maximum_connects_per_target = Some(2);
        m.set_sources(0, vec![0]);
        assert!(can_connect(&m, 0, &[1], ConnectOperation::Connect));
        assert!(!can_connect(&m, 0, &[1, 2], ConnectOperation::Connect));
    }

    #[test]
    fn test_locked_target_refuses_everything() {
        let mut m = matrix(MatrixType::NToN, 3, 3);
        m.set_target_locked(1, true);
        assert!(!can_connect(&m, 1, &[0], ConnectOperation::Absolute));

        let applied = apply_connection(&mut m, &request(1, vec![0], ConnectOperation::Absolute), None);
        assert_eq!(applied.disposition, Disposition::Locked);
        assert!(m.sources_of(1).is_empty());
    }

    #[test]
    fn test_validate_connection_linear_bounds() {
        let m = matrix(MatrixType::OneToN, 3, 3);
        assert!(validate_connection(&m, 2, &[0, 2]).is_ok());
        assert!(matches!(
            validate_connection(&m, -1, &[0]),
            Err(EmberError::InvalidMatrixSignal { signal: -1, .. })
        ));
        assert!(validate_connection(&m, 0, &[-4]).is_err());
        assert!(validate_connection(&m, 3, &[0]).is_err());
        assert!(validate_connection(&m, 0, &[3]).is_err());
    }

    #[test]
    fn test_validate_connection_non_linear_lists() {
        let mut m = matrix(MatrixType::NToN, 0, 0);
        m.contents.as_mut().unwrap().mode = Some(MatrixMode::NonLinear);
        m.targets = Some(vec![4, 8]);
        m.sources = Some(vec![1, 3]);

        assert!(validate_connection(&m, 8, &[1, 3]).is_ok());
        assert!(validate_connection(&m, 5, &[1]).is_err());
        assert!(validate_connection(&m, 4, &[2]).is_err());
    }

    #[test]
    fn test_apply_absolute_connect_modified() {
        let mut m = matrix(MatrixType::OneToN, 3, 3);
        let applied = apply_connection(&mut m, &request(0, vec![1], ConnectOperation::Absolute), None);
        assert_eq!(applied.disposition, Disposition::Modified);
        assert_eq!(applied.sources, vec![1]);
        assert_eq!(m.sources_of(0), &[1]);
        assert!(applied.should_notify());
    }

    #[test]
    fn test_apply_one_to_n_replaces_previous_source() {
        let mut m = matrix(MatrixType::OneToN, 3, 3);
        apply_connection(&mut m, &request(0, vec![1], ConnectOperation::Absolute), None);
        let applied = apply_connection(&mut m, &request(0, vec![2], ConnectOperation::Connect), None);

        assert_eq!(applied.disposition, Disposition::Modified);
        assert_eq!(m.sources_of(0), &[2]);
        assert!(applied
            .events
            .iter()
            .any(|e| e.kind == MatrixEventKind::Disconnect && e.sources == vec![1]));
    }

    #[test]
    fn test_apply_one_to_n_identical_request_is_tally() {
        let mut m = matrix(MatrixType::OneToN, 3, 3);
        apply_connection(&mut m, &request(0, vec![1], ConnectOperation::Absolute), None);
        let applied = apply_connection(&mut m, &request(0, vec![1], ConnectOperation::Absolute), None);

        assert_eq!(applied.disposition, Disposition::Tally);
        assert_eq!(m.sources_of(0), &[1]);
        assert!(!applied.should_notify());
    }

    #[test]
    fn test_apply_one_to_one_steals_and_toggles() {
        let mut m = matrix(MatrixType::OneToOne, 3, 3);
        apply_connection(&mut m, &request(0, vec![1], ConnectOperation::Absolute), None);

        // Another target claims the same source: target 0 is released
        let applied = apply_connection(&mut m, &request(2, vec![1], ConnectOperation::Absolute), None);
        assert_eq!(applied.disposition, Disposition::Modified);
        assert!(m.sources_of(0).is_empty());
        assert_eq!(m.sources_of(2), &[1]);

        // Same target, same source: toggles off
        let applied = apply_connection(&mut m, &request(2, vec![1], ConnectOperation::Absolute), None);
        assert_eq!(applied.disposition, Disposition::Modified);
        assert!(m.sources_of(2).is_empty());
    }

    #[test]
    fn test_apply_explicit_disconnect() {
        let mut m = matrix(MatrixType::NToN, 3, 3);
        apply_connection(&mut m, &request(0, vec![0, 1], ConnectOperation::Absolute), None);

        let applied = apply_connection(&mut m, &request(0, vec![0], ConnectOperation::Disconnect), None);
        assert_eq!(applied.disposition, Disposition::Modified);
        assert_eq!(m.sources_of(0), &[1]);

        // Disconnecting a source that is not connected is a tally
        let applied = apply_connection(&mut m, &request(0, vec![2], ConnectOperation::Disconnect), None);
        assert_eq!(applied.disposition, Disposition::Tally);
    }

    #[test]
    fn test_one_to_n_disconnect_substitutes_default_source() {
        let mut m = matrix(MatrixType::OneToN, 3, 3);
        apply_connection(&mut m, &request(0, vec![2], ConnectOperation::Absolute), None);

        let mut defaults = BTreeMap::new();
        defaults.insert(0u32, 1u32);
        let applied = apply_connection(
            &mut m,
            &request(0, vec![2], ConnectOperation::Disconnect),
            Some(&defaults),
        );

        assert_eq!(applied.disposition, Disposition::Modified);
        assert_eq!(m.sources_of(0), &[1]);
        assert!(applied.events.iter().any(|e| e.kind == MatrixEventKind::Change));
    }

    #[test]
    fn test_index_consistency_after_engine_mutations() {
        let mut m = matrix(MatrixType::NToN, 4, 4);
        apply_connection(&mut m, &request(0, vec![1, 2], ConnectOperation::Absolute), None);
        apply_connection(&mut m, &request(1, vec![2], ConnectOperation::Connect), None);
        apply_connection(&mut m, &request(0, vec![2], ConnectOperation::Disconnect), None);

        assert_eq!(m.targets_of_source(2), vec![1]);
        assert_eq!(m.targets_of_source(1), vec![0]);
        assert_eq!(m.total_connection_count(), 2);
    }
}
