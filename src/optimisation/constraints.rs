//! Code for adding constraints to the unit-commitment problem.
//!
//! All constraints are per asset; no constraint couples different assets.
//! Rows that mix a first-stage term with second-stage terms go through the
//! [`Broadcast`] combinator, so the single commitment decision constrains
//! every scenario's dispatch without being duplicated.
use super::VariableMap;
use crate::aggregate::{CommitmentProfile, CommitmentProfiles};
use crate::asset::AssetID;
use crate::broadcast::{Broadcast, Term};
use crate::scenario::ScenarioSet;
use crate::snapshot::{Snapshot, SnapshotGrid};
use crate::stage::{FirstStageIndex, SecondStageIndex};
use anyhow::Result;
use highs::RowProblem as Problem;
use indexmap::IndexSet;

/// Corresponding keys for a constraint family along with the family's row
/// offset in the problem
pub struct KeysWithOffset<T> {
    offset: usize,
    keys: Vec<T>,
}

impl<T> KeysWithOffset<T> {
    /// Start a new family at the problem's current row count
    fn at_current_rows(problem: &Problem) -> Self {
        Self {
            offset: problem.num_rows(),
            keys: Vec::new(),
        }
    }

    fn push(&mut self, key: T) {
        self.keys.push(key);
    }

    /// The number of constraints in the family
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Zip the keys with the corresponding dual values in the solution,
    /// accounting for the offset
    pub fn zip_duals<'a>(&'a self, duals: &'a [f64]) -> impl Iterator<Item = (&'a T, f64)> {
        assert!(
            self.offset + self.keys.len() <= duals.len(),
            "Bad constraint keys: dual rows out of range"
        );

        self.keys
            .iter()
            .zip(duals[self.offset..].iter().copied())
    }
}

/// Keys for the capacity-coupling constraints, one per scenario, asset and snapshot
pub type CapacityCouplingKeys = KeysWithOffset<SecondStageIndex>;

/// Keys for purely first-stage constraint families
pub type CommitmentKeys = KeysWithOffset<FirstStageIndex>;

/// The keys for the different constraint families
pub struct ConstraintKeys {
    /// Keys for the upper capacity-coupling constraints
    pub capacity_upper_keys: CapacityCouplingKeys,
    /// Keys for the lower capacity-coupling constraints
    pub capacity_lower_keys: CapacityCouplingKeys,
    /// Keys for the status-transition constraints
    pub transition_keys: CommitmentKeys,
    /// Keys for the minimum up-time constraints
    pub min_up_time_keys: CommitmentKeys,
    /// Keys for the minimum down-time constraints
    pub min_down_time_keys: CommitmentKeys,
    /// Keys for the initial-condition hold constraints
    pub initial_hold_keys: CommitmentKeys,
}

impl ConstraintKeys {
    /// Total number of constraint rows across all families
    pub fn num_rows(&self) -> usize {
        self.capacity_upper_keys.len()
            + self.capacity_lower_keys.len()
            + self.transition_keys.len()
            + self.min_up_time_keys.len()
            + self.min_down_time_keys.len()
            + self.initial_hold_keys.len()
    }
}

/// Add all commitment constraints for the committable assets.
///
/// An empty committable set adds nothing; this is not an error.
pub fn add_commitment_constraints(
    problem: &mut Problem,
    variables: &VariableMap,
    committable: &IndexSet<AssetID>,
    profiles: &CommitmentProfiles,
    grid: &SnapshotGrid,
    scenarios: &ScenarioSet,
) -> Result<ConstraintKeys> {
    let broadcast = Broadcast::new(scenarios);

    let (capacity_upper_keys, capacity_lower_keys) =
        add_capacity_coupling_constraints(problem, variables, committable, profiles, grid, &broadcast)?;
    let transition_keys =
        add_status_transition_constraints(problem, variables, committable, profiles, grid)?;
    let min_up_time_keys =
        add_min_up_time_constraints(problem, variables, committable, profiles, grid)?;
    let min_down_time_keys =
        add_min_down_time_constraints(problem, variables, committable, profiles, grid)?;
    let initial_hold_keys =
        add_initial_condition_constraints(problem, variables, committable, profiles, grid)?;

    Ok(ConstraintKeys {
        capacity_upper_keys,
        capacity_lower_keys,
        transition_keys,
        min_up_time_keys,
        min_down_time_keys,
        initial_hold_keys,
    })
}

/// The snapshots at which the asset is eligible to run, in grid order
fn active_snapshots<'a>(profile: &CommitmentProfile, grid: &'a SnapshotGrid) -> Vec<&'a Snapshot> {
    grid.iter_ids()
        .filter(|snapshot| profile.is_active(snapshot))
        .collect()
}

/// Add the capacity-coupling constraints.
///
/// For every scenario `s`:
///
/// * upper: `Power[s,a,t] - p_max * Status[a,t] <= 0`
/// * lower: `p_min * Status[a,t] - Power[s,a,t] <= 0`
///
/// `Status` has no scenario axis, so broadcasting this single pair of
/// families across the scenarios is what makes one commitment decision
/// feasible for dispatch in every scenario. The coupling is linear in both
/// variables; no bilinear term is needed.
fn add_capacity_coupling_constraints(
    problem: &mut Problem,
    variables: &VariableMap,
    committable: &IndexSet<AssetID>,
    profiles: &CommitmentProfiles,
    grid: &SnapshotGrid,
    broadcast: &Broadcast<'_>,
) -> Result<(CapacityCouplingKeys, CapacityCouplingKeys)> {
    // The two families must each occupy a contiguous row block, so the upper
    // rows for all assets are added before any lower row.
    let mut upper_keys = CapacityCouplingKeys::at_current_rows(problem);
    for asset in committable {
        let profile = &profiles[asset];
        for snapshot in active_snapshots(profile, grid) {
            let status = variables.status_var(&FirstStageIndex::new(
                asset.clone(),
                snapshot.clone(),
            ))?;
            let rows = broadcast.rows(&[(status, -profile.p_max.value())], |scenario| {
                let index =
                    SecondStageIndex::new(scenario.clone(), asset.clone(), snapshot.clone());
                Ok(vec![(variables.power_var(&index)?, 1.0)])
            })?;

            for (scenario, row) in rows {
                problem.add_row(..=0.0, row);
                upper_keys.push(SecondStageIndex::new(
                    scenario,
                    asset.clone(),
                    snapshot.clone(),
                ));
            }
        }
    }

    let mut lower_keys = CapacityCouplingKeys::at_current_rows(problem);
    for asset in committable {
        let profile = &profiles[asset];
        for snapshot in active_snapshots(profile, grid) {
            let status = variables.status_var(&FirstStageIndex::new(
                asset.clone(),
                snapshot.clone(),
            ))?;
            let rows = broadcast.rows(&[(status, profile.p_min.value())], |scenario| {
                let index =
                    SecondStageIndex::new(scenario.clone(), asset.clone(), snapshot.clone());
                Ok(vec![(variables.power_var(&index)?, -1.0)])
            })?;

            for (scenario, row) in rows {
                problem.add_row(..=0.0, row);
                lower_keys.push(SecondStageIndex::new(
                    scenario,
                    asset.clone(),
                    snapshot.clone(),
                ));
            }
        }
    }

    Ok((upper_keys, lower_keys))
}

/// Add the status-transition constraints.
///
/// `StartUp[a,t] - ShutDown[a,t] = Status[a,t] - Status[a,t-1]`, anchored at
/// the asset's first active snapshot with its aggregated initial state.
/// Transitions chain over the asset's active snapshots, so a gap in the
/// activity mask joins its neighbours directly.
fn add_status_transition_constraints(
    problem: &mut Problem,
    variables: &VariableMap,
    committable: &IndexSet<AssetID>,
    profiles: &CommitmentProfiles,
    grid: &SnapshotGrid,
) -> Result<CommitmentKeys> {
    let mut keys = CommitmentKeys::at_current_rows(problem);
    for asset in committable {
        let profile = &profiles[asset];
        let mut previous: Option<&Snapshot> = None;
        for snapshot in active_snapshots(profile, grid) {
            let index = FirstStageIndex::new(asset.clone(), snapshot.clone());
            let start_up = variables.start_up_var(&index)?;
            let shut_down = variables.shut_down_var(&index)?;
            let status = variables.status_var(&index)?;

            match previous {
                None => {
                    // StartUp - ShutDown - Status = -initial
                    let initial = if profile.initially_up { 1.0 } else { 0.0 };
                    problem.add_row(
                        -initial..=-initial,
                        [(start_up, 1.0), (shut_down, -1.0), (status, -1.0)],
                    );
                }
                Some(previous) => {
                    let previous_status = variables
                        .status_var(&FirstStageIndex::new(asset.clone(), previous.clone()))?;
                    problem.add_row(
                        0.0..=0.0,
                        [
                            (start_up, 1.0),
                            (shut_down, -1.0),
                            (status, -1.0),
                            (previous_status, 1.0),
                        ],
                    );
                }
            }

            keys.push(index);
            previous = Some(snapshot);
        }
    }

    Ok(keys)
}

/// Add the minimum up-time constraints.
///
/// The sum of `StartUp` over the trailing window of the minimum up-time length
/// must not exceed `Status[a,t]`: a unit started within the window is still
/// running at `t`. Windows are truncated at the start of the horizon. Assets
/// with a minimum up time of at most one snapshot need no window constraint.
fn add_min_up_time_constraints(
    problem: &mut Problem,
    variables: &VariableMap,
    committable: &IndexSet<AssetID>,
    profiles: &CommitmentProfiles,
    grid: &SnapshotGrid,
) -> Result<CommitmentKeys> {
    let mut keys = CommitmentKeys::at_current_rows(problem);
    for asset in committable {
        let profile = &profiles[asset];
        if profile.min_up_time <= 1 {
            continue;
        }

        let snapshots = active_snapshots(profile, grid);
        for (position, snapshot) in snapshots.iter().enumerate() {
            let index = FirstStageIndex::new(asset.clone(), (*snapshot).clone());
            let mut terms =
                trailing_window_terms(&snapshots, position, profile.min_up_time, |snapshot| {
                    variables.start_up_var(&FirstStageIndex::new(asset.clone(), snapshot.clone()))
                })?;
            terms.push((variables.status_var(&index)?, -1.0));

            // sum(StartUp over window) - Status <= 0
            problem.add_row(..=0.0, terms);
            keys.push(index);
        }
    }

    Ok(keys)
}

/// Add the minimum down-time constraints.
///
/// Mirror image of the up-time constraints: the sum of `ShutDown` over the
/// trailing window must not exceed `1 - Status[a,t]`.
fn add_min_down_time_constraints(
    problem: &mut Problem,
    variables: &VariableMap,
    committable: &IndexSet<AssetID>,
    profiles: &CommitmentProfiles,
    grid: &SnapshotGrid,
) -> Result<CommitmentKeys> {
    let mut keys = CommitmentKeys::at_current_rows(problem);
    for asset in committable {
        let profile = &profiles[asset];
        if profile.min_down_time <= 1 {
            continue;
        }

        let snapshots = active_snapshots(profile, grid);
        for (position, snapshot) in snapshots.iter().enumerate() {
            let index = FirstStageIndex::new(asset.clone(), (*snapshot).clone());
            let mut terms =
                trailing_window_terms(&snapshots, position, profile.min_down_time, |snapshot| {
                    variables.shut_down_var(&FirstStageIndex::new(asset.clone(), snapshot.clone()))
                })?;
            terms.push((variables.status_var(&index)?, 1.0));

            // sum(ShutDown over window) + Status <= 1
            problem.add_row(..=1.0, terms);
            keys.push(index);
        }
    }

    Ok(keys)
}

/// Unit-coefficient terms over the trailing window of up to `len` snapshots
/// ending at `position`, truncated at the start of the horizon
fn trailing_window_terms<F>(
    snapshots: &[&Snapshot],
    position: usize,
    len: u32,
    var: F,
) -> Result<Vec<Term>>
where
    F: Fn(&Snapshot) -> Result<super::Variable>,
{
    let start = position.saturating_sub(len.saturating_sub(1) as usize);
    snapshots[start..=position]
        .iter()
        .map(|&snapshot| Ok((var(snapshot)?, 1.0)))
        .collect()
}

/// Add the initial-condition hold constraints.
///
/// A unit that starts the horizon running with part of its minimum up time
/// outstanding is pinned on for the remaining snapshots; a unit that starts
/// off with part of its minimum down time outstanding is pinned off. The holds
/// use the aggregated initial state, so they are independent of scenario.
fn add_initial_condition_constraints(
    problem: &mut Problem,
    variables: &VariableMap,
    committable: &IndexSet<AssetID>,
    profiles: &CommitmentProfiles,
    grid: &SnapshotGrid,
) -> Result<CommitmentKeys> {
    let mut keys = CommitmentKeys::at_current_rows(problem);
    for asset in committable {
        let profile = &profiles[asset];
        let (hold, pinned_value) = if profile.initially_up {
            (profile.initial_up_hold(), 1.0)
        } else {
            (profile.initial_down_hold(), 0.0)
        };
        if hold == 0 {
            continue;
        }

        let snapshots = active_snapshots(profile, grid);
        for snapshot in snapshots.iter().take(hold as usize) {
            let index = FirstStageIndex::new(asset.clone(), (*snapshot).clone());
            let status = variables.status_var(&index)?;

            problem.add_row(pinned_value..=pinned_value, [(status, 1.0)]);
            keys.push(index);
        }
    }

    Ok(keys)
}
