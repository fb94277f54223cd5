//! Construction and solving of the unit-commitment optimisation problem.
//!
//! Commitment variables (`Status`, `StartUp`, `ShutDown`) are declared once per
//! committable asset and snapshot. Dispatch variables (`Power`) are declared
//! once per scenario, asset and snapshot. Constraints are emitted into a
//! caller-supplied [`Problem`], so several models can be built side by side and
//! callers can stack their own rows (e.g. coupling constraints between assets)
//! on top before solving.
use crate::aggregate::{CommitmentProfile, CommitmentProfiles, aggregate_pool};
use crate::asset::{Asset, AssetPool};
use crate::scenario::ScenarioSet;
use crate::snapshot::SnapshotGrid;
use crate::stage::{
    FirstStageIndex, SecondStageIndex, first_stage_indices, resolve_assets, resolve_committable,
    second_stage_indices,
};
use crate::units::{Dimensionless, Hours, Money, MoneyPerPower, Power};
use anyhow::{Context, Result};
use highs::{HighsModelStatus, HighsStatus, RowProblem as Problem, Sense};
use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt;
use std::ops::Range;

mod constraints;
use constraints::{ConstraintKeys, add_commitment_constraints};

/// A decision variable in the optimisation
///
/// Note that this type does **not** include the value of the variable; it just
/// refers to a particular column of the problem.
pub type Variable = highs::Col;

/// The map of first-stage commitment variables, one per (asset, snapshot)
type CommitmentVariableMap = IndexMap<FirstStageIndex, Variable>;

/// The map of second-stage dispatch variables, one per (scenario, asset, snapshot)
type DispatchVariableMap = IndexMap<SecondStageIndex, Variable>;

/// Whether commitment variables are integer or linearised
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Integrality {
    /// Commitment variables are binary
    #[default]
    Binary,
    /// Commitment variables are continuous in [0, 1] (LP relaxation)
    Relaxed,
}

/// A map for easy lookup of variables in the problem.
///
/// The entries are ordered (see [`IndexMap`]).
///
/// We use this data structure for two things:
///
/// 1. In order to define constraints for the optimisation
/// 2. To keep track of the combination of parameters that each variable
///    corresponds to, for when we are reading the results of the optimisation.
///
/// Commitment and dispatch variables live in separate maps with separate key
/// types, so a commitment variable cannot acquire a scenario axis by
/// construction.
pub struct VariableMap {
    status_vars: CommitmentVariableMap,
    status_var_idx: Range<usize>,
    start_up_vars: CommitmentVariableMap,
    start_up_var_idx: Range<usize>,
    shut_down_vars: CommitmentVariableMap,
    shut_down_var_idx: Range<usize>,
    power_vars: DispatchVariableMap,
    power_var_idx: Range<usize>,
}

impl VariableMap {
    /// Create the map and add all variables to the problem.
    fn new_with_variables(
        problem: &mut Problem,
        run: &CommitmentRun<'_>,
        profiles: &CommitmentProfiles,
        first_stage: &IndexSet<FirstStageIndex>,
        second_stage: &IndexSet<SecondStageIndex>,
    ) -> Result<Self> {
        let grid = run.grid;
        let integrality = run.integrality;

        // Status columns carry the stand-by cost of being committed
        let mut start = problem.num_cols();
        let status_vars = add_commitment_variables(
            problem,
            first_stage,
            profiles,
            grid,
            integrality,
            |profile, duration| (profile.stand_by_cost * duration).value(),
        );
        let status_var_idx = start..problem.num_cols();

        start = problem.num_cols();
        let start_up_vars = add_commitment_variables(
            problem,
            first_stage,
            profiles,
            grid,
            integrality,
            |profile, _| profile.start_up_cost.value(),
        );
        let start_up_var_idx = start..problem.num_cols();

        start = problem.num_cols();
        let shut_down_vars = add_commitment_variables(
            problem,
            first_stage,
            profiles,
            grid,
            integrality,
            |profile, _| profile.shut_down_cost.value(),
        );
        let shut_down_var_idx = start..problem.num_cols();

        start = problem.num_cols();
        let power_vars =
            add_power_variables(problem, run.pool, grid, run.scenarios, profiles, second_stage)?;
        let power_var_idx = start..problem.num_cols();

        Ok(Self {
            status_vars,
            status_var_idx,
            start_up_vars,
            start_up_var_idx,
            shut_down_vars,
            shut_down_var_idx,
            power_vars,
            power_var_idx,
        })
    }

    /// Get the `Status` variable for the given first-stage index
    pub fn status_var(&self, index: &FirstStageIndex) -> Result<Variable> {
        self.status_vars
            .get(index)
            .copied()
            .with_context(|| format!("No Status variable declared for {index}"))
    }

    /// Get the `StartUp` variable for the given first-stage index
    pub fn start_up_var(&self, index: &FirstStageIndex) -> Result<Variable> {
        self.start_up_vars
            .get(index)
            .copied()
            .with_context(|| format!("No StartUp variable declared for {index}"))
    }

    /// Get the `ShutDown` variable for the given first-stage index
    pub fn shut_down_var(&self, index: &FirstStageIndex) -> Result<Variable> {
        self.shut_down_vars
            .get(index)
            .copied()
            .with_context(|| format!("No ShutDown variable declared for {index}"))
    }

    /// Get the `Power` variable for the given second-stage index
    pub fn power_var(&self, index: &SecondStageIndex) -> Result<Variable> {
        self.power_vars
            .get(index)
            .copied()
            .with_context(|| format!("No Power variable declared for {index}"))
    }

    /// Iterate over the keys of the `Status` variables
    pub fn status_keys(&self) -> impl Iterator<Item = &FirstStageIndex> {
        self.status_vars.keys()
    }

    /// Iterate over the keys of the `Power` variables
    pub fn power_keys(&self) -> impl Iterator<Item = &SecondStageIndex> {
        self.power_vars.keys()
    }

    /// Total number of first-stage (commitment) variables
    pub fn num_commitment_vars(&self) -> usize {
        self.status_vars.len() + self.start_up_vars.len() + self.shut_down_vars.len()
    }

    /// Total number of second-stage (dispatch) variables
    pub fn num_dispatch_vars(&self) -> usize {
        self.power_vars.len()
    }
}

/// Add one family of commitment variables to the problem.
///
/// The variables are bounded in [0, 1] and integer unless the commitment is
/// relaxed. An empty index set adds nothing; this is not an error.
fn add_commitment_variables<F>(
    problem: &mut Problem,
    first_stage: &IndexSet<FirstStageIndex>,
    profiles: &CommitmentProfiles,
    grid: &SnapshotGrid,
    integrality: Integrality,
    cost_coeff: F,
) -> CommitmentVariableMap
where
    F: Fn(&CommitmentProfile, Hours) -> f64,
{
    let mut variables = CommitmentVariableMap::new();
    for index in first_stage {
        let profile = &profiles[&index.asset];
        let coeff = cost_coeff(profile, grid.duration(&index.snapshot));
        let var = match integrality {
            Integrality::Binary => problem.add_integer_column(coeff, 0.0..=1.0),
            Integrality::Relaxed => problem.add_column(coeff, 0.0..=1.0),
        };

        let existing = variables.insert(index.clone(), var).is_some();
        assert!(!existing, "Duplicate entry for var");
    }

    variables
}

/// Add the dispatch variables to the problem.
///
/// Power for a committable asset is bounded below by zero; its upper bound is
/// enforced through the capacity-coupling constraints so that it follows the
/// commitment decision. Power for a non-committable asset is bounded directly
/// by the record's capacity bounds.
fn add_power_variables(
    problem: &mut Problem,
    pool: &AssetPool,
    grid: &SnapshotGrid,
    scenarios: &ScenarioSet,
    profiles: &CommitmentProfiles,
    second_stage: &IndexSet<SecondStageIndex>,
) -> Result<DispatchVariableMap> {
    let mut variables = DispatchVariableMap::new();
    for index in second_stage {
        let record = pool
            .get(&index.scenario, &index.asset)
            .with_context(|| format!("No asset record governing dispatch for {index}"))?;
        let weight = scenarios.weight(&index.scenario)?;
        let coeff =
            calculate_power_cost_coefficient(record, weight, grid.duration(&index.snapshot));

        let var = if profiles[&index.asset].committable {
            problem.add_column(coeff.value(), 0.0..)
        } else {
            problem.add_column(coeff.value(), record.p_min.value()..=record.p_max.value())
        };

        let existing = variables.insert(index.clone(), var).is_some();
        assert!(!existing, "Duplicate entry for var");
    }

    Ok(variables)
}

/// Calculate the objective coefficient for a dispatch variable.
///
/// The coefficient is the asset's marginal cost over the snapshot's duration,
/// weighted by the scenario's probability: dispatch costs are second-stage, so
/// the objective carries their expectation.
fn calculate_power_cost_coefficient(
    asset: &Asset,
    weight: Dimensionless,
    duration: Hours,
) -> MoneyPerPower {
    weight * (asset.marginal_cost * duration)
}

/// The variables and constraints emitted for one commitment problem.
pub struct CommitmentModel {
    variables: VariableMap,
    constraint_keys: ConstraintKeys,
}

impl CommitmentModel {
    /// The problem's variables
    pub fn variables(&self) -> &VariableMap {
        &self.variables
    }

    /// The number of constraint rows emitted by this crate
    pub fn num_constraints(&self) -> usize {
        self.constraint_keys.num_rows()
    }
}

/// Defines the possible errors that can occur when running the solver
#[derive(Debug, Clone)]
pub enum ModelError {
    /// The model definition is incoherent.
    ///
    /// Users should not be able to trigger this error.
    Incoherent(HighsStatus),
    /// An acceptable solution could not be found
    NonOptimal(HighsModelStatus),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Incoherent(status) => write!(f, "Incoherent model: {status:?}"),
            ModelError::NonOptimal(status) => {
                write!(f, "Could not find acceptable result: {status:?}")
            }
        }
    }
}

impl Error for ModelError {}

/// Try to solve the model, returning an error if no acceptable solution was found.
///
/// An optimal solution is acceptable; so is the best feasible solution found
/// within a solver-imposed time limit, which is reported with a warning.
fn solve_acceptable(model: highs::Model) -> Result<highs::SolvedModel, ModelError> {
    let solved = model.try_solve().map_err(ModelError::Incoherent)?;

    match solved.status() {
        HighsModelStatus::Optimal => Ok(solved),
        HighsModelStatus::ModelEmpty => {
            debug!("Solved an empty model; no variables were declared");
            Ok(solved)
        }
        HighsModelStatus::ReachedTimeLimit => {
            warn!("Solver reached its time limit; returning the best feasible solution found");
            Ok(solved)
        }
        status => Err(ModelError::NonOptimal(status)),
    }
}

/// Provides the interface for building and running the commitment optimisation.
///
/// The pool, grid and scenario set are read-only during construction; all
/// mutable build state lives in the [`Problem`] passed to [`Self::build`].
pub struct CommitmentRun<'a> {
    pool: &'a AssetPool,
    grid: &'a SnapshotGrid,
    scenarios: &'a ScenarioSet,
    integrality: Integrality,
    time_limit: Option<f64>,
}

impl<'a> CommitmentRun<'a> {
    /// Create a new [`CommitmentRun`] for the given pool, grid and scenarios
    pub fn new(pool: &'a AssetPool, grid: &'a SnapshotGrid, scenarios: &'a ScenarioSet) -> Self {
        Self {
            pool,
            grid,
            scenarios,
            integrality: Integrality::default(),
            time_limit: None,
        }
    }

    /// Linearise the commitment variables (LP relaxation)
    pub fn with_relaxed_commitment(self) -> Self {
        Self {
            integrality: Integrality::Relaxed,
            ..self
        }
    }

    /// Impose a solver time limit in seconds.
    ///
    /// When the limit is hit, the best feasible solution found is returned
    /// rather than an error.
    pub fn with_time_limit(self, seconds: f64) -> Self {
        Self {
            time_limit: Some(seconds),
            ..self
        }
    }

    /// Build the variables and constraints into the given problem.
    ///
    /// A pool with no committable assets yields no commitment variables and no
    /// commitment constraints; an empty pool yields nothing at all. Neither is
    /// an error.
    pub fn build(&self, problem: &mut Problem) -> Result<CommitmentModel> {
        let committable = resolve_committable(self.pool, self.scenarios)?;
        let assets = resolve_assets(self.pool, self.scenarios)?;
        let profiles = aggregate_pool(self.pool, self.scenarios, self.grid)?;

        let first_stage = first_stage_indices(&committable, &profiles, self.grid);
        let second_stage = second_stage_indices(self.scenarios, &assets, &profiles, self.grid);

        let variables =
            VariableMap::new_with_variables(problem, self, &profiles, &first_stage, &second_stage)?;

        let constraint_keys = add_commitment_constraints(
            problem,
            &variables,
            &committable,
            &profiles,
            self.grid,
            self.scenarios,
        )?;

        let model = CommitmentModel {
            variables,
            constraint_keys,
        };
        info!(
            "Built commitment problem: {} commitment variables, {} dispatch variables, {} constraints",
            model.variables.num_commitment_vars(),
            model.variables.num_dispatch_vars(),
            model.num_constraints()
        );

        Ok(model)
    }

    /// Build the problem and solve it.
    pub fn run(&self) -> Result<Solution> {
        let mut problem = Problem::default();
        let model = self.build(&mut problem)?;
        self.solve(problem, model)
    }

    /// Solve a problem built with [`Self::build`], including any rows the
    /// caller has stacked on top.
    pub fn solve(&self, problem: Problem, model: CommitmentModel) -> Result<Solution> {
        let mut highs_model = problem.optimise(Sense::Minimise);
        if let Some(limit) = self.time_limit {
            highs_model.set_option("time_limit", limit);
        }

        let solved = solve_acceptable(highs_model)?;
        let objective_value = Money(solved.objective_value());

        Ok(Solution {
            solution: solved.get_solution(),
            variables: model.variables,
            constraint_keys: model.constraint_keys,
            objective_value,
        })
    }
}

/// The solution to the commitment optimisation problem
pub struct Solution {
    solution: highs::Solution,
    variables: VariableMap,
    constraint_keys: ConstraintKeys,
    objective_value: Money,
}

impl Solution {
    /// The objective value for the solution
    pub fn objective_value(&self) -> Money {
        self.objective_value
    }

    /// Iterate over the solved `Status` values.
    ///
    /// There is exactly one value per committable asset and snapshot,
    /// regardless of the number of scenarios.
    pub fn iter_status(&self) -> impl Iterator<Item = (&FirstStageIndex, f64)> {
        Self::zip_columns(
            &self.variables.status_vars,
            &self.solution,
            &self.variables.status_var_idx,
        )
    }

    /// Iterate over the solved `StartUp` values
    pub fn iter_start_ups(&self) -> impl Iterator<Item = (&FirstStageIndex, f64)> {
        Self::zip_columns(
            &self.variables.start_up_vars,
            &self.solution,
            &self.variables.start_up_var_idx,
        )
    }

    /// Iterate over the solved `ShutDown` values
    pub fn iter_shut_downs(&self) -> impl Iterator<Item = (&FirstStageIndex, f64)> {
        Self::zip_columns(
            &self.variables.shut_down_vars,
            &self.solution,
            &self.variables.shut_down_var_idx,
        )
    }

    /// Iterate over the solved `Power` values, one per scenario, asset and snapshot
    pub fn iter_power(&self) -> impl Iterator<Item = (&SecondStageIndex, Power)> {
        self.variables
            .power_vars
            .keys()
            .zip(self.solution.columns()[self.variables.power_var_idx.clone()].iter())
            .map(|(index, power)| (index, Power(*power)))
    }

    /// The solved `Status` value for the given first-stage index
    pub fn status_value(&self, index: &FirstStageIndex) -> Result<f64> {
        let position = self
            .variables
            .status_vars
            .get_index_of(index)
            .with_context(|| format!("No Status variable declared for {index}"))?;
        Ok(self.solution.columns()[self.variables.status_var_idx.start + position])
    }

    /// The solved `Power` value for the given second-stage index
    pub fn power_value(&self, index: &SecondStageIndex) -> Result<Power> {
        let position = self
            .variables
            .power_vars
            .get_index_of(index)
            .with_context(|| format!("No Power variable declared for {index}"))?;
        Ok(Power(
            self.solution.columns()[self.variables.power_var_idx.start + position],
        ))
    }

    /// Keys and dual values for the upper capacity-coupling constraints.
    ///
    /// Only meaningful for a relaxed run; a MILP has no useful row duals.
    pub fn iter_capacity_upper_duals(
        &self,
    ) -> impl Iterator<Item = (&SecondStageIndex, MoneyPerPower)> {
        self.constraint_keys
            .capacity_upper_keys
            .zip_duals(self.solution.dual_rows())
            .map(|(index, dual)| (index, MoneyPerPower(dual)))
    }

    /// Zip one commitment variable family with its slice of solved columns
    fn zip_columns<'a>(
        vars: &'a CommitmentVariableMap,
        solution: &'a highs::Solution,
        idx: &Range<usize>,
    ) -> impl Iterator<Item = (&'a FirstStageIndex, f64)> {
        vars.keys()
            .zip(solution.columns()[idx.clone()].iter().copied())
    }
}
