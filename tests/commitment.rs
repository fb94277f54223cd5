//! Integration tests that build and solve the commitment problem end to end.
use float_cmp::assert_approx_eq;
use highs::RowProblem as Problem;
use stochuc::asset::{Asset, AssetID, AssetPool};
use stochuc::id::IDCollection;
use stochuc::optimisation::CommitmentRun;
use stochuc::scenario::ScenarioSet;
use stochuc::snapshot::SnapshotGrid;
use stochuc::stage::{FirstStageIndex, SecondStageIndex};
use stochuc::units::{Money, MoneyPerEnergy, MoneyPerHour, Power};

/// An hourly grid with `len` snapshots labelled t0, t1, ...
fn hourly_grid(len: usize) -> SnapshotGrid {
    SnapshotGrid::hourly((0..len).map(|i| format!("t{i}"))).unwrap()
}

fn equal_scenarios(len: usize) -> ScenarioSet {
    ScenarioSet::equally_weighted((0..len).map(|i| format!("s{i}"))).unwrap()
}

/// A committable unit with running costs, so the solver keeps it off unless
/// something forces it on
fn costly_unit() -> Asset {
    Asset {
        committable: true,
        marginal_cost: MoneyPerEnergy(50.0),
        stand_by_cost: MoneyPerHour(5.0),
        start_up_cost: Money(100.0),
        min_up_time: 3,
        ..Asset::new("unit1".into(), Power(2.0), Power(10.0))
    }
}

fn pool_with(assets: impl IntoIterator<Item = Asset>) -> AssetPool {
    let mut pool = AssetPool::new();
    for asset in assets {
        pool.insert(asset).unwrap();
    }
    pool
}

/// The number of first-stage variables must not depend on the scenario count;
/// the number of second-stage variables must scale linearly with it.
#[test]
fn test_scenario_count_invariance() {
    let grid = hourly_grid(4);
    let mut commitment_counts = Vec::new();

    for scenario_count in [1, 2, 5] {
        let scenarios = equal_scenarios(scenario_count);
        let pool = pool_with([costly_unit()]);

        let mut problem = Problem::default();
        let model = CommitmentRun::new(&pool, &grid, &scenarios)
            .build(&mut problem)
            .unwrap();

        commitment_counts.push(model.variables().num_commitment_vars());
        assert_eq!(
            model.variables().num_dispatch_vars(),
            scenario_count * grid.len()
        );

        // Status is keyed by (asset, snapshot) only: one entry per snapshot
        assert_eq!(model.variables().status_keys().count(), grid.len());

        // Power carries the scenario axis: each scenario appears once per snapshot
        for scenario in scenarios.iter_ids() {
            let count = model
                .variables()
                .power_keys()
                .filter(|index| &index.scenario == scenario)
                .count();
            assert_eq!(count, grid.len());
        }
    }

    // Same count of binary variables for 1, 2 and 5 scenarios
    assert!(commitment_counts.iter().all(|&c| c == 3 * grid.len()));
}

/// A scenario-expanded pool must produce the same first-stage layout as an
/// unexpanded one: scenario-tagged copies collapse to one asset identity.
#[test]
fn test_expanded_pool_matches_unexpanded() {
    let grid = hourly_grid(4);
    let scenarios = equal_scenarios(2);

    let plain_pool = pool_with([costly_unit()]);

    let mut expanded_pool = AssetPool::new();
    for (i, scenario) in scenarios.iter_ids().enumerate() {
        let copy = Asset {
            // Second-stage data may differ per scenario
            marginal_cost: MoneyPerEnergy(50.0 + i as f64),
            ..costly_unit()
        };
        expanded_pool
            .insert_for_scenario(scenario.clone(), copy)
            .unwrap();
    }

    let mut plain_problem = Problem::default();
    let plain = CommitmentRun::new(&plain_pool, &grid, &scenarios)
        .build(&mut plain_problem)
        .unwrap();

    let mut expanded_problem = Problem::default();
    let expanded = CommitmentRun::new(&expanded_pool, &grid, &scenarios)
        .build(&mut expanded_problem)
        .unwrap();

    assert_eq!(
        plain.variables().num_commitment_vars(),
        expanded.variables().num_commitment_vars()
    );
    assert_eq!(
        plain.variables().num_dispatch_vars(),
        expanded.variables().num_dispatch_vars()
    );
    assert_eq!(plain.num_constraints(), expanded.num_constraints());
}

/// With zero committable assets the component contributes nothing and does not
/// error.
#[test]
fn test_empty_pool_is_noop() {
    let grid = hourly_grid(4);
    let scenarios = equal_scenarios(2);
    let pool = AssetPool::new();

    let mut problem = Problem::default();
    let model = CommitmentRun::new(&pool, &grid, &scenarios)
        .build(&mut problem)
        .unwrap();

    assert_eq!(model.variables().num_commitment_vars(), 0);
    assert_eq!(model.variables().num_dispatch_vars(), 0);
    assert_eq!(problem.num_cols(), 0);
    assert_eq!(problem.num_rows(), 0);
}

/// Force a start-up at t2 for a unit with a minimum up time of three
/// snapshots: it must stay committed for t2, t3 and t4, and its dispatch in
/// every scenario must respect the shared commitment.
#[test]
fn test_min_up_time_enforced() {
    let grid = hourly_grid(6);
    let scenarios = equal_scenarios(2);
    let pool = pool_with([costly_unit()]);
    let asset_id = AssetID::new("unit1");

    let run = CommitmentRun::new(&pool, &grid, &scenarios).with_time_limit(60.0);
    let mut problem = Problem::default();
    let model = run.build(&mut problem).unwrap();

    // Pin the start-up; everything else is up to the solver
    let t2 = grid.get_id_by_str("t2").unwrap();
    let start_up = model
        .variables()
        .start_up_var(&FirstStageIndex::new(asset_id.clone(), t2))
        .unwrap();
    problem.add_row(1.0..=1.0, [(start_up, 1.0)]);

    let solution = run.solve(problem, model).unwrap();

    for (snapshot, expected) in [
        ("t0", 0.0),
        ("t1", 0.0),
        ("t2", 1.0),
        ("t3", 1.0),
        ("t4", 1.0),
        ("t5", 0.0),
    ] {
        let index = FirstStageIndex::new(asset_id.clone(), snapshot.into());
        assert_approx_eq!(f64, solution.status_value(&index).unwrap(), expected, epsilon = 1e-5);
    }

    // Costs make each scenario dispatch at minimum load while committed
    for scenario in scenarios.iter_ids() {
        for (snapshot, committed) in [("t1", false), ("t2", true), ("t4", true), ("t5", false)] {
            let index =
                SecondStageIndex::new(scenario.clone(), asset_id.clone(), snapshot.into());
            let expected = if committed { 2.0 } else { 0.0 };
            assert_approx_eq!(
                f64,
                solution.power_value(&index).unwrap().value(),
                expected,
                epsilon = 1e-5
            );
        }
    }

    // The start and the stop are both recorded
    let start_ups: f64 = solution.iter_start_ups().map(|(_, value)| value).sum();
    assert_approx_eq!(f64, start_ups, 1.0, epsilon = 1e-5);
    let shut_downs: f64 = solution.iter_shut_downs().map(|(_, value)| value).sum();
    assert_approx_eq!(f64, shut_downs, 1.0, epsilon = 1e-5);
}

/// Capacity coupling: a committed unit dispatches within [p_min, p_max] in
/// every scenario; an uncommitted unit dispatches nothing.
#[test]
fn test_capacity_coupling() {
    let grid = hourly_grid(2);
    let scenarios = equal_scenarios(2);

    // Negative marginal cost rewards output, so the solver commits the unit
    // and pushes dispatch to p_max in every scenario
    let profitable = Asset {
        committable: true,
        marginal_cost: MoneyPerEnergy(-1.0),
        ..Asset::new("unit1".into(), Power(2.0), Power(10.0))
    };
    let pool = pool_with([profitable]);
    let solution = CommitmentRun::new(&pool, &grid, &scenarios).run().unwrap();

    for (index, status) in solution.iter_status() {
        assert_approx_eq!(f64, status, 1.0, epsilon = 1e-5);
        assert!(index.asset == AssetID::new("unit1"));
    }
    for (_, power) in solution.iter_power() {
        assert_approx_eq!(f64, power.value(), 10.0, epsilon = 1e-5);
    }

    // Positive running costs keep the unit off, and the coupling pins
    // dispatch to zero in every scenario despite p_min > 0
    let pool = pool_with([costly_unit()]);
    let solution = CommitmentRun::new(&pool, &grid, &scenarios).run().unwrap();

    for (_, status) in solution.iter_status() {
        assert_approx_eq!(f64, status, 0.0, epsilon = 1e-5);
    }
    for (_, power) in solution.iter_power() {
        assert_approx_eq!(f64, power.value(), 0.0, epsilon = 1e-5);
    }
}

/// A non-committable asset gets dispatch variables bounded by its static
/// capacity, and no commitment machinery at all.
#[test]
fn test_non_committable_dispatch() {
    let grid = hourly_grid(3);
    let scenarios = equal_scenarios(2);
    let heat_boiler = Asset {
        marginal_cost: MoneyPerEnergy(-1.0),
        ..Asset::new("boiler1".into(), Power(0.0), Power(7.0))
    };
    let pool = pool_with([heat_boiler]);

    let run = CommitmentRun::new(&pool, &grid, &scenarios);
    let mut problem = Problem::default();
    let model = run.build(&mut problem).unwrap();
    assert_eq!(model.variables().num_commitment_vars(), 0);
    assert_eq!(model.num_constraints(), 0);
    assert_eq!(
        model.variables().num_dispatch_vars(),
        scenarios.len() * grid.len()
    );

    let solution = run.solve(problem, model).unwrap();
    for (_, power) in solution.iter_power() {
        assert_approx_eq!(f64, power.value(), 7.0, epsilon = 1e-5);
    }
}

/// The LP relaxation declares the same variables with continuous bounds and
/// still solves.
#[test]
fn test_relaxed_commitment() {
    let grid = hourly_grid(2);
    let scenarios = equal_scenarios(2);
    let profitable = Asset {
        committable: true,
        marginal_cost: MoneyPerEnergy(-1.0),
        ..Asset::new("unit1".into(), Power(2.0), Power(10.0))
    };
    let pool = pool_with([profitable]);

    let solution = CommitmentRun::new(&pool, &grid, &scenarios)
        .with_relaxed_commitment()
        .run()
        .unwrap();

    for (_, status) in solution.iter_status() {
        assert_approx_eq!(f64, status, 1.0, epsilon = 1e-5);
    }
    assert_approx_eq!(f64, solution.objective_value().value(), -20.0, epsilon = 1e-6);
}
