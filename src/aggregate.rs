//! Aggregation of scenario-expanded records to scenario-free commitment data.
//!
//! First-stage quantities must not vary by scenario, but the upstream layout
//! may carry one record per scenario with disagreeing values. The rules here
//! resolve any disagreement conservatively, so that the single commitment
//! decision satisfies every scenario's requirement:
//!
//! * eligibility masks: a pair is active if it is active in at least one
//!   scenario (logical OR);
//! * minimum up/down times: the longest requirement across scenarios;
//! * capacity bounds: the intersection (largest `p_min`, smallest `p_max`);
//! * first-stage costs: the probability-weighted expectation.
//!
//! A record without scenario copies passes through unchanged. Second-stage
//! data (marginal cost) is deliberately *not* aggregated; it stays on the
//! per-scenario records.
use crate::asset::{AssetID, AssetPool, AssetRef, UnitKey};
use crate::id::IDCollection;
use crate::scenario::ScenarioSet;
use crate::snapshot::{Snapshot, SnapshotGrid};
use crate::stage::resolve_assets;
use crate::units::{Dimensionless, Money, MoneyPerHour, Power};
use anyhow::{Context, Result, ensure};
use indexmap::{IndexMap, IndexSet};

/// The scenario-free commitment view of one asset.
#[derive(PartialEq, Debug)]
pub struct CommitmentProfile {
    /// Whether any scenario copy flags the asset committable
    pub committable: bool,
    /// Minimum stable output while committed
    pub p_min: Power,
    /// Nominal capacity
    pub p_max: Power,
    /// Expected cost per hour of standing committed
    pub stand_by_cost: MoneyPerHour,
    /// Expected one-off start-up cost
    pub start_up_cost: Money,
    /// Expected one-off shut-down cost
    pub shut_down_cost: Money,
    /// Minimum number of consecutive snapshots on once started
    pub min_up_time: u32,
    /// Minimum number of consecutive snapshots off once stopped
    pub min_down_time: u32,
    /// Whether the unit is running at the start of the horizon in any scenario
    pub initially_up: bool,
    /// Snapshots already spent on before the horizon (shortest across scenarios)
    pub up_time_before: u32,
    /// Snapshots already spent off before the horizon (shortest across scenarios)
    pub down_time_before: u32,
    /// Aggregated per-snapshot eligibility; snapshots not present are eligible
    active: IndexMap<Snapshot, bool>,
}

impl CommitmentProfile {
    /// Whether the asset is eligible to run at the given snapshot
    pub fn is_active(&self, snapshot: &Snapshot) -> bool {
        self.active.get(snapshot).copied().unwrap_or(true)
    }

    /// Number of leading snapshots the unit must stay committed.
    ///
    /// Zero unless the unit starts the horizon running with part of its minimum
    /// up time still outstanding.
    pub fn initial_up_hold(&self) -> u32 {
        if self.initially_up {
            self.min_up_time.saturating_sub(self.up_time_before)
        } else {
            0
        }
    }

    /// Number of leading snapshots the unit must stay off.
    ///
    /// Zero unless the unit starts the horizon off with part of its minimum
    /// down time still outstanding.
    pub fn initial_down_hold(&self) -> u32 {
        if self.initially_up {
            0
        } else {
            self.min_down_time.saturating_sub(self.down_time_before)
        }
    }
}

/// Scenario-free commitment profiles keyed by asset identity
pub type CommitmentProfiles = IndexMap<AssetID, CommitmentProfile>;

/// Aggregate every asset in the pool to a scenario-free profile.
///
/// The output carries no scenario axis. An asset represented by a single
/// untagged record passes through unchanged; an asset represented by
/// scenario-tagged copies must have exactly one copy per scenario in the set.
pub fn aggregate_pool(
    pool: &AssetPool,
    scenarios: &ScenarioSet,
    grid: &SnapshotGrid,
) -> Result<CommitmentProfiles> {
    let assets = resolve_assets(pool, scenarios)?;

    let mut profiles = CommitmentProfiles::new();
    for asset_id in assets {
        let profile = aggregate_records(&asset_id, pool, scenarios, grid)?;
        profiles.insert(asset_id, profile);
    }

    Ok(profiles)
}

/// Aggregate the scenario copies of one asset.
fn aggregate_records(
    asset_id: &AssetID,
    pool: &AssetPool,
    scenarios: &ScenarioSet,
    grid: &SnapshotGrid,
) -> Result<CommitmentProfile> {
    let records: Vec<(&UnitKey, &AssetRef)> = pool.records_for(asset_id).collect();
    check_record_layout(asset_id, &records, scenarios)?;

    // Weight of each record in first-stage cost expectations. A single
    // untagged record covers the whole probability mass.
    let mut weighted = Vec::with_capacity(records.len());
    for (key, asset) in &records {
        let weight = match &key.scenario {
            Some(scenario) => scenarios.weight(scenario)?,
            None => Dimensionless(1.0),
        };
        weighted.push((weight, *asset));
    }

    let p_min = fold_values(&weighted, |asset| asset.p_min.value(), f64::max);
    let p_max = fold_values(&weighted, |asset| asset.p_max.value(), f64::min);
    ensure!(
        p_min <= p_max,
        "Asset {asset_id}: capacity bounds are infeasible after aggregation across scenarios"
    );

    Ok(CommitmentProfile {
        committable: weighted.iter().any(|(_, asset)| asset.committable),
        p_min: Power(p_min),
        p_max: Power(p_max),
        stand_by_cost: MoneyPerHour(expectation(&weighted, |asset| asset.stand_by_cost.value())),
        start_up_cost: Money(expectation(&weighted, |asset| asset.start_up_cost.value())),
        shut_down_cost: Money(expectation(&weighted, |asset| asset.shut_down_cost.value())),
        min_up_time: weighted
            .iter()
            .map(|(_, asset)| asset.min_up_time)
            .max()
            .unwrap_or(0),
        min_down_time: weighted
            .iter()
            .map(|(_, asset)| asset.min_down_time)
            .max()
            .unwrap_or(0),
        initially_up: weighted.iter().any(|(_, asset)| asset.initially_up),
        up_time_before: weighted
            .iter()
            .map(|(_, asset)| asset.up_time_before)
            .min()
            .unwrap_or(0),
        down_time_before: weighted
            .iter()
            .map(|(_, asset)| asset.down_time_before)
            .min()
            .unwrap_or(0),
        active: aggregate_activity(asset_id, &weighted, grid)?,
    })
}

/// Check that an asset is either a single untagged record or a complete set of
/// scenario-tagged copies.
fn check_record_layout(
    asset_id: &AssetID,
    records: &[(&UnitKey, &AssetRef)],
    scenarios: &ScenarioSet,
) -> Result<()> {
    let tagged = records
        .iter()
        .filter(|(key, _)| key.scenario.is_some())
        .count();
    if tagged == 0 {
        // Duplicate untagged keys are rejected at insertion, so this is one record
        return Ok(());
    }

    ensure!(
        tagged == records.len(),
        "Asset {asset_id}: mixes scenario-tagged and untagged records"
    );
    ensure!(
        records.len() == scenarios.len(),
        "Asset {asset_id}: expected one record per scenario ({}), found {}",
        scenarios.len(),
        records.len()
    );
    for scenario in records.iter().filter_map(|(key, _)| key.scenario.as_ref()) {
        scenarios
            .get_id(scenario)
            .with_context(|| format!("Asset {asset_id}: record for unknown scenario"))?;
    }

    Ok(())
}

/// Fold a numeric field across records with the given combiner.
fn fold_values<F, G>(weighted: &[(Dimensionless, &AssetRef)], field: F, combine: G) -> f64
where
    F: Fn(&AssetRef) -> f64,
    G: Fn(f64, f64) -> f64,
{
    weighted
        .iter()
        .map(|&(_, asset)| field(asset))
        .reduce(combine)
        .unwrap_or(0.0)
}

/// Probability-weighted expectation of a cost field across records.
fn expectation<F>(weighted: &[(Dimensionless, &AssetRef)], field: F) -> f64
where
    F: Fn(&AssetRef) -> f64,
{
    weighted
        .iter()
        .map(|&(weight, asset)| weight.0 * field(asset))
        .sum()
}

/// OR the eligibility masks of all records together.
///
/// Snapshots no record mentions stay implicit (eligible). A mask entry naming
/// a snapshot outside the grid is a structural error.
fn aggregate_activity(
    asset_id: &AssetID,
    weighted: &[(Dimensionless, &AssetRef)],
    grid: &SnapshotGrid,
) -> Result<IndexMap<Snapshot, bool>> {
    let mentioned: IndexSet<&Snapshot> = weighted
        .iter()
        .flat_map(|(_, asset)| asset.active.keys())
        .collect();

    let mut active = IndexMap::new();
    for snapshot in mentioned {
        grid.position(snapshot)
            .with_context(|| format!("Asset {asset_id}: activity mask names an unknown snapshot"))?;

        let value = weighted.iter().any(|(_, asset)| asset.is_active(snapshot));
        active.insert(snapshot.clone(), value);
    }

    Ok(active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;
    use crate::fixture::{gas_turbine, grid, scenarios};
    use crate::units::MoneyPerEnergy;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;
    use std::borrow::Borrow;

    fn expanded_pool(scenarios: &ScenarioSet, variants: impl Fn(&str) -> Asset) -> AssetPool {
        let mut pool = AssetPool::new();
        for scenario in scenarios.iter_ids() {
            pool.insert_for_scenario(scenario.clone(), variants(scenario.borrow()))
                .unwrap();
        }
        pool
    }

    #[rstest]
    fn test_untagged_record_passes_through(
        gas_turbine: Asset,
        grid: SnapshotGrid,
        scenarios: ScenarioSet,
    ) {
        let mut pool = AssetPool::new();
        pool.insert(gas_turbine.clone()).unwrap();

        let profiles = aggregate_pool(&pool, &scenarios, &grid).unwrap();
        let profile = &profiles[&gas_turbine.id];
        assert!(profile.committable);
        assert_eq!(profile.p_min, gas_turbine.p_min);
        assert_eq!(profile.p_max, gas_turbine.p_max);
        assert_eq!(profile.min_up_time, gas_turbine.min_up_time);
    }

    #[rstest]
    fn test_activity_mask_or(gas_turbine: Asset, grid: SnapshotGrid, scenarios: ScenarioSet) {
        let pool = expanded_pool(&scenarios, |scenario| Asset {
            // Inactive at t1 in every scenario; inactive at t2 only in "low"
            active: [("t1".into(), false), ("t2".into(), scenario != "low")]
                .into_iter()
                .collect(),
            ..gas_turbine.clone()
        });

        let profiles = aggregate_pool(&pool, &scenarios, &grid).unwrap();
        let profile = &profiles[&gas_turbine.id];
        assert!(!profile.is_active(&"t1".into()));
        assert!(profile.is_active(&"t2".into()));
        assert!(profile.is_active(&"t0".into()));
    }

    #[rstest]
    fn test_thresholds_take_maximum(gas_turbine: Asset, grid: SnapshotGrid, scenarios: ScenarioSet) {
        let pool = expanded_pool(&scenarios, |scenario| Asset {
            min_up_time: if scenario == "low" { 2 } else { 4 },
            min_down_time: if scenario == "low" { 3 } else { 1 },
            ..gas_turbine.clone()
        });

        let profiles = aggregate_pool(&pool, &scenarios, &grid).unwrap();
        let profile = &profiles[&gas_turbine.id];
        assert_eq!(profile.min_up_time, 4);
        assert_eq!(profile.min_down_time, 3);
    }

    #[rstest]
    fn test_capacity_bounds_intersect(
        gas_turbine: Asset,
        grid: SnapshotGrid,
        scenarios: ScenarioSet,
    ) {
        let pool = expanded_pool(&scenarios, |scenario| Asset {
            p_min: if scenario == "low" {
                Power(1.0)
            } else {
                Power(3.0)
            },
            p_max: if scenario == "low" {
                Power(8.0)
            } else {
                Power(12.0)
            },
            ..gas_turbine.clone()
        });

        let profiles = aggregate_pool(&pool, &scenarios, &grid).unwrap();
        let profile = &profiles[&gas_turbine.id];
        assert_eq!(profile.p_min, Power(3.0));
        assert_eq!(profile.p_max, Power(8.0));
    }

    #[rstest]
    fn test_infeasible_bounds_after_aggregation(
        gas_turbine: Asset,
        grid: SnapshotGrid,
        scenarios: ScenarioSet,
    ) {
        let pool = expanded_pool(&scenarios, |scenario| Asset {
            p_min: if scenario == "low" {
                Power(9.0)
            } else {
                Power(0.0)
            },
            p_max: if scenario == "low" {
                Power(10.0)
            } else {
                Power(5.0)
            },
            ..gas_turbine.clone()
        });

        assert!(aggregate_pool(&pool, &scenarios, &grid).is_err());
    }

    #[rstest]
    fn test_first_stage_costs_expectation(
        gas_turbine: Asset,
        grid: SnapshotGrid,
        scenarios: ScenarioSet,
    ) {
        let pool = expanded_pool(&scenarios, |scenario| Asset {
            start_up_cost: if scenario == "low" {
                Money(100.0)
            } else {
                Money(200.0)
            },
            ..gas_turbine.clone()
        });

        let profiles = aggregate_pool(&pool, &scenarios, &grid).unwrap();
        let profile = &profiles[&gas_turbine.id];
        // Scenarios are equally weighted
        assert_approx_eq!(f64, profile.start_up_cost.value(), 150.0);
    }

    #[rstest]
    fn test_initially_up_or_and_holds(
        gas_turbine: Asset,
        grid: SnapshotGrid,
        scenarios: ScenarioSet,
    ) {
        let pool = expanded_pool(&scenarios, |scenario| Asset {
            min_up_time: 3,
            initially_up: scenario == "low",
            up_time_before: u32::from(scenario == "low"),
            down_time_before: if scenario == "low" { 0 } else { 2 },
            ..gas_turbine.clone()
        });

        let profiles = aggregate_pool(&pool, &scenarios, &grid).unwrap();
        let profile = &profiles[&gas_turbine.id];
        assert!(profile.initially_up);
        // Shortest prior up time across scenarios gives the longest hold
        assert_eq!(profile.up_time_before, 0);
        assert_eq!(profile.initial_up_hold(), 3);
        assert_eq!(profile.initial_down_hold(), 0);
    }

    #[rstest]
    fn test_incomplete_scenario_copies_rejected(
        gas_turbine: Asset,
        grid: SnapshotGrid,
        scenarios: ScenarioSet,
    ) {
        let mut pool = AssetPool::new();
        pool.insert_for_scenario("low".into(), gas_turbine).unwrap();

        assert!(aggregate_pool(&pool, &scenarios, &grid).is_err());
    }

    #[rstest]
    fn test_mixed_layout_rejected(gas_turbine: Asset, grid: SnapshotGrid, scenarios: ScenarioSet) {
        let mut pool = AssetPool::new();
        pool.insert(gas_turbine.clone()).unwrap();
        pool.insert_for_scenario("low".into(), gas_turbine).unwrap();
        pool.insert_for_scenario(
            "high".into(),
            Asset::new("other".into(), Power(0.0), Power(1.0)),
        )
        .unwrap();

        assert!(aggregate_pool(&pool, &scenarios, &grid).is_err());
    }

    #[rstest]
    fn test_marginal_cost_not_aggregated(
        gas_turbine: Asset,
        grid: SnapshotGrid,
        scenarios: ScenarioSet,
    ) {
        let pool = expanded_pool(&scenarios, |scenario| Asset {
            marginal_cost: if scenario == "low" {
                MoneyPerEnergy(10.0)
            } else {
                MoneyPerEnergy(100.0)
            },
            ..gas_turbine.clone()
        });

        // The per-scenario records keep their own marginal costs
        aggregate_pool(&pool, &scenarios, &grid).unwrap();
        let low = pool.get(&"low".into(), &gas_turbine.id).unwrap();
        assert_eq!(low.marginal_cost, MoneyPerEnergy(10.0));
    }
}
