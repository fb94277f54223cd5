//! First- and second-stage index handling.
//!
//! Commitment decisions are first-stage: fixed before any scenario is realised
//! and therefore indexed by (asset, snapshot) only. Dispatch is second-stage
//! and carries the scenario axis. Keeping the two index kinds as distinct types
//! makes non-anticipativity a property of the type system rather than a
//! convention enforced by scattered runtime checks: a commitment variable
//! simply cannot be keyed by scenario.
use crate::aggregate::CommitmentProfiles;
use crate::asset::{AssetID, AssetPool, UnitKey};
use crate::id::IDCollection;
use crate::scenario::{ScenarioID, ScenarioSet};
use crate::snapshot::{Snapshot, SnapshotGrid};
use anyhow::{Context, Result};
use indexmap::IndexSet;
use itertools::iproduct;
use std::fmt::Display;

/// Index of a first-stage (commitment) quantity.
#[derive(Clone, Hash, Eq, PartialEq, Debug)]
pub struct FirstStageIndex {
    /// The asset the quantity belongs to
    pub asset: AssetID,
    /// The snapshot the quantity applies to
    pub snapshot: Snapshot,
}

impl FirstStageIndex {
    /// Create a new [`FirstStageIndex`]
    pub fn new(asset: AssetID, snapshot: Snapshot) -> Self {
        Self { asset, snapshot }
    }
}

impl Display for FirstStageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.asset, self.snapshot)
    }
}

/// Index of a second-stage (dispatch) quantity.
#[derive(Clone, Hash, Eq, PartialEq, Debug)]
pub struct SecondStageIndex {
    /// The scenario the quantity is realised in
    pub scenario: ScenarioID,
    /// The asset the quantity belongs to
    pub asset: AssetID,
    /// The snapshot the quantity applies to
    pub snapshot: Snapshot,
}

impl SecondStageIndex {
    /// Create a new [`SecondStageIndex`]
    pub fn new(scenario: ScenarioID, asset: AssetID, snapshot: Snapshot) -> Self {
        Self {
            scenario,
            asset,
            snapshot,
        }
    }

    /// Project away the scenario axis.
    ///
    /// The projection is total: every second-stage index corresponds to exactly
    /// one first-stage index. This is the only place where the two index kinds
    /// meet.
    pub fn project(&self) -> FirstStageIndex {
        FirstStageIndex::new(self.asset.clone(), self.snapshot.clone())
    }
}

impl Display for SecondStageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.scenario, self.asset, self.snapshot)
    }
}

/// Collapse a set of (possibly scenario-tagged) unit keys to asset identities.
///
/// Scenario-tagged copies of the same asset collapse to a single entry; a tag
/// naming a scenario outside `scenarios` is a structural error.
fn resolve_keys<'a, I>(keys: I, scenarios: &ScenarioSet) -> Result<IndexSet<AssetID>>
where
    I: Iterator<Item = &'a UnitKey>,
{
    let mut assets = IndexSet::new();
    for key in keys {
        if let Some(scenario) = &key.scenario {
            scenarios.get_id(scenario).with_context(|| {
                format!("Unit record {key} carries a scenario tag outside the scenario set")
            })?;
        }
        assets.insert(key.asset.clone());
    }

    Ok(assets)
}

/// The scenario-free identities of all committable units in the pool.
///
/// When the pool layout is scenario-expanded, the committable key set carries a
/// compound (scenario, asset) key; commitment variables must nevertheless be
/// declared once per asset, so the scenario component is projected away here
/// and duplicates collapse.
pub fn resolve_committable(pool: &AssetPool, scenarios: &ScenarioSet) -> Result<IndexSet<AssetID>> {
    resolve_keys(pool.committable_keys(), scenarios)
}

/// The scenario-free identities of every unit in the pool.
pub fn resolve_assets(pool: &AssetPool, scenarios: &ScenarioSet) -> Result<IndexSet<AssetID>> {
    resolve_keys(pool.iter().map(|(key, _)| key), scenarios)
}

/// The (asset, snapshot) index set for first-stage variables.
///
/// Pairs ruled out by the aggregated activity mask are skipped.
pub fn first_stage_indices(
    assets: &IndexSet<AssetID>,
    profiles: &CommitmentProfiles,
    grid: &SnapshotGrid,
) -> IndexSet<FirstStageIndex> {
    iproduct!(assets.iter(), grid.iter_ids())
        .filter(|(asset, snapshot)| {
            profiles
                .get(*asset)
                .is_some_and(|profile| profile.is_active(snapshot))
        })
        .map(|(asset, snapshot)| FirstStageIndex::new(asset.clone(), snapshot.clone()))
        .collect()
}

/// The (scenario, asset, snapshot) index set for second-stage variables.
///
/// Pairs ruled out by the aggregated activity mask are skipped in every
/// scenario; the scenario axis never reintroduces a pair the mask excludes.
pub fn second_stage_indices(
    scenarios: &ScenarioSet,
    assets: &IndexSet<AssetID>,
    profiles: &CommitmentProfiles,
    grid: &SnapshotGrid,
) -> IndexSet<SecondStageIndex> {
    iproduct!(scenarios.iter_ids(), assets.iter(), grid.iter_ids())
        .filter(|(_, asset, snapshot)| {
            profiles
                .get(*asset)
                .is_some_and(|profile| profile.is_active(snapshot))
        })
        .map(|(scenario, asset, snapshot)| {
            SecondStageIndex::new(scenario.clone(), asset.clone(), snapshot.clone())
        })
        .collect()
}
