//! Committable assets and the pool that holds them.
//!
//! The pool mirrors the upstream data layout: once scenarios are enabled, the
//! upstream catalog replicates each asset record per scenario and keys it by a
//! compound (scenario, asset) key. The pool preserves that layout untouched;
//! collapsing it back to scenario-free identities is the job of
//! [`crate::stage`] and [`crate::aggregate`].
use crate::id::define_id_type;
use crate::scenario::ScenarioID;
use crate::snapshot::Snapshot;
use crate::units::{Money, MoneyPerEnergy, MoneyPerHour, Power};
use anyhow::{Result, ensure};
use indexmap::IndexMap;
use std::fmt::Display;
use std::rc::Rc;

define_id_type! {AssetID}

/// A single schedulable unit (generator, boiler, CHP leg, etc.).
#[derive(PartialEq, Debug, Clone)]
pub struct Asset {
    /// The asset's identity, shared by all scenario copies of the record
    pub id: AssetID,
    /// Whether operation is gated by an on/off commitment decision
    pub committable: bool,
    /// Minimum stable output while committed
    pub p_min: Power,
    /// Nominal capacity
    pub p_max: Power,
    /// Cost per unit of energy produced
    pub marginal_cost: MoneyPerEnergy,
    /// Cost per hour of standing committed, regardless of output
    pub stand_by_cost: MoneyPerHour,
    /// One-off cost incurred when the unit starts up
    pub start_up_cost: Money,
    /// One-off cost incurred when the unit shuts down
    pub shut_down_cost: Money,
    /// Minimum number of consecutive snapshots the unit must stay on once started
    pub min_up_time: u32,
    /// Minimum number of consecutive snapshots the unit must stay off once stopped
    pub min_down_time: u32,
    /// Whether the unit is running at the start of the horizon
    pub initially_up: bool,
    /// Number of snapshots the unit has already been on before the horizon
    pub up_time_before: u32,
    /// Number of snapshots the unit has already been off before the horizon
    pub down_time_before: u32,
    /// Per-snapshot eligibility; snapshots not present are treated as eligible
    pub active: IndexMap<Snapshot, bool>,
}

impl Asset {
    /// Create an asset with the given capacity bounds.
    ///
    /// The asset starts out non-committable with no costs and no up/down-time
    /// restrictions; callers set the fields they need with struct update
    /// syntax.
    pub fn new(id: AssetID, p_min: Power, p_max: Power) -> Self {
        Self {
            id,
            committable: false,
            p_min,
            p_max,
            marginal_cost: MoneyPerEnergy(0.0),
            stand_by_cost: MoneyPerHour(0.0),
            start_up_cost: Money(0.0),
            shut_down_cost: Money(0.0),
            min_up_time: 0,
            min_down_time: 0,
            initially_up: false,
            up_time_before: 0,
            down_time_before: 0,
            active: IndexMap::new(),
        }
    }

    /// Whether the asset is eligible to run at the given snapshot
    pub fn is_active(&self, snapshot: &Snapshot) -> bool {
        self.active.get(snapshot).copied().unwrap_or(true)
    }

    /// Validate the record's fields
    fn check(&self) -> Result<()> {
        ensure!(
            self.p_min.value() >= 0.0,
            "Asset {}: p_min cannot be negative",
            self.id
        );
        ensure!(
            self.p_max.value() >= self.p_min.value(),
            "Asset {}: p_max is below p_min",
            self.id
        );
        ensure!(
            self.initially_up || self.up_time_before == 0,
            "Asset {}: up_time_before requires initially_up",
            self.id
        );
        ensure!(
            !self.initially_up || self.down_time_before == 0,
            "Asset {}: down_time_before requires the unit to start the horizon off",
            self.id
        );

        Ok(())
    }
}

/// A reference-counted handle to an asset record
pub type AssetRef = Rc<Asset>;

/// Identifies one record in the (possibly scenario-expanded) pool.
#[derive(Clone, Hash, Eq, PartialEq, Debug)]
pub struct UnitKey {
    /// Scenario tag; `None` when the upstream layout is not scenario-expanded
    pub scenario: Option<ScenarioID>,
    /// The asset identity
    pub asset: AssetID,
}

impl UnitKey {
    /// A key without a scenario tag
    pub fn plain(asset: AssetID) -> Self {
        Self {
            scenario: None,
            asset,
        }
    }

    /// A scenario-tagged key
    pub fn for_scenario(scenario: ScenarioID, asset: AssetID) -> Self {
        Self {
            scenario: Some(scenario),
            asset,
        }
    }
}

impl Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scenario {
            Some(scenario) => write!(f, "{}/{}", scenario, self.asset),
            None => write!(f, "{}", self.asset),
        }
    }
}

/// The pool of asset records, stored in the upstream data layout.
#[derive(Default, Debug)]
pub struct AssetPool {
    units: IndexMap<UnitKey, AssetRef>,
}

impl AssetPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record keyed without a scenario tag
    pub fn insert(&mut self, asset: Asset) -> Result<()> {
        self.insert_with_key(UnitKey::plain(asset.id.clone()), asset)
    }

    /// Insert a scenario-tagged copy of a record
    pub fn insert_for_scenario(&mut self, scenario: ScenarioID, asset: Asset) -> Result<()> {
        self.insert_with_key(UnitKey::for_scenario(scenario, asset.id.clone()), asset)
    }

    fn insert_with_key(&mut self, key: UnitKey, asset: Asset) -> Result<()> {
        asset.check()?;
        ensure!(
            self.units.insert(key.clone(), Rc::new(asset)).is_none(),
            "Duplicate record for unit {key}"
        );

        Ok(())
    }

    /// The number of records in the pool
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the pool contains no records
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Iterate over all records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&UnitKey, &AssetRef)> {
        self.units.iter()
    }

    /// Keys of records flagged committable, in pool order
    pub fn committable_keys(&self) -> impl Iterator<Item = &UnitKey> {
        self.units
            .iter()
            .filter(|(_, asset)| asset.committable)
            .map(|(key, _)| key)
    }

    /// All records sharing the given asset identity
    pub fn records_for<'a>(
        &'a self,
        asset: &'a AssetID,
    ) -> impl Iterator<Item = (&'a UnitKey, &'a AssetRef)> {
        self.units
            .iter()
            .filter(move |(key, _)| &key.asset == asset)
    }

    /// The record governing the given scenario, preferring a scenario-tagged copy.
    ///
    /// Falls back to the untagged record when the pool is not scenario-expanded.
    pub fn get(&self, scenario: &ScenarioID, asset: &AssetID) -> Option<&AssetRef> {
        self.units
            .get(&UnitKey::for_scenario(scenario.clone(), asset.clone()))
            .or_else(|| self.units.get(&UnitKey::plain(asset.clone())))
    }
}
