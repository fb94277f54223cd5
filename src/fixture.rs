//! Fixtures for tests
use crate::asset::{Asset, AssetPool};
use crate::scenario::ScenarioSet;
use crate::snapshot::SnapshotGrid;
use crate::units::{Money, MoneyPerEnergy, MoneyPerHour, Power};
use rstest::fixture;

#[fixture]
pub fn grid() -> SnapshotGrid {
    SnapshotGrid::hourly(["t0", "t1", "t2", "t3"]).unwrap()
}

#[fixture]
pub fn scenarios() -> ScenarioSet {
    ScenarioSet::from_weights([("low".into(), 0.5), ("high".into(), 0.5)]).unwrap()
}

#[fixture]
pub fn gas_turbine() -> Asset {
    Asset {
        committable: true,
        marginal_cost: MoneyPerEnergy(50.0),
        stand_by_cost: MoneyPerHour(5.0),
        start_up_cost: Money(100.0),
        min_up_time: 2,
        min_down_time: 2,
        down_time_before: 2,
        ..Asset::new("gas1".into(), Power(2.0), Power(10.0))
    }
}

#[fixture]
pub fn pool(gas_turbine: Asset) -> AssetPool {
    let mut pool = AssetPool::new();
    pool.insert(gas_turbine).unwrap();
    pool
}
