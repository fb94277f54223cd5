//! Code for working with the discrete time grid.
//!
//! Snapshots are the ordered points in time at which commitment and dispatch
//! decisions are made. The grid is shared by every scenario: scenario branching
//! affects second-stage data only, never the time axis itself.
use crate::id::{IDCollection, define_id_type};
use crate::units::Hours;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use std::borrow::Borrow;
use std::iter;

define_id_type! {Snapshot}

/// The ordered time grid over which a model is built.
///
/// Each snapshot carries the number of hours it represents, used to weight
/// dispatch costs. Snapshots are totally ordered by their position in the grid.
#[derive(PartialEq, Debug)]
pub struct SnapshotGrid {
    /// Snapshots in chronological order along with their durations
    snapshots: IndexMap<Snapshot, Hours>,
}

impl Default for SnapshotGrid {
    /// The default grid is a single snapshot covering one hour
    fn default() -> Self {
        Self {
            snapshots: iter::once(("t0".into(), Hours(1.0))).collect(),
        }
    }
}

impl SnapshotGrid {
    /// Create a grid from snapshots in chronological order with their durations.
    pub fn new(snapshots: IndexMap<Snapshot, Hours>) -> Result<Self> {
        ensure!(!snapshots.is_empty(), "Snapshot grid cannot be empty");
        for (snapshot, duration) in &snapshots {
            ensure!(
                duration.value() > 0.0,
                "Snapshot {snapshot} has a non-positive duration"
            );
        }

        Ok(Self { snapshots })
    }

    /// Create a grid of one-hour snapshots with the given labels.
    pub fn hourly<I>(labels: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Snapshot>,
    {
        let snapshots = labels
            .into_iter()
            .map(|label| (label.into(), Hours(1.0)))
            .collect();
        Self::new(snapshots)
    }

    /// The number of snapshots in the grid
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the grid contains no snapshots (never true for a constructed grid)
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Iterate over all [`Snapshot`]s in chronological order
    pub fn iter_ids(&self) -> impl Iterator<Item = &Snapshot> + Clone {
        self.snapshots.keys()
    }

    /// Iterate over all snapshots along with their durations
    pub fn iter(&self) -> impl Iterator<Item = (&Snapshot, Hours)> {
        self.snapshots
            .iter()
            .map(|(snapshot, duration)| (snapshot, *duration))
    }

    /// The position of the given snapshot in the grid
    pub fn position(&self, snapshot: &Snapshot) -> Result<usize> {
        self.snapshots
            .get_index_of(snapshot)
            .with_context(|| format!("Snapshot {snapshot} is not part of the grid"))
    }

    /// The duration of the given snapshot.
    ///
    /// Panics if the snapshot is not part of the grid.
    pub fn duration(&self, snapshot: &Snapshot) -> Hours {
        *self
            .snapshots
            .get(snapshot)
            .expect("Snapshot not part of the grid")
    }
}

impl IDCollection<Snapshot> for SnapshotGrid {
    fn get_id_by_str(&self, id: &str) -> Result<Snapshot> {
        let (found, _) = self
            .snapshots
            .get_key_value(id)
            .with_context(|| format!("Unknown snapshot {id} found"))?;
        Ok(found.clone())
    }

    fn get_id(&self, id: &Snapshot) -> Result<Snapshot> {
        self.get_id_by_str(id.borrow())
    }
}
