//! Code for working with scenarios.
//!
//! A scenario is one probability-weighted realisation of the uncertain
//! second-stage parameters (demand, fuel price, availability). All scenarios
//! share the same time grid; only second-stage data branch on them.
use crate::id::{IDCollection, define_id_type};
use crate::units::Dimensionless;
use anyhow::{Context, Result, ensure};
use float_cmp::approx_eq;
use indexmap::IndexMap;
use log::warn;
use std::borrow::Borrow;
use std::iter;

define_id_type! {ScenarioID}

/// The probability-weighted set of scenarios for a model run.
///
/// The set is never empty: a deterministic model is represented as a single
/// scenario carrying the whole probability mass (see [`ScenarioSet::default`]).
#[derive(PartialEq, Debug, Clone)]
pub struct ScenarioSet {
    /// Probability weight of each scenario, in insertion order
    weights: IndexMap<ScenarioID, Dimensionless>,
}

impl Default for ScenarioSet {
    /// A single scenario with probability one
    fn default() -> Self {
        Self {
            weights: iter::once(("base".into(), Dimensionless(1.0))).collect(),
        }
    }
}

impl ScenarioSet {
    /// Create a scenario set from scenario probabilities.
    ///
    /// Weights must be positive. If they do not sum to one they are
    /// renormalised with a warning.
    pub fn from_weights<I>(weights: I) -> Result<Self>
    where
        I: IntoIterator<Item = (ScenarioID, f64)>,
    {
        let mut map: IndexMap<ScenarioID, f64> = IndexMap::new();
        for (id, weight) in weights {
            ensure!(weight > 0.0, "Scenario {id} has a non-positive weight");
            ensure!(
                map.insert(id.clone(), weight).is_none(),
                "Duplicate scenario {id}"
            );
        }
        ensure!(!map.is_empty(), "Scenario set cannot be empty");

        let total: f64 = map.values().sum();
        if !approx_eq!(f64, total, 1.0, epsilon = 1e-6) {
            warn!("Scenario weights sum to {total}; renormalising");
            for weight in map.values_mut() {
                *weight /= total;
            }
        }

        Ok(Self {
            weights: map
                .into_iter()
                .map(|(id, weight)| (id, Dimensionless(weight)))
                .collect(),
        })
    }

    /// Create a set of equally likely scenarios with the given names.
    pub fn equally_weighted<I>(ids: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<ScenarioID>,
    {
        let ids: Vec<ScenarioID> = ids.into_iter().map(Into::into).collect();
        ensure!(!ids.is_empty(), "Scenario set cannot be empty");

        let weight = 1.0 / ids.len() as f64;
        Self::from_weights(ids.into_iter().map(|id| (id, weight)))
    }

    /// The number of scenarios in the set
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Whether the set contains no scenarios (never true for a constructed set)
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Iterate over all [`ScenarioID`]s
    pub fn iter_ids(&self) -> impl Iterator<Item = &ScenarioID> + Clone {
        self.weights.keys()
    }

    /// Iterate over all scenarios along with their probability weights
    pub fn iter(&self) -> impl Iterator<Item = (&ScenarioID, Dimensionless)> {
        self.weights.iter().map(|(id, weight)| (id, *weight))
    }

    /// Whether the given scenario is part of the set
    pub fn contains(&self, id: &ScenarioID) -> bool {
        self.weights.contains_key(id)
    }

    /// The probability weight of the given scenario
    pub fn weight(&self, id: &ScenarioID) -> Result<Dimensionless> {
        self.weights
            .get(id)
            .copied()
            .with_context(|| format!("Unknown scenario {id}"))
    }
}

impl IDCollection<ScenarioID> for ScenarioSet {
    fn get_id_by_str(&self, id: &str) -> Result<ScenarioID> {
        let (found, _) = self
            .weights
            .get_key_value(id)
            .with_context(|| format!("Unknown scenario {id} found"))?;
        Ok(found.clone())
    }

    fn get_id(&self, id: &ScenarioID) -> Result<ScenarioID> {
        self.get_id_by_str(id.borrow())
    }
}
