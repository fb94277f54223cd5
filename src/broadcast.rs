//! Explicit broadcasting of first-stage terms across the scenario axis.
//!
//! A constraint that mixes a commitment variable with dispatch variables needs
//! one row per scenario, each repeating the same first-stage columns. The
//! replication happens only in the rows' coefficient lists, never in the
//! variable set: the solver still sees exactly one commitment variable per
//! asset and snapshot.
//!
//! Broadcasting is an explicit combinator rather than an automatic shape rule,
//! so a mismatch (a scenario with no dispatch term, or a row that does not
//! actually mix stages) is a structural error instead of a silently accepted
//! shape.
use crate::scenario::{ScenarioID, ScenarioSet};
use anyhow::{Context, Result, ensure};

/// One coefficient-column term of a linear expression
pub type Term = (highs::Col, f64);

/// Replicates first-stage terms across a scenario set.
pub struct Broadcast<'a> {
    scenarios: &'a ScenarioSet,
}

impl<'a> Broadcast<'a> {
    /// Create a broadcast combinator for the given scenario set
    pub fn new(scenarios: &'a ScenarioSet) -> Self {
        Self { scenarios }
    }

    /// Produce one combined row per scenario.
    ///
    /// For each scenario, `second_stage` supplies that scenario's dispatch
    /// terms and the first-stage terms are appended unchanged. Returns the
    /// scenario alongside each row so callers can record constraint keys.
    ///
    /// # Errors
    ///
    /// Fails if `second_stage` cannot produce terms for a scenario (e.g. a
    /// missing dispatch variable) or produces none at all, in which case the
    /// expression would not mix stages and broadcasting is the wrong tool.
    pub fn rows<F>(&self, first_stage: &[Term], mut second_stage: F) -> Result<Vec<(ScenarioID, Vec<Term>)>>
    where
        F: FnMut(&ScenarioID) -> Result<Vec<Term>>,
    {
        let mut rows = Vec::with_capacity(self.scenarios.len());
        for scenario in self.scenarios.iter_ids() {
            let mut terms = second_stage(scenario)
                .with_context(|| format!("Broadcasting first-stage terms into scenario {scenario}"))?;
            ensure!(
                !terms.is_empty(),
                "Broadcast into scenario {scenario} produced no second-stage terms"
            );

            terms.extend_from_slice(first_stage);
            rows.push((scenario.clone(), terms));
        }

        Ok(rows)
    }
}
