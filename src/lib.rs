//! Model construction for two-stage stochastic unit commitment.
//!
//! Commitment decisions (on/off status, start-ups, shut-downs) are first-stage:
//! they are fixed before any scenario is realised and are shared by every
//! scenario. Dispatch (power output) is second-stage and carries one value per
//! scenario. This crate builds the decision variables and linear constraints
//! that tie the two stages together and hands them to the HIGHS solver.
#![warn(missing_docs)]
pub mod aggregate;
pub mod asset;
pub mod broadcast;
pub mod id;
pub mod optimisation;
pub mod scenario;
pub mod snapshot;
pub mod stage;
pub mod units;

#[cfg(test)]
mod fixture;
