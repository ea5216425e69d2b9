//! Round snapshots: a compact record of where a run stood after each
//! round, for inspecting long experiments without replaying them.

use crate::{
    clock::SimClock,
    types::{Round, RunId},
};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_INTERVAL: Round = 1; // every round

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub run_id: RunId,
    pub round: Round,
    pub clock: SimClock,
    pub applications: usize,
    pub assignments: usize,
    pub outcomes: usize,
    pub funded: usize,
    pub model: String,
    /// Parameters the round's allocation used; None before the first fit.
    pub coefficients: Option<Vec<f64>>,
}
