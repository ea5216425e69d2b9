//! The run's event log: one typed record per driver step.
//!
//! RULE: payloads carry only values derived from the seed and the stream,
//! never run ids or wall-clock time, so two runs with the same inputs
//! produce byte-identical logs.

use crate::types::{Round, RunId, ScenarioId, SimulationId};
use serde::{Deserialize, Serialize};

/// Every event emitted during a simulation.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    // ── Lifecycle ──────────────────────────────────
    RunInitialized {
        simulation_id: SimulationId,
        scenario_id: ScenarioId,
        seed: u64,
        num_rounds: Round,
        strategy: String,
    },
    HistoricalDataSeeded {
        round: Round,
        loans: usize,
        defaults: usize,
    },
    RoundCompleted {
        round: Round,
        applications: usize,
        assignments: usize,
        outcomes: usize,
    },

    // ── Model ──────────────────────────────────────
    ModelTrained {
        round: Round,
        training_rows: usize,
        observed_default_rate: f64,
    },
    ModelFitSkipped {
        round: Round,
        reason: String,
    },

    // ── Allocation ─────────────────────────────────
    ApplicationsIngested {
        round: Round,
        count: usize,
    },
    BusinessPortfolioAllocated {
        round: Round,
        round_size: usize,
        accepted: usize,
    },
    ResearchPortfolioAllocated {
        round: Round,
        pool_size: usize,
        selected: usize,
    },
    ApplicationsRejected {
        round: Round,
        count: usize,
    },

    // ── Observation ────────────────────────────────
    OutcomesObserved {
        round: Round,
        funded: usize,
        defaults: usize,
    },
}

impl SimEvent {
    /// Stable name for the event_type column.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. }             => "run_initialized",
            Self::HistoricalDataSeeded { .. }       => "historical_data_seeded",
            Self::RoundCompleted { .. }             => "round_completed",
            Self::ModelTrained { .. }               => "model_trained",
            Self::ModelFitSkipped { .. }            => "model_fit_skipped",
            Self::ApplicationsIngested { .. }       => "applications_ingested",
            Self::BusinessPortfolioAllocated { .. } => "business_portfolio_allocated",
            Self::ResearchPortfolioAllocated { .. } => "research_portfolio_allocated",
            Self::ApplicationsRejected { .. }       => "applications_rejected",
            Self::OutcomesObserved { .. }           => "outcomes_observed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub round: Round,
    pub event_type: String,
    pub payload: String, // JSON-serialized SimEvent
}
