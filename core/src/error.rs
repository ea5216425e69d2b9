use crate::types::{ApplicationId, Round, ScenarioId, SimulationId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Configuration ───────────────────────────────
    #[error("Invalid scenario '{scenario_id}': {reason}")]
    InvalidScenario { scenario_id: ScenarioId, reason: String },

    #[error("Scenario '{scenario_id}' not found")]
    ScenarioNotFound { scenario_id: ScenarioId },

    // ── Data consistency ────────────────────────────
    #[error("round {round}: application '{application_id}' already exists in simulation '{simulation_id}'")]
    DuplicateApplication {
        simulation_id: SimulationId,
        application_id: ApplicationId,
        round: Round,
    },

    #[error("round {round}: application '{application_id}' already has a portfolio assignment in simulation '{simulation_id}'")]
    DuplicateAssignment {
        simulation_id: SimulationId,
        application_id: ApplicationId,
        round: Round,
    },

    #[error("round {round}: '{application_id}' has no {expected} in simulation '{simulation_id}'")]
    UnknownApplicant {
        simulation_id: SimulationId,
        application_id: ApplicationId,
        expected: &'static str,
        round: Round,
    },

    #[error("round {round}: outcome for '{application_id}' already observed in simulation '{simulation_id}'")]
    DuplicateOutcome {
        simulation_id: SimulationId,
        application_id: ApplicationId,
        round: Round,
    },

    #[error("row for simulation '{actual}' appended to state of simulation '{expected}'")]
    ForeignSimulation {
        expected: SimulationId,
        actual: SimulationId,
    },

    #[error("Invariant violated at round {round}: {invariant} ({count} rows affected)")]
    InvariantViolation {
        invariant: &'static str,
        count: usize,
        round: Round,
    },

    #[error("round {round}: stream returned no row for funded applicant '{application_id}'")]
    StreamMismatch {
        application_id: ApplicationId,
        round: Round,
    },

    // ── Model ───────────────────────────────────────
    #[error("Insufficient training data: {rows} labelled rows, {classes} distinct classes")]
    InsufficientTrainingData { rows: usize, classes: usize },

    #[error("Risk model used before a successful fit")]
    UnfittedModel,

    #[error("Feature width mismatch: expected {expected}, got {actual}")]
    FeatureShape { expected: usize, actual: usize },

    #[error("Estimated default probability for '{application_id}' is undefined ({value})")]
    Estimation {
        application_id: ApplicationId,
        value: f64,
    },

    #[error("Query strategy asked for {requested} applicants from an empty pool")]
    EmptyPool { requested: usize },

    // ── Driver ──────────────────────────────────────
    #[error("Simulation already finished after round {round}")]
    RunFinished { round: Round },

    #[error("Simulation halted by a failure in round {round}")]
    RunHalted { round: Round },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimError {
    /// Only a failed fit is recovered locally: the driver keeps the prior
    /// round's model. Everything else halts the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientTrainingData { .. })
    }
}

pub type SimResult<T> = Result<T, SimError>;
