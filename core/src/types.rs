//! Shared primitive types used across the entire simulation.

/// A simulation round. Round 0 is the historical book that seeds the
/// first model fit; experiment rounds run 1..=num_rounds.
pub type Round = u32;

/// Identity of one synthetic population. Partitions every table.
pub type SimulationId = String;

/// Identity of one scenario (policy configuration) in the catalog.
pub type ScenarioId = String;

/// Applicant identifier, unique within a simulation.
pub type ApplicationId = String;

/// The canonical run identifier used by the event log.
pub type RunId = String;

/// Mint a fresh run identifier. Run ids only key the event log and
/// snapshots; they never feed into allocation.
pub fn new_run_id() -> RunId {
    uuid::Uuid::new_v4().to_string()
}
