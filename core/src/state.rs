//! SimulationState: the three accumulating tables of one simulation.
//!
//! RULE: every append is checked before it lands. A rejected batch leaves
//! the state exactly as it was; nothing is cleaned up after the fact.
//!
//! The driver owns one SimulationState per simulation identity and
//! passes it by reference into each round step. Nothing here is shared
//! between simulations.

use crate::{
    error::{SimError, SimResult},
    records::{Application, Outcome, PortfolioAssignment, SimulationTables},
    types::{ApplicationId, Round, SimulationId},
};
use std::collections::{HashMap, HashSet};

pub const INV_ASSIGNMENT_REFERENCES_APPLICATION: &str =
    "every assigned application_id exists in Application";
pub const INV_OUTCOME_REFERENCES_APPLICATION: &str =
    "every observed application_id exists in Application";
pub const INV_UNIQUE_ASSIGNMENT: &str = "at most one PortfolioAssignment per application_id";
pub const INV_UNIQUE_OUTCOME: &str = "at most one Outcome per application_id";
pub const INV_OUTCOME_REQUIRES_CREDIT: &str = "outcomes exist only for granted credit";
pub const INV_FUNDED_EQUALS_OUTCOMES: &str =
    "count(credit_granted assignments) == count(outcomes)";
pub const INV_ALL_TRIAGED: &str = "count(applications) == count(assignments)";

pub struct SimulationState {
    simulation_id: SimulationId,
    round:         Round,
    tables:        SimulationTables,
    /// application_id → row index in `tables.applications`.
    application_index: HashMap<ApplicationId, usize>,
    /// application_id → credit_granted.
    assigned: HashMap<ApplicationId, bool>,
    observed: HashSet<ApplicationId>,
}

impl SimulationState {
    pub fn new(simulation_id: impl Into<SimulationId>) -> Self {
        Self {
            simulation_id: simulation_id.into(),
            round: 0,
            tables: SimulationTables::default(),
            application_index: HashMap::new(),
            assigned: HashMap::new(),
            observed: HashSet::new(),
        }
    }

    pub fn simulation_id(&self) -> &str {
        &self.simulation_id
    }

    /// The round that appends are attributed to in error reports.
    pub fn round(&self) -> Round {
        self.round
    }

    pub fn set_round(&mut self, round: Round) {
        self.round = round;
    }

    // ── Appends ────────────────────────────────────────────────

    pub fn append_applications(&mut self, rows: Vec<Application>) -> SimResult<()> {
        let mut batch = HashSet::with_capacity(rows.len());
        for row in &rows {
            self.check_identity(&row.simulation_id)?;
            if self.application_index.contains_key(&row.application_id)
                || !batch.insert(row.application_id.as_str())
            {
                return Err(SimError::DuplicateApplication {
                    simulation_id: self.simulation_id.clone(),
                    application_id: row.application_id.clone(),
                    round: self.round,
                });
            }
        }

        for row in rows {
            self.application_index
                .insert(row.application_id.clone(), self.tables.applications.len());
            self.tables.applications.push(row);
        }
        Ok(())
    }

    pub fn append_assignments(&mut self, rows: Vec<PortfolioAssignment>) -> SimResult<()> {
        let mut batch = HashSet::with_capacity(rows.len());
        for row in &rows {
            self.check_identity(&row.simulation_id)?;
            if !self.application_index.contains_key(&row.application_id) {
                return Err(SimError::UnknownApplicant {
                    simulation_id: self.simulation_id.clone(),
                    application_id: row.application_id.clone(),
                    expected: "application",
                    round: self.round,
                });
            }
            if self.assigned.contains_key(&row.application_id)
                || !batch.insert(row.application_id.as_str())
            {
                return Err(SimError::DuplicateAssignment {
                    simulation_id: self.simulation_id.clone(),
                    application_id: row.application_id.clone(),
                    round: self.round,
                });
            }
        }

        for row in rows {
            self.assigned.insert(row.application_id.clone(), row.credit_granted);
            self.tables.assignments.push(row);
        }
        Ok(())
    }

    pub fn append_outcomes(&mut self, rows: Vec<Outcome>) -> SimResult<()> {
        let mut batch = HashSet::with_capacity(rows.len());
        for row in &rows {
            self.check_identity(&row.simulation_id)?;
            if self.assigned.get(&row.application_id) != Some(&true) {
                return Err(SimError::UnknownApplicant {
                    simulation_id: self.simulation_id.clone(),
                    application_id: row.application_id.clone(),
                    expected: "funded portfolio assignment",
                    round: self.round,
                });
            }
            if self.observed.contains(&row.application_id)
                || !batch.insert(row.application_id.as_str())
            {
                return Err(SimError::DuplicateOutcome {
                    simulation_id: self.simulation_id.clone(),
                    application_id: row.application_id.clone(),
                    round: self.round,
                });
            }
        }

        for row in rows {
            self.observed.insert(row.application_id.clone());
            self.tables.outcomes.push(row);
        }
        Ok(())
    }

    fn check_identity(&self, simulation_id: &str) -> SimResult<()> {
        if simulation_id != self.simulation_id {
            return Err(SimError::ForeignSimulation {
                expected: self.simulation_id.clone(),
                actual: simulation_id.to_string(),
            });
        }
        Ok(())
    }

    // ── Validation ─────────────────────────────────────────────

    /// Recompute every table invariant from the rows themselves, ignoring
    /// the append-time indexes. Called by the driver at the end of each round.
    pub fn validate(&self) -> SimResult<()> {
        let round = self.round;
        let fail = |invariant: &'static str, count: usize| -> SimResult<()> {
            if count > 0 {
                log::error!("round={round} state: invariant '{invariant}' violated by {count} rows");
                return Err(SimError::InvariantViolation { invariant, count, round });
            }
            Ok(())
        };

        let app_ids: HashSet<&str> = self
            .tables
            .applications
            .iter()
            .map(|a| a.application_id.as_str())
            .collect();

        let dangling_assignments = self
            .tables
            .assignments
            .iter()
            .filter(|a| !app_ids.contains(a.application_id.as_str()))
            .count();
        fail(INV_ASSIGNMENT_REFERENCES_APPLICATION, dangling_assignments)?;

        let dangling_outcomes = self
            .tables
            .outcomes
            .iter()
            .filter(|o| !app_ids.contains(o.application_id.as_str()))
            .count();
        fail(INV_OUTCOME_REFERENCES_APPLICATION, dangling_outcomes)?;

        let mut granted: HashMap<&str, bool> = HashMap::new();
        let mut duplicate_assignments = 0;
        for a in &self.tables.assignments {
            if granted.insert(a.application_id.as_str(), a.credit_granted).is_some() {
                duplicate_assignments += 1;
            }
        }
        fail(INV_UNIQUE_ASSIGNMENT, duplicate_assignments)?;

        let mut seen = HashSet::new();
        let duplicate_outcomes = self
            .tables
            .outcomes
            .iter()
            .filter(|o| !seen.insert(o.application_id.as_str()))
            .count();
        fail(INV_UNIQUE_OUTCOME, duplicate_outcomes)?;

        let unfunded_outcomes = self
            .tables
            .outcomes
            .iter()
            .filter(|o| granted.get(o.application_id.as_str()) != Some(&true))
            .count();
        fail(INV_OUTCOME_REQUIRES_CREDIT, unfunded_outcomes)?;

        let funded = granted.values().filter(|&&g| g).count();
        fail(INV_FUNDED_EQUALS_OUTCOMES, funded.abs_diff(self.tables.outcomes.len()))?;

        fail(
            INV_ALL_TRIAGED,
            self.tables.applications.len().abs_diff(self.tables.assignments.len()),
        )?;

        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────

    pub fn tables(&self) -> &SimulationTables {
        &self.tables
    }

    pub fn into_tables(self) -> SimulationTables {
        self.tables
    }

    pub fn application(&self, application_id: &str) -> Option<&Application> {
        self.application_index
            .get(application_id)
            .map(|&i| &self.tables.applications[i])
    }

    pub fn is_assigned(&self, application_id: &str) -> bool {
        self.assigned.contains_key(application_id)
    }

    pub fn applications_for_round(&self, round: Round) -> Vec<&Application> {
        self.tables
            .applications
            .iter()
            .filter(|a| a.application_date == round)
            .collect()
    }

    /// Features and labels of every application with an observed outcome,
    /// in outcome order. This is the model's training set.
    pub fn labelled_rows(&self) -> (Vec<Vec<f64>>, Vec<bool>) {
        self.tables
            .outcomes
            .iter()
            .filter_map(|o| {
                self.application(&o.application_id)
                    .map(|a| (a.feature_vector.clone(), o.default))
            })
            .unzip()
    }

    pub fn funded_count(&self) -> usize {
        self.assigned.values().filter(|&&g| g).count()
    }
}

#[cfg(test)]
impl SimulationState {
    /// Push rows past the append-time checks so validate() can be
    /// exercised against corrupted tables.
    pub(crate) fn tables_mut_unchecked(&mut self) -> &mut SimulationTables {
        &mut self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ScenarioMetadata;

    fn app(id: &str) -> Application {
        Application {
            simulation_id: "sim-1".into(),
            application_id: id.into(),
            application_date: 1,
            feature_vector: vec![0.1, 0.2],
            counterfactual_default: false,
            scenario_metadata: ScenarioMetadata::default(),
        }
    }

    #[test]
    fn validate_catches_rows_that_bypassed_the_append_checks() {
        let mut state = SimulationState::new("sim-1");
        state.set_round(4);
        state.append_applications(vec![app("a")]).unwrap();
        state
            .append_assignments(vec![PortfolioAssignment::business(&app("a"))])
            .unwrap();
        state
            .tables_mut_unchecked()
            .assignments
            .push(PortfolioAssignment::business(&app("a")));

        match state.validate() {
            Err(SimError::InvariantViolation { invariant, count, round }) => {
                assert_eq!(invariant, INV_UNIQUE_ASSIGNMENT);
                assert_eq!(count, 1);
                assert_eq!(round, 4);
            }
            other => panic!("expected invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn validate_reports_unobserved_funded_loans() {
        let mut state = SimulationState::new("sim-1");
        state.set_round(2);
        state.append_applications(vec![app("a"), app("b")]).unwrap();
        state
            .append_assignments(vec![
                PortfolioAssignment::business(&app("a")),
                PortfolioAssignment::business(&app("b")),
            ])
            .unwrap();

        match state.validate() {
            Err(SimError::InvariantViolation { invariant, count, .. }) => {
                assert_eq!(invariant, INV_FUNDED_EQUALS_OUTCOMES);
                assert_eq!(count, 2);
            }
            other => panic!("expected invariant violation, got {other:?}"),
        }
    }
}
