//! The simulation driver: runs one scenario against one simulated
//! population, round by round.
//!
//! EXECUTION ORDER per round (fixed, documented, never reordered):
//!   1. Train the risk model on every outcome observed so far.
//!   2. Ingest the round's applicants from the stream.
//!   3. Business allocation over the round's applicants.
//!   4. Research allocation over what business left unfunded.
//!   5. Reject everyone still unassigned.
//!   6. Observe outcomes of the round's funded applicants.
//!   7. Validate the tables; a violation halts the run.
//!
//! RULES:
//!   - The driver owns its SimulationState; nothing is shared between runs.
//!   - All randomness flows through the RngBank seeded from the scenario.
//!   - Every step is recorded in the event log.

use crate::{
    allocator::{reject_remaining, unfunded_pool, PortfolioAllocator},
    clock::SimClock,
    config::{ScenarioCatalog, ScenarioSpec},
    error::{SimError, SimResult},
    event::{EventLogEntry, SimEvent},
    records::{Outcome, PortfolioAssignment, SimulationTables},
    risk_model::{build_model, RiskModel},
    rng::{RngBank, RngSlot},
    snapshot::{RoundSnapshot, SNAPSHOT_INTERVAL},
    state::SimulationState,
    store::SimStore,
    stream::ApplicationStream,
    types::{new_run_id, Round, RunId},
};
use std::collections::HashMap;

pub struct SimulationDriver<'a> {
    pub run_id: RunId,
    pub clock:  SimClock,
    scenario:   ScenarioSpec,
    rng_bank:   RngBank,
    state:      SimulationState,
    model:      Box<dyn RiskModel>,
    allocator:  PortfolioAllocator,
    stream:     &'a dyn ApplicationStream,
    store:      &'a SimStore,
}

impl<'a> SimulationDriver<'a> {
    /// Build a driver using the risk model the scenario names.
    pub fn new(
        simulation_id: &str,
        scenario: &ScenarioSpec,
        stream: &'a dyn ApplicationStream,
        store: &'a SimStore,
    ) -> SimResult<Self> {
        Self::with_model(simulation_id, scenario, build_model(&scenario.risk_model), stream, store)
    }

    /// Build a driver around a caller-supplied risk model.
    pub fn with_model(
        simulation_id: &str,
        scenario: &ScenarioSpec,
        model: Box<dyn RiskModel>,
        stream: &'a dyn ApplicationStream,
        store: &'a SimStore,
    ) -> SimResult<Self> {
        scenario.validate()?;
        let run_id = new_run_id();
        store.insert_run(
            &run_id,
            simulation_id,
            &scenario.id,
            scenario.seed,
            env!("CARGO_PKG_VERSION"),
        )?;

        let mut driver = Self {
            clock: SimClock::new(scenario.num_rounds),
            scenario: scenario.clone(),
            rng_bank: RngBank::new(scenario.seed),
            state: SimulationState::new(simulation_id),
            allocator: PortfolioAllocator::from_scenario(scenario),
            model,
            stream,
            store,
            run_id,
        };

        driver.record(0, &SimEvent::RunInitialized {
            simulation_id: simulation_id.to_string(),
            scenario_id: scenario.id.clone(),
            seed: scenario.seed,
            num_rounds: scenario.num_rounds,
            strategy: scenario.active_learning_strategy.name().to_string(),
        })?;
        driver.seed_historical()?;
        Ok(driver)
    }

    /// Round 0: the historical book, all funded by business with
    /// outcomes already known.
    fn seed_historical(&mut self) -> SimResult<()> {
        let simulation_id = self.state.simulation_id().to_string();
        let rows = self.stream.fetch(&simulation_id, &self.scenario.id, 0)?;

        let assignments: Vec<PortfolioAssignment> =
            rows.iter().map(PortfolioAssignment::business).collect();
        let outcomes: Vec<Outcome> = rows
            .iter()
            .map(|a| Outcome {
                simulation_id: a.simulation_id.clone(),
                application_id: a.application_id.clone(),
                default: a.counterfactual_default,
            })
            .collect();
        let loans = rows.len();
        let defaults = outcomes.iter().filter(|o| o.default).count();

        self.state.set_round(0);
        self.state.append_applications(rows)?;
        self.state.append_assignments(assignments)?;
        self.state.append_outcomes(outcomes)?;
        self.state.validate()?;

        log::info!("round=0 driver: seeded {loans} historical loans, {defaults} defaults");
        self.record(0, &SimEvent::HistoricalDataSeeded { round: 0, loans, defaults })
    }

    /// Run every remaining round.
    pub fn run(&mut self) -> SimResult<()> {
        while !self.clock.is_finished() {
            self.step_round()?;
        }
        Ok(())
    }

    /// Advance one round. This is the core simulation step.
    ///
    /// Any error halts the driver: the round is abandoned and every later
    /// call returns `RunHalted`.
    pub fn step_round(&mut self) -> SimResult<Vec<SimEvent>> {
        if let Some(round) = self.clock.halted_at() {
            return Err(SimError::RunHalted { round });
        }
        if self.clock.is_finished() {
            return Err(SimError::RunFinished {
                round: self.clock.current_round,
            });
        }
        let round = self.clock.begin_round();
        match self.play_round(round) {
            Ok(events) => Ok(events),
            Err(e) => {
                self.clock.halt();
                log::error!("round={round} driver: run halted: {e}");
                Err(e)
            }
        }
    }

    fn play_round(&mut self, round: Round) -> SimResult<Vec<SimEvent>> {
        self.state.set_round(round);
        let mut events = Vec::new();

        // 1. Train
        events.push(self.train(round)?);

        // 2. Ingest
        let simulation_id = self.state.simulation_id().to_string();
        let incoming = self.stream.fetch(&simulation_id, &self.scenario.id, round)?;
        let round_size = incoming.len();
        self.state.append_applications(incoming)?;
        log::debug!("round={round} driver: ingested {round_size} applications");
        events.push(SimEvent::ApplicationsIngested { round, count: round_size });

        // 3–5. Allocate
        let (assignments, alloc_events) = self.allocate(round)?;
        events.extend(alloc_events);
        let funded: Vec<PortfolioAssignment> = assignments
            .iter()
            .filter(|a| a.credit_granted)
            .cloned()
            .collect();
        self.state.append_assignments(assignments)?;

        // 6. Observe
        let outcomes = self.observe(&simulation_id, round, &funded)?;
        let defaults = outcomes.iter().filter(|o| o.default).count();
        events.push(SimEvent::OutcomesObserved {
            round,
            funded: outcomes.len(),
            defaults,
        });
        self.state.append_outcomes(outcomes)?;

        // 7. Validate
        self.state.validate()?;

        let tables = self.state.tables();
        events.push(SimEvent::RoundCompleted {
            round,
            applications: tables.applications.len(),
            assignments: tables.assignments.len(),
            outcomes: tables.outcomes.len(),
        });
        log::info!(
            "round={round} driver: {round_size} applicants, {} funded, {defaults} defaults",
            funded.len()
        );

        for event in &events {
            self.record(round, event)?;
        }
        self.clock.complete_round();

        if round % SNAPSHOT_INTERVAL == 0 {
            self.take_snapshot(round)?;
        }
        Ok(events)
    }

    fn train(&mut self, round: Round) -> SimResult<SimEvent> {
        let (features, labels) = self.state.labelled_rows();
        match self.model.fit(&features, &labels) {
            Ok(()) => {
                let defaults = labels.iter().filter(|&&d| d).count();
                let observed_default_rate = defaults as f64 / labels.len() as f64;
                log::debug!(
                    "round={round} model: {} fitted on {} rows, default rate {observed_default_rate:.4}",
                    self.model.name(),
                    labels.len()
                );
                Ok(SimEvent::ModelTrained {
                    round,
                    training_rows: labels.len(),
                    observed_default_rate,
                })
            }
            Err(e) if e.is_recoverable() => {
                log::warn!("round={round} model: fit skipped, keeping previous model: {e}");
                Ok(SimEvent::ModelFitSkipped {
                    round,
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn allocate(&self, round: Round) -> SimResult<(Vec<PortfolioAssignment>, Vec<SimEvent>)> {
        let applications = self.state.applications_for_round(round);
        let round_size = applications.len();
        let model = self.model.as_ref();

        let business = self.allocator.allocate_business(&applications, model)?;
        let accepted = business.len();
        log::debug!("round={round} allocator: business funded {accepted} of {round_size}");

        let pool = unfunded_pool(&applications, &business);
        let pool_size = pool.len();
        let mut rng = self
            .rng_bank
            .for_slot_at_round(RngSlot::ResearchSampling, round);
        let research =
            self.allocator
                .allocate_research(&pool, round_size, accepted, model, &mut rng)?;
        log::debug!(
            "round={round} allocator: research ({}) funded {} of {pool_size}",
            self.allocator.strategy.name(),
            research.len()
        );

        let mut assignments = business;
        let selected = research.len();
        assignments.extend(research);
        let rejected = reject_remaining(&applications, &assignments);
        let rejected_count = rejected.len();
        assignments.extend(rejected);

        let events = vec![
            SimEvent::BusinessPortfolioAllocated { round, round_size, accepted },
            SimEvent::ResearchPortfolioAllocated { round, pool_size, selected },
            SimEvent::ApplicationsRejected { round, count: rejected_count },
        ];
        Ok((assignments, events))
    }

    /// Look up the true outcome of each funded applicant. The stream is
    /// fetched again so outcomes come from the source, not from our copy.
    fn observe(
        &self,
        simulation_id: &str,
        round: Round,
        funded: &[PortfolioAssignment],
    ) -> SimResult<Vec<Outcome>> {
        if funded.is_empty() {
            return Ok(vec![]);
        }
        let truth: HashMap<String, bool> = self
            .stream
            .fetch(simulation_id, &self.scenario.id, round)?
            .into_iter()
            .map(|a| (a.application_id, a.counterfactual_default))
            .collect();

        funded
            .iter()
            .map(|a| {
                let default = truth.get(&a.application_id).copied().ok_or_else(|| {
                    SimError::StreamMismatch {
                        application_id: a.application_id.clone(),
                        round,
                    }
                })?;
                Ok(Outcome {
                    simulation_id: a.simulation_id.clone(),
                    application_id: a.application_id.clone(),
                    default,
                })
            })
            .collect()
    }

    fn record(&self, round: Round, event: &SimEvent) -> SimResult<()> {
        let entry = EventLogEntry {
            id:         None,
            run_id:     self.run_id.clone(),
            round,
            event_type: event.event_type().to_string(),
            payload:    serde_json::to_string(event)?,
        };
        self.store.append_event(&entry)
    }

    fn take_snapshot(&self, round: Round) -> SimResult<()> {
        let tables = self.state.tables();
        let snapshot = RoundSnapshot {
            run_id: self.run_id.clone(),
            round,
            clock: self.clock.clone(),
            applications: tables.applications.len(),
            assignments: tables.assignments.len(),
            outcomes: tables.outcomes.len(),
            funded: self.state.funded_count(),
            model: self.model.name().to_string(),
            coefficients: self.model.coefficients(),
        };
        let json = serde_json::to_string(&snapshot)?;
        self.store.save_snapshot(&self.run_id, round, &json)?;
        log::debug!("round={round} driver: snapshot saved");
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────

    pub fn scenario(&self) -> &ScenarioSpec {
        &self.scenario
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn model(&self) -> &dyn RiskModel {
        self.model.as_ref()
    }

    pub fn tables(&self) -> &SimulationTables {
        self.state.tables()
    }

    pub fn into_tables(self) -> SimulationTables {
        self.state.into_tables()
    }
}

/// Run `scenario_id` from the catalog against `simulation_id` to
/// completion and return the three accumulated tables.
pub fn run_simulation(
    store: &SimStore,
    catalog: &ScenarioCatalog,
    stream: &dyn ApplicationStream,
    simulation_id: &str,
    scenario_id: &str,
) -> SimResult<SimulationTables> {
    let scenario = catalog.get(scenario_id)?;
    let mut driver = SimulationDriver::new(simulation_id, scenario, stream, store)?;
    driver.run()?;
    log::info!(
        "driver: {simulation_id}/{scenario_id} finished after {} rounds",
        driver.clock.current_round
    );
    Ok(driver.into_tables())
}
