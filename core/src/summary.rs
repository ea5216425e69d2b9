//! Summary report: mean counterfactual default per round and portfolio.
//!
//! Applicants with no assignment count as `rejected_application`. Each
//! round also gets a `full_dataset` row covering every applicant, which is
//! the rate an unbiased lender would face.

use crate::{
    config::ScenarioSpec,
    records::{Portfolio, SimulationTables},
    types::{Round, ScenarioId, SimulationId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const FULL_DATASET: &str = "full_dataset";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryRow {
    pub scenario_id:                 ScenarioId,
    pub simulation_id:               SimulationId,
    pub application_date:            Round,
    pub portfolio:                   String,
    pub business_policy:             String,
    pub research_policy:             String,
    pub active_learning_strategy:    String,
    pub applications:                usize,
    pub mean_counterfactual_default: f64,
}

#[derive(Default)]
struct Tally {
    applications: usize,
    defaults:     usize,
}

impl Tally {
    fn add(&mut self, default: bool) {
        self.applications += 1;
        self.defaults += usize::from(default);
    }

    fn mean(&self) -> f64 {
        if self.applications == 0 {
            return 0.0;
        }
        self.defaults as f64 / self.applications as f64
    }
}

/// Rows ordered by application_date, then portfolio name.
pub fn summarize(
    scenario: &ScenarioSpec,
    simulation_id: &str,
    tables: &SimulationTables,
) -> Vec<SummaryRow> {
    let portfolio_of: HashMap<&str, Portfolio> = tables
        .assignments
        .iter()
        .map(|a| (a.application_id.as_str(), a.portfolio))
        .collect();

    let mut groups: BTreeMap<(Round, &str), Tally> = BTreeMap::new();
    for app in &tables.applications {
        let portfolio = portfolio_of
            .get(app.application_id.as_str())
            .copied()
            .unwrap_or(Portfolio::RejectedApplication);
        groups
            .entry((app.application_date, portfolio.as_str()))
            .or_default()
            .add(app.counterfactual_default);
        groups
            .entry((app.application_date, FULL_DATASET))
            .or_default()
            .add(app.counterfactual_default);
    }

    let business_policy = scenario.business_policy.to_string();
    let research_policy = scenario.research_policy.to_string();
    let strategy = scenario.active_learning_strategy.name();

    groups
        .into_iter()
        .map(|((application_date, portfolio), tally)| SummaryRow {
            scenario_id: scenario.id.clone(),
            simulation_id: simulation_id.to_string(),
            application_date,
            portfolio: portfolio.to_string(),
            business_policy: business_policy.clone(),
            research_policy: research_policy.clone(),
            active_learning_strategy: strategy.to_string(),
            applications: tally.applications,
            mean_counterfactual_default: tally.mean(),
        })
        .collect()
}

/// Pool summary rows across simulations and rounds:
/// `(scenario_id, portfolio) → (applications, mean counterfactual default)`.
pub fn default_rate_by_portfolio(rows: &[SummaryRow]) -> BTreeMap<(String, String), (usize, f64)> {
    let mut pooled: BTreeMap<(String, String), (usize, f64)> = BTreeMap::new();
    for row in rows {
        let entry = pooled
            .entry((row.scenario_id.clone(), row.portfolio.clone()))
            .or_insert((0, 0.0));
        entry.0 += row.applications;
        entry.1 += row.mean_counterfactual_default * row.applications as f64;
    }
    for (applications, weighted) in pooled.values_mut() {
        if *applications > 0 {
            *weighted /= *applications as f64;
        }
    }
    pooled
}
