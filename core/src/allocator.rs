//! Portfolio allocation: who receives credit each round.
//!
//! ORDER within a round (fixed, enforced by the driver):
//!   1. Business: lowest predicted risk first, up to the business budget.
//!   2. Research: query strategy over the applicants business left unfunded.
//!   3. Rejection: everyone still unassigned.
//!
//! Every function here is pure over its inputs; all randomness arrives
//! through the SlotRng handed in by the driver.

use crate::{
    config::{BusinessPolicy, ResearchPolicy, ScenarioSpec},
    error::{SimError, SimResult},
    query_strategy::QueryStrategy,
    records::{Application, PortfolioAssignment},
    risk_model::RiskModel,
    rng::SlotRng,
};
use std::collections::{HashMap, HashSet};

/// Number of applicants the business channel may fund from a round.
pub fn business_budget(policy: BusinessPolicy, round_size: usize) -> usize {
    match policy {
        BusinessPolicy::Rate(rate) => ((round_size as f64) * rate).floor() as usize,
        BusinessPolicy::Budget(n) => n,
    }
    .min(round_size)
}

/// Number of applicants the research channel may fund from a round.
pub fn research_budget(policy: ResearchPolicy, round_size: usize, business_accepted: usize) -> usize {
    match policy {
        ResearchPolicy::Rate(rate) => ((round_size as f64) * rate).floor() as usize,
        ResearchPolicy::Budget(n) => n,
        ResearchPolicy::RatioToBusiness(ratio) if ratio > 0.0 => {
            ((business_accepted as f64) / ratio).floor() as usize
        }
        ResearchPolicy::RatioToBusiness(_) => 0,
    }
}

/// Score a round and fund the lowest-risk applicants up to budget.
///
/// Ranking is stable: applicants with equal predicted risk keep their
/// input order, so the cutoff never depends on the sort algorithm.
pub fn allocate_business(
    applications: &[&Application],
    model: &dyn RiskModel,
    policy: BusinessPolicy,
) -> SimResult<Vec<PortfolioAssignment>> {
    if applications.is_empty() {
        return Ok(vec![]);
    }
    let probabilities = predict_checked(applications, model)?;
    let budget = business_budget(policy, applications.len());

    let mut ranked: Vec<usize> = (0..applications.len()).collect();
    ranked.sort_by(|&a, &b| probabilities[a].total_cmp(&probabilities[b]));

    Ok(ranked
        .into_iter()
        .take(budget)
        .map(|i| PortfolioAssignment::business(applications[i]))
        .collect())
}

/// Fund research applicants from the unfunded pool of a round.
///
/// `round_size` is the full number of applicants that arrived this round and
/// `business_accepted` how many of them business funded; which one matters
/// depends on the research policy. A zero budget or an empty pool funds
/// nobody.
#[allow(clippy::too_many_arguments)]
pub fn allocate_research(
    pool: &[&Application],
    round_size: usize,
    business_accepted: usize,
    model: &dyn RiskModel,
    strategy: QueryStrategy,
    policy: ResearchPolicy,
    rng: &mut SlotRng,
) -> SimResult<Vec<PortfolioAssignment>> {
    let budget = research_budget(policy, round_size, business_accepted);
    if budget == 0 || pool.is_empty() {
        return Ok(vec![]);
    }

    let selected = strategy.select(pool, model, budget, rng)?;
    let funding_probability = match policy {
        ResearchPolicy::Rate(_) => selected.len() as f64 / pool.len() as f64,
        ResearchPolicy::Budget(_) | ResearchPolicy::RatioToBusiness(_) => f64::NAN,
    };

    let by_id: HashMap<&str, &Application> = pool
        .iter()
        .map(|a| (a.application_id.as_str(), *a))
        .collect();
    selected
        .iter()
        .map(|id| {
            by_id
                .get(id.as_str())
                .map(|app| PortfolioAssignment::research(app, funding_probability))
                .ok_or_else(|| {
                    SimError::Other(anyhow::anyhow!(
                        "query strategy selected '{id}' from outside the pool"
                    ))
                })
        })
        .collect()
}

/// The round's applicants that none of `funded` covers, in input order.
pub fn unfunded_pool<'a>(
    applications: &[&'a Application],
    funded: &[PortfolioAssignment],
) -> Vec<&'a Application> {
    let funded: HashSet<&str> = funded.iter().map(|a| a.application_id.as_str()).collect();
    applications
        .iter()
        .copied()
        .filter(|a| !funded.contains(a.application_id.as_str()))
        .collect()
}

/// Explicit `rejected_application` rows for every applicant not yet assigned.
pub fn reject_remaining(
    applications: &[&Application],
    assigned: &[PortfolioAssignment],
) -> Vec<PortfolioAssignment> {
    unfunded_pool(applications, assigned)
        .into_iter()
        .map(PortfolioAssignment::rejected)
        .collect()
}

fn predict_checked(applications: &[&Application], model: &dyn RiskModel) -> SimResult<Vec<f64>> {
    let features: Vec<Vec<f64>> = applications
        .iter()
        .map(|a| a.feature_vector.clone())
        .collect();
    let probabilities = model.predict_default_probability(&features)?;
    if probabilities.len() != applications.len() {
        return Err(SimError::FeatureShape {
            expected: applications.len(),
            actual: probabilities.len(),
        });
    }
    if let Some((app, &p)) = applications
        .iter()
        .zip(&probabilities)
        .find(|(_, p)| !(0.0..=1.0).contains(*p))
    {
        return Err(SimError::Estimation {
            application_id: app.application_id.clone(),
            value: p,
        });
    }
    Ok(probabilities)
}

/// A scenario's policies bound together, so the driver does not have to
/// thread them through every call.
#[derive(Debug, Clone)]
pub struct PortfolioAllocator {
    pub business: BusinessPolicy,
    pub research: ResearchPolicy,
    pub strategy: QueryStrategy,
}

impl PortfolioAllocator {
    pub fn from_scenario(spec: &ScenarioSpec) -> Self {
        Self {
            business: spec.business_policy,
            research: spec.research_policy,
            strategy: spec.active_learning_strategy,
        }
    }

    pub fn allocate_business(
        &self,
        applications: &[&Application],
        model: &dyn RiskModel,
    ) -> SimResult<Vec<PortfolioAssignment>> {
        allocate_business(applications, model, self.business)
    }

    pub fn allocate_research(
        &self,
        pool: &[&Application],
        round_size: usize,
        business_accepted: usize,
        model: &dyn RiskModel,
        rng: &mut SlotRng,
    ) -> SimResult<Vec<PortfolioAssignment>> {
        allocate_research(
            pool,
            round_size,
            business_accepted,
            model,
            self.strategy,
            self.research,
            rng,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_budget_floors_and_caps() {
        assert_eq!(business_budget(BusinessPolicy::Rate(0.5), 7), 3);
        assert_eq!(business_budget(BusinessPolicy::Rate(1.0), 7), 7);
        assert_eq!(business_budget(BusinessPolicy::Budget(10), 4), 4);
        assert_eq!(business_budget(BusinessPolicy::Rate(0.3), 0), 0);
    }

    #[test]
    fn research_budget_modes() {
        assert_eq!(research_budget(ResearchPolicy::Rate(0.1), 95, 40), 9);
        assert_eq!(research_budget(ResearchPolicy::Budget(12), 95, 40), 12);
        assert_eq!(research_budget(ResearchPolicy::RatioToBusiness(3.0), 95, 40), 13);
        assert_eq!(research_budget(ResearchPolicy::RatioToBusiness(0.0), 95, 40), 0);
        assert_eq!(research_budget(ResearchPolicy::Rate(0.0), 95, 40), 0);
    }
}
