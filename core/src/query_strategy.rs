//! Active-learning query strategies for the research channel.
//!
//! The strategy is resolved from its scenario name once, at load time.
//! Nothing downstream looks a strategy up by string.

use crate::{
    error::{SimError, SimResult},
    records::Application,
    risk_model::RiskModel,
    rng::SlotRng,
    types::ApplicationId,
};
use serde::{Deserialize, Serialize};

/// How uncertain a binary classifier is about one applicant.
/// Higher is more uncertain. For two classes all three order applicants
/// by distance of p from 0.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncertaintyMeasure {
    /// `1 - max(p, 1 - p)`
    LeastConfident,
    /// `1 - |p - (1 - p)|`
    Margin,
    /// `-p·ln p - (1 - p)·ln(1 - p)`
    Entropy,
}

impl UncertaintyMeasure {
    pub fn score(&self, p: f64) -> f64 {
        match self {
            Self::LeastConfident => 1.0 - p.max(1.0 - p),
            Self::Margin => 1.0 - (p - (1.0 - p)).abs(),
            Self::Entropy => {
                let term = |q: f64| if q > 0.0 { -q * q.ln() } else { 0.0 };
                term(p) + term(1.0 - p)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum QueryStrategy {
    Random,
    UncertaintyBased(UncertaintyMeasure),
}

impl QueryStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "random" => Some(Self::Random),
            "uncertainty_sampling" => Some(Self::UncertaintyBased(UncertaintyMeasure::LeastConfident)),
            "margin_sampling" => Some(Self::UncertaintyBased(UncertaintyMeasure::Margin)),
            "entropy_sampling" => Some(Self::UncertaintyBased(UncertaintyMeasure::Entropy)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::UncertaintyBased(UncertaintyMeasure::LeastConfident) => "uncertainty_sampling",
            Self::UncertaintyBased(UncertaintyMeasure::Margin) => "margin_sampling",
            Self::UncertaintyBased(UncertaintyMeasure::Entropy) => "entropy_sampling",
        }
    }

    /// Pick `min(k, pool.len())` applicants to fund for research.
    ///
    /// `Random` draws from `rng`; `UncertaintyBased` is fully determined by
    /// the model's scores and the pool order. Returned ids follow pool
    /// order for `Random` and most-uncertain-first for `UncertaintyBased`.
    pub fn select(
        &self,
        pool: &[&Application],
        model: &dyn RiskModel,
        k: usize,
        rng: &mut SlotRng,
    ) -> SimResult<Vec<ApplicationId>> {
        if k == 0 {
            return Ok(vec![]);
        }
        if pool.is_empty() {
            return Err(SimError::EmptyPool { requested: k });
        }
        match self {
            Self::Random => Ok(select_random(pool, k, rng)),
            Self::UncertaintyBased(measure) => select_uncertain(pool, model, k, *measure),
        }
    }
}

impl TryFrom<String> for QueryStrategy {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::from_name(&name).ok_or_else(|| {
            format!(
                "unknown active_learning_strategy '{name}' \
                 (expected random, uncertainty_sampling, margin_sampling or entropy_sampling)"
            )
        })
    }
}

impl From<QueryStrategy> for String {
    fn from(strategy: QueryStrategy) -> Self {
        strategy.name().to_string()
    }
}

fn select_random(pool: &[&Application], k: usize, rng: &mut SlotRng) -> Vec<ApplicationId> {
    rng.sample_indices(pool.len(), k)
        .into_iter()
        .map(|i| pool[i].application_id.clone())
        .collect()
}

fn select_uncertain(
    pool: &[&Application],
    model: &dyn RiskModel,
    k: usize,
    measure: UncertaintyMeasure,
) -> SimResult<Vec<ApplicationId>> {
    let features: Vec<Vec<f64>> = pool.iter().map(|a| a.feature_vector.clone()).collect();
    let probabilities = model.predict_default_probability(&features)?;

    let mut ranked = Vec::with_capacity(pool.len());
    for (app, p) in pool.iter().zip(probabilities) {
        if !(0.0..=1.0).contains(&p) {
            return Err(SimError::Estimation {
                application_id: app.application_id.clone(),
                value: p,
            });
        }
        ranked.push((measure.score(p), *app));
    }

    // Stable sort: equal scores keep pool order, first-seen wins.
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    Ok(ranked
        .into_iter()
        .take(k)
        .map(|(_, app)| app.application_id.clone())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_both_ways() {
        for name in ["random", "uncertainty_sampling", "margin_sampling", "entropy_sampling"] {
            let strategy = QueryStrategy::from_name(name).unwrap();
            assert_eq!(strategy.name(), name);
        }
        assert!(QueryStrategy::try_from("max_std_sampling".to_string()).is_err());
    }

    #[test]
    fn measures_agree_on_ordering_for_two_classes() {
        let ps = [0.05, 0.3, 0.5, 0.62, 0.97];
        for measure in [
            UncertaintyMeasure::LeastConfident,
            UncertaintyMeasure::Margin,
            UncertaintyMeasure::Entropy,
        ] {
            let mut order: Vec<usize> = (0..ps.len()).collect();
            order.sort_by(|&a, &b| measure.score(ps[b]).total_cmp(&measure.score(ps[a])));
            assert_eq!(order, vec![2, 3, 1, 0, 4], "{measure:?}");
        }
    }

    #[test]
    fn scores_are_symmetric_around_one_half() {
        for measure in [
            UncertaintyMeasure::LeastConfident,
            UncertaintyMeasure::Margin,
            UncertaintyMeasure::Entropy,
        ] {
            assert!((measure.score(0.25) - measure.score(0.75)).abs() < 1e-12);
        }
    }
}
