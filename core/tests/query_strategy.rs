//! Query strategies: random sampling statistics and uncertainty ranking.

use alec_core::{
    error::{SimError, SimResult},
    query_strategy::{QueryStrategy, UncertaintyMeasure},
    records::{Application, ScenarioMetadata},
    risk_model::RiskModel,
    rng::{RngBank, RngSlot},
};
use std::collections::HashMap;

struct FixedScoreModel;

impl RiskModel for FixedScoreModel {
    fn name(&self) -> &'static str {
        "fixed_score"
    }
    fn fit(&mut self, _features: &[Vec<f64>], _labels: &[bool]) -> SimResult<()> {
        Ok(())
    }
    fn predict_default_probability(&self, features: &[Vec<f64>]) -> SimResult<Vec<f64>> {
        Ok(features.iter().map(|row| row[0]).collect())
    }
    fn is_fitted(&self) -> bool {
        true
    }
}

fn pool(scores: &[f64]) -> Vec<Application> {
    scores
        .iter()
        .enumerate()
        .map(|(i, &p)| Application {
            simulation_id: "sim-q".into(),
            application_id: format!("q{i}"),
            application_date: 1,
            feature_vector: vec![p],
            counterfactual_default: false,
            scenario_metadata: ScenarioMetadata::default(),
        })
        .collect()
}

/// Every pool member should be picked close to budget/pool_size of the time.
#[test]
fn random_selection_is_unbiased() {
    const ROUNDS: u32 = 4000;
    const BUDGET: usize = 5;
    let apps = pool(&[0.5; 20]);
    let refs: Vec<&Application> = apps.iter().collect();
    let bank = RngBank::new(2024);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for round in 0..ROUNDS {
        let mut rng = bank.for_slot_at_round(RngSlot::ResearchSampling, round);
        let picked = QueryStrategy::Random
            .select(&refs, &FixedScoreModel, BUDGET, &mut rng)
            .unwrap();
        assert_eq!(picked.len(), BUDGET);
        for id in picked {
            *counts.entry(id).or_default() += 1;
        }
    }

    let expected = BUDGET as f64 / refs.len() as f64;
    for app in &apps {
        let freq = counts.get(&app.application_id).copied().unwrap_or(0) as f64 / ROUNDS as f64;
        // sd ≈ sqrt(0.25·0.75/4000) ≈ 0.0068; allow about 5 sd.
        assert!(
            (freq - expected).abs() < 0.035,
            "{} picked with frequency {freq:.4}, expected {expected}",
            app.application_id
        );
    }
}

#[test]
fn random_selection_replays_from_the_same_stream() {
    let apps = pool(&[0.5; 50]);
    let refs: Vec<&Application> = apps.iter().collect();
    let bank = RngBank::new(11);

    let a = QueryStrategy::Random
        .select(&refs, &FixedScoreModel, 7, &mut bank.for_slot_at_round(RngSlot::ResearchSampling, 3))
        .unwrap();
    let b = QueryStrategy::Random
        .select(&refs, &FixedScoreModel, 7, &mut bank.for_slot_at_round(RngSlot::ResearchSampling, 3))
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn uncertainty_picks_closest_to_one_half_first() {
    let apps = pool(&[0.05, 0.45, 0.9, 0.52, 0.3]);
    let refs: Vec<&Application> = apps.iter().collect();
    let mut rng = RngBank::new(1).for_slot_at_round(RngSlot::ResearchSampling, 1);

    for measure in [
        UncertaintyMeasure::LeastConfident,
        UncertaintyMeasure::Margin,
        UncertaintyMeasure::Entropy,
    ] {
        let picked = QueryStrategy::UncertaintyBased(measure)
            .select(&refs, &FixedScoreModel, 3, &mut rng)
            .unwrap();
        assert_eq!(picked, vec!["q3", "q1", "q4"], "{measure:?}");
    }
}

#[test]
fn empty_pool_is_an_error_only_when_something_is_requested() {
    let mut rng = RngBank::new(1).for_slot_at_round(RngSlot::ResearchSampling, 1);
    assert!(QueryStrategy::Random
        .select(&[], &FixedScoreModel, 0, &mut rng)
        .unwrap()
        .is_empty());
    assert!(matches!(
        QueryStrategy::Random.select(&[], &FixedScoreModel, 2, &mut rng),
        Err(SimError::EmptyPool { requested: 2 })
    ));
}
