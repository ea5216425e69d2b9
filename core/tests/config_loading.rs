//! The shipped data/ files load and validate.

use alec_core::{
    config::{GeneratorConfig, ScenarioCatalog},
    error::SimError,
};

const DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../data");

#[test]
fn shipped_scenarios_load() {
    let catalog = ScenarioCatalog::load(DATA_DIR).expect("data/scenarios.json");
    assert!(!catalog.scenarios().is_empty());
    for scenario in catalog.scenarios() {
        scenario.validate().unwrap();
    }
    let strategies: Vec<&str> = catalog
        .scenarios()
        .iter()
        .map(|s| s.active_learning_strategy.name())
        .collect();
    assert!(strategies.contains(&"random"));
    assert!(strategies.contains(&"uncertainty_sampling"));
}

#[test]
fn shipped_generator_matches_defaults() {
    let generator = GeneratorConfig::load(DATA_DIR).expect("data/generator.json");
    assert_eq!(generator, GeneratorConfig::default());
}

#[test]
fn missing_catalog_is_a_configuration_error() {
    assert!(matches!(
        ScenarioCatalog::load("/nonexistent/alec"),
        Err(SimError::InvalidScenario { .. })
    ));
}
