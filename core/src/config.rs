use crate::{
    error::{SimError, SimResult},
    query_strategy::{QueryStrategy, UncertaintyMeasure},
    types::{Round, ScenarioId},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ── Allocation policies ────────────────────────────────────────────

/// How many applicants the business channel funds per round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum BusinessPolicy {
    /// Fund `floor(round_size * rate)`.
    Rate(f64),
    /// Fund a fixed number (capped by round size).
    Budget(usize),
}

/// How many applicants the research channel funds per round.
/// The three modes are mutually exclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum ResearchPolicy {
    /// Fund `floor(round_size * rate)`.
    Rate(f64),
    /// Fund a fixed number.
    Budget(usize),
    /// Fund `floor(business_accepted / ratio)`; a ratio of 0 disables research.
    RatioToBusiness(f64),
}

impl fmt::Display for BusinessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate(r)   => write!(f, "rate={r}"),
            Self::Budget(n) => write!(f, "budget={n}"),
        }
    }
}

impl fmt::Display for ResearchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate(r)            => write!(f, "rate={r}"),
            Self::Budget(n)          => write!(f, "budget={n}"),
            Self::RatioToBusiness(r) => write!(f, "ratio_to_business={r}"),
        }
    }
}

// ── Risk model selection ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskModelSpec {
    LogisticRegression {
        /// Inverse L2 strength, as in `C` of the usual formulation.
        #[serde(default = "default_inverse_regularization")]
        inverse_regularization: f64,
    },
}

fn default_inverse_regularization() -> f64 {
    1.0
}

impl Default for RiskModelSpec {
    fn default() -> Self {
        Self::LogisticRegression {
            inverse_regularization: default_inverse_regularization(),
        }
    }
}

// ── Scenario ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSpec {
    pub id: ScenarioId,
    pub business_policy: BusinessPolicy,
    pub research_policy: ResearchPolicy,
    /// Resolved from its name while deserializing.
    pub active_learning_strategy: QueryStrategy,
    pub num_rounds: Round,
    pub seed: u64,
    #[serde(default)]
    pub risk_model: RiskModelSpec,
}

impl ScenarioSpec {
    pub fn validate(&self) -> SimResult<()> {
        let invalid = |reason: String| SimError::InvalidScenario {
            scenario_id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("scenario id must not be empty".into()));
        }
        if self.num_rounds == 0 {
            return Err(invalid("num_rounds must be at least 1".into()));
        }
        if let BusinessPolicy::Rate(r) = self.business_policy {
            if !(0.0..=1.0).contains(&r) {
                return Err(invalid(format!("business acceptance rate {r} outside [0, 1]")));
            }
        }
        match self.research_policy {
            ResearchPolicy::Rate(r) if !(0.0..=1.0).contains(&r) => {
                return Err(invalid(format!("research acceptance rate {r} outside [0, 1]")));
            }
            ResearchPolicy::RatioToBusiness(r) if !r.is_finite() || r < 0.0 => {
                return Err(invalid(format!(
                    "business_to_research_ratio {r} must be finite and non-negative"
                )));
            }
            _ => {}
        }
        let RiskModelSpec::LogisticRegression { inverse_regularization } = &self.risk_model;
        if !inverse_regularization.is_finite() || *inverse_regularization <= 0.0 {
            return Err(invalid(format!(
                "inverse_regularization {inverse_regularization} must be positive"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ScenariosFile {
    scenarios: Vec<ScenarioSpec>,
}

/// Every scenario of an experiment, validated once at load.
#[derive(Debug, Clone)]
pub struct ScenarioCatalog {
    scenarios: Vec<ScenarioSpec>,
}

impl ScenarioCatalog {
    /// Load from `{data_dir}/scenarios.json`.
    /// In tests, use ScenarioCatalog::default_test().
    pub fn load(data_dir: &str) -> SimResult<Self> {
        let path = format!("{data_dir}/scenarios.json");
        let content = std::fs::read_to_string(&path).map_err(|e| SimError::InvalidScenario {
            scenario_id: path.clone(),
            reason: format!("cannot read: {e}"),
        })?;
        Self::from_json(&content).map_err(|e| match e {
            SimError::Serialization(inner) => SimError::InvalidScenario {
                scenario_id: path,
                reason: inner.to_string(),
            },
            other => other,
        })
    }

    pub fn from_json(content: &str) -> SimResult<Self> {
        let file: ScenariosFile = serde_json::from_str(content)?;
        Self::new(file.scenarios)
    }

    pub fn new(scenarios: Vec<ScenarioSpec>) -> SimResult<Self> {
        let mut ids = HashSet::new();
        for scenario in &scenarios {
            scenario.validate()?;
            if !ids.insert(scenario.id.as_str()) {
                return Err(SimError::InvalidScenario {
                    scenario_id: scenario.id.clone(),
                    reason: "duplicate scenario id".into(),
                });
            }
        }
        Ok(Self { scenarios })
    }

    pub fn get(&self, scenario_id: &str) -> SimResult<&ScenarioSpec> {
        self.scenarios
            .iter()
            .find(|s| s.id == scenario_id)
            .ok_or_else(|| SimError::ScenarioNotFound {
                scenario_id: scenario_id.to_string(),
            })
    }

    pub fn scenarios(&self) -> &[ScenarioSpec] {
        &self.scenarios
    }

    /// Catalog with hardcoded scenarios for use in tests.
    pub fn default_test() -> Self {
        let base = ScenarioSpec {
            id: "random_ratio".into(),
            business_policy: BusinessPolicy::Rate(0.5),
            research_policy: ResearchPolicy::RatioToBusiness(5.0),
            active_learning_strategy: QueryStrategy::Random,
            num_rounds: 5,
            seed: 42,
            risk_model: RiskModelSpec::default(),
        };
        let scenarios = vec![
            base.clone(),
            ScenarioSpec {
                id: "uncertainty_ratio".into(),
                active_learning_strategy: QueryStrategy::UncertaintyBased(
                    UncertaintyMeasure::LeastConfident,
                ),
                ..base.clone()
            },
            ScenarioSpec {
                id: "random_rate".into(),
                research_policy: ResearchPolicy::Rate(0.1),
                ..base.clone()
            },
            ScenarioSpec {
                id: "no_research".into(),
                research_policy: ResearchPolicy::RatioToBusiness(0.0),
                ..base
            },
        ];
        Self { scenarios }
    }
}

// ── Synthetic applicant generator ──────────────────────────────────

/// Parameters of the reference applicant generator.
///
/// Log-odds of default are
/// `intercept + income_weight·income + asset_weight·asset
///  + idiosyncratic_scale·ε + drift_per_round·round`,
/// with income, asset and ε standard normal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratorConfig {
    pub historical_applicants: usize,
    pub applicants_per_round:  usize,
    pub num_rounds:            Round,
    pub intercept:             f64,
    pub income_weight:         f64,
    pub asset_weight:          f64,
    pub idiosyncratic_scale:   f64,
    pub drift_per_round:       f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            historical_applicants: 200,
            applicants_per_round:  500,
            num_rounds:            5,
            intercept:             -1.5,
            income_weight:         0.8,
            asset_weight:          0.5,
            idiosyncratic_scale:   1.0,
            drift_per_round:       0.05,
        }
    }
}

impl GeneratorConfig {
    /// Load from `{data_dir}/generator.json`.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/generator.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "scenarios": [
            {
                "id": "s1",
                "business_policy": { "mode": "rate", "value": 0.4 },
                "research_policy": { "mode": "ratio_to_business", "value": 10 },
                "active_learning_strategy": "margin_sampling",
                "num_rounds": 5,
                "seed": 7
            },
            {
                "id": "s2",
                "business_policy": { "mode": "budget", "value": 30 },
                "research_policy": { "mode": "rate", "value": 0.05 },
                "active_learning_strategy": "random",
                "num_rounds": 3,
                "seed": 8,
                "risk_model": { "kind": "logistic_regression", "inverse_regularization": 0.5 }
            }
        ]
    }"#;

    #[test]
    fn parses_policy_modes_and_resolves_strategies() {
        let catalog = ScenarioCatalog::from_json(CATALOG).unwrap();
        let s1 = catalog.get("s1").unwrap();
        assert_eq!(s1.business_policy, BusinessPolicy::Rate(0.4));
        assert_eq!(s1.research_policy, ResearchPolicy::RatioToBusiness(10.0));
        assert_eq!(s1.active_learning_strategy.name(), "margin_sampling");
        assert_eq!(s1.risk_model, RiskModelSpec::default());

        let s2 = catalog.get("s2").unwrap();
        assert_eq!(s2.business_policy, BusinessPolicy::Budget(30));
        assert_eq!(s2.active_learning_strategy, QueryStrategy::Random);
        assert!(matches!(catalog.get("s3"), Err(SimError::ScenarioNotFound { .. })));
    }

    #[test]
    fn unknown_strategy_fails_at_load() {
        let bad = CATALOG.replace("margin_sampling", "getattr_lookup");
        assert!(ScenarioCatalog::from_json(&bad).is_err());
    }

    #[test]
    fn negative_rate_is_a_configuration_error() {
        let bad = CATALOG.replace("\"value\": 0.4", "\"value\": -0.1");
        match ScenarioCatalog::from_json(&bad) {
            Err(SimError::InvalidScenario { scenario_id, .. }) => assert_eq!(scenario_id, "s1"),
            other => panic!("expected InvalidScenario, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let bad = CATALOG.replace("\"id\": \"s2\"", "\"id\": \"s1\"");
        assert!(matches!(
            ScenarioCatalog::from_json(&bad),
            Err(SimError::InvalidScenario { .. })
        ));
    }

    #[test]
    fn default_test_catalog_is_valid() {
        let catalog = ScenarioCatalog::default_test();
        assert!(ScenarioCatalog::new(catalog.scenarios().to_vec()).is_ok());
    }
}
