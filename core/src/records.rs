//! Row types of the three accumulating tables.

use crate::types::{ApplicationId, Round, ScenarioId, SimulationId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Simulation-only context carried alongside an application.
/// Never read by the allocator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScenarioMetadata {
    pub scenario_id: ScenarioId,
    /// Latent columns from the generator, e.g. `total_default_risk`.
    pub latent: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub simulation_id:          SimulationId,
    pub application_id:         ApplicationId,
    pub application_date:       Round,
    pub feature_vector:         Vec<f64>,
    /// The outcome had credit been granted. Known to the simulator only.
    pub counterfactual_default: bool,
    pub scenario_metadata:      ScenarioMetadata,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Portfolio {
    Business,
    Research,
    RejectedApplication,
}

impl Portfolio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Business            => "business",
            Self::Research            => "research",
            Self::RejectedApplication => "rejected_application",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "business"             => Some(Self::Business),
            "research"             => Some(Self::Research),
            "rejected_application" => Some(Self::RejectedApplication),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioAssignment {
    pub simulation_id:       SimulationId,
    pub application_id:      ApplicationId,
    pub portfolio:           Portfolio,
    pub credit_granted:      bool,
    /// Inclusion probability for the channel; NaN when not computable.
    /// Serializes as `null` when NaN.
    #[serde(deserialize_with = "nan_from_null")]
    pub funding_probability: f64,
}

fn nan_from_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl PortfolioAssignment {
    pub fn business(app: &Application) -> Self {
        Self {
            simulation_id:       app.simulation_id.clone(),
            application_id:      app.application_id.clone(),
            portfolio:           Portfolio::Business,
            credit_granted:      true,
            funding_probability: 1.0,
        }
    }

    pub fn research(app: &Application, funding_probability: f64) -> Self {
        Self {
            simulation_id:       app.simulation_id.clone(),
            application_id:      app.application_id.clone(),
            portfolio:           Portfolio::Research,
            credit_granted:      true,
            funding_probability,
        }
    }

    pub fn rejected(app: &Application) -> Self {
        Self {
            simulation_id:       app.simulation_id.clone(),
            application_id:      app.application_id.clone(),
            portfolio:           Portfolio::RejectedApplication,
            credit_granted:      false,
            funding_probability: 0.0,
        }
    }

    /// Inverse-probability weight for downstream estimation, when defined.
    pub fn ipw_weight(&self) -> Option<f64> {
        (self.credit_granted && self.funding_probability > 0.0)
            .then(|| 1.0 / self.funding_probability)
    }
}

// NaN never equals itself; two assignments with NaN funding probability
// are still the same row.
impl PartialEq for PortfolioAssignment {
    fn eq(&self, other: &Self) -> bool {
        self.simulation_id == other.simulation_id
            && self.application_id == other.application_id
            && self.portfolio == other.portfolio
            && self.credit_granted == other.credit_granted
            && (self.funding_probability == other.funding_probability
                || (self.funding_probability.is_nan() && other.funding_probability.is_nan()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outcome {
    pub simulation_id:  SimulationId,
    pub application_id: ApplicationId,
    pub default:        bool,
}

/// The three accumulated tables of one simulation, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SimulationTables {
    pub applications: Vec<Application>,
    pub assignments:  Vec<PortfolioAssignment>,
    pub outcomes:     Vec<Outcome>,
}
