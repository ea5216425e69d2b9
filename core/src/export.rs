//! Result export: where a finished simulation's tables go.
//!
//! Every artifact is addressed by `{artifact_kind}/{scenario_id}/{simulation_id}`.

use crate::{
    config::ScenarioSpec,
    error::SimResult,
    records::SimulationTables,
    store::SimStore,
    types::{ScenarioId, SimulationId},
};
use serde::Serialize;
use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Applications,
    Portfolios,
    Outcomes,
    Scenarios,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        Self::Applications,
        Self::Portfolios,
        Self::Outcomes,
        Self::Scenarios,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applications => "applications",
            Self::Portfolios   => "portfolios",
            Self::Outcomes     => "outcomes",
            Self::Scenarios    => "scenarios",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey {
    pub kind:          ArtifactKind,
    pub scenario_id:   ScenarioId,
    pub simulation_id: SimulationId,
}

impl ArtifactKey {
    pub fn new(kind: ArtifactKind, scenario_id: &str, simulation_id: &str) -> Self {
        Self {
            kind,
            scenario_id: scenario_id.to_string(),
            simulation_id: simulation_id.to_string(),
        }
    }

    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.kind.as_str(), self.scenario_id, self.simulation_id)
    }
}

pub trait ResultExporter {
    /// Write the four artifacts of one finished simulation and return
    /// their keys in `ArtifactKind::ALL` order.
    fn export(
        &self,
        scenario: &ScenarioSpec,
        simulation_id: &str,
        tables: &SimulationTables,
    ) -> SimResult<Vec<ArtifactKey>>;
}

fn row_count(kind: ArtifactKind, tables: &SimulationTables) -> usize {
    match kind {
        ArtifactKind::Applications => tables.applications.len(),
        ArtifactKind::Portfolios   => tables.assignments.len(),
        ArtifactKind::Outcomes     => tables.outcomes.len(),
        ArtifactKind::Scenarios    => 1,
    }
}

// ── SQLite ─────────────────────────────────────────────────────────

/// Writes into the store's artifact tables and path registry.
pub struct StoreExporter<'a> {
    store: &'a SimStore,
}

impl<'a> StoreExporter<'a> {
    pub fn new(store: &'a SimStore) -> Self {
        Self { store }
    }
}

impl ResultExporter for StoreExporter<'_> {
    fn export(
        &self,
        scenario: &ScenarioSpec,
        simulation_id: &str,
        tables: &SimulationTables,
    ) -> SimResult<Vec<ArtifactKey>> {
        self.store.save_tables(&scenario.id, simulation_id, tables)?;
        self.store
            .save_scenario(&scenario.id, simulation_id, &serde_json::to_string(scenario)?)?;

        let mut keys = Vec::with_capacity(ArtifactKind::ALL.len());
        for kind in ArtifactKind::ALL {
            let key = ArtifactKey::new(kind, &scenario.id, simulation_id);
            self.store.register_artifact(&key, row_count(kind, tables))?;
            keys.push(key);
        }
        log::debug!(
            "export: {} rows for {}/{}",
            tables.applications.len(),
            scenario.id,
            simulation_id
        );
        Ok(keys)
    }
}

// ── JSON lines on disk ─────────────────────────────────────────────

/// Writes one `{root}/{artifact path}.jsonl` file per artifact.
pub struct JsonLinesExporter {
    root: PathBuf,
}

impl JsonLinesExporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn file_for(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(format!("{}.jsonl", key.path()))
    }

    fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> SimResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(fs::File::create(path)?);
        for row in rows {
            serde_json::to_writer(&mut out, row)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }
}

impl ResultExporter for JsonLinesExporter {
    fn export(
        &self,
        scenario: &ScenarioSpec,
        simulation_id: &str,
        tables: &SimulationTables,
    ) -> SimResult<Vec<ArtifactKey>> {
        let mut keys = Vec::with_capacity(ArtifactKind::ALL.len());
        for kind in ArtifactKind::ALL {
            let key = ArtifactKey::new(kind, &scenario.id, simulation_id);
            let path = self.file_for(&key);
            match kind {
                ArtifactKind::Applications => Self::write_rows(&path, &tables.applications)?,
                ArtifactKind::Portfolios   => Self::write_rows(&path, &tables.assignments)?,
                ArtifactKind::Outcomes     => Self::write_rows(&path, &tables.outcomes)?,
                ArtifactKind::Scenarios    => Self::write_rows(&path, std::slice::from_ref(scenario))?,
            }
            keys.push(key);
        }
        Ok(keys)
    }
}
