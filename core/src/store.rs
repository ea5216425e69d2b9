//! SQLite persistence layer.
//!
//! RULE: Only store.rs talks to the database.
//! The driver, streams and exporters call store methods. They never
//! execute SQL directly.

use crate::{
    error::SimResult,
    event::EventLogEntry,
    export::ArtifactKey,
    records::{Application, Outcome, Portfolio, PortfolioAssignment, ScenarioMetadata, SimulationTables},
    summary::SummaryRow,
    types::Round,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

pub struct SimStore {
    conn: Connection,
}

impl SimStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only matters for real files; :memory: ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(
        &self,
        run_id: &str,
        simulation_id: &str,
        scenario_id: &str,
        seed: u64,
        version: &str,
    ) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, simulation_id, scenario_id, seed, version, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                simulation_id,
                scenario_id,
                seed as i64,
                version,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, round, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.run_id, entry.round, entry.event_type, entry.payload],
        )?;
        Ok(())
    }

    pub fn events_for_round(&self, run_id: &str, round: Round) -> SimResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, round, event_type, payload
             FROM event_log WHERE run_id = ?1 AND round = ?2
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id, round], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    round: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, run_id: &str, event_type: &str) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE run_id = ?1 AND event_type = ?2",
            params![run_id, event_type],
            |row| row.get(0),
        )?)
    }

    // ── Snapshot ───────────────────────────────────────────────

    pub fn save_snapshot(&self, run_id: &str, round: Round, state_json: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO snapshot (run_id, round, state_json) VALUES (?1, ?2, ?3)",
            params![run_id, round, state_json],
        )?;
        Ok(())
    }

    pub fn latest_snapshot_before(
        &self,
        run_id: &str,
        round: Round,
    ) -> SimResult<Option<(Round, String)>> {
        let result = self
            .conn
            .query_row(
                "SELECT round, state_json FROM snapshot
                 WHERE run_id = ?1 AND round <= ?2
                 ORDER BY round DESC LIMIT 1",
                params![run_id, round],
                |row| Ok((row.get::<_, Round>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(result)
    }

    // ── Stream source ──────────────────────────────────────────

    /// Persist generated applicants so later runs read them back unchanged.
    pub fn insert_synthetic_applications(&self, rows: &[Application]) -> SimResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO synthetic_application (
                    simulation_id, application_id, application_date, seq,
                    features_json, counterfactual_default, latent_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (seq, a) in rows.iter().enumerate() {
                stmt.execute(params![
                    a.simulation_id,
                    a.application_id,
                    a.application_date,
                    seq as i64,
                    serde_json::to_string(&a.feature_vector)?,
                    a.counterfactual_default,
                    serde_json::to_string(&a.scenario_metadata.latent)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn synthetic_applications_for_round(
        &self,
        simulation_id: &str,
        scenario_id: &str,
        round: Round,
    ) -> SimResult<Vec<Application>> {
        let mut stmt = self.conn.prepare(
            "SELECT application_id, features_json, counterfactual_default, latent_json
             FROM synthetic_application
             WHERE simulation_id = ?1 AND application_date = ?2
             ORDER BY seq ASC",
        )?;
        let raw = stmt
            .query_map(params![simulation_id, round], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(application_id, features, counterfactual_default, latent)| -> SimResult<Application> {
                Ok(Application {
                    simulation_id: simulation_id.to_string(),
                    application_id,
                    application_date: round,
                    feature_vector: serde_json::from_str(&features)?,
                    counterfactual_default,
                    scenario_metadata: ScenarioMetadata {
                        scenario_id: scenario_id.to_string(),
                        latent: serde_json::from_str::<BTreeMap<String, f64>>(&latent)?,
                    },
                })
            })
            .collect()
    }

    pub fn synthetic_simulation_ids(&self) -> SimResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT simulation_id FROM synthetic_application ORDER BY simulation_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // ── Exported tables ────────────────────────────────────────

    /// Replace the stored tables for `(scenario_id, simulation_id)`.
    pub fn save_tables(
        &self,
        scenario_id: &str,
        simulation_id: &str,
        tables: &SimulationTables,
    ) -> SimResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for table in ["application", "portfolio_assignment", "outcome"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE scenario_id = ?1 AND simulation_id = ?2"),
                params![scenario_id, simulation_id],
            )?;
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO application (
                    scenario_id, simulation_id, application_id, seq, application_date,
                    features_json, counterfactual_default, metadata_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (seq, a) in tables.applications.iter().enumerate() {
                stmt.execute(params![
                    scenario_id,
                    simulation_id,
                    a.application_id,
                    seq as i64,
                    a.application_date,
                    serde_json::to_string(&a.feature_vector)?,
                    a.counterfactual_default,
                    serde_json::to_string(&a.scenario_metadata)?,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO portfolio_assignment (
                    scenario_id, simulation_id, application_id, seq,
                    portfolio, credit_granted, funding_probability
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (seq, p) in tables.assignments.iter().enumerate() {
                let funding_probability =
                    (!p.funding_probability.is_nan()).then_some(p.funding_probability);
                stmt.execute(params![
                    scenario_id,
                    simulation_id,
                    p.application_id,
                    seq as i64,
                    p.portfolio.as_str(),
                    p.credit_granted,
                    funding_probability,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO outcome (scenario_id, simulation_id, application_id, seq, is_default)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (seq, o) in tables.outcomes.iter().enumerate() {
                stmt.execute(params![
                    scenario_id,
                    simulation_id,
                    o.application_id,
                    seq as i64,
                    o.default
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_tables(&self, scenario_id: &str, simulation_id: &str) -> SimResult<SimulationTables> {
        let mut stmt = self.conn.prepare(
            "SELECT application_id, application_date, features_json,
                    counterfactual_default, metadata_json
             FROM application WHERE scenario_id = ?1 AND simulation_id = ?2
             ORDER BY seq ASC",
        )?;
        let raw = stmt
            .query_map(params![scenario_id, simulation_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Round>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let applications = raw
            .into_iter()
            .map(|(application_id, application_date, features, cf, metadata)| -> SimResult<Application> {
                Ok(Application {
                    simulation_id: simulation_id.to_string(),
                    application_id,
                    application_date,
                    feature_vector: serde_json::from_str(&features)?,
                    counterfactual_default: cf,
                    scenario_metadata: serde_json::from_str(&metadata)?,
                })
            })
            .collect::<SimResult<Vec<_>>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT application_id, portfolio, credit_granted, funding_probability
             FROM portfolio_assignment WHERE scenario_id = ?1 AND simulation_id = ?2
             ORDER BY seq ASC",
        )?;
        let assignments = stmt
            .query_map(params![scenario_id, simulation_id], |row| {
                let portfolio: String = row.get(1)?;
                Ok(PortfolioAssignment {
                    simulation_id: simulation_id.to_string(),
                    application_id: row.get(0)?,
                    portfolio: Portfolio::parse(&portfolio).ok_or_else(|| {
                        rusqlite::Error::InvalidColumnType(
                            1,
                            format!("portfolio '{portfolio}'"),
                            rusqlite::types::Type::Text,
                        )
                    })?,
                    credit_granted: row.get(2)?,
                    funding_probability: row.get::<_, Option<f64>>(3)?.unwrap_or(f64::NAN),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT application_id, is_default
             FROM outcome WHERE scenario_id = ?1 AND simulation_id = ?2
             ORDER BY seq ASC",
        )?;
        let outcomes = stmt
            .query_map(params![scenario_id, simulation_id], |row| {
                Ok(Outcome {
                    simulation_id: simulation_id.to_string(),
                    application_id: row.get(0)?,
                    default: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SimulationTables {
            applications,
            assignments,
            outcomes,
        })
    }

    pub fn save_scenario(&self, scenario_id: &str, simulation_id: &str, spec_json: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO scenario (scenario_id, simulation_id, spec_json) VALUES (?1, ?2, ?3)
             ON CONFLICT(scenario_id, simulation_id) DO UPDATE SET spec_json = excluded.spec_json",
            params![scenario_id, simulation_id, spec_json],
        )?;
        Ok(())
    }

    pub fn register_artifact(&self, key: &ArtifactKey, row_count: usize) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO artifact (artifact_path, artifact_kind, scenario_id, simulation_id, row_count, written_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(artifact_path) DO UPDATE SET
                row_count = excluded.row_count,
                written_at = excluded.written_at",
            params![
                key.path(),
                key.kind.as_str(),
                key.scenario_id,
                key.simulation_id,
                row_count as i64,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// `(artifact_path, row_count)` for every artifact, sorted by path.
    pub fn artifacts(&self) -> SimResult<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT artifact_path, row_count FROM artifact ORDER BY artifact_path")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Summary ────────────────────────────────────────────────

    pub fn replace_summary(&self, scenario_id: &str, simulation_id: &str, rows: &[SummaryRow]) -> SimResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM summary WHERE scenario_id = ?1 AND simulation_id = ?2",
            params![scenario_id, simulation_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO summary (
                    scenario_id, simulation_id, application_date, portfolio,
                    business_policy, research_policy, active_learning_strategy,
                    applications, mean_counterfactual_default
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for r in rows {
                stmt.execute(params![
                    r.scenario_id,
                    r.simulation_id,
                    r.application_date,
                    r.portfolio,
                    r.business_policy,
                    r.research_policy,
                    r.active_learning_strategy,
                    r.applications as i64,
                    r.mean_counterfactual_default,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn summary_rows(&self) -> SimResult<Vec<SummaryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT scenario_id, simulation_id, application_date, portfolio,
                    business_policy, research_policy, active_learning_strategy,
                    applications, mean_counterfactual_default
             FROM summary
             ORDER BY scenario_id, simulation_id, application_date, portfolio",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SummaryRow {
                    scenario_id: row.get(0)?,
                    simulation_id: row.get(1)?,
                    application_date: row.get(2)?,
                    portfolio: row.get(3)?,
                    business_policy: row.get(4)?,
                    research_policy: row.get(5)?,
                    active_learning_strategy: row.get(6)?,
                    applications: row.get::<_, i64>(7)? as usize,
                    mean_counterfactual_default: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
