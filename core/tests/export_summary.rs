//! Export of finished tables and the per-portfolio summary report.

use alec_core::{
    config::{GeneratorConfig, ScenarioCatalog, ScenarioSpec},
    engine::run_simulation,
    export::{ArtifactKind, JsonLinesExporter, ResultExporter, StoreExporter},
    records::{Application, Portfolio, PortfolioAssignment, ScenarioMetadata, SimulationTables},
    store::SimStore,
    stream::SyntheticApplicationStream,
    summary::{default_rate_by_portfolio, summarize, FULL_DATASET},
    types::new_run_id,
};

fn store() -> SimStore {
    let store = SimStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn finished_run(store: &SimStore, scenario_id: &str) -> (ScenarioSpec, SimulationTables) {
    let stream = SyntheticApplicationStream::new(
        GeneratorConfig {
            historical_applicants: 100,
            applicants_per_round: 80,
            num_rounds: 2,
            ..GeneratorConfig::default()
        },
        12,
    );
    let catalog = ScenarioCatalog::default_test();
    let tables = run_simulation(store, &catalog, &stream, "sim-exp", scenario_id).unwrap();
    (catalog.get(scenario_id).unwrap().clone(), tables)
}

fn app(id: &str, round: u32, default: bool) -> Application {
    Application {
        simulation_id: "sim-sum".into(),
        application_id: id.into(),
        application_date: round,
        feature_vector: vec![0.0, 0.0],
        counterfactual_default: default,
        scenario_metadata: ScenarioMetadata::default(),
    }
}

#[test]
fn store_export_registers_every_artifact_path() {
    let store = store();
    let (spec, tables) = finished_run(&store, "random_ratio");
    let keys = StoreExporter::new(&store).export(&spec, "sim-exp", &tables).unwrap();

    let paths: Vec<String> = keys.iter().map(|k| k.path()).collect();
    assert_eq!(
        paths,
        vec![
            "applications/random_ratio/sim-exp",
            "portfolios/random_ratio/sim-exp",
            "outcomes/random_ratio/sim-exp",
            "scenarios/random_ratio/sim-exp",
        ]
    );

    let registered = store.artifacts().unwrap();
    assert_eq!(registered.len(), 4);
    let portfolios = registered
        .iter()
        .find(|(path, _)| path.starts_with(ArtifactKind::Portfolios.as_str()))
        .unwrap();
    assert_eq!(portfolios.1 as usize, tables.assignments.len());
}

#[test]
fn exported_tables_load_back_in_order() {
    let store = store();
    let (spec, tables) = finished_run(&store, "random_ratio");
    let exporter = StoreExporter::new(&store);
    exporter.export(&spec, "sim-exp", &tables).unwrap();
    // Exporting twice replaces rather than duplicates.
    exporter.export(&spec, "sim-exp", &tables).unwrap();

    let loaded = store.load_tables("random_ratio", "sim-exp").unwrap();
    assert_eq!(loaded.applications.len(), tables.applications.len());
    assert_eq!(loaded.outcomes, tables.outcomes);

    for (a, b) in loaded.assignments.iter().zip(&tables.assignments) {
        assert_eq!(a.application_id, b.application_id);
        assert_eq!(a.portfolio, b.portfolio);
        assert_eq!(a.credit_granted, b.credit_granted);
        // Ratio-based research rows carry no inclusion probability.
        assert_eq!(a.funding_probability.is_nan(), b.funding_probability.is_nan());
    }
    assert!(loaded
        .assignments
        .iter()
        .any(|a| a.portfolio == Portfolio::Research && a.funding_probability.is_nan()));
}

#[test]
fn json_lines_export_writes_one_file_per_artifact() {
    let (spec, tables) = finished_run(&store(), "no_research");
    let root = std::env::temp_dir().join(format!("alec-export-{}", new_run_id()));
    let exporter = JsonLinesExporter::new(&root);
    let keys = exporter.export(&spec, "sim-exp", &tables).unwrap();

    let portfolios = std::fs::read_to_string(exporter.file_for(&keys[1])).unwrap();
    assert_eq!(portfolios.lines().count(), tables.assignments.len());
    let first: PortfolioAssignment = serde_json::from_str(portfolios.lines().next().unwrap()).unwrap();
    assert_eq!(first, tables.assignments[0]);

    let scenario = std::fs::read_to_string(exporter.file_for(&keys[3])).unwrap();
    let back: ScenarioSpec = serde_json::from_str(scenario.trim()).unwrap();
    assert_eq!(back, spec);

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn summary_groups_by_round_and_portfolio_with_full_dataset_rows() {
    let spec = ScenarioCatalog::default_test().get("random_ratio").unwrap().clone();
    let tables = SimulationTables {
        applications: vec![
            app("b1", 1, false),
            app("b2", 1, true),
            app("r1", 1, true),
            app("x1", 1, true),
            app("b3", 2, false),
        ],
        assignments: vec![
            PortfolioAssignment::business(&app("b1", 1, false)),
            PortfolioAssignment::business(&app("b2", 1, true)),
            PortfolioAssignment::research(&app("r1", 1, true), f64::NAN),
            PortfolioAssignment::business(&app("b3", 2, false)),
        ],
        outcomes: vec![],
    };

    let rows = summarize(&spec, "sim-sum", &tables);
    let find = |round: u32, portfolio: &str| {
        rows.iter()
            .find(|r| r.application_date == round && r.portfolio == portfolio)
            .unwrap_or_else(|| panic!("no row for round {round} / {portfolio}"))
    };

    assert_eq!(find(1, "business").applications, 2);
    assert_eq!(find(1, "business").mean_counterfactual_default, 0.5);
    assert_eq!(find(1, "research").mean_counterfactual_default, 1.0);
    // x1 has no assignment row.
    assert_eq!(find(1, "rejected_application").applications, 1);
    assert_eq!(find(1, FULL_DATASET).applications, 4);
    assert_eq!(find(1, FULL_DATASET).mean_counterfactual_default, 0.75);
    assert_eq!(find(2, FULL_DATASET).mean_counterfactual_default, 0.0);
    assert_eq!(rows.len(), 6);

    let row = find(1, "research");
    assert_eq!(row.business_policy, "rate=0.5");
    assert_eq!(row.research_policy, "ratio_to_business=5");
    assert_eq!(row.active_learning_strategy, "random");

    let pooled = default_rate_by_portfolio(&rows);
    let (apps, rate) = pooled[&("random_ratio".to_string(), FULL_DATASET.to_string())];
    assert_eq!(apps, 5);
    assert!((rate - 0.6).abs() < 1e-12);
}

#[test]
fn summary_rows_persist_per_scenario_and_simulation() {
    let store = store();
    let (spec, tables) = finished_run(&store, "uncertainty_ratio");
    let rows = summarize(&spec, "sim-exp", &tables);
    store.replace_summary(&spec.id, "sim-exp", &rows).unwrap();
    store.replace_summary(&spec.id, "sim-exp", &rows).unwrap();

    let stored = store.summary_rows().unwrap();
    assert_eq!(stored.len(), rows.len());
    let full: usize = stored
        .iter()
        .filter(|r| r.portfolio == FULL_DATASET)
        .map(|r| r.applications)
        .sum();
    assert_eq!(full, tables.applications.len());
}
