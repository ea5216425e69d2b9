//! alec-runner: headless experiment runner for the ALEC credit simulator.
//!
//! Usage:
//!   alec-runner --data-dir ./data --db alec.db --simulations 3 --seed 42
//!   alec-runner --scenario no_research --out ./artifacts --json

use alec_core::{
    config::{GeneratorConfig, ScenarioCatalog, ScenarioSpec},
    engine::run_simulation,
    export::{JsonLinesExporter, ResultExporter, StoreExporter},
    store::SimStore,
    stream::{ApplicationStream, StoreApplicationStream, SyntheticApplicationStream},
    summary::{default_rate_by_portfolio, summarize, SummaryRow},
};
use anyhow::Result;
use std::env;

#[derive(serde::Serialize)]
struct RunReport {
    started_at: chrono::DateTime<chrono::Utc>,
    seed: u64,
    simulations: Vec<String>,
    scenarios: Vec<String>,
    artifacts: usize,
    summary: Vec<SummaryRow>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let simulations = parse_arg(&args, "--simulations", 3usize);
    let json = args.iter().any(|a| a == "--json");
    let db = str_arg(&args, "--db").unwrap_or(":memory:");
    let data_dir = str_arg(&args, "--data-dir").unwrap_or("./data");
    let only_scenario = str_arg(&args, "--scenario");
    let out_dir = str_arg(&args, "--out");
    let started_at = chrono::Utc::now();

    if !json {
        println!("ALEC: alec-runner");
        println!("  seed:        {seed}");
        println!("  simulations: {simulations}");
        println!("  db:          {db}");
        println!("  data_dir:    {data_dir}");
        println!();
    }

    let catalog = ScenarioCatalog::load(data_dir)?;
    let generator = GeneratorConfig::load(data_dir).unwrap_or_else(|e| {
        log::warn!("{e}; using default generator settings");
        GeneratorConfig::default()
    });
    let scenarios: Vec<&ScenarioSpec> = match only_scenario {
        Some(id) => vec![catalog.get(id)?],
        None => catalog.scenarios().iter().collect(),
    };

    let store = SimStore::open(db)?;
    store.migrate()?;

    let simulation_ids = generate_populations(&store, &generator, seed, simulations)?;
    let stream = StoreApplicationStream::new(&store);
    let store_exporter = StoreExporter::new(&store);
    let file_exporter = out_dir.map(JsonLinesExporter::new);

    let mut artifacts = 0;
    let mut summary = Vec::new();
    for scenario in &scenarios {
        for simulation_id in &simulation_ids {
            let tables = run_simulation(&store, &catalog, &stream, simulation_id, &scenario.id)?;
            artifacts += store_exporter.export(scenario, simulation_id, &tables)?.len();
            if let Some(exporter) = &file_exporter {
                exporter.export(scenario, simulation_id, &tables)?;
            }
            let rows = summarize(scenario, simulation_id, &tables);
            store.replace_summary(&scenario.id, simulation_id, &rows)?;
            summary.extend(rows);
        }
    }

    if json {
        let report = RunReport {
            started_at,
            seed,
            simulations: simulation_ids,
            scenarios: scenarios.iter().map(|s| s.id.clone()).collect(),
            artifacts,
            summary,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&summary, artifacts);
    }
    Ok(())
}

/// Write every simulation's applicants to the store once. A population
/// already present is reused, so reruns against one database compare
/// scenarios on identical applicants.
fn generate_populations(
    store: &SimStore,
    generator: &GeneratorConfig,
    seed: u64,
    simulations: usize,
) -> Result<Vec<String>> {
    let existing = store.synthetic_simulation_ids()?;
    let mut ids = Vec::with_capacity(simulations);
    for i in 0..simulations {
        let simulation_id = format!("sim-{i:03}");
        if existing.contains(&simulation_id) {
            log::info!("{simulation_id}: reusing stored applicants");
        } else {
            let source = SyntheticApplicationStream::new(generator.clone(), seed.wrapping_add(i as u64));
            let mut generated = 0;
            for round in 0..=generator.num_rounds {
                let rows = source.fetch(&simulation_id, "", round)?;
                generated += rows.len();
                store.insert_synthetic_applications(&rows)?;
            }
            log::info!("{simulation_id}: generated {generated} applicants");
        }
        ids.push(simulation_id);
    }
    Ok(ids)
}

fn print_summary(rows: &[SummaryRow], artifacts: usize) {
    println!("=== PORTFOLIO DEFAULT RATES (all simulations, all rounds) ===");
    println!(
        "  {:<24} {:<22} {:>8} {:>10}",
        "scenario", "portfolio", "apps", "default %"
    );
    for ((scenario_id, portfolio), (applications, rate)) in default_rate_by_portfolio(rows) {
        println!(
            "  {scenario_id:<24} {portfolio:<22} {applications:>8} {:>9.2}%",
            rate * 100.0
        );
    }
    println!();
    println!("  artifacts written: {artifacts}");
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
