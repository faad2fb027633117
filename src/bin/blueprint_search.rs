//! Runs every search loop in turn on a small two-class problem and prints the
//! final graph as JSON.
//!
//! Settings come from `BLUEPRINT_*` environment variables (see
//! [`SearchConfig::from_env`]); log verbosity from `RUST_LOG`.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blueprint_nas::{
    hill_climb, learn_one_item_at_a_time, run_evolution, run_nas, run_parallel_nas,
    targeted_micro_refinement, try_add_connections, Blueprint, Connection, ConnectionSearchConfig,
    EvolutionConfig, HillClimbConfig, ItemLearningConfig, NasConfig, Neuron, RefinementConfig,
    SearchConfig, SearchReport, Session,
};

/// Two inputs, two softmax outputs, one weak edge each.
fn starter_graph() -> Blueprint {
    let mut bp = Blueprint::new();
    bp.add_neuron(Neuron::input(1));
    bp.add_neuron(Neuron::input(2));
    bp.add_neuron(Neuron::dense(3, 0.0, "linear", vec![Connection::new(1, 0.1)]));
    bp.add_neuron(Neuron::dense(4, 0.0, "linear", vec![Connection::new(1, 0.2)]));
    bp.add_input_nodes(&[1, 2]);
    bp.add_output_nodes(&[3, 4]);
    bp
}

/// Class 3 when the first input dominates, class 4 otherwise.
fn sessions() -> Vec<Session> {
    let points = [(1.0, 0.0), (0.9, 0.2), (0.8, 0.1), (0.0, 1.0), (0.2, 0.9), (0.1, 0.7)];
    points
        .iter()
        .map(|&(a, b)| {
            let expected = if a > b { [(3, 0.9), (4, 0.1)] } else { [(3, 0.1), (4, 0.9)] };
            Session::new([(1, a), (2, b)], expected, 1)
        })
        .collect()
}

fn summarize(report: &SearchReport) {
    tracing::info!(
        kind = %report.kind,
        rounds = report.rounds,
        accepted = report.accepted,
        stop = ?report.stop_reason,
        "exact {:.2}% -> {:.2}%, generous {:.2}% -> {:.2}%",
        report.initial.exact,
        report.final_metrics.exact,
        report.initial.generous,
        report.final_metrics.generous,
    );
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let search = SearchConfig::from_env();
    tracing::info!(
        seed = ?search.seed,
        workers = search.workers,
        forgiveness = search.forgiveness,
        "starting search pipeline"
    );

    let sessions = sessions();
    let mut model = starter_graph();

    let reports = [
        hill_climb(&mut model, &sessions, &HillClimbConfig { iterations: 50, ..Default::default() }, &search)
            .context("hill climb")?,
        run_nas(&mut model, &sessions, &NasConfig { iterations: 10, ..Default::default() }, &search)
            .context("sequential NAS")?,
        run_parallel_nas(&mut model, &sessions, &NasConfig { iterations: 10, ..Default::default() }, &search)
            .context("parallel NAS")?,
        try_add_connections(&mut model, &sessions, &ConnectionSearchConfig { rounds: 3, ..Default::default() }, &search)
            .context("connection search")?,
        learn_one_item_at_a_time(&mut model, &sessions, &ItemLearningConfig::default(), &search)
            .context("item learning")?,
        targeted_micro_refinement(&mut model, &sessions, &RefinementConfig::default(), &search)
            .context("micro-refinement")?,
    ];
    for report in &reports {
        summarize(report);
    }

    // evolution reseeds weights, so it runs on its own copy
    let mut evolved = model.clone();
    let evolution = run_evolution(
        &mut evolved,
        &sessions,
        &EvolutionConfig { population_size: 8, generations: 10, ..Default::default() },
        &search,
    )
    .context("evolution")?;
    summarize(&evolution);
    if evolution.final_metrics.mean() > reports[reports.len() - 1].final_metrics.mean() {
        model = evolved;
    }

    println!("{}", model.to_json_pretty().context("serializing final graph")?);
    Ok(())
}
