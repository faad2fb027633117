//! Population-based training with crossover and mutation.
//!
//! Fitness is the mean of exact, generous, and forgiveness accuracy. Each
//! generation keeps the top half and refills the population with mutated
//! children of two random survivors.

use rand::prelude::*;
use rayon::prelude::*;

use crate::blueprint::Blueprint;
use crate::config::SearchConfig;
use crate::error::{BlueprintError, Result};
use crate::eval::{MetricTuple, Session};
use crate::mutation::{DEFAULT_ARCHITECTURE_RATE, DEFAULT_WEIGHT_RATE};
use crate::pool::{worker_rng, CandidatePool};
use crate::progress::{ProgressLogger, RoundOutcome};
use crate::report::{is_perfect, SearchKind, SearchReport, StopReason};

#[derive(Clone, Debug)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub generations: usize,
    pub weight_mutation_rate: f64,
    pub architecture_mutation_rate: f64,
    /// Stop after this many consecutive generations without a new best fitness.
    pub stall_limit: Option<usize>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 20,
            generations: 30,
            weight_mutation_rate: DEFAULT_WEIGHT_RATE,
            architecture_mutation_rate: DEFAULT_ARCHITECTURE_RATE,
            stall_limit: None,
        }
    }
}

/// Score every individual in parallel; individual `i` draws from its own generator.
fn score_population(
    pool: &CandidatePool,
    population: &mut [Blueprint],
    sessions: &[Session],
    forgiveness: f64,
    seed: u64,
) -> Vec<MetricTuple> {
    pool.install(|| {
        population
            .par_iter_mut()
            .enumerate()
            .map(|(i, individual)| {
                let mut rng = worker_rng(seed, i);
                individual.score(sessions, forgiveness, &mut rng)
            })
            .collect()
    })
}

/// Index of the fittest individual; strict `>` so the earliest wins ties.
fn fittest(scores: &[MetricTuple]) -> usize {
    let mut best = 0;
    for (i, score) in scores.iter().enumerate().skip(1) {
        if score.mean() > scores[best].mean() {
            best = i;
        }
    }
    best
}

/// Evolve a population seeded from `model`, then replace `model` with the
/// fittest final individual.
pub fn run_evolution(
    model: &mut Blueprint,
    sessions: &[Session],
    config: &EvolutionConfig,
    search: &SearchConfig,
) -> Result<SearchReport> {
    if sessions.is_empty() {
        return Err(BlueprintError::EmptySessions);
    }
    let pool = CandidatePool::new(search.workers)?;
    let mut rng = search.rng();
    let mut logger = ProgressLogger::new(SearchKind::Evolution, search.log_path.as_deref());

    let initial = model.clone().score(sessions, search.forgiveness, &mut rng);
    let mut report = SearchReport::new(SearchKind::Evolution, initial);
    logger.round(0, config.generations, RoundOutcome::Initial, &initial);

    let size = config.population_size.max(1);
    let mut population: Vec<Blueprint> = (0..size)
        .map(|_| {
            let mut individual = model.clone();
            individual.randomize_weights(&mut rng);
            individual
        })
        .collect();
    let survivors_len = (size / 2).max(1);

    let mut best_seen = f64::NEG_INFINITY;
    let mut stalled = 0;
    let mut stop = StopReason::Exhausted;
    for generation in 1..=config.generations {
        report.rounds = generation;
        let scores = score_population(&pool, &mut population, sessions, search.forgiveness, rng.gen());

        let mut order: Vec<usize> = (0..population.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .mean()
                .partial_cmp(&scores[a].mean())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let leader = scores[order[0]];
        if leader.mean() > best_seen {
            best_seen = leader.mean();
            report.record(generation, leader, format!("fitness {:.4}", leader.mean()));
            logger.round(generation, config.generations, RoundOutcome::Accepted, &leader);
            stalled = 0;
        } else {
            stalled += 1;
        }
        if is_perfect(&leader) {
            stop = StopReason::Perfect;
            break;
        }
        if config.stall_limit.is_some_and(|limit| stalled >= limit) {
            tracing::debug!(generation, "fitness stalled");
            stop = StopReason::Stalled;
            break;
        }

        let mut slots: Vec<Option<Blueprint>> = population.into_iter().map(Some).collect();
        let survivors: Vec<Blueprint> = order
            .iter()
            .take(survivors_len)
            .filter_map(|&i| slots[i].take())
            .collect();

        let mut next = survivors.clone();
        while next.len() < size {
            let (Some(a), Some(b)) = (survivors.choose(&mut rng), survivors.choose(&mut rng)) else {
                break;
            };
            let mut child = a.crossover(b, &mut rng);
            child.mutate_weights(config.weight_mutation_rate, &mut rng);
            if let Err(e) = child.mutate_architecture(
                config.architecture_mutation_rate,
                &search.neuron_types,
                &mut rng,
            ) {
                tracing::debug!(error = %e, "architecture mutation skipped");
            }
            next.push(child);
        }
        population = next;
    }

    let scores = score_population(&pool, &mut population, sessions, search.forgiveness, rng.gen());
    let winner = fittest(&scores);
    let final_metrics = scores[winner];
    logger.round(report.rounds, config.generations, RoundOutcome::Final, &final_metrics);

    *model = population.swap_remove(winner);
    Ok(report.finish(final_metrics, stop))
}
