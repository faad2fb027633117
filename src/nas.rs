//! Architecture search by node insertion, sequential and parallel.
//!
//! A proposal clones the committed graph, inserts one node of a random kind,
//! and scores the clone on every session. The sequential loop tries one
//! proposal per round; the parallel loop tries one per worker and commits the
//! best accepted proposal of the round.

use rand::prelude::*;

use crate::acceptance::AcceptancePolicy;
use crate::blueprint::Blueprint;
use crate::config::SearchConfig;
use crate::error::{BlueprintError, Result};
use crate::eval::{MetricTuple, Session};
use crate::hill_climb::{hill_climb_step, StepOutcome};
use crate::mutation::{random_neuron_type, InsertionStrategy};
use crate::neuron::NeuronType;
use crate::pool::CandidatePool;
use crate::progress::{ProgressLogger, RoundOutcome};
use crate::report::{SearchKind, SearchReport, StopReason};

#[derive(Clone, Debug)]
pub struct NasConfig {
    pub iterations: usize,
    pub policy: AcceptancePolicy,
    pub strategy: InsertionStrategy,
    /// Weight hill-climbing steps applied to each proposal (sequential) or to
    /// the round winner (parallel). Zero disables them.
    pub hill_climb_steps: usize,
    pub max_weight_change: f64,
    /// Stop after this many rounds in a row without a commit.
    pub stall_limit: Option<usize>,
}

impl Default for NasConfig {
    fn default() -> Self {
        Self {
            iterations: 50,
            policy: AcceptancePolicy::ExactFirst,
            strategy: InsertionStrategy::BetweenInputsAndOutputs,
            hill_climb_steps: 0,
            max_weight_change: 0.1,
            stall_limit: None,
        }
    }
}

/// A scored insertion proposal.
pub struct Proposal {
    pub candidate: Blueprint,
    pub kind: NeuronType,
    pub metrics: MetricTuple,
}

/// Clone, insert one random-kind node, score. `None` when insertion fails or
/// no kind is available.
pub fn propose_insertion(
    model: &Blueprint,
    sessions: &[Session],
    kinds: &[NeuronType],
    strategy: InsertionStrategy,
    forgiveness: f64,
    rng: &mut impl Rng,
) -> Option<Proposal> {
    let kind = random_neuron_type(kinds, rng)?;
    let mut candidate = model.clone();
    if let Err(e) = candidate.insert_neuron(kind, strategy, rng) {
        tracing::debug!(%kind, error = %e, "insertion proposal dropped");
        return None;
    }
    let metrics = candidate.score(sessions, forgiveness, rng);
    Some(Proposal { candidate, kind, metrics })
}

/// Polish `model` with up to `steps` no-regression weight steps starting from
/// `metrics`; returns the metrics after polishing.
fn polish(
    model: &mut Blueprint,
    sessions: &[Session],
    mut metrics: MetricTuple,
    steps: usize,
    max_weight_change: f64,
    forgiveness: f64,
    rng: &mut impl Rng,
) -> MetricTuple {
    for _ in 0..steps {
        match hill_climb_step(
            model,
            sessions,
            &metrics,
            max_weight_change,
            &AcceptancePolicy::NoRegression,
            forgiveness,
            rng,
        ) {
            StepOutcome::Accepted(m) => metrics = m,
            StepOutcome::Rejected => {}
            StepOutcome::NoEligibleConnection => break,
        }
    }
    metrics
}

/// Sequential architecture search on `model` in place.
pub fn run_nas(
    model: &mut Blueprint,
    sessions: &[Session],
    config: &NasConfig,
    search: &SearchConfig,
) -> Result<SearchReport> {
    if sessions.is_empty() {
        return Err(BlueprintError::EmptySessions);
    }
    let mut rng = search.rng();
    let mut logger = ProgressLogger::new(SearchKind::Nas, search.log_path.as_deref());

    let mut best = model.clone().score(sessions, search.forgiveness, &mut rng);
    let mut report = SearchReport::new(SearchKind::Nas, best);
    logger.round(0, config.iterations, RoundOutcome::Initial, &best);

    let mut stalled = 0;
    let mut stop = StopReason::Exhausted;
    for iteration in 1..=config.iterations {
        if config.policy.reached_perfect(&best) {
            stop = StopReason::Perfect;
            break;
        }
        report.rounds = iteration;

        let proposal = propose_insertion(
            model,
            sessions,
            &search.neuron_types,
            config.strategy,
            search.forgiveness,
            &mut rng,
        );
        let accepted = proposal.and_then(|mut p| {
            p.metrics = polish(
                &mut p.candidate,
                sessions,
                p.metrics,
                config.hill_climb_steps,
                config.max_weight_change,
                search.forgiveness,
                &mut rng,
            );
            config.policy.accepts(&p.metrics, &best).then_some(p)
        });

        match accepted {
            Some(p) => {
                stalled = 0;
                *model = p.candidate;
                best = config.policy.advance(&best, &p.metrics);
                report.record(iteration, best, p.kind.as_str());
                logger.round(iteration, config.iterations, RoundOutcome::Accepted, &best);
            }
            None => {
                stalled += 1;
                if config.stall_limit.is_some_and(|limit| stalled >= limit) {
                    stop = StopReason::Stalled;
                    break;
                }
            }
        }
    }

    logger.round(report.rounds, config.iterations, RoundOutcome::Final, &best);
    Ok(report.finish(best, stop))
}

/// Parallel architecture search: `search.workers` proposals per round, the
/// best accepted one is committed.
pub fn run_parallel_nas(
    model: &mut Blueprint,
    sessions: &[Session],
    config: &NasConfig,
    search: &SearchConfig,
) -> Result<SearchReport> {
    if sessions.is_empty() {
        return Err(BlueprintError::EmptySessions);
    }
    let pool = CandidatePool::new(search.workers)?;
    let mut rng = search.rng();
    let mut logger = ProgressLogger::new(SearchKind::ParallelNas, search.log_path.as_deref());

    let mut best = model.clone().score(sessions, search.forgiveness, &mut rng);
    let mut report = SearchReport::new(SearchKind::ParallelNas, best);
    logger.round(0, config.iterations, RoundOutcome::Initial, &best);

    let mut stalled = 0;
    let mut stop = StopReason::Exhausted;
    for iteration in 1..=config.iterations {
        if config.policy.reached_perfect(&best) {
            stop = StopReason::Perfect;
            break;
        }
        report.rounds = iteration;

        let round_seed: u64 = rng.gen();
        let committed: &Blueprint = model;
        let results = pool.run(pool.workers(), round_seed, |_, worker_rng| {
            propose_insertion(
                committed,
                sessions,
                &search.neuron_types,
                config.strategy,
                search.forgiveness,
                worker_rng,
            )
        });
        let candidates: Vec<_> = results
            .into_iter()
            .map(|(worker, p)| (worker, p.metrics, p))
            .collect();

        match config.policy.select_winner(&best, candidates) {
            Some((worker, _, mut winner)) => {
                stalled = 0;
                winner.metrics = polish(
                    &mut winner.candidate,
                    sessions,
                    winner.metrics,
                    config.hill_climb_steps,
                    config.max_weight_change,
                    search.forgiveness,
                    &mut rng,
                );
                tracing::debug!(worker, kind = %winner.kind, "round winner");
                *model = winner.candidate;
                best = config.policy.advance(&best, &winner.metrics);
                report.record(iteration, best, winner.kind.as_str());
                logger.round(iteration, config.iterations, RoundOutcome::Accepted, &best);
            }
            None => {
                stalled += 1;
                if config.stall_limit.is_some_and(|limit| stalled >= limit) {
                    stop = StopReason::Stalled;
                    break;
                }
            }
        }
    }

    logger.round(report.rounds, config.iterations, RoundOutcome::Final, &best);
    Ok(report.finish(best, stop))
}
