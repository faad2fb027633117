//! Parallel search for one new connection that helps.
//!
//! Each round enumerates up to `max_attempts` source/target pairs that are
//! not connected yet, trials each with a random weight on its own copy of the
//! committed graph, and commits the pair with the largest summed positive
//! metric gain.

use rand::prelude::*;

use crate::blueprint::Blueprint;
use crate::config::SearchConfig;
use crate::error::{BlueprintError, Result};
use crate::eval::Session;
use crate::neuron::NodeId;
use crate::pool::CandidatePool;
use crate::progress::{ProgressLogger, RoundOutcome};
use crate::report::{is_perfect, SearchKind, SearchReport, StopReason};

#[derive(Clone, Debug)]
pub struct ConnectionSearchConfig {
    pub max_attempts: usize,
    pub rounds: usize,
    /// Copy the graph for each trial through its JSON form instead of `clone()`.
    pub isolate_via_json: bool,
}

impl Default for ConnectionSearchConfig {
    fn default() -> Self {
        Self { max_attempts: 50, rounds: 1, isolate_via_json: false }
    }
}

/// Up to `limit` unconnected `(source, target)` pairs in random order.
/// Targets are never input nodes.
pub fn candidate_pairs(model: &Blueprint, limit: usize, rng: &mut impl Rng) -> Vec<(NodeId, NodeId)> {
    let mut ids = model.neuron_ids();
    ids.shuffle(rng);
    let mut pairs = Vec::new();
    'outer: for &source in &ids {
        for &target in &ids {
            if pairs.len() >= limit {
                break 'outer;
            }
            if source == target || model.is_input_node(target) || model.connection_exists(source, target) {
                continue;
            }
            pairs.push((source, target));
        }
    }
    pairs
}

/// Run connection search on `model` in place.
pub fn try_add_connections(
    model: &mut Blueprint,
    sessions: &[Session],
    config: &ConnectionSearchConfig,
    search: &SearchConfig,
) -> Result<SearchReport> {
    if sessions.is_empty() {
        return Err(BlueprintError::EmptySessions);
    }
    let pool = CandidatePool::new(search.workers)?;
    let mut rng = search.rng();
    let mut logger = ProgressLogger::new(SearchKind::ConnectionSearch, search.log_path.as_deref());

    let mut best = model.clone().score(sessions, search.forgiveness, &mut rng);
    let mut report = SearchReport::new(SearchKind::ConnectionSearch, best);
    logger.round(0, config.rounds, RoundOutcome::Initial, &best);

    let mut stop = StopReason::Exhausted;
    for round in 1..=config.rounds {
        if is_perfect(&best) {
            stop = StopReason::Perfect;
            break;
        }
        let pairs = candidate_pairs(model, config.max_attempts, &mut rng);
        if pairs.is_empty() {
            stop = StopReason::NothingToDo;
            break;
        }
        report.rounds = round;

        let committed: &Blueprint = model;
        let baseline = best;
        let trials = pool.run(pairs.len(), rng.gen(), |i, worker_rng| {
            let (source, target) = pairs[i];
            let mut candidate = if config.isolate_via_json {
                match committed.isolate_via_json() {
                    Ok(copy) => copy,
                    Err(e) => {
                        tracing::debug!(error = %e, "isolation failed, trial dropped");
                        return None;
                    }
                }
            } else {
                committed.clone()
            };
            let weight = worker_rng.gen_range(-1.0..1.0);
            if let Err(e) = candidate.add_connection(source, target, weight) {
                tracing::debug!(source, target, error = %e, "connection trial dropped");
                return None;
            }
            let metrics = candidate.clone().score(sessions, search.forgiveness, worker_rng);
            let gain = metrics.positive_gain_over(&baseline);
            (gain > 0.0).then_some((gain, metrics, candidate, source, target))
        });

        // trials are in index order, so strict `>` keeps the lowest index on ties
        let mut winner = None;
        for (_, trial) in trials {
            if winner.as_ref().map_or(true, |w: &(f64, _, _, _, _)| trial.0 > w.0) {
                winner = Some(trial);
            }
        }

        match winner {
            Some((gain, metrics, candidate, source, target)) => {
                tracing::debug!(source, target, gain, "connection committed");
                *model = candidate;
                best = metrics;
                report.record(round, best, format!("{}->{}", source, target));
                logger.round(round, config.rounds, RoundOutcome::Accepted, &best);
            }
            None => logger.round(round, config.rounds, RoundOutcome::Rejected, &best),
        }
    }

    logger.round(report.rounds, config.rounds, RoundOutcome::Final, &best);
    Ok(report.finish(best, stop))
}
