//! Targeted micro-refinement of output weights on near-miss sessions.
//!
//! A near miss is a session whose predicted class is wrong but whose
//! similarity is already above a cutoff. Each round nudges output fan-in
//! weights on a random subset of near misses, keeping a nudge only when it
//! lowers that session's error. The round as a whole is rolled back if any
//! global metric regressed.

use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::acceptance::AcceptancePolicy;
use crate::blueprint::Blueprint;
use crate::config::SearchConfig;
use crate::error::{BlueprintError, Result};
use crate::eval::{is_exact_match, similarity_score, MetricTuple, Session};
use crate::neuron::NodeId;
use crate::progress::{ProgressLogger, RoundOutcome};
use crate::report::{SearchKind, SearchReport, StopReason};

#[derive(Clone, Debug)]
pub struct RefinementConfig {
    pub max_iterations: usize,
    /// Near misses refined per round.
    pub subset_size: usize,
    /// Weight nudges tried per near miss per round.
    pub trials_per_sample: usize,
    /// Stop once exact accuracy reaches this value (0–100).
    pub exact_threshold: f64,
    /// Similarity cutoff (fraction of 100) for a near miss.
    pub cutoff: f64,
    /// Used when no session qualifies at `cutoff`.
    pub fallback_cutoff: f64,
    /// Stop after more than this many rounds in a row without improvement.
    pub stall_limit: usize,
    /// Nudges are N(0,1) scaled by this.
    pub delta_scale: f64,
    pub global_policy: AcceptancePolicy,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            subset_size: 5,
            trials_per_sample: 10,
            exact_threshold: 100.0,
            cutoff: 0.8,
            fallback_cutoff: 0.5,
            stall_limit: 5,
            delta_scale: 0.01,
            global_policy: AcceptancePolicy::NoRegression,
        }
    }
}

/// Indices of sessions with a wrong class but similarity >= `cutoff * 100`.
pub fn find_near_misses(
    model: &Blueprint,
    sessions: &[Session],
    cutoff: f64,
    rng: &mut impl Rng,
) -> Vec<usize> {
    let mut probe = model.clone();
    let mut near = Vec::new();
    for (i, session) in sessions.iter().enumerate() {
        let predicted = probe.run_network(&session.inputs, session.timesteps, rng);
        if is_exact_match(&predicted, &session.expected_outputs) {
            continue;
        }
        if similarity_score(&predicted, &session.expected_outputs) >= cutoff * 100.0 {
            near.push(i);
        }
    }
    tracing::debug!(cutoff, found = near.len(), "near-miss scan");
    near
}

/// Try `trials` ±delta nudges on output fan-in weights, keeping each one that
/// lowers the sample's MAE. Returns whether anything was kept.
pub fn refine_sample_weights(
    model: &mut Blueprint,
    sample: &Session,
    trials: usize,
    delta_scale: f64,
    rng: &mut impl Rng,
) -> bool {
    let outputs = model.output_nodes.clone();
    if outputs.is_empty() {
        return false;
    }
    let mut error = model.sample_error(sample, rng);
    let mut improved = false;

    for _ in 0..trials {
        let Some(&target) = outputs.choose(rng) else { break };
        let count = match model.neuron(target) {
            Some(neuron) if !neuron.connections.is_empty() => neuron.connections.len(),
            _ => continue,
        };
        let index = rng.gen_range(0..count);
        let old = model.neurons[&target].connections[index].weight;
        let delta = rng.sample::<f64, _>(StandardNormal) * delta_scale;

        let mut kept = false;
        for weight in [old + delta, old - delta] {
            set_weight(model, target, index, weight);
            let trial_error = model.sample_error(sample, rng);
            if trial_error < error {
                error = trial_error;
                kept = true;
                break;
            }
        }
        if kept {
            improved = true;
        } else {
            set_weight(model, target, index, old);
        }
    }
    improved
}

fn set_weight(model: &mut Blueprint, target: NodeId, index: usize, weight: f64) {
    if let Some(neuron) = model.neuron_mut(target) {
        neuron.connections[index].weight = weight;
    }
}

fn regressed(candidate: &MetricTuple, reference: &MetricTuple) -> bool {
    candidate.exact < reference.exact
        || candidate.generous < reference.generous
        || candidate.forgiveness < reference.forgiveness
}

/// Run targeted micro-refinement on `model` in place.
pub fn targeted_micro_refinement(
    model: &mut Blueprint,
    sessions: &[Session],
    config: &RefinementConfig,
    search: &SearchConfig,
) -> Result<SearchReport> {
    if sessions.is_empty() {
        return Err(BlueprintError::EmptySessions);
    }
    let mut rng = search.rng();
    let mut logger = ProgressLogger::new(SearchKind::Refinement, search.log_path.as_deref());

    let mut best = model.clone().score(sessions, search.forgiveness, &mut rng);
    let mut report = SearchReport::new(SearchKind::Refinement, best);
    logger.round(0, config.max_iterations, RoundOutcome::Initial, &best);

    if best.exact >= config.exact_threshold {
        return Ok(report.finish(best, StopReason::ThresholdReached));
    }

    let mut near = find_near_misses(model, sessions, config.cutoff, &mut rng);
    if near.is_empty() {
        near = find_near_misses(model, sessions, config.fallback_cutoff, &mut rng);
    }
    if near.is_empty() {
        tracing::info!("no near-miss sessions, nothing to refine");
        return Ok(report.finish(best, StopReason::NothingToDo));
    }

    let mut stalled = 0;
    let mut stop = StopReason::Exhausted;
    for iteration in 1..=config.max_iterations {
        report.rounds = iteration;
        let mut work = model.clone();

        near.shuffle(&mut rng);
        for &i in near.iter().take(config.subset_size.max(1)) {
            refine_sample_weights(
                &mut work,
                &sessions[i],
                config.trials_per_sample,
                config.delta_scale,
                &mut rng,
            );
        }

        let metrics = work.clone().score(sessions, search.forgiveness, &mut rng);
        if regressed(&metrics, &best) {
            stalled += 1;
            logger.round(iteration, config.max_iterations, RoundOutcome::RolledBack, &metrics);
        } else if config.global_policy.accepts(&metrics, &best) {
            stalled = 0;
            *model = work;
            best = config.global_policy.advance(&best, &metrics);
            report.record(iteration, best, "output weights");
            logger.round(iteration, config.max_iterations, RoundOutcome::Accepted, &best);
        } else {
            // same metrics; keep the lower per-sample errors
            stalled += 1;
            *model = work;
        }

        if best.exact >= config.exact_threshold {
            stop = StopReason::ThresholdReached;
            break;
        }
        if stalled > config.stall_limit {
            stop = StopReason::Stalled;
            break;
        }
    }

    logger.round(report.rounds, config.max_iterations, RoundOutcome::Final, &best);
    Ok(report.finish(best, stop))
}
