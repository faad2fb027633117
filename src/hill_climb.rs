//! Single-candidate weight hill climbing.
//!
//! Each round clones the committed graph, nudges one random fan-in weight of
//! a non-input node by at most `max_weight_change`, and commits the clone if
//! the acceptance policy says it beats the committed metrics.

use rand::prelude::*;

use crate::acceptance::AcceptancePolicy;
use crate::blueprint::Blueprint;
use crate::config::SearchConfig;
use crate::error::{BlueprintError, Result};
use crate::eval::{MetricTuple, Session};
use crate::neuron::NodeId;
use crate::progress::{ProgressLogger, RoundOutcome};
use crate::report::{SearchKind, SearchReport, StopReason};

#[derive(Clone, Debug)]
pub struct HillClimbConfig {
    pub iterations: usize,
    pub max_weight_change: f64,
    pub policy: AcceptancePolicy,
    /// Stop after this many rejected rounds in a row.
    pub stall_limit: Option<usize>,
}

impl Default for HillClimbConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            max_weight_change: 0.1,
            policy: AcceptancePolicy::NoRegression,
            stall_limit: None,
        }
    }
}

/// Result of one hill-climbing step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome {
    /// No non-input node has any fan-in to perturb.
    NoEligibleConnection,
    Rejected,
    Accepted(MetricTuple),
}

/// `(target, connection index)` of a random fan-in edge on a non-input node.
fn pick_connection(model: &Blueprint, rng: &mut impl Rng) -> Option<(NodeId, usize)> {
    let eligible: Vec<NodeId> = model
        .neuron_ids()
        .into_iter()
        .filter(|id| {
            let neuron = &model.neurons[id];
            !neuron.is_input() && !neuron.connections.is_empty()
        })
        .collect();
    let &target = eligible.choose(rng)?;
    let index = rng.gen_range(0..model.neurons[&target].connections.len());
    Some((target, index))
}

/// One perturb → evaluate → accept cycle. On acceptance `model` is replaced by
/// the perturbed clone.
pub fn hill_climb_step(
    model: &mut Blueprint,
    sessions: &[Session],
    best: &MetricTuple,
    max_weight_change: f64,
    policy: &AcceptancePolicy,
    forgiveness: f64,
    rng: &mut impl Rng,
) -> StepOutcome {
    let Some((target, index)) = pick_connection(model, rng) else {
        return StepOutcome::NoEligibleConnection;
    };

    let mut candidate = model.clone();
    let delta = rng.gen_range(-max_weight_change..=max_weight_change);
    if let Some(neuron) = candidate.neuron_mut(target) {
        neuron.connections[index].weight += delta;
    }

    let metrics = candidate.score(sessions, forgiveness, rng);
    if policy.accepts(&metrics, best) {
        tracing::debug!(neuron = target, connection = index, delta, "weight step accepted");
        *model = candidate;
        StepOutcome::Accepted(metrics)
    } else {
        StepOutcome::Rejected
    }
}

/// Run hill climbing on `model` in place.
pub fn hill_climb(
    model: &mut Blueprint,
    sessions: &[Session],
    config: &HillClimbConfig,
    search: &SearchConfig,
) -> Result<SearchReport> {
    if sessions.is_empty() {
        return Err(BlueprintError::EmptySessions);
    }
    let mut rng = search.rng();
    let mut logger = ProgressLogger::new(SearchKind::HillClimb, search.log_path.as_deref());

    let mut best = model.clone().score(sessions, search.forgiveness, &mut rng);
    let mut report = SearchReport::new(SearchKind::HillClimb, best);
    logger.round(0, config.iterations, RoundOutcome::Initial, &best);

    let mut stalled = 0;
    let mut stop = StopReason::Exhausted;
    for iteration in 1..=config.iterations {
        if config.policy.reached_perfect(&best) {
            stop = StopReason::Perfect;
            break;
        }
        report.rounds = iteration;
        match hill_climb_step(
            model,
            sessions,
            &best,
            config.max_weight_change,
            &config.policy,
            search.forgiveness,
            &mut rng,
        ) {
            StepOutcome::NoEligibleConnection => {
                tracing::info!("no connection eligible for a weight step");
                stop = StopReason::NothingToDo;
                break;
            }
            StepOutcome::Rejected => {
                stalled += 1;
                if config.stall_limit.is_some_and(|limit| stalled >= limit) {
                    stop = StopReason::Stalled;
                    break;
                }
            }
            StepOutcome::Accepted(metrics) => {
                stalled = 0;
                best = config.policy.advance(&best, &metrics);
                report.record(iteration, best, "weight");
                logger.round(iteration, config.iterations, RoundOutcome::Accepted, &best);
            }
        }
    }

    logger.round(report.rounds, config.iterations, RoundOutcome::Final, &best);
    Ok(report.finish(best, stop))
}
