//! Batched multi-operator local search, one data item at a time.
//!
//! For every item of a batch, each worker applies one random modification to
//! its own clone and scores it on that item alone. Trials that beat the
//! committed model on the item are kept. After the batch, the trial with the
//! largest gain is committed only if it also passes the global check over all
//! sessions, so a change tuned to one sample cannot quietly hurt the rest.

use rand::prelude::*;
use std::fmt;

use crate::acceptance::AcceptancePolicy;
use crate::blueprint::Blueprint;
use crate::config::SearchConfig;
use crate::error::{BlueprintError, Result};
use crate::eval::{MetricTuple, Session};
use crate::mutation::{random_neuron_type, InsertionStrategy};
use crate::neuron::{NeuronType, NodeId};
use crate::pool::CandidatePool;
use crate::progress::{ProgressLogger, RoundOutcome};
use crate::report::{SearchKind, SearchReport, StopReason};

#[derive(Clone, Debug)]
pub struct ItemLearningConfig {
    pub batch_size: usize,
    /// Trials per worker per item.
    pub attempts_per_item: usize,
    /// Full passes over the session list.
    pub passes: usize,
    pub insertion: InsertionStrategy,
    /// Largest weight change an adjust-weight trial may make.
    pub max_weight_change: f64,
    /// Gate for committing a batch winner against the whole session set.
    pub global_policy: AcceptancePolicy,
    /// Stop after this many consecutive batches commit nothing.
    pub stall_limit: Option<usize>,
}

impl Default for ItemLearningConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            attempts_per_item: 2,
            passes: 1,
            insertion: InsertionStrategy::RandomConnections,
            max_weight_change: 0.1,
            global_policy: AcceptancePolicy::NoRegression,
            stall_limit: None,
        }
    }
}

/// The edit a trial made.
#[derive(Clone, Debug, PartialEq)]
pub enum Modification {
    InsertNeuron { id: NodeId, kind: NeuronType },
    AddConnection { source: NodeId, target: NodeId, weight: f64 },
    ModifyActivation { neuron: NodeId, activation: String },
    RemoveConnection { source: NodeId, target: NodeId },
    AdjustWeight { source: NodeId, target: NodeId, weight: f64 },
}

impl fmt::Display for Modification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modification::InsertNeuron { id, kind } => write!(f, "insert_neuron {} ({})", id, kind),
            Modification::AddConnection { source, target, .. } => {
                write!(f, "add_connection {}->{}", source, target)
            }
            Modification::ModifyActivation { neuron, activation } => {
                write!(f, "modify_activation {} -> {}", neuron, activation)
            }
            Modification::RemoveConnection { source, target } => {
                write!(f, "remove_connection {}->{}", source, target)
            }
            Modification::AdjustWeight { source, target, .. } => {
                write!(f, "adjust_weight {}->{}", source, target)
            }
        }
    }
}

/// Apply one uniformly chosen modification to `model`.
///
/// `Ok(None)` means the chosen operator had nothing to act on (no free pair,
/// no hidden node, no edge); the graph is unchanged in that case.
pub fn apply_random_modification(
    model: &mut Blueprint,
    kinds: &[NeuronType],
    insertion: InsertionStrategy,
    max_weight_change: f64,
    rng: &mut impl Rng,
) -> Result<Option<Modification>> {
    let modification = match rng.gen_range(0..5) {
        0 => {
            let Some(kind) = random_neuron_type(kinds, rng) else { return Ok(None) };
            let id = model.insert_neuron(kind, insertion, rng)?;
            Modification::InsertNeuron { id, kind }
        }
        1 => {
            let Some((source, target)) = model.random_connection_pair(rng) else { return Ok(None) };
            let weight = rng.gen_range(-1.0..1.0);
            model.add_connection(source, target, weight)?;
            Modification::AddConnection { source, target, weight }
        }
        2 => {
            let Some(neuron) = model.random_hidden_neuron(rng) else { return Ok(None) };
            let names = model.activations.insertion_names();
            let Some(activation) = names.choose(rng).map(|s| s.to_string()) else {
                return Ok(None);
            };
            model.modify_activation(neuron, &activation)?;
            Modification::ModifyActivation { neuron, activation }
        }
        3 => {
            let Some((source, target)) = model.random_existing_connection(rng) else {
                return Ok(None);
            };
            model.remove_connection(source, target);
            Modification::RemoveConnection { source, target }
        }
        _ => {
            let Some((source, target)) = model.random_existing_connection(rng) else {
                return Ok(None);
            };
            let weight = model.connection_weight(source, target)
                + rng.gen_range(-max_weight_change..=max_weight_change);
            model.reweight_connection(source, target, weight)?;
            Modification::AdjustWeight { source, target, weight }
        }
    };
    Ok(Some(modification))
}

struct Trial {
    gain: f64,
    modification: Modification,
    candidate: Blueprint,
}

/// Run item-at-a-time learning on `model` in place.
pub fn learn_one_item_at_a_time(
    model: &mut Blueprint,
    sessions: &[Session],
    config: &ItemLearningConfig,
    search: &SearchConfig,
) -> Result<SearchReport> {
    if sessions.is_empty() {
        return Err(BlueprintError::EmptySessions);
    }
    let pool = CandidatePool::new(search.workers)?;
    let mut rng = search.rng();
    let mut logger = ProgressLogger::new(SearchKind::ItemLearning, search.log_path.as_deref());

    let batch_size = config.batch_size.max(1);
    let batches_per_pass = sessions.len().div_ceil(batch_size);
    let total_batches = batches_per_pass * config.passes;
    let trials_per_item = pool.workers() * config.attempts_per_item.max(1);

    let mut best = model.clone().score(sessions, search.forgiveness, &mut rng);
    let mut report = SearchReport::new(SearchKind::ItemLearning, best);
    logger.round(0, total_batches, RoundOutcome::Initial, &best);

    let mut stalled = 0;
    let mut stop = StopReason::Exhausted;
    let mut round = 0;
    'passes: for _ in 0..config.passes {
        for batch in sessions.chunks(batch_size) {
            if config.global_policy.reached_perfect(&best) {
                stop = StopReason::Perfect;
                break 'passes;
            }
            round += 1;
            report.rounds = round;

            let mut winner: Option<Trial> = None;
            for item in batch {
                let single = std::slice::from_ref(item);
                let baseline: MetricTuple = model.clone().score(single, search.forgiveness, &mut rng);
                let committed: &Blueprint = model;

                let trials = pool.run(trials_per_item, rng.gen(), |_, worker_rng| {
                    let mut candidate = committed.clone();
                    let modification = match apply_random_modification(
                        &mut candidate,
                        &search.neuron_types,
                        config.insertion,
                        config.max_weight_change,
                        worker_rng,
                    ) {
                        Ok(Some(m)) => m,
                        Ok(None) => return None,
                        Err(e) => {
                            tracing::debug!(error = %e, "modification dropped");
                            return None;
                        }
                    };
                    let metrics = candidate.clone().score(single, search.forgiveness, worker_rng);
                    let gain = metrics.gain_over(&baseline);
                    (gain > 0.0).then_some(Trial { gain, modification, candidate })
                });

                // strict `>` keeps the earliest trial on ties
                for (_, trial) in trials {
                    if winner.as_ref().map_or(true, |w| trial.gain > w.gain) {
                        winner = Some(trial);
                    }
                }
            }

            let committed = match winner {
                None => {
                    tracing::debug!(batch = round, "no trial improved any item");
                    false
                }
                Some(trial) => {
                    let metrics = trial.candidate.clone().score(sessions, search.forgiveness, &mut rng);
                    if config.global_policy.accepts(&metrics, &best) {
                        tracing::debug!(modification = %trial.modification, gain = trial.gain, "batch winner committed");
                        *model = trial.candidate;
                        best = config.global_policy.advance(&best, &metrics);
                        report.record(round, best, trial.modification.to_string());
                        logger.round(round, total_batches, RoundOutcome::Accepted, &best);
                        true
                    } else {
                        logger.round(round, total_batches, RoundOutcome::Rejected, &metrics);
                        false
                    }
                }
            };

            if committed {
                stalled = 0;
            } else {
                stalled += 1;
                if config.stall_limit.is_some_and(|limit| stalled >= limit) {
                    stop = StopReason::Stalled;
                    break 'passes;
                }
            }
        }
    }

    logger.round(report.rounds, total_batches, RoundOutcome::Final, &best);
    Ok(report.finish(best, stop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::tests::small_graph;
    use crate::eval::tests::{separable_sessions, two_class_graph, two_class_sessions};

    #[test]
    fn test_modifications_touch_real_edges() {
        let mut rng = StdRng::seed_from_u64(31);
        for _ in 0..50 {
            let mut model = small_graph();
            let before = model.clone();
            match apply_random_modification(
                &mut model,
                &NeuronType::INSERTABLE,
                InsertionStrategy::RandomConnections,
                0.1,
                &mut rng,
            )
            .unwrap()
            {
                Some(Modification::RemoveConnection { source, target }) => {
                    assert!(before.connection_exists(source, target));
                    assert!(!model.connection_exists(source, target));
                }
                Some(Modification::AdjustWeight { source, target, weight }) => {
                    assert!(before.connection_exists(source, target));
                    let edges = model.neuron(target).unwrap().connections.iter().filter(|c| c.source == source).count();
                    assert_eq!(edges, 1);
                    assert_eq!(model.connection_weight(source, target), weight);
                }
                Some(Modification::AddConnection { source, target, .. }) => {
                    assert!(!before.connection_exists(source, target));
                    assert!(model.connection_exists(source, target));
                }
                Some(Modification::ModifyActivation { neuron, activation }) => {
                    assert!(!model.is_input_node(neuron) && !model.is_output_node(neuron));
                    assert!(crate::activation::INSERTION_ACTIVATIONS.contains(&activation.as_str()));
                }
                Some(Modification::InsertNeuron { id, .. }) => assert!(model.neuron(id).is_some()),
                None => assert_eq!(model, before),
            }
        }
    }

    #[test]
    fn test_item_learning_never_regresses_globally() {
        let mut model = two_class_graph();
        let sessions = two_class_sessions();
        let config = ItemLearningConfig { batch_size: 2, passes: 2, ..Default::default() };
        let search = SearchConfig::default().with_seed(13).with_workers(2);
        let report = learn_one_item_at_a_time(&mut model, &sessions, &config, &search).unwrap();

        let mut previous = report.initial;
        for record in &report.history {
            assert!(record.metrics.exact >= previous.exact);
            assert!(record.metrics.generous >= previous.generous);
            assert!(record.metrics.forgiveness >= previous.forgiveness);
            previous = record.metrics;
        }
        assert!(report.rounds <= 4);
    }

    #[test]
    fn test_stops_after_batches_without_commit() {
        let mut model = two_class_graph();
        let before = model.clone();
        let config = ItemLearningConfig {
            batch_size: 2,
            passes: 2,
            global_policy: AcceptancePolicy::Selected(Vec::new()),
            stall_limit: Some(1),
            ..Default::default()
        };
        let search = SearchConfig::default().with_seed(13).with_workers(2);
        let report = learn_one_item_at_a_time(&mut model, &two_class_sessions(), &config, &search).unwrap();

        assert_eq!(report.stop_reason, StopReason::Stalled);
        assert_eq!(report.rounds, 1);
        assert_eq!(report.accepted, 0);
        assert_eq!(model, before);
    }

    #[test]
    fn test_perfect_exact_skips_every_batch() {
        let mut model = two_class_graph();
        let before = model.clone();
        let search = SearchConfig::default().with_seed(13).with_workers(2);
        let report =
            learn_one_item_at_a_time(&mut model, &separable_sessions(), &ItemLearningConfig::default(), &search)
                .unwrap();

        assert!(report.initial.generous < 100.0);
        assert_eq!(report.stop_reason, StopReason::Perfect);
        assert_eq!(report.rounds, 0);
        assert_eq!(model, before);
    }

    #[test]
    fn test_empty_sessions_rejected() {
        let mut model = two_class_graph();
        let result = learn_one_item_at_a_time(
            &mut model,
            &[],
            &ItemLearningConfig::default(),
            &SearchConfig::default().with_seed(1),
        );
        assert!(matches!(result, Err(BlueprintError::EmptySessions)));
    }
}
