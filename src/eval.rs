//! Multi-metric evaluation of a graph over labelled sessions.
//!
//! Three scores drive every acceptance decision:
//! - **exact**: % of sessions whose arg-max output matches the expected arg-max
//! - **generous**: mean similarity `(1 - MAE) * 100`, clamped to [0, 100]
//! - **forgiveness**: % of sessions whose every output lies inside a relative
//!   tolerance band around its target
//!
//! Decile consistency, weighted proximity, class sensitivity, temporal
//! consistency and the error counters are reported alongside but never used
//! for acceptance.

use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::blueprint::Blueprint;
use crate::neuron::NodeId;

/// Default relative tolerance for forgiveness accuracy.
pub const DEFAULT_FORGIVENESS_THRESHOLD: f64 = 0.1;

const DECILE_STEP: f64 = 0.1;

/// Targets above this count double in [`class_sensitivity`].
const SENSITIVE_TARGET: f64 = 0.8;
const SENSITIVITY_PENALTY: f64 = 2.0;

/// One labelled example.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub inputs: FxHashMap<NodeId, f64>,
    pub expected_outputs: FxHashMap<NodeId, f64>,
    pub timesteps: usize,
}

impl Session {
    pub fn new(
        inputs: impl IntoIterator<Item = (NodeId, f64)>,
        expected_outputs: impl IntoIterator<Item = (NodeId, f64)>,
        timesteps: usize,
    ) -> Self {
        Self {
            inputs: inputs.into_iter().collect(),
            expected_outputs: expected_outputs.into_iter().collect(),
            timesteps,
        }
    }
}

/// The three accuracies that acceptance policies compare, each on 0–100.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricTuple {
    pub exact: f64,
    pub generous: f64,
    pub forgiveness: f64,
}

impl MetricTuple {
    pub fn new(exact: f64, generous: f64, forgiveness: f64) -> Self {
        Self { exact, generous, forgiveness }
    }

    pub fn mean(&self) -> f64 {
        (self.exact + self.generous + self.forgiveness) / 3.0
    }

    /// Sum of per-metric deltas against `baseline` (may be negative).
    pub fn gain_over(&self, baseline: &MetricTuple) -> f64 {
        (self.exact - baseline.exact)
            + (self.generous - baseline.generous)
            + (self.forgiveness - baseline.forgiveness)
    }

    /// Sum of only the positive per-metric deltas.
    pub fn positive_gain_over(&self, baseline: &MetricTuple) -> f64 {
        (self.exact - baseline.exact).max(0.0)
            + (self.generous - baseline.generous).max(0.0)
            + (self.forgiveness - baseline.forgiveness).max(0.0)
    }

    /// Element-wise maximum.
    pub fn max_with(&self, other: &MetricTuple) -> MetricTuple {
        MetricTuple {
            exact: self.exact.max(other.exact),
            generous: self.generous.max(other.generous),
            forgiveness: self.forgiveness.max(other.forgiveness),
        }
    }
}

/// Full evaluation output for a batch of sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub exact_accuracy: f64,
    pub generous_accuracy: f64,
    pub forgiveness_accuracy: f64,
    pub decile_consistency: f64,
    pub weighted_proximity: f64,
    /// Mean per-session penalty; lower is better.
    pub class_sensitivity: f64,
    pub temporal_consistency: f64,
    pub exact_errors: usize,
    pub forgiveness_errors: usize,
    pub decile_inconsistent: usize,
    pub average_generous_error: f64,
    pub sessions: usize,
}

impl EvaluationResult {
    pub fn metrics(&self) -> MetricTuple {
        MetricTuple::new(self.exact_accuracy, self.generous_accuracy, self.forgiveness_accuracy)
    }
}

impl Blueprint {
    /// Run every session through the network and reduce to metrics.
    ///
    /// Node values (and LSTM cell state) carry over between sessions, exactly
    /// as they would in a live network.
    pub fn evaluate(
        &mut self,
        sessions: &[Session],
        forgiveness_threshold: f64,
        rng: &mut impl Rng,
    ) -> EvaluationResult {
        if sessions.is_empty() {
            return EvaluationResult::default();
        }

        let mut exact_correct = 0usize;
        let mut forgiven = 0usize;
        let mut decile_consistent = 0usize;
        let mut total_similarity = 0.0;
        let mut total_proximity = 0.0;
        let mut total_sensitivity = 0.0;
        let mut total_temporal = 0.0;

        for session in sessions {
            let predicted = self.run_network(&session.inputs, session.timesteps, rng);

            if is_exact_match(&predicted, &session.expected_outputs) {
                exact_correct += 1;
            }
            total_similarity += similarity_score(&predicted, &session.expected_outputs);
            if is_within_forgiveness(&predicted, &session.expected_outputs, forgiveness_threshold) {
                forgiven += 1;
            }
            if is_decile_consistent(&predicted, &session.expected_outputs) {
                decile_consistent += 1;
            }
            total_proximity += weighted_proximity(&predicted, &session.expected_outputs);
            total_sensitivity += class_sensitivity(&predicted, &session.expected_outputs);
            total_temporal += temporal_consistency(&predicted, &session.expected_outputs);
        }

        let n = sessions.len();
        let pct = |count: usize| count as f64 / n as f64 * 100.0;
        let generous = total_similarity / n as f64;

        EvaluationResult {
            exact_accuracy: pct(exact_correct),
            generous_accuracy: generous,
            forgiveness_accuracy: pct(forgiven),
            decile_consistency: pct(decile_consistent),
            weighted_proximity: total_proximity / n as f64,
            class_sensitivity: total_sensitivity / n as f64,
            temporal_consistency: total_temporal / n as f64,
            exact_errors: n - exact_correct,
            forgiveness_errors: n - forgiven,
            decile_inconsistent: n - decile_consistent,
            average_generous_error: 100.0 - generous,
            sessions: n,
        }
    }

    /// Shorthand for the acceptance tuple.
    pub fn score(
        &mut self,
        sessions: &[Session],
        forgiveness_threshold: f64,
        rng: &mut impl Rng,
    ) -> MetricTuple {
        self.evaluate(sessions, forgiveness_threshold, rng).metrics()
    }

    /// Mean absolute error of one session.
    pub fn sample_error(&mut self, session: &Session, rng: &mut impl Rng) -> f64 {
        let predicted = self.run_network(&session.inputs, session.timesteps, rng);
        sample_mae(&predicted, &session.expected_outputs)
    }
}

// =============================================================================
// Per-session metric helpers
// =============================================================================

/// Id of the largest value; ties go to the lower id.
pub fn argmax(values: &FxHashMap<NodeId, f64>) -> Option<NodeId> {
    values
        .iter()
        .max_by(|(id_a, a), (id_b, b)| {
            a.partial_cmp(b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| id_b.cmp(id_a))
        })
        .map(|(id, _)| *id)
}

/// Predicted and expected arg-max classes both exist and agree.
pub fn is_exact_match(predicted: &FxHashMap<NodeId, f64>, expected: &FxHashMap<NodeId, f64>) -> bool {
    match (argmax(predicted), argmax(expected)) {
        (Some(p), Some(e)) => p == e,
        _ => false,
    }
}

/// MAE with a missing prediction counted as error 1.0.
pub fn sample_mae(predicted: &FxHashMap<NodeId, f64>, expected: &FxHashMap<NodeId, f64>) -> f64 {
    if expected.is_empty() {
        return 0.0;
    }
    let total: f64 = expected
        .iter()
        .map(|(id, target)| match predicted.get(id) {
            Some(value) => (value - target).abs(),
            None => 1.0,
        })
        .sum();
    total / expected.len() as f64
}

/// `(1 - MAE) * 100`, clamped to [0, 100]. Zero when either side is empty.
pub fn similarity_score(predicted: &FxHashMap<NodeId, f64>, expected: &FxHashMap<NodeId, f64>) -> f64 {
    if predicted.is_empty() || expected.is_empty() {
        return 0.0;
    }
    ((1.0 - sample_mae(predicted, expected)) * 100.0).clamp(0.0, 100.0)
}

/// Every target `e` has a prediction inside `[e(1-t), e(1+t)]`.
pub fn is_within_forgiveness(
    predicted: &FxHashMap<NodeId, f64>,
    expected: &FxHashMap<NodeId, f64>,
    threshold: f64,
) -> bool {
    if expected.is_empty() {
        return false;
    }
    expected.iter().all(|(id, &target)| match predicted.get(id) {
        Some(&value) => {
            let a = target * (1.0 - threshold);
            let b = target * (1.0 + threshold);
            value >= a.min(b) && value <= a.max(b)
        }
        None => false,
    })
}

/// All absolute errors fall in the same decile bucket as the lowest-id output.
pub fn is_decile_consistent(predicted: &FxHashMap<NodeId, f64>, expected: &FxHashMap<NodeId, f64>) -> bool {
    let mut ids: Vec<NodeId> = expected.keys().copied().collect();
    ids.sort_unstable();

    let mut reference: Option<usize> = None;
    for id in ids {
        let value = match predicted.get(&id) {
            Some(v) => *v,
            None => return false,
        };
        let decile = (((value - expected[&id]).abs() / DECILE_STEP) as usize).min(9);
        match reference {
            None => reference = Some(decile),
            Some(r) if r != decile => return false,
            Some(_) => {}
        }
    }
    true
}

/// `1 - Σ|err|·w / Σw` with `w = max(target, 0.1)`, on 0–100. Missing
/// predictions are skipped.
pub fn weighted_proximity(predicted: &FxHashMap<NodeId, f64>, expected: &FxHashMap<NodeId, f64>) -> f64 {
    let mut weighted_error = 0.0;
    let mut total_weight = 0.0;
    for (id, &target) in expected {
        if let Some(value) = predicted.get(id) {
            let weight = target.max(0.1);
            weighted_error += (value - target).abs() * weight;
            total_weight += weight;
        }
    }
    if total_weight == 0.0 {
        return 0.0;
    }
    ((1.0 - weighted_error / total_weight) * 100.0).clamp(0.0, 100.0)
}

/// Error penalty that doubles on strongly expected outputs (target above 0.8).
/// A missing prediction costs the full doubled penalty.
pub fn class_sensitivity(predicted: &FxHashMap<NodeId, f64>, expected: &FxHashMap<NodeId, f64>) -> f64 {
    expected
        .iter()
        .map(|(id, &target)| match predicted.get(id) {
            Some(value) if target > SENSITIVE_TARGET => (value - target).abs() * SENSITIVITY_PENALTY,
            Some(value) => (value - target).abs(),
            None => SENSITIVITY_PENALTY,
        })
        .sum()
}

/// How well the steps between consecutive outputs (in id order) follow the
/// steps between their targets, on 0–100. Each adjacent pair scores
/// `max(0, 1 - ||Δpred| - |Δexp||)`. Outputs without a prediction are skipped;
/// fewer than two comparable outputs score 0.
pub fn temporal_consistency(predicted: &FxHashMap<NodeId, f64>, expected: &FxHashMap<NodeId, f64>) -> f64 {
    let mut ids: Vec<NodeId> = expected.keys().filter(|id| predicted.contains_key(id)).copied().collect();
    if ids.len() < 2 {
        return 0.0;
    }
    ids.sort_unstable();

    let total: f64 = ids
        .windows(2)
        .map(|pair| {
            let predicted_step = (predicted[&pair[1]] - predicted[&pair[0]]).abs();
            let expected_step = (expected[&pair[1]] - expected[&pair[0]]).abs();
            (1.0 - (predicted_step - expected_step).abs()).max(0.0)
        })
        .sum();
    total / (ids.len() - 1) as f64 * 100.0
}
