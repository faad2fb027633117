//! Forward propagation over a heterogeneous graph.
//!
//! Each timestep visits every non-input node in ascending id order, gathers
//! its weighted fan-in from the *current* values of its sources, and applies
//! the rule for its kind. After the last timestep the output values are
//! replaced by a softmax across all outputs.

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::activation::{sigmoid, softmax, tanh, ActivationRegistry};
use crate::blueprint::Blueprint;
use crate::neuron::{NcaRule, Neuron, NeuronKind, NodeId};

const BATCH_NORM_EPSILON: f64 = 1e-7;

impl Blueprint {
    /// Run `timesteps` rounds of propagation without the final output softmax.
    pub fn propagate(
        &mut self,
        inputs: &FxHashMap<NodeId, f64>,
        timesteps: usize,
        rng: &mut impl Rng,
    ) {
        for (&id, &value) in inputs {
            match self.neurons.get_mut(&id) {
                Some(neuron) => neuron.value = value,
                None => tracing::debug!(neuron = id, "input value for missing neuron ignored"),
            }
        }

        let order: Vec<NodeId> = self
            .neuron_ids()
            .into_iter()
            .filter(|id| !self.neurons[id].is_input())
            .collect();
        let registry = std::sync::Arc::clone(&self.activations);

        for _ in 0..timesteps {
            for &id in &order {
                let gathered = match self.neurons.get(&id) {
                    Some(neuron) => self.gather(neuron),
                    None => continue,
                };
                if let Some(neuron) = self.neurons.get_mut(&id) {
                    step_neuron(neuron, &gathered, &registry, rng);
                }
            }
        }
    }

    /// Propagate, then softmax the outputs.
    pub fn forward(
        &mut self,
        inputs: &FxHashMap<NodeId, f64>,
        timesteps: usize,
        rng: &mut impl Rng,
    ) {
        self.propagate(inputs, timesteps, rng);
        self.apply_output_softmax();
    }

    /// Forward pass returning the final output map.
    pub fn run_network(
        &mut self,
        inputs: &FxHashMap<NodeId, f64>,
        timesteps: usize,
        rng: &mut impl Rng,
    ) -> FxHashMap<NodeId, f64> {
        self.forward(inputs, timesteps, rng);
        self.outputs()
    }

    /// Current values of the output nodes that exist.
    pub fn outputs(&self) -> FxHashMap<NodeId, f64> {
        self.output_nodes
            .iter()
            .filter_map(|id| self.neurons.get(id).map(|n| (*id, n.value)))
            .collect()
    }

    /// Replace output values by their joint softmax.
    pub fn apply_output_softmax(&mut self) {
        let present: Vec<NodeId> = self
            .output_nodes
            .iter()
            .copied()
            .filter(|id| {
                let exists = self.neurons.contains_key(id);
                if !exists {
                    tracing::debug!(neuron = *id, "output neuron missing from node table");
                }
                exists
            })
            .collect();
        let values: Vec<f64> = present.iter().map(|id| self.neurons[id].value).collect();
        for (id, value) in present.iter().zip(softmax(&values)) {
            if let Some(neuron) = self.neurons.get_mut(id) {
                neuron.value = value;
            }
        }
    }

    /// Values a node consumes this step: neighbour values for NCA, nothing for
    /// dropout and batch-norm, weighted fan-in otherwise. Missing ids are skipped.
    fn gather(&self, neuron: &Neuron) -> Vec<f64> {
        match &neuron.kind {
            NeuronKind::Nca { neighbors, .. } => neighbors
                .iter()
                .filter_map(|id| self.neurons.get(id).map(|n| n.value))
                .collect(),
            NeuronKind::Dropout { .. } | NeuronKind::BatchNorm { .. } | NeuronKind::Input => {
                Vec::new()
            }
            _ => neuron
                .connections
                .iter()
                .filter_map(|c| match self.neurons.get(&c.source) {
                    Some(source) => Some(source.value * c.weight),
                    None => {
                        tracing::debug!(source = c.source, target = neuron.id, "dangling connection skipped");
                        None
                    }
                })
                .collect(),
        }
    }
}

/// Apply one kind-specific update rule in place.
fn step_neuron(
    neuron: &mut Neuron,
    inputs: &[f64],
    registry: &ActivationRegistry,
    rng: &mut impl Rng,
) {
    let bias = neuron.bias;
    let previous = neuron.value;
    let activation = neuron.activation.as_str();

    let next = match &mut neuron.kind {
        NeuronKind::Input => return,
        NeuronKind::Dense => registry.apply(activation, bias + inputs.iter().sum::<f64>()),
        NeuronKind::Rnn => {
            registry.apply(activation, bias + inputs.iter().sum::<f64>() + previous)
        }
        NeuronKind::Lstm { gate_weights, cell_state } => {
            let weighted = |gate: &[f64]| -> f64 {
                inputs
                    .iter()
                    .enumerate()
                    .map(|(i, x)| x * gate.get(i).copied().unwrap_or(0.0))
                    .sum()
            };
            let input_gate = sigmoid(weighted(&gate_weights.input) + bias);
            let forget_gate = sigmoid(weighted(&gate_weights.forget) + bias);
            let output_gate = sigmoid(weighted(&gate_weights.output) + bias);
            let candidate = tanh(weighted(&gate_weights.cell) + bias);

            *cell_state = *cell_state * forget_gate + candidate * input_gate;
            tanh(*cell_state) * output_gate
        }
        NeuronKind::Cnn { kernels } => {
            let mut windows = Vec::new();
            for kernel in kernels.iter() {
                if kernel.is_empty() || kernel.len() > inputs.len() {
                    continue;
                }
                for window in inputs.windows(kernel.len()) {
                    let sum: f64 = window.iter().zip(kernel).map(|(x, k)| x * k).sum();
                    windows.push(registry.apply(activation, bias + sum));
                }
            }
            if windows.is_empty() {
                0.0
            } else {
                windows.iter().sum::<f64>() / windows.len() as f64
            }
        }
        NeuronKind::Dropout { rate } => {
            if rng.gen::<f64>() < *rate {
                0.0
            } else {
                previous
            }
        }
        NeuronKind::BatchNorm { .. } => (previous - 0.0) / (1.0 + BATCH_NORM_EPSILON).sqrt(),
        NeuronKind::Attention { .. } => {
            let scores: Vec<f64> = inputs.iter().map(|x| x * x).collect();
            let attention = softmax(&scores);
            let sum: f64 = inputs.iter().zip(&attention).map(|(x, w)| x * w).sum();
            registry.apply(activation, bias + sum)
        }
        NeuronKind::Nca { update_rule, .. } => {
            let combined = match update_rule {
                NcaRule::Sum => inputs.iter().sum::<f64>(),
                NcaRule::Average if inputs.is_empty() => 0.0,
                NcaRule::Average => inputs.iter().sum::<f64>() / inputs.len() as f64,
            };
            registry.apply(activation, bias + combined)
        }
    };

    neuron.value = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neuron::{Connection, GateWeights};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn inputs(pairs: &[(NodeId, f64)]) -> FxHashMap<NodeId, f64> {
        pairs.iter().copied().collect()
    }

    /// Inputs 1, 2 feeding a single dense output 3.
    fn two_input_dense() -> Blueprint {
        let mut bp = Blueprint::new();
        bp.add_neuron(Neuron::input(1));
        bp.add_neuron(Neuron::input(2));
        bp.add_neuron(Neuron::dense(
            3,
            0.0,
            "linear",
            vec![Connection::new(1, 1.0), Connection::new(2, 1.0)],
        ));
        bp.add_input_nodes(&[1, 2]);
        bp.add_output_nodes(&[3]);
        bp
    }

    fn single_node(kind: NeuronKind, activation: &str, bias: f64, weights: &[f64]) -> Blueprint {
        let mut bp = Blueprint::new();
        let mut ids = Vec::new();
        for (i, _) in weights.iter().enumerate() {
            let id = i as NodeId + 1;
            bp.add_neuron(Neuron::input(id));
            ids.push(id);
        }
        let mut neuron = Neuron::new(100, kind);
        neuron.bias = bias;
        neuron.activation = activation.to_string();
        neuron.connections = ids
            .iter()
            .zip(weights)
            .map(|(&id, &w)| Connection::new(id, w))
            .collect();
        bp.add_neuron(neuron);
        bp.add_input_nodes(&ids);
        bp.add_output_nodes(&[100]);
        bp
    }

    #[test]
    fn test_dense_pre_softmax_value() {
        let mut bp = two_input_dense();
        let mut rng = StdRng::seed_from_u64(0);
        bp.propagate(&inputs(&[(1, 2.0), (2, 3.0)]), 1, &mut rng);
        assert_eq!(bp.neuron(3).unwrap().value, 5.0);

        // a single output always softmaxes to 1
        bp.apply_output_softmax();
        assert!((bp.neuron(3).unwrap().value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rnn_accumulates_previous_value() {
        let mut bp = single_node(NeuronKind::Rnn, "linear", 0.0, &[1.0]);
        bp.neuron_mut(100).unwrap().value = 0.0;
        let mut rng = StdRng::seed_from_u64(0);
        bp.propagate(&inputs(&[(1, 1.0)]), 3, &mut rng);
        assert_eq!(bp.neuron(100).unwrap().value, 3.0);
    }

    #[test]
    fn test_lstm_cell_update() {
        let kind = NeuronKind::Lstm {
            gate_weights: GateWeights {
                input: vec![1.0],
                forget: vec![1.0],
                output: vec![1.0],
                cell: vec![1.0],
            },
            cell_state: 0.5,
        };
        let mut bp = single_node(kind, "linear", 0.0, &[1.0]);
        let mut rng = StdRng::seed_from_u64(0);
        bp.propagate(&inputs(&[(1, 2.0)]), 1, &mut rng);

        let gate = sigmoid(2.0);
        let cell = 0.5 * gate + tanh(2.0) * gate;
        let neuron = bp.neuron(100).unwrap();
        assert!((neuron.value - tanh(cell) * gate).abs() < 1e-12);
        match &neuron.kind {
            NeuronKind::Lstm { cell_state, .. } => assert!((cell_state - cell).abs() < 1e-12),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_lstm_with_empty_gates_does_not_panic() {
        let kind = NeuronKind::Lstm { gate_weights: GateWeights::default(), cell_state: 0.0 };
        let mut bp = single_node(kind, "linear", 0.0, &[1.0, 1.0]);
        let mut rng = StdRng::seed_from_u64(0);
        bp.propagate(&inputs(&[(1, 1.0), (2, 1.0)]), 2, &mut rng);
        assert!(bp.neuron(100).unwrap().value.is_finite());
    }

    #[test]
    fn test_cnn_mean_of_windows() {
        let kind = NeuronKind::Cnn { kernels: vec![vec![1.0, 1.0]] };
        let mut bp = single_node(kind, "linear", 0.0, &[1.0, 1.0, 1.0]);
        let mut rng = StdRng::seed_from_u64(0);
        bp.propagate(&inputs(&[(1, 1.0), (2, 2.0), (3, 3.0)]), 1, &mut rng);
        // windows: 1+2=3, 2+3=5 → mean 4
        assert_eq!(bp.neuron(100).unwrap().value, 4.0);
    }

    #[test]
    fn test_cnn_kernel_longer_than_fan_in() {
        let kind = NeuronKind::Cnn { kernels: vec![vec![1.0, 1.0, 1.0]] };
        let mut bp = single_node(kind, "linear", 0.5, &[1.0]);
        let mut rng = StdRng::seed_from_u64(0);
        bp.propagate(&inputs(&[(1, 4.0)]), 1, &mut rng);
        assert_eq!(bp.neuron(100).unwrap().value, 0.0);
    }

    #[test]
    fn test_dropout_rates() {
        let mut rng = StdRng::seed_from_u64(0);

        let mut always = single_node(NeuronKind::Dropout { rate: 1.0 }, "linear", 0.0, &[1.0]);
        always.neuron_mut(100).unwrap().value = 0.7;
        always.propagate(&inputs(&[(1, 5.0)]), 1, &mut rng);
        assert_eq!(always.neuron(100).unwrap().value, 0.0);

        let mut never = single_node(NeuronKind::Dropout { rate: 0.0 }, "linear", 0.0, &[1.0]);
        never.neuron_mut(100).unwrap().value = 0.7;
        never.propagate(&inputs(&[(1, 5.0)]), 1, &mut rng);
        assert_eq!(never.neuron(100).unwrap().value, 0.7);
    }

    #[test]
    fn test_batch_norm_uses_fixed_reference() {
        let kind = NeuronKind::BatchNorm { params: Default::default() };
        let mut bp = single_node(kind, "linear", 0.0, &[1.0]);
        bp.neuron_mut(100).unwrap().value = 2.0;
        let mut rng = StdRng::seed_from_u64(0);
        bp.propagate(&inputs(&[(1, 9.0)]), 1, &mut rng);
        let expected = 2.0 / (1.0 + BATCH_NORM_EPSILON).sqrt();
        assert!((bp.neuron(100).unwrap().value - expected).abs() < 1e-15);
    }

    #[test]
    fn test_attention_weighted_sum() {
        let kind = NeuronKind::Attention { weights: Vec::new(), enabled: true };
        let mut bp = single_node(kind, "linear", 0.0, &[1.0, 1.0]);
        let mut rng = StdRng::seed_from_u64(0);
        bp.propagate(&inputs(&[(1, 1.0), (2, 2.0)]), 1, &mut rng);
        let weights = softmax(&[1.0, 4.0]);
        let expected = 1.0 * weights[0] + 2.0 * weights[1];
        assert!((bp.neuron(100).unwrap().value - expected).abs() < 1e-12);
    }

    #[test]
    fn test_nca_rules_read_neighbors_not_fan_in() {
        let mut rng = StdRng::seed_from_u64(0);
        for (rule, expected) in [(NcaRule::Sum, 6.0 + 1.0), (NcaRule::Average, 3.0 + 1.0)] {
            let kind = NeuronKind::Nca {
                neighbors: vec![1, 2, 999],
                update_rule: rule,
                state: Vec::new(),
            };
            // fan-in weight 100 must be ignored
            let mut bp = single_node(kind, "linear", 1.0, &[100.0, 100.0]);
            bp.propagate(&inputs(&[(1, 2.0), (2, 4.0)]), 1, &mut rng);
            assert_eq!(bp.neuron(100).unwrap().value, expected);
        }
    }

    #[test]
    fn test_dangling_source_contributes_nothing() {
        let mut bp = two_input_dense();
        bp.neuron_mut(3).unwrap().connections.push(Connection::new(55, 10.0));
        let mut rng = StdRng::seed_from_u64(0);
        bp.propagate(&inputs(&[(1, 2.0), (2, 3.0)]), 1, &mut rng);
        assert_eq!(bp.neuron(3).unwrap().value, 5.0);
    }

    #[test]
    fn test_unknown_activation_falls_back_to_linear() {
        let mut bp = two_input_dense();
        bp.neuron_mut(3).unwrap().activation = "swishy".to_string();
        let mut rng = StdRng::seed_from_u64(0);
        bp.propagate(&inputs(&[(1, -2.0), (2, -3.0)]), 1, &mut rng);
        assert_eq!(bp.neuron(3).unwrap().value, -5.0);
    }

    #[test]
    fn test_outputs_form_distribution() {
        let mut bp = two_input_dense();
        bp.add_neuron(Neuron::dense(4, 0.0, "linear", vec![Connection::new(1, -1.0)]));
        bp.add_output_nodes(&[4, 404]);
        let mut rng = StdRng::seed_from_u64(0);
        let outputs = bp.run_network(&inputs(&[(1, 2.0), (2, 3.0)]), 1, &mut rng);
        assert_eq!(outputs.len(), 2);
        let total: f64 = outputs.values().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(outputs[&3] > outputs[&4]);
    }
}
