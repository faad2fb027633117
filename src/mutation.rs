//! Structural and parametric edits on a [`Blueprint`].
//!
//! Every structural operator validates before it touches the graph, so an
//! `Err` always leaves the graph exactly as it was.

use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::blueprint::Blueprint;
use crate::error::{BlueprintError, Result};
use crate::neuron::{Connection, GateWeights, Neuron, NeuronKind, NeuronType, NodeId};

/// Probability used by [`Blueprint::mutate_architecture`] when callers have no opinion.
pub const DEFAULT_ARCHITECTURE_RATE: f64 = 0.05;
/// Per-parameter perturbation probability for [`Blueprint::mutate_weights`].
pub const DEFAULT_WEIGHT_RATE: f64 = 0.1;
const WEIGHT_PERTURBATION_SCALE: f64 = 0.1;

/// How a freshly inserted node is wired into the graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InsertionStrategy {
    /// Every input feeds the new node, the new node feeds every output.
    /// Existing edges are kept.
    #[default]
    BetweenInputsAndOutputs,
    /// As above, but direct input → output edges are removed so all signal
    /// flows through the new node.
    RewireThrough,
    /// One or two random existing nodes feed the new node, which feeds one
    /// random output.
    RandomConnections,
    /// Random fan-in as above, then every output's fan-in is replaced by edges
    /// from the last `last_x` hidden nodes (new node included).
    RandomConnectionsReconnect { last_x: usize },
}

fn random_weight(rng: &mut impl Rng) -> f64 {
    rng.gen_range(-1.0..1.0)
}

fn perturbation(rng: &mut impl Rng) -> f64 {
    rng.sample::<f64, _>(StandardNormal) * WEIGHT_PERTURBATION_SCALE
}

/// Uniform pick from `kinds`, ignoring anything that cannot be inserted.
pub fn random_neuron_type(kinds: &[NeuronType], rng: &mut impl Rng) -> Option<NeuronType> {
    let insertable: Vec<NeuronType> = kinds.iter().copied().filter(|k| k.is_insertable()).collect();
    insertable.choose(rng).copied()
}

impl Blueprint {
    // =========================================================================
    // Node insertion / removal
    // =========================================================================

    /// Insert one node of `neuron_type`, wired per `strategy`. Returns the new id.
    pub fn insert_neuron(
        &mut self,
        neuron_type: NeuronType,
        strategy: InsertionStrategy,
        rng: &mut impl Rng,
    ) -> Result<NodeId> {
        let id = self.next_neuron_id();
        let names = self.activations.insertion_names();
        let mut neuron = Neuron::random(id, neuron_type, &names, rng)?;

        // (output id, source id, weight) edges to add once the node is in place
        let mut output_edges: Vec<(NodeId, NodeId, f64)> = Vec::new();
        let mut rewire_outputs: Vec<NodeId> = Vec::new();

        match strategy {
            InsertionStrategy::BetweenInputsAndOutputs | InsertionStrategy::RewireThrough => {
                for &input in &self.input_nodes {
                    neuron.connections.push(Connection::new(input, random_weight(rng)));
                }
                for &output in &self.output_nodes {
                    output_edges.push((output, id, random_weight(rng)));
                }
            }
            InsertionStrategy::RandomConnections => {
                self.attach_random_sources(&mut neuron, rng);
                if let Some(&output) = self.output_nodes.choose(rng) {
                    output_edges.push((output, id, random_weight(rng)));
                }
            }
            InsertionStrategy::RandomConnectionsReconnect { last_x } => {
                self.attach_random_sources(&mut neuron, rng);
                let mut hidden = self.hidden_neuron_ids();
                hidden.push(id);
                let keep = hidden.len().saturating_sub(last_x);
                let last: Vec<NodeId> = hidden[keep..].to_vec();
                for &output in &self.output_nodes {
                    rewire_outputs.push(output);
                    for &source in &last {
                        output_edges.push((output, source, random_weight(rng)));
                    }
                }
            }
        }

        self.finish_new_neuron(&mut neuron, rng);
        tracing::debug!(
            neuron = id,
            kind = %neuron_type,
            fan_in = neuron.connections.len(),
            ?strategy,
            "inserted neuron"
        );
        self.add_neuron(neuron);

        if strategy == InsertionStrategy::RewireThrough {
            let inputs = self.input_nodes.clone();
            for &output in &self.output_nodes.clone() {
                if let Some(target) = self.neurons.get_mut(&output) {
                    target.connections.retain(|c| !inputs.contains(&c.source));
                }
            }
        }
        for output in rewire_outputs {
            if let Some(target) = self.neurons.get_mut(&output) {
                target.connections.clear();
            }
        }
        for (output, source, weight) in output_edges {
            match self.neurons.get_mut(&output) {
                Some(target) => target.connections.push(Connection::new(source, weight)),
                None => tracing::warn!(neuron = output, "output neuron does not exist"),
            }
        }
        Ok(id)
    }

    /// [`insert_neuron`](Self::insert_neuron) with the kind given by name.
    pub fn insert_neuron_by_name(
        &mut self,
        neuron_type: &str,
        strategy: InsertionStrategy,
        rng: &mut impl Rng,
    ) -> Result<NodeId> {
        let parsed: NeuronType = neuron_type.parse()?;
        self.insert_neuron(parsed, strategy, rng)
    }

    fn attach_random_sources(&self, neuron: &mut Neuron, rng: &mut impl Rng) {
        let mut candidates = self.neuron_ids();
        candidates.shuffle(rng);
        let count = rng.gen_range(1..=2usize);
        for &source in candidates.iter().take(count) {
            neuron.connections.push(Connection::new(source, random_weight(rng)));
        }
    }

    /// Kind-dependent state that depends on the node's final wiring.
    fn finish_new_neuron(&self, neuron: &mut Neuron, rng: &mut impl Rng) {
        let fan_in = neuron.connections.len();
        let id = neuron.id;
        match &mut neuron.kind {
            NeuronKind::Lstm { gate_weights, .. } => {
                if fan_in == 0 {
                    tracing::warn!(neuron = id, "LSTM neuron has no connections, gate weights left empty");
                } else {
                    *gate_weights = GateWeights::random(fan_in, rng);
                }
            }
            NeuronKind::Nca { neighbors, .. } => {
                *neighbors = self.input_nodes.clone();
            }
            NeuronKind::BatchNorm { params } => {
                *params = Default::default();
            }
            _ => {}
        }
    }

    /// Delete a hidden node and every edge (and NCA neighbour entry) that names it.
    pub fn remove_neuron(&mut self, id: NodeId) -> Result<()> {
        if self.is_input_node(id) || self.is_output_node(id) {
            return Err(BlueprintError::ProtectedNeuron(id));
        }
        if self.neurons.remove(&id).is_none() {
            return Err(BlueprintError::MissingNeuron(id));
        }
        for neuron in self.neurons.values_mut() {
            neuron.connections.retain(|c| c.source != id);
            if let NeuronKind::Nca { neighbors, .. } = &mut neuron.kind {
                neighbors.retain(|&n| n != id);
            }
        }
        tracing::debug!(neuron = id, "removed neuron");
        Ok(())
    }

    // =========================================================================
    // Connection edits
    // =========================================================================

    /// Append `source → target`. Both endpoints must exist.
    pub fn add_connection(&mut self, source: NodeId, target: NodeId, weight: f64) -> Result<()> {
        self.require(source)?;
        let neuron = self
            .neurons
            .get_mut(&target)
            .ok_or(BlueprintError::MissingNeuron(target))?;
        neuron.connections.push(Connection::new(source, weight));
        Ok(())
    }

    /// Drop every `source → target` edge. Absent edges and nodes are a no-op.
    pub fn remove_connection(&mut self, source: NodeId, target: NodeId) {
        if let Some(neuron) = self.neurons.get_mut(&target) {
            neuron.connections.retain(|c| c.source != source);
        }
    }

    /// Replace the `source → target` edge by a single edge with `weight`.
    pub fn reweight_connection(&mut self, source: NodeId, target: NodeId, weight: f64) -> Result<()> {
        self.require(target)?;
        if !self.connection_exists(source, target) {
            return Err(BlueprintError::MissingConnection { source_id: source, target_id: target });
        }
        self.remove_connection(source, target);
        self.add_connection(source, target, weight)
    }

    /// Swap the activation name of a hidden node. Inputs and outputs are refused.
    pub fn modify_activation(&mut self, id: NodeId, activation: &str) -> Result<()> {
        if self.is_input_node(id) || self.is_output_node(id) {
            return Err(BlueprintError::ProtectedNeuron(id));
        }
        if !self.activations.contains(activation) {
            tracing::warn!(neuron = id, activation, "activation not registered, will act as linear");
        }
        let neuron = self.neurons.get_mut(&id).ok_or(BlueprintError::MissingNeuron(id))?;
        neuron.activation = activation.to_string();
        Ok(())
    }

    // =========================================================================
    // Whole-graph parameter mutation
    // =========================================================================

    /// Replace every bias, weight, and gate weight of non-input nodes with U(-1, 1).
    pub fn randomize_weights(&mut self, rng: &mut impl Rng) {
        for id in self.neuron_ids() {
            let Some(neuron) = self.neurons.get_mut(&id) else { continue };
            if neuron.is_input() {
                continue;
            }
            neuron.bias = random_weight(rng);
            for connection in &mut neuron.connections {
                connection.weight = random_weight(rng);
            }
            if let NeuronKind::Lstm { gate_weights, .. } = &mut neuron.kind {
                for gate in gate_weights.gates_mut() {
                    for w in gate.iter_mut() {
                        *w = random_weight(rng);
                    }
                }
            }
        }
    }

    /// Perturb each parameter of non-input nodes with probability `rate` by N(0,1)·0.1.
    pub fn mutate_weights(&mut self, rate: f64, rng: &mut impl Rng) {
        for id in self.neuron_ids() {
            let Some(neuron) = self.neurons.get_mut(&id) else { continue };
            if neuron.is_input() {
                continue;
            }
            if rng.gen::<f64>() < rate {
                neuron.bias += perturbation(rng);
            }
            for connection in &mut neuron.connections {
                if rng.gen::<f64>() < rate {
                    connection.weight += perturbation(rng);
                }
            }
            if let NeuronKind::Lstm { gate_weights, .. } = &mut neuron.kind {
                for gate in gate_weights.gates_mut() {
                    for w in gate.iter_mut() {
                        if rng.gen::<f64>() < rate {
                            *w += perturbation(rng);
                        }
                    }
                }
            }
        }
    }

    /// With probability `rate` insert a random kind between inputs and outputs;
    /// independently with probability `rate` remove a random hidden node.
    /// Returns the number of structural changes made.
    pub fn mutate_architecture(
        &mut self,
        rate: f64,
        kinds: &[NeuronType],
        rng: &mut impl Rng,
    ) -> Result<usize> {
        let mut changes = 0;
        if rng.gen::<f64>() < rate {
            if let Some(kind) = random_neuron_type(kinds, rng) {
                self.insert_neuron(kind, InsertionStrategy::BetweenInputsAndOutputs, rng)?;
                changes += 1;
            }
        }
        if rng.gen::<f64>() < rate {
            if let Some(id) = self.random_hidden_neuron(rng) {
                self.remove_neuron(id)?;
                changes += 1;
            }
        }
        Ok(changes)
    }

    /// Insert one node of every insertable kind. Returns the new ids in insertion order.
    pub fn mutate_network(&mut self, rng: &mut impl Rng) -> Result<Vec<NodeId>> {
        NeuronType::INSERTABLE
            .iter()
            .map(|&kind| self.insert_neuron(kind, InsertionStrategy::BetweenInputsAndOutputs, rng))
            .collect()
    }

    // =========================================================================
    // Recombination
    // =========================================================================

    /// Child = clone of `self`; each node is swapped for `other`'s node with the
    /// same id with probability 0.5. Swapped nodes are deep copies.
    pub fn crossover(&self, other: &Blueprint, rng: &mut impl Rng) -> Blueprint {
        let mut child = self.clone();
        for id in child.neuron_ids() {
            if rng.gen_bool(0.5) {
                if let Some(donor) = other.neurons.get(&id) {
                    child.neurons.insert(id, donor.clone());
                }
            }
        }
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::tests::small_graph;
    use crate::neuron::NcaRule;

    /// Inputs 1, 2 wired straight into output 3.
    fn direct_graph() -> Blueprint {
        let mut bp = Blueprint::new();
        bp.add_neuron(Neuron::input(1));
        bp.add_neuron(Neuron::input(2));
        bp.add_neuron(Neuron::dense(
            3,
            0.0,
            "linear",
            vec![Connection::new(1, 0.5), Connection::new(2, 0.5)],
        ));
        bp.add_input_nodes(&[1, 2]);
        bp.add_output_nodes(&[3]);
        bp
    }

    #[test]
    fn test_insert_between_keeps_outputs_reachable() {
        let mut rng = StdRng::seed_from_u64(42);
        for kind in NeuronType::INSERTABLE {
            let mut bp = direct_graph();
            bp.neuron_mut(3).unwrap().connections.clear();
            let id = bp
                .insert_neuron(kind, InsertionStrategy::BetweenInputsAndOutputs, &mut rng)
                .unwrap();
            assert_eq!(id, 4);
            assert_eq!(bp.neuron(4).unwrap().neuron_type(), kind);
            assert_eq!(bp.neuron(4).unwrap().connections.len(), 2);
            assert!(bp.connection_exists(4, 3));
            assert!(bp.validate_connections(), "{} insert broke reachability", kind);
        }
    }

    #[test]
    fn test_rewire_through_removes_direct_edges() {
        let mut bp = direct_graph();
        let mut rng = StdRng::seed_from_u64(1);
        let id = bp
            .insert_neuron(NeuronType::Dense, InsertionStrategy::RewireThrough, &mut rng)
            .unwrap();
        let output = bp.neuron(3).unwrap();
        assert_eq!(output.connections.len(), 1);
        assert_eq!(output.connections[0].source, id);
        assert!(bp.validate_connections());
    }

    #[test]
    fn test_random_connections_fan_in() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..10 {
            let mut bp = direct_graph();
            let id = bp
                .insert_neuron(NeuronType::Rnn, InsertionStrategy::RandomConnections, &mut rng)
                .unwrap();
            let fan_in = bp.neuron(id).unwrap().connections.len();
            assert!((1..=2).contains(&fan_in));
            assert!(bp.connection_exists(id, 3));
            assert_eq!(bp.neuron(3).unwrap().connections.len(), 3);
        }
    }

    #[test]
    fn test_reconnect_replaces_output_fan_in() {
        let mut bp = small_graph();
        let mut rng = StdRng::seed_from_u64(9);
        let id = bp
            .insert_neuron(
                NeuronType::Dense,
                InsertionStrategy::RandomConnectionsReconnect { last_x: 2 },
                &mut rng,
            )
            .unwrap();
        let sources: Vec<NodeId> = bp.neuron(4).unwrap().connections.iter().map(|c| c.source).collect();
        // hidden before insert: [3, 5]; last two after insert: [5, id]
        assert_eq!(sources, vec![5, id]);
    }

    #[test]
    fn test_inserted_activations_never_elu() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut bp = direct_graph();
        for _ in 0..60 {
            let id = bp
                .insert_neuron(NeuronType::Dense, InsertionStrategy::RandomConnections, &mut rng)
                .unwrap();
            let activation = bp.neuron(id).unwrap().activation.as_str();
            assert_ne!(activation, "elu");
            assert!(crate::activation::INSERTION_ACTIVATIONS.contains(&activation));
        }
    }

    #[test]
    fn test_lstm_gates_sized_to_fan_in() {
        let mut bp = direct_graph();
        let mut rng = StdRng::seed_from_u64(2);
        let id = bp
            .insert_neuron(NeuronType::Lstm, InsertionStrategy::BetweenInputsAndOutputs, &mut rng)
            .unwrap();
        match &bp.neuron(id).unwrap().kind {
            NeuronKind::Lstm { gate_weights, .. } => {
                assert_eq!(gate_weights.input.len(), 2);
                assert_eq!(gate_weights.forget.len(), 2);
                assert_eq!(gate_weights.output.len(), 2);
                assert_eq!(gate_weights.cell.len(), 2);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_lstm_with_zero_fan_in_keeps_empty_gates() {
        let mut bp = Blueprint::new();
        bp.add_neuron(Neuron::dense(1, 0.0, "linear", Vec::new()));
        bp.add_output_nodes(&[1]);
        let mut rng = StdRng::seed_from_u64(2);
        let id = bp
            .insert_neuron(NeuronType::Lstm, InsertionStrategy::BetweenInputsAndOutputs, &mut rng)
            .unwrap();
        match &bp.neuron(id).unwrap().kind {
            NeuronKind::Lstm { gate_weights, .. } => assert!(gate_weights.is_empty()),
            other => panic!("unexpected kind {:?}", other),
        }
        let sessions = [crate::eval::Session {
            expected_outputs: [(1, 1.0)].into_iter().collect(),
            timesteps: 3,
            ..Default::default()
        }];
        let result = bp.evaluate(&sessions, 0.1, &mut rng);
        assert!(result.generous_accuracy.is_finite());
    }

    #[test]
    fn test_nca_neighbors_are_inputs() {
        let mut bp = direct_graph();
        let mut rng = StdRng::seed_from_u64(3);
        let id = bp
            .insert_neuron(NeuronType::Nca, InsertionStrategy::BetweenInputsAndOutputs, &mut rng)
            .unwrap();
        match &bp.neuron(id).unwrap().kind {
            NeuronKind::Nca { neighbors, update_rule, .. } => {
                assert_eq!(neighbors, &vec![1, 2]);
                assert_eq!(*update_rule, NcaRule::Sum);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_leaves_graph_unchanged() {
        let mut bp = direct_graph();
        let before = bp.clone();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            bp.insert_neuron_by_name("transformer", InsertionStrategy::default(), &mut rng),
            Err(BlueprintError::UnknownNeuronType(_))
        ));
        assert!(matches!(
            bp.insert_neuron(NeuronType::Input, InsertionStrategy::default(), &mut rng),
            Err(BlueprintError::InvalidNeuronType(_))
        ));
        assert_eq!(bp, before);
    }

    #[test]
    fn test_remove_neuron_strips_edges() {
        let mut bp = small_graph();
        bp.neuron_mut(4).unwrap().connections.push(Connection::new(5, 1.0));
        bp.remove_neuron(5).unwrap();
        assert!(bp.neuron(5).is_none());
        assert!(!bp.connection_exists(5, 4));
        assert!(matches!(bp.remove_neuron(1), Err(BlueprintError::ProtectedNeuron(1))));
        assert!(matches!(bp.remove_neuron(4), Err(BlueprintError::ProtectedNeuron(4))));
        assert!(matches!(bp.remove_neuron(50), Err(BlueprintError::MissingNeuron(50))));
    }

    #[test]
    fn test_connection_edits() {
        let mut bp = small_graph();
        assert!(matches!(bp.add_connection(1, 99, 1.0), Err(BlueprintError::MissingNeuron(99))));

        let before = bp.clone();
        bp.remove_connection(2, 4);
        bp.remove_connection(1, 77);
        assert_eq!(bp, before);

        bp.reweight_connection(1, 3, 0.9).unwrap();
        assert_eq!(bp.connection_weight(1, 3), 0.9);
        assert_eq!(bp.neuron(3).unwrap().connections.iter().filter(|c| c.source == 1).count(), 1);
        assert!(matches!(
            bp.reweight_connection(4, 3, 0.1),
            Err(BlueprintError::MissingConnection { source_id: 4, target_id: 3 })
        ));
    }

    #[test]
    fn test_modify_activation() {
        let mut bp = small_graph();
        bp.modify_activation(3, "tanh").unwrap();
        assert_eq!(bp.neuron(3).unwrap().activation, "tanh");
        assert!(matches!(bp.modify_activation(1, "tanh"), Err(BlueprintError::ProtectedNeuron(1))));
        let before = bp.clone();
        assert!(matches!(bp.modify_activation(4, "tanh"), Err(BlueprintError::ProtectedNeuron(4))));
        assert_eq!(bp, before);
        assert!(matches!(bp.modify_activation(42, "tanh"), Err(BlueprintError::MissingNeuron(42))));
    }

    #[test]
    fn test_mutate_weights_rates() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut bp = small_graph();
        bp.mutate_weights(0.0, &mut rng);
        assert_eq!(bp, small_graph());

        bp.mutate_weights(1.0, &mut rng);
        assert_ne!(bp.neuron(3).unwrap().connections[0].weight, 0.5);
        assert_ne!(bp.neuron(3).unwrap().bias, 0.1);
        // inputs never change
        assert_eq!(bp.neuron(1), small_graph().neuron(1));
    }

    #[test]
    fn test_randomize_weights_in_range() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut bp = small_graph();
        bp.randomize_weights(&mut rng);
        for neuron in bp.neurons.values() {
            assert!((-1.0..1.0).contains(&neuron.bias) || neuron.is_input());
            for c in &neuron.connections {
                assert!((-1.0..1.0).contains(&c.weight));
            }
        }
        assert_eq!(bp.neuron_ids(), small_graph().neuron_ids());
    }

    #[test]
    fn test_mutate_architecture_certain_rate() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut bp = direct_graph();
        let changes = bp.mutate_architecture(1.0, &[NeuronType::Dense], &mut rng).unwrap();
        // insert then remove the only hidden node
        assert_eq!(changes, 2);
        assert_eq!(bp.len(), 3);
        assert_eq!(bp.mutate_architecture(0.0, &NeuronType::INSERTABLE, &mut rng).unwrap(), 0);
    }

    #[test]
    fn test_mutate_network_inserts_every_kind() {
        let mut bp = direct_graph();
        let mut rng = StdRng::seed_from_u64(6);
        let ids = bp.mutate_network(&mut rng).unwrap();
        assert_eq!(ids.len(), NeuronType::INSERTABLE.len());
        assert!(bp.validate_connections());
    }

    #[test]
    fn test_crossover_copies_nodes() {
        let mut rng = StdRng::seed_from_u64(10);
        let a = small_graph();
        let mut b = small_graph();
        for neuron in b.neurons.values_mut() {
            neuron.bias = 7.0;
        }
        let child = a.crossover(&b, &mut rng);
        assert_eq!(child.neuron_ids(), a.neuron_ids());
        for id in child.neuron_ids() {
            let bias = child.neuron(id).unwrap().bias;
            assert!(bias == 7.0 || bias == a.neuron(id).unwrap().bias);
        }
        assert_eq!(a, small_graph());
    }
}
