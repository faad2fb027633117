//! The network graph: node table, input/output id lists, and the shared
//! activation registry.

use rand::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::activation::ActivationRegistry;
use crate::error::{BlueprintError, Result};
use crate::neuron::{Connection, Neuron, NodeId};

/// A complete network configuration.
///
/// `Clone` is a structural deep copy: every node, connection list, and weight
/// vector is freshly allocated. Only the immutable activation registry is
/// shared, so a clone can be mutated on another thread without touching the
/// original.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Blueprint {
    pub neurons: FxHashMap<NodeId, Neuron>,
    #[serde(default)]
    pub input_nodes: Vec<NodeId>,
    #[serde(default)]
    pub output_nodes: Vec<NodeId>,
    #[serde(skip, default = "ActivationRegistry::shared_default")]
    pub activations: Arc<ActivationRegistry>,
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Blueprint {
    fn eq(&self, other: &Self) -> bool {
        self.neurons == other.neurons
            && self.input_nodes == other.input_nodes
            && self.output_nodes == other.output_nodes
    }
}

impl Blueprint {
    pub fn new() -> Self {
        Self::with_registry(ActivationRegistry::shared_default())
    }

    pub fn with_registry(activations: Arc<ActivationRegistry>) -> Self {
        Self {
            neurons: FxHashMap::default(),
            input_nodes: Vec::new(),
            output_nodes: Vec::new(),
            activations,
        }
    }

    /// Insert (or replace) a node under its own id.
    pub fn add_neuron(&mut self, neuron: Neuron) {
        self.neurons.insert(neuron.id, neuron);
    }

    pub fn add_input_nodes(&mut self, ids: &[NodeId]) {
        self.input_nodes.extend_from_slice(ids);
    }

    pub fn add_output_nodes(&mut self, ids: &[NodeId]) {
        self.output_nodes.extend_from_slice(ids);
    }

    pub fn neuron(&self, id: NodeId) -> Option<&Neuron> {
        self.neurons.get(&id)
    }

    pub fn neuron_mut(&mut self, id: NodeId) -> Option<&mut Neuron> {
        self.neurons.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    pub fn is_input_node(&self, id: NodeId) -> bool {
        self.input_nodes.contains(&id)
    }

    pub fn is_output_node(&self, id: NodeId) -> bool {
        self.output_nodes.contains(&id)
    }

    /// All node ids in ascending order.
    pub fn neuron_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.neurons.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of nodes that are neither inputs nor outputs, ascending.
    pub fn hidden_neuron_ids(&self) -> Vec<NodeId> {
        self.neuron_ids()
            .into_iter()
            .filter(|&id| !self.is_input_node(id) && !self.is_output_node(id))
            .collect()
    }

    /// Fresh id: one past the largest existing id (1 for an empty graph).
    pub fn next_neuron_id(&self) -> NodeId {
        self.neurons.keys().copied().max().unwrap_or(0) + 1
    }

    pub fn connection_count(&self) -> usize {
        self.neurons.values().map(|n| n.connections.len()).sum()
    }

    // =========================================================================
    // Connection queries
    // =========================================================================

    /// Does `target` already have a fan-in edge from `source`?
    pub fn connection_exists(&self, source: NodeId, target: NodeId) -> bool {
        self.neurons
            .get(&target)
            .map(|n| n.has_connection_from(source))
            .unwrap_or(false)
    }

    /// Weight of the first `source → target` edge, or 0.0 if there is none.
    pub fn connection_weight(&self, source: NodeId, target: NodeId) -> f64 {
        self.neurons
            .get(&target)
            .and_then(|n| n.connections.iter().find(|c| c.source == source))
            .map(|c| c.weight)
            .unwrap_or(0.0)
    }

    /// A random `(source, target)` pair with no existing edge. Targets are
    /// never input nodes. Returns `None` when the graph is saturated.
    pub fn random_connection_pair(&self, rng: &mut impl Rng) -> Option<(NodeId, NodeId)> {
        let mut ids = self.neuron_ids();
        if ids.len() < 2 {
            return None;
        }
        ids.shuffle(rng);
        for &source in &ids {
            for &target in &ids {
                if source == target || self.is_input_node(target) {
                    continue;
                }
                if !self.connection_exists(source, target) {
                    return Some((source, target));
                }
            }
        }
        None
    }

    /// A random existing edge as `(source, target)`.
    pub fn random_existing_connection(&self, rng: &mut impl Rng) -> Option<(NodeId, NodeId)> {
        let edges: Vec<(NodeId, NodeId)> = self
            .neuron_ids()
            .into_iter()
            .flat_map(|target| {
                self.neurons[&target]
                    .connections
                    .iter()
                    .map(move |c| (c.source, target))
            })
            .collect();
        edges.choose(rng).copied()
    }

    pub fn random_hidden_neuron(&self, rng: &mut impl Rng) -> Option<NodeId> {
        self.hidden_neuron_ids().choose(rng).copied()
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Every output must reach at least one input by walking fan-in edges
    /// backwards. Missing outputs and dangling sources count as unreachable.
    pub fn validate_connections(&self) -> bool {
        let inputs: FxHashSet<NodeId> = self.input_nodes.iter().copied().collect();
        for &output in &self.output_nodes {
            if !self.neurons.contains_key(&output) {
                tracing::warn!(neuron = output, "output neuron does not exist");
                return false;
            }
            let mut visited = FxHashSet::default();
            let mut stack = vec![output];
            let mut reached = false;
            while let Some(id) = stack.pop() {
                if !visited.insert(id) {
                    continue;
                }
                if inputs.contains(&id) {
                    reached = true;
                    break;
                }
                if let Some(neuron) = self.neurons.get(&id) {
                    stack.extend(neuron.connections.iter().map(|c: &Connection| c.source));
                }
            }
            if !reached {
                tracing::warn!(neuron = output, "output neuron is not connected to any input");
                return false;
            }
        }
        true
    }

    /// Source ids referenced by some connection but absent from the node table.
    pub fn dangling_sources(&self) -> Vec<(NodeId, NodeId)> {
        let mut dangling: Vec<(NodeId, NodeId)> = self
            .neurons
            .values()
            .flat_map(|n| {
                n.connections
                    .iter()
                    .filter(|c| !self.neurons.contains_key(&c.source))
                    .map(move |c| (c.source, n.id))
            })
            .collect();
        dangling.sort_unstable();
        dangling
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a graph; the default activation registry is attached.
    pub fn from_json(data: &str) -> Result<Self> {
        let blueprint: Blueprint = serde_json::from_str(data)?;
        for (&key, neuron) in &blueprint.neurons {
            if key != neuron.id {
                tracing::warn!(key, id = neuron.id, "node table key disagrees with neuron id");
            }
        }
        Ok(blueprint)
    }

    /// Isolate a candidate by a text round trip instead of `clone()`. Keeps
    /// this graph's registry.
    pub fn isolate_via_json(&self) -> Result<Self> {
        let mut copy = Self::from_json(&self.to_json()?)?;
        copy.activations = Arc::clone(&self.activations);
        Ok(copy)
    }

    /// Look up a node or fail with a structural error.
    pub(crate) fn require(&self, id: NodeId) -> Result<&Neuron> {
        self.neurons.get(&id).ok_or(BlueprintError::MissingNeuron(id))
    }
}
