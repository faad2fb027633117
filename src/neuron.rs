//! Neuron records: one struct for the shared scalar state, one tagged enum for
//! the kind-specific payload.

use rand::prelude::*;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BlueprintError;

/// Node identifier, unique within one graph.
pub type NodeId = u32;

/// One fan-in edge: the value of `source` scaled by `weight`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub source: NodeId,
    pub weight: f64,
}

impl Connection {
    pub fn new(source: NodeId, weight: f64) -> Self {
        Self { source, weight }
    }
}

// =============================================================================
// Neuron type tag
// =============================================================================

/// Kind tag used when asking for a new node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeuronType {
    Input,
    Dense,
    Rnn,
    Lstm,
    Cnn,
    Dropout,
    BatchNorm,
    Attention,
    Nca,
}

impl NeuronType {
    /// Every kind a mutation may insert (inputs are only created by graph construction).
    pub const INSERTABLE: [NeuronType; 8] = [
        NeuronType::Dense,
        NeuronType::Rnn,
        NeuronType::Lstm,
        NeuronType::Cnn,
        NeuronType::Dropout,
        NeuronType::BatchNorm,
        NeuronType::Attention,
        NeuronType::Nca,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NeuronType::Input => "input",
            NeuronType::Dense => "dense",
            NeuronType::Rnn => "rnn",
            NeuronType::Lstm => "lstm",
            NeuronType::Cnn => "cnn",
            NeuronType::Dropout => "dropout",
            NeuronType::BatchNorm => "batch_norm",
            NeuronType::Attention => "attention",
            NeuronType::Nca => "nca",
        }
    }

    pub fn is_insertable(&self) -> bool {
        *self != NeuronType::Input
    }
}

impl fmt::Display for NeuronType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NeuronType {
    type Err = BlueprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "input" => Ok(NeuronType::Input),
            "dense" => Ok(NeuronType::Dense),
            "rnn" => Ok(NeuronType::Rnn),
            "lstm" => Ok(NeuronType::Lstm),
            "cnn" => Ok(NeuronType::Cnn),
            "dropout" => Ok(NeuronType::Dropout),
            "batch_norm" => Ok(NeuronType::BatchNorm),
            "attention" => Ok(NeuronType::Attention),
            "nca" => Ok(NeuronType::Nca),
            other => Err(BlueprintError::UnknownNeuronType(other.to_string())),
        }
    }
}

// =============================================================================
// Kind-specific payloads
// =============================================================================

/// Per-gate weight vectors of an LSTM node, each sized to the node's fan-in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GateWeights {
    pub input: Vec<f64>,
    pub forget: Vec<f64>,
    pub output: Vec<f64>,
    pub cell: Vec<f64>,
}

impl GateWeights {
    /// Normal(0, 0.5) weights for all four gates.
    pub fn random(size: usize, rng: &mut impl Rng) -> Self {
        let mut draw = || -> Vec<f64> {
            (0..size)
                .map(|_| rng.sample::<f64, _>(StandardNormal) * 0.5)
                .collect()
        };
        Self {
            input: draw(),
            forget: draw(),
            output: draw(),
            cell: draw(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
            && self.forget.is_empty()
            && self.output.is_empty()
            && self.cell.is_empty()
    }

    pub fn gates_mut(&mut self) -> [&mut Vec<f64>; 4] {
        [&mut self.input, &mut self.forget, &mut self.output, &mut self.cell]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchNormParams {
    pub gamma: f64,
    pub beta: f64,
    pub mean: f64,
    pub variance: f64,
}

impl Default for BatchNormParams {
    fn default() -> Self {
        Self { gamma: 1.0, beta: 0.0, mean: 0.0, variance: 1.0 }
    }
}

/// How an NCA node combines its neighbourhood.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NcaRule {
    #[default]
    Sum,
    Average,
}

pub const DEFAULT_CNN_KERNELS: [[f64; 2]; 2] = [[0.2, 0.5], [0.3, 0.4]];
pub const DEFAULT_DROPOUT_RATE: f64 = 0.5;
const NCA_STATE_LEN: usize = 10;

/// Kind tag plus the state only that kind uses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NeuronKind {
    Input,
    Dense,
    Rnn,
    Lstm {
        #[serde(default)]
        gate_weights: GateWeights,
        #[serde(default)]
        cell_state: f64,
    },
    Cnn {
        kernels: Vec<Vec<f64>>,
    },
    Dropout {
        rate: f64,
    },
    BatchNorm {
        #[serde(default)]
        params: BatchNormParams,
    },
    Attention {
        #[serde(default)]
        weights: Vec<f64>,
        #[serde(default)]
        enabled: bool,
    },
    Nca {
        #[serde(default)]
        neighbors: Vec<NodeId>,
        #[serde(default)]
        update_rule: NcaRule,
        #[serde(default)]
        state: Vec<f64>,
    },
}

impl NeuronKind {
    /// Default payload for a freshly created node. LSTM gate weights stay empty
    /// until the node's fan-in is known.
    pub fn default_for(neuron_type: NeuronType, rng: &mut impl Rng) -> Self {
        match neuron_type {
            NeuronType::Input => NeuronKind::Input,
            NeuronType::Dense => NeuronKind::Dense,
            NeuronType::Rnn => NeuronKind::Rnn,
            NeuronType::Lstm => NeuronKind::Lstm {
                gate_weights: GateWeights::default(),
                cell_state: 0.0,
            },
            NeuronType::Cnn => NeuronKind::Cnn {
                kernels: DEFAULT_CNN_KERNELS.iter().map(|k| k.to_vec()).collect(),
            },
            NeuronType::Dropout => NeuronKind::Dropout { rate: DEFAULT_DROPOUT_RATE },
            NeuronType::BatchNorm => NeuronKind::BatchNorm {
                params: BatchNormParams::default(),
            },
            NeuronType::Attention => NeuronKind::Attention {
                weights: Vec::new(),
                enabled: true,
            },
            NeuronType::Nca => NeuronKind::Nca {
                neighbors: Vec::new(),
                update_rule: NcaRule::Sum,
                state: (0..NCA_STATE_LEN).map(|_| rng.gen_range(-1.0..1.0)).collect(),
            },
        }
    }

    pub fn neuron_type(&self) -> NeuronType {
        match self {
            NeuronKind::Input => NeuronType::Input,
            NeuronKind::Dense => NeuronType::Dense,
            NeuronKind::Rnn => NeuronType::Rnn,
            NeuronKind::Lstm { .. } => NeuronType::Lstm,
            NeuronKind::Cnn { .. } => NeuronType::Cnn,
            NeuronKind::Dropout { .. } => NeuronType::Dropout,
            NeuronKind::BatchNorm { .. } => NeuronType::BatchNorm,
            NeuronKind::Attention { .. } => NeuronType::Attention,
            NeuronKind::Nca { .. } => NeuronType::Nca,
        }
    }
}

// =============================================================================
// Neuron
// =============================================================================

/// A single computational unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neuron {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: NeuronKind,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub bias: f64,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default = "default_activation")]
    pub activation: String,
    #[serde(default)]
    pub loop_count: u32,
    #[serde(default)]
    pub window_size: u32,
}

fn default_activation() -> String {
    crate::activation::LINEAR.to_string()
}

impl Neuron {
    pub fn new(id: NodeId, kind: NeuronKind) -> Self {
        Self {
            id,
            kind,
            value: 0.0,
            bias: 0.0,
            connections: Vec::new(),
            activation: default_activation(),
            loop_count: 0,
            window_size: 0,
        }
    }

    pub fn input(id: NodeId) -> Self {
        Self::new(id, NeuronKind::Input)
    }

    pub fn dense(id: NodeId, bias: f64, activation: &str, connections: Vec<Connection>) -> Self {
        Self {
            bias,
            connections,
            activation: activation.to_string(),
            ..Self::new(id, NeuronKind::Dense)
        }
    }

    /// A node as a mutation creates it: random value and bias in [-1, 1) and an
    /// activation drawn from `activations`. Dropout nodes keep linear.
    pub fn random(
        id: NodeId,
        neuron_type: NeuronType,
        activations: &[&str],
        rng: &mut impl Rng,
    ) -> Result<Self, BlueprintError> {
        if !neuron_type.is_insertable() {
            return Err(BlueprintError::InvalidNeuronType(neuron_type.to_string()));
        }
        let mut neuron = Self::new(id, NeuronKind::default_for(neuron_type, rng));
        neuron.value = rng.gen_range(-1.0..1.0);
        neuron.bias = rng.gen_range(-1.0..1.0);
        if neuron_type != NeuronType::Dropout {
            if let Some(name) = activations.choose(rng) {
                neuron.activation = name.to_string();
            }
        }
        Ok(neuron)
    }

    pub fn neuron_type(&self) -> NeuronType {
        self.kind.neuron_type()
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, NeuronKind::Input)
    }

    pub fn has_connection_from(&self, source: NodeId) -> bool {
        self.connections.iter().any(|c| c.source == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neuron_type_parse() {
        assert_eq!("batch_norm".parse::<NeuronType>().unwrap(), NeuronType::BatchNorm);
        assert_eq!(" LSTM ".parse::<NeuronType>().unwrap(), NeuronType::Lstm);
        assert!(matches!(
            "quantum".parse::<NeuronType>(),
            Err(BlueprintError::UnknownNeuronType(_))
        ));
        for ty in NeuronType::INSERTABLE {
            assert_eq!(ty.as_str().parse::<NeuronType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_default_payloads() {
        let mut rng = StdRng::seed_from_u64(7);
        match NeuronKind::default_for(NeuronType::Lstm, &mut rng) {
            NeuronKind::Lstm { gate_weights, cell_state } => {
                assert!(gate_weights.is_empty());
                assert_eq!(cell_state, 0.0);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        match NeuronKind::default_for(NeuronType::Nca, &mut rng) {
            NeuronKind::Nca { neighbors, update_rule, state } => {
                assert!(neighbors.is_empty());
                assert_eq!(update_rule, NcaRule::Sum);
                assert_eq!(state.len(), NCA_STATE_LEN);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_random_rejects_input() {
        let mut rng = StdRng::seed_from_u64(1);
        let result = Neuron::random(5, NeuronType::Input, &["relu"], &mut rng);
        assert!(matches!(result, Err(BlueprintError::InvalidNeuronType(_))));
    }

    #[test]
    fn test_gate_weights_random_size() {
        let mut rng = StdRng::seed_from_u64(3);
        let gates = GateWeights::random(4, &mut rng);
        assert_eq!(gates.input.len(), 4);
        assert_eq!(gates.cell.len(), 4);
        assert!(!gates.is_empty());
    }

    #[test]
    fn test_serde_tagged_round_trip() {
        let neuron = Neuron::new(9, NeuronKind::Dropout { rate: 0.25 });
        let json = serde_json::to_string(&neuron).unwrap();
        assert!(json.contains("\"type\":\"dropout\""));
        let back: Neuron = serde_json::from_str(&json).unwrap();
        assert_eq!(back, neuron);
    }
}
