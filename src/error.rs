//! Error types for graph construction, mutation, and (de)serialization.

use thiserror::Error;

use crate::neuron::NodeId;

/// Errors raised by structural operations on a [`Blueprint`](crate::Blueprint).
///
/// Every variant is local to a single operation: the graph is left as it was
/// before the call and search loops simply drop the offending candidate.
#[derive(Error, Debug)]
pub enum BlueprintError {
    #[error("unknown neuron type: {0}")]
    UnknownNeuronType(String),
    #[error("neuron type '{0}' cannot be inserted")]
    InvalidNeuronType(String),
    #[error("neuron {0} does not exist")]
    MissingNeuron(NodeId),
    #[error("no connection from neuron {source_id} into neuron {target_id}")]
    MissingConnection { source_id: NodeId, target_id: NodeId },
    #[error("neuron {0} is an input or output node")]
    ProtectedNeuron(NodeId),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no sessions to evaluate")]
    EmptySessions,
    #[error("worker pool could not start: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, BlueprintError>;
