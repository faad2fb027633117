//! Blueprint NAS - heterogeneous neuron graphs trained without gradients
//!
//! A [`Blueprint`] is a directed graph of neurons of different kinds (dense,
//! LSTM, CNN, NCA, batch-norm, dropout, ...). Networks are scored on labelled
//! sessions by exact, generous and forgiveness accuracy, and improved by
//! search loops that mutate clones and keep what scores better:
//!
//! - [`hill_climb`]: single-weight nudges
//! - [`run_nas`] / [`run_parallel_nas`]: neuron insertion
//! - [`run_evolution`]: population with crossover
//! - [`learn_one_item_at_a_time`]: batched multi-operator local search
//! - [`targeted_micro_refinement`]: output weights on near-miss sessions
//! - [`try_add_connections`]: parallel search for one helpful edge

pub mod acceptance;
pub mod activation;
pub mod blueprint;
pub mod config;
pub mod connection_search;
pub mod error;
pub mod eval;
pub mod evolution;
pub mod forward;
pub mod hill_climb;
pub mod item_learning;
pub mod mutation;
pub mod nas;
pub mod neuron;
pub mod pool;
pub mod progress;
pub mod refinement;
pub mod report;

pub use acceptance::{AcceptancePolicy, Metric};
pub use activation::ActivationRegistry;
pub use blueprint::Blueprint;
pub use config::SearchConfig;
pub use connection_search::{try_add_connections, ConnectionSearchConfig};
pub use error::{BlueprintError, Result};
pub use eval::{EvaluationResult, MetricTuple, Session};
pub use evolution::{run_evolution, EvolutionConfig};
pub use hill_climb::{hill_climb, HillClimbConfig};
pub use item_learning::{learn_one_item_at_a_time, ItemLearningConfig, Modification};
pub use mutation::InsertionStrategy;
pub use nas::{run_nas, run_parallel_nas, NasConfig};
pub use neuron::{Connection, Neuron, NeuronKind, NeuronType, NodeId};
pub use refinement::{targeted_micro_refinement, RefinementConfig};
pub use report::{SearchKind, SearchReport, StopReason};
