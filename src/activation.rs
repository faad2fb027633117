//! Scalar activation functions and the name → function registry.
//!
//! The registry is immutable once built and is shared between a graph and all
//! of its clones through an `Arc`, so workers never copy it.

use rustc_hash::FxHashMap;
use std::sync::{Arc, OnceLock};

/// A pure scalar activation.
pub type ActivationFn = fn(f64) -> f64;

pub const LINEAR: &str = "linear";

/// Activations a freshly created or re-activated node may draw. `elu` stays
/// available by name but is never sampled.
pub const INSERTION_ACTIVATIONS: [&str; 5] = ["relu", "sigmoid", "tanh", "leaky_relu", LINEAR];

pub fn relu(x: f64) -> f64 {
    x.max(0.0)
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn tanh(x: f64) -> f64 {
    x.tanh()
}

pub fn leaky_relu(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        0.01 * x
    }
}

pub fn elu(x: f64) -> f64 {
    if x >= 0.0 {
        x
    } else {
        x.exp() - 1.0
    }
}

pub fn linear(x: f64) -> f64 {
    x
}

/// Numerically stable softmax over a slice. An empty slice yields an empty vector.
pub fn softmax(inputs: &[f64]) -> Vec<f64> {
    if inputs.is_empty() {
        return Vec::new();
    }
    let max = inputs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = inputs.iter().map(|&v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Name → activation lookup.
#[derive(Debug, Clone)]
pub struct ActivationRegistry {
    functions: FxHashMap<String, ActivationFn>,
}

static DEFAULT_REGISTRY: OnceLock<Arc<ActivationRegistry>> = OnceLock::new();

impl ActivationRegistry {
    /// Empty registry; every lookup falls back to linear.
    pub fn empty() -> Self {
        Self { functions: FxHashMap::default() }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("relu", relu);
        registry.register("sigmoid", sigmoid);
        registry.register("tanh", tanh);
        registry.register("leaky_relu", leaky_relu);
        registry.register("elu", elu);
        registry.register(LINEAR, linear);
        registry
    }

    /// Process-wide default registry (built once, then shared).
    pub fn shared_default() -> Arc<ActivationRegistry> {
        DEFAULT_REGISTRY
            .get_or_init(|| Arc::new(Self::with_defaults()))
            .clone()
    }

    pub fn register(&mut self, name: &str, function: ActivationFn) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn get(&self, name: &str) -> Option<ActivationFn> {
        self.functions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names in sorted order, so random picks are reproducible under a seed.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// The [`INSERTION_ACTIVATIONS`] this registry actually provides.
    pub fn insertion_names(&self) -> Vec<&'static str> {
        INSERTION_ACTIVATIONS
            .iter()
            .copied()
            .filter(|name| self.contains(name))
            .collect()
    }

    /// Apply `name` to `value`, falling back to linear for unknown names.
    pub fn apply(&self, name: &str, value: f64) -> f64 {
        match self.get(name) {
            Some(function) => function(value),
            None => {
                tracing::warn!(activation = name, "unknown activation, using linear");
                linear(value)
            }
        }
    }
}

impl Default for ActivationRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
