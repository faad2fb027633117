//! Settings shared by every search loop, with environment overrides.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

use crate::eval::DEFAULT_FORGIVENESS_THRESHOLD;
use crate::neuron::NeuronType;

/// Run-wide search settings.
#[derive(Clone, Debug)]
pub struct SearchConfig {
    /// Fixed seed for a reproducible run; `None` draws from entropy.
    pub seed: Option<u64>,
    /// Parallel candidates per round.
    pub workers: usize,
    /// Relative tolerance for forgiveness accuracy.
    pub forgiveness: f64,
    /// Progress lines are appended here when set.
    pub log_path: Option<PathBuf>,
    /// Kinds that insertion mutations may sample.
    pub neuron_types: Vec<NeuronType>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            seed: None,
            workers: rayon::current_num_threads().max(1),
            forgiveness: DEFAULT_FORGIVENESS_THRESHOLD,
            log_path: None,
            neuron_types: NeuronType::INSERTABLE.to_vec(),
        }
    }
}

impl SearchConfig {
    /// Defaults overlaid with `BLUEPRINT_*` environment variables. A value
    /// that does not parse leaves the default in place.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(seed) = lookup("BLUEPRINT_SEED").and_then(|v| v.trim().parse().ok()) {
            config.seed = Some(seed);
        }
        config.workers = lookup("BLUEPRINT_WORKERS")
            .and_then(|v| v.trim().parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(config.workers);
        config.forgiveness = lookup("BLUEPRINT_FORGIVENESS")
            .and_then(|v| v.trim().parse().ok())
            .filter(|t: &f64| t.is_finite() && *t >= 0.0)
            .unwrap_or(config.forgiveness);
        if let Some(path) = lookup("BLUEPRINT_LOG_PATH").filter(|v| !v.trim().is_empty()) {
            config.log_path = Some(PathBuf::from(path));
        }
        if let Some(list) = lookup("BLUEPRINT_NEURON_TYPES") {
            let parsed = parse_neuron_types(&list);
            if !parsed.is_empty() {
                config.neuron_types = parsed;
            }
        }
        config
    }

    /// A fresh generator for one run.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// Comma-separated kind names; unknown and non-insertable entries are skipped.
pub fn parse_neuron_types(list: &str) -> Vec<NeuronType> {
    let mut kinds = Vec::new();
    for item in list.split(',').filter(|s| !s.trim().is_empty()) {
        match item.parse::<NeuronType>() {
            Ok(kind) if kind.is_insertable() => {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
            Ok(kind) => tracing::warn!(%kind, "neuron type cannot be inserted, skipped"),
            Err(e) => tracing::warn!(error = %e, "skipping neuron type"),
        }
    }
    kinds
}
