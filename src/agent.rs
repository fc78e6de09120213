//! # Stage: Tabular Q-Learning Agent
//!
//! ## Responsibility
//!
//! Epsilon-greedy action selection over a sparse, lazily materialised
//! state-action value table, with the standard one-step Q-learning update.
//! Two independent instances exist in hierarchical mode: one choosing the
//! mutation operator, one choosing the template.
//!
//! ## Guarantees
//!
//! - **Lazy**: a state's value vector is created, all zeros, on first read or write
//! - **Deterministic greedy choice**: ties go to the lowest action index
//! - **Monotonic exploration**: epsilon never increases and never drops below
//!   `min_epsilon`
//! - **Infallible**: no operation returns an error or blocks
//!
//! ## NOT Responsible For
//!
//! - Computing rewards (see [`crate::reward`])
//! - Persisting tables across runs

use std::collections::HashMap;
use std::hash::Hash;

use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Hyper-parameters of a Q-learning agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentConfig {
    /// Step size α in `(0, 1]`.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Discount factor γ in `[0, 1]`.
    #[serde(default = "default_discount")]
    pub discount: f64,
    /// Initial exploration probability.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Multiplicative decay applied to epsilon after each update.
    #[serde(default = "default_epsilon_decay")]
    pub epsilon_decay: f64,
    /// Floor for epsilon.
    #[serde(default = "default_min_epsilon")]
    pub min_epsilon: f64,
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_discount() -> f64 {
    0.99
}

fn default_epsilon() -> f64 {
    1.0
}

fn default_epsilon_decay() -> f64 {
    0.997
}

fn default_min_epsilon() -> f64 {
    0.1
}

impl Default for AgentConfig {
    /// # Panics
    ///
    /// This function never panics.
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            discount: default_discount(),
            epsilon: default_epsilon(),
            epsilon_decay: default_epsilon_decay(),
            min_epsilon: default_min_epsilon(),
        }
    }
}

/// Epsilon-greedy tabular Q-learning agent over states of type `K`.
///
/// ## Example
///
/// ```
/// use rand::{rngs::StdRng, SeedableRng};
/// use tokio_rl_fuzzer::{AgentConfig, QLearningAgent};
///
/// let mut agent: QLearningAgent<String> = QLearningAgent::new(3, AgentConfig::default());
/// let mut rng = StdRng::seed_from_u64(0);
/// let state = "GET:/pets:start".to_string();
/// let action = agent.select_action(&state, &mut rng);
/// agent.update(&state, action, 1.0, &state);
/// assert!(agent.epsilon() < 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct QLearningAgent<K> {
    table: HashMap<K, Vec<f64>>,
    n_actions: usize,
    config: AgentConfig,
    epsilon: f64,
}

impl<K: Eq + Hash + Clone> QLearningAgent<K> {
    /// Create an agent over `n_actions` actions with an empty table.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn new(n_actions: usize, config: AgentConfig) -> Self {
        let epsilon = config.epsilon;
        Self {
            table: HashMap::new(),
            n_actions,
            config,
            epsilon,
        }
    }

    /// Choose an action for `state`.
    ///
    /// With probability epsilon a uniformly random action, otherwise the
    /// argmax of the state's values, lowest index on ties. An agent with
    /// zero actions always returns 0.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn select_action<R: Rng + ?Sized>(&mut self, state: &K, rng: &mut R) -> usize {
        if self.n_actions == 0 {
            return 0;
        }
        let explore = rng.gen::<f64>() < self.epsilon;
        let values = self.values_mut(state);
        if explore {
            rng.gen_range(0..values.len())
        } else {
            argmax(values)
        }
    }

    /// Apply `Q(s,a) ← (1-α)·Q(s,a) + α·(r + γ·max Q(s',·))`, then decay epsilon.
    ///
    /// An out-of-range `action` leaves the table untouched but still decays
    /// epsilon.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn update(&mut self, state: &K, action: usize, reward: f64, next_state: &K) {
        let next_max = self
            .values_mut(next_state)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let next_max = if next_max.is_finite() { next_max } else { 0.0 };

        let alpha = self.config.learning_rate;
        let gamma = self.config.discount;
        if let Some(q) = self.values_mut(state).get_mut(action) {
            *q = (1.0 - alpha) * *q + alpha * (reward + gamma * next_max);
        }

        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.min_epsilon);
    }

    /// Values recorded for `state`, if it has been materialised.
    pub fn q_values(&self, state: &K) -> Option<&[f64]> {
        self.table.get(state).map(Vec::as_slice)
    }

    /// Current exploration probability.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Number of materialised states.
    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    /// Size of the action space.
    pub fn n_actions(&self) -> usize {
        self.n_actions
    }

    /// Hyper-parameters in use.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn values_mut(&mut self, state: &K) -> &mut Vec<f64> {
        let n = self.n_actions;
        self.table
            .entry(state.clone())
            .or_insert_with(|| vec![0.0; n])
    }
}

/// Index of the first maximum. Empty slices yield 0.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
