//! Reward shaping and endpoint scoring.
//!
//! ## Responsibility
//!
//! Turn an observed status code into the scalar reward that feeds both agents,
//! and keep the per-endpoint weights used for score-weighted template sampling.
//!
//! ## Guarantees
//!
//! - **Total**: every status code maps to exactly one of `+1`, `-1`, `0`
//! - **Monotonic scores**: an endpoint weight starts at 1 and only ever grows,
//!   by exactly 1 per observed server error
//!
//! ## NOT Responsible For
//!
//! - Deciding whether score-weighted sampling is enabled (see [`crate::driver`])

use indexmap::IndexMap;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::template::RequestTemplate;

/// Reward for a mutated response status.
///
/// `+1` for a server error (`500..600`), `-1` for success (`200..300`),
/// `0` for everything else, including the synthetic `0` and `405` statuses.
///
/// # Panics
///
/// This function never panics.
pub fn reward_for_status(status: u16) -> i32 {
    match status {
        500..=599 => 1,
        200..=299 => -1,
        _ => 0,
    }
}

/// Collapse a reward to the endpoint agent's signal: `1` if `reward >= 0.5`, else `-1`.
pub fn binarize_reward(reward: f64) -> f64 {
    if reward >= 0.5 {
        1.0
    } else {
        -1.0
    }
}

/// Weight per endpoint, initialised to 1 and bumped on every observed 5xx.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointScores {
    scores: IndexMap<String, u64>,
}

impl EndpointScores {
    /// Weight 1 for every distinct endpoint. Duplicates collapse.
    pub fn new(endpoints: impl IntoIterator<Item = String>) -> Self {
        let scores = endpoints.into_iter().map(|e| (e, 1)).collect();
        Self { scores }
    }

    /// Number of distinct endpoints.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether no endpoint is tracked.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Current weight of `endpoint`, if tracked.
    pub fn score(&self, endpoint: &str) -> Option<u64> {
        self.scores.get(endpoint).copied()
    }

    /// Record the mutated-response status observed for `endpoint`.
    ///
    /// Increments the weight by 1 when `status >= 500`. Returns whether the
    /// weight changed. Unknown endpoints are ignored.
    pub fn record(&mut self, endpoint: &str, status: u16) -> bool {
        if status < 500 {
            return false;
        }
        match self.scores.get_mut(endpoint) {
            Some(score) => {
                *score = score.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Draw a template index with probability proportional to its endpoint weight.
    ///
    /// Templates whose endpoint is not tracked weigh 1. Returns `None` only
    /// for an empty slice.
    pub fn sample_index<R: Rng + ?Sized>(
        &self,
        templates: &[RequestTemplate],
        rng: &mut R,
    ) -> Option<usize> {
        let weights = templates
            .iter()
            .map(|t| self.score(&t.endpoint).unwrap_or(1));
        WeightedIndex::new(weights).ok().map(|dist| dist.sample(rng))
    }

    /// Iterate `(endpoint, weight)` in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.scores.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
