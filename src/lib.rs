//! # tokio-rl-fuzzer
//!
//! Reinforcement-learning guided robustness testing for HTTP APIs.
//!
//! ## Architecture
//!
//! Each step of an episode runs the same loop:
//! ```text
//! TemplateStore → MutationEngine → Transport(original, mutated) → reward → QLearningAgent::update → TelemetrySink
//! ```
//!
//! The [`driver`] sequences runs, episodes and steps; the [`agent`] tables steer
//! which mutation operator (and, in hierarchical mode, which template) is tried
//! next so that server errors surface with fewer requests than blind fuzzing.

// ── Lint policy ────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod agent;
pub mod config;
pub mod driver;
pub mod executor;
pub mod metrics;
pub mod mutation;
pub mod payloads;
pub mod reward;
pub mod telemetry;
pub mod template;

// Re-exports for convenience
pub use agent::{AgentConfig, QLearningAgent};
pub use config::{FuzzConfig, LogFormat};
pub use driver::{run_experiment, EpisodeDriver, FuzzMode, RunSummary, StateKey, StepOutcome};
pub use executor::{HttpExecutor, NormalizedResponse, Transport};
pub use mutation::{is_mutated, MutationAction, MutationCategory, MutationEngine};
pub use payloads::PayloadCorpus;
pub use reward::{reward_for_status, EndpointScores};
pub use telemetry::{JsonlSink, MemorySink, TelemetrySink, TransitionRecord};
pub use template::{HttpMethod, RequestTemplate, TemplateStore};

/// Initialise the global tracing subscriber.
///
/// The output format comes from `format` when given, otherwise from the
/// `LOG_FORMAT` environment variable:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`FuzzerError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing(format: Option<LogFormat>) -> Result<(), FuzzerError> {
    let format = format.unwrap_or_else(|| {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init(),
    };

    result.map_err(|e| FuzzerError::Other(format!("tracing init failed: {e}")))
}

/// Top-level fuzzer errors.
///
/// Only start-up problems and telemetry write failures are fatal. Everything
/// that can go wrong inside a step (transport failures, unsupported methods,
/// operator failures) degrades to a synthetic outcome and never reaches here.
#[derive(Error, Debug)]
pub enum FuzzerError {
    /// Templates could not be loaded; the driver cannot proceed without them.
    #[error(transparent)]
    Template(#[from] template::TemplateError),

    /// The configuration file is missing, malformed or invalid.
    #[error(transparent)]
    Config(#[from] config::validation::ConfigError),

    /// A transition record could not be written to the run log.
    #[error(transparent)]
    Telemetry(#[from] telemetry::TelemetryError),

    /// The HTTP client could not be constructed.
    #[error("transport setup failed: {0}")]
    Transport(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
