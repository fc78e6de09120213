//! # Stage: Declarative Fuzzer Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML file describing one fuzzing experiment: the
//! target API, authentication, run shape, learning hyper-parameters, payload
//! corpora and logging. Run it with:
//! ```text
//! rl-fuzzer --config fuzz.toml
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `FuzzConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//! - Secrets stay out of logs: `Debug` never prints the auth token
//!
//! ## NOT Responsible For
//! - Loading templates or payloads (that belongs to `template` and `payloads`)
//! - Running the experiment (that belongs to `driver`)

pub mod loader;
pub mod validation;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;
use crate::driver::FuzzMode;
use crate::template::default_placeholder_hosts;

/// Environment variable consulted when auth is enabled but no token is configured.
pub const AUTH_TOKEN_ENV: &str = "FUZZER_AUTH_TOKEN";

// ── Default value functions ──────────────────────────────────────────────

/// Default request timeout: 10 000 ms.
fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_episodes() -> u32 {
    300
}

fn default_steps_per_episode() -> u32 {
    10
}

fn default_repeats() -> u32 {
    10
}

/// Default probability of taking the combined-mutation path: 0.3.
fn default_combined_mutation_probability() -> f64 {
    0.3
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./experiment_logs")
}

fn default_true() -> bool {
    true
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a fuzzing experiment.
///
/// Only `[target]` is required; every other section falls back to defaults.
///
/// # Example
///
/// ```toml
/// [target]
/// api_name = "petstore-localhost"
/// base_url = "http://localhost:8080/api/v3"
/// templates_path = "templates/petstore.json"
///
/// [run]
/// mode = "hierarchical"
/// episodes = 50
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FuzzConfig {
    /// The API under test.
    pub target: TargetConfig,
    /// Bearer-token injection.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Run, episode and step budgets.
    #[serde(default)]
    pub run: RunConfig,
    /// Learning hyper-parameters shared by both agents.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Injection payload corpora.
    #[serde(default)]
    pub payloads: PayloadsConfig,
    /// Diagnostic logging and transition-log placement.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ── Target ───────────────────────────────────────────────────────────────

/// The API under test.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TargetConfig {
    /// Short name used to partition transition logs (e.g. "petstore-localhost").
    pub api_name: String,
    /// Absolute base URL prepended to relative template URLs.
    pub base_url: String,
    /// JSON file holding the request templates.
    pub templates_path: PathBuf,
    /// Host prefixes in template URLs that are rewritten to `base_url`.
    #[serde(default = "default_placeholder_hosts")]
    pub placeholder_hosts: Vec<String>,
    /// Per-request timeout in milliseconds; a timeout becomes a status-0 response.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl TargetConfig {
    /// Per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ── Auth ─────────────────────────────────────────────────────────────────

/// Bearer-token injection settings.
#[derive(Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AuthConfig {
    /// Inject `Authorization: Bearer <token>` into every request.
    #[serde(default)]
    pub enabled: bool,
    /// Token to inject. Falls back to `FUZZER_AUTH_TOKEN` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl AuthConfig {
    /// The token to inject, or `None` when auth is disabled or no non-empty
    /// token is available.
    pub fn resolve_token(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        self.token
            .clone()
            .or_else(|| std::env::var(AUTH_TOKEN_ENV).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("enabled", &self.enabled)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ── Run ──────────────────────────────────────────────────────────────────

/// Shape of the experiment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RunConfig {
    /// Which agents are consulted and updated.
    #[serde(default)]
    pub mode: FuzzMode,
    /// Episodes per run.
    #[serde(default = "default_episodes")]
    pub episodes: u32,
    /// Step budget per episode.
    #[serde(default = "default_steps_per_episode")]
    pub steps_per_episode: u32,
    /// Independent runs, each with fresh agents and endpoint scores.
    #[serde(default = "default_repeats")]
    pub repeats: u32,
    /// Sample templates proportionally to endpoint scores in non-hierarchical modes.
    #[serde(default)]
    pub use_endpoint_scores: bool,
    /// Probability that a step applies 2-3 random operators instead of the chosen one.
    #[serde(default = "default_combined_mutation_probability")]
    pub combined_mutation_probability: f64,
    /// Seed for reproducible runs. Run `n` uses `seed + n`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: FuzzMode::default(),
            episodes: default_episodes(),
            steps_per_episode: default_steps_per_episode(),
            repeats: default_repeats(),
            use_endpoint_scores: false,
            combined_mutation_probability: default_combined_mutation_probability(),
            seed: None,
        }
    }
}

// ── Payloads ─────────────────────────────────────────────────────────────

/// Paths of the three line-delimited payload files. Missing files load as empty lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PayloadsConfig {
    /// SQL injection payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_path: Option<PathBuf>,
    /// Cross-site scripting payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xss_path: Option<PathBuf>,
    /// Server-side template injection payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssti_path: Option<PathBuf>,
}

// ── Logging ──────────────────────────────────────────────────────────────

/// Diagnostic logging and transition-log placement.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LoggingConfig {
    /// Root directory for `<api_name>/<mode>/run_<n>_<timestamp>.jsonl` files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Diagnostic log format. `None` defers to the `LOG_FORMAT` environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormat>,
    /// Write a Prometheus text snapshot next to the run logs when the experiment ends.
    #[serde(default = "default_true")]
    pub metrics_snapshot: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            format: None,
            metrics_snapshot: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

/// Export the JSON Schema for [`FuzzConfig`].
///
/// # Errors
///
/// Returns a serialization error if the schema cannot be rendered.
///
/// # Panics
///
/// This function never panics.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(FuzzConfig);
    serde_json::to_string_pretty(&schema)
}
