//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`FuzzConfig`] that cannot
//! be expressed through the type system alone (range checks, URL shape,
//! cross-field invariants).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use reqwest::Url;

use super::FuzzConfig;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "agent.learning_rate").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on a [`FuzzConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Errors
///
/// Returns every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &FuzzConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Target ───────────────────────────────────────────────────────
    if config.target.api_name.trim().is_empty() {
        errors.push(invalid("target.api_name", "", "api name must not be empty"));
    }

    match Url::parse(&config.target.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
        _ => errors.push(invalid(
            "target.base_url",
            &config.target.base_url,
            "must be an absolute http(s) URL",
        )),
    }

    if config.target.request_timeout_ms == 0 {
        errors.push(invalid(
            "target.request_timeout_ms",
            0,
            "timeout must be at least 1ms",
        ));
    }

    // ── Run shape ────────────────────────────────────────────────────
    if config.run.episodes == 0 {
        errors.push(invalid("run.episodes", 0, "must be at least 1"));
    }

    if config.run.steps_per_episode == 0 {
        errors.push(invalid("run.steps_per_episode", 0, "must be at least 1"));
    }

    if config.run.repeats == 0 {
        errors.push(invalid("run.repeats", 0, "must be at least 1"));
    }

    let p = config.run.combined_mutation_probability;
    if !(0.0..=1.0).contains(&p) {
        errors.push(invalid(
            "run.combined_mutation_probability",
            p,
            "must be between 0.0 and 1.0",
        ));
    }

    // ── Agent hyper-parameters ───────────────────────────────────────
    let agent = &config.agent;
    if !(agent.learning_rate > 0.0 && agent.learning_rate <= 1.0) {
        errors.push(invalid(
            "agent.learning_rate",
            agent.learning_rate,
            "must be in (0.0, 1.0]",
        ));
    }

    if !(0.0..=1.0).contains(&agent.discount) {
        errors.push(invalid(
            "agent.discount",
            agent.discount,
            "must be between 0.0 and 1.0",
        ));
    }

    if !(0.0..=1.0).contains(&agent.epsilon) {
        errors.push(invalid(
            "agent.epsilon",
            agent.epsilon,
            "must be between 0.0 and 1.0",
        ));
    }

    if !(agent.epsilon_decay > 0.0 && agent.epsilon_decay <= 1.0) {
        errors.push(invalid(
            "agent.epsilon_decay",
            agent.epsilon_decay,
            "must be in (0.0, 1.0]",
        ));
    }

    if !(agent.min_epsilon >= 0.0 && agent.min_epsilon <= agent.epsilon) {
        errors.push(invalid(
            "agent.min_epsilon",
            agent.min_epsilon,
            "must be between 0.0 and agent.epsilon",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
