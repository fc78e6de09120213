//! # Stage: Episode Driver
//!
//! ## Responsibility
//!
//! Sequence runs → episodes → steps. Each step mutates the episode's starting
//! template, sends the original and the mutated request, rewards the outcome,
//! updates whichever agents the [`FuzzMode`] enables, and emits exactly one
//! [`TransitionRecord`].
//!
//! ## Guarantees
//!
//! - **Sequential**: one run executes its episodes and steps strictly in order
//! - **Isolated runs**: every run gets fresh agents, endpoint scores and RNG
//! - **Never fails a step on the target's behaviour**: transport failures,
//!   unsupported methods and operator failures all degrade to a logged step;
//!   only a telemetry write failure ends a run early with an error
//! - **Cancellable**: the shutdown signal is checked before every step, and the
//!   sink is flushed on every exit path
//!
//! ## NOT Responsible For
//!
//! - Loading templates or configuration
//! - Deciding how a request is sent (see [`crate::executor`])

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::agent::{AgentConfig, QLearningAgent};
use crate::config::FuzzConfig;
use crate::executor::{NormalizedResponse, Transport};
use crate::metrics;
use crate::mutation::{is_mutated, MutationAction, MutationEngine};
use crate::reward::{binarize_reward, reward_for_status, EndpointScores};
use crate::telemetry::{run_log_path, JsonlSink, MutatedRequest, TelemetrySink, TransitionRecord};
use crate::template::{HttpMethod, RequestTemplate, TemplateStore};
use crate::FuzzerError;

// ── Mode ─────────────────────────────────────────────────────────────────

/// Which agents drive an experiment.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FuzzMode {
    /// Uniformly random operators, no learning.
    #[default]
    #[serde(alias = "classic")]
    Baseline,
    /// A mutation agent chooses the operator.
    #[serde(alias = "heuristic")]
    SingleAgent,
    /// An endpoint agent chooses the template, a mutation agent the operator.
    #[serde(alias = "rl")]
    Hierarchical,
}

impl FuzzMode {
    /// Snake-case name, also used as the log directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            FuzzMode::Baseline => "baseline",
            FuzzMode::SingleAgent => "single_agent",
            FuzzMode::Hierarchical => "hierarchical",
        }
    }

    /// Whether the mutation agent is consulted and updated.
    pub fn uses_mutation_agent(&self) -> bool {
        !matches!(self, FuzzMode::Baseline)
    }

    /// Whether the endpoint agent is consulted and updated.
    pub fn uses_endpoint_agent(&self) -> bool {
        matches!(self, FuzzMode::Hierarchical)
    }
}

impl fmt::Display for FuzzMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FuzzMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" | "classic" => Ok(FuzzMode::Baseline),
            "single_agent" | "single-agent" | "heuristic" => Ok(FuzzMode::SingleAgent),
            "hierarchical" | "rl" => Ok(FuzzMode::Hierarchical),
            other => Err(format!(
                "unknown mode '{other}' (expected baseline, single_agent or hierarchical)"
            )),
        }
    }
}

// ── State key ────────────────────────────────────────────────────────────

/// Status part of a [`StateKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateStatus {
    /// Beginning of an episode.
    Start,
    /// Status of the last mutated response.
    Code(u16),
}

/// Mutation-agent state: method and URL of a request plus the status it produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    /// Request method.
    pub method: HttpMethod,
    /// Request URL.
    pub url: String,
    /// `Start` at episode start, otherwise the mutated response status.
    pub status: StateStatus,
}

impl StateKey {
    /// State at the start of an episode over `template`.
    pub fn start(template: &RequestTemplate) -> Self {
        Self {
            method: template.method,
            url: template.url.clone(),
            status: StateStatus::Start,
        }
    }

    /// State after sending `mutated` and observing `status`.
    pub fn observed(mutated: &RequestTemplate, status: u16) -> Self {
        Self {
            method: mutated.method,
            url: mutated.url.clone(),
            status: StateStatus::Code(status),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            StateStatus::Start => write!(f, "{}:{}:start", self.method, self.url),
            StateStatus::Code(code) => write!(f, "{}:{}:{code}", self.method, self.url),
        }
    }
}

// ── Settings and results ─────────────────────────────────────────────────

/// Per-run knobs, extracted from [`FuzzConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    /// Which agents are active.
    pub mode: FuzzMode,
    /// Episodes per run.
    pub episodes: u32,
    /// Step budget per episode.
    pub steps_per_episode: u32,
    /// Weight template sampling by endpoint score (non-hierarchical modes).
    pub use_endpoint_scores: bool,
    /// Probability of the combined-mutation path.
    pub combined_mutation_probability: f64,
    /// Hyper-parameters for both agents.
    pub agent: AgentConfig,
}

impl DriverSettings {
    /// Settings taken from a validated config.
    pub fn from_config(config: &FuzzConfig) -> Self {
        Self {
            mode: config.run.mode,
            episodes: config.run.episodes,
            steps_per_episode: config.run.steps_per_episode,
            use_endpoint_scores: config.run.use_endpoint_scores,
            combined_mutation_probability: config.run.combined_mutation_probability,
            agent: config.agent.clone(),
        }
    }
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// The request that was sent as the mutated request.
    pub mutated: RequestTemplate,
    /// Reward derived from the mutated response.
    pub reward: i32,
    /// Whether the episode ends here (status ≥ 500 or 404).
    pub done: bool,
    /// Status of the mutated response.
    pub status_code: u16,
}

/// Position of a step within an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepIds {
    /// Run index.
    pub run: u32,
    /// Episode index within the run.
    pub episode: u32,
    /// Step index within the episode.
    pub step: u32,
}

/// Tally for one episode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpisodeReport {
    /// Template the episode fuzzed.
    pub template_index: usize,
    /// Steps taken.
    pub steps: u32,
    /// Whether a terminal status ended the episode before its step budget.
    pub terminal: bool,
    /// Whether the shutdown signal interrupted the episode.
    pub cancelled: bool,
    /// Mutated responses with status in `[500, 600)`.
    pub server_errors: u32,
    /// Mutated requests that hit a transport failure.
    pub transport_errors: u32,
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run index.
    pub run: u32,
    /// Episodes that ran to completion.
    pub episodes_completed: u32,
    /// Steps taken across all episodes.
    pub steps: u64,
    /// Mutated responses with status in `[500, 600)`.
    pub server_errors: u64,
    /// Mutated requests that hit a transport failure.
    pub transport_errors: u64,
    /// Episodes ended by a terminal status before their step budget.
    pub terminated_early: u32,
    /// Whether the run was interrupted by the shutdown signal.
    pub cancelled: bool,
    /// Final epsilon of the mutation agent, if active.
    pub mutation_epsilon: Option<f64>,
    /// Final epsilon of the endpoint agent, if active.
    pub endpoint_epsilon: Option<f64>,
    /// Transition log written by this run.
    pub log_path: Option<PathBuf>,
}

// ── Driver ───────────────────────────────────────────────────────────────

/// Runs the episodes of a single run.
///
/// Owns everything that must not be shared across runs (agents, endpoint
/// scores, RNG) and borrows what is read-only (templates, operators, transport).
pub struct EpisodeDriver<'a> {
    store: &'a TemplateStore,
    engine: &'a MutationEngine,
    transport: &'a dyn Transport,
    settings: DriverSettings,
    run: u32,
    rng: StdRng,
    scores: EndpointScores,
    mutation_agent: Option<QLearningAgent<StateKey>>,
    endpoint_agent: Option<QLearningAgent<String>>,
}

impl<'a> EpisodeDriver<'a> {
    /// Driver for run `run` with fresh agents and endpoint scores.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn new(
        store: &'a TemplateStore,
        engine: &'a MutationEngine,
        transport: &'a dyn Transport,
        settings: DriverSettings,
        run: u32,
        rng: StdRng,
    ) -> Self {
        let mutation_agent = settings
            .mode
            .uses_mutation_agent()
            .then(|| QLearningAgent::new(MutationAction::COUNT, settings.agent.clone()));
        let endpoint_agent = settings
            .mode
            .uses_endpoint_agent()
            .then(|| QLearningAgent::new(store.len(), settings.agent.clone()));

        Self {
            store,
            engine,
            transport,
            scores: store.endpoint_scores(),
            settings,
            run,
            rng,
            mutation_agent,
            endpoint_agent,
        }
    }

    /// The mutation agent, when the mode uses one.
    pub fn mutation_agent(&self) -> Option<&QLearningAgent<StateKey>> {
        self.mutation_agent.as_ref()
    }

    /// The endpoint agent, in hierarchical mode.
    pub fn endpoint_agent(&self) -> Option<&QLearningAgent<String>> {
        self.endpoint_agent.as_ref()
    }

    /// Current endpoint scores.
    pub fn endpoint_scores(&self) -> &EndpointScores {
        &self.scores
    }

    /// Run every episode, then flush `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`FuzzerError::Telemetry`] if a record cannot be written, and
    /// [`FuzzerError::Other`] if the store holds no templates. The sink is
    /// flushed in both cases.
    pub async fn run(
        mut self,
        sink: &mut dyn TelemetrySink,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<RunSummary, FuzzerError> {
        let result = self.run_episodes(sink, shutdown).await;
        let flushed = sink.flush();
        let summary = result?;
        flushed?;

        info!(
            run = summary.run,
            episodes = summary.episodes_completed,
            steps = summary.steps,
            server_errors = summary.server_errors,
            transport_errors = summary.transport_errors,
            terminated_early = summary.terminated_early,
            cancelled = summary.cancelled,
            "run complete"
        );
        Ok(summary)
    }

    async fn run_episodes(
        &mut self,
        sink: &mut dyn TelemetrySink,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<RunSummary, FuzzerError> {
        let mut summary = RunSummary {
            run: self.run,
            ..RunSummary::default()
        };

        for episode in 0..self.settings.episodes {
            if *shutdown.borrow() {
                summary.cancelled = true;
                break;
            }

            let report = self.run_episode(episode, sink, shutdown).await?;
            summary.steps += u64::from(report.steps);
            summary.server_errors += u64::from(report.server_errors);
            summary.transport_errors += u64::from(report.transport_errors);
            if report.terminal {
                summary.terminated_early += 1;
            }
            if report.cancelled {
                summary.cancelled = true;
                break;
            }
            summary.episodes_completed += 1;
            metrics::inc_episode(report.terminal);
        }

        summary.mutation_epsilon = self.mutation_agent.as_ref().map(QLearningAgent::epsilon);
        summary.endpoint_epsilon = self.endpoint_agent.as_ref().map(QLearningAgent::epsilon);
        Ok(summary)
    }

    /// Run one episode: pick a template, then step until a terminal status,
    /// the step budget, or shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`FuzzerError::Telemetry`] if a record cannot be written, and
    /// [`FuzzerError::Other`] if the store holds no templates.
    pub async fn run_episode(
        &mut self,
        episode: u32,
        sink: &mut dyn TelemetrySink,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<EpisodeReport, FuzzerError> {
        let (template_index, endpoint_state) = self
            .choose_template()
            .ok_or_else(|| FuzzerError::Other("template store is empty".into()))?;
        let store = self.store;
        let template = store
            .get(template_index)
            .ok_or_else(|| FuzzerError::Other(format!("template {template_index} out of range")))?;

        let mut report = EpisodeReport {
            template_index,
            ..EpisodeReport::default()
        };
        let mut state = StateKey::start(template);

        for step in 0..self.settings.steps_per_episode {
            if *shutdown.borrow() {
                report.cancelled = true;
                break;
            }

            let action = match &mut self.mutation_agent {
                Some(agent) => agent.select_action(&state, &mut self.rng),
                None => self.rng.gen_range(0..MutationAction::COUNT),
            };

            let ids = StepIds {
                run: self.run,
                episode,
                step,
            };
            let outcome = self.step(template, action, ids, sink).await?;
            let next_state = StateKey::observed(&outcome.mutated, outcome.status_code);
            let reward = f64::from(outcome.reward);

            if let Some(agent) = &mut self.mutation_agent {
                agent.update(&state, action, reward, &next_state);
            }
            if let Some(agent) = &mut self.endpoint_agent {
                agent.update(&endpoint_state, template_index, binarize_reward(reward), &endpoint_state);
            }

            report.steps += 1;
            if (500..600).contains(&outcome.status_code) {
                report.server_errors += 1;
            }
            if outcome.status_code == 0 {
                report.transport_errors += 1;
            }
            if outcome.done {
                report.terminal = true;
                break;
            }
            state = next_state;
        }

        debug!(
            run = self.run,
            episode,
            template = template_index,
            steps = report.steps,
            terminal = report.terminal,
            "episode finished"
        );
        Ok(report)
    }

    /// Choose the episode's template index and the endpoint agent's state.
    fn choose_template(&mut self) -> Option<(usize, String)> {
        let templates = self.store.templates();
        if templates.is_empty() {
            return None;
        }

        if let Some(agent) = &mut self.endpoint_agent {
            let probe = &templates[self.rng.gen_range(0..templates.len())];
            let endpoint_state = probe.endpoint.clone();
            let index = agent.select_action(&endpoint_state, &mut self.rng);
            return Some((index.min(templates.len() - 1), endpoint_state));
        }

        let index = if self.settings.use_endpoint_scores {
            self.scores.sample_index(templates, &mut self.rng)?
        } else {
            self.rng.gen_range(0..templates.len())
        };
        Some((index, templates[index].endpoint.clone()))
    }

    /// Execute one step against `template` with the policy-chosen `action`.
    ///
    /// With probability `combined_mutation_probability` two or three random
    /// distinct operators are applied instead of `action`; the record still
    /// names `action`.
    ///
    /// # Errors
    ///
    /// Returns [`FuzzerError::Telemetry`] if the record cannot be written.
    pub async fn step(
        &mut self,
        template: &RequestTemplate,
        action: usize,
        ids: StepIds,
        sink: &mut dyn TelemetrySink,
    ) -> Result<StepOutcome, FuzzerError> {
        let combined = self.rng.gen::<f64>() < self.settings.combined_mutation_probability;
        let mutated = if combined {
            let count = self.rng.gen_range(2..=3);
            self.engine.apply_multiple(template, count, &mut self.rng)
        } else {
            self.engine.apply_single(template, action, &mut self.rng)
        };

        let original_response = self.send("original", template).await;
        let mutated_response = self.send("mutated", &mutated).await;
        let status = mutated_response.status_code;
        metrics::inc_response(status);

        if self.settings.use_endpoint_scores {
            self.scores.record(&template.endpoint, status);
        }

        let reward = reward_for_status(status);
        let done = status >= 500 || status == 404;

        let chosen = MutationAction::from_index(action);
        let action_name = chosen.map_or("unknown", |a| a.name());
        let mutation_type = chosen.map_or("unknown", |a| a.category().as_str());
        metrics::inc_mutation(action_name, mutation_type);

        let record = TransitionRecord {
            timestamp: chrono::Utc::now(),
            original_request: template.clone(),
            mutated_request: MutatedRequest::from_template(&mutated),
            action_index: action,
            action_name: action_name.to_string(),
            mutation_type: mutation_type.to_string(),
            status_code: status,
            reward,
            mutation_applied: is_mutated(template, &mutated),
            response_diff: original_response.text != mutated_response.text,
            response_text: mutated_response.text,
            response_headers: mutated_response.headers,
            run: ids.run,
            episode: ids.episode,
            step: ids.step,
        };
        sink.append(&record)?;

        debug!(
            run = ids.run,
            episode = ids.episode,
            step = ids.step,
            action = action_name,
            combined,
            status,
            reward,
            "step complete"
        );

        Ok(StepOutcome {
            mutated,
            reward,
            done,
            status_code: status,
        })
    }

    async fn send(&self, kind: &str, request: &RequestTemplate) -> NormalizedResponse {
        let started = Instant::now();
        let response = self.transport.send(request).await;
        metrics::record_request(kind, started.elapsed());
        response
    }
}

// ── Experiment ───────────────────────────────────────────────────────────

/// Run `config.run.repeats` independent runs, one transition log each.
///
/// Run `n` draws from `StdRng::seed_from_u64(seed + n)` when a seed is
/// configured, otherwise from entropy. Stops early, returning the runs so far,
/// once `shutdown` reads `true`.
///
/// # Errors
///
/// Returns [`FuzzerError::Telemetry`] if a log cannot be created or written.
pub async fn run_experiment(
    config: &FuzzConfig,
    store: &TemplateStore,
    engine: &MutationEngine,
    transport: &dyn Transport,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<RunSummary>, FuzzerError> {
    let settings = DriverSettings::from_config(config);
    let mut summaries = Vec::new();

    info!(
        api = %config.target.api_name,
        mode = %settings.mode,
        runs = config.run.repeats,
        episodes = settings.episodes,
        steps = settings.steps_per_episode,
        templates = store.len(),
        "starting experiment"
    );

    for run in 0..config.run.repeats {
        if *shutdown.borrow() {
            warn!(run, "shutdown requested, skipping remaining runs");
            break;
        }

        let path = run_log_path(
            &config.logging.log_dir,
            &config.target.api_name,
            settings.mode.as_str(),
            run,
            chrono::Local::now().naive_local(),
        );
        let mut sink = JsonlSink::create(&path)?;
        info!(run, path = %path.display(), "run started");

        let rng = match config.run.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(run))),
            None => StdRng::from_entropy(),
        };
        let driver = EpisodeDriver::new(store, engine, transport, settings.clone(), run, rng);
        let mut summary = driver.run(&mut sink, &shutdown).await?;
        summary.log_path = Some(path);

        let cancelled = summary.cancelled;
        summaries.push(summary);
        if cancelled {
            break;
        }
    }

    Ok(summaries)
}
