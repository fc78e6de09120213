//! `rl-fuzzer`: reinforcement-learning guided HTTP API fuzzer.
//!
//! Loads a TOML experiment description, then runs `repeats` independent runs
//! against the target, writing one JSON Lines transition log per run.
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON diagnostics (overridden by `[logging] format`)
//! - `RUST_LOG=info`: log level filter (default: info)
//! - `FUZZER_AUTH_TOKEN`: bearer token used when `[auth] enabled = true` and no token is configured

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;
use tokio_rl_fuzzer::config::loader::{load_from_file, validate_config};
use tokio_rl_fuzzer::config::{export_schema, FuzzConfig};
use tokio_rl_fuzzer::template::StoreOptions;
use tokio_rl_fuzzer::{
    init_tracing, metrics, run_experiment, FuzzMode, HttpExecutor, MutationEngine, PayloadCorpus,
    TemplateStore,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rl-fuzzer")]
#[command(about = "Reinforcement-learning guided robustness testing for HTTP APIs")]
struct Args {
    /// Experiment configuration file (TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the mode: baseline, single_agent or hierarchical
    #[arg(long)]
    mode: Option<FuzzMode>,

    /// Override episodes per run
    #[arg(long)]
    episodes: Option<u32>,

    /// Override steps per episode
    #[arg(long)]
    steps: Option<u32>,

    /// Override the number of runs
    #[arg(long)]
    repeats: Option<u32>,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Override the target base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Override the templates file
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Print the configuration JSON Schema and exit
    #[arg(long)]
    dump_schema: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut FuzzConfig) {
        if let Some(mode) = self.mode {
            config.run.mode = mode;
        }
        if let Some(episodes) = self.episodes {
            config.run.episodes = episodes;
        }
        if let Some(steps) = self.steps {
            config.run.steps_per_episode = steps;
        }
        if let Some(repeats) = self.repeats {
            config.run.repeats = repeats;
        }
        if let Some(seed) = self.seed {
            config.run.seed = Some(seed);
        }
        if let Some(base_url) = &self.base_url {
            config.target.base_url = base_url.clone();
        }
        if let Some(templates) = &self.templates {
            config.target.templates_path = templates.clone();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.dump_schema {
        println!("{}", export_schema()?);
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .ok_or("missing --config <FILE> (see --help)")?;
    let mut config = load_from_file(&config_path)?;
    args.apply_overrides(&mut config);
    validate_config(&config)?;

    let _ = init_tracing(config.logging.format);
    metrics::init_metrics()?;

    info!(
        config = %config_path.display(),
        api = %config.target.api_name,
        base_url = %config.target.base_url,
        mode = %config.run.mode,
        "rl-fuzzer starting"
    );

    let token = config.auth.resolve_token();
    if config.auth.enabled && token.is_none() {
        warn!("auth enabled but no token configured; requests go out unauthenticated");
    }

    let mut options = StoreOptions::new(config.target.base_url.clone());
    options.placeholder_hosts = config.target.placeholder_hosts.clone();
    if let Some(token) = &token {
        options = options.with_auth_token(token.clone());
    }
    let store = TemplateStore::load_from_file(&config.target.templates_path, &options)?;

    let payloads = PayloadCorpus::load(
        config.payloads.sql_path.as_deref(),
        config.payloads.xss_path.as_deref(),
        config.payloads.ssti_path.as_deref(),
    );
    let engine = MutationEngine::new(payloads);

    let mut executor = HttpExecutor::new(config.target.request_timeout())?;
    if let Some(token) = token {
        executor = executor.with_auth_token(token);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current step");
            let _ = shutdown_tx.send(true);
        }
    });

    let summaries = run_experiment(&config, &store, &engine, &executor, shutdown_rx).await?;

    if config.logging.metrics_snapshot {
        let dir = config
            .logging
            .log_dir
            .join(&config.target.api_name)
            .join(config.run.mode.as_str());
        let path = dir.join("metrics.prom");
        match std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, metrics::gather_metrics())) {
            Ok(()) => info!(path = %path.display(), "metrics snapshot written"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write metrics snapshot"),
        }
    }

    let steps: u64 = summaries.iter().map(|s| s.steps).sum();
    let server_errors: u64 = summaries.iter().map(|s| s.server_errors).sum();
    info!(
        runs = summaries.len(),
        steps,
        server_errors,
        cancelled = summaries.iter().any(|s| s.cancelled),
        "experiment finished"
    );

    Ok(())
}
