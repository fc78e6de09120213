//! # Stage: Telemetry Sink
//!
//! ## Responsibility
//! Persist one [`TransitionRecord`] per step to a per-run, append-only log.
//! The JSON Lines layout is the contract with offline analysis tooling.
//!
//! ## Guarantees
//! - One line per record, written and flushed before `append` returns
//! - Records are immutable once emitted
//! - Files land under `<log_dir>/<api_name>/<mode>/run_<run>_<YYYYmmdd_HHMMSS>.jsonl`
//!
//! ## NOT Responsible For
//! - Diagnostic logging (that goes through `tracing`)
//! - Reading logs back for analysis

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template::RequestTemplate;

/// Errors produced while writing transition records.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log file or its directory could not be created or written.
    #[error("IO error writing transition log {path}: {source}")]
    Io {
        /// Path of the log file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be serialized.
    #[error("failed to serialize transition record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The mutated request as logged: the template plus derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutatedRequest {
    /// The mutated template. Its `endpoint` falls back to the URL path.
    #[serde(flatten)]
    pub template: RequestTemplate,
    /// Path component of the mutated URL, `None` if the URL does not parse.
    pub path: Option<String>,
}

impl MutatedRequest {
    /// Derive `path` and the effective `endpoint` from `template`.
    pub fn from_template(template: &RequestTemplate) -> Self {
        let mut template = template.clone();
        let path = template.url_path();
        if template.endpoint.is_empty() {
            template.endpoint = path.clone().unwrap_or_default();
        }
        Self { template, path }
    }
}

/// One step of one episode of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// When the record was produced (UTC).
    pub timestamp: DateTime<Utc>,
    /// Template the episode started from.
    pub original_request: RequestTemplate,
    /// What was actually sent as the mutated request.
    pub mutated_request: MutatedRequest,
    /// Catalog index of the policy-chosen action.
    pub action_index: usize,
    /// Name of the policy-chosen action.
    pub action_name: String,
    /// Category of the policy-chosen action.
    pub mutation_type: String,
    /// Status of the mutated response (`0` for transport failures).
    pub status_code: u16,
    /// Reward derived from `status_code`.
    pub reward: i32,
    /// Whether the mutated request differs from the original.
    pub mutation_applied: bool,
    /// Whether the original and mutated response bodies differ.
    pub response_diff: bool,
    /// Body of the mutated response.
    pub response_text: String,
    /// Headers of the mutated response.
    pub response_headers: BTreeMap<String, String>,
    /// Run index.
    pub run: u32,
    /// Episode index within the run.
    pub episode: u32,
    /// Step index within the episode.
    pub step: u32,
}

/// Append-only destination for transition records.
pub trait TelemetrySink: Send {
    /// Persist one record.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError`] if the record could not be written.
    fn append(&mut self, record: &TransitionRecord) -> Result<(), TelemetryError>;

    /// Flush anything buffered.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Io`] if the underlying writer fails.
    fn flush(&mut self) -> Result<(), TelemetryError>;
}

/// Path of the log for one run.
pub fn run_log_path(
    log_dir: &Path,
    api_name: &str,
    mode: &str,
    run: u32,
    started_at: NaiveDateTime,
) -> PathBuf {
    log_dir
        .join(api_name)
        .join(mode)
        .join(format!("run_{run}_{}.jsonl", started_at.format("%Y%m%d_%H%M%S")))
}

// ── JSON Lines ──────────────────────────────────────────────────────────

/// Writes records as JSON Lines to a file.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    /// Open `path` for appending, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Io`] if the directory or file cannot be created.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, TelemetryError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(&path, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for JsonlSink {
    fn append(&mut self, record: &TransitionRecord) -> Result<(), TelemetryError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| io_error(&self.path, e))?;
        self.flush()
    }

    fn flush(&mut self) -> Result<(), TelemetryError> {
        self.writer.flush().map_err(|e| io_error(&self.path, e))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> TelemetryError {
    TelemetryError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ── In-memory ───────────────────────────────────────────────────────────

/// Keeps records in memory. Used by tests and embedders.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<TransitionRecord>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records appended so far.
    pub fn records(&self) -> &[TransitionRecord] {
        &self.records
    }

    /// Consume the sink, returning its records.
    pub fn into_records(self) -> Vec<TransitionRecord> {
        self.records
    }
}

impl TelemetrySink for MemorySink {
    fn append(&mut self, record: &TransitionRecord) -> Result<(), TelemetryError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::HttpMethod;
    use chrono::NaiveDate;
    use serde_json::{json, Value};

    fn record() -> TransitionRecord {
        let original = RequestTemplate::new(HttpMethod::Post, "http://h/api/pets")
            .with_endpoint("/pets")
            .with_body(json!({"name": "rex"}));
        let mut mutated = original.clone();
        mutated.body = Some(json!({"name": "' OR 1=1 --"}));
        TransitionRecord {
            timestamp: Utc::now(),
            mutated_request: MutatedRequest::from_template(&mutated),
            original_request: original,
            action_index: 4,
            action_name: "inject_sql_payload".into(),
            mutation_type: "semantic".into(),
            status_code: 500,
            reward: 1,
            mutation_applied: true,
            response_diff: true,
            response_text: "boom".into(),
            response_headers: BTreeMap::from([("content-type".into(), "text/plain".into())]),
            run: 0,
            episode: 2,
            step: 1,
        }
    }

    #[test]
    fn test_run_log_path_layout() {
        let stamp = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(7, 5, 1))
            .expect("test: valid date");
        let path = run_log_path(Path::new("/logs"), "petstore", "single_agent", 3, stamp);
        assert_eq!(
            path,
            PathBuf::from("/logs/petstore/single_agent/run_3_20240309_070501.jsonl")
        );
    }

    #[test]
    fn test_mutated_request_derives_path_and_keeps_endpoint() {
        let t = RequestTemplate::new(HttpMethod::Get, "http://h/api/pets/1?x=1").with_endpoint("/pets/{id}");
        let m = MutatedRequest::from_template(&t);
        assert_eq!(m.path.as_deref(), Some("/api/pets/1"));
        assert_eq!(m.template.endpoint, "/pets/{id}");
    }

    #[test]
    fn test_mutated_request_endpoint_falls_back_to_path() {
        let t = RequestTemplate::new(HttpMethod::Get, "http://h/api/pets/1");
        let m = MutatedRequest::from_template(&t);
        assert_eq!(m.template.endpoint, "/api/pets/1");
    }

    #[test]
    fn test_mutated_request_unparsable_url_has_no_path() {
        let t = RequestTemplate::new(HttpMethod::Get, "not a url");
        let m = MutatedRequest::from_template(&t);
        assert!(m.path.is_none());
        assert_eq!(m.template.endpoint, "");
    }

    #[test]
    fn test_record_serializes_with_flat_mutated_request() {
        let value = serde_json::to_value(record()).expect("test: serialize");
        let mutated = value.get("mutated_request").expect("test: mutated_request");
        assert_eq!(mutated.get("method"), Some(&Value::from("POST")));
        assert_eq!(mutated.get("path"), Some(&Value::from("/api/pets")));
        assert_eq!(mutated.get("endpoint"), Some(&Value::from("/pets")));
        for key in [
            "timestamp",
            "original_request",
            "action_index",
            "action_name",
            "mutation_type",
            "status_code",
            "reward",
            "mutation_applied",
            "response_diff",
            "response_text",
            "response_headers",
            "run",
            "episode",
            "step",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_jsonl_sink_appends_one_line_per_record() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let path = dir.path().join("api").join("baseline").join("run_0.jsonl");
        let mut sink = JsonlSink::create(&path).expect("test: create sink");
        sink.append(&record()).expect("test: append");
        sink.append(&record()).expect("test: append");

        let content = std::fs::read_to_string(&path).expect("test: read log");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: TransitionRecord = serde_json::from_str(lines[0]).expect("test: parse line");
        assert_eq!(parsed.status_code, 500);
        assert_eq!(parsed.episode, 2);
    }

    #[test]
    fn test_jsonl_sink_create_fails_under_a_file() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").expect("test: write");
        let err = JsonlSink::create(blocker.join("run.jsonl")).expect_err("test: must fail");
        assert!(matches!(err, TelemetryError::Io { .. }));
    }

    #[test]
    fn test_memory_sink_keeps_records_in_order() {
        let mut sink = MemorySink::new();
        let mut second = record();
        second.step = 9;
        sink.append(&record()).expect("test: append");
        sink.append(&second).expect("test: append");
        let records = sink.into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].step, 9);
    }
}
