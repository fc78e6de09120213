//! Injection payload corpora.
//!
//! Three line-delimited text files (SQL injection, cross-site scripting,
//! server-side template injection) are read once at start-up. A file that
//! cannot be read degrades to an empty list for its category: start-up never
//! fails because of a missing corpus, the operators that draw from an empty
//! list simply report a skipped mutation.

use std::path::Path;

use tracing::{info, warn};

/// Payload category, one per corpus file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// SQL injection strings.
    Sql,
    /// Cross-site scripting strings.
    Xss,
    /// Server-side template injection strings.
    Ssti,
}

impl PayloadKind {
    /// Short lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Sql => "sql",
            PayloadKind::Xss => "xss",
            PayloadKind::Ssti => "ssti",
        }
    }
}

/// The three payload lists used by the semantic mutation operators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadCorpus {
    /// SQL injection payloads.
    pub sql: Vec<String>,
    /// Cross-site scripting payloads.
    pub xss: Vec<String>,
    /// Template injection payloads.
    pub ssti: Vec<String>,
}

impl PayloadCorpus {
    /// Build a corpus from in-memory lists.
    pub fn new(sql: Vec<String>, xss: Vec<String>, ssti: Vec<String>) -> Self {
        Self { sql, xss, ssti }
    }

    /// Load all three corpora. `None` paths yield empty lists.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn load(sql: Option<&Path>, xss: Option<&Path>, ssti: Option<&Path>) -> Self {
        let corpus = Self {
            sql: sql.map(|p| load_lines(p, PayloadKind::Sql)).unwrap_or_default(),
            xss: xss.map(|p| load_lines(p, PayloadKind::Xss)).unwrap_or_default(),
            ssti: ssti.map(|p| load_lines(p, PayloadKind::Ssti)).unwrap_or_default(),
        };
        info!(
            sql = corpus.sql.len(),
            xss = corpus.xss.len(),
            ssti = corpus.ssti.len(),
            "payload corpora loaded"
        );
        corpus
    }

    /// Payloads for one category.
    pub fn get(&self, kind: PayloadKind) -> &[String] {
        match kind {
            PayloadKind::Sql => &self.sql,
            PayloadKind::Xss => &self.xss,
            PayloadKind::Ssti => &self.ssti,
        }
    }
}

/// Read non-blank, trimmed lines. Invalid UTF-8 is replaced rather than rejected.
fn load_lines(path: &Path, kind: PayloadKind) -> Vec<String> {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            warn!(
                kind = kind.as_str(),
                path = %path.display(),
                error = %e,
                "failed to load payloads, continuing with an empty list"
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_lines_trims_and_skips_blank() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let path = dir.path().join("sqli.txt");
        std::fs::write(&path, "' OR 1=1 --\n\n   \n  admin'--  \n").expect("test: write");
        let lines = load_lines(&path, PayloadKind::Sql);
        assert_eq!(lines, vec!["' OR 1=1 --".to_string(), "admin'--".to_string()]);
    }

    #[test]
    fn test_load_missing_file_degrades_to_empty() {
        let corpus = PayloadCorpus::load(Some(Path::new("/nonexistent/sql.txt")), None, None);
        assert!(corpus.sql.is_empty());
        assert!(corpus.xss.is_empty());
        assert!(corpus.ssti.is_empty());
    }

    #[test]
    fn test_load_invalid_utf8_is_lossy() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let path = dir.path().join("xss.txt");
        std::fs::write(&path, b"<script>\xff</script>\n").expect("test: write");
        let corpus = PayloadCorpus::load(None, Some(&path), None);
        assert_eq!(corpus.xss.len(), 1);
        assert!(corpus.xss[0].starts_with("<script>"));
    }

    #[test]
    fn test_get_returns_matching_category() {
        let corpus = PayloadCorpus::new(
            vec!["s".into()],
            vec!["x".into()],
            vec!["{{7*7}}".into()],
        );
        assert_eq!(corpus.get(PayloadKind::Sql), ["s".to_string()]);
        assert_eq!(corpus.get(PayloadKind::Xss), ["x".to_string()]);
        assert_eq!(corpus.get(PayloadKind::Ssti), ["{{7*7}}".to_string()]);
    }
}
