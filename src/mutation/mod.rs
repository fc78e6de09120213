//! # Stage: Mutation Engine
//!
//! ## Responsibility
//! Own the fixed catalog of mutation operators and apply them to deep copies of
//! request templates, either one operator chosen by index or several distinct
//! operators combined on the same copy.
//!
//! ## Guarantees
//! - The input template is never altered; every mutation starts from a clone
//! - Body operators are no-ops when the input has no body or uses `GET`
//! - An operator that fails is logged and skipped; the engine itself never fails
//! - All randomness comes from the caller's RNG, so a seeded RNG reproduces
//!   the exact same mutations
//!
//! ## NOT Responsible For
//! - Choosing which operator to apply (that belongs to `agent` / `driver`)
//! - Sending the mutated request (that belongs to `executor`)
//!
//! ## Catalog
//!
//! | # | Operator | Category | Body |
//! |---|----------|----------|------|
//! | 0 | `mutate_string` | semantic | yes |
//! | 1 | `remove_field` | structural | yes |
//! | 2 | `duplicate_field` | structural | yes |
//! | 3 | `set_large_value` | boundary | yes |
//! | 4 | `inject_sql_payload` | semantic | yes |
//! | 5 | `type_flip` | structural | yes |
//! | 6 | `set_empty_values` | structural | yes |
//! | 7 | `mutate_headers` | header | no |
//! | 8 | `mutate_query_params` | path/query | no |
//! | 9 | `mutate_url_path` | path/query | no |
//! | 10 | `flip_boolean_flags` | structural | yes |
//! | 11 | `fuzz_ids` | boundary | yes |
//! | 12 | `mutate_template_injection` | semantic | yes |
//! | 13 | `mutate_method` | protocol | no |
//! | 14 | `mutate_content_type_vs_body` | protocol | yes |
//! | 15 | `mutate_query_values` | semantic | no |
//! | 16 | `mutate_path_ids` | boundary | no |

pub mod body;
pub mod url;

use std::fmt;

use rand::seq::index;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::payloads::{PayloadCorpus, PayloadKind};
use crate::template::{HttpMethod, RequestTemplate};

/// Reasons a single operator could not complete.
///
/// These never escape the engine; they are logged and the operator is skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MutationError {
    /// The operator needed a payload but the corpus for its category is empty.
    #[error("no {} payloads loaded", .0.as_str())]
    EmptyPayloads(PayloadKind),

    /// The operator needed at least one body field but the body object is empty.
    #[error("{0}: body object has no fields")]
    EmptyBody(&'static str),
}

/// Category tag carried by every operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationCategory {
    /// Injects adversarial content into values.
    Semantic,
    /// Changes the shape of the body.
    Structural,
    /// Pushes values to extremes.
    Boundary,
    /// Breaks protocol-level expectations (method, content type).
    Protocol,
    /// Tampers with headers.
    Header,
    /// Tampers with the URL path or query string.
    PathQuery,
}

impl MutationCategory {
    /// Name used in transition records.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationCategory::Semantic => "semantic",
            MutationCategory::Structural => "structural",
            MutationCategory::Boundary => "boundary",
            MutationCategory::Protocol => "protocol",
            MutationCategory::Header => "header",
            MutationCategory::PathQuery => "path/query",
        }
    }
}

impl fmt::Display for MutationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation operator from the fixed catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationAction {
    /// Replace the first non-empty string field with an XSS payload.
    MutateString,
    /// Delete one random body field.
    RemoveField,
    /// Clone one random body field under `<key>_copy`.
    DuplicateField,
    /// Replace the first numeric field with `10^k`, `k` in `[6, 12]`.
    SetLargeValue,
    /// Replace the first string field with an SQL injection payload.
    InjectSqlPayload,
    /// Negate a bool, stringify an integer or parse a numeric string; first match wins.
    TypeFlip,
    /// Replace the first field with `""`, `{}`, `[]` or `null`.
    SetEmptyValues,
    /// Duplicate one random header under `<key>_fuzz`.
    MutateHeaders,
    /// Append a randomly named query parameter.
    MutateQueryParams,
    /// Append `_fuzz` to one path segment after the host.
    MutateUrlPath,
    /// Negate the first boolean field.
    FlipBooleanFlags,
    /// Replace the first identifier-like field with an adversarial value.
    FuzzIds,
    /// Replace the first string field with a template injection payload.
    MutateTemplateInjection,
    /// Switch to a different HTTP method.
    MutateMethod,
    /// Send the body as JSON text under `Content-Type: text/plain`.
    MutateContentTypeVsBody,
    /// Replace every non-empty query value with an XSS payload.
    MutateQueryValues,
    /// Replace the first numeric path segment with an adversarial value.
    MutatePathIds,
}

impl MutationAction {
    /// The full catalog; an operator's position here is its action index.
    pub const CATALOG: [MutationAction; 17] = [
        MutationAction::MutateString,
        MutationAction::RemoveField,
        MutationAction::DuplicateField,
        MutationAction::SetLargeValue,
        MutationAction::InjectSqlPayload,
        MutationAction::TypeFlip,
        MutationAction::SetEmptyValues,
        MutationAction::MutateHeaders,
        MutationAction::MutateQueryParams,
        MutationAction::MutateUrlPath,
        MutationAction::FlipBooleanFlags,
        MutationAction::FuzzIds,
        MutationAction::MutateTemplateInjection,
        MutationAction::MutateMethod,
        MutationAction::MutateContentTypeVsBody,
        MutationAction::MutateQueryValues,
        MutationAction::MutatePathIds,
    ];

    /// Number of operators in the catalog.
    pub const COUNT: usize = Self::CATALOG.len();

    /// Operator at catalog position `index`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::CATALOG.get(index).copied()
    }

    /// Catalog position of this operator.
    pub fn index(&self) -> usize {
        Self::CATALOG
            .iter()
            .position(|a| a == self)
            .unwrap_or_default()
    }

    /// Stable operator name used in transition records and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            MutationAction::MutateString => "mutate_string",
            MutationAction::RemoveField => "remove_field",
            MutationAction::DuplicateField => "duplicate_field",
            MutationAction::SetLargeValue => "set_large_value",
            MutationAction::InjectSqlPayload => "inject_sql_payload",
            MutationAction::TypeFlip => "type_flip",
            MutationAction::SetEmptyValues => "set_empty_values",
            MutationAction::MutateHeaders => "mutate_headers",
            MutationAction::MutateQueryParams => "mutate_query_params",
            MutationAction::MutateUrlPath => "mutate_url_path",
            MutationAction::FlipBooleanFlags => "flip_boolean_flags",
            MutationAction::FuzzIds => "fuzz_ids",
            MutationAction::MutateTemplateInjection => "mutate_template_injection",
            MutationAction::MutateMethod => "mutate_method",
            MutationAction::MutateContentTypeVsBody => "mutate_content_type_vs_body",
            MutationAction::MutateQueryValues => "mutate_query_values",
            MutationAction::MutatePathIds => "mutate_path_ids",
        }
    }

    /// Category tag of this operator.
    pub fn category(&self) -> MutationCategory {
        match self {
            MutationAction::MutateString
            | MutationAction::InjectSqlPayload
            | MutationAction::MutateTemplateInjection
            | MutationAction::MutateQueryValues => MutationCategory::Semantic,

            MutationAction::RemoveField
            | MutationAction::DuplicateField
            | MutationAction::TypeFlip
            | MutationAction::FlipBooleanFlags
            | MutationAction::SetEmptyValues => MutationCategory::Structural,

            MutationAction::SetLargeValue
            | MutationAction::FuzzIds
            | MutationAction::MutatePathIds => MutationCategory::Boundary,

            MutationAction::MutateMethod | MutationAction::MutateContentTypeVsBody => {
                MutationCategory::Protocol
            }

            MutationAction::MutateHeaders => MutationCategory::Header,

            MutationAction::MutateQueryParams | MutationAction::MutateUrlPath => {
                MutationCategory::PathQuery
            }
        }
    }

    /// Whether this operator only touches the body and is therefore guarded.
    pub fn is_body_mutator(&self) -> bool {
        matches!(
            self,
            MutationAction::MutateString
                | MutationAction::RemoveField
                | MutationAction::DuplicateField
                | MutationAction::SetLargeValue
                | MutationAction::InjectSqlPayload
                | MutationAction::TypeFlip
                | MutationAction::SetEmptyValues
                | MutationAction::FlipBooleanFlags
                | MutationAction::FuzzIds
                | MutationAction::MutateTemplateInjection
                | MutationAction::MutateContentTypeVsBody
        )
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether `mutated` differs from `original` in url, body, headers or method.
pub fn is_mutated(original: &RequestTemplate, mutated: &RequestTemplate) -> bool {
    original.url != mutated.url
        || original.body != mutated.body
        || original.headers != mutated.headers
        || original.method != mutated.method
}

/// Applies catalog operators to copies of templates.
#[derive(Debug, Clone, Default)]
pub struct MutationEngine {
    payloads: PayloadCorpus,
}

impl MutationEngine {
    /// Create an engine drawing semantic payloads from `payloads`.
    pub fn new(payloads: PayloadCorpus) -> Self {
        Self { payloads }
    }

    /// The payload corpus in use.
    pub fn payloads(&self) -> &PayloadCorpus {
        &self.payloads
    }

    /// Apply the operator at catalog position `action_index` to a copy of `template`.
    ///
    /// An out-of-range index or a failing operator yields an unmodified copy.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn apply_single<R: Rng + ?Sized>(
        &self,
        template: &RequestTemplate,
        action_index: usize,
        rng: &mut R,
    ) -> RequestTemplate {
        match MutationAction::from_index(action_index) {
            Some(action) => self.apply_action(template, action, rng),
            None => {
                warn!(action_index, "mutation index out of range, request left unchanged");
                template.clone()
            }
        }
    }

    /// Apply one operator to a copy of `template`.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn apply_action<R: Rng + ?Sized>(
        &self,
        template: &RequestTemplate,
        action: MutationAction,
        rng: &mut R,
    ) -> RequestTemplate {
        let mut mutated = template.clone();
        if let Err(e) = self.run_operator(action, template, &mut mutated, rng) {
            warn!(action = action.name(), error = %e, "mutation skipped");
            return template.clone();
        }
        mutated
    }

    /// Apply `count` distinct operators, drawn without replacement, in sequence
    /// to a single copy of `template`.
    ///
    /// `count` is clamped to the catalog size. Operators that fail are skipped
    /// without leaving partial edits, and the remaining ones still apply.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn apply_multiple<R: Rng + ?Sized>(
        &self,
        template: &RequestTemplate,
        count: usize,
        rng: &mut R,
    ) -> RequestTemplate {
        let count = count.min(MutationAction::COUNT);
        let mut mutated = template.clone();
        let picks = index::sample(rng, MutationAction::COUNT, count).into_vec();

        for i in picks {
            let action = MutationAction::CATALOG[i];
            // A failing operator may have edited part of the body already.
            let mut scratch = mutated.clone();
            match self.run_operator(action, template, &mut scratch, rng) {
                Ok(()) => {
                    mutated = scratch;
                    debug!(action = action.name(), "combined mutation applied");
                }
                Err(e) => warn!(action = action.name(), error = %e, "combined mutation failed, skipping"),
            }
        }
        mutated
    }

    /// Dispatch a single operator onto `target`.
    ///
    /// The body guard is evaluated against `source`, the unmutated input.
    fn run_operator<R: Rng + ?Sized>(
        &self,
        action: MutationAction,
        source: &RequestTemplate,
        target: &mut RequestTemplate,
        rng: &mut R,
    ) -> Result<(), MutationError> {
        if action.is_body_mutator() && (source.body.is_none() || source.method == HttpMethod::Get) {
            return Ok(());
        }

        let payloads = &self.payloads;
        match action {
            MutationAction::MutateString => body::replace_first_string(
                target,
                payloads.get(PayloadKind::Xss),
                PayloadKind::Xss,
                true,
                rng,
            ),
            MutationAction::InjectSqlPayload => body::replace_first_string(
                target,
                payloads.get(PayloadKind::Sql),
                PayloadKind::Sql,
                false,
                rng,
            ),
            MutationAction::MutateTemplateInjection => body::replace_first_string(
                target,
                payloads.get(PayloadKind::Ssti),
                PayloadKind::Ssti,
                false,
                rng,
            ),
            MutationAction::RemoveField => body::remove_field(target, rng),
            MutationAction::DuplicateField => body::duplicate_field(target, rng),
            MutationAction::SetLargeValue => body::set_large_value(target, rng),
            MutationAction::TypeFlip => body::type_flip(target),
            MutationAction::SetEmptyValues => body::set_empty_values(target, rng),
            MutationAction::FlipBooleanFlags => body::flip_boolean_flags(target),
            MutationAction::FuzzIds => body::fuzz_ids(target, rng),
            MutationAction::MutateContentTypeVsBody => body::content_type_vs_body(target),
            MutationAction::MutateHeaders => url::mutate_headers(target, rng),
            MutationAction::MutateQueryParams => url::mutate_query_params(target, rng),
            MutationAction::MutateUrlPath => url::mutate_url_path(target, rng),
            MutationAction::MutateMethod => url::mutate_method(target, rng),
            MutationAction::MutateQueryValues => {
                url::mutate_query_values(target, payloads.get(PayloadKind::Xss), rng)
            }
            MutationAction::MutatePathIds => url::mutate_path_ids(target, rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn corpus() -> PayloadCorpus {
        PayloadCorpus::new(
            vec!["' OR 1=1 --".into()],
            vec!["<svg onload=alert(1)>".into()],
            vec!["{{7*7}}".into()],
        )
    }

    fn engine() -> MutationEngine {
        MutationEngine::new(corpus())
    }

    fn post_template() -> RequestTemplate {
        RequestTemplate::new(HttpMethod::Post, "http://localhost:8080/api/v3/pet/10?status=sold")
            .with_endpoint("/pet/{petId}")
            .with_header("Content-Type", "application/json")
            .with_body(json!({
                "id": 10,
                "name": "doggie",
                "status": "available",
                "vaccinated": true
            }))
    }

    #[test]
    fn test_catalog_has_seventeen_distinct_operators() {
        assert_eq!(MutationAction::COUNT, 17);
        let names: std::collections::HashSet<_> =
            MutationAction::CATALOG.iter().map(|a| a.name()).collect();
        assert_eq!(names.len(), 17);
    }

    #[test]
    fn test_index_roundtrips_through_catalog() {
        for (i, action) in MutationAction::CATALOG.iter().enumerate() {
            assert_eq!(action.index(), i);
            assert_eq!(MutationAction::from_index(i), Some(*action));
        }
        assert!(MutationAction::from_index(17).is_none());
    }

    #[test]
    fn test_categories_cover_all_six_tags() {
        let cats: std::collections::HashSet<_> =
            MutationAction::CATALOG.iter().map(|a| a.category()).collect();
        assert_eq!(cats.len(), 6);
        assert_eq!(MutationAction::MutateUrlPath.category().as_str(), "path/query");
        assert_eq!(MutationAction::MutateHeaders.category().as_str(), "header");
    }

    #[test]
    fn test_body_mutators_are_eleven() {
        let count = MutationAction::CATALOG
            .iter()
            .filter(|a| a.is_body_mutator())
            .count();
        assert_eq!(count, 11);
        assert!(!MutationAction::MutateQueryValues.is_body_mutator());
        assert!(MutationAction::MutateContentTypeVsBody.is_body_mutator());
    }

    #[test]
    fn test_body_mutators_noop_without_body() {
        let engine = engine();
        let template = RequestTemplate::new(HttpMethod::Post, "http://h/pets/1");
        let mut rng = StdRng::seed_from_u64(1);
        for action in MutationAction::CATALOG.iter().filter(|a| a.is_body_mutator()) {
            let out = engine.apply_action(&template, *action, &mut rng);
            assert_eq!(out, template, "{action} must not touch a bodiless template");
        }
    }

    #[test]
    fn test_body_mutators_noop_for_get() {
        let engine = engine();
        let mut template = post_template();
        template.method = HttpMethod::Get;
        let mut rng = StdRng::seed_from_u64(2);
        for action in MutationAction::CATALOG.iter().filter(|a| a.is_body_mutator()) {
            let out = engine.apply_action(&template, *action, &mut rng);
            assert_eq!(out, template, "{action} must not touch a GET template");
        }
    }

    #[test]
    fn test_set_large_value_on_bodiless_get_not_applied() {
        let engine = engine();
        let template = RequestTemplate::new(HttpMethod::Get, "/pets/1");
        let mut rng = StdRng::seed_from_u64(3);
        let out = engine.apply_single(
            &template,
            MutationAction::SetLargeValue.index(),
            &mut rng,
        );
        assert!(out.body.is_none());
        assert!(!is_mutated(&template, &out));
    }

    #[test]
    fn test_apply_single_never_alters_input() {
        let engine = engine();
        let template = post_template();
        let snapshot = template.clone();
        let mut rng = StdRng::seed_from_u64(4);
        for i in 0..MutationAction::COUNT {
            let _ = engine.apply_single(&template, i, &mut rng);
        }
        assert_eq!(template, snapshot);
    }

    #[test]
    fn test_apply_multiple_never_alters_input() {
        let engine = engine();
        let template = post_template();
        let snapshot = template.clone();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let _ = engine.apply_multiple(&template, 3, &mut rng);
        }
        assert_eq!(template, snapshot);
    }

    #[test]
    fn test_apply_single_out_of_range_returns_copy() {
        let engine = engine();
        let template = post_template();
        let mut rng = StdRng::seed_from_u64(6);
        let out = engine.apply_single(&template, 99, &mut rng);
        assert_eq!(out, template);
    }

    #[test]
    fn test_apply_single_failing_operator_returns_copy() {
        let engine = MutationEngine::default();
        let template = post_template();
        let mut rng = StdRng::seed_from_u64(7);
        let out = engine.apply_action(&template, MutationAction::InjectSqlPayload, &mut rng);
        assert_eq!(out, template);
    }

    #[test]
    fn test_apply_multiple_two_operators_mutates_with_high_probability() {
        let engine = engine();
        let template = post_template();
        let mut rng = StdRng::seed_from_u64(8);
        let trials = 200;
        let mutated = (0..trials)
            .filter(|_| is_mutated(&template, &engine.apply_multiple(&template, 2, &mut rng)))
            .count();
        assert!(mutated >= trials * 9 / 10, "only {mutated}/{trials} trials mutated");
    }

    #[test]
    fn test_apply_multiple_failure_does_not_block_other_operators() {
        // Empty corpora make every payload operator fail; the rest must still run.
        let engine = MutationEngine::default();
        let template = post_template();
        let mut rng = StdRng::seed_from_u64(9);
        let mut applied = 0;
        for _ in 0..100 {
            let out = engine.apply_multiple(&template, 2, &mut rng);
            if is_mutated(&template, &out) {
                applied += 1;
            }
        }
        assert!(applied > 50, "only {applied}/100 combined mutations applied");
    }

    #[test]
    fn test_apply_multiple_count_clamped_to_catalog() {
        let engine = engine();
        let template = post_template();
        let mut rng = StdRng::seed_from_u64(10);
        let out = engine.apply_multiple(&template, 100, &mut rng);
        assert!(is_mutated(&template, &out));
    }

    #[test]
    fn test_apply_multiple_failed_operator_leaves_no_partial_edit() {
        let engine = engine();
        // duplicate_field succeeds on the first element, then fails on the empty one.
        let template = RequestTemplate::new(HttpMethod::Post, "http://h/pets")
            .with_body(json!([{"a": 1}, {}]));
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let out = engine.apply_multiple(&template, MutationAction::COUNT, &mut rng);
            let body = serde_json::to_string(&out.body).expect("test: serialize");
            assert!(!body.contains("a_copy"), "seed {seed} kept a partial edit: {body}");
        }
    }

    #[test]
    fn test_apply_action_failed_operator_returns_input() {
        let engine = engine();
        let template = RequestTemplate::new(HttpMethod::Post, "http://h/pets")
            .with_body(json!([{"a": 1}, {}]));
        let mut rng = StdRng::seed_from_u64(3);
        let out = engine.apply_action(&template, MutationAction::DuplicateField, &mut rng);
        assert_eq!(out, template);
    }

    #[test]
    fn test_same_seed_same_mutation() {
        let engine = engine();
        let template = post_template();
        let a = engine.apply_multiple(&template, 3, &mut StdRng::seed_from_u64(11));
        let b = engine.apply_multiple(&template, 3, &mut StdRng::seed_from_u64(11));
        assert_eq!(a, b);
    }

    #[test]
    fn test_is_mutated_detects_each_field() {
        let base = post_template();
        assert!(!is_mutated(&base, &base.clone()));

        let mut m = base.clone();
        m.url.push_str("&x=1");
        assert!(is_mutated(&base, &m));

        let mut m = base.clone();
        m.method = HttpMethod::Delete;
        assert!(is_mutated(&base, &m));

        let mut m = base.clone();
        m.set_header("X-Extra", "1");
        assert!(is_mutated(&base, &m));

        let mut m = base.clone();
        m.body = None;
        assert!(is_mutated(&base, &m));
    }

    #[test]
    fn test_endpoint_change_alone_is_not_a_mutation() {
        let base = post_template();
        let m = base.clone().with_endpoint("/other");
        assert!(!is_mutated(&base, &m));
    }

    #[test]
    fn test_mutation_error_display() {
        assert_eq!(
            MutationError::EmptyPayloads(PayloadKind::Ssti).to_string(),
            "no ssti payloads loaded"
        );
        assert!(MutationError::EmptyBody("duplicate_field")
            .to_string()
            .contains("duplicate_field"));
    }
}
