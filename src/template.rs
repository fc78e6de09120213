//! # Stage: Template Store
//!
//! ## Responsibility
//! Load the ordered collection of request templates, resolve every URL to an
//! absolute address under the configured base URL, inject the default
//! `Authorization` header, and hand out the endpoint identifiers used for
//! endpoint scoring.
//!
//! ## Guarantees
//! - After construction every template `url` is an absolute http(s) URL
//!   (leading-slash paths and placeholder hosts are rewritten onto the base
//!   URL; anything still relative fails the load)
//! - Every template has a non-empty `endpoint` (falls back to its original `url`)
//! - Templates are never modified after load; callers mutate deep copies
//! - Load failures are reported immediately and never retried
//!
//! ## NOT Responsible For
//! - Mutating templates (that belongs to `mutation`)
//! - Sending requests (that belongs to `executor`)
//! - Generating templates from an API description (external tooling)

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::reward::EndpointScores;

/// Errors produced while loading the template set.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template source could not be read.
    #[error("IO error reading templates from {file}: {source}")]
    Io {
        /// Path of the template file.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The template source is not a JSON array of templates.
    #[error("malformed templates in {file}: {source}")]
    Parse {
        /// Identifier of the template source.
        file: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A template URL is not an absolute http(s) URL after resolution.
    #[error("template url '{url}' in {file} is not an absolute http(s) url")]
    InvalidUrl {
        /// Identifier of the template source.
        file: String,
        /// The URL as it stood after resolution.
        url: String,
    },

    /// The template source parsed but contained no templates.
    #[error("no templates found in {source_name}")]
    Empty {
        /// Identifier of the template source.
        source_name: String,
    },
}

// ── HTTP method ────────────────────────────────────────────────────────────

/// HTTP methods a template may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// `GET`
    #[serde(alias = "get")]
    Get,
    /// `POST`
    #[serde(alias = "post")]
    Post,
    /// `PUT`
    #[serde(alias = "put")]
    Put,
    /// `DELETE`
    #[serde(alias = "delete")]
    Delete,
    /// `PATCH`
    #[serde(alias = "patch")]
    Patch,
}

impl HttpMethod {
    /// The fixed method set, in declaration order.
    pub const ALL: [HttpMethod; 5] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
    ];

    /// Upper-case wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Request template ───────────────────────────────────────────────────────

/// A request blueprint used as the starting point for mutation.
///
/// Serialized form is the template schema shared with the template generator:
/// `method`, `endpoint`, `url`, `headers`, `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path pattern identifying the endpoint (e.g. `/pet/{petId}`).
    #[serde(default)]
    pub endpoint: String,
    /// Concrete URL; absolute once the template has passed through a [`TemplateStore`].
    pub url: String,
    /// Request headers in declaration order.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub headers: IndexMap<String, String>,
    /// JSON body, absent when the request carries none.
    #[serde(default)]
    pub body: Option<Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<IndexMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl RequestTemplate {
    /// Create a template with no headers, no body and no endpoint.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: String::new(),
            url: url.into(),
            headers: IndexMap::new(),
            body: None,
        }
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set the endpoint identifier.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Look up a header value, ignoring ASCII case of the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Insert or overwrite a header. An existing entry with the same name (any
    /// case) keeps its position and its spelling.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some((_, v)) => *v = value,
            None => {
                self.headers.insert(name, value);
            }
        }
    }

    /// Path component of the URL, or `None` if the URL does not parse.
    pub fn url_path(&self) -> Option<String> {
        reqwest::Url::parse(&self.url)
            .ok()
            .map(|u| u.path().to_string())
    }

    /// Endpoint identifier, falling back to the URL path when unset.
    pub fn endpoint_or_path(&self) -> Option<String> {
        if self.endpoint.is_empty() {
            self.url_path()
        } else {
            Some(self.endpoint.clone())
        }
    }
}

// ── Store ──────────────────────────────────────────────────────────────────

/// Options applied to every template at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    /// Absolute base URL of the target service (e.g. `http://localhost:8080/api/v3`).
    pub base_url: String,
    /// URL prefixes that stand in for the real host and get rewritten onto `base_url`.
    pub placeholder_hosts: Vec<String>,
    /// Bearer token injected as `Authorization` on every template, if set.
    pub auth_token: Option<String>,
}

impl StoreOptions {
    /// Options with the default placeholder hosts and no auth.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            placeholder_hosts: default_placeholder_hosts(),
            auth_token: None,
        }
    }

    /// Set the injected bearer token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Placeholder hosts recognised when none are configured.
pub fn default_placeholder_hosts() -> Vec<String> {
    vec![
        "https://api.example.com".to_string(),
        "http://api.example.com".to_string(),
        "api.example.com".to_string(),
    ]
}

/// Ordered, read-only collection of resolved request templates.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates: Vec<RequestTemplate>,
    base_url: String,
}

impl TemplateStore {
    /// Load templates from a JSON file containing an array of template objects.
    ///
    /// # Errors
    ///
    /// - [`TemplateError::Io`] if the file cannot be read.
    /// - [`TemplateError::Parse`] if the content is not a template array.
    /// - [`TemplateError::Empty`] if the array is empty.
    /// - [`TemplateError::InvalidUrl`] if a URL cannot be made absolute.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn load_from_file(path: &Path, options: &StoreOptions) -> Result<Self, TemplateError> {
        let content = std::fs::read_to_string(path).map_err(|e| TemplateError::Io {
            file: path.display().to_string(),
            source: e,
        })?;
        Self::load_from_str(&content, &path.display().to_string(), options)
    }

    /// Load templates from a JSON string.
    ///
    /// # Errors
    ///
    /// - [`TemplateError::Parse`] if the content is not a template array.
    /// - [`TemplateError::Empty`] if the array is empty.
    /// - [`TemplateError::InvalidUrl`] if a URL cannot be made absolute.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn load_from_str(
        content: &str,
        source_name: &str,
        options: &StoreOptions,
    ) -> Result<Self, TemplateError> {
        let templates: Vec<RequestTemplate> =
            serde_json::from_str(content).map_err(|e| TemplateError::Parse {
                file: source_name.to_string(),
                source: e,
            })?;
        Self::from_templates(templates, source_name, options)
    }

    /// Build a store from already-parsed templates, resolving URLs and auth.
    ///
    /// # Errors
    ///
    /// - [`TemplateError::Empty`] if `templates` is empty.
    /// - [`TemplateError::InvalidUrl`] if a URL is still not absolute http(s)
    ///   after resolution (e.g. `pets/1`).
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn from_templates(
        templates: Vec<RequestTemplate>,
        source_name: &str,
        options: &StoreOptions,
    ) -> Result<Self, TemplateError> {
        if templates.is_empty() {
            return Err(TemplateError::Empty {
                source_name: source_name.to_string(),
            });
        }

        let token = options.auth_token.as_deref().filter(|t| !t.is_empty());
        let templates = templates
            .into_iter()
            .map(|mut t| {
                if t.endpoint.is_empty() {
                    t.endpoint = t.url.clone();
                }
                t.url = resolve_url(&t.url, &options.base_url, &options.placeholder_hosts);
                if !is_absolute_http(&t.url) {
                    return Err(TemplateError::InvalidUrl {
                        file: source_name.to_string(),
                        url: t.url,
                    });
                }
                if let Some(token) = token {
                    t.set_header("Authorization", format!("Bearer {token}"));
                }
                Ok(t)
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            source = source_name,
            count = templates.len(),
            auth = token.is_some(),
            "templates loaded"
        );

        Ok(Self {
            templates,
            base_url: options.base_url.clone(),
        })
    }

    /// All templates in load order.
    pub fn templates(&self) -> &[RequestTemplate] {
        &self.templates
    }

    /// Template at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&RequestTemplate> {
        self.templates.get(index)
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Always `false` for a successfully constructed store.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Base URL the templates were resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fresh endpoint scores with weight 1 for every distinct endpoint.
    pub fn endpoint_scores(&self) -> EndpointScores {
        EndpointScores::new(self.templates.iter().map(|t| t.endpoint.clone()))
    }
}

/// Resolve `url` against `base_url`.
///
/// - `/pets/1` becomes `{base_url}/pets/1`
/// - a URL starting with one of `placeholder_hosts` has that prefix replaced by `base_url`
/// - anything else is returned unchanged; the store rejects it unless it is
///   already an absolute http(s) URL
pub fn resolve_url(url: &str, base_url: &str, placeholder_hosts: &[String]) -> String {
    let base = base_url.trim_end_matches('/');
    if url.starts_with('/') {
        return format!("{base}{url}");
    }
    for host in placeholder_hosts {
        if let Some(rest) = url.strip_prefix(host.as_str()) {
            if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') {
                return format!("{base}{rest}");
            }
        }
    }
    url.to_string()
}

fn is_absolute_http(url: &str) -> bool {
    reqwest::Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
