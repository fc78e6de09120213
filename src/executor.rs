//! Transport abstraction and the reqwest-backed HTTP executor.
//!
//! Provides the [`Transport`] trait and [`HttpExecutor`], its production
//! implementation. A transport never fails: every outcome, including network
//! errors and methods it does not speak, comes back as a [`NormalizedResponse`].
//!
//! | Situation | Status | Body |
//! |-----------|--------|------|
//! | Server answered | server status | response text |
//! | Timeout / connection / protocol error | `0` | error message |
//! | Method other than GET/POST/PUT/DELETE | `405` | [`UNSUPPORTED_METHOD_BODY`] |

use std::collections::BTreeMap;
use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::template::{HttpMethod, RequestTemplate};
use crate::FuzzerError;

/// Status used for synthetic responses standing in for transport failures.
pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

/// Status used for methods the executor does not send.
pub const UNSUPPORTED_METHOD_STATUS: u16 = 405;

/// Body of the synthetic unsupported-method response.
pub const UNSUPPORTED_METHOD_BODY: &str = "Unsupported HTTP method";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Placeholder that marks an `Authorization` header as needing the real token.
const TOKEN_PLACEHOLDER: &str = "YOUR_ACCESS_TOKEN";

/// Name of the uploaded file for multipart requests.
const MULTIPART_FILE_NAME: &str = "fuzzed_file.txt";

/// Outcome of sending one request, real or synthetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    /// HTTP status, or `0` for a transport failure.
    pub status_code: u16,
    /// Response body as text, or the error message for a transport failure.
    pub text: String,
    /// Response headers; repeated headers are joined with `", "`.
    pub headers: BTreeMap<String, String>,
}

impl NormalizedResponse {
    /// A response that was never received from the network.
    pub fn synthetic(status_code: u16, text: impl Into<String>) -> Self {
        Self {
            status_code,
            text: text.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Synthetic response for a timeout, connection or protocol failure.
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::synthetic(TRANSPORT_FAILURE_STATUS, message)
    }

    /// Synthetic response for a method the executor does not send.
    pub fn unsupported_method() -> Self {
        Self::synthetic(UNSUPPORTED_METHOD_STATUS, UNSUPPORTED_METHOD_BODY)
    }

    /// Whether this response stands in for a transport failure.
    pub fn is_transport_failure(&self) -> bool {
        self.status_code == TRANSPORT_FAILURE_STATUS
    }

    /// Whether the status is in `[500, 600)`.
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status_code)
    }
}

/// Sends request templates to the system under test.
///
/// Implementations must be thread-safe (Send + Sync) and must not fail:
/// every error is folded into the returned [`NormalizedResponse`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and normalize whatever happens into a response.
    async fn send(&self, request: &RequestTemplate) -> NormalizedResponse;
}

// ============================================================================
// HTTP executor
// ============================================================================

/// reqwest-backed [`Transport`].
///
/// ## Example
///
/// ```no_run
/// use std::time::Duration;
/// use tokio_rl_fuzzer::HttpExecutor;
///
/// let executor = HttpExecutor::new(Duration::from_secs(5))?
///     .with_auth_token("secret");
/// # Ok::<(), tokio_rl_fuzzer::FuzzerError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpExecutor {
    /// Create an executor whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`FuzzerError::Transport`] if the HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialise).
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn new(timeout: Duration) -> Result<Self, FuzzerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FuzzerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            auth_token: None,
            timeout,
        })
    }

    /// Ensure every request carries `Authorization: Bearer <token>`.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = (!token.is_empty()).then_some(token);
        self
    }

    /// Configured per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Headers as they will be sent: content type normalized, auth ensured.
    pub fn prepare_headers(&self, request: &RequestTemplate) -> IndexMap<String, String> {
        let mut prepared = request.clone();

        let content_type = prepared.header("Content-Type").unwrap_or("").trim();
        if content_type.is_empty() || content_type == "application/" {
            prepared.set_header("Content-Type", "application/json");
        }

        if let Some(token) = &self.auth_token {
            let needs_token = prepared
                .header("Authorization")
                .map_or(true, |v| v.contains(TOKEN_PLACEHOLDER));
            if needs_token {
                prepared.set_header("Authorization", format!("Bearer {token}"));
            }
        }

        prepared.headers
    }

    async fn dispatch(&self, request: &RequestTemplate) -> NormalizedResponse {
        let mut headers = self.prepare_headers(request);

        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
            HttpMethod::Put => with_json(self.client.put(&request.url), request.body.as_ref()),
            HttpMethod::Post if is_multipart(&headers) => {
                headers.retain(|k, _| !k.eq_ignore_ascii_case("Content-Type"));
                let part = Part::bytes(multipart_file_content(request.body.as_ref()).into_bytes())
                    .file_name(MULTIPART_FILE_NAME)
                    .mime_str("text/plain");
                match part {
                    Ok(part) => self
                        .client
                        .post(&request.url)
                        .multipart(Form::new().part("file", part)),
                    Err(e) => return NormalizedResponse::transport_failure(error_chain(&e)),
                }
            }
            HttpMethod::Post => with_json(self.client.post(&request.url), request.body.as_ref()),
            HttpMethod::Patch => return NormalizedResponse::unsupported_method(),
        };

        let header_map = match to_header_map(&headers) {
            Ok(map) => map,
            Err(message) => return NormalizedResponse::transport_failure(message),
        };

        // Applied after `json()`, so a caller-chosen Content-Type replaces the one it set.
        let response = match builder.headers(header_map).send().await {
            Ok(response) => response,
            Err(e) => return NormalizedResponse::transport_failure(error_chain(&e)),
        };

        let status_code = response.status().as_u16();
        let mut response_headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            response_headers
                .entry(name.as_str().to_string())
                .and_modify(|v| {
                    v.push_str(", ");
                    v.push_str(&value);
                })
                .or_insert(value);
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(status = status_code, error = %error_chain(&e), "failed to read response body");
                String::new()
            }
        };

        NormalizedResponse {
            status_code,
            text,
            headers: response_headers,
        }
    }
}

#[async_trait]
impl Transport for HttpExecutor {
    async fn send(&self, request: &RequestTemplate) -> NormalizedResponse {
        let response = self.dispatch(request).await;
        if response.is_transport_failure() {
            warn!(
                method = %request.method,
                url = %request.url,
                error = %response.text,
                "request failed"
            );
        } else {
            debug!(
                method = %request.method,
                url = %request.url,
                status = response.status_code,
                "request sent"
            );
        }
        response
    }
}

fn with_json(builder: reqwest::RequestBuilder, body: Option<&Value>) -> reqwest::RequestBuilder {
    match body {
        Some(body) => builder.json(body),
        None => builder,
    }
}

fn is_multipart(headers: &IndexMap<String, String>) -> bool {
    headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("Content-Type") && v.trim() == "multipart/form-data")
}

/// Content for the uploaded file: the body's `file` field, or `FUZZ`.
fn multipart_file_content(body: Option<&Value>) -> String {
    match body.and_then(|b| b.get("file")) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "FUZZ".to_string(),
    }
}

fn to_header_map(headers: &IndexMap<String, String>) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("invalid header name {name:?}: {e}"))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| format!("invalid value for header {name:?}: {e}"))?;
        map.append(header_name, header_value);
    }
    Ok(map)
}

/// Error message including every `source()` in the chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor() -> HttpExecutor {
        HttpExecutor::new(Duration::from_millis(200)).expect("test: client builds")
    }

    #[test]
    fn test_prepare_headers_defaults_missing_content_type() {
        let t = RequestTemplate::new(HttpMethod::Get, "http://h/a");
        let headers = executor().prepare_headers(&t);
        assert_eq!(headers.get("Content-Type").map(String::as_str), Some("application/json"));
    }

    #[test]
    fn test_prepare_headers_completes_partial_content_type() {
        let t = RequestTemplate::new(HttpMethod::Post, "http://h/a")
            .with_header("content-type", " application/ ");
        let headers = executor().prepare_headers(&t);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("content-type").map(String::as_str), Some("application/json"));
    }

    #[test]
    fn test_prepare_headers_keeps_explicit_content_type() {
        let t = RequestTemplate::new(HttpMethod::Post, "http://h/a")
            .with_header("Content-Type", "text/plain");
        let headers = executor().prepare_headers(&t);
        assert_eq!(headers.get("Content-Type").map(String::as_str), Some("text/plain"));
    }

    #[test]
    fn test_prepare_headers_injects_token_when_missing() {
        let t = RequestTemplate::new(HttpMethod::Get, "http://h/a");
        let headers = executor().with_auth_token("tok").prepare_headers(&t);
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer tok"));
    }

    #[test]
    fn test_prepare_headers_refreshes_placeholder_token() {
        let t = RequestTemplate::new(HttpMethod::Get, "http://h/a")
            .with_header("Authorization", "Bearer YOUR_ACCESS_TOKEN");
        let headers = executor().with_auth_token("tok").prepare_headers(&t);
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer tok"));
    }

    #[test]
    fn test_prepare_headers_keeps_real_token() {
        let t = RequestTemplate::new(HttpMethod::Get, "http://h/a")
            .with_header("Authorization", "Bearer other");
        let headers = executor().with_auth_token("tok").prepare_headers(&t);
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer other"));
    }

    #[test]
    fn test_prepare_headers_without_token_adds_no_auth() {
        let t = RequestTemplate::new(HttpMethod::Get, "http://h/a");
        let headers = executor().with_auth_token("").prepare_headers(&t);
        assert!(!headers.contains_key("Authorization"));
    }

    #[test]
    fn test_prepare_headers_does_not_touch_template() {
        let t = RequestTemplate::new(HttpMethod::Get, "http://h/a");
        let _ = executor().with_auth_token("tok").prepare_headers(&t);
        assert!(t.headers.is_empty());
    }

    #[tokio::test]
    async fn test_send_patch_returns_synthetic_405() {
        // Unroutable address: a network attempt would yield status 0, not 405.
        let t = RequestTemplate::new(HttpMethod::Patch, "http://127.0.0.1:9/pets/1");
        let response = executor().send(&t).await;
        assert_eq!(response.status_code, 405);
        assert_eq!(response.text, UNSUPPORTED_METHOD_BODY);
    }

    #[tokio::test]
    async fn test_send_invalid_url_returns_status_zero() {
        let t = RequestTemplate::new(HttpMethod::Get, "not a url");
        let response = executor().send(&t).await;
        assert!(response.is_transport_failure());
        assert!(!response.text.is_empty());
    }

    #[tokio::test]
    async fn test_send_invalid_header_name_returns_status_zero() {
        let t = RequestTemplate::new(HttpMethod::Get, "http://127.0.0.1:9/a")
            .with_header("bad header", "x");
        let response = executor().send(&t).await;
        assert!(response.is_transport_failure());
        assert!(response.text.contains("invalid header name"));
    }

    #[test]
    fn test_multipart_file_content_fallbacks() {
        assert_eq!(multipart_file_content(None), "FUZZ");
        assert_eq!(multipart_file_content(Some(&json!({"file": "abc"}))), "abc");
        assert_eq!(multipart_file_content(Some(&json!({"file": 5}))), "5");
        assert_eq!(multipart_file_content(Some(&json!({"other": 1}))), "FUZZ");
    }

    #[test]
    fn test_normalized_response_classification() {
        assert!(NormalizedResponse::synthetic(503, "").is_server_error());
        assert!(!NormalizedResponse::synthetic(600, "").is_server_error());
        assert!(NormalizedResponse::transport_failure("x").is_transport_failure());
        assert_eq!(NormalizedResponse::unsupported_method().status_code, 405);
    }
}
