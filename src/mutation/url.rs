//! Header, method, path and query-string operators.
//!
//! URLs are treated as plain strings so the operators behave the same on
//! absolute and not-yet-resolved templates, and so adversarial values reach
//! the wire without being percent-encoded first.

use rand::seq::SliceRandom;
use rand::Rng;

use super::MutationError;
use crate::payloads::PayloadKind;
use crate::template::{HttpMethod, RequestTemplate};

/// Replacement values for a numeric path segment, besides a random 11-13 digit id.
pub const PATH_ID_VALUES: [&str; 8] = [
    "999999999999999999999",
    "-1",
    "0",
    "abc",
    "' OR 1=1 --",
    "../../../etc/passwd",
    "",
    "          ",
];

/// Duplicate one random header under `<key>_fuzz`. No headers, no change.
pub fn mutate_headers<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    rng: &mut R,
) -> Result<(), MutationError> {
    if template.headers.is_empty() {
        return Ok(());
    }
    let idx = rng.gen_range(0..template.headers.len());
    if let Some((key, value)) = template
        .headers
        .get_index(idx)
        .map(|(k, v)| (k.clone(), v.clone()))
    {
        template.headers.insert(format!("{key}_fuzz"), value);
    }
    Ok(())
}

/// Append `fuzzed_param_<n>=FUZZED` (`n` in `[1, 1000]`) to the query string.
pub fn mutate_query_params<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    rng: &mut R,
) -> Result<(), MutationError> {
    let param = format!("fuzzed_param_{}=FUZZED", rng.gen_range(1..=1000));
    let (rest, fragment) = split_fragment(&template.url);
    let url = match rest.split_once('?') {
        Some((base, query)) if !query.is_empty() => format!("{base}?{query}&{param}"),
        Some((base, _)) => format!("{base}?{param}"),
        None => format!("{rest}?{param}"),
    };
    template.url = match fragment {
        Some(fragment) => format!("{url}#{fragment}"),
        None => url,
    };
    Ok(())
}

/// Append `_fuzz` to one random `/`-separated segment past `scheme://host`.
///
/// URLs with no segment beyond the host are left unchanged.
pub fn mutate_url_path<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    rng: &mut R,
) -> Result<(), MutationError> {
    let mut parts: Vec<String> = template.url.split('/').map(str::to_string).collect();
    if parts.len() > 3 {
        let idx = rng.gen_range(3..parts.len());
        parts[idx].push_str("_fuzz");
        template.url = parts.join("/");
    }
    Ok(())
}

/// Switch to a method drawn uniformly from the other four.
pub fn mutate_method<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    rng: &mut R,
) -> Result<(), MutationError> {
    let others: Vec<HttpMethod> = HttpMethod::ALL
        .iter()
        .copied()
        .filter(|m| *m != template.method)
        .collect();
    if let Some(method) = others.choose(rng) {
        template.method = *method;
    }
    Ok(())
}

/// Replace every non-empty `key=value` query value with an XSS payload.
///
/// Fails, leaving the URL untouched, if a value needs replacing and no XSS
/// payloads are loaded.
pub fn mutate_query_values<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    payloads: &[String],
    rng: &mut R,
) -> Result<(), MutationError> {
    let Some((base, query)) = template.url.split_once('?') else {
        return Ok(());
    };

    let mut pairs = Vec::new();
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some((key, value)) if !value.is_empty() => {
                let payload = payloads
                    .choose(rng)
                    .ok_or(MutationError::EmptyPayloads(PayloadKind::Xss))?;
                pairs.push(format!("{key}={payload}"));
            }
            _ => pairs.push(pair.to_string()),
        }
    }
    template.url = format!("{base}?{}", pairs.join("&"));
    Ok(())
}

/// Replace the first purely numeric `/`-separated segment with an adversarial value.
pub fn mutate_path_ids<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    rng: &mut R,
) -> Result<(), MutationError> {
    let mut parts: Vec<String> = template.url.split('/').map(str::to_string).collect();
    if let Some(part) = parts
        .iter_mut()
        .find(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    {
        let pick = rng.gen_range(0..=PATH_ID_VALUES.len());
        *part = match PATH_ID_VALUES.get(pick) {
            Some(value) => (*value).to_string(),
            None => rng.gen_range(10u64.pow(10)..=10u64.pow(12)).to_string(),
        };
        template.url = parts.join("/");
    }
    Ok(())
}

fn split_fragment(url: &str) -> (&str, Option<&str>) {
    match url.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (url, None),
    }
}
