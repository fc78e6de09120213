//! Body operators.
//!
//! Each operator walks the body's object fields in declaration order. An object
//! body is mutated directly; an array body has the operator applied to each of
//! its object elements; any other body is left alone. The body guard lives in
//! the engine, these functions assume they are allowed to run.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Map, Value};

use super::MutationError;
use crate::payloads::PayloadKind;
use crate::template::RequestTemplate;

/// Field names treated as identifiers by [`fuzz_ids`].
pub const ID_FIELD_NAMES: [&str; 6] = ["id", "userId", "vehicleId", "video_id", "order_id", "postId"];

type Fields = Map<String, Value>;

/// Run `f` on every object the body exposes.
fn for_each_object<F>(template: &mut RequestTemplate, mut f: F) -> Result<(), MutationError>
where
    F: FnMut(&mut Fields) -> Result<(), MutationError>,
{
    match template.body.as_mut() {
        Some(Value::Object(map)) => f(map),
        Some(Value::Array(items)) => {
            for item in items.iter_mut() {
                if let Value::Object(map) = item {
                    f(map)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn pick_payload<R: Rng + ?Sized>(
    payloads: &[String],
    kind: PayloadKind,
    rng: &mut R,
) -> Result<String, MutationError> {
    payloads
        .choose(rng)
        .cloned()
        .ok_or(MutationError::EmptyPayloads(kind))
}

/// Replace the first string field with a payload of `kind`.
///
/// With `non_empty_only` set, empty strings are skipped while searching.
/// Fails only when a field matched and the payload list is empty.
pub fn replace_first_string<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    payloads: &[String],
    kind: PayloadKind,
    non_empty_only: bool,
    rng: &mut R,
) -> Result<(), MutationError> {
    for_each_object(template, |map| {
        let target = map.values_mut().find(|v| match v {
            Value::String(s) => !non_empty_only || !s.is_empty(),
            _ => false,
        });
        if let Some(value) = target {
            *value = Value::String(pick_payload(payloads, kind, rng)?);
        }
        Ok(())
    })
}

/// Delete one randomly chosen field. An empty object is left as is.
pub fn remove_field<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    rng: &mut R,
) -> Result<(), MutationError> {
    for_each_object(template, |map| {
        if map.is_empty() {
            return Ok(());
        }
        let victim = rng.gen_range(0..map.len());
        // Rebuild rather than remove so the surviving fields keep their order.
        *map = std::mem::take(map)
            .into_iter()
            .enumerate()
            .filter(|(i, _)| *i != victim)
            .map(|(_, kv)| kv)
            .collect();
        Ok(())
    })
}

/// Clone one randomly chosen field under `<key>_copy`.
pub fn duplicate_field<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    rng: &mut R,
) -> Result<(), MutationError> {
    for_each_object(template, |map| {
        if map.is_empty() {
            return Err(MutationError::EmptyBody("duplicate_field"));
        }
        let idx = rng.gen_range(0..map.len());
        if let Some((key, value)) = map.iter().nth(idx).map(|(k, v)| (k.clone(), v.clone())) {
            map.insert(format!("{key}_copy"), value);
        }
        Ok(())
    })
}

/// Replace the first numeric field with `10^k` for `k` in `[6, 12]`.
pub fn set_large_value<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    rng: &mut R,
) -> Result<(), MutationError> {
    for_each_object(template, |map| {
        if let Some(value) = map.values_mut().find(|v| v.is_number()) {
            let exponent: u32 = rng.gen_range(6..=12);
            *value = json!(10u64.pow(exponent));
        }
        Ok(())
    })
}

/// Coerce the first convertible field: bool → negation, integer → string,
/// numeric string → integer. Fields of other kinds are skipped.
pub fn type_flip(template: &mut RequestTemplate) -> Result<(), MutationError> {
    for_each_object(template, |map| {
        for value in map.values_mut() {
            let flipped = match value {
                Value::Bool(b) => Some(Value::Bool(!*b)),
                Value::Number(n) if n.is_i64() || n.is_u64() => Some(Value::String(n.to_string())),
                Value::String(s) => s.trim().parse::<i64>().ok().map(|i| json!(i)),
                _ => None,
            };
            if let Some(flipped) = flipped {
                *value = flipped;
                break;
            }
        }
        Ok(())
    })
}

/// Replace the first field with one of `""`, `{}`, `[]`, `null`.
pub fn set_empty_values<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    rng: &mut R,
) -> Result<(), MutationError> {
    for_each_object(template, |map| {
        if let Some(value) = map.values_mut().next() {
            *value = match rng.gen_range(0..4) {
                0 => json!(""),
                1 => json!({}),
                2 => json!([]),
                _ => Value::Null,
            };
        }
        Ok(())
    })
}

/// Negate the first boolean field.
pub fn flip_boolean_flags(template: &mut RequestTemplate) -> Result<(), MutationError> {
    for_each_object(template, |map| {
        if let Some(Value::Bool(b)) = map.values_mut().find(|v| v.is_boolean()) {
            *b = !*b;
        }
        Ok(())
    })
}

/// Replace the first field named like an identifier with a boundary or
/// adversarial value.
pub fn fuzz_ids<R: Rng + ?Sized>(
    template: &mut RequestTemplate,
    rng: &mut R,
) -> Result<(), MutationError> {
    for_each_object(template, |map| {
        let target = map
            .iter_mut()
            .find(|(k, _)| ID_FIELD_NAMES.contains(&k.as_str()))
            .map(|(_, v)| v);
        if let Some(value) = target {
            *value = match rng.gen_range(0..8) {
                0 => json!(-1),
                1 => json!(0),
                2 => json!(999_999_999),
                3 => json!("abc"),
                4 => json!("0'*"),
                5 => json!("../../../etc/passwd"),
                6 => json!(""),
                _ => json!(" "),
            };
        }
        Ok(())
    })
}

/// Serialize an object body to JSON text and declare it `text/plain`.
pub fn content_type_vs_body(template: &mut RequestTemplate) -> Result<(), MutationError> {
    if let Some(body @ Value::Object(_)) = template.body.as_ref() {
        let text = body.to_string();
        template.set_header("Content-Type", "text/plain");
        template.body = Some(Value::String(text));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::HttpMethod;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn with_body(body: Value) -> RequestTemplate {
        RequestTemplate::new(HttpMethod::Post, "http://h/pet").with_body(body)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn xss() -> Vec<String> {
        vec!["<script>alert(1)</script>".to_string()]
    }

    #[test]
    fn test_replace_first_string_hits_first_non_empty() {
        let mut t = with_body(json!({"a": 1, "b": "", "c": "x", "d": "y"}));
        replace_first_string(&mut t, &xss(), PayloadKind::Xss, true, &mut rng()).expect("test: ok");
        assert_eq!(
            t.body,
            Some(json!({"a": 1, "b": "", "c": "<script>alert(1)</script>", "d": "y"}))
        );
    }

    #[test]
    fn test_replace_first_string_accepts_empty_when_allowed() {
        let mut t = with_body(json!({"b": "", "c": "x"}));
        let sql = vec!["' OR 1=1".to_string()];
        replace_first_string(&mut t, &sql, PayloadKind::Sql, false, &mut rng()).expect("test: ok");
        assert_eq!(t.body, Some(json!({"b": "' OR 1=1", "c": "x"})));
    }

    #[test]
    fn test_replace_first_string_empty_corpus_errors_only_on_match() {
        let mut t = with_body(json!({"n": 1}));
        assert!(replace_first_string(&mut t, &[], PayloadKind::Ssti, false, &mut rng()).is_ok());

        let mut t = with_body(json!({"s": "v"}));
        let err = replace_first_string(&mut t, &[], PayloadKind::Ssti, false, &mut rng());
        assert_eq!(err, Err(MutationError::EmptyPayloads(PayloadKind::Ssti)));
    }

    #[test]
    fn test_array_body_mutates_each_object_element() {
        let mut t = with_body(json!([{"ok": true}, 5, {"ok": false}]));
        flip_boolean_flags(&mut t).expect("test: ok");
        assert_eq!(t.body, Some(json!([{"ok": false}, 5, {"ok": true}])));
    }

    #[test]
    fn test_scalar_body_left_alone() {
        let mut t = with_body(json!("raw text"));
        remove_field(&mut t, &mut rng()).expect("test: ok");
        type_flip(&mut t).expect("test: ok");
        assert_eq!(t.body, Some(json!("raw text")));
    }

    #[test]
    fn test_remove_field_drops_exactly_one_and_keeps_order() {
        let mut t = with_body(json!({"a": 1, "b": 2, "c": 3, "d": 4}));
        remove_field(&mut t, &mut rng()).expect("test: ok");
        let map = t.body.as_ref().and_then(Value::as_object).expect("test: object");
        assert_eq!(map.len(), 3);
        let keys: Vec<_> = map.keys().cloned().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_remove_field_empty_object_is_noop() {
        let mut t = with_body(json!({}));
        remove_field(&mut t, &mut rng()).expect("test: ok");
        assert_eq!(t.body, Some(json!({})));
    }

    #[test]
    fn test_duplicate_field_adds_copy_key() {
        let mut t = with_body(json!({"name": "rex"}));
        duplicate_field(&mut t, &mut rng()).expect("test: ok");
        assert_eq!(t.body, Some(json!({"name": "rex", "name_copy": "rex"})));
    }

    #[test]
    fn test_duplicate_field_empty_object_errors() {
        let mut t = with_body(json!({}));
        let result = duplicate_field(&mut t, &mut rng());
        assert_eq!(result, Err(MutationError::EmptyBody("duplicate_field")));
    }

    #[test]
    fn test_set_large_value_replaces_first_number_with_power_of_ten() {
        let mut t = with_body(json!({"name": "x", "qty": 3, "price": 1.5}));
        set_large_value(&mut t, &mut rng()).expect("test: ok");
        let qty = t.body.as_ref().and_then(|b| b["qty"].as_u64()).expect("test: qty");
        assert!((1_000_000..=1_000_000_000_000).contains(&qty));
        assert_eq!(qty.to_string().trim_start_matches('1').trim_matches('0'), "");
        assert_eq!(t.body.as_ref().map(|b| b["price"].clone()), Some(json!(1.5)));
    }

    #[test]
    fn test_set_large_value_skips_booleans() {
        let mut t = with_body(json!({"flag": true, "n": 7}));
        set_large_value(&mut t, &mut rng()).expect("test: ok");
        let body = t.body.expect("test: body");
        assert_eq!(body["flag"], json!(true));
        assert_ne!(body["n"], json!(7));
    }

    #[test]
    fn test_type_flip_bool_first() {
        let mut t = with_body(json!({"flag": true, "n": 7}));
        type_flip(&mut t).expect("test: ok");
        assert_eq!(t.body, Some(json!({"flag": false, "n": 7})));
    }

    #[test]
    fn test_type_flip_integer_to_string() {
        let mut t = with_body(json!({"n": 7, "flag": true}));
        type_flip(&mut t).expect("test: ok");
        assert_eq!(t.body, Some(json!({"n": "7", "flag": true})));
    }

    #[test]
    fn test_type_flip_numeric_string_to_integer_skipping_others() {
        let mut t = with_body(json!({"ratio": 0.5, "name": "rex", "age": " 12 "}));
        type_flip(&mut t).expect("test: ok");
        assert_eq!(t.body, Some(json!({"ratio": 0.5, "name": "rex", "age": 12})));
    }

    #[test]
    fn test_set_empty_values_targets_first_field() {
        let mut t = with_body(json!({"a": "full", "b": "keep"}));
        set_empty_values(&mut t, &mut rng()).expect("test: ok");
        let body = t.body.expect("test: body");
        assert!([json!(""), json!({}), json!([]), Value::Null].contains(&body["a"]));
        assert_eq!(body["b"], json!("keep"));
    }

    #[test]
    fn test_flip_boolean_flags_negates_first_bool_only() {
        let mut t = with_body(json!({"n": 1, "a": true, "b": true}));
        flip_boolean_flags(&mut t).expect("test: ok");
        assert_eq!(t.body, Some(json!({"n": 1, "a": false, "b": true})));
    }

    #[test]
    fn test_fuzz_ids_only_touches_identifier_keys() {
        let mut t = with_body(json!({"name": "x", "userId": 5}));
        fuzz_ids(&mut t, &mut rng()).expect("test: ok");
        let body = t.body.expect("test: body");
        assert_eq!(body["name"], json!("x"));
        let adversarial = [
            json!(-1),
            json!(0),
            json!(999_999_999),
            json!("abc"),
            json!("0'*"),
            json!("../../../etc/passwd"),
            json!(""),
            json!(" "),
        ];
        assert!(adversarial.contains(&body["userId"]));
    }

    #[test]
    fn test_fuzz_ids_no_identifier_is_noop() {
        let mut t = with_body(json!({"name": "x"}));
        fuzz_ids(&mut t, &mut rng()).expect("test: ok");
        assert_eq!(t.body, Some(json!({"name": "x"})));
    }

    #[test]
    fn test_content_type_vs_body_serializes_object() {
        let mut t = with_body(json!({"a": 1, "b": "two"})).with_header("content-type", "application/json");
        content_type_vs_body(&mut t).expect("test: ok");
        assert_eq!(t.header("Content-Type"), Some("text/plain"));
        assert_eq!(t.headers.len(), 1);
        assert_eq!(t.body, Some(json!(r#"{"a":1,"b":"two"}"#)));
    }

    #[test]
    fn test_content_type_vs_body_ignores_arrays() {
        let mut t = with_body(json!([1, 2]));
        content_type_vs_body(&mut t).expect("test: ok");
        assert_eq!(t.body, Some(json!([1, 2])));
        assert!(t.headers.is_empty());
    }
}
