// Workflow Conditions - Evaluates a single comparison against an event payload

use autoflow_shared::{Condition, ConditionOperator};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

/// When the compared field is absent from the event, `not_equals` and
/// `not_in` are vacuously true and every other operator is false.
pub const ABSENT_FIELD_MATCHES_NEGATIONS: bool = true;

/// Compiled patterns keyed by (pattern, case_sensitive); cleared when full
const PATTERN_CACHE_LIMIT: usize = 1024;

static PATTERN_CACHE: Lazy<Mutex<HashMap<(String, bool), Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, thiserror::Error)]
enum ConditionError {
    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("regex pattern must be a string, got {0}")]
    NonStringPattern(Value),
}

pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Evaluate one condition against an event. Never fails: any internal
    /// error is logged and the condition is treated as not satisfied.
    pub fn evaluate(condition: &Condition, event: &Value) -> bool {
        match Self::try_evaluate(condition, event) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(
                    field = %condition.field,
                    operator = %condition.operator,
                    error = %e,
                    "condition evaluation failed"
                );
                false
            }
        }
    }

    fn try_evaluate(condition: &Condition, event: &Value) -> Result<bool, ConditionError> {
        let Some(actual) = resolve_field(event, &condition.field) else {
            return Ok(ABSENT_FIELD_MATCHES_NEGATIONS && condition.operator.is_negation());
        };

        let expected = &condition.value;
        let cs = condition.case_sensitive;

        let matched = match condition.operator {
            ConditionOperator::Equals => values_equal(actual, expected, cs),
            ConditionOperator::NotEquals => !values_equal(actual, expected, cs),
            ConditionOperator::Contains => match actual {
                Value::Array(items) => items.iter().any(|item| values_equal(item, expected, cs)),
                _ => fold_case(&to_text(actual), cs).contains(&fold_case(&to_text(expected), cs)),
            },
            ConditionOperator::StartsWith => {
                fold_case(&to_text(actual), cs).starts_with(&fold_case(&to_text(expected), cs))
            }
            ConditionOperator::EndsWith => {
                fold_case(&to_text(actual), cs).ends_with(&fold_case(&to_text(expected), cs))
            }
            ConditionOperator::GreaterThan => compare_numbers(actual, expected, |a, b| a > b),
            ConditionOperator::LessThan => compare_numbers(actual, expected, |a, b| a < b),
            ConditionOperator::In => in_collection(actual, expected, cs),
            ConditionOperator::NotIn => !in_collection(actual, expected, cs),
            ConditionOperator::Regex => regex_match(actual, expected, cs)?,
        };

        Ok(matched)
    }
}

/// Resolve a dotted path through nested objects and arrays. Missing fields
/// and explicit nulls both resolve to `None`.
pub fn resolve_field<'a>(event: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = event;

    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    if current.is_null() { None } else { Some(current) }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn fold_case(text: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        text.to_string()
    } else {
        text.to_lowercase()
    }
}

fn values_equal(actual: &Value, expected: &Value, case_sensitive: bool) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => {
            if case_sensitive {
                a == b
            } else {
                a.to_lowercase() == b.to_lowercase()
            }
        }
        (Value::Number(_), Value::Number(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => {
            match (to_number(actual), to_number(expected)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => actual == expected,
    }
}

fn compare_numbers(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (to_number(actual), to_number(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn in_collection(actual: &Value, collection: &Value, case_sensitive: bool) -> bool {
    match collection {
        Value::Array(items) => items.iter().any(|item| values_equal(actual, item, case_sensitive)),
        Value::Object(map) => {
            let key = to_text(actual);
            if case_sensitive {
                map.contains_key(&key)
            } else {
                map.keys().any(|k| k.to_lowercase() == key.to_lowercase())
            }
        }
        scalar => values_equal(actual, scalar, case_sensitive),
    }
}

fn regex_match(actual: &Value, pattern: &Value, case_sensitive: bool) -> Result<bool, ConditionError> {
    let Value::String(pattern) = pattern else {
        return Err(ConditionError::NonStringPattern(pattern.clone()));
    };

    let re = compiled_pattern(pattern, case_sensitive)?;
    Ok(re.is_match(&to_text(actual)))
}

fn compiled_pattern(pattern: &str, case_sensitive: bool) -> Result<Regex, ConditionError> {
    let key = (pattern.to_string(), case_sensitive);
    if let Some(re) = PATTERN_CACHE.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
        return Ok(re.clone());
    }

    let re = regex::RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|source| ConditionError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;

    let mut cache = PATTERN_CACHE.lock().unwrap_or_else(|e| e.into_inner());
    if cache.len() >= PATTERN_CACHE_LIMIT {
        cache.clear();
    }
    cache.insert(key, re.clone());
    Ok(re)
}

/// Common conditions for file automation workflows
pub mod presets {
    use super::*;

    /// Files with the given extension, e.g. ".pdf"
    pub fn file_extension(extension: &str) -> Condition {
        Condition::ends_with("name", extension)
    }

    /// Files stored below a folder prefix
    pub fn in_folder(prefix: &str) -> Condition {
        Condition::starts_with("path", prefix)
    }

    /// Files larger than the given number of bytes
    pub fn larger_than(bytes: u64) -> Condition {
        Condition::greater_than("size", bytes as f64)
    }

    /// Events raised by one of the given users
    pub fn modified_by(users: &[&str]) -> Condition {
        Condition::in_list(
            "modified_by",
            users.iter().map(|u| Value::String(u.to_string())).collect(),
        )
    }
}
