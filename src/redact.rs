//! Redaction of sensitive leaf values in content records
//!
//! Content is modelled as `serde_json::Value`, so the recursion below is an
//! exhaustive match over object / array / scalar / null.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which keys are elided, and how deep the walk may go.
///
/// Matchers are case-insensitive substrings of key names. The walk stops at
/// `max_depth` and returns deeper subtrees untouched, which bounds the work on
/// pathologically nested input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionPolicy {
    pub matchers: Vec<String>,
    pub placeholder: String,
    pub max_depth: usize,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self {
            matchers: ["image", "photo", "logo", "avatar", "icon", "video", "password", "token", "secret"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            placeholder: "[REDACTED]".to_string(),
            max_depth: 16,
        }
    }
}

impl RedactionPolicy {
    pub fn new<I, S>(matchers: I, placeholder: impl Into<String>, max_depth: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            matchers: matchers.into_iter().map(Into::into).collect(),
            placeholder: placeholder.into(),
            max_depth,
        }
    }

    /// True when `key` contains any matcher, ignoring case.
    pub fn matches(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.matchers
            .iter()
            .filter(|m| !m.is_empty())
            .any(|m| key.contains(&m.to_lowercase()))
    }

    /// Redact a whole record. Pure; the input is not modified.
    pub fn redact_record(&self, record: &Map<String, Value>) -> Map<String, Value> {
        self.redact_map(record, 0)
    }

    /// Redact an arbitrary value.
    pub fn redact_value(&self, value: &Value) -> Value {
        self.walk(value, 0)
    }

    fn walk(&self, value: &Value, depth: usize) -> Value {
        if depth > self.max_depth {
            return value.clone();
        }
        match value {
            Value::Object(map) => Value::Object(self.redact_map(map, depth)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.walk(v, depth + 1)).collect()),
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        }
    }

    fn redact_map(&self, map: &Map<String, Value>, depth: usize) -> Map<String, Value> {
        if depth > self.max_depth {
            return map.clone();
        }
        let mut out = Map::with_capacity(map.len());
        for (key, value) in map {
            if self.matches(key) {
                if !is_empty(value) {
                    out.insert(key.clone(), Value::String(self.placeholder.clone()));
                }
                continue;
            }
            out.insert(key.clone(), self.walk(value, depth + 1));
        }
        out
    }
}

/// Null, empty strings, empty arrays and empty objects count as empty.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> RedactionPolicy {
        RedactionPolicy::new(["image", "secret"], "[REDACTED]", 8)
    }

    #[test]
    fn non_empty_match_is_replaced() {
        let out = policy().redact_value(&json!({"heroImage": "https://cdn/x.png", "title": "Hi"}));
        assert_eq!(out, json!({"heroImage": "[REDACTED]", "title": "Hi"}));
    }

    #[test]
    fn empty_match_is_omitted() {
        let out = policy().redact_value(&json!({
            "heroImage": "",
            "bgImage": null,
            "images": [],
            "imageMeta": {},
            "title": "Hi"
        }));
        assert_eq!(out, json!({"title": "Hi"}));
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let p = policy();
        assert!(p.matches("HEROIMAGE"));
        assert!(p.matches("clientSecretKey"));
        assert!(!p.matches("imag"));
    }

    #[test]
    fn arrays_and_nesting_are_walked() {
        let input = json!({
            "cards": [
                {"name": "a", "image": "a.png"},
                {"name": "b", "image": ""},
                "plain",
                7
            ],
            "nested": {"deeper": {"secret": 42, "keep": true}}
        });
        let out = policy().redact_value(&input);
        assert_eq!(
            out,
            json!({
                "cards": [
                    {"name": "a", "image": "[REDACTED]"},
                    {"name": "b"},
                    "plain",
                    7
                ],
                "nested": {"deeper": {"secret": "[REDACTED]", "keep": true}}
            })
        );
    }

    #[test]
    fn non_matching_structure_is_preserved_exactly() {
        let input = json!({"a": {"b": [1, 2, {"c": null}], "d": ""}, "e": false});
        assert_eq!(policy().redact_value(&input), input);
    }

    #[test]
    fn redaction_is_idempotent() {
        let input = json!({
            "heroImage": "x",
            "list": [{"logoImage": "y", "n": 1}, {"image": ""}],
            "secretToken": {"nested": "z"}
        });
        let p = policy();
        let once = p.redact_value(&input);
        let twice = p.redact_value(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn depth_limit_returns_subtree_unchanged() {
        let p = RedactionPolicy::new(["image"], "[REDACTED]", 1);
        let input = json!({
            "image": "top",
            "a": {"image": "one", "b": {"image": "two"}}
        });
        let out = p.redact_value(&input);
        assert_eq!(
            out,
            json!({
                "image": "[REDACTED]",
                "a": {"image": "[REDACTED]", "b": {"image": "two"}}
            })
        );
    }

    #[test]
    fn pathological_depth_terminates() {
        // Cloning and dropping a deep value recurses; give it room.
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let mut value = json!({"image": "leaf"});
                for _ in 0..5_000 {
                    value = json!({ "n": value });
                }
                let p = RedactionPolicy::new(["image"], "[REDACTED]", 32);
                let out = p.redact_value(&value);
                assert!(out.is_object());
                // the leaf sits below max_depth and is left as-is
                assert_eq!(out, value);
            })
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn record_redaction_matches_value_redaction() {
        let record = json!({"hero": {"heroImage": "x"}, "team": null});
        let map = record.as_object().unwrap();
        let p = policy();
        assert_eq!(Value::Object(p.redact_record(map)), p.redact_value(&record));
    }
}
