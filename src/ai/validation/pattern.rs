//! Heuristic field extraction (the `PatternFallback` strategy).
//!
//! Pulls `key: value` / `key = value` pairs for schema fields out of text
//! that no structural repair could parse, coercing each value to the field's
//! declared type.

use regex::Regex;
use serde_json::{Map, Number, Value};

use super::json_repair::JsonRepairer;
use super::schema::{FieldKind, FieldSpec, TargetSchema, fold_key};

/// `targetAudience` -> `target_audience`
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() && i > 0 {
            out.push('_');
        }
        out.extend(ch.to_lowercase());
    }
    out.replace('-', "_")
}

fn spellings(spec: &FieldSpec) -> Vec<String> {
    let mut names = vec![spec.name.clone(), snake_case(&spec.name)];
    names.push(snake_case(&spec.name).replace('_', "-"));
    names.push(snake_case(&spec.name).replace('_', " "));
    names.extend(spec.aliases.iter().cloned());
    names.sort();
    names.dedup();
    // Longest first so `title` does not shadow `title_text`
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    names
}

fn field_pattern(spec: &FieldSpec) -> Option<Regex> {
    let names = spellings(spec)
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(
        r#"(?im)(?:^|[\s{{,\[(*-])["'`]?(?:{names})["'`]?\s*[:=]\s*(?:"((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)'|(\[[^\]]*\]?)|([^,\n}}]+))"#
    );
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(field = %spec.name, error = %e, "Skipping field pattern");
            None
        }
    }
}

/// Does the text plausibly mention this field under any spelling?
pub fn mentions_field(raw: &str, spec: &FieldSpec) -> bool {
    let haystack = fold_key(raw);
    std::iter::once(&spec.name)
        .chain(spec.aliases.iter())
        .any(|n| haystack.contains(&fold_key(n)))
}

/// Extract every schema field that can be found and coerced
pub fn extract_fields(raw: &str, schema: &TargetSchema) -> Map<String, Value> {
    let mut out = Map::new();
    for spec in &schema.fields {
        let Some(re) = field_pattern(spec) else {
            continue;
        };
        let found = re.captures_iter(raw).find_map(|caps| {
            if let Some(m) = caps.get(1) {
                coerce(spec, &unescape_double(m.as_str()), true)
            } else if let Some(m) = caps.get(2) {
                coerce(spec, &m.as_str().replace("\\'", "'"), true)
            } else {
                caps.get(3)
                    .or_else(|| caps.get(4))
                    .and_then(|m| coerce(spec, m.as_str().trim(), false))
            }
        });
        if let Some(value) = found {
            out.insert(spec.name.clone(), value);
        }
    }
    out
}

fn unescape_double(s: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{s}\"")).unwrap_or_else(|_| s.to_string())
}

fn strip_bare(s: &str) -> &str {
    s.trim()
        .trim_end_matches([';', '.'])
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
}

fn coerce(spec: &FieldSpec, text: &str, quoted: bool) -> Option<Value> {
    coerce_kind(spec.kind, spec.items, text, quoted)
}

fn coerce_kind(kind: FieldKind, items: Option<FieldKind>, text: &str, quoted: bool) -> Option<Value> {
    match kind {
        FieldKind::String => {
            let s = if quoted { text } else { strip_bare(text) };
            (!s.is_empty() || quoted).then(|| Value::String(s.to_string()))
        }
        FieldKind::Number => strip_bare(text)
            .parse::<f64>()
            .ok()
            .and_then(|n| {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    Some(Value::Number(Number::from(n as i64)))
                } else {
                    Number::from_f64(n).map(Value::Number)
                }
            }),
        FieldKind::Integer => {
            let s = strip_bare(text);
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| f as i64)
                })
                .map(|i| Value::Number(Number::from(i)))
        }
        FieldKind::Boolean => match strip_bare(text).to_lowercase().as_str() {
            "true" | "yes" | "y" => Some(Value::Bool(true)),
            "false" | "no" | "n" => Some(Value::Bool(false)),
            _ => None,
        },
        FieldKind::Array => coerce_array(items, text),
        FieldKind::Object => None,
    }
}

fn coerce_array(items: Option<FieldKind>, text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.starts_with('[')
        && let Some(repaired) = JsonRepairer::new().repair(trimmed)
        && let Value::Array(elements) = repaired.value
    {
        return match items {
            Some(kind) => elements
                .into_iter()
                .map(|e| match e {
                    Value::String(s) => coerce_kind(kind, None, &s, true),
                    other if kind.matches(&other) => Some(other),
                    other => coerce_kind(kind, None, &other.to_string(), false),
                })
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            None => Some(Value::Array(elements)),
        };
    }

    // Bare comma lists: `tags: a, b, c` is cut at the first comma by the
    // pattern, so only a single bare element is ever seen here.
    let kind = items.unwrap_or(FieldKind::String);
    let element = strip_bare(trimmed);
    if element.is_empty() {
        return None;
    }
    coerce_kind(kind, None, element, false).map(|v| Value::Array(vec![v]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> TargetSchema {
        TargetSchema::new(
            "meta",
            vec![
                FieldSpec::new("title", FieldKind::String),
                FieldSpec::new("wordCount", FieldKind::Integer),
                FieldSpec::new("score", FieldKind::Number),
                FieldSpec::new("published", FieldKind::Boolean),
                FieldSpec::new("tags", FieldKind::Array).with_items(FieldKind::String),
                FieldSpec::new("category", FieldKind::String).with_aliases(&["kind"]),
            ],
        )
    }

    #[test]
    fn test_extract_key_value_prose() {
        let raw = "Sure! Here it is:\n\
                   title: Getting Started\n\
                   word_count = 1200\n\
                   score: 0.9\n\
                   published: yes\n\
                   tags: [\"intro\", \"setup\"]\n\
                   kind: 'guide'";
        let out = extract_fields(raw, &schema());
        assert_eq!(out["title"], "Getting Started");
        assert_eq!(out["wordCount"], 1200);
        assert_eq!(out["score"], 0.9);
        assert_eq!(out["published"], true);
        assert_eq!(out["tags"], json!(["intro", "setup"]));
        assert_eq!(out["category"], "guide");
    }

    #[test]
    fn test_extract_from_broken_json() {
        let raw = r#"{"title": "A \"quoted\" title", "wordCount": "42" garbage"#;
        let out = extract_fields(raw, &schema());
        assert_eq!(out["title"], "A \"quoted\" title");
        assert_eq!(out["wordCount"], 42);
    }

    #[test]
    fn test_uncoercible_values_skipped() {
        let out = extract_fields("wordCount: many\npublished: perhaps", &schema());
        assert!(out.get("wordCount").is_none());
        assert!(out.get("published").is_none());
    }

    #[test]
    fn test_extraction_from_valid_json_is_stable() {
        let value = json!({"title": "x", "wordCount": 3, "score": 0.5, "published": false,
                           "tags": ["a"], "category": "guide"});
        let out = extract_fields(&value.to_string(), &schema());
        assert_eq!(Value::Object(out), value);
    }

    #[test]
    fn test_mentions_field() {
        let spec = FieldSpec::new("targetAudience", FieldKind::String).with_aliases(&["readers"]);
        assert!(mentions_field("The target audience is devs", &spec));
        assert!(mentions_field("READERS: ops", &spec));
        assert!(!mentions_field("nothing relevant", &spec));
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("wordCount"), "word_count");
        assert_eq!(snake_case("title"), "title");
    }
}
